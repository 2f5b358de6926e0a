//! Split alignment: stitching candidate alignments of one query into an
//! optimal concatenation of pieces, with jump and cis-splice junctions.

pub mod aligner;
pub mod matrix;
pub mod params;
pub mod unsplit;

pub use aligner::{AlignmentPart, SplitAligner};
pub use params::SplitAlignerParams;
pub use unsplit::{maf_slice, maf_slice_beg, maf_slice_end, UnsplitAlignment};

use std::io::Write;

use anyhow::Result;

/// Split one query's candidate alignments and write the chosen pieces as
/// MAF blocks with per-column probability lines.
pub fn split_one_query(
    params: &SplitAlignerParams,
    aligner: &mut SplitAligner,
    alns: Vec<UnsplitAlignment>,
    out: &mut impl Write,
) -> Result<()> {
    let is_both_strands = params.is_genome() && params.splice_prior > 0.0;
    aligner.layout(params, alns);
    aligner.init_matrices_for_one_query(params, is_both_strands)?;

    let mut viterbi_score = if params.is_spliced() {
        aligner.viterbi_splice(params)
    } else {
        aligner.viterbi_split(params)
    };

    let mut sense_log_odds = 0.0;
    if is_both_strands {
        // score the antisense splice-signal orientation too, and keep the
        // better one
        aligner.flip_splice_signals();
        let rev_score = aligner.viterbi_splice(params);
        aligner.forward_splice(params);
        aligner.flip_splice_signals();
        aligner.forward_splice(params);
        sense_log_odds = aligner.splice_signal_strand_log_odds();
        if rev_score > viterbi_score {
            aligner.flip_splice_signals();
            viterbi_score = rev_score;
        }
    } else if params.is_spliced() {
        aligner.forward_splice(params);
    } else {
        aligner.forward_split(params);
    }

    if params.is_spliced() {
        aligner.backward_splice(params);
    } else {
        aligner.backward_split(params);
    }

    if viterbi_score <= 0 {
        return Ok(()); // nothing aligns: emit no output for this query
    }

    let mut parts = aligner.trace_back(params, viterbi_score);
    parts.reverse();

    for part in &parts {
        let a = &aligner.alns()[part.aln_index];
        let ralign = a.ralign.as_bytes();
        let qalign = a.qalign.as_bytes();
        let (q_slice_beg, aln_beg) = maf_slice_beg(ralign, qalign, a.qstart, part.query_beg);
        let (_, aln_end) = maf_slice_end(ralign, qalign, a.qend, part.query_end);
        if aln_beg >= aln_end {
            continue;
        }
        let probs = aligner.marginal_probs(q_slice_beg, part.aln_index, aln_beg, aln_end);
        let best = probs.iter().cloned().fold(0.0f64, f64::max);
        let mismap = (1.0 - best).max(1e-10);
        let score = aligner.segment_score(part.aln_index, part.query_beg, part.query_end);
        write!(out, "a score={score} mismap={mismap:.3e}")?;
        if is_both_strands {
            write!(out, " senseLogOdds={sense_log_odds:.3}")?;
        }
        writeln!(out)?;
        let a = &aligner.alns()[part.aln_index];
        out.write_all(maf_slice(a, aln_beg, aln_end, &probs).as_bytes())?;
        writeln!(out)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequence::{dna_encode_table, MultiSequence};
    use std::io::BufReader;

    fn candidate(
        qbeg: usize,
        qend: usize,
        rname: &str,
        rstart: usize,
        letters: &str,
    ) -> UnsplitAlignment {
        let n = qend - qbeg;
        UnsplitAlignment {
            qname: "read1".to_string(),
            qstart: qbeg,
            qend,
            qstrand: 0,
            rstart,
            rend: rstart + n,
            rname: rname.to_string(),
            ralign: letters.to_string(),
            qalign: letters.to_string(),
            qqual: String::new(),
            rseqlen: 1 << 20,
            qseqlen: 20,
            lines: Vec::new(),
        }
    }

    /// Genome with a perfect GT..AG intron between the two candidate loci.
    fn write_spliced_genome(dir: &std::path::Path) -> String {
        let mut text = vec![b'A'; 2200];
        text[100..110].copy_from_slice(b"ACGTACGTAC");
        text[110] = b'G';
        text[111] = b'T';
        text[2098] = b'A';
        text[2099] = b'G';
        text[2100..2110].copy_from_slice(b"GGCCGGCCGG");
        let fasta = format!(">chr1\n{}\n", std::str::from_utf8(&text).unwrap());

        let mut m = MultiSequence::new(2);
        let encode = dna_encode_table();
        let mut input = BufReader::new(fasta.as_bytes());
        while m.append_from_fasta(&mut input, &encode).unwrap() {}
        let base = dir.join("genome");
        let base = base.to_str().unwrap().to_string();
        m.to_files(&base, false, false).unwrap();
        std::fs::write(
            format!("{base}.prj"),
            "version=1\nalphabet=ACGT\nnumofsequences=1\nvolumes=1\nintegersize=64\nsymbolsize=8\n",
        )
        .unwrap();
        base
    }

    fn splice_params(dir: &std::path::Path) -> SplitAlignerParams {
        let mut p = SplitAlignerParams::default();
        p.set_params(-8, -2, -8, -2, -100, -150, 5.0, 0);
        p.set_simple_score_matrix(6, -18);
        p.set_splice_params(0.01, 7.0, 1.75);
        p.set_splice_signals();
        p.read_genome(&write_spliced_genome(dir)).unwrap();
        p
    }

    #[test]
    fn cis_splice_beats_plain_jump() {
        let dir = tempfile::tempdir().unwrap();
        let params = splice_params(dir.path());
        assert!(params.is_genome());
        assert!(params.max_splice_dist > 2000);
        // the donor and acceptor dinucleotides decode as written
        assert_eq!(&params.splice_beg_signal("chr1", true, true, 110).unwrap(), b"GT");
        assert_eq!(&params.splice_end_signal("chr1", true, true, 2100).unwrap(), b"AG");

        let alns = vec![
            candidate(0, 10, "chr1", 100, "ACGTACGTAC"),
            candidate(10, 20, "chr1", 2100, "GGCCGGCCGG"),
        ];
        let mut sa = SplitAligner::new();
        sa.layout(&params, alns);
        sa.init_matrices_for_one_query(&params, true).unwrap();
        let v = sa.viterbi_splice(&params);
        // 120 match points, minus the splice: 69 for an intron of 1990,
        // minus 28 back for the GT..AG signals
        assert_eq!(v, 79);
        // the splice-scored transition beats the raw jump
        assert!(v > 120 + params.jump_score as i64);

        let mut parts = sa.trace_back(&params, v);
        parts.reverse();
        assert_eq!(parts.len(), 2);
        assert_eq!((parts[0].query_beg, parts[0].query_end), (0, 10));
        assert_eq!((parts[1].query_beg, parts[1].query_end), (10, 20));
        assert_eq!(parts[0].aln_index, 0);
        assert_eq!(parts[1].aln_index, 1);
    }

    #[test]
    fn split_driver_emits_both_pieces() {
        let dir = tempfile::tempdir().unwrap();
        let params = splice_params(dir.path());
        let alns = vec![
            candidate(0, 10, "chr1", 100, "ACGTACGTAC"),
            candidate(10, 20, "chr1", 2100, "GGCCGGCCGG"),
        ];
        let mut sa = SplitAligner::new();
        let mut out = Vec::new();
        split_one_query(&params, &mut sa, alns, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let blocks: Vec<&str> = text.split("\n\n").filter(|s| !s.trim().is_empty()).collect();
        assert_eq!(blocks.len(), 2, "output was:\n{text}");
        assert!(blocks[0].contains("s chr1 100 10"));
        assert!(blocks[1].contains("s chr1 2100 10"));
        assert!(text.contains("mismap="));
    }

    #[test]
    fn jump_only_driver_runs() {
        // no genome, no splice model: plain jumps
        let mut params = SplitAlignerParams::default();
        params.set_params(-8, -2, -8, -2, -30, -50, 5.0, 0);
        params.set_simple_score_matrix(6, -18);
        let alns = vec![
            candidate(0, 10, "chr1", 100, "ACGTACGTAC"),
            candidate(10, 20, "chr1", 610, "GGCCGGCCGG"),
        ];
        let mut sa = SplitAligner::new();
        let mut out = Vec::new();
        split_one_query(&params, &mut sa, alns, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("s chr1 100 10"));
        assert!(text.contains("s chr1 610 10"));
    }
}
