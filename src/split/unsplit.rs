//! Candidate alignment records parsed from MAF, and MAF slicing.

use anyhow::{anyhow, bail, Result};

use crate::score::ascii_probability;

/// One candidate alignment of a query against the reference, as read from
/// a MAF block.  Alignment strings are equal-length with `-` gaps.
#[derive(Debug, Clone, Default)]
pub struct UnsplitAlignment {
    pub qname: String,
    pub qstart: usize,
    pub qend: usize,
    /// 0 = both strands forward, bit 0 = query flipped, bit 1 = reference
    /// reversed.
    pub qstrand: u8,
    pub rstart: usize,
    pub rend: usize,
    pub rname: String,
    pub ralign: String,
    pub qalign: String,
    /// Per-column quality characters, empty when absent.
    pub qqual: String,
    pub rseqlen: usize,
    pub qseqlen: usize,
    /// The original MAF lines, kept for reprinting.
    pub lines: Vec<String>,
}

impl UnsplitAlignment {
    pub fn is_forward_strand(&self) -> bool {
        self.qstrand < 2
    }

    pub fn is_flipped(&self) -> bool {
        self.qstrand % 2 == 1
    }

    /// Parse one MAF block (the lines from `a` up to the blank line).
    /// The first `s` line is the reference, the second the query.
    pub fn from_maf_block(lines: &[String]) -> Result<UnsplitAlignment> {
        let mut aln = UnsplitAlignment {
            lines: lines.to_vec(),
            ..UnsplitAlignment::default()
        };
        let mut s_lines = 0;
        for line in lines {
            let mut fields = line.split_whitespace();
            match fields.next() {
                Some("s") => {
                    let name = fields.next().ok_or_else(|| anyhow!("bad MAF s line"))?;
                    let start: usize = parse_field(fields.next())?;
                    let size: usize = parse_field(fields.next())?;
                    let strand = fields.next().ok_or_else(|| anyhow!("bad MAF s line"))?;
                    let seqlen: usize = parse_field(fields.next())?;
                    let text = fields.next().ok_or_else(|| anyhow!("bad MAF s line"))?;
                    if s_lines == 0 {
                        aln.rname = name.to_string();
                        aln.rstart = start;
                        aln.rend = start + size;
                        aln.rseqlen = seqlen;
                        aln.ralign = text.to_string();
                        if strand == "-" {
                            aln.qstrand |= 2;
                        }
                    } else {
                        aln.qname = name.to_string();
                        aln.qstart = start;
                        aln.qend = start + size;
                        aln.qseqlen = seqlen;
                        aln.qalign = text.to_string();
                        if strand == "-" {
                            aln.qstrand |= 1;
                        }
                    }
                    s_lines += 1;
                }
                Some("q") => {
                    let _name = fields.next();
                    if let Some(text) = fields.last() {
                        aln.qqual = text.to_string();
                    }
                }
                _ => {}
            }
        }
        if s_lines < 2 {
            bail!("bad MAF block: fewer than two s lines");
        }
        if aln.ralign.len() != aln.qalign.len() {
            bail!("bad MAF block: unequal alignment lengths");
        }
        Ok(aln)
    }
}

fn parse_field(f: Option<&str>) -> Result<usize> {
    f.ok_or_else(|| anyhow!("bad MAF s line"))?
        .parse()
        .map_err(|_| anyhow!("bad MAF s line"))
}

/// Find the slice start for query coordinate `qbeg`: returns the adjusted
/// query coordinate and the alignment column where the slice begins.
pub fn maf_slice_beg(_raln: &[u8], qaln: &[u8], qstart: usize, qbeg: usize) -> (usize, usize) {
    let mut q = qstart;
    let mut col = 0;
    while q < qbeg && col < qaln.len() {
        if qaln[col] != b'-' {
            q += 1;
        }
        col += 1;
    }
    // don't start the slice inside a deletion
    while col < qaln.len() && qaln[col] == b'-' {
        col += 1;
    }
    (q, col)
}

/// Find the slice end for query coordinate `qend`: returns the adjusted
/// query coordinate and one past the last alignment column of the slice.
pub fn maf_slice_end(_raln: &[u8], qaln: &[u8], qend_seq: usize, qend: usize) -> (usize, usize) {
    let mut q = qend_seq;
    let mut col = qaln.len();
    while q > qend && col > 0 {
        col -= 1;
        if qaln[col] != b'-' {
            q -= 1;
        }
    }
    while col > 0 && qaln[col - 1] == b'-' {
        col -= 1;
    }
    (q, col)
}

fn count_letters(text: &[u8]) -> usize {
    text.iter().filter(|&&c| c != b'-').count()
}

/// Append MAF `s`, `q` and `p` lines for columns `[aln_beg, aln_end)` of
/// the alignment, plus a synthetic `p` line encoding `probs` (one value
/// per column).  Returns the text.
pub fn maf_slice(
    aln: &UnsplitAlignment,
    aln_beg: usize,
    aln_end: usize,
    probs: &[f64],
) -> String {
    let ralign = aln.ralign.as_bytes();
    let qalign = aln.qalign.as_bytes();
    let r_slice = &ralign[aln_beg..aln_end];
    let q_slice = &qalign[aln_beg..aln_end];

    let rstart = aln.rstart + count_letters(&ralign[..aln_beg]);
    let rsize = count_letters(r_slice);
    let qstart = aln.qstart + count_letters(&qalign[..aln_beg]);
    let qsize = count_letters(q_slice);

    let rstrand = if aln.qstrand & 2 != 0 { '-' } else { '+' };
    let qstrand = if aln.qstrand & 1 != 0 { '-' } else { '+' };

    let mut out = String::new();
    out.push_str(&format!(
        "s {} {} {} {} {} {}\n",
        aln.rname,
        rstart,
        rsize,
        rstrand,
        aln.rseqlen,
        std::str::from_utf8(r_slice).unwrap_or("")
    ));
    out.push_str(&format!(
        "s {} {} {} {} {} {}\n",
        aln.qname,
        qstart,
        qsize,
        qstrand,
        aln.qseqlen,
        std::str::from_utf8(q_slice).unwrap_or("")
    ));
    if !aln.qqual.is_empty() {
        let qq = &aln.qqual.as_bytes()[aln_beg..aln_end.min(aln.qqual.len())];
        out.push_str(&format!(
            "q {} {}\n",
            aln.qname,
            std::str::from_utf8(qq).unwrap_or("")
        ));
    }
    let mut p_line = String::from("p ");
    for &p in probs {
        p_line.push(ascii_probability(p) as char);
    }
    p_line.push('\n');
    out.push_str(&p_line);
    out
}

/// Decode the column probabilities of a `p` line back to values in [0, 1].
pub fn decode_p_line(symbols: &str) -> Vec<f64> {
    symbols
        .bytes()
        .map(|b| (b.saturating_sub(33) as f64 / 93.0).min(1.0))
        .collect()
}

/// Combined per-alignment error probability from two `p` lines (e.g. the
/// aligner's column line and the split line): the complement of both being
/// right at their weakest columns.
pub fn p_lines_to_error_prob(line1: &str, line2: &str) -> f64 {
    let worst = |line: &str| -> f64 {
        decode_p_line(line)
            .into_iter()
            .fold(0.0f64, |acc, p| acc.max(1.0 - p))
    };
    let e1 = worst(line1);
    let e2 = worst(line2);
    1.0 - (1.0 - e1) * (1.0 - e2)
}
