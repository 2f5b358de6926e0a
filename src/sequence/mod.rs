//! Multi-sequence container with packed symbols.
//!
//! Many sequences live in one flat buffer of alphabet indices.  Each logical
//! sequence is followed by a sentinel byte and pad bytes, so DP extensions
//! can run off a sequence end without bounds checks: the sentinel scores low
//! enough to stop any path.  Per-sequence offsets, names (with a trailing
//! strand character), optional quality scores and an optional PSSM ride
//! along and are kept consistent by every mutation.

use std::fs::File;
use std::io::{BufWriter, Read, Write};

use anyhow::{bail, Context, Result};

use crate::error::SaltoError;
use crate::score::{COMPLEMENT_INDEX, SCORE_MATRIX_ROW_SIZE, SEQUENCE_END_SENTINEL};

/// Packed multi-sequence buffer plus its side tables.
#[derive(Default, Clone)]
pub struct MultiSequence {
    seq: Vec<u8>,
    /// Padded end of sequence i is `ends[i + 1]`; `ends[0]` is the pad size.
    ends: Vec<u64>,
    names: Vec<u8>,
    name_ends: Vec<u64>,
    quality_scores: Vec<u8>,
    quals_per_letter: usize,
    /// When present: `SCORE_MATRIX_ROW_SIZE` scores per sequence position.
    pssm: Vec<i32>,
    pad_size: usize,
    unfinished: bool,
}

impl MultiSequence {
    pub fn new(pad_size: usize) -> Self {
        let mut m = MultiSequence::default();
        m.init_for_appending(pad_size);
        m
    }

    pub fn init_for_appending(&mut self, pad_size: usize) {
        self.pad_size = pad_size;
        self.seq.clear();
        self.seq.resize(pad_size, SEQUENCE_END_SENTINEL);
        self.ends.clear();
        self.ends.push(pad_size as u64);
        self.names.clear();
        self.name_ends.clear();
        self.name_ends.push(0);
        self.quality_scores.clear();
        self.quals_per_letter = 0;
        self.pssm.clear();
        self.unfinished = false;
    }

    pub fn finished_sequences(&self) -> usize {
        self.ends.len() - 1
    }

    pub fn pad_size(&self) -> usize {
        self.pad_size
    }

    /// Start of sequence i in the packed buffer.
    pub fn seq_beg(&self, i: usize) -> usize {
        self.ends[i] as usize
    }

    /// One past the last symbol of sequence i (before its pad).
    pub fn seq_end(&self, i: usize) -> usize {
        self.ends[i + 1] as usize - self.pad_size
    }

    pub fn seq_len(&self, i: usize) -> usize {
        self.seq_end(i) - self.seq_beg(i)
    }

    /// End of sequence i including its pad.
    pub fn pad_end(&self, i: usize) -> usize {
        self.ends[i + 1] as usize
    }

    pub fn seq(&self) -> &[u8] {
        &self.seq
    }

    pub fn seq_writer(&mut self) -> &mut [u8] {
        &mut self.seq
    }

    pub fn quals_per_letter(&self) -> usize {
        self.quals_per_letter
    }

    pub fn quality_scores(&self) -> &[u8] {
        &self.quality_scores
    }

    pub fn pssm(&self) -> &[i32] {
        &self.pssm
    }

    pub fn seq_name(&self, i: usize) -> &str {
        let beg = self.name_ends[i] as usize;
        let end = self.name_ends[i + 1] as usize - 1; // drop the strand char
        std::str::from_utf8(&self.names[beg..end]).unwrap_or("?")
    }

    /// Strand character stored at the tail of the name.
    pub fn strand(&self, i: usize) -> u8 {
        self.names[self.name_ends[i + 1] as usize - 1]
    }

    pub fn add_name(&mut self, name: &str) {
        self.names.extend_from_slice(name.as_bytes());
        self.names.push(b'+');
        self.name_ends.push(self.names.len() as u64);
    }

    /// Append one FASTA record, encoding letters through `encode`.
    /// Returns false at end of input.
    pub fn append_from_fasta(
        &mut self,
        input: &mut impl std::io::BufRead,
        encode: &[u8; 256],
    ) -> Result<bool> {
        let mut line = String::new();
        if !self.unfinished {
            loop {
                line.clear();
                if input.read_line(&mut line)? == 0 {
                    return Ok(false);
                }
                let t = line.trim_end();
                if t.is_empty() {
                    continue;
                }
                if !t.starts_with('>') {
                    return Err(SaltoError::InputFormat(
                        "bad FASTA sequence data: missing '>'".into(),
                    )
                    .into());
                }
                let name = t[1..].split_whitespace().next().unwrap_or("");
                self.add_name(name);
                self.unfinished = true;
                break;
            }
        }
        loop {
            line.clear();
            let n = input.read_line(&mut line)?;
            if n == 0 {
                break;
            }
            let t = line.trim_end();
            if t.starts_with('>') {
                self.finish_the_last_sequence();
                self.unfinished = true;
                let name = t[1..].split_whitespace().next().unwrap_or("");
                self.add_name(name);
                return Ok(true);
            }
            for &c in t.as_bytes() {
                if c > b' ' {
                    self.seq.push(encode[c as usize]);
                }
            }
        }
        self.finish_the_last_sequence();
        Ok(true)
    }

    /// Terminate the sequence being appended: sentinel plus pad bytes.
    pub fn finish_the_last_sequence(&mut self) {
        self.seq.push(SEQUENCE_END_SENTINEL);
        let new_end = self.seq.len() + self.pad_size - 1;
        self.seq.resize(new_end, SEQUENCE_END_SENTINEL);
        self.ends.push(new_end as u64);
        self.quality_scores
            .resize(new_end * self.quals_per_letter, 0);
        self.unfinished = false;
    }

    /// Attach per-base quality scores for the whole buffer.
    pub fn set_quality_scores(&mut self, quals: Vec<u8>, quals_per_letter: usize) {
        assert_eq!(quals.len(), self.seq.len() * quals_per_letter);
        self.quality_scores = quals;
        self.quals_per_letter = quals_per_letter;
    }

    /// Attach a PSSM covering the whole buffer.
    pub fn set_pssm(&mut self, pssm: Vec<i32>) {
        assert_eq!(pssm.len(), self.seq.len() * SCORE_MATRIX_ROW_SIZE);
        self.pssm = pssm;
    }

    /// Reverse-complement sequence `seq_num` in place: symbols, quality run,
    /// the strand character at the name tail, and PSSM rows (rows reversed,
    /// columns permuted by the complement).
    pub fn reverse_complement_one_sequence(&mut self, seq_num: usize) {
        let b = self.seq_beg(seq_num);
        let e = self.seq_end(seq_num);
        self.seq[b..e].reverse();
        for s in &mut self.seq[b..e] {
            *s = COMPLEMENT_INDEX[*s as usize];
        }

        let q = self.quals_per_letter;
        if q > 0 {
            self.quality_scores[b * q..e * q].reverse();
            if q > 1 {
                // un-reverse within each per-base group
                for chunk in self.quality_scores[b * q..e * q].chunks_mut(q) {
                    chunk.reverse();
                }
            }
        }

        let tail = self.name_ends[seq_num + 1] as usize - 1;
        self.names[tail] = match self.names[tail] {
            b'+' => b'-',
            _ => b'+',
        };

        if !self.pssm.is_empty() {
            let (mut b, mut e) = (b, e);
            let p = &mut self.pssm;
            while b < e {
                e -= 1;
                for i in 0..SCORE_MATRIX_ROW_SIZE {
                    let j = COMPLEMENT_INDEX[i] as usize;
                    if b < e || i < j {
                        p.swap(b * SCORE_MATRIX_ROW_SIZE + i, e * SCORE_MATRIX_ROW_SIZE + j);
                    }
                }
                b += 1;
            }
        }
    }

    /// Append a copy of sequence `seq_num` (name, symbols, pad, quality).
    pub fn duplicate_one_sequence(&mut self, seq_num: usize) {
        assert!(self.pssm.is_empty());
        let name_beg = self.name_ends[seq_num] as usize;
        let name_end = self.name_ends[seq_num + 1] as usize;
        self.names.extend_from_within(name_beg..name_end);
        self.name_ends.push(self.names.len() as u64);

        let b = self.seq_beg(seq_num);
        let e = self.pad_end(seq_num);
        self.seq.extend_from_within(b..e);
        self.ends.push(self.seq.len() as u64);

        let q = self.quals_per_letter;
        if q > 0 {
            self.quality_scores.extend_from_within(b * q..e * q);
        }
    }

    // ------------------------------------------------------------------
    // On-disk format: .tis / .ssp / .sds / .des / .qua
    // ------------------------------------------------------------------

    /// Read a packed sequence set written by `to_files` (or an index
    /// builder).  `is_4bit` unpacks two bases per `.tis` byte; symbols stay
    /// 8-bit in memory.  `is_small_coords` selects 32-bit offsets.
    pub fn from_files(
        base_name: &str,
        seq_count: usize,
        quals_per_letter: usize,
        is_4bit: bool,
        is_small_coords: bool,
    ) -> Result<Self> {
        let ends = read_offsets(&format!("{base_name}.ssp"), seq_count + 1, is_small_coords)?;
        let name_ends = read_offsets(&format!("{base_name}.sds"), seq_count + 1, is_small_coords)?;

        let seq_length = *ends.last().unwrap() as usize;
        let packed = read_exact_file(
            &format!("{base_name}.tis"),
            if is_4bit { (seq_length + 1) / 2 } else { seq_length },
        )?;
        let seq = if is_4bit {
            unpack_4bit(&packed, seq_length)
        } else {
            packed
        };

        let names = read_exact_file(
            &format!("{base_name}.des"),
            *name_ends.last().unwrap() as usize,
        )?;

        let quality_scores = if quals_per_letter > 0 {
            read_exact_file(&format!("{base_name}.qua"), seq_length * quals_per_letter)?
        } else {
            Vec::new()
        };

        Ok(MultiSequence {
            pad_size: ends[0] as usize,
            seq,
            ends,
            names,
            name_ends,
            quality_scores,
            quals_per_letter,
            pssm: Vec::new(),
            unfinished: false,
        })
    }

    pub fn to_files(&self, base_name: &str, is_4bit: bool, is_small_coords: bool) -> Result<()> {
        write_offsets(&format!("{base_name}.ssp"), &self.ends, is_small_coords)?;
        write_offsets(
            &format!("{base_name}.sds"),
            &self.name_ends[..self.ends.len()],
            is_small_coords,
        )?;

        let seq_length = *self.ends.last().unwrap() as usize;
        if is_4bit {
            write_file(
                &format!("{base_name}.tis"),
                &pack_4bit(&self.seq[..seq_length]),
            )?;
        } else {
            write_file(&format!("{base_name}.tis"), &self.seq[..seq_length])?;
        }

        let names_len = self.name_ends[self.finished_sequences()] as usize;
        write_file(&format!("{base_name}.des"), &self.names[..names_len])?;

        if self.quals_per_letter > 0 {
            write_file(
                &format!("{base_name}.qua"),
                &self.quality_scores[..seq_length * self.quals_per_letter],
            )?;
        }
        Ok(())
    }
}

fn read_exact_file(path: &str, len: usize) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(len);
    File::open(path)
        .with_context(|| format!("can't open file: {path}"))?
        .read_to_end(&mut buf)
        .with_context(|| format!("can't read file: {path}"))?;
    if buf.len() < len {
        bail!("truncated file: {path}");
    }
    buf.truncate(len);
    Ok(buf)
}

fn write_file(path: &str, bytes: &[u8]) -> Result<()> {
    let mut w =
        BufWriter::new(File::create(path).with_context(|| format!("can't create file: {path}"))?);
    w.write_all(bytes)?;
    Ok(())
}

fn read_offsets(path: &str, count: usize, is_small: bool) -> Result<Vec<u64>> {
    let width = if is_small { 4 } else { 8 };
    let bytes = read_exact_file(path, count * width)?;
    let mut out = Vec::with_capacity(count);
    for chunk in bytes.chunks_exact(width) {
        out.push(if is_small {
            u32::from_le_bytes(chunk.try_into().unwrap()) as u64
        } else {
            u64::from_le_bytes(chunk.try_into().unwrap())
        });
    }
    Ok(out)
}

fn write_offsets(path: &str, offsets: &[u64], is_small: bool) -> Result<()> {
    let mut bytes = Vec::with_capacity(offsets.len() * 8);
    for &x in offsets {
        if is_small {
            bytes.extend_from_slice(&(x as u32).to_le_bytes());
        } else {
            bytes.extend_from_slice(&x.to_le_bytes());
        }
    }
    write_file(path, &bytes)
}

fn pack_4bit(seq: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity((seq.len() + 1) / 2);
    for pair in seq.chunks(2) {
        let hi = pair[0] & 0xf;
        let lo = if pair.len() > 1 { pair[1] & 0xf } else { 0 };
        out.push(hi << 4 | lo);
    }
    out
}

fn unpack_4bit(packed: &[u8], len: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(len);
    for &b in packed {
        out.push(b >> 4);
        if out.len() < len {
            out.push(b & 0xf);
        }
    }
    out.truncate(len);
    out
}

/// Encode table mapping ACGT (either case) to 0..3, everything else to the
/// sentinel value.
pub fn dna_encode_table() -> [u8; 256] {
    let mut t = [SEQUENCE_END_SENTINEL; 256];
    for (i, c) in b"ACGT".iter().enumerate() {
        t[*c as usize] = i as u8;
        t[c.to_ascii_lowercase() as usize] = i as u8;
    }
    t
}

/// Decode table from alphabet index back to an uppercase letter.
pub const DNA_DECODE: [u8; 5] = *b"ACGTN";

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::BufReader;

    fn from_fasta(text: &str) -> MultiSequence {
        let mut m = MultiSequence::new(1);
        let encode = dna_encode_table();
        let mut input = BufReader::new(text.as_bytes());
        while m.append_from_fasta(&mut input, &encode).unwrap() {}
        m
    }

    #[test]
    fn fasta_append_offsets_monotonic() {
        let m = from_fasta(">a\nACGT\n>b\nGG\nTT\n");
        assert_eq!(m.finished_sequences(), 2);
        assert_eq!(m.seq_len(0), 4);
        assert_eq!(m.seq_len(1), 4);
        assert_eq!(m.seq_name(0), "a");
        assert_eq!(m.seq_name(1), "b");
        assert_eq!(m.seq_beg(0), 1);
        assert!(m.seq_end(0) <= m.seq_beg(1));
        assert_eq!(m.seq()[m.seq_end(0)], SEQUENCE_END_SENTINEL);
    }

    #[test]
    fn double_reverse_complement_restores() {
        let mut m = from_fasta(">a\nACGTTGCA\n");
        let q: Vec<u8> = (0..m.seq().len()).map(|i| i as u8).collect();
        m.set_quality_scores(q, 1);
        let pssm: Vec<i32> = (0..m.seq().len() * SCORE_MATRIX_ROW_SIZE)
            .map(|i| i as i32)
            .collect();
        m.set_pssm(pssm);

        let seq0 = m.seq().to_vec();
        let qual0 = m.quality_scores().to_vec();
        let pssm0 = m.pssm().to_vec();
        let strand0 = m.strand(0);

        m.reverse_complement_one_sequence(0);
        assert_ne!(m.strand(0), strand0);
        m.reverse_complement_one_sequence(0);

        assert_eq!(m.seq(), &seq0[..]);
        assert_eq!(m.quality_scores(), &qual0[..]);
        assert_eq!(m.pssm(), &pssm0[..]);
        assert_eq!(m.strand(0), strand0);
    }

    #[test]
    fn reverse_complement_maps_symbols() {
        let mut m = from_fasta(">a\nAACG\n");
        m.reverse_complement_one_sequence(0);
        let b = m.seq_beg(0);
        // reverse complement of AACG is CGTT
        assert_eq!(&m.seq()[b..b + 4], &[1, 2, 3, 3]);
    }

    #[test]
    fn duplicate_copies_symbols_and_name() {
        let mut m = from_fasta(">chr1\nACGTA\n");
        m.duplicate_one_sequence(0);
        assert_eq!(m.finished_sequences(), 2);
        assert_eq!(m.seq_name(1), "chr1");
        assert_eq!(m.seq_len(1), 5);
        let (b0, b1) = (m.seq_beg(0), m.seq_beg(1));
        assert_eq!(m.seq()[b0..b0 + 5], m.seq()[b1..b1 + 5]);
    }

    #[test]
    fn files_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("x");
        let base = base.to_str().unwrap();

        let m = from_fasta(">s1\nACGTACGT\n>s2\nGGTT\n");
        m.to_files(base, false, false).unwrap();
        let n = MultiSequence::from_files(base, 2, 0, false, false).unwrap();
        assert_eq!(m.seq(), n.seq());
        assert_eq!(m.ends, n.ends);
        assert_eq!(m.names, n.names);

        // write again and compare bytes
        let base2 = dir.path().join("y");
        let base2 = base2.to_str().unwrap();
        n.to_files(base2, false, false).unwrap();
        for suffix in [".tis", ".ssp", ".sds", ".des"] {
            let a = std::fs::read(format!("{base}{suffix}")).unwrap();
            let b = std::fs::read(format!("{base2}{suffix}")).unwrap();
            assert_eq!(a, b, "mismatch in {suffix}");
        }
    }

    #[test]
    fn four_bit_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("p");
        let base = base.to_str().unwrap();
        let m = from_fasta(">s\nACGTGCA\n");
        m.to_files(base, true, true).unwrap();
        let n = MultiSequence::from_files(base, 1, 0, true, true).unwrap();
        assert_eq!(m.seq(), n.seq());
    }
}
