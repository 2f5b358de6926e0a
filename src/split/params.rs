//! Read-only parameter bundle for split alignment.
//!
//! Built once per run and shared by reference across worker threads: gap,
//! jump and restart scores with their probability forms, the
//! quality-generalized substitution matrix, the log-normal intron model
//! with its score and probability tables, the splice-signal tables for
//! both orientations, and the loaded genome.

use std::io::Write;

use anyhow::Result;

use crate::genome::Genome;
use crate::score::{ScoreMatrix, COMPLEMENT_INDEX};
use crate::sequence::DNA_DECODE;

pub const NUM_QUAL_CODES: usize = 64;

/// Number of splice-signal codes: 16 dinucleotides plus one for non-ACGT.
pub const NUM_SIGNAL_CODES: usize = 17;

/// `exp(score / scale)` by repeated squaring of the base.
#[derive(Debug, Clone, Copy)]
pub struct ScaledExp {
    base: f64,
}

impl ScaledExp {
    pub fn new(scale: f64) -> Self {
        ScaledExp {
            base: (1.0 / scale).exp(),
        }
    }

    #[inline(always)]
    pub fn eval(&self, score: i32) -> f64 {
        self.base.powi(score)
    }
}

fn prob_from_phred(s: f64) -> f64 {
    10.0_f64.powf(-0.1 * s)
}

/// Substitution score generalized by one Phred quality on the query side.
fn generalized_score(score: i32, scale: f64, phred_score: f64, letter_prob: f64) -> i32 {
    let r = (score as f64 / scale).exp();
    let mut p = prob_from_phred(phred_score);
    if p >= 1.0 {
        p = 0.999999; // numerical guard
    }
    let other_prob = 1.0 - letter_prob;
    debug_assert!(other_prob > 0.0);
    let u = p / other_prob;
    let x = (1.0 - u) * r + u;
    debug_assert!(x > 0.0);
    (scale * x.ln() + 0.5).floor() as i32
}

fn matrix_lookup(
    matrix: &[Vec<i32>],
    row_names: &str,
    col_names: &str,
    x: char,
    y: char,
) -> i32 {
    let min = matrix
        .iter()
        .flat_map(|r| r.iter().copied())
        .min()
        .unwrap_or(0);
    match (row_names.find(x), col_names.find(y)) {
        (Some(r), Some(c)) => matrix[r][c],
        _ => min,
    }
}

fn complemented_matrix_index(i: usize) -> usize {
    const IUPAC: &[u8] = b"ACGTRYKMBDHVacgtrykmbdhv";
    let c = (i + 64) as u8;
    if IUPAC.contains(&c) {
        (bio::alphabets::dna::complement(c) - 64) as usize
    } else {
        i
    }
}

/// Immutable split-alignment configuration.
pub struct SplitAlignerParams {
    /// Flat `[2][64][64][NUM_QUAL_CODES]` quality-aware scores, indexed by
    /// strand flip, reference char % 64, query char % 64, quality code.
    substitution_matrix: Vec<i32>,
    pub del_open_score: i32,
    pub del_grow_score: i32,
    pub ins_open_score: i32,
    pub ins_grow_score: i32,
    pub jump_score: i32,
    pub restart_score: i32,
    pub scale: f64,
    pub quality_offset: i32,
    pub jump_prob: f64,
    pub restart_prob: f64,
    scaled_exp: ScaledExp,
    pub max_match_score: i32,

    pub splice_prior: f64,
    pub mean_log_dist: f64,
    pub sdev_log_dist: f64,
    splice_term1: f64,
    splice_term2: f64,
    pub max_splice_score: i32,
    pub max_splice_dist: u32,
    splice_score_table: Vec<i32>,
    splice_prob_table: Vec<f64>,

    /// Signal tables, forward orientation in `[0..17]`, reverse in
    /// `[17..34]`.
    pub splice_beg_scores: [i32; NUM_SIGNAL_CODES * 2],
    pub splice_end_scores: [i32; NUM_SIGNAL_CODES * 2],
    pub splice_beg_probs: [f64; NUM_SIGNAL_CODES * 2],
    pub splice_end_probs: [f64; NUM_SIGNAL_CODES * 2],
    pub max_splice_beg_end_score: i32,

    genome: Genome,
}

impl Default for SplitAlignerParams {
    fn default() -> Self {
        SplitAlignerParams {
            substitution_matrix: Vec::new(),
            del_open_score: 0,
            del_grow_score: 0,
            ins_open_score: 0,
            ins_grow_score: 0,
            jump_score: 0,
            restart_score: 0,
            scale: 1.0,
            quality_offset: 0,
            jump_prob: 0.0,
            restart_prob: 0.0,
            scaled_exp: ScaledExp::new(1.0),
            max_match_score: 0,
            splice_prior: 0.0,
            mean_log_dist: 0.0,
            sdev_log_dist: 0.0,
            splice_term1: 0.0,
            splice_term2: 0.0,
            max_splice_score: 0,
            max_splice_dist: 0,
            splice_score_table: Vec::new(),
            splice_prob_table: Vec::new(),
            splice_beg_scores: [0; NUM_SIGNAL_CODES * 2],
            splice_end_scores: [0; NUM_SIGNAL_CODES * 2],
            splice_beg_probs: [0.0; NUM_SIGNAL_CODES * 2],
            splice_end_probs: [0.0; NUM_SIGNAL_CODES * 2],
            max_splice_beg_end_score: 0,
            genome: Genome::default(),
        }
    }
}

impl SplitAlignerParams {
    /// Gap, jump and restart scores (all non-positive), the probability
    /// scale, and the quality encoding offset.
    #[allow(clippy::too_many_arguments)]
    pub fn set_params(
        &mut self,
        del_open_score: i32,
        del_grow_score: i32,
        ins_open_score: i32,
        ins_grow_score: i32,
        jump_score: i32,
        restart_score: i32,
        scale: f64,
        quality_offset: i32,
    ) {
        self.del_open_score = del_open_score;
        self.del_grow_score = del_grow_score;
        self.ins_open_score = ins_open_score;
        self.ins_grow_score = ins_grow_score;
        self.jump_score = jump_score;
        self.restart_score = restart_score;
        self.scale = scale;
        self.scaled_exp = ScaledExp::new(scale);
        self.quality_offset = quality_offset;
        self.jump_prob = self.scaled_exp.eval(jump_score);
        self.restart_prob = self.scaled_exp.eval(restart_score);
    }

    pub fn scaled_exp(&self, score: i32) -> f64 {
        self.scaled_exp.eval(score)
    }

    pub fn is_spliced(&self) -> bool {
        self.jump_prob > 0.0 || self.splice_prior > 0.0
    }

    pub fn is_splice_coords(&self) -> bool {
        self.is_spliced()
    }

    pub fn is_genome(&self) -> bool {
        !self.genome.is_empty()
    }

    /// Log-normal intron length model.  Must follow `set_params`.
    pub fn set_splice_params(
        &mut self,
        splice_prior: f64,
        mean_log_dist: f64,
        sdev_log_dist: f64,
    ) {
        self.splice_prior = splice_prior;
        self.mean_log_dist = mean_log_dist;
        self.sdev_log_dist = sdev_log_dist;

        if splice_prior <= 0.0 {
            return;
        }

        let root_two_pi = (2.0 * std::f64::consts::PI).sqrt();
        let s2 = sdev_log_dist * sdev_log_dist;
        self.splice_term1 = -(sdev_log_dist * root_two_pi / splice_prior).ln();
        self.splice_term2 = -0.5 / s2;

        let max1 = self.splice_term1 - mean_log_dist + s2 * 0.5;
        let max2 = (self.scale * max1 + 0.5).floor() as i32;
        self.max_splice_score = max2.max(self.jump_score);

        // ignore splices whose score would fall below the jump score, by
        // solving the quadratic in ln(distance)
        let r = s2 + 2.0 * (self.splice_term1 - mean_log_dist - self.jump_score as f64 / self.scale);
        if r < 0.0 {
            self.max_splice_dist = 0;
        } else {
            let log_mode = mean_log_dist - s2; // ln(mode of the log-normal)
            let max_log_dist = log_mode + sdev_log_dist * r.sqrt();
            let max_dist = max_log_dist.exp();
            self.max_splice_dist = if max_dist < u32::MAX as f64 {
                max_dist.floor() as u32
            } else {
                u32::MAX
            };
        }

        let table_size = (256 * 256 * 64).min(self.max_splice_dist as usize);
        self.splice_score_table = vec![0; table_size];
        self.splice_prob_table = vec![0.0; table_size];
        for i in 1..table_size {
            let s = self.calc_splice_score(i as f64);
            self.splice_score_table[i] = s;
            self.splice_prob_table[i] = self.scaled_exp.eval(s);
        }
    }

    /// The score for a cis-splice with the given distance (intron length).
    pub fn calc_splice_score(&self, dist: f64) -> i32 {
        let log_dist = dist.ln();
        let d = log_dist - self.mean_log_dist;
        let s = self.splice_term1 + self.splice_term2 * d * d - log_dist;
        (self.scale * s + 0.5).floor() as i32
    }

    #[inline]
    pub fn splice_score(&self, dist: u32) -> i32 {
        let d = dist as usize;
        if d < self.splice_score_table.len() {
            self.splice_score_table[d]
        } else {
            self.calc_splice_score(dist as f64)
        }
    }

    #[inline]
    pub fn splice_prob(&self, dist: u32) -> f64 {
        let d = dist as usize;
        if d < self.splice_prob_table.len() {
            self.splice_prob_table[d]
        } else {
            self.scaled_exp.eval(self.calc_splice_score(dist as f64))
        }
    }

    /// Donor / acceptor dinucleotide tables, normalized so the overall
    /// splice probability matches `splice_prior`.
    pub fn set_splice_signals(&mut self) {
        // Non-GT-AG signals get unnaturally high values, to allow for
        // various kinds of error.
        let d_gt = 0.95;
        let d_gc = 0.02;
        let d_at = 0.004;
        let d_nn = 0.002;

        let a_ag = 0.968;
        let a_ac = 0.004;
        let a_nn = 0.002;

        // assume roughly equal 1/16 dinucleotide abundances
        let d_avg = (d_gt + d_gc + d_at + d_nn * 13.0) / 16.0;
        let a_avg = (a_ag + a_ac + a_nn * 14.0) / 16.0;

        let score_from = |prob: f64| -> i32 { (self.scale * prob.ln() + 0.5).floor() as i32 };

        for i in 0..NUM_SIGNAL_CODES * 2 {
            self.splice_beg_scores[i] = score_from(d_nn / d_avg);
            self.splice_end_scores[i] = score_from(a_nn / a_avg);
        }

        self.splice_beg_scores[2 * 4 + 3] = score_from(d_gt / d_avg);
        self.splice_beg_scores[2 * 4 + 1] = score_from(d_gc / d_avg);
        self.splice_beg_scores[3] = score_from(d_at / d_avg); // AT

        self.splice_end_scores[2] = score_from(a_ag / a_avg); // AG
        self.splice_end_scores[1] = score_from(a_ac / a_avg); // AC

        for i in 0..16 {
            let j = 15 - ((i % 4) * 4 + (i / 4)); // reverse-complement
            self.splice_beg_scores[NUM_SIGNAL_CODES + i] = self.splice_end_scores[j];
            self.splice_end_scores[NUM_SIGNAL_CODES + i] = self.splice_beg_scores[j];
        }

        for i in 0..NUM_SIGNAL_CODES * 2 {
            self.splice_beg_probs[i] = self.scaled_exp.eval(self.splice_beg_scores[i]);
            self.splice_end_probs[i] = self.scaled_exp.eval(self.splice_end_scores[i]);
        }

        self.max_splice_beg_end_score = self.splice_beg_scores[..NUM_SIGNAL_CODES]
            .iter()
            .max()
            .unwrap()
            + self.splice_end_scores[..NUM_SIGNAL_CODES].iter().max().unwrap();
    }

    /// Fill the quality-generalized substitution matrix from a letter-named
    /// score matrix.  `is_qry_seq` tells whether reverse-strand candidates
    /// carry query-side or reference-side letters, which decides whether
    /// the flipped copy complements its indices.
    pub fn set_score_matrix(
        &mut self,
        matrix: &[Vec<i32>],
        row_names: &str,
        col_names: &str,
        is_qry_seq: bool,
    ) {
        const BASES: &str = "ACGT";
        // reverse-engineer ACGT abundances from the score matrix
        let mut rows = Vec::with_capacity(4);
        for x in BASES.chars() {
            let mut row = Vec::with_capacity(4);
            for y in BASES.chars() {
                row.push(matrix_lookup(matrix, row_names, col_names, x, y));
            }
            rows.push(row);
        }
        let base_matrix = ScoreMatrix::from_rows(&rows);
        let p2 = base_matrix.letter_probs2(1.0 / self.scale);

        self.substitution_matrix = vec![0; 2 * 64 * 64 * NUM_QUAL_CODES];
        for i in 64..128usize {
            let x = (i as u8 as char).to_ascii_uppercase();
            for j in 64..128usize {
                let y = (j as u8 as char).to_ascii_uppercase();
                let score = matrix_lookup(matrix, row_names, col_names, x, y);
                let yc = BASES.find(y);
                for q in 0..NUM_QUAL_CODES {
                    let v = match (BASES.find(x), yc) {
                        (Some(_), Some(yc)) => {
                            generalized_score(score, self.scale, q as f64, p2[yc])
                        }
                        _ => score,
                    };
                    self.substitution_matrix
                        [((i % 64) * 64 + j % 64) * NUM_QUAL_CODES + q] = v;
                }
            }
        }

        // flipped-strand copy
        let fwd_copy = self.substitution_matrix[..64 * 64 * NUM_QUAL_CODES].to_vec();
        for i in 0..64 {
            for j in 0..64 {
                let x = if is_qry_seq { i } else { complemented_matrix_index(i) };
                let y = if is_qry_seq { j } else { complemented_matrix_index(j) };
                let src = (x * 64 + y) * NUM_QUAL_CODES;
                let dst = 64 * 64 * NUM_QUAL_CODES + (i * 64 + j) * NUM_QUAL_CODES;
                self.substitution_matrix[dst..dst + NUM_QUAL_CODES]
                    .copy_from_slice(&fwd_copy[src..src + NUM_QUAL_CODES]);
            }
        }

        self.max_match_score = matrix
            .iter()
            .flat_map(|r| r.iter().copied())
            .max()
            .unwrap_or(0);
    }

    /// Match/mismatch convenience form of `set_score_matrix`.
    pub fn set_simple_score_matrix(&mut self, match_score: i32, mismatch_score: i32) {
        let names = "ACGT";
        let rows: Vec<Vec<i32>> = (0..4)
            .map(|i| {
                (0..4)
                    .map(|j| if i == j { match_score } else { mismatch_score })
                    .collect()
            })
            .collect();
        self.set_score_matrix(&rows, names, names, false);
    }

    #[inline(always)]
    pub fn substitution_score(&self, is_flipped: bool, r: u8, q: u8, qual: usize) -> i32 {
        let base = if is_flipped { 64 * 64 * NUM_QUAL_CODES } else { 0 };
        self.substitution_matrix
            [base + ((r as usize % 64) * 64 + q as usize % 64) * NUM_QUAL_CODES + qual]
    }

    /// Minimum alignment scores that the DP-bound extensions must be able
    /// to absorb; `usize::MAX` when jumps and splices are off.
    pub fn dp_extension_min_scores(&self) -> (usize, usize) {
        if self.jump_prob > 0.0 || self.splice_prior > 0.0 {
            let mut max_jump_score = if self.splice_prior > 0.0 {
                self.max_splice_score
            } else {
                self.jump_score
            };
            if self.is_genome() {
                max_jump_score += self.max_splice_beg_end_score;
            }
            assert!(max_jump_score + self.ins_open_score <= 0);
            let min1 = (1 - (max_jump_score + self.ins_open_score)) as usize;
            let min2 = (1 - (max_jump_score + max_jump_score + self.ins_open_score)) as usize;
            (min1, min2)
        } else {
            (usize::MAX, usize::MAX)
        }
    }

    pub fn read_genome(&mut self, base_name: &str) -> Result<()> {
        self.genome = Genome::read(base_name)?;
        Ok(())
    }

    pub fn seq_ends(&self, seq_name: &str) -> Result<(usize, usize, &[u8])> {
        self.genome.seq_ends(seq_name)
    }

    /// The two genome letters just downstream of a splice beginning, as
    /// text honoring the strand sense.
    pub fn splice_beg_signal(
        &self,
        seq_name: &str,
        is_forward_strand: bool,
        is_sense_strand: bool,
        coord: usize,
    ) -> Result<[u8; 2]> {
        let (beg, end, seq) = self.seq_ends(seq_name)?;
        let signal = if is_forward_strand {
            next_signal(seq, beg + coord)
        } else {
            prev_signal(seq, end - coord)
        };
        Ok(decode_splice_signal(signal, is_sense_strand == is_forward_strand))
    }

    /// The two genome letters just upstream of a splice end.
    pub fn splice_end_signal(
        &self,
        seq_name: &str,
        is_forward_strand: bool,
        is_sense_strand: bool,
        coord: usize,
    ) -> Result<[u8; 2]> {
        let (beg, end, seq) = self.seq_ends(seq_name)?;
        let signal = if is_forward_strand {
            prev_signal(seq, beg + coord)
        } else {
            next_signal(seq, end - coord)
        };
        Ok(decode_splice_signal(signal, is_sense_strand == is_forward_strand))
    }

    /// Write the jump / splice configuration as commented MAF header lines.
    pub fn print_commented(&self, out: &mut impl Write) -> std::io::Result<()> {
        if self.jump_prob > 0.0 {
            writeln!(out, "# trans={}", self.jump_score)?;
        }
        if self.splice_prior > 0.0 && self.jump_prob > 0.0 {
            writeln!(out, "# cismax={}", self.max_splice_dist)?;
        }
        if self.is_genome() {
            writeln!(
                out,
                "# GT={} GC={} AT={} NN={}",
                self.splice_beg_scores[2 * 4 + 3],
                self.splice_beg_scores[2 * 4 + 1],
                self.splice_beg_scores[3],
                self.splice_beg_scores[0],
            )?;
            writeln!(
                out,
                "# AG={} AC={} NN={}",
                self.splice_end_scores[2], self.splice_end_scores[1], self.splice_end_scores[0],
            )?;
        }
        Ok(())
    }
}

const SENTINEL: u8 = crate::score::SEQUENCE_END_SENTINEL;

fn next_signal(seq: &[u8], pos: usize) -> [u8; 2] {
    let a = seq.get(pos).copied().unwrap_or(SENTINEL);
    let b = if a == SENTINEL {
        SENTINEL
    } else {
        seq.get(pos + 1).copied().unwrap_or(SENTINEL)
    };
    [a, b]
}

fn prev_signal(seq: &[u8], pos: usize) -> [u8; 2] {
    let b = if pos >= 1 {
        seq[pos - 1]
    } else {
        SENTINEL
    };
    let a = if b == SENTINEL || pos < 2 {
        SENTINEL
    } else {
        seq[pos - 2]
    };
    [a, b]
}

fn decode_one_base(x: u8) -> u8 {
    if x >= 4 {
        b'N'
    } else {
        DNA_DECODE[x as usize]
    }
}

fn decode_splice_signal(signal: [u8; 2], is_same_strand: bool) -> [u8; 2] {
    if is_same_strand {
        [decode_one_base(signal[0]), decode_one_base(signal[1])]
    } else {
        [
            decode_one_base(COMPLEMENT_INDEX[signal[1] as usize]),
            decode_one_base(COMPLEMENT_INDEX[signal[0] as usize]),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn basic_params() -> SplitAlignerParams {
        let mut p = SplitAlignerParams::default();
        p.set_params(-8, -2, -8, -2, -30, -50, 5.0, 0);
        p.set_simple_score_matrix(6, -18);
        p
    }

    #[test]
    fn scaled_exp_matches_formula() {
        let se = ScaledExp::new(5.0);
        assert!((se.eval(-10) - (-2.0f64).exp()).abs() < 1e-12);
        assert!((se.eval(0) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn substitution_scores_respect_strand_complement() {
        let p = basic_params();
        let q = NUM_QUAL_CODES - 1;
        // A:A match scores like T:T on the flipped strand
        let fwd = p.substitution_score(false, b'A', b'A', q);
        let rev = p.substitution_score(true, b'A', b'A', q);
        assert_eq!(fwd, p.substitution_score(false, b'T', b'T', q));
        assert_eq!(fwd, rev);
        // '.' scores the same as 'n'
        assert_eq!(
            p.substitution_score(false, b'A', b'.', q),
            p.substitution_score(false, b'A', b'n', q)
        );
    }

    #[test]
    fn splice_score_is_unimodal_and_bounded() {
        // the jump score must be low enough that some splice distances
        // beat it, else the splice model switches itself off
        let mut p = SplitAlignerParams::default();
        p.set_params(-8, -2, -8, -2, -100, -150, 5.0, 0);
        p.set_simple_score_matrix(6, -18);
        p.set_splice_params(0.01, 7.0, 1.75);
        assert!(p.max_splice_dist > 0);
        let mode = (p.mean_log_dist - p.sdev_log_dist * p.sdev_log_dist).exp() as u32;
        // decreasing past the mode
        let mut prev = p.splice_score(mode.max(2));
        let mut d = mode.max(2) * 2;
        while d < p.max_splice_dist {
            let s = p.splice_score(d);
            assert!(s <= prev);
            prev = s;
            d *= 4;
        }
        // beyond the cutoff the score is below the jump score
        let far = p.max_splice_dist.saturating_add(p.max_splice_dist / 8 + 2);
        assert!(p.calc_splice_score(far as f64) < p.jump_score);
    }

    #[test]
    fn splice_signal_tables_mirror() {
        let mut p = basic_params();
        p.set_splice_params(0.01, 7.0, 1.75);
        p.set_splice_signals();
        // GT is the strongest donor, AG the strongest acceptor
        let gt = p.splice_beg_scores[2 * 4 + 3];
        assert_eq!(gt, *p.splice_beg_scores[..16].iter().max().unwrap());
        let ag = p.splice_end_scores[2];
        assert_eq!(ag, *p.splice_end_scores[..16].iter().max().unwrap());
        // reverse orientation is the reverse-complement of the other table
        for i in 0..16 {
            let j = 15 - ((i % 4) * 4 + (i / 4));
            assert_eq!(p.splice_beg_scores[NUM_SIGNAL_CODES + i], p.splice_end_scores[j]);
        }
        assert_eq!(p.max_splice_beg_end_score, gt + ag);
    }

    #[test]
    fn dp_extension_scores_off_without_jumps() {
        let p = basic_params();
        // jump_prob > 0 because jump_score is finite; rebuild without jumps
        let mut q = SplitAlignerParams::default();
        q.set_params(-8, -2, -8, -2, 0, -50, 5.0, 0);
        q.jump_prob = 0.0;
        assert_eq!(q.dp_extension_min_scores(), (usize::MAX, usize::MAX));
        let (m1, m2) = p.dp_extension_min_scores();
        assert!(m1 < m2);
    }
}
