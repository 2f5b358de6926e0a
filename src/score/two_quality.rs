//! Quality-aware substitution scores for two quality-carrying sequences.
//!
//! Each base score is generalized by the Phred error probabilities of both
//! letters: with error probability p, the letter is taken to be the stated
//! base with probability 1-p and a background letter otherwise, and the
//! score becomes `scale * ln((1-u)r + u)` with `r` the plain probability
//! ratio and `u` the error odds against the background.

use super::matrix::ScoreMatrix;

pub const NUM_QUAL_CODES: usize = 64;

fn prob_from_phred(q: f64) -> f64 {
    10.0_f64.powf(-0.1 * q)
}

/// One generalized score.  `letter_prob` is the background probability of
/// the sequence-2 letter.
fn generalized_score(score: i32, scale: f64, phred1: f64, phred2: f64, letter_prob: f64) -> i32 {
    let r = (score as f64 / scale).exp();
    let mut p = 1.0 - (1.0 - prob_from_phred(phred1)) * (1.0 - prob_from_phred(phred2));
    if p >= 1.0 {
        p = 0.999999; // numerical guard
    }
    let other = 1.0 - letter_prob;
    debug_assert!(other > 0.0);
    let u = p / other;
    let x = (1.0 - u) * r + u;
    debug_assert!(x > 0.0);
    (scale * x.ln()).round() as i32
}

/// Precomputed scores indexed by (letter1, letter2, qual1, qual2).
pub struct TwoQualityScoreMatrix {
    scores: Vec<i32>,
    alphabet_size: usize,
}

impl TwoQualityScoreMatrix {
    /// `scale` relates integer scores to log probability ratios
    /// (score = scale * ln ratio).
    pub fn new(sm: &ScoreMatrix, scale: f64) -> Self {
        let n = sm.alphabet_size();
        let probs2 = sm.letter_probs2(1.0 / scale);
        let mut scores = vec![0i32; n * n * NUM_QUAL_CODES * NUM_QUAL_CODES];
        for a in 0..n {
            for b in 0..n {
                let s = sm.score(a as u8, b as u8);
                for q1 in 0..NUM_QUAL_CODES {
                    for q2 in 0..NUM_QUAL_CODES {
                        let idx = ((a * n + b) * NUM_QUAL_CODES + q1) * NUM_QUAL_CODES + q2;
                        scores[idx] =
                            generalized_score(s, scale, q1 as f64, q2 as f64, probs2[b]);
                    }
                }
            }
        }
        TwoQualityScoreMatrix {
            scores,
            alphabet_size: n,
        }
    }

    #[inline(always)]
    pub fn score(&self, a: u8, b: u8, qual1: u8, qual2: u8) -> i32 {
        let n = self.alphabet_size;
        let (a, b) = (a as usize, b as usize);
        if a >= n || b >= n {
            return crate::score::NEG_INF / 2;
        }
        let q1 = (qual1 as usize).min(NUM_QUAL_CODES - 1);
        let q2 = (qual2 as usize).min(NUM_QUAL_CODES - 1);
        self.scores[((a * n + b) * NUM_QUAL_CODES + q1) * NUM_QUAL_CODES + q2]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn high_quality_recovers_plain_scores() {
        let sm = ScoreMatrix::from_match_mismatch(6, -18, 4);
        let tq = TwoQualityScoreMatrix::new(&sm, 5.0);
        // at the top quality code the error probability is tiny
        let s = tq.score(0, 0, 63, 63);
        assert!((s - 6).abs() <= 1, "got {s}");
    }

    #[test]
    fn low_quality_flattens_scores() {
        let sm = ScoreMatrix::from_match_mismatch(6, -18, 4);
        let tq = TwoQualityScoreMatrix::new(&sm, 5.0);
        let match_lo = tq.score(0, 0, 2, 2);
        let mismatch_lo = tq.score(0, 3, 2, 2);
        // noisy bases pull both toward the background score
        assert!(match_lo < 6);
        assert!(mismatch_lo > -18);
    }
}
