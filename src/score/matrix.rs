//! Substitution matrix over the 64-symbol row space.

use super::NEG_INF;

/// Number of entries per score-matrix row.  Sequence symbols, PSSM rows and
/// the split aligner's quality-aware matrix all share this row size.
pub const SCORE_MATRIX_ROW_SIZE: usize = 64;

/// Complement of an alphabet index for the ACGT encoding (A=0, C=1, G=2,
/// T=3).  The sentinel and everything above it map to themselves.
pub const COMPLEMENT_INDEX: [u8; SCORE_MATRIX_ROW_SIZE] = {
    let mut t = [0u8; SCORE_MATRIX_ROW_SIZE];
    let mut i = 0;
    while i < SCORE_MATRIX_ROW_SIZE {
        t[i] = match i {
            0 => 3,
            1 => 2,
            2 => 1,
            3 => 0,
            _ => i as u8,
        };
        i += 1;
    }
    t
};

/// A square substitution matrix with `SCORE_MATRIX_ROW_SIZE` rows.
///
/// Rows are indexed by a sequence-1 symbol, columns by a sequence-2 symbol.
/// Symbols at or beyond the alphabet size (sentinels, pad bytes) score
/// `NEG_INF / 2` so that no alignment path can cross a sequence boundary.
#[derive(Clone)]
pub struct ScoreMatrix {
    scores: Vec<[i32; SCORE_MATRIX_ROW_SIZE]>,
    alphabet_size: usize,
}

impl ScoreMatrix {
    /// Matrix with `match_score` on the diagonal and `mismatch_score`
    /// elsewhere, over the first `alphabet_size` symbols.
    pub fn from_match_mismatch(match_score: i32, mismatch_score: i32, alphabet_size: usize) -> Self {
        assert!(alphabet_size <= SCORE_MATRIX_ROW_SIZE);
        let mut scores = vec![[NEG_INF / 2; SCORE_MATRIX_ROW_SIZE]; SCORE_MATRIX_ROW_SIZE];
        for (i, row) in scores.iter_mut().enumerate().take(alphabet_size) {
            for (j, cell) in row.iter_mut().enumerate().take(alphabet_size) {
                *cell = if i == j { match_score } else { mismatch_score };
            }
        }
        ScoreMatrix {
            scores,
            alphabet_size,
        }
    }

    /// Matrix from explicit per-pair scores over the first
    /// `alphabet_size` symbols.
    pub fn from_rows(rows: &[Vec<i32>]) -> Self {
        let alphabet_size = rows.len();
        assert!(alphabet_size <= SCORE_MATRIX_ROW_SIZE);
        let mut scores = vec![[NEG_INF / 2; SCORE_MATRIX_ROW_SIZE]; SCORE_MATRIX_ROW_SIZE];
        for (i, row) in rows.iter().enumerate() {
            assert_eq!(row.len(), alphabet_size);
            for (j, &s) in row.iter().enumerate() {
                scores[i][j] = s;
            }
        }
        ScoreMatrix {
            scores,
            alphabet_size,
        }
    }

    pub fn alphabet_size(&self) -> usize {
        self.alphabet_size
    }

    #[inline(always)]
    pub fn score(&self, a: u8, b: u8) -> i32 {
        self.scores[a as usize][b as usize]
    }

    /// Row view, for PSSM-style iteration.
    #[inline(always)]
    pub fn row(&self, a: u8) -> &[i32; SCORE_MATRIX_ROW_SIZE] {
        &self.scores[a as usize]
    }

    /// Highest score over the real alphabet.
    pub fn max_score(&self) -> i32 {
        let mut m = i32::MIN;
        for i in 0..self.alphabet_size {
            for j in 0..self.alphabet_size {
                m = m.max(self.scores[i][j]);
            }
        }
        m
    }

    /// Lowest score over the real alphabet.
    pub fn min_score(&self) -> i32 {
        let mut m = i32::MAX;
        for i in 0..self.alphabet_size {
            for j in 0..self.alphabet_size {
                m = m.min(self.scores[i][j]);
            }
        }
        m
    }

    /// Probability-ratio matrix: `exp(score * lambda)` per cell over the real
    /// alphabet, zero elsewhere.  `lambda` is the scale that makes the
    /// integer scores log probability ratios.
    pub fn to_prob_ratios(&self, lambda: f64) -> Vec<Vec<f64>> {
        let n = self.alphabet_size;
        let mut out = vec![vec![0.0; n]; n];
        for i in 0..n {
            for j in 0..n {
                out[i][j] = (self.scores[i][j] as f64 * lambda).exp();
            }
        }
        out
    }

    /// Per-letter background frequencies of sequence 2, reverse-engineered
    /// from the matrix: solves `sum_i p1[i] * exp(lambda * s[i][j]) = 1` per
    /// column under uniform row abundances, then normalizes.  Used by the
    /// split aligner's quality-generalized scoring and the evaluer.
    pub fn letter_probs2(&self, lambda: f64) -> Vec<f64> {
        let n = self.alphabet_size;
        let ratios = self.to_prob_ratios(lambda);
        // joint probabilities are proportional to the ratios under uniform
        // letter abundances; marginalize over rows
        let mut probs = vec![0.0; n];
        let mut total = 0.0;
        for j in 0..n {
            for row in ratios.iter() {
                probs[j] += row[j];
            }
            total += probs[j];
        }
        if total > 0.0 {
            for p in probs.iter_mut() {
                *p /= total;
            }
        }
        probs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::score::SEQUENCE_END_SENTINEL;

    #[test]
    fn match_mismatch_matrix() {
        let m = ScoreMatrix::from_match_mismatch(1, -1, 4);
        assert_eq!(m.score(0, 0), 1);
        assert_eq!(m.score(0, 3), -1);
        assert_eq!(m.max_score(), 1);
        assert_eq!(m.min_score(), -1);
    }

    #[test]
    fn sentinel_rows_are_impassable() {
        let m = ScoreMatrix::from_match_mismatch(1, -1, 4);
        assert!(m.score(SEQUENCE_END_SENTINEL, 0) < NEG_INF / 4);
        assert!(m.score(0, SEQUENCE_END_SENTINEL) < NEG_INF / 4);
    }

    #[test]
    fn complement_is_involution() {
        for i in 0..SCORE_MATRIX_ROW_SIZE {
            let c = COMPLEMENT_INDEX[i] as usize;
            assert_eq!(COMPLEMENT_INDEX[c] as usize, i);
        }
    }

    #[test]
    fn letter_probs_sum_to_one() {
        let m = ScoreMatrix::from_match_mismatch(1, -1, 4);
        let p = m.letter_probs2(1.0);
        let sum: f64 = p.iter().sum();
        assert!((sum - 1.0).abs() < 1e-9);
    }
}
