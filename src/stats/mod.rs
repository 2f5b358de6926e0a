//! Alignment statistics: E-values per area, bit scores, score cutoffs.

pub mod karlin;

use crate::error::SaltoError;
use crate::score::ScoreMatrix;
use karlin::{estimate_gumbel, GumbelParams};

/// E-value calculator for pairwise local alignment.
///
/// Starts in the "bad" state; `init` may move it to "good" or fail with a
/// statistical error.  In the bad state only `is_good` is meaningful.
#[derive(Default)]
pub struct Evaluer {
    params: Option<GumbelParams>,
    database_max_seq_len: f64,
    database_len_multiplier: f64,
    query_max_seq_len: f64,
    area_multiplier: f64,
}

impl Evaluer {
    pub fn new() -> Self {
        Evaluer::default()
    }

    /// Set up for a scoring system.  `letter_probs1` / `letter_probs2` are
    /// background frequencies of the two sequences' letters.
    pub fn init(
        &mut self,
        score_matrix: &ScoreMatrix,
        letter_probs1: &[f64],
        letter_probs2: &[f64],
    ) -> Result<(), SaltoError> {
        self.params = None;
        let g = estimate_gumbel(score_matrix, letter_probs1, letter_probs2)?;
        self.params = Some(g);
        Ok(())
    }

    pub fn is_good(&self) -> bool {
        self.params.is_some()
    }

    /// The scale factor lambda of the scoring system.
    pub fn lambda(&self) -> f64 {
        self.good().lambda
    }

    fn good(&self) -> &GumbelParams {
        self.params
            .as_ref()
            .expect("evaluer used in the bad state")
    }

    /// Precompute the search-space multipliers.  `num_of_strands` is 1 or 2.
    pub fn set_search_space(
        &mut self,
        database_tot_seq_length: f64,
        database_max_seq_length: f64,
        query_tot_seq_length: f64,
        query_max_seq_length: f64,
        num_of_strands: f64,
    ) {
        if database_max_seq_length > 0.0 {
            self.database_max_seq_len = database_max_seq_length;
            self.area_multiplier =
                database_tot_seq_length / database_max_seq_length * num_of_strands;
        } else {
            self.database_max_seq_len = 1.0;
            self.area_multiplier = 0.0;
        }
        self.database_len_multiplier = self.area_multiplier;
        self.query_max_seq_len = query_max_seq_length;
        if query_max_seq_length > 0.0 {
            self.area_multiplier *= query_tot_seq_length / query_max_seq_length;
        }
    }

    /// Expected number of alignments with at least this score, per unit of
    /// alignment area.
    pub fn evalue_per_area(&self, score: f64) -> f64 {
        let g = self.good();
        g.k * (-g.lambda * score).exp()
    }

    pub fn bit_score(&self, score: f64) -> f64 {
        let g = self.good();
        (g.lambda * score - g.k.ln()) / std::f64::consts::LN_2
    }

    /// Effective alignment area for a score and query length, with the
    /// finite-length correction and the search-space multiplier applied.
    pub fn area(&self, score: f64, query_length: f64) -> f64 {
        let q = if self.query_max_seq_len > 0.0 {
            self.query_max_seq_len
        } else {
            query_length
        };
        self.area_multiplier * self.raw_area(score, q, self.database_max_seq_len)
    }

    /// Area for one query sequence against one database sequence: the
    /// product of the lengths, each shortened by the expected length of an
    /// alignment with this score.
    fn raw_area(&self, score: f64, query_len: f64, db_len: f64) -> f64 {
        let g = self.good();
        // expected alignment length at this score, iterated once as in the
        // classic edge-effect correction
        let mut ell = 0.0;
        for _ in 0..2 {
            let m = (query_len - ell).max(1.0);
            let n = (db_len - ell).max(1.0);
            let x = (g.k * m * n).max(std::f64::consts::E);
            ell = x.ln() / g.h;
        }
        (query_len - ell).max(1.0) * (db_len - ell).max(1.0)
    }

    /// max(0, minimum score whose `evalue_per_area * area <= evalue`).
    pub fn min_score(&self, evalue: f64, area: f64) -> f64 {
        let g = self.good();
        if evalue <= 0.0 || area <= 0.0 {
            return 0.0;
        }
        let s = ((g.k * area / evalue).ln() / g.lambda).ceil();
        s.max(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn good_evaluer() -> Evaluer {
        let sm = ScoreMatrix::from_match_mismatch(1, -1, 4);
        let p = vec![0.25; 4];
        let mut e = Evaluer::new();
        e.init(&sm, &p, &p).unwrap();
        e
    }

    #[test]
    fn starts_bad() {
        let e = Evaluer::new();
        assert!(!e.is_good());
    }

    #[test]
    fn init_failure_stays_bad() {
        let sm = ScoreMatrix::from_match_mismatch(5, -1, 4);
        let p = vec![0.25; 4];
        let mut e = Evaluer::new();
        assert!(e.init(&sm, &p, &p).is_err());
        assert!(!e.is_good());
    }

    #[test]
    fn evalue_decreases_with_score() {
        let e = good_evaluer();
        assert!(e.evalue_per_area(10.0) > e.evalue_per_area(20.0));
        assert!(e.bit_score(20.0) > e.bit_score(10.0));
    }

    #[test]
    fn min_score_inverts_evalue() {
        let mut e = good_evaluer();
        e.set_search_space(1e6, 1e6, 1e4, 1e4, 2.0);
        let area = e.area(30.0, 1e4);
        assert!(area > 0.0);
        let s = e.min_score(1e-3, area);
        assert!(s > 0.0);
        // at the cutoff, the E-value is at or below the target
        assert!(e.evalue_per_area(s) * area <= 1e-3 * (1.0 + 1e-9));
    }

    #[test]
    fn area_multiplier_counts_strands() {
        let mut e = good_evaluer();
        e.set_search_space(1000.0, 1000.0, 100.0, 100.0, 1.0);
        let a1 = e.area(15.0, 100.0);
        e.set_search_space(1000.0, 1000.0, 100.0, 100.0, 2.0);
        let a2 = e.area(15.0, 100.0);
        assert!((a2 / a1 - 2.0).abs() < 1e-9);
    }

    #[test]
    fn zero_database_gives_zero_area() {
        let mut e = good_evaluer();
        e.set_search_space(0.0, 0.0, 100.0, 100.0, 1.0);
        assert_eq!(e.area(15.0, 100.0), 0.0);
        assert_eq!(e.min_score(10.0, 0.0), 0.0);
    }
}
