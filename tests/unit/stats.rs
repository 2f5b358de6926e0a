//! E-value glue as the aligner consumes it.

use salto::score::ScoreMatrix;
use salto::stats::Evaluer;

fn good_evaluer() -> Evaluer {
    let sm = ScoreMatrix::from_match_mismatch(1, -1, 4);
    let p = vec![0.25; 4];
    let mut e = Evaluer::new();
    e.init(&sm, &p, &p).unwrap();
    e
}

#[test]
fn bad_state_until_init() {
    let e = Evaluer::new();
    assert!(!e.is_good());
}

#[test]
fn min_score_is_monotone_in_evalue() {
    let mut e = good_evaluer();
    e.set_search_space(1e7, 1e6, 1e5, 1e4, 2.0);
    let area = e.area(25.0, 1e4);
    let strict = e.min_score(1e-6, area);
    let loose = e.min_score(10.0, area);
    assert!(strict > loose);
    assert!(loose >= 0.0);
}

#[test]
fn min_score_floor_is_zero() {
    let mut e = good_evaluer();
    e.set_search_space(100.0, 100.0, 10.0, 10.0, 1.0);
    // an absurdly permissive E-value cannot push the cutoff negative
    let s = e.min_score(1e12, e.area(5.0, 10.0));
    assert_eq!(s, 0.0);
}

#[test]
fn evalue_per_area_scales_with_area() {
    let mut e = good_evaluer();
    e.set_search_space(1e6, 1e6, 1e4, 1e4, 1.0);
    let per_area = e.evalue_per_area(30.0);
    let area = e.area(30.0, 1e4);
    let evalue = per_area * area;
    assert!(evalue > 0.0 && evalue.is_finite());
    // a bigger search space means a bigger E-value at the same score
    e.set_search_space(2e6, 1e6, 1e4, 1e4, 1.0);
    let area2 = e.area(30.0, 1e4);
    assert!(area2 > area);
}
