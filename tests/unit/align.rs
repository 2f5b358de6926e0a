//! End-to-end seed extension scenarios.

use salto::align::{translate_3frame, Aligners, Alignment, AlignmentExtras, ExtensionParams, SegmentPair};
use salto::score::gap_costs::dna_to_aa;
use salto::score::{GapCosts, ScoreMatrix, NEG_INF};

fn run(
    seq1: &[u8],
    seq2: &[u8],
    seed: SegmentPair,
    params: &ExtensionParams,
) -> (Alignment, AlignmentExtras) {
    let mut aligners = Aligners::new();
    let mut extras = AlignmentExtras::default();
    let mut aln = Alignment::from_seed(seed);
    aln.make_xdrop(&mut aligners, seq1, seq2, params, &mut extras);
    (aln, extras)
}

#[test]
fn exact_seed_no_gap() {
    // seq1 = seq2 = ACGT, seed (0,0,4): one block, score 4
    let sm = ScoreMatrix::from_match_mismatch(1, -1, 4);
    let gap = GapCosts::affine(11, 1);
    let params = ExtensionParams::simple(&sm, &gap, 10);
    let seq1 = [4u8, 0, 1, 2, 3, 4];
    let seq2 = [4u8, 0, 1, 2, 3, 4];
    let (aln, _) = run(&seq1, &seq2, SegmentPair::with_score(1, 1, 4, 4), &params);
    assert_eq!(aln.score, 4);
    assert_eq!(aln.blocks.len(), 1);
    assert_eq!(
        (aln.blocks[0].start1, aln.blocks[0].start2, aln.blocks[0].size),
        (1, 1, 4)
    );
    assert!(aln.is_optimal(&seq1, &seq2, &params));
}

#[test]
fn affine_deletion() {
    // seq1 = ACGTACGT, seq2 = ACGTCGT, affine(1,1): blocks {0,0,4},{5,4,3},
    // score 7 - (1+1) = 5 (coordinates here are shifted by the 1-byte pad)
    let sm = ScoreMatrix::from_match_mismatch(1, -1, 4);
    let gap = GapCosts::affine(1, 1);
    let params = ExtensionParams::simple(&sm, &gap, 10);
    let seq1 = [4u8, 0, 1, 2, 3, 0, 1, 2, 3, 4];
    let seq2 = [4u8, 0, 1, 2, 3, 1, 2, 3, 4];
    let (aln, _) = run(&seq1, &seq2, SegmentPair::with_score(1, 1, 4, 4), &params);
    assert_eq!(aln.score, 5);
    assert_eq!(aln.blocks.len(), 2);
    assert_eq!(aln.blocks[0], SegmentPair::new(1, 1, 4));
    assert_eq!(aln.blocks[1], SegmentPair::new(6, 5, 3));
    assert!(aln.is_optimal(&seq1, &seq2, &params));
}

#[test]
fn blocks_are_ordered_and_merged() {
    let sm = ScoreMatrix::from_match_mismatch(1, -1, 4);
    let gap = GapCosts::affine(1, 1);
    let params = ExtensionParams::simple(&sm, &gap, 10);
    let seq1 = [4u8, 0, 1, 2, 3, 0, 1, 2, 3, 4];
    let seq2 = [4u8, 0, 1, 2, 3, 1, 2, 3, 4];
    let (aln, _) = run(&seq1, &seq2, SegmentPair::with_score(1, 1, 4, 4), &params);
    for w in aln.blocks.windows(2) {
        assert!(w[0].start1 < w[1].start1);
        assert!(w[0].end1() <= w[1].beg1());
        assert!(w[0].end2() <= w[1].beg2());
        // touching blocks must have been merged
        assert!(!(w[0].end1() == w[1].beg1() && w[0].end2() == w[1].beg2()));
    }
}

#[test]
fn frameshift_translated_extension() {
    // protein MKT vs DNA ATGAAGACG: one block of 3 codons, in frame,
    // no frameshift penalty
    const M: u8 = 0;
    const K: u8 = 1;
    const T: u8 = 2;
    let code = |a: u8, b: u8, c: u8| -> u8 {
        match (a, b, c) {
            (0, 3, 2) => M, // ATG
            (0, 0, 2) => K, // AAG
            (0, 1, 2) => T, // ACG
            _ => 19,
        }
    };
    let dna = [0u8, 3, 2, 0, 0, 2, 0, 1, 2]; // ATGAAGACG
    let (trans, frame_size) = translate_3frame(&dna, &code, 20);

    let protein = [20u8, M, K, T, 20]; // padded
    let sm = ScoreMatrix::from_match_mismatch(2, -1, 20);
    let gap = GapCosts::affine(11, 1).with_frameshift(15, false);
    let mut params = ExtensionParams::simple(&sm, &gap, 20);
    params.frame_size = frame_size;

    // zero-length seed at protein index 1 (after the pad), DNA index 0
    let seed = SegmentPair::new(1, dna_to_aa(0, frame_size), 0);
    let (aln, _) = run(&protein, &trans, seed, &params);
    assert!(aln.score > NEG_INF);
    assert_eq!(aln.score, 6); // 3 matches * 2, no frameshift cost
    assert_eq!(aln.blocks.len(), 1);
    assert_eq!(
        (aln.blocks[0].start1, aln.blocks[0].start2, aln.blocks[0].size),
        (1, dna_to_aa(0, frame_size), 3)
    );
}

#[test]
fn zero_seed_no_merge_rejected() {
    let sm = ScoreMatrix::from_match_mismatch(1, -1, 4);
    let gap = GapCosts::affine(11, 1);
    let params = ExtensionParams::simple(&sm, &gap, 2);
    let seq1 = [4u8, 0, 0, 0, 4];
    let seq2 = [4u8, 3, 3, 3, 4];
    let (aln, _) = run(&seq1, &seq2, SegmentPair::new(2, 2, 0), &params);
    assert_eq!(aln.score, NEG_INF);
    assert_eq!(aln.blocks[0].score, -1);
}

#[test]
fn makexdrop_results_are_optimal() {
    // every assembled alignment with a finite score passes the replay check
    let sm = ScoreMatrix::from_match_mismatch(2, -3, 4);
    let gap = GapCosts::affine(5, 1);
    let params = ExtensionParams::simple(&sm, &gap, 12);
    let seq1 = [4u8, 0, 1, 2, 3, 3, 2, 1, 0, 2, 2, 4];
    let seq2 = [4u8, 0, 1, 2, 3, 2, 1, 0, 2, 2, 4];
    for seed_pos in 1..4 {
        let seed = SegmentPair::with_score(seed_pos, seed_pos, 2, 4);
        let (aln, _) = run(&seq1, &seq2, seed, &params);
        if aln.score > NEG_INF {
            assert!(
                aln.is_optimal(&seq1, &seq2, &params),
                "seed at {seed_pos} gave a non-optimal alignment"
            );
        }
    }
}

#[test]
fn probabilistic_pass_full_score_exceeds_max_score() {
    let sm = ScoreMatrix::from_match_mismatch(1, -1, 4);
    let gap = GapCosts::affine(11, 1);
    let probs = sm.to_prob_ratios(1.0);
    let mut params = ExtensionParams::simple(&sm, &gap, 10);
    params.output_type = 4;
    params.prob_ratios = Some(&probs);
    params.scale = 1.0;
    let seq1 = [4u8, 0, 1, 2, 3, 4];
    let seq2 = [4u8, 0, 1, 2, 3, 4];
    let (aln, extras) = run(&seq1, &seq2, SegmentPair::with_score(2, 2, 2, 2), &params);
    // full score sums all paths, so it can't be below the best path score
    assert!(extras.full_score >= aln.score as f64 - 1e-9);
    let columns: usize = aln.blocks.iter().map(|b| b.size).sum();
    assert_eq!(extras.column_ambiguity_codes.len(), columns);
}
