//! Seed-rooted bidirectional alignment assembly.
//!
//! `Alignment::make_xdrop` drives one gapped extension to each side of a
//! seed block, rebases the emitted chunks into sequence coordinates, merges
//! chunks that touch the seed, and leaves `blocks` in ascending `start1`
//! order with the per-column ambiguity codes (when requested) in matching
//! block-major order.

use crate::score::gap_costs::{aa_to_dna, dna_to_aa, size_and_frameshift};
use crate::score::{
    GapCosts, ScoreMatrix, TwoQualityScoreMatrix, NEG_INF, SCORE_MATRIX_ROW_SIZE,
};

use super::centroid::{Centroid, NUM_TRANSITIONS, OUTPUT_CENTROID, OUTPUT_COUNTS, OUTPUT_LAMA};
use super::frame::{FrameshiftXdropAligner, NUM_FRAME_TRANSITIONS};
use super::segment::{is_next, SegmentPair};

/// The reusable DP engines shared across seeds of one worker.
#[derive(Default)]
pub struct Aligners {
    pub centroid: Centroid,
    pub frame: FrameshiftXdropAligner,
}

impl Aligners {
    pub fn new() -> Self {
        Aligners::default()
    }
}

/// Read-only per-batch extension configuration.
pub struct ExtensionParams<'a> {
    pub score_matrix: &'a ScoreMatrix,
    pub gap: &'a GapCosts,
    pub max_drop: i32,
    pub globality: i32,
    /// 0 for untranslated alignment; otherwise the 3-frame layout size.
    pub frame_size: usize,
    /// Probability-ratio matrix matching the integer scores, if the
    /// probabilistic pass is wanted.
    pub prob_ratios: Option<&'a Vec<Vec<f64>>>,
    /// Lambda: integer score s has probability ratio exp(s * scale).
    pub scale: f64,
    pub is_full_score: bool,
    pub gamma: f64,
    pub output_type: i32,
    pub pssm2: Option<&'a [i32]>,
    pub two_qual: Option<&'a TwoQualityScoreMatrix>,
    pub qual1: Option<&'a [u8]>,
    pub qual2: Option<&'a [u8]>,
}

impl<'a> ExtensionParams<'a> {
    /// Plain max-score extension with no probabilistic extras.
    pub fn simple(score_matrix: &'a ScoreMatrix, gap: &'a GapCosts, max_drop: i32) -> Self {
        ExtensionParams {
            score_matrix,
            gap,
            max_drop,
            globality: 0,
            frame_size: 0,
            prob_ratios: None,
            scale: 1.0,
            is_full_score: false,
            gamma: 1.0,
            output_type: 1,
            pssm2: None,
            two_qual: None,
            qual1: None,
            qual2: None,
        }
    }
}

/// Optional per-alignment outputs.
#[derive(Default, Clone)]
pub struct AlignmentExtras {
    /// One printable byte per aligned column, block-major.
    pub column_ambiguity_codes: Vec<u8>,
    /// Flat `64 * 64` substitution counts followed by transition counts.
    pub expected_counts: Vec<f64>,
    /// Sum-of-paths score when it is kept apart from `score`.
    pub full_score: f64,
}

/// One assembled gapped alignment.
#[derive(Default, Clone)]
pub struct Alignment {
    pub seed: SegmentPair,
    pub blocks: Vec<SegmentPair>,
    pub score: i32,
}

fn add_seed_counts(seq1: &[u8], seq2: &[u8], seed: &SegmentPair, counts: &mut [f64]) {
    for k in 0..seed.size {
        let a = seq1[seed.beg1() + k] as usize;
        let b = seq2[seed.beg2() + k] as usize;
        counts[a * SCORE_MATRIX_ROW_SIZE + b] += 1.0;
    }
    counts[SCORE_MATRIX_ROW_SIZE * SCORE_MATRIX_ROW_SIZE] += seed.size as f64;
}

impl Alignment {
    pub fn from_seed(seed: SegmentPair) -> Self {
        Alignment {
            seed,
            blocks: Vec::new(),
            score: 0,
        }
    }

    /// Build the full bidirectional alignment around `seed`.
    ///
    /// `seq2` is the plain packed sequence, or for translated alignment
    /// (`frame_size > 0`) the 3-frame translated buffer.
    pub fn make_xdrop(
        &mut self,
        aligners: &mut Aligners,
        seq1: &[u8],
        seq2: &[u8],
        params: &ExtensionParams,
        extras: &mut AlignmentExtras,
    ) {
        self.score = self.seed.score;
        if params.output_type > 3 && !params.is_full_score {
            extras.full_score = self.seed.score as f64;
        }
        self.blocks.clear();
        extras.column_ambiguity_codes.clear();

        if params.output_type == OUTPUT_COUNTS {
            let num_of_transitions = if params.frame_size > 0 {
                NUM_FRAME_TRANSITIONS
            } else {
                NUM_TRANSITIONS
            };
            extras.expected_counts.clear();
            extras.expected_counts.resize(
                SCORE_MATRIX_ROW_SIZE * SCORE_MATRIX_ROW_SIZE + num_of_transitions,
                0.0,
            );
            add_seed_counts(seq1, seq2, &self.seed, &mut extras.expected_counts);
        }

        // extend in the left/reverse direction from the seed
        self.extend(
            aligners,
            seq1,
            seq2,
            self.seed.beg1(),
            self.seed.beg2(),
            false,
            params,
            extras,
        );
        if self.score <= NEG_INF {
            return;
        }

        // convert left-extension coordinates to sequence coordinates
        let seed_beg1 = self.seed.beg1();
        let seed_beg2 = aa_to_dna(self.seed.beg2(), params.frame_size);
        for b in self.blocks.iter_mut() {
            let s = b.size;
            b.start1 = seed_beg1 - b.start1 - s;
            // careful: start2 may wrap to the reverse-frame sentinel (-1)
            b.start2 =
                dna_to_aa(seed_beg2.wrapping_sub(b.start2), params.frame_size).wrapping_sub(s);
        }

        let is_merge_seed_rev = self
            .blocks
            .last()
            .map_or(false, |last| is_next(last, &self.seed));
        if is_merge_seed_rev {
            self.blocks.last_mut().unwrap().size += self.seed.size;
        } else {
            self.blocks.push(self.seed);
        }

        if params.output_type > 3 {
            // the core of the alignment is unambiguous by construction
            extras
                .column_ambiguity_codes
                .extend(std::iter::repeat(126).take(self.seed.size));
        }

        let middle = self.blocks.len();
        let codes_mid = extras.column_ambiguity_codes.len();

        // extend in the right/forward direction from the seed
        self.extend(
            aligners,
            seq1,
            seq2,
            self.seed.end1(),
            self.seed.end2(),
            true,
            params,
            extras,
        );
        if self.score <= NEG_INF {
            return;
        }

        let seed_end1 = self.seed.end1();
        let seed_end2 = aa_to_dna(self.seed.end2(), params.frame_size);
        for b in self.blocks[middle..].iter_mut() {
            b.start1 = seed_end1 + b.start1;
            b.start2 = dna_to_aa(seed_end2.wrapping_add(b.start2), params.frame_size);
        }

        let is_merge_seed_fwd = self.blocks.len() > middle
            && is_next(&self.seed, self.blocks.last().unwrap());
        if is_merge_seed_fwd {
            let grown = self.blocks.last().unwrap().size;
            self.blocks[middle - 1].size += grown;
            self.blocks.pop();
        }

        self.blocks[middle..].reverse();
        extras.column_ambiguity_codes[codes_mid..].reverse();

        // right-half chunk scores ride with the following block; align them
        // with their own block
        for i in middle..self.blocks.len() {
            self.blocks[i - 1].score = self.blocks[i].score;
        }

        if self.seed.size == 0 && !is_merge_seed_rev && !is_merge_seed_fwd {
            // unusual, weird case: give up
            self.score = NEG_INF;
            self.blocks[0].score = -1;
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn extend(
        &mut self,
        aligners: &mut Aligners,
        seq1: &[u8],
        seq2: &[u8],
        start1: usize,
        start2: usize,
        is_forward: bool,
        params: &ExtensionParams,
        extras: &mut AlignmentExtras,
    ) {
        let blocks_beg = self.blocks.len();
        let gap = params.gap;

        if params.frame_size > 0 {
            debug_assert!(params.globality == 0);
            debug_assert!(params.pssm2.is_none());
            debug_assert!(params.two_qual.is_none());

            let frame = &mut aligners.frame;
            let dna_start = aa_to_dna(start2, params.frame_size);

            if gap.is_new_frameshifts() {
                debug_assert!(params.is_full_score);
                frame.align_frame(
                    seq1,
                    start1,
                    seq2,
                    dna_start,
                    params.frame_size,
                    is_forward,
                    params.score_matrix,
                    gap,
                    params.max_drop,
                );
                while let Some(c) = frame.get_next_chunk(gap) {
                    self.blocks.push(SegmentPair::with_score(
                        c.end1 - c.size,
                        c.end2.wrapping_sub(c.size * 3),
                        c.size,
                        c.gap_cost,
                    ));
                }
                let Some(probs) = params.prob_ratios else {
                    return;
                };
                let prob_drop_limit = (params.scale * -(params.max_drop as f64)).exp();
                let s = frame.forward(
                    seq1,
                    start1,
                    seq2,
                    dna_start,
                    params.frame_size,
                    is_forward,
                    probs,
                    gap,
                    params.scale,
                    prob_drop_limit,
                );
                self.score += (s / params.scale) as i32;
                if params.output_type < 4 {
                    return;
                }
                frame.backward(
                    seq1,
                    start1,
                    seq2,
                    dna_start,
                    params.frame_size,
                    is_forward,
                    probs,
                    gap,
                    params.scale,
                );
                frame_column_codes(
                    frame,
                    &mut extras.column_ambiguity_codes,
                    &self.blocks[blocks_beg..],
                );
                if params.output_type == OUTPUT_COUNTS {
                    let (subs, tran) = extras
                        .expected_counts
                        .split_at_mut(SCORE_MATRIX_ROW_SIZE * SCORE_MATRIX_ROW_SIZE);
                    frame.count(
                        seq1,
                        start1,
                        seq2,
                        dna_start,
                        params.frame_size,
                        is_forward,
                        probs,
                        gap,
                        params.scale,
                        subs,
                        tran,
                    );
                }
            } else {
                debug_assert!(!params.is_full_score);
                debug_assert!(params.output_type < 4);
                self.score += frame.align3(
                    seq1,
                    start1,
                    seq2,
                    dna_start,
                    params.frame_size,
                    is_forward,
                    params.score_matrix,
                    gap,
                    params.max_drop,
                );
                // this is OK even when end2 < size * 3
                while let Some(c) = frame.get_next_chunk(gap) {
                    self.blocks.push(SegmentPair::new(
                        c.end1 - c.size,
                        c.end2.wrapping_sub(c.size * 3),
                        c.size,
                    ));
                }
            }
            return;
        }

        let aligner = aligners.centroid.aligner_mut();
        let extension_score = if let Some(tq) = params.two_qual {
            aligner.align_2qual(
                seq1,
                params.qual1.expect("two-quality scoring needs qualities"),
                seq2,
                params.qual2.expect("two-quality scoring needs qualities"),
                start1,
                start2,
                is_forward,
                params.globality,
                tq,
                gap,
                params.max_drop,
            )
        } else if let Some(pssm2) = params.pssm2 {
            aligner.align_pssm(
                seq1,
                pssm2,
                start1,
                start2,
                is_forward,
                params.globality,
                gap,
                params.max_drop,
            )
        } else {
            aligner.align(
                seq1,
                seq2,
                start1,
                start2,
                is_forward,
                params.globality,
                params.score_matrix,
                gap,
                params.max_drop,
            )
        };

        if extension_score <= NEG_INF {
            self.score = NEG_INF; // avoid score overflow
            return; // avoid an ill-defined probabilistic alignment
        }

        if params.output_type < 5 || params.output_type > 6 {
            // ordinary max-score chunks
            let aligner = aligners.centroid.aligner_mut();
            while let Some((end1, end2, size)) = aligner.get_next_chunk() {
                self.blocks
                    .push(SegmentPair::new(end1 - size, end2 - size, size));
            }
        }

        let Some(probs) = params.prob_ratios else {
            if !params.is_full_score {
                self.score += extension_score;
            }
            return;
        };
        if !params.is_full_score {
            self.score += extension_score;
        }

        if params.output_type > 3 || params.is_full_score {
            debug_assert!(params.two_qual.is_none());
            let centroid = &mut aligners.centroid;
            let s = centroid.forward(
                seq1,
                seq2,
                start1,
                start2,
                is_forward,
                probs,
                gap,
                params.scale,
                params.globality,
            );
            if params.is_full_score {
                self.score += (s / params.scale) as i32;
            } else {
                extras.full_score += s / params.scale;
            }
            if params.output_type < 4 {
                return;
            }
            centroid.backward(seq1, seq2, start1, start2, is_forward, params.globality);
            if params.output_type == OUTPUT_CENTROID || params.output_type == OUTPUT_LAMA {
                // gamma-centroid / LAMA alignment replaces the max-score blocks
                centroid.dp(params.output_type, params.gamma);
                while let Some((beg1, beg2, length)) = centroid.traceback() {
                    self.blocks.push(SegmentPair::new(beg1, beg2, length));
                }
            }
            centroid_column_codes(
                centroid,
                &mut extras.column_ambiguity_codes,
                &self.blocks[blocks_beg..],
                is_forward,
            );
            if params.output_type == OUTPUT_COUNTS {
                let (subs, tran) = extras
                    .expected_counts
                    .split_at_mut(SCORE_MATRIX_ROW_SIZE * SCORE_MATRIX_ROW_SIZE);
                centroid.add_expected_counts(
                    seq1, seq2, start1, start2, is_forward, subs, tran,
                );
            }
        }
    }

    /// Replay the block scores and verify that no prefix beats the whole
    /// alignment by more than `max_drop`, nor (for local alignment) drops
    /// to zero before the end.
    pub fn is_optimal(&self, seq1: &[u8], seq2: &[u8], params: &ExtensionParams) -> bool {
        let is_local = params.globality == 0;
        let num_of_blocks = self.blocks.len();
        let mut max_score = 0i32;
        let mut score = 0i32;

        for i in 0..num_of_blocks {
            if i > 0 {
                score -= gap_cost_between(
                    &self.blocks[i - 1],
                    &self.blocks[i],
                    params.gap,
                    params.frame_size,
                );
                if (is_local && score <= 0) || score < max_score - params.max_drop {
                    return false;
                }
            }

            let x = self.blocks[i].beg1();
            let y = self.blocks[i].beg2();
            let block_length = self.blocks[i].size;
            let the_end = block_length - usize::from(i + 1 == num_of_blocks);

            for j in 0..block_length {
                score += column_score(seq1, seq2, x + j, y + j, params);
                if score > max_score {
                    max_score = score;
                } else if (is_local && (score <= 0 || j == the_end))
                    || score < max_score - params.max_drop
                {
                    return false;
                }
            }
        }

        true
    }

    /// Does some local segment of the alignment reach `min_score`?
    pub fn has_good_segment(
        &self,
        seq1: &[u8],
        seq2: &[u8],
        min_score: i32,
        params: &ExtensionParams,
    ) -> bool {
        let mut score = 0i32;

        for i in 0..self.blocks.len() {
            if i > 0 {
                score -= gap_cost_between(
                    &self.blocks[i - 1],
                    &self.blocks[i],
                    params.gap,
                    params.frame_size,
                );
                if score < 0 {
                    score = 0;
                }
            }

            let x = self.blocks[i].beg1();
            let y = self.blocks[i].beg2();
            for j in 0..self.blocks[i].size {
                score += column_score(seq1, seq2, x + j, y + j, params);
                if score >= min_score {
                    return true;
                }
                if score < 0 {
                    score = 0;
                }
            }
        }

        false
    }
}

#[inline]
fn column_score(
    seq1: &[u8],
    seq2: &[u8],
    x: usize,
    y: usize,
    params: &ExtensionParams,
) -> i32 {
    if let Some(tq) = params.two_qual {
        let q1 = params.qual1.expect("two-quality scoring needs qualities");
        let q2 = params.qual2.expect("two-quality scoring needs qualities");
        tq.score(seq1[x], seq2[y], q1[x], q2[y])
    } else if let Some(pssm2) = params.pssm2 {
        pssm2[y * SCORE_MATRIX_ROW_SIZE + seq1[x] as usize]
    } else {
        params.score_matrix.score(seq1[x], seq2[y])
    }
}

/// Cost of the gap between consecutive blocks x and y.
fn gap_cost_between(
    x: &SegmentPair,
    y: &SegmentPair,
    gap_costs: &GapCosts,
    frame_size: usize,
) -> i32 {
    if gap_costs.is_new_frameshifts() {
        return x.score;
    }
    let gap_size1 = y.beg1() - x.end1();
    let (gap_size2, frameshift) = size_and_frameshift(x.end2(), y.beg2(), frame_size);
    let mut cost = gap_costs.cost(gap_size1, gap_size2);
    if frameshift {
        cost += gap_costs.frameshift_cost;
    }
    cost
}

/// Emit ambiguity codes for the chunks of one ordinary (untranslated)
/// extension, in traversal order.
fn centroid_column_codes(
    centroid: &Centroid,
    codes: &mut Vec<u8>,
    chunks: &[SegmentPair],
    is_forward: bool,
) {
    for (i, x) in chunks.iter().enumerate() {
        centroid.get_match_ambiguities(codes, x.end1(), x.end2(), x.size);
        let next = chunks.get(i + 1);
        let end1 = next.map_or(0, |n| n.end1());
        let end2 = next.map_or(0, |n| n.end2());
        // if an insertion is adjacent to a deletion, the deletion gets
        // printed first
        if is_forward {
            centroid.get_insert_ambiguities(codes, x.beg1(), x.beg2(), end2);
            centroid.get_delete_ambiguities(codes, end2, x.beg1(), end1);
        } else {
            centroid.get_delete_ambiguities(codes, end2, x.beg1(), end1);
            centroid.get_insert_ambiguities(codes, x.beg1(), x.beg2(), end2);
        }
    }
}

/// Emit ambiguity codes for a translated extension: one code per aligned
/// codon column, with gaps padded by '-'.
fn frame_column_codes(
    frame: &FrameshiftXdropAligner,
    codes: &mut Vec<u8>,
    chunks: &[SegmentPair],
) {
    for (i, x) in chunks.iter().enumerate() {
        for k in (0..x.size).rev() {
            let p = frame.match_prob(x.beg1() + k, x.beg2().wrapping_add(k * 3));
            codes.push(crate::score::ascii_probability(p));
        }
        let next = chunks.get(i + 1);
        let end1 = next.map_or(0, |n| n.end1());
        let end2 = next.map_or(0, |n| n.beg2().wrapping_add(n.size * 3));
        let n1 = x.beg1() - end1;
        let n2 = (x.beg2() + 1).saturating_sub(end2) / 3;
        codes.extend(std::iter::repeat(b'-').take(n1 + n2));
    }
}
