//! The split-alignment dynamic program.
//!
//! Candidate alignments of one query become rows of a ragged matrix over
//! query coordinates.  Viterbi and forward/backward passes walk the columns
//! left to right, maintaining the set of rows "in play" by merging sorted
//! pending rows into a sorted active list (a monotone priority queue without
//! the heap).  Transitions between rows are jumps (fixed penalty) or
//! cis-splices (log-normal intron length plus dinucleotide signal scores);
//! the forward pass rescales each column to keep the sums in range.
//!
//! Two full sets of DP buffers exist so both splice-signal orientations can
//! be computed and compared; `flip_splice_signals` swaps them.

use anyhow::{anyhow, Result};

use crate::error::SaltoError;

use super::matrix::RaggedLayout;
use super::params::{SplitAlignerParams, NUM_QUAL_CODES, NUM_SIGNAL_CODES};
use super::unsplit::UnsplitAlignment;

const MIN_SCORE: i64 = i64::MIN / 2;

/// One piece of the chosen split alignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlignmentPart {
    pub aln_index: usize,
    pub query_beg: usize,
    pub query_end: usize,
}

/// Merge the sorted `src` into the sorted prefix of `v`, in place.
fn merge_into(v: &mut Vec<u32>, src: &[u32], less: impl Fn(u32, u32) -> bool) {
    let end1 = v.len();
    if src.is_empty() {
        return;
    }
    v.resize(end1 + src.len(), 0);
    let mut i = end1;
    let mut k = src.len();
    let mut e = v.len();
    while k > 0 {
        if i == 0 {
            v[..k].copy_from_slice(&src[..k]);
            break;
        }
        e -= 1;
        if less(src[k - 1], v[i - 1]) {
            v[e] = v[i - 1];
            i -= 1;
        } else {
            v[e] = src[k - 1];
            k -= 1;
        }
    }
}

// splice signal codes: dinucleotide n1*4+n2, or 16 for non-ACGT

fn splice_beg_signal_fwd(seq: &[u8], pos: usize) -> u8 {
    let n1 = seq.get(pos).copied().unwrap_or(4);
    if n1 >= 4 {
        return 16;
    }
    let n2 = seq.get(pos + 1).copied().unwrap_or(4);
    if n2 >= 4 {
        return 16;
    }
    n1 * 4 + n2
}

fn splice_beg_signal_rev(seq: &[u8], pos: usize) -> u8 {
    if pos < 2 {
        return 16;
    }
    let n1 = seq[pos - 1];
    if n1 >= 4 {
        return 16;
    }
    let n2 = seq[pos - 2];
    if n2 >= 4 {
        return 16;
    }
    15 - (n1 * 4 + n2) // reverse-complement
}

fn splice_end_signal_fwd(seq: &[u8], pos: usize) -> u8 {
    if pos < 2 {
        return 16;
    }
    let n2 = seq[pos - 1];
    if n2 >= 4 {
        return 16;
    }
    let n1 = seq[pos - 2];
    if n1 >= 4 {
        return 16;
    }
    n1 * 4 + n2
}

fn splice_end_signal_rev(seq: &[u8], pos: usize) -> u8 {
    let n2 = seq.get(pos).copied().unwrap_or(4);
    if n2 >= 4 {
        return 16;
    }
    let n1 = seq.get(pos + 1).copied().unwrap_or(4);
    if n1 >= 4 {
        return 16;
    }
    15 - (n1 * 4 + n2) // reverse-complement
}

#[derive(Default, Clone)]
struct DpBuffers {
    vmat: Vec<i64>,
    fmat: Vec<f64>,
    bmat: Vec<f64>,
    vvec: Vec<i64>,
    rescales: Vec<f64>,
}

/// Per-query split aligner with reusable scratch.
#[derive(Default)]
pub struct SplitAligner {
    alns: Vec<UnsplitAlignment>,
    num_alns: usize,
    layout: RaggedLayout,
    min_beg: usize,
    max_end: usize,

    smat: Vec<i32>,
    sexp: Vec<f64>,
    dp: [DpBuffers; 2],
    cur: usize,
    signals_orientation: usize,

    splice_beg_coords: Vec<u32>,
    splice_end_coords: Vec<u32>,
    splice_beg_signals: Vec<u8>,
    splice_end_signals: Vec<u8>,

    sorted_aln_indices: Vec<u32>,
    new_inplay: Vec<u32>,
    old_inplay: Vec<u32>,
    r_begs: Vec<u32>,
    r_ends: Vec<u32>,
    rname_and_strand_ids: Vec<u32>,

    max_cells: usize,
}

impl SplitAligner {
    pub fn new() -> Self {
        SplitAligner::default()
    }

    pub fn alns(&self) -> &[UnsplitAlignment] {
        &self.alns
    }

    pub fn num_alns(&self) -> usize {
        self.num_alns
    }

    #[inline(always)]
    fn dp_beg(&self, i: u32) -> usize {
        self.layout.dp_beg(i as usize)
    }

    #[inline(always)]
    fn dp_end(&self, i: u32) -> usize {
        self.layout.dp_end(i as usize)
    }

    #[inline(always)]
    fn cell(&self, i: usize, j: usize) -> usize {
        self.layout.cell(i, j)
    }

    pub fn cells_per_dp_matrix(&self) -> usize {
        self.layout.cells()
    }

    #[inline(always)]
    fn splice_beg_score(&self, params: &SplitAlignerParams, is_genome: bool, ij: usize) -> i64 {
        if is_genome {
            params.splice_beg_scores
                [self.signals_orientation + self.splice_beg_signals[ij] as usize] as i64
        } else {
            0
        }
    }

    #[inline(always)]
    fn splice_end_score(&self, params: &SplitAlignerParams, is_genome: bool, ij: usize) -> i64 {
        if is_genome {
            params.splice_end_scores
                [self.signals_orientation + self.splice_end_signals[ij] as usize] as i64
        } else {
            0
        }
    }

    #[inline(always)]
    fn splice_beg_prob(&self, params: &SplitAlignerParams, is_genome: bool, ij: usize) -> f64 {
        if is_genome {
            params.splice_beg_probs
                [self.signals_orientation + self.splice_beg_signals[ij] as usize]
        } else {
            1.0
        }
    }

    #[inline(always)]
    fn splice_end_prob(&self, params: &SplitAlignerParams, is_genome: bool, ij: usize) -> f64 {
        if is_genome {
            params.splice_end_probs
                [self.signals_orientation + self.splice_end_signals[ij] as usize]
        } else {
            1.0
        }
    }

    // ------------------------------------------------------------------
    // layout
    // ------------------------------------------------------------------

    /// Take ownership of the query's candidate alignments and lay out the
    /// ragged DP.
    pub fn layout(&mut self, params: &SplitAlignerParams, alns: Vec<UnsplitAlignment>) {
        assert!(!alns.is_empty());
        self.num_alns = alns.len();
        self.alns = alns;

        self.sorted_aln_indices = (0..self.num_alns as u32).collect();

        if params.is_spliced() {
            if params.is_splice_coords() {
                self.init_rbegs_and_ends();
            }
            self.init_rname_and_strand_ids();
        }

        self.init_dp_bounds(params);
    }

    fn init_rbegs_and_ends(&mut self) {
        self.r_begs.clear();
        self.r_ends.clear();
        for a in &self.alns {
            self.r_begs.push(a.rstart as u32);
            self.r_ends.push(a.rend as u32);
        }
    }

    /// Group candidates by (strand, reference name); the group index orders
    /// the splice search window.
    fn init_rname_and_strand_ids(&mut self) {
        self.rname_and_strand_ids.clear();
        self.rname_and_strand_ids.resize(self.num_alns, 0);
        let alns = &self.alns;
        let less = |a: u32, b: u32| {
            let (x, y) = (&alns[a as usize], &alns[b as usize]);
            (x.qstrand, &x.rname) < (y.qstrand, &y.rname)
        };
        self.sorted_aln_indices.sort_by(|&a, &b| {
            if less(a, b) {
                std::cmp::Ordering::Less
            } else if less(b, a) {
                std::cmp::Ordering::Greater
            } else {
                std::cmp::Ordering::Equal
            }
        });
        let mut c = 0;
        for i in 0..self.num_alns {
            let k = self.sorted_aln_indices[i];
            if i > 0 && less(self.sorted_aln_indices[i - 1], k) {
                c += 1;
            }
            self.rname_and_strand_ids[k as usize] = c;
        }
    }

    fn init_dp_bounds(&mut self, params: &SplitAlignerParams) {
        self.min_beg = self.alns.iter().map(|a| a.qstart).min().unwrap();
        self.max_end = self.alns.iter().map(|a| a.qend).max().unwrap();

        // We do dynamic programming along each candidate alignment, widened
        // beyond its ends so that optimal end gaps and jump adjustments are
        // always in range.  The extensions aim to be as short as possible
        // while guaranteeing the optimal split alignment score, using:
        // the highest score for a length is length * maxMatchScore, and an
        // extension of length x scores <= maxJump + insOpen + insGrow * x.
        let max_match_score = params.max_match_score;
        assert!(params.ins_grow_score < 0);
        assert!(max_match_score >= 0);
        let max_match = max_match_score as usize;

        let old_div = (-params.ins_grow_score) as usize;
        let new_div = max_match + old_div;

        let (min_score1, min_score2) = params.dp_extension_min_scores();

        fn dp_extension(max_score: usize, min_score: usize, divisor: usize) -> usize {
            if max_score > min_score {
                (max_score - min_score) / divisor
            } else {
                0
            }
        }

        let mut dp_begs = Vec::with_capacity(self.num_alns);
        let mut dp_ends = Vec::with_capacity(self.num_alns);
        for a in &self.alns {
            let b = a.qstart;
            let e = a.qend;

            let bo = dp_extension(max_match * (e - b), min_score1, old_div);
            let bj = dp_extension(max_match * (self.max_end - b), min_score2, old_div);
            let bn = dp_extension(max_match * (b - self.min_beg), min_score1, new_div);
            dp_begs.push(b - bo.max(bj).min(bn));

            let eo = dp_extension(max_match * (e - b), min_score1, old_div);
            let ej = dp_extension(max_match * (e - self.min_beg), min_score2, old_div);
            let en = dp_extension(max_match * (self.max_end - e), min_score1, new_div);
            dp_ends.push(e + eo.max(ej).min(en));
        }
        self.layout.rebuild(dp_begs, dp_ends);
    }

    // ------------------------------------------------------------------
    // per-query matrices
    // ------------------------------------------------------------------

    /// Grow (never shrink) the scratch and fill the per-cell scores, splice
    /// coordinates and splice signals.
    pub fn init_matrices_for_one_query(
        &mut self,
        params: &SplitAlignerParams,
        is_both_splice_strands: bool,
    ) -> Result<()> {
        let n_cells = self.layout.cells();
        let width = self.max_end - self.min_beg + 1;
        self.cur = 0;
        self.signals_orientation = 0;

        if n_cells > self.max_cells {
            try_grow(&mut self.smat, n_cells * 2)?;
            try_grow(&mut self.sexp, n_cells * 2)?;
            for b in &mut self.dp {
                try_grow(&mut b.vmat, n_cells)?;
                try_grow(&mut b.fmat, n_cells)?;
                try_grow(&mut b.bmat, n_cells)?;
            }
            self.max_cells = n_cells;
        }
        for b in &mut self.dp {
            try_grow(&mut b.vvec, width)?;
            try_grow(&mut b.rescales, width)?;
        }

        for i in 0..self.num_alns {
            self.calc_base_scores(params, i);
        }
        for k in 0..n_cells * 2 {
            self.sexp[k] = params.scaled_exp(self.smat[k]);
        }

        // entry cells per row: no within-row predecessor
        let num_strands = if is_both_splice_strands { 2 } else { 1 };
        for s in 0..num_strands {
            for i in 0..self.num_alns {
                let beg = self.layout.cell(i, self.layout.dp_beg(i));
                let end = self.layout.cell(i, self.layout.dp_end(i));
                self.dp[s].vmat[beg] = MIN_SCORE;
                self.dp[s].fmat[beg] = 0.0;
                self.dp[s].bmat[end] = 0.0;
            }
        }

        if params.is_splice_coords() {
            try_grow(&mut self.splice_beg_coords, n_cells)?;
            try_grow(&mut self.splice_end_coords, n_cells)?;
            for i in 0..self.num_alns {
                self.init_splice_coords(i);
            }
        }

        if params.is_genome() {
            try_grow(&mut self.splice_beg_signals, n_cells)?;
            try_grow(&mut self.splice_end_signals, n_cells)?;
            for i in 0..self.num_alns {
                self.init_splice_signals(params, i)?;
            }
        }

        Ok(())
    }

    /// Affine gap scores in a cunning form: the odd slot of each cell holds
    /// the score at that query base (insertions score open+grow), the even
    /// slot holds the score between bases (chained insertions get -open
    /// back, deletions accumulate here).  This stays correct even when the
    /// DP jumps between alignments in the middle of a gap.
    fn calc_base_scores(&mut self, params: &SplitAlignerParams, i: usize) {
        let quality_offset = params.quality_offset;
        let del_open_score = params.del_open_score;
        let del_grow_score = params.del_grow_score;
        let ins_open_score = params.ins_open_score;
        let ins_grow_score = params.ins_grow_score;
        let first_ins_score = ins_open_score + ins_grow_score;
        let tween_ins_score = -ins_open_score;

        let a = &self.alns[i];
        let is_rev = a.is_flipped();
        let dp_beg = self.layout.dp_beg(i);
        let dp_end = self.layout.dp_end(i);
        let mut m = self.layout.cell(i, dp_beg) * 2;
        let aln_beg = self.layout.cell(i, a.qstart) * 2;
        let m_end = self.layout.cell(i, dp_end) * 2;

        let mut del_score = 0i32;
        let mut ins_compensation_score = 0i32;

        // query letters before the alignment count as insertions
        while m < aln_beg {
            self.smat[m] = del_score + ins_compensation_score;
            self.smat[m + 1] = first_ins_score;
            m += 2;
            del_score = 0;
            ins_compensation_score = tween_ins_score;
        }

        let r_align = a.ralign.as_bytes();
        let q_align = a.qalign.as_bytes();
        let q_qual = if quality_offset != 0 && !a.qqual.is_empty() {
            Some(a.qqual.as_bytes())
        } else {
            None
        };

        for k in 0..q_align.len() {
            let x = r_align[k];
            let y = q_align[k];
            let q = match q_qual {
                Some(qq) => (qq[k] as i32 - quality_offset).max(0) as usize,
                None => NUM_QUAL_CODES - 1,
            };
            if x == b'-' {
                // gap in the reference: insertion
                self.smat[m] = del_score + ins_compensation_score;
                self.smat[m + 1] = first_ins_score;
                m += 2;
                del_score = 0;
                ins_compensation_score = tween_ins_score;
            } else if y == b'-' {
                // gap in the query: deletion
                if del_score == 0 {
                    del_score = del_open_score;
                }
                del_score += del_grow_score;
                ins_compensation_score = 0;
            } else {
                let q = q.min(NUM_QUAL_CODES - 1);
                self.smat[m] = del_score;
                // amazingly, in ASCII, '.' equals 'n' mod 64
                self.smat[m + 1] = params.substitution_score(is_rev, x, y, q);
                m += 2;
                del_score = 0;
                ins_compensation_score = 0;
            }
        }

        // query letters after the alignment count as insertions
        while m < m_end {
            self.smat[m] = del_score + ins_compensation_score;
            self.smat[m + 1] = first_ins_score;
            m += 2;
            del_score = 0;
            ins_compensation_score = tween_ins_score;
        }

        self.smat[m] = del_score;
    }

    fn init_splice_coords(&mut self, i: usize) {
        let a = &self.alns[i];
        let dp_beg = self.layout.dp_beg(i);
        let dp_end = self.layout.dp_end(i);
        let mut j = dp_beg;
        let mut k = a.rstart as u32;

        self.splice_beg_coords[self.layout.cell(i, j)] = k;
        while j < a.qstart {
            self.splice_end_coords[self.layout.cell(i, j)] = k;
            j += 1;
            self.splice_beg_coords[self.layout.cell(i, j)] = k;
        }
        let r_align = a.ralign.as_bytes();
        let q_align = a.qalign.as_bytes();
        for x in 0..r_align.len() {
            if q_align[x] != b'-' {
                self.splice_end_coords[self.layout.cell(i, j)] = k;
            }
            if q_align[x] != b'-' {
                j += 1;
            }
            if r_align[x] != b'-' {
                k += 1;
            }
            if q_align[x] != b'-' {
                self.splice_beg_coords[self.layout.cell(i, j)] = k;
            }
        }
        while j < dp_end {
            self.splice_end_coords[self.layout.cell(i, j)] = k;
            j += 1;
            self.splice_beg_coords[self.layout.cell(i, j)] = k;
        }
        self.splice_end_coords[self.layout.cell(i, j)] = k;

        debug_assert_eq!(k, a.rend as u32);
    }

    fn init_splice_signals(&mut self, params: &SplitAlignerParams, i: usize) -> Result<()> {
        let a = &self.alns[i];
        let (seq_beg, seq_end, seq) = params.seq_ends(&a.rname)?;
        if a.rend > seq_end - seq_beg {
            return Err(anyhow!("alignment beyond the end of {}", a.rname));
        }

        let dp_beg = self.layout.dp_beg(i);
        let dp_len = self.layout.dp_end(i) - dp_beg;
        let row_beg = self.layout.cell(i, dp_beg);

        if a.is_forward_strand() {
            for j in 0..=dp_len {
                let ij = row_beg + j;
                let b = self.splice_beg_coords[ij] as usize;
                let e = self.splice_end_coords[ij] as usize;
                self.splice_beg_signals[ij] = splice_beg_signal_fwd(seq, seq_beg + b);
                self.splice_end_signals[ij] = splice_end_signal_fwd(seq, seq_beg + e);
            }
        } else {
            for j in 0..=dp_len {
                let ij = row_beg + j;
                let b = self.splice_beg_coords[ij] as usize;
                let e = self.splice_end_coords[ij] as usize;
                self.splice_beg_signals[ij] = splice_beg_signal_rev(seq, seq_end - b);
                self.splice_end_signals[ij] = splice_end_signal_rev(seq, seq_end - e);
            }
        }
        Ok(())
    }

    /// Swap to the other splice-signal orientation and its DP buffers.
    pub fn flip_splice_signals(&mut self) {
        self.cur ^= 1;
        self.signals_orientation = NUM_SIGNAL_CODES - self.signals_orientation;
    }

    // ------------------------------------------------------------------
    // sort orders
    // ------------------------------------------------------------------

    fn sort_by_beg(&mut self) {
        let layout = &self.layout;
        self.sorted_aln_indices.sort_by(|&a, &b| {
            let (ba, bb) = (layout.dp_beg(a as usize), layout.dp_beg(b as usize));
            let (ea, eb) = (layout.dp_end(a as usize), layout.dp_end(b as usize));
            ba.cmp(&bb).then(eb.cmp(&ea)).then(a.cmp(&b))
        });
    }

    fn sort_by_end(&mut self) {
        let layout = &self.layout;
        self.sorted_aln_indices.sort_by(|&a, &b| {
            let (ba, bb) = (layout.dp_beg(a as usize), layout.dp_beg(b as usize));
            let (ea, eb) = (layout.dp_end(a as usize), layout.dp_end(b as usize));
            eb.cmp(&ea).then(ba.cmp(&bb)).then(a.cmp(&b))
        });
    }

    fn sort_by_qbeg(&mut self) {
        let layout = &self.layout;
        let ids = &self.rname_and_strand_ids;
        let r_begs = &self.r_begs;
        self.sorted_aln_indices.sort_by(|&a, &b| {
            layout
                .dp_beg(a as usize)
                .cmp(&layout.dp_beg(b as usize))
                .then(ids[a as usize].cmp(&ids[b as usize]))
                .then(r_begs[a as usize].cmp(&r_begs[b as usize]))
                .then(a.cmp(&b))
        });
    }

    fn sort_by_qend(&mut self) {
        let layout = &self.layout;
        let ids = &self.rname_and_strand_ids;
        let r_ends = &self.r_ends;
        self.sorted_aln_indices.sort_by(|&a, &b| {
            layout
                .dp_end(b as usize)
                .cmp(&layout.dp_end(a as usize))
                .then(ids[a as usize].cmp(&ids[b as usize]))
                .then(r_ends[b as usize].cmp(&r_ends[a as usize]))
                .then(a.cmp(&b))
        });
    }

    // ------------------------------------------------------------------
    // in-play maintenance for the spliced passes
    // ------------------------------------------------------------------

    fn update_inplay_f(
        &mut self,
        sorted_aln_pos: &mut usize,
        old_num_inplay: &mut usize,
        new_num_inplay: &mut usize,
        j: usize,
    ) {
        std::mem::swap(&mut self.old_inplay, &mut self.new_inplay);
        *old_num_inplay = *new_num_inplay;

        let mut new = std::mem::take(&mut self.new_inplay);
        new.clear();
        for x in 0..*old_num_inplay {
            let i = self.old_inplay[x];
            if self.dp_end(i) == j {
                continue; // no longer in play
            }
            new.push(i);
        }

        let sorted_old_pos = *sorted_aln_pos;
        while *sorted_aln_pos < self.num_alns {
            let i = self.sorted_aln_indices[*sorted_aln_pos];
            if self.dp_beg(i) > j {
                break; // not yet in play
            }
            *sorted_aln_pos += 1;
        }

        let ids = &self.rname_and_strand_ids;
        let r_begs = &self.r_begs;
        merge_into(
            &mut new,
            &self.sorted_aln_indices[sorted_old_pos..*sorted_aln_pos],
            |a, b| {
                (ids[a as usize], r_begs[a as usize]) < (ids[b as usize], r_begs[b as usize])
            },
        );
        *new_num_inplay = new.len();
        self.new_inplay = new;
    }

    fn update_inplay_b(
        &mut self,
        sorted_aln_pos: &mut usize,
        old_num_inplay: &mut usize,
        new_num_inplay: &mut usize,
        j: usize,
    ) {
        std::mem::swap(&mut self.old_inplay, &mut self.new_inplay);
        *old_num_inplay = *new_num_inplay;

        let mut new = std::mem::take(&mut self.new_inplay);
        new.clear();
        for x in 0..*old_num_inplay {
            let i = self.old_inplay[x];
            if self.dp_beg(i) == j {
                continue; // no longer in play
            }
            new.push(i);
        }

        let sorted_old_pos = *sorted_aln_pos;
        while *sorted_aln_pos < self.num_alns {
            let i = self.sorted_aln_indices[*sorted_aln_pos];
            if self.dp_end(i) < j {
                break; // not yet in play
            }
            *sorted_aln_pos += 1;
        }

        let ids = &self.rname_and_strand_ids;
        let r_ends = &self.r_ends;
        merge_into(
            &mut new,
            &self.sorted_aln_indices[sorted_old_pos..*sorted_aln_pos],
            |a, b| {
                ids[a as usize] < ids[b as usize]
                    || (ids[a as usize] == ids[b as usize]
                        && r_ends[a as usize] > r_ends[b as usize])
            },
        );
        *new_num_inplay = new.len();
        self.new_inplay = new;
    }

    // ------------------------------------------------------------------
    // Viterbi
    // ------------------------------------------------------------------

    /// Viterbi over jumps only (no splice model).
    pub fn viterbi_split(&mut self, params: &SplitAlignerParams) -> i64 {
        self.sort_by_beg();
        let restart_score = params.restart_score as i64;
        let layout = &self.layout;

        let mut inplay: Vec<u32> = Vec::with_capacity(self.num_alns);
        let mut sorted_ptr = 0usize;
        let mut max_score = 0i64;

        let width = self.max_end - self.min_beg;
        for jj in 0..width {
            let j = self.min_beg + jj;
            while inplay
                .last()
                .map_or(false, |&i| layout.dp_end(i as usize) == j)
            {
                inplay.pop(); // no longer in play
            }
            let sorted_beg = sorted_ptr;
            while sorted_ptr < self.num_alns
                && layout.dp_beg(self.sorted_aln_indices[sorted_ptr] as usize) == j
            {
                sorted_ptr += 1;
            }
            merge_into(
                &mut inplay,
                &self.sorted_aln_indices[sorted_beg..sorted_ptr],
                |a, b| {
                    let (ea, eb) = (layout.dp_end(a as usize), layout.dp_end(b as usize));
                    ea > eb || (ea == eb && layout.dp_beg(a as usize) < layout.dp_beg(b as usize))
                },
            );

            self.dp[self.cur].vvec[jj] = max_score;
            let score_from_jump = max_score + restart_score;
            for &x in &inplay {
                let ij = layout.cell(x as usize, j);
                let s = score_from_jump
                    .max(self.dp[self.cur].vmat[ij] + self.smat[ij * 2] as i64)
                    + self.smat[ij * 2 + 1] as i64;
                self.dp[self.cur].vmat[ij + 1] = s;
                max_score = max_score.max(s);
            }
        }

        self.dp[self.cur].vvec[width] = max_score;
        max_score
    }

    /// Viterbi with cis-splices and restartable candidates.
    pub fn viterbi_splice(&mut self, params: &SplitAlignerParams) -> i64 {
        self.sort_by_qbeg();
        let jump_score = params.jump_score as i64;
        let restart_score = params.restart_score as i64;
        let splice_prior = params.splice_prior;
        let is_genome = params.is_genome();
        let mut sorted_aln_pos = 0usize;
        let mut old_num_inplay = 0usize;
        let mut new_num_inplay = 0usize;

        let mut max_score = 0i64;
        let mut score_from_jump = restart_score;

        let width = self.max_end - self.min_beg;
        for jj in 0..width {
            let j = self.min_beg + jj;
            self.update_inplay_f(&mut sorted_aln_pos, &mut old_num_inplay, &mut new_num_inplay, j);
            let mut old_inplay_pos = 0usize;
            self.dp[self.cur].vvec[jj] = max_score;
            let mut s_max = MIN_SCORE;
            for x in 0..new_num_inplay {
                let i = self.new_inplay[x] as usize;
                let ij = self.cell(i, j);

                let mut s = score_from_jump;
                if splice_prior > 0.0 {
                    s = s.max(self.score_from_splice(
                        params,
                        i,
                        j,
                        old_num_inplay,
                        &mut old_inplay_pos,
                    ));
                }
                s += self.splice_end_score(params, is_genome, ij);
                s = s.max(self.dp[self.cur].vmat[ij] + self.smat[ij * 2] as i64);
                if self.alns[i].qstart == j && s < 0 {
                    s = 0;
                }
                s += self.smat[ij * 2 + 1] as i64;

                self.dp[self.cur].vmat[ij + 1] = s;
                s_max = s_max.max(s + self.splice_beg_score(params, is_genome, ij + 1));
            }
            max_score = s_max.max(max_score);
            score_from_jump = (s_max + jump_score).max(max_score + restart_score);
        }

        self.dp[self.cur].vvec[width] = max_score;
        self.end_score()
    }

    /// Best splice transition into `(i, j)` from the in-play window.
    fn score_from_splice(
        &self,
        params: &SplitAlignerParams,
        i: usize,
        j: usize,
        old_num_inplay: usize,
        old_inplay_pos: &mut usize,
    ) -> i64 {
        let max_splice_dist = params.max_splice_dist;
        let is_genome = params.is_genome();
        let ij = self.cell(i, j);
        let mut score = MIN_SCORE;
        let i_seq = self.rname_and_strand_ids[i];
        let i_end = self.splice_end_coords[ij];

        while *old_inplay_pos < old_num_inplay {
            let k = self.old_inplay[*old_inplay_pos] as usize;
            if self.rname_and_strand_ids[k] < i_seq {
                *old_inplay_pos += 1;
                continue;
            }
            if self.rname_and_strand_ids[k] > i_seq || self.r_begs[k] >= i_end {
                return score;
            }
            let kj = self.cell(k, j);
            let k_beg = self.splice_beg_coords[kj];
            if k_beg >= self.r_begs[i] || self.r_begs[i] - k_beg <= max_splice_dist {
                break;
            }
            *old_inplay_pos += 1;
        }

        for y in *old_inplay_pos..old_num_inplay {
            let k = self.old_inplay[y] as usize;
            if self.rname_and_strand_ids[k] > i_seq || self.r_begs[k] >= i_end {
                break;
            }
            let kj = self.cell(k, j);
            let k_beg = self.splice_beg_coords[kj];
            if i_end <= k_beg {
                continue;
            }
            if i_end - k_beg > max_splice_dist {
                continue;
            }
            score = score.max(
                self.dp[self.cur].vmat[kj]
                    + self.splice_beg_score(params, is_genome, kj)
                    + params.splice_score(i_end - k_beg) as i64,
            );
        }

        score
    }

    /// Best Viterbi value at each candidate's own query end.
    pub fn end_score(&self) -> i64 {
        let mut score = MIN_SCORE;
        for i in 0..self.num_alns {
            score = score.max(self.dp[self.cur].vmat[self.cell(i, self.alns[i].qend)]);
        }
        score
    }

    fn find_end_score(&self, score: i64) -> usize {
        for i in 0..self.num_alns {
            if self.dp[self.cur].vmat[self.cell(i, self.alns[i].qend)] == score {
                return i;
            }
        }
        self.num_alns
    }

    fn find_score(&self, params: &SplitAlignerParams, is_genome: bool, j: usize, score: i64) -> usize {
        for i in 0..self.num_alns {
            if self.layout.dp_beg(i) >= j || self.layout.dp_end(i) < j {
                continue;
            }
            let ij = self.cell(i, j);
            if self.dp[self.cur].vmat[ij] + self.splice_beg_score(params, is_genome, ij) == score {
                return i;
            }
        }
        self.num_alns
    }

    fn find_splice_score(
        &self,
        params: &SplitAlignerParams,
        i: usize,
        j: usize,
        score: i64,
    ) -> usize {
        debug_assert!(params.splice_prior > 0.0);
        let is_genome = params.is_genome();
        let ij = self.cell(i, j);
        let i_seq = self.rname_and_strand_ids[i];
        let i_end = self.splice_end_coords[ij];
        let i_score = self.splice_end_score(params, is_genome, ij);
        for k in 0..self.num_alns {
            if self.rname_and_strand_ids[k] != i_seq {
                continue;
            }
            if self.layout.dp_beg(k) >= j || self.layout.dp_end(k) < j {
                continue;
            }
            let kj = self.cell(k, j);
            let k_beg = self.splice_beg_coords[kj];
            if i_end <= k_beg {
                continue;
            }
            let s = i_score
                + self.splice_beg_score(params, is_genome, kj)
                + params.splice_score(i_end - k_beg) as i64;
            if self.dp[self.cur].vmat[kj] + s == score {
                return k;
            }
        }
        self.num_alns
    }

    // ------------------------------------------------------------------
    // traceback
    // ------------------------------------------------------------------

    /// Recover the alignment parts of the Viterbi path, last part first.
    pub fn trace_back(
        &self,
        params: &SplitAlignerParams,
        viterbi_score: i64,
    ) -> Vec<AlignmentPart> {
        let is_genome = params.is_genome();
        let mut aln_parts = Vec::new();
        let mut i;
        let mut j;
        if params.is_spliced() {
            i = self.find_end_score(viterbi_score);
            assert!(i < self.num_alns);
            j = self.alns[i].qend;
        } else {
            j = self.max_end;
            let t = self.dp[self.cur].vvec[j - self.min_beg];
            if t == 0 {
                return aln_parts;
            }
            while t == self.dp[self.cur].vvec[j - 1 - self.min_beg] {
                j -= 1;
            }
            i = self.find_score(params, is_genome, j, t);
            assert!(i < self.num_alns);
        }

        let mut query_end = j;

        loop {
            j -= 1;
            let ij = self.cell(i, j);
            let score = self.dp[self.cur].vmat[ij + 1] - self.smat[ij * 2 + 1] as i64;
            if params.is_spliced() && self.alns[i].qstart == j && score == 0 {
                aln_parts.push(AlignmentPart {
                    aln_index: i,
                    query_beg: j,
                    query_end,
                });
                return aln_parts;
            }

            // We either stay in this alignment, or jump to another one.  If
            // the scores are equally good, then we stay if the strand is
            // "+", else jump.  This gives cleaner inversion boundaries, but
            // it makes some other kinds of boundary less clean.  What's the
            // best procedure for tied scores?
            let is_stay = score == self.dp[self.cur].vmat[ij] + self.smat[ij * 2] as i64;
            if is_stay && self.alns[i].is_forward_strand() {
                continue;
            }

            let s = score - self.splice_end_score(params, is_genome, ij);
            let t = s - params.restart_score as i64;
            if t == self.dp[self.cur].vvec[j - self.min_beg] {
                aln_parts.push(AlignmentPart {
                    aln_index: i,
                    query_beg: j,
                    query_end,
                });
                if t == 0 {
                    return aln_parts;
                }
                while t == self.dp[self.cur].vvec[j - 1 - self.min_beg] {
                    j -= 1;
                }
                i = self.find_score(params, is_genome, j, t);
            } else {
                if is_stay {
                    continue;
                }
                aln_parts.push(AlignmentPart {
                    aln_index: i,
                    query_beg: j,
                    query_end,
                });
                let k = self.find_score(params, is_genome, j, s - params.jump_score as i64);
                i = if k < self.num_alns {
                    k
                } else {
                    self.find_splice_score(params, i, j, score)
                };
            }
            assert!(i < self.num_alns);
            query_end = j;
        }
    }

    /// Score of one alignment's segment `[query_beg, query_end)`.
    pub fn segment_score(&self, aln_num: usize, query_beg: usize, query_end: usize) -> i64 {
        let mut score = 0i64;
        for j in query_beg..query_end {
            let ij = self.cell(aln_num, j);
            score += self.smat[ij * 2 + 1] as i64;
            if j > query_beg {
                score += self.smat[ij * 2] as i64;
            }
        }
        score
    }

    // ------------------------------------------------------------------
    // forward / backward
    // ------------------------------------------------------------------

    /// Forward pass over jumps only, with per-column rescaling.
    pub fn forward_split(&mut self, params: &SplitAlignerParams) {
        self.sort_by_beg();
        let restart_prob = params.restart_prob;
        let layout = &self.layout;

        let mut inplay: Vec<u32> = Vec::with_capacity(self.num_alns);
        let mut sorted_ptr = 0usize;
        let mut sum_of_probs = 1.0f64;
        let mut rescale = 1.0f64;

        let width = self.max_end - self.min_beg;
        for jj in 0..width {
            let j = self.min_beg + jj;
            while inplay
                .last()
                .map_or(false, |&i| layout.dp_end(i as usize) == j)
            {
                inplay.pop();
            }
            let sorted_beg = sorted_ptr;
            while sorted_ptr < self.num_alns
                && layout.dp_beg(self.sorted_aln_indices[sorted_ptr] as usize) == j
            {
                sorted_ptr += 1;
            }
            merge_into(
                &mut inplay,
                &self.sorted_aln_indices[sorted_beg..sorted_ptr],
                |a, b| {
                    let (ea, eb) = (layout.dp_end(a as usize), layout.dp_end(b as usize));
                    ea > eb || (ea == eb && layout.dp_beg(a as usize) < layout.dp_beg(b as usize))
                },
            );

            self.dp[self.cur].rescales[jj] = rescale;
            let prob_from_jump = sum_of_probs * restart_prob;
            let mut p_sum = 0.0;
            for &x in &inplay {
                let ij = layout.cell(x as usize, j);
                let p = (prob_from_jump + self.dp[self.cur].fmat[ij] * self.sexp[ij * 2])
                    * self.sexp[ij * 2 + 1]
                    * rescale;
                self.dp[self.cur].fmat[ij + 1] = p;
                p_sum += p;
            }
            sum_of_probs = p_sum + sum_of_probs * rescale;
            rescale = 1.0 / (p_sum + 1.0);
        }

        // make the scaled total probability equal 1
        self.dp[self.cur].rescales[width] = 1.0 / sum_of_probs;
    }

    /// Backward pass matching `forward_split`.
    pub fn backward_split(&mut self, params: &SplitAlignerParams) {
        self.sort_by_end();
        let restart_prob = params.restart_prob;
        let layout = &self.layout;

        let mut inplay: Vec<u32> = Vec::with_capacity(self.num_alns);
        let mut sorted_ptr = 0usize;
        let mut sum_of_probs = 1.0f64;

        let width = self.max_end - self.min_beg;
        for jj in (1..=width).rev() {
            let j = self.min_beg + jj;
            while inplay
                .last()
                .map_or(false, |&i| layout.dp_beg(i as usize) == j)
            {
                inplay.pop();
            }
            let sorted_beg = sorted_ptr;
            while sorted_ptr < self.num_alns
                && layout.dp_end(self.sorted_aln_indices[sorted_ptr] as usize) == j
            {
                sorted_ptr += 1;
            }
            merge_into(
                &mut inplay,
                &self.sorted_aln_indices[sorted_beg..sorted_ptr],
                |a, b| {
                    let (ba, bb) = (layout.dp_beg(a as usize), layout.dp_beg(b as usize));
                    ba < bb || (ba == bb && layout.dp_end(a as usize) > layout.dp_end(b as usize))
                },
            );

            let rescale = self.dp[self.cur].rescales[jj];
            let mut p_sum = 0.0;
            for &x in &inplay {
                let ij = layout.cell(x as usize, j);
                let p = (sum_of_probs + self.dp[self.cur].bmat[ij] * self.sexp[ij * 2])
                    * self.sexp[ij * 2 - 1]
                    * rescale;
                self.dp[self.cur].bmat[ij - 1] = p;
                p_sum += p;
            }
            sum_of_probs = p_sum * restart_prob + sum_of_probs * rescale;
        }
    }

    /// Forward pass with splices, both rescaled.
    pub fn forward_splice(&mut self, params: &SplitAlignerParams) {
        self.sort_by_qbeg();
        let splice_prior = params.splice_prior;
        let jump_prob = params.jump_prob;
        let is_genome = params.is_genome();
        let mut sorted_aln_pos = 0usize;
        let mut old_num_inplay = 0usize;
        let mut new_num_inplay = 0usize;

        let mut prob_from_jump = 0.0f64;
        let mut begprob = 1.0f64;
        let mut z_f = 0.0f64; // sum of probabilities of ending paths
        let mut rescale = 1.0f64;

        let width = self.max_end - self.min_beg;
        for jj in 0..width {
            let j = self.min_beg + jj;
            self.update_inplay_f(&mut sorted_aln_pos, &mut old_num_inplay, &mut new_num_inplay, j);
            let mut old_inplay_pos = 0usize;
            self.dp[self.cur].rescales[jj] = rescale;
            z_f *= rescale;
            let mut p_sum = 0.0;
            let mut r_new = 0.0;
            for x in 0..new_num_inplay {
                let i = self.new_inplay[x] as usize;
                let ij = self.cell(i, j);

                let mut p = prob_from_jump;
                if splice_prior > 0.0 {
                    p += self.prob_from_splice_f(
                        params,
                        i,
                        j,
                        old_num_inplay,
                        &mut old_inplay_pos,
                    );
                }
                p *= self.splice_end_prob(params, is_genome, ij);
                p += self.dp[self.cur].fmat[ij] * self.sexp[ij * 2];
                if self.alns[i].qstart == j {
                    p += begprob;
                }
                p = p * self.sexp[ij * 2 + 1] * rescale;

                self.dp[self.cur].fmat[ij + 1] = p;
                if self.alns[i].qend == j + 1 {
                    z_f += p;
                }
                p_sum += p * self.splice_beg_prob(params, is_genome, ij + 1);
                r_new += p;
            }
            begprob *= rescale;
            prob_from_jump = p_sum * jump_prob;
            rescale = 1.0 / (r_new + 1.0);
        }

        // this causes the scaled total to equal 1
        self.dp[self.cur].rescales[width] = 1.0 / z_f;
    }

    /// Backward pass matching `forward_splice`.
    pub fn backward_splice(&mut self, params: &SplitAlignerParams) {
        self.sort_by_qend();
        let splice_prior = params.splice_prior;
        let jump_prob = params.jump_prob;
        let is_genome = params.is_genome();
        let mut sorted_aln_pos = 0usize;
        let mut old_num_inplay = 0usize;
        let mut new_num_inplay = 0usize;

        let mut prob_from_jump = 0.0f64;
        let mut endprob = 1.0f64;

        let width = self.max_end - self.min_beg;
        for jj in (1..=width).rev() {
            let j = self.min_beg + jj;
            self.update_inplay_b(&mut sorted_aln_pos, &mut old_num_inplay, &mut new_num_inplay, j);
            let mut old_inplay_pos = 0usize;
            let rescale = self.dp[self.cur].rescales[jj];
            let mut p_sum = 0.0;
            for x in 0..new_num_inplay {
                let i = self.new_inplay[x] as usize;
                let ij = self.cell(i, j);

                let mut p = prob_from_jump;
                if splice_prior > 0.0 {
                    p += self.prob_from_splice_b(
                        params,
                        i,
                        j,
                        old_num_inplay,
                        &mut old_inplay_pos,
                    );
                }
                p *= self.splice_beg_prob(params, is_genome, ij);
                p += self.dp[self.cur].bmat[ij] * self.sexp[ij * 2];
                if self.alns[i].qend == j {
                    p += endprob;
                }
                p = p * self.sexp[ij * 2 - 1] * rescale;

                // p can overflow to inf, when a large unaligned middle part
                // of the query made Fmat underflow to 0 and the rescales
                // stay at 1

                self.dp[self.cur].bmat[ij - 1] = p;
                p_sum += p * self.splice_end_prob(params, is_genome, ij - 1);
            }
            endprob *= rescale;
            prob_from_jump = p_sum * jump_prob;
        }
    }

    fn prob_from_splice_f(
        &self,
        params: &SplitAlignerParams,
        i: usize,
        j: usize,
        old_num_inplay: usize,
        old_inplay_pos: &mut usize,
    ) -> f64 {
        let max_splice_dist = params.max_splice_dist;
        let is_genome = params.is_genome();
        let ij = self.cell(i, j);
        let mut sum = 0.0;
        let i_seq = self.rname_and_strand_ids[i];
        let i_end = self.splice_end_coords[ij];

        while *old_inplay_pos < old_num_inplay {
            let k = self.old_inplay[*old_inplay_pos] as usize;
            if self.rname_and_strand_ids[k] < i_seq {
                *old_inplay_pos += 1;
                continue;
            }
            if self.rname_and_strand_ids[k] > i_seq || self.r_begs[k] >= i_end {
                return sum;
            }
            let kj = self.cell(k, j);
            let k_beg = self.splice_beg_coords[kj];
            if k_beg >= self.r_begs[i] || self.r_begs[i] - k_beg <= max_splice_dist {
                break;
            }
            *old_inplay_pos += 1;
        }

        for y in *old_inplay_pos..old_num_inplay {
            let k = self.old_inplay[y] as usize;
            if self.rname_and_strand_ids[k] > i_seq || self.r_begs[k] >= i_end {
                break;
            }
            let kj = self.cell(k, j);
            let k_beg = self.splice_beg_coords[kj];
            if i_end <= k_beg {
                continue;
            }
            if i_end - k_beg > max_splice_dist {
                continue;
            }
            sum += self.dp[self.cur].fmat[kj]
                * self.splice_beg_prob(params, is_genome, kj)
                * params.splice_prob(i_end - k_beg);
        }

        sum
    }

    fn prob_from_splice_b(
        &self,
        params: &SplitAlignerParams,
        i: usize,
        j: usize,
        old_num_inplay: usize,
        old_inplay_pos: &mut usize,
    ) -> f64 {
        let max_splice_dist = params.max_splice_dist;
        let is_genome = params.is_genome();
        let ij = self.cell(i, j);
        let mut sum = 0.0;
        let i_seq = self.rname_and_strand_ids[i];
        let i_beg = self.splice_beg_coords[ij];

        while *old_inplay_pos < old_num_inplay {
            let k = self.old_inplay[*old_inplay_pos] as usize;
            if self.rname_and_strand_ids[k] < i_seq {
                *old_inplay_pos += 1;
                continue;
            }
            if self.rname_and_strand_ids[k] > i_seq || self.r_ends[k] <= i_beg {
                return sum;
            }
            let kj = self.cell(k, j);
            let k_end = self.splice_end_coords[kj];
            if k_end <= self.r_ends[i] || k_end - self.r_ends[i] <= max_splice_dist {
                break;
            }
            *old_inplay_pos += 1;
        }

        for y in *old_inplay_pos..old_num_inplay {
            let k = self.old_inplay[y] as usize;
            if self.rname_and_strand_ids[k] > i_seq || self.r_ends[k] <= i_beg {
                break;
            }
            let kj = self.cell(k, j);
            let k_end = self.splice_end_coords[kj];
            if k_end <= i_beg {
                continue;
            }
            if k_end - i_beg > max_splice_dist {
                continue;
            }
            sum += self.dp[self.cur].bmat[kj]
                * self.splice_end_prob(params, is_genome, kj)
                * params.splice_prob(k_end - i_beg);
        }

        sum
    }

    /// Per-column probability that the query base (or gap column) is
    /// correctly aligned, for columns `[aln_beg, aln_end)` of one
    /// candidate, starting at query coordinate `query_beg`.
    pub fn marginal_probs(
        &self,
        query_beg: usize,
        aln_num: usize,
        aln_beg: usize,
        aln_end: usize,
    ) -> Vec<f64> {
        let qalign = self.alns[aln_num].qalign.as_bytes();
        let mut ij = self.cell(aln_num, query_beg);
        let mut jj = query_beg - self.min_beg;
        let buf = &self.dp[self.cur];
        let mut output = Vec::with_capacity(aln_end - aln_beg);

        for pos in aln_beg..aln_end {
            let value;
            if buf.bmat[ij] > f64::MAX {
                value = 0.0; // can happen for spliced alignment
            } else if qalign[pos] == b'-' {
                value = buf.fmat[ij] * buf.bmat[ij] * self.sexp[ij * 2] * buf.rescales[jj];
            } else {
                let v = buf.fmat[ij + 1] * buf.bmat[ij] / self.sexp[ij * 2 + 1];
                value = if v.is_nan() { 0.0 } else { v };
                ij += 1;
                jj += 1;
            }
            output.push(value);
        }
        output
    }

    /// Log odds of the sense strand given both forward passes, from the
    /// two rescale arrays.
    pub fn splice_signal_strand_log_odds(&self) -> f64 {
        let fwd = &self.dp[self.cur].rescales;
        let rev = &self.dp[self.cur ^ 1].rescales;
        let width = self.max_end - self.min_beg + 1;
        let mut log_odds = 0.0;
        for j in 0..width {
            log_odds += (rev[j] / fwd[j]).ln();
        }
        log_odds
    }
}

fn try_grow<T: Clone + Default>(v: &mut Vec<T>, len: usize) -> Result<()> {
    if v.len() < len {
        let extra = len - v.len();
        v.try_reserve(extra)
            .map_err(|_| SaltoError::Allocation(format!("{} DP cells", len)))?;
        v.resize(len, T::default());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A perfectly matching candidate over query [qbeg, qend), at the
    /// given reference start.
    fn candidate(
        qname: &str,
        qbeg: usize,
        qend: usize,
        qlen: usize,
        rname: &str,
        rstart: usize,
        qstrand: u8,
        letters: &str,
    ) -> UnsplitAlignment {
        let n = qend - qbeg;
        assert_eq!(letters.len(), n);
        UnsplitAlignment {
            qname: qname.to_string(),
            qstart: qbeg,
            qend,
            qstrand,
            rstart,
            rend: rstart + n,
            rname: rname.to_string(),
            ralign: letters.to_string(),
            qalign: letters.to_string(),
            qqual: String::new(),
            rseqlen: 1 << 20,
            qseqlen: qlen,
            lines: Vec::new(),
        }
    }

    fn jump_params() -> SplitAlignerParams {
        let mut p = SplitAlignerParams::default();
        p.set_params(-8, -2, -8, -2, -30, -50, 5.0, 0);
        p.set_simple_score_matrix(6, -18);
        p
    }

    #[test]
    fn single_candidate_viterbi_equals_segment_score() {
        let params = jump_params();
        let alns = vec![candidate("q", 0, 10, 10, "chr1", 100, 0, "ACGTACGTAC")];
        let mut sa = SplitAligner::new();
        sa.layout(&params, alns);
        sa.init_matrices_for_one_query(&params, false).unwrap();
        let v = sa.viterbi_splice(&params);
        assert_eq!(v, 60); // 10 matches * 6
        let parts = sa.trace_back(&params, v);
        assert_eq!(
            parts,
            vec![AlignmentPart {
                aln_index: 0,
                query_beg: 0,
                query_end: 10
            }]
        );
        assert_eq!(sa.segment_score(0, 0, 10), 60);
    }

    #[test]
    fn jump_between_two_candidates() {
        // two candidates covering adjacent halves of a query of length 20,
        // 500 bases apart on the reference
        let params = jump_params();
        let alns = vec![
            candidate("q", 0, 10, 20, "chr1", 100, 0, "ACGTACGTAC"),
            candidate("q", 10, 20, 20, "chr1", 610, 0, "GGCCGGCCGG"),
        ];
        let mut sa = SplitAligner::new();
        sa.layout(&params, alns);
        sa.init_matrices_for_one_query(&params, false).unwrap();
        let v = sa.viterbi_splice(&params);
        // 20 matches minus one jump
        assert_eq!(v, 20 * 6 + params.jump_score as i64);
        let mut parts = sa.trace_back(&params, v);
        parts.reverse();
        assert_eq!(
            parts,
            vec![
                AlignmentPart {
                    aln_index: 0,
                    query_beg: 0,
                    query_end: 10
                },
                AlignmentPart {
                    aln_index: 1,
                    query_beg: 10,
                    query_end: 20
                },
            ]
        );
    }

    #[test]
    fn viterbi_score_equals_traceback_path_score() {
        let params = jump_params();
        let alns = vec![
            candidate("q", 0, 12, 20, "chr1", 100, 0, "ACGTACGTACGT"),
            candidate("q", 8, 20, 20, "chr1", 660, 0, "ACGGCCGGCCGG"),
        ];
        let mut sa = SplitAligner::new();
        sa.layout(&params, alns);
        sa.init_matrices_for_one_query(&params, false).unwrap();
        let v = sa.viterbi_splice(&params);
        let parts = sa.trace_back(&params, v);
        let mut total = 0i64;
        for p in &parts {
            total += sa.segment_score(p.aln_index, p.query_beg, p.query_end);
        }
        total += params.jump_score as i64 * (parts.len() as i64 - 1);
        assert_eq!(v, total);
    }

    #[test]
    fn unspliced_bounds_collapse() {
        // with jumps and splices disabled, dpBeg == qstart and dpEnd == qend
        let mut params = SplitAlignerParams::default();
        p_disable_jumps(&mut params);
        let alns = vec![candidate("q", 3, 9, 12, "chr1", 50, 0, "ACGTAC")];
        let mut sa = SplitAligner::new();
        sa.layout(&params, alns);
        assert_eq!(sa.layout.dp_beg(0), 3);
        assert_eq!(sa.layout.dp_end(0), 9);
    }

    fn p_disable_jumps(p: &mut SplitAlignerParams) {
        p.set_params(-8, -2, -8, -2, -1000000, -1000000, 5.0, 0);
        p.set_simple_score_matrix(6, -18);
        assert_eq!(p.jump_prob, 0.0);
        assert_eq!(p.restart_prob, 0.0);
    }

    #[test]
    fn forward_backward_marginals_near_one() {
        let params = jump_params();
        let alns = vec![candidate("q", 0, 10, 10, "chr1", 100, 0, "ACGTACGTAC")];
        let mut sa = SplitAligner::new();
        sa.layout(&params, alns);
        sa.init_matrices_for_one_query(&params, false).unwrap();
        sa.forward_splice(&params);
        sa.backward_splice(&params);
        let probs = sa.marginal_probs(0, 0, 0, 10);
        assert_eq!(probs.len(), 10);
        for (k, &p) in probs.iter().enumerate() {
            assert!(p > 0.5 && p < 1.0 + 1e-6, "column {k}: {p}");
        }
    }

    #[test]
    fn forward_split_rescales_are_finite() {
        let params = jump_params();
        let alns = vec![
            candidate("q", 0, 10, 20, "chr1", 100, 0, "ACGTACGTAC"),
            candidate("q", 10, 20, 20, "chr1", 610, 0, "GGCCGGCCGG"),
        ];
        let mut sa = SplitAligner::new();
        sa.layout(&params, alns);
        sa.init_matrices_for_one_query(&params, false).unwrap();
        sa.forward_split(&params);
        sa.backward_split(&params);
        let width = sa.max_end - sa.min_beg + 1;
        for j in 0..width {
            let r = sa.dp[sa.cur].rescales[j];
            assert!(r.is_finite() && r > 0.0);
        }
        let probs = sa.marginal_probs(0, 0, 0, 10);
        assert!(probs.iter().all(|p| p.is_finite()));
    }

    #[test]
    fn tie_break_stays_on_forward_strand() {
        // two candidates with identical scores over the same query range,
        // the forward-strand one listed second: the traceback must stay on
        // a single candidate (no spurious mid-alignment jumps), and the
        // end-score search finds the forward one first
        let params = jump_params();
        let alns = vec![
            candidate("q", 0, 10, 10, "chr1", 100, 0, "ACGTACGTAC"),
            candidate("q", 0, 10, 10, "chr2", 300, 2, "ACGTACGTAC"),
        ];
        let mut sa = SplitAligner::new();
        sa.layout(&params, alns);
        sa.init_matrices_for_one_query(&params, false).unwrap();
        let v = sa.viterbi_splice(&params);
        let parts = sa.trace_back(&params, v);
        assert_eq!(parts.len(), 1);
        assert!(sa.alns()[parts[0].aln_index].is_forward_strand());
    }
}
