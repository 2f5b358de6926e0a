//! Translated protein-versus-DNA extension with frameshifts.
//!
//! Sequence 1 is protein.  Sequence 2 is DNA presented as a translated
//! buffer in the 3-frame layout (`frame_size` amino acids per frame); the
//! DP itself runs in DNA coordinates, so a match column may consume 3 bases
//! (in frame), 2 or 4 bases (a +-1 frameshift) or, in the new-frameshift
//! model, 1 or 5 bases (a +-2 shift).  Every shifted step is charged
//! `gap.frameshift_cost`.  Gaps are whole codons: a deletion consumes one
//! protein letter, an insertion three bases.
//!
//! The same band serves the probabilistic passes (`forward`, `backward`,
//! `count`, `match_prob`) of the probabilistic frameshift model.

use crate::score::gap_costs::dna_to_aa;
use crate::score::{GapCosts, ScoreMatrix, NEG_INF, SCORE_MATRIX_ROW_SIZE};

// per-cell traceback byte
const STEP_MASK: u8 = 7; // 0 = none, else the number of DNA bases consumed
const PRED_SHIFT: u8 = 3; // bits 3-4: predecessor state for a match (H/D/I)
const PRED_MASK: u8 = 3 << PRED_SHIFT;
const PRED_H: u8 = 0;
const PRED_D: u8 = 1 << PRED_SHIFT;
const PRED_I: u8 = 2 << PRED_SHIFT;
const DEL_EXT: u8 = 1 << 5;
const INS_EXT: u8 = 1 << 6;
const INS_PAIR: u8 = 1 << 7;

/// Transition count layout for the probabilistic frameshift model.
pub const NUM_FRAME_TRANSITIONS: usize = 9;
const TRAN_MATCH: usize = 0;
const TRAN_DEL_OPEN: usize = 1;
const TRAN_DEL_EXT: usize = 2;
const TRAN_INS_OPEN: usize = 3;
const TRAN_INS_EXT: usize = 4;
const TRAN_FS2: usize = 5;
const TRAN_FS4: usize = 6;
const TRAN_FS1: usize = 7;
const TRAN_FS5: usize = 8;

#[derive(Debug, Clone, Copy)]
struct Frame {
    lo: usize,
    len: usize,
    offset: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FState {
    Match,
    Del,
    Ins,
}

/// One gapless chunk of a translated extension, in outward coordinates:
/// `end1` protein letters and `end2` DNA bases from the anchor, covering
/// `size` aligned columns; `gap_cost` is the cost of the gap or frameshift
/// crossed between this chunk and the next one toward the anchor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameChunk {
    pub end1: usize,
    pub end2: usize,
    pub size: usize,
    pub gap_cost: i32,
}

/// Reusable translated X-drop aligner, score and probability passes.
#[derive(Default)]
pub struct FrameshiftXdropAligner {
    rows: Vec<Frame>,
    tb: Vec<u8>,
    best_i: usize,
    best_d: usize,
    cursor: Option<(usize, usize, FState)>,
    is_new_model: bool,
    fm: Vec<f64>,
    fd: Vec<f64>,
    fi: Vec<f64>,
    bm: Vec<f64>,
    bd: Vec<f64>,
    bi: Vec<f64>,
    z: f64,
}

/// Sequence access for one translated extension.
struct FrameSeqs<'a> {
    seq1: &'a [u8],
    start1: usize,
    trans2: &'a [u8],
    dna_start: usize,
    frame_size: usize,
    is_forward: bool,
}

impl FrameSeqs<'_> {
    fn len1(&self) -> usize {
        if self.is_forward {
            self.seq1.len() - self.start1
        } else {
            self.start1
        }
    }

    fn len2_dna(&self) -> usize {
        let dna_total = self.frame_size * 3;
        if self.is_forward {
            dna_total.saturating_sub(self.dna_start)
        } else {
            self.dna_start
        }
    }

    #[inline]
    fn letter1(&self, i: usize) -> u8 {
        if self.is_forward {
            self.seq1[self.start1 + i]
        } else {
            self.seq1[self.start1 - 1 - i]
        }
    }

    /// Amino acid of the codon whose far end is `d` DNA bases out from the
    /// anchor (the 3 bases ending at outward offset `d`).
    #[inline]
    fn aa_at_end(&self, d: usize) -> Option<u8> {
        let dna_total = self.frame_size * 3;
        let abs = if self.is_forward {
            let end = self.dna_start + d;
            if end < 3 || end > dna_total {
                return None;
            }
            end - 3
        } else {
            if d > self.dna_start || self.dna_start - d + 3 > dna_total {
                return None;
            }
            self.dna_start - d
        };
        let aa = dna_to_aa(abs, self.frame_size);
        self.trans2.get(aa).copied()
    }
}

impl FrameshiftXdropAligner {
    pub fn new() -> Self {
        FrameshiftXdropAligner::default()
    }

    /// Classic frameshift model: in-frame matches plus +-1 shifts costing
    /// `gap.frameshift_cost`.
    #[allow(clippy::too_many_arguments)]
    pub fn align3(
        &mut self,
        seq1: &[u8],
        start1: usize,
        trans2: &[u8],
        dna_start: usize,
        frame_size: usize,
        is_forward: bool,
        sm: &ScoreMatrix,
        gap: &GapCosts,
        max_drop: i32,
    ) -> i32 {
        let seqs = FrameSeqs {
            seq1,
            start1,
            trans2,
            dna_start,
            frame_size,
            is_forward,
        };
        self.align_core(&seqs, sm, gap, max_drop, false)
    }

    /// New frameshift model: additionally allows +-2 shifts (1- and 5-base
    /// steps).
    #[allow(clippy::too_many_arguments)]
    pub fn align_frame(
        &mut self,
        seq1: &[u8],
        start1: usize,
        trans2: &[u8],
        dna_start: usize,
        frame_size: usize,
        is_forward: bool,
        sm: &ScoreMatrix,
        gap: &GapCosts,
        max_drop: i32,
    ) -> i32 {
        let seqs = FrameSeqs {
            seq1,
            start1,
            trans2,
            dna_start,
            frame_size,
            is_forward,
        };
        self.align_core(&seqs, sm, gap, max_drop, true)
    }

    fn steps(is_new_model: bool) -> &'static [(usize, bool)] {
        // (bases consumed, is frameshift)
        if is_new_model {
            &[(3, false), (2, true), (4, true), (1, true), (5, true)]
        } else {
            &[(3, false), (2, true), (4, true)]
        }
    }

    fn align_core(
        &mut self,
        seqs: &FrameSeqs,
        sm: &ScoreMatrix,
        gap: &GapCosts,
        max_drop: i32,
        is_new_model: bool,
    ) -> i32 {
        self.rows.clear();
        self.tb.clear();
        self.cursor = None;
        self.best_i = 0;
        self.best_d = 0;
        self.is_new_model = is_new_model;

        let del = gap.del_pieces[0];
        let ins = gap.ins_pieces[0];
        let fs_cost = gap.frameshift_cost;
        let pair_cost = if gap.pair_cost > 0 {
            Some(gap.pair_cost)
        } else {
            None
        };
        let steps = Self::steps(is_new_model);
        let max_step = steps.iter().map(|s| s.0).max().unwrap();

        let len1 = seqs.len1();
        let len2 = seqs.len2_dna();

        let mut best = 0i32;

        // row 0: origin plus codon-insertion chain
        let mut prev_lo = 0usize;
        let mut prev_h: Vec<i32> = vec![0];
        let mut prev_d: Vec<i32> = vec![NEG_INF];
        let mut prev_i: Vec<i32> = vec![NEG_INF];
        self.tb.push(0);
        {
            let mut d = 1;
            while d <= len2 {
                let mut bits = 0u8;
                let (h3, i3) = if d >= 3 {
                    (prev_h[d - 3], prev_i[d - 3])
                } else {
                    (NEG_INF, NEG_INF)
                };
                let open = h3 - ins.open - ins.grow;
                let ext = i3 - ins.grow;
                let v = if ext > open {
                    bits |= INS_EXT;
                    ext
                } else {
                    open
                };
                if v < best - max_drop {
                    break;
                }
                prev_h.push(NEG_INF);
                prev_d.push(NEG_INF);
                prev_i.push(v);
                self.tb.push(bits);
                d += 1;
            }
            self.rows.push(Frame {
                lo: 0,
                len: prev_h.len(),
                offset: 0,
            });
        }

        let mut cur_h: Vec<i32> = Vec::new();
        let mut cur_d: Vec<i32> = Vec::new();
        let mut cur_i: Vec<i32> = Vec::new();

        for i in 1..=len1 {
            let lo = prev_lo;
            let prev_hi = prev_lo + prev_h.len() - 1;
            cur_h.clear();
            cur_d.clear();
            cur_i.clear();
            let offset = self.tb.len();
            let mut first_alive = usize::MAX;
            let mut last_alive = 0usize;
            let a1 = seqs.letter1(i - 1);
            let mut d = lo;

            while d <= len2 {
                if d > prev_hi + max_step {
                    // only insertion chains reach this far; they need a live
                    // cell three bases back in this row
                    let alive = d >= lo + 3 && {
                        let x = d - 3 - lo;
                        let live = |v: Option<&i32>| v.map_or(false, |&v| v > NEG_INF / 2);
                        live(cur_i.get(x)) || live(cur_h.get(x)) || live(cur_d.get(x))
                    };
                    if !alive {
                        break;
                    }
                }
                let mut bits = 0u8;

                // match, over all step widths
                let mut h = NEG_INF;
                if let Some(aa) = seqs.aa_at_end(d) {
                    let subst = sm.score(a1, aa);
                    for &(k, is_fs) in steps {
                        if d < k || d - k < prev_lo || d - k > prev_hi {
                            continue;
                        }
                        let x = d - k - prev_lo;
                        // shifts happen only between match columns
                        let (mut t, mut pred) = (prev_h[x], PRED_H);
                        if !is_fs {
                            if prev_d[x] > t {
                                t = prev_d[x];
                                pred = PRED_D;
                            }
                            if prev_i[x] > t {
                                t = prev_i[x];
                                pred = PRED_I;
                            }
                        }
                        if t <= NEG_INF / 2 {
                            continue;
                        }
                        let mut v = t + subst;
                        if is_fs {
                            v -= fs_cost;
                        }
                        if v > h {
                            h = v;
                            bits = (bits & !(STEP_MASK | PRED_MASK)) | (k as u8) | pred;
                        }
                    }
                }

                // deletion: one protein letter, no DNA
                let mut dv = NEG_INF;
                if d >= prev_lo && d <= prev_hi {
                    let x = d - prev_lo;
                    let open = prev_h[x] - del.open - del.grow;
                    let ext = prev_d[x] - del.grow;
                    dv = if ext > open {
                        bits |= DEL_EXT;
                        ext
                    } else {
                        open
                    };
                }

                // insertion: one codon
                let mut iv = NEG_INF;
                if d >= lo + 3 && d - 3 - lo < cur_h.len() {
                    let x = d - 3 - lo;
                    let mut open = cur_h[x] - ins.open - ins.grow;
                    let mut from_pair = false;
                    if let Some(pc) = pair_cost {
                        let po = cur_d[x] - ins.open - ins.grow - pc;
                        if po > open {
                            open = po;
                            from_pair = true;
                        }
                    }
                    let ext = cur_i[x] - ins.grow;
                    iv = if ext > open {
                        bits |= INS_EXT;
                        ext
                    } else {
                        if from_pair {
                            bits |= INS_PAIR;
                        }
                        open
                    };
                }

                let t = h.max(dv).max(iv);
                let (h, dv, iv) = if t < best - max_drop {
                    (NEG_INF, NEG_INF, NEG_INF)
                } else {
                    if first_alive == usize::MAX {
                        first_alive = d;
                    }
                    last_alive = d;
                    (h, dv, iv)
                };

                if h > best {
                    best = h;
                    self.best_i = i;
                    self.best_d = d;
                }

                cur_h.push(h);
                cur_d.push(dv);
                cur_i.push(iv);
                self.tb.push(bits);
                d += 1;
            }

            if first_alive == usize::MAX {
                self.tb.truncate(offset);
                break;
            }
            self.rows.push(Frame {
                lo,
                len: cur_h.len(),
                offset,
            });

            std::mem::swap(&mut prev_h, &mut cur_h);
            std::mem::swap(&mut prev_d, &mut cur_d);
            std::mem::swap(&mut prev_i, &mut cur_i);

            if first_alive > lo {
                let cut = first_alive - lo;
                prev_h.drain(..cut);
                prev_d.drain(..cut);
                prev_i.drain(..cut);
                let frame = self.rows.last_mut().unwrap();
                frame.lo = first_alive;
                frame.offset += cut;
                frame.len -= cut;
            }
            let frame = *self.rows.last().unwrap();
            let tail = frame.lo + frame.len - 1 - last_alive;
            if tail > 0 {
                prev_h.truncate(prev_h.len() - tail);
                prev_d.truncate(prev_d.len() - tail);
                prev_i.truncate(prev_i.len() - tail);
                self.rows.last_mut().unwrap().len -= tail;
            }
            prev_lo = self.rows.last().unwrap().lo;
        }

        self.cursor = Some((self.best_i, self.best_d, FState::Match));
        best
    }

    #[inline]
    fn bits(&self, i: usize, d: usize) -> u8 {
        let f = self.rows[i];
        debug_assert!(d >= f.lo && d < f.lo + f.len);
        self.tb[f.offset + (d - f.lo)]
    }

    /// Pop the next gapless chunk, farthest from the anchor first.  Safe to
    /// call in either model; `gap_cost` is meaningful for the new model and
    /// includes frameshift charges.
    pub fn get_next_chunk(&mut self, gap: &GapCosts) -> Option<FrameChunk> {
        let (mut i, mut d, state) = self.cursor.take()?;
        debug_assert_eq!(state, FState::Match);

        let (end1, end2) = (i, d);
        let mut size = 0usize;
        let mut gap_cost = 0i32;
        loop {
            let bits = self.bits(i, d);
            let step = (bits & STEP_MASK) as usize;
            if step == 0 {
                // at the origin (or a dead end, which the best path never is)
                if size > 0 {
                    return Some(FrameChunk {
                        end1,
                        end2,
                        size,
                        gap_cost,
                    });
                }
                return None;
            }
            size += 1;
            let pred = bits & PRED_MASK;
            i -= 1;
            d -= step;
            if step == 3 && pred == PRED_H {
                continue;
            }
            if step != 3 {
                // frameshift: charge it, and the next match run starts here
                gap_cost += gap.frameshift_cost;
                self.cursor = Some((i, d, FState::Match));
                break;
            }
            // gap crossing: accumulate its cost down to the next match
            let mut state = if pred == PRED_D {
                FState::Del
            } else {
                FState::Ins
            };
            let del = gap.del_pieces[0];
            let ins = gap.ins_pieces[0];
            loop {
                match state {
                    FState::Match => break,
                    FState::Del => {
                        let b = self.bits(i, d);
                        gap_cost += del.grow;
                        i -= 1;
                        if b & DEL_EXT != 0 {
                            state = FState::Del;
                        } else {
                            gap_cost += del.open;
                            state = FState::Match;
                        }
                    }
                    FState::Ins => {
                        let b = self.bits(i, d);
                        gap_cost += ins.grow;
                        d -= 3;
                        if b & INS_EXT != 0 {
                            state = FState::Ins;
                        } else {
                            gap_cost += ins.open;
                            if b & INS_PAIR != 0 {
                                gap_cost += gap.pair_cost;
                                state = FState::Del;
                            } else {
                                state = FState::Match;
                            }
                        }
                    }
                }
            }
            self.cursor = Some((i, d, FState::Match));
            break;
        }
        Some(FrameChunk {
            end1,
            end2,
            size,
            gap_cost,
        })
    }

    // ------------------------------------------------------------------
    // probabilistic frameshift model over the same band
    // ------------------------------------------------------------------

    #[inline]
    fn cell(&self, i: usize, d: usize) -> Option<usize> {
        let f = self.rows.get(i)?;
        if d < f.lo || d >= f.lo + f.len {
            None
        } else {
            Some(f.offset + (d - f.lo))
        }
    }

    #[inline]
    fn get(v: &[f64], ix: Option<usize>) -> f64 {
        ix.map_or(0.0, |k| v[k])
    }

    /// Forward pass; returns the natural log of the partition value.
    /// `prob_drop_limit` prunes cells whose mass falls below that fraction
    /// of the running row maximum.
    #[allow(clippy::too_many_arguments)]
    pub fn forward(
        &mut self,
        seq1: &[u8],
        start1: usize,
        trans2: &[u8],
        dna_start: usize,
        frame_size: usize,
        is_forward: bool,
        probs: &[Vec<f64>],
        gap: &GapCosts,
        scale: f64,
        prob_drop_limit: f64,
    ) -> f64 {
        let seqs = FrameSeqs {
            seq1,
            start1,
            trans2,
            dna_start,
            frame_size,
            is_forward,
        };
        let ncells = self.rows.last().map_or(0, |f| f.offset + f.len);
        self.fm.clear();
        self.fm.resize(ncells, 0.0);
        self.fd.clear();
        self.fd.resize(ncells, 0.0);
        self.fi.clear();
        self.fi.resize(ncells, 0.0);

        let del = gap.del_pieces[0];
        let ins = gap.ins_pieces[0];
        let del_open = (-scale * (del.open + del.grow) as f64).exp();
        let del_ext = (-scale * del.grow as f64).exp();
        let ins_open = (-scale * (ins.open + ins.grow) as f64).exp();
        let ins_ext = (-scale * ins.grow as f64).exp();
        let fs_prob = (-scale * gap.frameshift_cost as f64).exp();
        let pair = if gap.pair_cost > 0 {
            (-scale * gap.pair_cost as f64).exp()
        } else {
            0.0
        };
        let steps = Self::steps(self.is_new_model);

        let ratio = |i: usize, d: usize| -> f64 {
            let aa = match seqs.aa_at_end(d) {
                Some(a) => a as usize,
                None => return 0.0,
            };
            let a = seqs.letter1(i - 1) as usize;
            if a < probs.len() && aa < probs.len() {
                probs[a][aa]
            } else {
                0.0
            }
        };

        let mut z = 1.0;
        let nrows = self.rows.len();
        for i in 0..nrows {
            let f = self.rows[i];
            let mut row_max = 0.0f64;
            for d in f.lo..f.lo + f.len {
                if i == 0 && d == 0 {
                    continue;
                }
                let ix = f.offset + (d - f.lo);

                let mut m = 0.0;
                if i >= 1 {
                    let r = ratio(i, d);
                    if r > 0.0 {
                        for &(k, is_fs) in steps {
                            if d < k {
                                continue;
                            }
                            let c = self.cell(i - 1, d - k);
                            let from = if is_fs {
                                let origin = if i == 1 && d == k { 1.0 } else { 0.0 };
                                fs_prob * (Self::get(&self.fm, c) + origin)
                            } else {
                                let origin = if i == 1 && d == k { 1.0 } else { 0.0 };
                                Self::get(&self.fm, c)
                                    + Self::get(&self.fd, c)
                                    + Self::get(&self.fi, c)
                                    + origin
                            };
                            m += r * from;
                        }
                    }
                }

                let mut dv = 0.0;
                if i >= 1 {
                    let c = self.cell(i - 1, d);
                    let origin = if i == 1 && d == 0 { 1.0 } else { 0.0 };
                    dv = del_open * (Self::get(&self.fm, c) + origin)
                        + del_ext * Self::get(&self.fd, c);
                }

                let mut iv = 0.0;
                if d >= 3 {
                    let c = self.cell(i, d - 3);
                    let origin = if i == 0 && d == 3 { 1.0 } else { 0.0 };
                    iv = ins_open * (Self::get(&self.fm, c) + origin)
                        + ins_ext * Self::get(&self.fi, c)
                        + ins_open * pair * Self::get(&self.fd, c);
                }

                let total = m + dv + iv;
                if total < row_max * prob_drop_limit {
                    continue; // leave zeros in place
                }
                row_max = row_max.max(total);

                self.fm[ix] = m;
                self.fd[ix] = dv;
                self.fi[ix] = iv;
                z += m;
            }
        }
        self.z = z;
        z.ln()
    }

    /// Backward pass over the same band; must follow `forward`.
    #[allow(clippy::too_many_arguments)]
    pub fn backward(
        &mut self,
        seq1: &[u8],
        start1: usize,
        trans2: &[u8],
        dna_start: usize,
        frame_size: usize,
        is_forward: bool,
        probs: &[Vec<f64>],
        gap: &GapCosts,
        scale: f64,
    ) {
        let seqs = FrameSeqs {
            seq1,
            start1,
            trans2,
            dna_start,
            frame_size,
            is_forward,
        };
        let ncells = self.rows.last().map_or(0, |f| f.offset + f.len);
        self.bm.clear();
        self.bm.resize(ncells, 0.0);
        self.bd.clear();
        self.bd.resize(ncells, 0.0);
        self.bi.clear();
        self.bi.resize(ncells, 0.0);

        let del = gap.del_pieces[0];
        let ins = gap.ins_pieces[0];
        let del_open = (-scale * (del.open + del.grow) as f64).exp();
        let del_ext = (-scale * del.grow as f64).exp();
        let ins_open = (-scale * (ins.open + ins.grow) as f64).exp();
        let ins_ext = (-scale * ins.grow as f64).exp();
        let fs_prob = (-scale * gap.frameshift_cost as f64).exp();
        let pair = if gap.pair_cost > 0 {
            (-scale * gap.pair_cost as f64).exp()
        } else {
            0.0
        };
        let steps = Self::steps(self.is_new_model);

        let ratio = |i: usize, d: usize| -> f64 {
            let aa = match seqs.aa_at_end(d) {
                Some(a) => a as usize,
                None => return 0.0,
            };
            let a = seqs.letter1(i - 1) as usize;
            if a < probs.len() && aa < probs.len() {
                probs[a][aa]
            } else {
                0.0
            }
        };

        let nrows = self.rows.len();
        for i in (0..nrows).rev() {
            let f = self.rows[i];
            for d in (f.lo..f.lo + f.len).rev() {
                let ix = f.offset + (d - f.lo);

                let mut to_match_plain = 0.0;
                let mut to_match_fs = 0.0;
                for &(k, is_fs) in steps {
                    if let Some(c) = self.cell(i + 1, d + k) {
                        let r = ratio(i + 1, d + k);
                        if is_fs {
                            to_match_fs += fs_prob * r * self.bm[c];
                        } else {
                            to_match_plain += r * self.bm[c];
                        }
                    }
                }
                let down = self.cell(i + 1, d);
                let right = self.cell(i, d + 3);

                self.bm[ix] = 1.0
                    + to_match_plain
                    + to_match_fs
                    + del_open * Self::get(&self.bd, down)
                    + ins_open * Self::get(&self.bi, right);
                self.bd[ix] = to_match_plain
                    + del_ext * Self::get(&self.bd, down)
                    + ins_open * pair * Self::get(&self.bi, right);
                self.bi[ix] = to_match_plain + ins_ext * Self::get(&self.bi, right);
            }
        }
    }

    /// Posterior probability that protein letter `i` (outward) aligns to
    /// the codon ending `d + 3` bases out.
    pub fn match_prob(&self, i: usize, d: usize) -> f64 {
        match self.cell(i + 1, d + 3) {
            Some(ix) => {
                if self.bm[ix] > f64::MAX {
                    0.0
                } else {
                    (self.fm[ix] * self.bm[ix] / self.z).min(1.0)
                }
            }
            None => 0.0,
        }
    }

    /// Accumulate expected substitution counts and the 9 transition counts.
    #[allow(clippy::too_many_arguments)]
    pub fn count(
        &self,
        seq1: &[u8],
        start1: usize,
        trans2: &[u8],
        dna_start: usize,
        frame_size: usize,
        is_forward: bool,
        probs: &[Vec<f64>],
        gap: &GapCosts,
        scale: f64,
        subs_counts: &mut [f64],
        tran_counts: &mut [f64],
    ) {
        let seqs = FrameSeqs {
            seq1,
            start1,
            trans2,
            dna_start,
            frame_size,
            is_forward,
        };
        let del = gap.del_pieces[0];
        let ins = gap.ins_pieces[0];
        let del_open = (-scale * (del.open + del.grow) as f64).exp();
        let del_ext = (-scale * del.grow as f64).exp();
        let ins_open = (-scale * (ins.open + ins.grow) as f64).exp();
        let ins_ext = (-scale * ins.grow as f64).exp();
        let fs_prob = (-scale * gap.frameshift_cost as f64).exp();
        let steps = Self::steps(self.is_new_model);

        let nrows = self.rows.len();
        for i in 1..nrows {
            let f = self.rows[i];
            for d in f.lo..f.lo + f.len {
                let ix = f.offset + (d - f.lo);
                if self.bm[ix] > f64::MAX {
                    continue;
                }
                let aa = match seqs.aa_at_end(d) {
                    Some(a) => a,
                    None => continue,
                };
                let a1 = seqs.letter1(i - 1);
                let r = if (a1 as usize) < probs.len() && (aa as usize) < probs.len() {
                    probs[a1 as usize][aa as usize]
                } else {
                    0.0
                };
                if r <= 0.0 {
                    continue;
                }
                let w = self.bm[ix] / self.z;
                for &(k, is_fs) in steps {
                    if d < k {
                        continue;
                    }
                    let c = self.cell(i - 1, d - k);
                    let origin = if i == 1 && d == k { 1.0 } else { 0.0 };
                    let from = if is_fs {
                        fs_prob * (Self::get(&self.fm, c) + origin)
                    } else {
                        Self::get(&self.fm, c)
                            + Self::get(&self.fd, c)
                            + Self::get(&self.fi, c)
                            + origin
                    };
                    let p = r * from * w;
                    if p <= 0.0 {
                        continue;
                    }
                    if !is_fs {
                        subs_counts
                            [a1 as usize * SCORE_MATRIX_ROW_SIZE + aa as usize] += p;
                        tran_counts[TRAN_MATCH] += p;
                    } else {
                        let t = match k {
                            2 => TRAN_FS2,
                            4 => TRAN_FS4,
                            1 => TRAN_FS1,
                            _ => TRAN_FS5,
                        };
                        tran_counts[t] += p;
                    }
                }
                // gap transitions
                if self.fd[ix] > 0.0 {
                    let c = self.cell(i - 1, d);
                    let opened = del_open * Self::get(&self.fm, c);
                    let wd = self.bd[ix] / self.z;
                    tran_counts[TRAN_DEL_OPEN] += opened * wd;
                    tran_counts[TRAN_DEL_EXT] +=
                        del_ext * Self::get(&self.fd, c) * wd;
                }
                if self.fi[ix] > 0.0 && d >= 3 {
                    let c = self.cell(i, d - 3);
                    let opened = ins_open * Self::get(&self.fm, c);
                    let wi = self.bi[ix] / self.z;
                    tran_counts[TRAN_INS_OPEN] += opened * wi;
                    tran_counts[TRAN_INS_EXT] +=
                        ins_ext * Self::get(&self.fi, c) * wi;
                }
            }
        }
    }
}

/// Translate DNA (alphabet indices) into the 3-frame amino-acid layout:
/// frame f occupies `[f * frame_size, (f+1) * frame_size)`.  Codons with a
/// non-ACGT base translate to the unknown symbol `alphabet_size`.
pub fn translate_3frame(
    dna: &[u8],
    genetic_code: &dyn Fn(u8, u8, u8) -> u8,
    unknown: u8,
) -> (Vec<u8>, usize) {
    let frame_size = dna.len() / 3 + 1;
    let mut out = vec![unknown; frame_size * 3];
    for f in 0..3 {
        let mut i = f;
        let mut k = 0;
        while i + 3 <= dna.len() {
            let (a, b, c) = (dna[i], dna[i + 1], dna[i + 2]);
            out[f * frame_size + k] = if a < 4 && b < 4 && c < 4 {
                genetic_code(a, b, c)
            } else {
                unknown
            };
            i += 3;
            k += 1;
        }
    }
    (out, frame_size)
}
