//! Affine and piecewise-affine gap cost model.

/// One linear gap-cost piece: a length-k gap costs `open + k * grow`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GapPiece {
    pub open: i32,
    pub grow: i32,
}

impl GapPiece {
    pub fn cost(&self, len: usize) -> i32 {
        self.open + self.grow * len as i32
    }
}

/// Gap costs for deletions (gap in sequence 2) and insertions (gap in
/// sequence 1), a pair cost for unaligned letters on both sides, and a
/// frameshift cost for translated alignment.
///
/// With several pieces per side, the cost of a length-k gap is the minimum
/// over pieces.  `is_affine` means one piece per side and no pair cost, which
/// enables the simpler DP recurrences.
#[derive(Debug, Clone)]
pub struct GapCosts {
    pub del_pieces: Vec<GapPiece>,
    pub ins_pieces: Vec<GapPiece>,
    pub pair_cost: i32,
    pub frameshift_cost: i32,
    is_affine: bool,
    is_new_frameshifts: bool,
}

impl GapCosts {
    /// Plain affine model, same cost on both sides.
    pub fn affine(open: i32, grow: i32) -> Self {
        GapCosts {
            del_pieces: vec![GapPiece { open, grow }],
            ins_pieces: vec![GapPiece { open, grow }],
            pair_cost: 0,
            frameshift_cost: 0,
            is_affine: true,
            is_new_frameshifts: false,
        }
    }

    /// General model.  `pair_cost <= 0` disables the both-sides gap state.
    pub fn new(
        del_pieces: Vec<GapPiece>,
        ins_pieces: Vec<GapPiece>,
        pair_cost: i32,
        frameshift_cost: i32,
        is_new_frameshifts: bool,
    ) -> Self {
        assert!(!del_pieces.is_empty() && !ins_pieces.is_empty());
        let is_affine =
            del_pieces.len() == 1 && ins_pieces.len() == 1 && pair_cost <= 0 && !is_new_frameshifts;
        GapCosts {
            del_pieces,
            ins_pieces,
            pair_cost,
            frameshift_cost,
            is_affine,
            is_new_frameshifts,
        }
    }

    pub fn with_frameshift(mut self, frameshift_cost: i32, is_new_frameshifts: bool) -> Self {
        self.frameshift_cost = frameshift_cost;
        self.is_new_frameshifts = is_new_frameshifts;
        if is_new_frameshifts {
            self.is_affine = false;
        }
        self
    }

    pub fn is_affine(&self) -> bool {
        self.is_affine
    }

    pub fn is_new_frameshifts(&self) -> bool {
        self.is_new_frameshifts
    }

    fn side_cost(pieces: &[GapPiece], len: usize) -> i32 {
        pieces
            .iter()
            .map(|p| p.cost(len))
            .min()
            .expect("gap model has at least one piece")
    }

    /// Cost of a gap with `g1` unaligned letters in sequence 1 (a deletion
    /// relative to sequence 2) and `g2` in sequence 2 (an insertion).  When
    /// both are nonzero, both sides are charged plus `pair_cost`.
    pub fn cost(&self, g1: usize, g2: usize) -> i32 {
        let mut c = 0;
        if g1 > 0 {
            c += Self::side_cost(&self.del_pieces, g1);
        }
        if g2 > 0 {
            c += Self::side_cost(&self.ins_pieces, g2);
        }
        if g1 > 0 && g2 > 0 {
            c += self.pair_cost;
        }
        c
    }
}

/// Gap size and frame shift between two sequence-2 coordinates of a
/// translated alignment.  `end` and `beg` are amino-acid coordinates into
/// the 3-frame layout; the DNA-level distance decomposes into whole codons
/// plus a shift of -1, 0, or +1 (skipped bases mod 3).
pub fn size_and_frameshift(end: usize, beg: usize, frame_size: usize) -> (usize, bool) {
    if frame_size == 0 {
        return (beg - end, false);
    }
    let dna_end = aa_to_dna(end, frame_size);
    let dna_beg = aa_to_dna(beg, frame_size);
    let d = dna_beg - dna_end;
    (d / 3, d % 3 != 0)
}

/// Amino-acid coordinate (3-frame layout) to DNA coordinate.
#[inline]
pub fn aa_to_dna(aa_coord: usize, frame_size: usize) -> usize {
    if frame_size == 0 {
        return aa_coord;
    }
    let frame = aa_coord / frame_size;
    let cs = aa_coord % frame_size;
    cs * 3 + frame
}

/// DNA coordinate to amino-acid coordinate (3-frame layout).  Wrapping, so a
/// "coordinate" of -1 in two's complement maps consistently back.
#[inline]
pub fn dna_to_aa(dna_coord: usize, frame_size: usize) -> usize {
    if frame_size == 0 {
        return dna_coord;
    }
    let frame = dna_coord % 3;
    let cs = dna_coord / 3;
    frame.wrapping_mul(frame_size).wrapping_add(cs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn affine_cost() {
        let g = GapCosts::affine(11, 1);
        assert!(g.is_affine());
        assert_eq!(g.cost(0, 3), 14);
        assert_eq!(g.cost(3, 0), 14);
        assert_eq!(g.cost(0, 0), 0);
    }

    #[test]
    fn piecewise_takes_cheapest() {
        let pieces = vec![GapPiece { open: 10, grow: 2 }, GapPiece { open: 30, grow: 0 }];
        let g = GapCosts::new(pieces.clone(), pieces, 0, 0, false);
        assert!(!g.is_affine());
        // short gap: linear piece wins; long gap: flat piece wins
        assert_eq!(g.cost(0, 2), 14);
        assert_eq!(g.cost(0, 50), 30);
    }

    #[test]
    fn pair_cost_charged_once() {
        let g = GapCosts::new(
            vec![GapPiece { open: 5, grow: 1 }],
            vec![GapPiece { open: 5, grow: 1 }],
            4,
            0,
            false,
        );
        assert_eq!(g.cost(2, 3), 7 + 8 + 4);
    }

    #[test]
    fn aa_dna_round_trip() {
        let frame_size = 10;
        for aa in 0..30 {
            let dna = aa_to_dna(aa, frame_size);
            assert_eq!(dna_to_aa(dna, frame_size), aa);
        }
    }

    #[test]
    fn frameshift_detection() {
        let frame_size = 10;
        // same frame, one codon apart: no shift
        let a = dna_to_aa(3, frame_size);
        let b = dna_to_aa(6, frame_size);
        let (_, shifted) = size_and_frameshift(a, b, frame_size);
        assert!(!shifted);
        // one base off: shift
        let c = dna_to_aa(7, frame_size);
        let (_, shifted) = size_and_frameshift(a, c, frame_size);
        assert!(shifted);
    }
}
