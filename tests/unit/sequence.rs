//! Container round trips.

use std::io::BufReader;

use salto::score::SCORE_MATRIX_ROW_SIZE;
use salto::sequence::{dna_encode_table, MultiSequence};

fn from_fasta(text: &str) -> MultiSequence {
    let mut m = MultiSequence::new(1);
    let encode = dna_encode_table();
    let mut input = BufReader::new(text.as_bytes());
    while m.append_from_fasta(&mut input, &encode).unwrap() {}
    m
}

#[test]
fn to_files_from_files_preserves_bytes() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("set");
    let base = base.to_str().unwrap();

    let mut m = from_fasta(">one\nACGTACGTAA\n>two\nTTGGCC\n>three\nA\n");
    let quals: Vec<u8> = (0..m.seq().len()).map(|i| 33 + (i % 40) as u8).collect();
    m.set_quality_scores(quals, 1);
    m.to_files(base, false, false).unwrap();

    let n = MultiSequence::from_files(base, 3, 1, false, false).unwrap();
    let base2 = dir.path().join("copy");
    let base2 = base2.to_str().unwrap();
    n.to_files(base2, false, false).unwrap();

    for suffix in [".tis", ".ssp", ".sds", ".des", ".qua"] {
        let a = std::fs::read(format!("{base}{suffix}")).unwrap();
        let b = std::fs::read(format!("{base2}{suffix}")).unwrap();
        assert_eq!(a, b, "byte mismatch in {suffix}");
    }
}

#[test]
fn reverse_complement_twice_is_identity() {
    let mut m = from_fasta(">r\nACGGTTACGT\n");
    let q: Vec<u8> = (0..m.seq().len()).map(|i| i as u8).collect();
    m.set_quality_scores(q, 1);
    let pssm: Vec<i32> = (0..m.seq().len() * SCORE_MATRIX_ROW_SIZE)
        .map(|i| (i * 7 % 101) as i32 - 50)
        .collect();
    m.set_pssm(pssm);

    let seq0 = m.seq().to_vec();
    let quals0 = m.quality_scores().to_vec();
    let pssm0 = m.pssm().to_vec();
    let strand0 = m.strand(0);

    m.reverse_complement_one_sequence(0);
    assert_ne!(m.seq(), &seq0[..]);
    assert_ne!(m.strand(0), strand0);

    m.reverse_complement_one_sequence(0);
    assert_eq!(m.seq(), &seq0[..]);
    assert_eq!(m.quality_scores(), &quals0[..]);
    assert_eq!(m.pssm(), &pssm0[..]);
    assert_eq!(m.strand(0), strand0);
}

#[test]
fn bad_fasta_reports_missing_marker() {
    let mut m = MultiSequence::new(1);
    let encode = dna_encode_table();
    let mut input = BufReader::new("ACGT\n".as_bytes());
    let err = m.append_from_fasta(&mut input, &encode).unwrap_err();
    assert!(err.to_string().contains('>'));
}
