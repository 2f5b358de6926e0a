//! Genome lookup for splice-signal scoring.
//!
//! A genome is one or more packed sequence volumes written by the indexer
//! (`.prj` plus the `MultiSequence` files).  Sequence names map to a packed
//! (sequence, volume) id so that `seq_ends` can hand out the packed bases
//! of any named sequence.

use std::fs::File;
use std::io::{BufRead, BufReader};

use anyhow::{anyhow, Context, Result};
use rustc_hash::FxHashMap;

use crate::error::SaltoError;
use crate::sequence::MultiSequence;

/// Bound on the number of volumes a genome may be split into; volume ids
/// are packed into the name index by this modulus.
pub const MAX_GENOME_VOLUMES: u64 = 64;

#[derive(Debug, Default)]
struct PrjInfo {
    version: i64,
    alphabet: String,
    seq_count: Option<u64>,
    volumes: Option<u64>,
    bits_per_int: i64,
    bits_per_base: i64,
}

fn read_prj_file(base_name: &str) -> Result<PrjInfo> {
    let file_name = format!("{base_name}.prj");
    let f = File::open(&file_name).with_context(|| format!("can't open file: {file_name}"))?;
    let mut info = PrjInfo {
        bits_per_base: 8,
        ..PrjInfo::default()
    };
    for line in BufReader::new(f).lines() {
        let line = line.with_context(|| format!("can't read file: {file_name}"))?;
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let value = value.trim();
        match key.trim() {
            "version" => info.version = value.parse().unwrap_or(0),
            "alphabet" => info.alphabet = value.to_string(),
            "numofsequences" => info.seq_count = value.parse().ok(),
            "volumes" => info.volumes = value.parse().ok(),
            "integersize" => info.bits_per_int = value.parse().unwrap_or(0),
            "symbolsize" => info.bits_per_base = value.parse().unwrap_or(8),
            _ => {}
        }
    }
    if info.alphabet != "ACGT" {
        return Err(SaltoError::InputFormat(format!("can't read file: {file_name}")).into());
    }
    if info.bits_per_int < 1 && info.version < 999 {
        info.bits_per_int = 32;
    }
    Ok(info)
}

/// A loaded genome: packed volumes plus the name index.
#[derive(Default)]
pub struct Genome {
    volumes: Vec<MultiSequence>,
    chromosome_index: FxHashMap<String, u64>,
}

impl Genome {
    /// Load a genome from its index base name, recursing into numbered
    /// volumes when it is multivolume.
    pub fn read(base_name: &str) -> Result<Genome> {
        let info = read_prj_file(base_name)?;
        let mut genome = Genome::default();

        match info.volumes {
            Some(v) if v > 1 => {
                if v > MAX_GENOME_VOLUMES {
                    return Err(anyhow!("too many volumes: {base_name}"));
                }
                for i in 0..v {
                    let b = format!("{base_name}{i}");
                    let sub = read_prj_file(&b)?;
                    genome.read_volume(&b, &sub, i as usize)?;
                }
            }
            _ => {
                genome.read_volume(base_name, &info, 0)?;
            }
        }
        Ok(genome)
    }

    fn read_volume(&mut self, base_name: &str, info: &PrjInfo, volume_number: usize) -> Result<()> {
        let seq_count = info
            .seq_count
            .ok_or_else(|| anyhow!("can't read: {base_name}"))? as usize;

        let volume = MultiSequence::from_files(
            base_name,
            seq_count,
            0,
            info.bits_per_base == 4,
            info.bits_per_int == 32,
        )?;

        for i in 0..seq_count {
            if volume.strand(i) == b'-' {
                continue;
            }
            let name = volume.seq_name(i).to_string();
            let id = i as u64 * MAX_GENOME_VOLUMES + volume_number as u64;
            if self.chromosome_index.insert(name.clone(), id).is_some() {
                return Err(
                    SaltoError::InputFormat(format!("duplicate sequence name: {name}")).into(),
                );
            }
        }
        debug_assert!(self.volumes.len() == volume_number);
        self.volumes.push(volume);
        Ok(())
    }

    /// Packed range and buffer of the named sequence.
    pub fn seq_ends(&self, seq_name: &str) -> Result<(usize, usize, &[u8])> {
        let &id = self
            .chromosome_index
            .get(seq_name)
            .ok_or_else(|| anyhow!("can't find {seq_name} in the genome"))?;
        let v = (id % MAX_GENOME_VOLUMES) as usize;
        let c = (id / MAX_GENOME_VOLUMES) as usize;
        let vol = &self.volumes[v];
        Ok((vol.seq_beg(c), vol.seq_end(c), vol.seq()))
    }

    pub fn is_empty(&self) -> bool {
        self.volumes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequence::dna_encode_table;
    use std::io::{BufReader as Br, Write};

    fn write_test_genome(dir: &std::path::Path, base: &str, fasta: &str) -> String {
        let mut m = MultiSequence::new(1);
        let encode = dna_encode_table();
        let mut input = Br::new(fasta.as_bytes());
        while m.append_from_fasta(&mut input, &encode).unwrap() {}
        let base_path = dir.join(base);
        let base_str = base_path.to_str().unwrap().to_string();
        m.to_files(&base_str, false, false).unwrap();
        let mut prj = std::fs::File::create(format!("{base_str}.prj")).unwrap();
        writeln!(prj, "version=1").unwrap();
        writeln!(prj, "alphabet=ACGT").unwrap();
        writeln!(prj, "numofsequences={}", m.finished_sequences()).unwrap();
        writeln!(prj, "volumes=1").unwrap();
        writeln!(prj, "integersize=64").unwrap();
        writeln!(prj, "symbolsize=8").unwrap();
        base_str
    }

    #[test]
    fn read_and_look_up() {
        let dir = tempfile::tempdir().unwrap();
        let base = write_test_genome(dir.path(), "g", ">chr1\nACGTACGT\n>chr2\nGGTT\n");
        let genome = Genome::read(&base).unwrap();
        let (beg, end, seq) = genome.seq_ends("chr1").unwrap();
        assert_eq!(end - beg, 8);
        assert_eq!(&seq[beg..beg + 4], &[0, 1, 2, 3]);
        let (beg2, end2, _) = genome.seq_ends("chr2").unwrap();
        assert_eq!(end2 - beg2, 4);
        assert!(genome.seq_ends("chr3").is_err());
    }

    #[test]
    fn bad_alphabet_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let base = write_test_genome(dir.path(), "g", ">c\nACGT\n");
        // overwrite the prj with a bad alphabet
        std::fs::write(
            format!("{base}.prj"),
            "version=1\nalphabet=ACGU\nnumofsequences=1\nvolumes=1\nintegersize=64\nsymbolsize=8\n",
        )
        .unwrap();
        assert!(Genome::read(&base).is_err());
    }
}
