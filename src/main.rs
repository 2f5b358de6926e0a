use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;

use salto::sequence::{dna_encode_table, MultiSequence};
use salto::split::{split_one_query, SplitAligner, SplitAlignerParams, UnsplitAlignment};

#[derive(Parser)]
#[command(name = "salto")]
#[command(version = "0.3.1")]
#[command(about = "Seed-anchored local alignment and split alignment", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Pack a FASTA genome into the binary index files
    Index(IndexArgs),

    /// Split-align MAF candidate alignments of each query
    Split(SplitArgs),
}

#[derive(Args)]
struct IndexArgs {
    /// Input FASTA file
    fasta: String,

    /// Output base name
    #[arg(short, long)]
    output: String,

    /// Pack two bases per byte
    #[arg(long)]
    bits4: bool,
}

#[derive(Args)]
struct SplitArgs {
    /// Input MAF file of candidate alignments, grouped by query
    maf: String,

    /// Genome index base name (enables splice-signal scoring)
    #[arg(short, long)]
    genome: Option<String>,

    /// Match score
    #[arg(long, default_value_t = 6)]
    r#match: i32,

    /// Mismatch score
    #[arg(long, default_value_t = -18)]
    mismatch: i32,

    /// Deletion open and grow scores
    #[arg(long, default_value_t = -8)]
    del_open: i32,
    #[arg(long, default_value_t = -2)]
    del_grow: i32,

    /// Insertion open and grow scores
    #[arg(long, default_value_t = -8)]
    ins_open: i32,
    #[arg(long, default_value_t = -2)]
    ins_grow: i32,

    /// Score for a trans-splice / rearrangement jump
    #[arg(long, default_value_t = -100)]
    trans: i32,

    /// Score for restarting within the query
    #[arg(long, default_value_t = -150)]
    restart: i32,

    /// Scale between scores and log probability ratios
    #[arg(long, default_value_t = 5.0)]
    scale: f64,

    /// Prior probability of a cis-splice (0 disables the splice model)
    #[arg(long, default_value_t = 0.01)]
    cis: f64,

    /// Mean of ln(intron length)
    #[arg(long, default_value_t = 7.0)]
    mean: f64,

    /// Standard deviation of ln(intron length)
    #[arg(long, default_value_t = 1.75)]
    sdev: f64,

    /// Quality code offset (0 ignores quality lines)
    #[arg(short = 'Q', long, default_value_t = 0)]
    quality_offset: i32,

    /// Number of worker threads (0 = all cores)
    #[arg(short = 'j', long, default_value_t = 0)]
    threads: usize,

    /// Report progress and settings on stderr
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Index(args) => run_index(args)?,
        Commands::Split(args) => run_split(args)?,
    }
    Ok(())
}

fn run_index(args: IndexArgs) -> Result<()> {
    let f = File::open(&args.fasta).with_context(|| format!("can't open file: {}", args.fasta))?;
    let mut input = BufReader::new(f);
    let mut m = MultiSequence::new(2);
    let encode = dna_encode_table();
    while m.append_from_fasta(&mut input, &encode)? {}

    m.to_files(&args.output, args.bits4, false)?;
    let mut prj = BufWriter::new(
        File::create(format!("{}.prj", args.output))
            .with_context(|| format!("can't create file: {}.prj", args.output))?,
    );
    writeln!(prj, "version=1")?;
    writeln!(prj, "alphabet=ACGT")?;
    writeln!(prj, "numofsequences={}", m.finished_sequences())?;
    writeln!(prj, "volumes=1")?;
    writeln!(prj, "integersize=64")?;
    writeln!(prj, "symbolsize={}", if args.bits4 { 4 } else { 8 })?;
    Ok(())
}

/// Read the MAF file into per-query batches of candidate alignments,
/// keeping input order.
fn read_query_batches(path: &str) -> Result<Vec<Vec<UnsplitAlignment>>> {
    let f = File::open(path).with_context(|| format!("can't open file: {path}"))?;
    let mut batches: Vec<Vec<UnsplitAlignment>> = Vec::new();
    let mut block: Vec<String> = Vec::new();

    let push_block = |block: &mut Vec<String>, batches: &mut Vec<Vec<UnsplitAlignment>>| -> Result<()> {
        if block.iter().any(|l| l.starts_with('s')) {
            let aln = UnsplitAlignment::from_maf_block(block)?;
            let same_query = batches
                .last()
                .map_or(false, |batch| batch[0].qname == aln.qname);
            if same_query {
                batches.last_mut().unwrap().push(aln);
            } else {
                batches.push(vec![aln]);
            }
        }
        block.clear();
        Ok(())
    };

    for line in BufReader::new(f).lines() {
        let line = line?;
        if line.trim().is_empty() {
            push_block(&mut block, &mut batches)?;
        } else if !line.starts_with('#') {
            block.push(line);
        }
    }
    push_block(&mut block, &mut batches)?;
    Ok(batches)
}

fn run_split(args: SplitArgs) -> Result<()> {
    let mut params = SplitAlignerParams::default();
    params.set_params(
        args.del_open,
        args.del_grow,
        args.ins_open,
        args.ins_grow,
        args.trans,
        args.restart,
        args.scale,
        args.quality_offset,
    );
    params.set_simple_score_matrix(args.r#match, args.mismatch);
    params.set_splice_params(args.cis, args.mean, args.sdev);
    params.set_splice_signals();
    if let Some(genome) = &args.genome {
        params.read_genome(genome)?;
        if args.verbose {
            eprintln!("[INFO] genome loaded: {genome}");
        }
    }

    let batches = read_query_batches(&args.maf)?;
    if args.verbose {
        eprintln!("[INFO] {} queries", batches.len());
    }

    if args.threads > 0 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(args.threads)
            .build_global()
            .ok();
    }

    let bar = if args.verbose {
        let b = ProgressBar::new(batches.len() as u64);
        b.set_style(
            ProgressStyle::with_template("{bar:40} {pos}/{len} queries").unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        Some(b)
    } else {
        None
    };

    // one aligner per worker; shared read-only params
    let outputs: Result<Vec<Vec<u8>>> = batches
        .into_par_iter()
        .map_init(SplitAligner::new, |aligner, batch| {
            let mut out = Vec::new();
            split_one_query(&params, aligner, batch, &mut out)?;
            if let Some(b) = &bar {
                b.inc(1);
            }
            Ok(out)
        })
        .collect();

    if let Some(b) = &bar {
        b.finish_and_clear();
    }

    let stdout = std::io::stdout();
    let mut w = BufWriter::new(stdout.lock());
    params.print_commented(&mut w)?;
    for out in outputs? {
        w.write_all(&out)?;
    }
    w.flush()?;
    Ok(())
}
