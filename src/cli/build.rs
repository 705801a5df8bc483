use anyhow::Result;
use clap::Args;
use std::path::PathBuf;

use super::make_progress_bar;
use crate::index::build::{BuildConfig, build_index};
use crate::index::kmer_index::IndexConfig;

#[derive(Args, Debug)]
#[command(about = "Build a probabilistic k-mer index from reads")]
pub struct BuildArgs {
    /// Read files (FASTA/FASTQ, optionally compressed)
    #[arg(short = 'i', long, num_args = 1.., required = true)]
    pub input: Vec<PathBuf>,
    /// Output index file
    #[arg(short = 'o', long)]
    pub output: PathBuf,
    /// K-mer length (a multiple of 3 for protein searches)
    #[arg(short = 'k', long, default_value_t = IndexConfig::default().k)]
    pub klen: usize,
    /// log2 of the number of buckets
    #[arg(long, default_value_t = IndexConfig::default().capacity_log2)]
    pub capacity_log2: u32,
    /// Probes per k-mer
    #[arg(long, default_value_t = IndexConfig::default().hash_count)]
    pub hash_count: u32,
    /// log2 of the probe block size
    #[arg(long, default_value_t = IndexConfig::default().block_log2)]
    pub block_log2: u32,
    /// Counter bits per bucket while counting (1, 2, 4 or 8)
    #[arg(long, default_value_t = IndexConfig::default().bits_per_bucket)]
    pub bits_per_bucket: u32,
    /// Minimum occurrences for a k-mer to be kept
    #[arg(short = 'c', long, default_value_t = 1)]
    pub cutoff: u32,
    /// Rescue singleton k-mers between two kept k-mers (cutoff 2 only)
    #[arg(long)]
    pub mercy: bool,
    /// Seed for the rolling-hash masks
    #[arg(short = 's', long, default_value_t = 1)]
    pub seed: u64,
    /// Suppress progress output
    #[arg(long)]
    pub quiet: bool,
}

pub fn run(args: BuildArgs) -> Result<()> {
    let config = BuildConfig {
        inputs: args.input,
        output: args.output,
        index: IndexConfig {
            k: args.klen,
            capacity_log2: args.capacity_log2,
            hash_count: args.hash_count,
            block_log2: args.block_log2,
            bits_per_bucket: args.bits_per_bucket,
        },
        seed: args.seed,
        cutoff: args.cutoff,
        mercy: args.mercy,
    };
    let progress = make_progress_bar(args.quiet, "reads processed");
    let result = build_index(&config, &progress);
    progress.finish_and_clear();
    result.map(|_| ())
}
