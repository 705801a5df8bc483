use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use clap::Args;
use tracing::info;

use super::make_progress_bar;
use crate::hmm::profile::{Alphabet, ProfileHmm, ScoringModel};
use crate::index::kmer_index::ProbabilisticKmerIndex;
use crate::io::output::{OutputPaths, write_contigs};
use crate::io::run_info::write_run_info;
use crate::io::seeds::read_seeds;
use crate::search::astar::SearchParams;
use crate::search::driver::{DriverConfig, SearchDriver};
use crate::search::weight::WeightPolicy;

#[derive(Args, Debug)]
#[command(about = "Assemble gene contigs from seeds guided by a profile HMM")]
pub struct SearchArgs {
    /// Index file written by `build`
    #[arg(short = 'i', long)]
    pub index: PathBuf,
    /// Profile HMM (JSON)
    #[arg(short = 'm', long)]
    pub hmm: PathBuf,
    /// Seed file: `kmer column [frame_ok]` per line
    #[arg(short = 's', long)]
    pub seeds: PathBuf,
    /// Output directory
    #[arg(short = 'o', long)]
    pub output: PathBuf,
    /// Paths to report per seed and direction
    #[arg(long, default_value_t = 1)]
    pub k_best: usize,
    /// Heuristic weight: `w`, `static:w`, `decay:max` or `decay:base:max`
    #[arg(long, default_value = "1.0")]
    pub weight: String,
    /// Negative-streak budget before a path is pruned (negative disables)
    #[arg(long, default_value_t = SearchParams::default().prune_budget, allow_negative_numbers = true)]
    pub prune: i32,
    /// Deviation rounds allowed per reported path
    #[arg(long, default_value_t = SearchParams::default().max_rounds_per_path)]
    pub max_rounds: usize,
    /// Wall-clock budget per seed and direction in seconds (0 = unlimited)
    #[arg(long, default_value_t = 0.0)]
    pub timeout_secs: f64,
    /// Number of threads (0 = all cores)
    #[arg(short = 't', long, default_value_t = 0)]
    pub threads: usize,
    /// Require a protein model
    #[arg(long)]
    pub protein: bool,
    /// Suppress progress output
    #[arg(long)]
    pub quiet: bool,
}

impl SearchArgs {
    fn driver_config(&self) -> Result<DriverConfig> {
        if self.k_best == 0 {
            bail!("--k-best must be at least 1");
        }
        if !self.timeout_secs.is_finite() || self.timeout_secs < 0.0 {
            bail!("--timeout-secs must be a non-negative number");
        }
        let weight: WeightPolicy = self.weight.parse()?;
        Ok(DriverConfig {
            threads: self.threads,
            timeout: (self.timeout_secs > 0.0).then(|| Duration::from_secs_f64(self.timeout_secs)),
            params: SearchParams {
                prune_budget: self.prune,
                weight,
                k_best: self.k_best,
                max_rounds_per_path: self.max_rounds.max(1),
            },
        })
    }
}

pub fn run(args: SearchArgs) -> Result<()> {
    let start = Instant::now();
    let config = args.driver_config()?;

    info!("Loading index from {}", args.index.display());
    let index = ProbabilisticKmerIndex::load_from_path(&args.index)?;
    let hmm = ProfileHmm::load_json(&args.hmm)?;
    let protein = hmm.alphabet() == Alphabet::Protein;
    if args.protein && !protein {
        bail!("--protein given but model '{}' is a nucleotide model", hmm.name());
    }
    info!(
        "Model '{}': {} columns, {} alphabet; index k={}",
        hmm.name(),
        hmm.num_columns(),
        if protein { "protein" } else { "nucleotide" },
        index.k()
    );

    let seeds = read_seeds(&args.seeds, index.k(), protein)?;
    if seeds.is_empty() {
        bail!("no usable seeds in {}", args.seeds.display());
    }

    std::fs::create_dir_all(&args.output)
        .with_context(|| format!("failed to create output directory {}", args.output.display()))?;
    let paths = OutputPaths::new(&args.output);

    let driver = SearchDriver::new(&index, &hmm, config)?;
    let progress = make_progress_bar(args.quiet, "seeds searched");
    let results = driver.run(&seeds, &progress);
    progress.finish_and_clear();
    let results = results?;

    let num_contigs = write_contigs(&paths, &results, protein)?;
    let elapsed = start.elapsed().as_secs_f64();
    info!(
        "Wrote {} contigs to {} in {:.2}s",
        num_contigs,
        args.output.display(),
        elapsed
    );

    let cmdline: Vec<String> = std::env::args().collect();
    write_run_info(
        &paths.run_info,
        &driver.stats().snapshot(),
        num_contigs,
        &cmdline.join(" "),
        elapsed,
    )?;

    Ok(())
}
