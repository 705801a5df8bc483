pub mod build;
pub mod search;
mod stats;

use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

#[derive(Parser, Debug)]
#[command(name = "genewalk-rs")]
#[command(version, about = "Gene-targeted assembly guided by profile HMMs")]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    Build(build::BuildArgs),
    Search(search::SearchArgs),
    Stats(stats::StatsArgs),
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Build(args) => build::run(args),
        Commands::Search(args) => search::run(args),
        Commands::Stats(args) => stats::run(args),
    }
}

/// Spinner counting processed `items`; hidden when `quiet`.
pub(crate) fn make_progress_bar(quiet: bool, items: &str) -> ProgressBar {
    if quiet {
        ProgressBar::hidden()
    } else {
        let pb = ProgressBar::new_spinner();
        pb.set_draw_target(ProgressDrawTarget::stderr_with_hz(1));
        let template = format!("{{spinner:.green}} [{{elapsed_precise}}] {{human_pos}} {items} ({{per_sec}})");
        pb.set_style(ProgressStyle::with_template(&template).unwrap_or_else(|_| ProgressStyle::default_spinner()));
        pb.enable_steady_tick(Duration::from_millis(1_000));
        pb
    }
}
