use anyhow::Result;
use clap::Args;
use serde_json::json;
use std::path::PathBuf;

use crate::index::kmer_index::ProbabilisticKmerIndex;

#[derive(Args, Debug)]
#[command(about = "Print index statistics as pretty-printed JSON")]
pub struct StatsArgs {
    /// Path to the index file
    #[arg(short, long)]
    pub index: PathBuf,
}

pub fn run(args: StatsArgs) -> Result<()> {
    let index = ProbabilisticKmerIndex::load_from_path(&args.index)?;
    let size_on_disk = std::fs::metadata(&args.index).map(|m| m.len()).ok();

    let output = json!({
        "index": index.stats(),
        "size_on_disk_bytes": size_on_disk,
        "version": crate::VERSION,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
