//! run_info.json writer: summary statistics for a search run.

use std::path::Path;

use anyhow::{Context, Result};

use crate::search::driver::SearchStatsSnapshot;

/// Write a run_info.json file with search statistics.
pub fn write_run_info(
    path: &Path,
    stats: &SearchStatsSnapshot,
    num_contigs: usize,
    cmdline: &str,
    elapsed_secs: f64,
) -> Result<()> {
    let percent_timed_out = if stats.tasks > 0 {
        (stats.timed_out as f64 / stats.tasks as f64) * 100.0
    } else {
        0.0
    };

    let info = serde_json::json!({
        "version": crate::VERSION,
        "num_seeds": stats.seeds,
        "num_tasks": stats.tasks,
        "num_failed_seeds": stats.failed,
        "num_timed_out": stats.timed_out,
        "percent_timed_out": format!("{:.2}", percent_timed_out),
        "num_partial": stats.partial,
        "num_paths": stats.paths,
        "num_contigs": num_contigs,
        "nodes_expanded": stats.expanded,
        "anomalies": stats.anomalies,
        "runtime_seconds": format!("{:.2}", elapsed_secs),
        "cmdline": cmdline,
    });

    let file = std::fs::File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    let writer = std::io::BufWriter::new(file);
    serde_json::to_writer_pretty(writer, &info)?;
    Ok(())
}
