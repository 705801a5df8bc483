//! Seed file parsing.
//!
//! One seed per line: `kmer column [frame_ok]`, whitespace separated.
//! `column` is the 1-based model column of the seed's first residue. Blank
//! lines and `#` comments are ignored. Malformed lines are skipped with a
//! warning rather than failing the run.

use std::io::BufRead;
use std::path::Path;

use anyhow::{Context, Result, bail};
use tracing::{info, warn};

use crate::index::kmer::PackedKmer;

/// A starting point for the search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Seed {
    pub kmer: PackedKmer,
    /// 1-based model column of the first seed residue.
    pub column: usize,
    /// Whether the seed is in the model's reading frame (protein mode).
    pub frame_ok: bool,
    /// Source line, for diagnostics.
    pub line: usize,
}

fn parse_flag(s: &str) -> Option<bool> {
    match s.to_ascii_lowercase().as_str() {
        "1" | "true" | "t" | "yes" | "y" => Some(true),
        "0" | "false" | "f" | "no" | "n" => Some(false),
        _ => None,
    }
}

fn parse_line(line: &str, k: usize) -> Result<(PackedKmer, usize, bool)> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 2 || fields.len() > 3 {
        bail!("expected 2 or 3 fields, found {}", fields.len());
    }
    let kmer = PackedKmer::from_ascii(fields[0].as_bytes())?;
    if kmer.len() != k {
        bail!("seed length {} does not match index k={}", kmer.len(), k);
    }
    let column: usize = fields[1]
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid column '{}'", fields[1]))?;
    if column == 0 {
        bail!("column must be 1-based");
    }
    let frame_ok = match fields.get(2) {
        Some(f) => parse_flag(f).ok_or_else(|| anyhow::anyhow!("invalid frame flag '{}'", f))?,
        None => true,
    };
    Ok((kmer, column, frame_ok))
}

/// Parse seeds for an index with k-mer length `k`.
pub fn parse_seeds<R: BufRead>(reader: R, k: usize, protein: bool) -> Result<Vec<Seed>> {
    let mut seeds = Vec::new();
    let mut skipped = 0usize;
    for (i, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("reading seed line {}", i + 1))?;
        let content = line.split('#').next().unwrap_or("").trim();
        if content.is_empty() {
            continue;
        }
        match parse_line(content, k) {
            Ok((kmer, column, frame_ok)) => {
                if protein && !frame_ok {
                    warn!("Skipping seed on line {}: not in frame", i + 1);
                    skipped += 1;
                    continue;
                }
                seeds.push(Seed {
                    kmer,
                    column,
                    frame_ok,
                    line: i + 1,
                });
            }
            Err(e) => {
                warn!("Skipping seed on line {}: {}", i + 1, e);
                skipped += 1;
            }
        }
    }
    if skipped > 0 {
        info!("Parsed {} seeds ({} skipped)", seeds.len(), skipped);
    }
    Ok(seeds)
}

/// Read a seed file (optionally compressed).
pub fn read_seeds(path: &Path, k: usize, protein: bool) -> Result<Vec<Seed>> {
    let reader = super::fastx::open_with_decompression(path)?;
    parse_seeds(std::io::BufReader::new(reader), k, protein)
        .with_context(|| format!("failed to read seeds from {}", path.display()))
}
