//! Parallel search driver.
//!
//! One task per seed: the seed is extended right with the forward model and
//! left with the reversed model, and each extension is joined with the seed
//! and rescored on the forward model. Workers share the index and both models
//! read-only; every search owns its walker, frontier and memo. Each
//! direction runs under its own wall-clock budget. An expired budget yields
//! the best partial result, never an error, and a bad seed fails only its
//! own task.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Result, bail};
use crossbeam::channel;
use indicatif::ProgressBar;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::hmm::profile::{Alphabet, ProfileHmm, ScoringModel};
use crate::index::kmer_index::ProbabilisticKmerIndex;
use crate::io::seeds::Seed;
use crate::io::threads::ThreadConfig;

use super::astar::{HmmGraphSearch, SearchParams};
use super::cancel::CancelToken;
use super::contig::{AssembledPath, seed_alignment};
use super::walker::Direction;

/// Driver settings.
#[derive(Debug, Clone, Copy)]
pub struct DriverConfig {
    /// Worker threads (0 = all cores).
    pub threads: usize,
    /// Wall-clock budget per seed and direction.
    pub timeout: Option<Duration>,
    pub params: SearchParams,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            threads: 1,
            timeout: None,
            params: SearchParams::default(),
        }
    }
}

/// Run-wide counters, updated by every worker.
#[derive(Debug, Default)]
pub struct SearchStats {
    seeds: AtomicU64,
    tasks: AtomicU64,
    failed: AtomicU64,
    timed_out: AtomicU64,
    partial: AtomicU64,
    paths: AtomicU64,
    expanded: AtomicU64,
    anomalies: AtomicU64,
}

/// Plain copy of [`SearchStats`] for reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SearchStatsSnapshot {
    pub seeds: u64,
    pub tasks: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub partial: u64,
    pub paths: u64,
    pub expanded: u64,
    pub anomalies: u64,
}

impl SearchStats {
    pub fn snapshot(&self) -> SearchStatsSnapshot {
        SearchStatsSnapshot {
            seeds: self.seeds.load(Ordering::Relaxed),
            tasks: self.tasks.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            partial: self.partial.load(Ordering::Relaxed),
            paths: self.paths.load(Ordering::Relaxed),
            expanded: self.expanded.load(Ordering::Relaxed),
            anomalies: self.anomalies.load(Ordering::Relaxed),
        }
    }
}

/// Paths found in one direction from one seed, best first.
#[derive(Debug, Clone)]
pub struct DirectionResult {
    pub direction: Direction,
    pub paths: Vec<AssembledPath>,
    pub partial: bool,
    pub cancelled: bool,
    pub elapsed: Duration,
}

impl DirectionResult {
    fn empty(direction: Direction) -> Self {
        Self {
            direction,
            paths: Vec::new(),
            partial: false,
            cancelled: false,
            elapsed: Duration::ZERO,
        }
    }
}

/// Everything one seed task produced.
#[derive(Debug, Clone)]
pub struct SeedResult {
    /// Position of the seed in the input list.
    pub seed_index: usize,
    pub seed: Seed,
    pub left: Option<DirectionResult>,
    pub right: Option<DirectionResult>,
    /// Set when the seed could not be searched at all.
    pub error: Option<String>,
}

pub struct SearchDriver<'a> {
    index: &'a ProbabilisticKmerIndex,
    forward: &'a ProfileHmm,
    reverse: ProfileHmm,
    config: DriverConfig,
    stats: SearchStats,
    cancel: CancelToken,
}

impl<'a> SearchDriver<'a> {
    pub fn new(index: &'a ProbabilisticKmerIndex, forward: &'a ProfileHmm, config: DriverConfig) -> Result<Self> {
        if forward.alphabet() == Alphabet::Protein && index.k() % 3 != 0 {
            bail!(
                "protein models need a k-mer length divisible by 3 (index k={})",
                index.k()
            );
        }
        if forward.num_columns() == 0 {
            bail!("model '{}' has no columns", forward.name());
        }
        Ok(Self {
            index,
            forward,
            reverse: forward.reversed(),
            config,
            stats: SearchStats::default(),
            cancel: CancelToken::new(),
        })
    }

    pub fn stats(&self) -> &SearchStats {
        &self.stats
    }

    /// Abort every running and future search of this driver.
    pub fn abort(&self) {
        self.cancel.abort();
    }

    /// Model residues covered by one seed.
    pub fn seed_residues(&self) -> usize {
        match self.forward.alphabet() {
            Alphabet::Nucleotide => self.index.k(),
            Alphabet::Protein => self.index.k() / 3,
        }
    }

    /// Root columns for the right (forward model) and left (reversed model)
    /// searches from `seed`.
    pub fn root_columns(&self, seed: &Seed) -> Result<(usize, usize)> {
        let m = self.forward.num_columns();
        if seed.column == 0 || seed.column > m {
            bail!("seed column {} outside model columns 1..={}", seed.column, m);
        }
        let right = seed.column - 1 + self.seed_residues();
        if right > m {
            bail!(
                "seed at column {} covering {} residues runs past model end {}",
                seed.column,
                self.seed_residues(),
                m
            );
        }
        Ok((right, m - seed.column + 1))
    }

    fn search_direction(&self, seed: &Seed, direction: Direction, root: usize) -> Result<DirectionResult> {
        let model = match direction {
            Direction::Right => self.forward,
            Direction::Left => &self.reverse,
        };
        if root >= model.num_columns() {
            return Ok(DirectionResult::empty(direction));
        }
        self.stats.tasks.fetch_add(1, Ordering::Relaxed);

        let started = Instant::now();
        let cancel = self.cancel.child(self.config.timeout);
        let mut search = HmmGraphSearch::new(self.index, model, direction, seed.kmer, self.config.params);
        let result = search.k_best(root, &cancel);

        self.stats.expanded.fetch_add(result.expanded, Ordering::Relaxed);
        self.stats.anomalies.fetch_add(result.anomalies, Ordering::Relaxed);
        self.stats.paths.fetch_add(result.paths.len() as u64, Ordering::Relaxed);
        if result.cancelled {
            self.stats.timed_out.fetch_add(1, Ordering::Relaxed);
        }
        if result.partial {
            self.stats.partial.fetch_add(1, Ordering::Relaxed);
        }
        debug!(
            "Seed {} ({} at column {}): {} {} path(s), {} expansions{}",
            seed.line,
            seed.kmer,
            seed.column,
            result.paths.len(),
            direction,
            result.expanded,
            if result.cancelled { ", cancelled" } else { "" }
        );

        // Contigs are scored on the forward model whichever way they grew.
        let paths = result
            .paths
            .iter()
            .filter(|p| p.len() > 1)
            .map(|p| AssembledPath::assemble(self.forward, &seed.kmer, seed.column, p, direction))
            .collect::<Result<Vec<_>>>()?;

        Ok(DirectionResult {
            direction,
            paths,
            partial: result.partial,
            cancelled: result.cancelled,
            elapsed: started.elapsed(),
        })
    }

    fn search_both(&self, seed: &Seed) -> Result<(DirectionResult, DirectionResult)> {
        let (right_root, left_root) = self.root_columns(seed)?;
        seed_alignment(self.forward, &seed.kmer)?;
        if !self.index.contains(&seed.kmer) {
            debug!("Seed {} on line {} is not in the index", seed.kmer, seed.line);
        }
        let left = self.search_direction(seed, Direction::Left, left_root)?;
        let right = self.search_direction(seed, Direction::Right, right_root)?;
        Ok((left, right))
    }

    /// Search both directions from one seed.
    pub fn search_seed(&self, seed_index: usize, seed: &Seed) -> SeedResult {
        self.stats.seeds.fetch_add(1, Ordering::Relaxed);
        match self.search_both(seed) {
            Ok((left, right)) => SeedResult {
                seed_index,
                seed: *seed,
                left: Some(left),
                right: Some(right),
                error: None,
            },
            Err(e) => {
                warn!("Seed on line {} not searched: {}", seed.line, e);
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                SeedResult {
                    seed_index,
                    seed: *seed,
                    left: None,
                    right: None,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    /// Search every seed on a worker pool. Results come back in seed order.
    pub fn run(&self, seeds: &[Seed], progress: &ProgressBar) -> Result<Vec<SeedResult>> {
        let threads = ThreadConfig::new(self.config.threads).resolve();
        info!(
            "Searching {} seeds with {} threads (model '{}', {} columns)",
            seeds.len(),
            threads,
            self.forward.name(),
            self.forward.num_columns()
        );

        let results: Mutex<Vec<SeedResult>> = Mutex::new(Vec::with_capacity(seeds.len()));
        let (sender, receiver) = channel::bounded::<(usize, Seed)>(threads * 4);
        let results_ref = &results;

        crossbeam::scope(|s| {
            let recv_ref = &receiver;
            for _ in 0..threads {
                s.spawn(move |_| {
                    let mut local = Vec::new();
                    for (i, seed) in recv_ref.clone() {
                        local.push(self.search_seed(i, &seed));
                        progress.inc(1);
                    }
                    results_ref
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .append(&mut local);
                });
            }

            for (i, seed) in seeds.iter().enumerate() {
                if sender.send((i, *seed)).is_err() {
                    break;
                }
            }
            // Close the channel so workers finish
            drop(sender);
        })
        .map_err(|e| anyhow::anyhow!("thread panicked: {:?}", e))?;

        let mut results = results.into_inner().unwrap_or_else(|e| e.into_inner());
        results.sort_by_key(|r| r.seed_index);

        let stats = self.stats.snapshot();
        info!(
            "Searched {} seeds: {} paths, {} failed, {} timed out, {} partial, {} nodes expanded",
            stats.seeds, stats.paths, stats.failed, stats.timed_out, stats.partial, stats.expanded
        );
        if stats.anomalies > 0 {
            warn!("{} duplicate candidate paths were suppressed", stats.anomalies);
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hmm::{HmmState, ProfileHmmSpec};
    use crate::index::kmer::{PackedKmer, encode_base};
    use crate::search::contig::{AlignedStep, score_alignment};
    use crate::index::kmer_index::IndexConfig;
    use crate::index::rolling_hash::HashMasks;

    const GENE: &[u8] = b"ATGGCTAAGCTTGAACGTTGGCAC";

    fn setup() -> (ProbabilisticKmerIndex, ProfileHmm) {
        let config = IndexConfig {
            k: 8,
            capacity_log2: 16,
            hash_count: 4,
            block_log2: 16,
            bits_per_bucket: 1,
        };
        let mut idx = ProbabilisticKmerIndex::new(config, HashMasks::from_seed(5)).unwrap();
        idx.insert_sequence(GENE).unwrap();
        let spec = ProfileHmmSpec::from_nucleotide_consensus("gene", GENE, 0.9).unwrap();
        (idx, ProfileHmm::from_spec(&spec).unwrap())
    }

    fn seed(at: usize, column: usize, line: usize) -> Seed {
        Seed {
            kmer: PackedKmer::from_ascii(&GENE[at..at + 8]).unwrap(),
            column,
            frame_ok: true,
            line,
        }
    }

    #[test]
    fn test_root_columns() {
        let (idx, hmm) = setup();
        let driver = SearchDriver::new(&idx, &hmm, DriverConfig::default()).unwrap();
        assert_eq!(driver.root_columns(&seed(8, 9, 1)).unwrap(), (16, 16));
        assert_eq!(driver.root_columns(&seed(0, 1, 1)).unwrap(), (8, 24));
        assert_eq!(driver.root_columns(&seed(16, 17, 1)).unwrap(), (24, 8));
        assert!(driver.root_columns(&seed(16, 18, 1)).is_err());
        assert!(driver.root_columns(&seed(16, 25, 1)).is_err());
    }

    #[test]
    fn test_seed_extends_both_ways() {
        let (idx, hmm) = setup();
        let driver = SearchDriver::new(&idx, &hmm, DriverConfig::default()).unwrap();
        let res = driver.search_seed(0, &seed(8, 9, 1));
        assert!(res.error.is_none());
        let right = res.right.unwrap();
        let left = res.left.unwrap();
        assert_eq!(right.paths[0].nucleotides, &GENE[8..]);
        assert_eq!(right.paths[0].aligned, &GENE[8..]);
        assert_eq!(right.paths[0].start_column, 9);
        assert_eq!(left.paths[0].nucleotides, &GENE[..16]);
        assert_eq!(left.paths[0].start_column, 1);
        assert!(!right.partial && !left.partial);
    }

    #[test]
    fn test_contig_scores_cover_the_seed() {
        let (idx, hmm) = setup();
        let driver = SearchDriver::new(&idx, &hmm, DriverConfig::default()).unwrap();
        let res = driver.search_seed(0, &seed(8, 9, 1));
        let right = &res.right.unwrap().paths[0];
        let left = &res.left.unwrap().paths[0];

        let steps = |seq: &[u8]| -> Vec<AlignedStep> {
            seq.iter()
                .map(|&b| (HmmState::Match, Some(encode_base(b).unwrap() as usize)))
                .collect()
        };
        let whole = score_alignment(&hmm, 0, &steps(GENE));
        let seed_only = score_alignment(&hmm, 8, &steps(&GENE[8..16]));
        assert!((right.raw_score - score_alignment(&hmm, 8, &steps(&GENE[8..]))).abs() < 1e-9);
        // The seed is scored in both contigs.
        assert!((left.raw_score + right.raw_score - seed_only - whole).abs() < 1e-9);
        assert!(seed_only > 0.0);
    }

    #[test]
    fn test_seed_at_model_end_has_nothing_to_extend() {
        let (idx, hmm) = setup();
        let driver = SearchDriver::new(&idx, &hmm, DriverConfig::default()).unwrap();
        let res = driver.search_seed(0, &seed(16, 17, 1));
        assert!(res.right.unwrap().paths.is_empty());
        assert_eq!(res.left.unwrap().paths[0].nucleotides, GENE);
    }

    #[test]
    fn test_run_orders_results_and_isolates_bad_seeds() {
        let (idx, hmm) = setup();
        let config = DriverConfig {
            threads: 3,
            ..DriverConfig::default()
        };
        let driver = SearchDriver::new(&idx, &hmm, config).unwrap();
        let seeds = vec![seed(8, 9, 1), seed(0, 30, 2), seed(4, 5, 3), seed(0, 1, 4)];
        let results = driver.run(&seeds, &ProgressBar::hidden()).unwrap();
        let order: Vec<usize> = results.iter().map(|r| r.seed_index).collect();
        assert_eq!(order, vec![0, 1, 2, 3]);
        assert!(results[1].error.is_some());
        assert!(results[0].error.is_none() && results[2].error.is_none());

        let stats = driver.stats().snapshot();
        assert_eq!(stats.seeds, 4);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.timed_out, 0);
        // Seed at column 1 has no left extension, so 5 searches ran.
        assert_eq!(stats.tasks, 5);
    }

    #[test]
    fn test_expired_budget_is_not_an_error() {
        let (idx, hmm) = setup();
        let config = DriverConfig {
            timeout: Some(Duration::ZERO),
            ..DriverConfig::default()
        };
        let driver = SearchDriver::new(&idx, &hmm, config).unwrap();
        let res = driver.search_seed(0, &seed(8, 9, 1));
        assert!(res.error.is_none());
        let right = res.right.unwrap();
        assert!(right.cancelled);
        assert!(right.paths.is_empty());
        assert_eq!(driver.stats().snapshot().timed_out, 2);
    }

    #[test]
    fn test_protein_model_requires_codon_k() {
        let (idx, _) = setup();
        let spec = ProfileHmmSpec::from_protein_consensus(
            "p",
            crate::hmm::GeneticCode::default(),
            b"MAKLERWH",
            0.9,
        )
        .unwrap();
        let hmm = ProfileHmm::from_spec(&spec).unwrap();
        assert!(SearchDriver::new(&idx, &hmm, DriverConfig::default()).is_err());
    }
}
