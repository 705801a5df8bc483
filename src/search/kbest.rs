//! k-best paths by deviation (Yen-style) on top of the single-path search.
//!
//! After a path is accepted, each of its nodes from its deviation point on
//! becomes the root of a new single-path search that may not reuse the edge
//! any explored path with the same prefix took there. Results are pooled by
//! score. A popped candidate is reported only if it visits a k-mer no
//! accepted path has visited; either way it is explored for further
//! deviations. Accepted edges are memoized so deviation searches re-entering
//! a known path follow it without enumerating.

use std::collections::BinaryHeap;
use std::time::Instant;

use ahash::AHashSet;
use tracing::{debug, warn};

use crate::hmm::profile::ScoringModel;
use crate::index::kmer::PackedKmer;

use super::astar::HmmGraphSearch;
use super::cancel::CancelToken;
use super::node::{CandidatePath, NodeKey};

/// Paths accepted for one seed and direction, best first.
#[derive(Debug, Default)]
pub struct KBestResult {
    pub paths: Vec<CandidatePath>,
    /// Set if any contributing search was cut short.
    pub partial: bool,
    pub cancelled: bool,
    pub expanded: u64,
    pub anomalies: u64,
}

impl<M: ScoringModel> HmmGraphSearch<'_, M> {
    /// Up to `params.k_best` paths from the seed placed at `column`.
    pub fn k_best(&mut self, column: usize, cancel: &CancelToken) -> KBestResult {
        let k = self.params.k_best.max(1);
        let started = Instant::now();
        let expanded_before = self.expanded;
        let root = self.root(column);
        let mut result = KBestResult::default();

        let first = self.find_path(&root, &[], &[], cancel);
        result.partial |= first.partial;
        result.cancelled |= first.cancelled;
        if first.path.len() < 2 {
            result.expanded = self.expanded - expanded_before;
            return result;
        }
        let first = CandidatePath::new(first.path, 0, first.partial, started.elapsed());
        self.remember(first.nodes(), 0);

        let mut seen: AHashSet<PackedKmer> = first.kmers();
        let mut accepted = vec![first.clone()];
        let mut explored = vec![first];
        let mut pool: BinaryHeap<CandidatePath> = BinaryHeap::new();
        let mut signatures: AHashSet<Vec<NodeKey>> = AHashSet::new();
        signatures.insert(explored[0].keys().to_vec());

        let max_rounds = k.saturating_mul(self.params.max_rounds_per_path);
        let mut rounds = 0;
        while accepted.len() < k && rounds < max_rounds {
            rounds += 1;
            let last = explored[explored.len() - 1].clone();
            let keys = last.keys();
            for i in last.deviation()..last.len() - 1 {
                if cancel.is_cancelled() {
                    result.cancelled = true;
                    break;
                }
                let excluded: Vec<NodeKey> = explored
                    .iter()
                    .filter(|p| p.len() > i + 1 && p.keys()[..=i] == keys[..=i])
                    .map(|p| p.keys()[i + 1])
                    .collect();
                let outcome = self.find_path(&last.nodes()[i], &excluded, &keys[..i], cancel);
                result.cancelled |= outcome.cancelled;
                if outcome.path.len() <= i + 1 {
                    continue;
                }
                let cand = CandidatePath::new(outcome.path, i, outcome.partial, started.elapsed());
                if let Some(dup) = accepted.iter().find(|p| p.is_exact_duplicate(&cand)) {
                    warn!(
                        "Deviation at position {} reproduced an accepted path exactly (score {:.3}, {} nodes)",
                        i,
                        dup.score(),
                        dup.len()
                    );
                    result.anomalies += 1;
                    continue;
                }
                if signatures.insert(cand.keys().to_vec()) {
                    pool.push(cand);
                }
            }
            if result.cancelled {
                break;
            }

            let Some(next) = pool.pop() else {
                break;
            };
            let novel: Vec<PackedKmer> = next.kmers().into_iter().filter(|k| !seen.contains(k)).collect();
            if novel.is_empty() {
                debug!(
                    "Candidate with score {:.3} adds no new k-mers; exploring without reporting",
                    next.score()
                );
            } else {
                seen.extend(novel);
                self.remember(next.nodes(), next.deviation());
                result.partial |= next.is_partial();
                accepted.push(next.clone());
            }
            explored.push(next);
        }

        accepted.sort_by(|a, b| b.cmp(a));
        result.paths = accepted;
        result.expanded = self.expanded - expanded_before;
        result
    }
}
