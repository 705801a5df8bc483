//! Weighted A* over the implicit graph, scored by a profile HMM.
//!
//! The frontier is a min-priority heap; a key→best-score map decides whether
//! a re-arrival is worth enqueuing, and stale heap entries are dropped when
//! popped. The first node popped at column M ends the search. If the frontier
//! runs dry (or the search is cancelled) the best node seen so far is
//! reported as a partial result.

use std::collections::BinaryHeap;
use std::rc::Rc;

use ahash::{AHashMap, AHashSet};
use tracing::debug;

use crate::hmm::profile::{HmmState, ScoringModel};
use crate::index::kmer::PackedKmer;
use crate::index::kmer_index::ProbabilisticKmerIndex;
use crate::index::rolling_hash::HashPair;

use super::cancel::CancelToken;
use super::enumerator::NodeEnumerator;
use super::node::{NodeKey, SearchNode};
use super::walker::{Direction, GraphWalker, Step};
use super::weight::WeightPolicy;

/// Nodes with at least this many emitted residues escape the streak test.
pub const MIN_PRUNE_LEN: usize = 5;

/// Tunables shared by every search a driver runs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchParams {
    /// Maximum tolerated negative streak; negative disables pruning.
    pub prune_budget: i32,
    pub weight: WeightPolicy,
    /// Paths to report per seed and direction.
    pub k_best: usize,
    /// Cap on deviation rounds per accepted path in the k-best loop.
    pub max_rounds_per_path: usize,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            prune_budget: 20,
            weight: WeightPolicy::default(),
            k_best: 1,
            max_rounds_per_path: 10,
        }
    }
}

/// Result of one single-path search.
#[derive(Debug)]
pub struct SearchOutcome {
    /// Seed-first path, truncated at its best length-normalized node.
    pub path: Vec<Rc<SearchNode>>,
    /// The node at column M, if one was reached.
    pub terminal: Option<Rc<SearchNode>>,
    pub partial: bool,
    pub cancelled: bool,
    pub expanded: u64,
}

/// Cached accepted edge out of a node.
#[derive(Debug, Clone, Copy)]
pub(crate) struct MemoEdge {
    pub state: HmmState,
    pub step: Option<Step>,
}

struct Frontier {
    priority: i64,
    order: u64,
    node: Rc<SearchNode>,
}

impl Ord for Frontier {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.order.cmp(&self.order))
    }
}

impl PartialOrd for Frontier {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Frontier {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.order == other.order
    }
}

impl Eq for Frontier {}

/// Search state for one seed in one direction.
///
/// Owns its walker and the edge memo; the index and model are shared.
pub struct HmmGraphSearch<'a, M: ScoringModel> {
    pub(crate) model: &'a M,
    pub(crate) params: SearchParams,
    walker: GraphWalker<'a>,
    enumerator: NodeEnumerator<'a, M>,
    seed: PackedKmer,
    seed_hashes: HashPair,
    pub(crate) memo: AHashMap<NodeKey, MemoEdge>,
    order: u64,
    pub(crate) expanded: u64,
}

impl<'a, M: ScoringModel> HmmGraphSearch<'a, M> {
    pub fn new(
        index: &'a ProbabilisticKmerIndex,
        model: &'a M,
        direction: Direction,
        seed: PackedKmer,
        params: SearchParams,
    ) -> Self {
        let walker = GraphWalker::new(index, direction, seed)
            .with_genetic_code(model.genetic_code().unwrap_or_default());
        Self {
            model,
            params,
            walker,
            enumerator: NodeEnumerator::new(model, params.weight),
            seed,
            seed_hashes: index.hasher().hash_kmer(&seed),
            memo: AHashMap::new(),
            order: 0,
            expanded: 0,
        }
    }

    /// Seed node at `column`.
    pub fn root(&self, column: usize) -> Rc<SearchNode> {
        Rc::new(SearchNode::root(self.seed, self.seed_hashes, column))
    }

    /// Total nodes expanded by this search object.
    pub fn expanded(&self) -> u64 {
        self.expanded
    }

    fn should_expand(&self, node: &SearchNode) -> bool {
        if self.params.prune_budget < 0 {
            return true;
        }
        (node.emitted_len >= MIN_PRUNE_LEN || node.negative_streak <= self.params.prune_budget as u32)
            && node.real_score > 0.0
    }

    fn push(&mut self, heap: &mut BinaryHeap<Frontier>, node: Rc<SearchNode>) {
        self.order += 1;
        heap.push(Frontier {
            priority: node.priority,
            order: self.order,
            node,
        });
    }

    /// Successors to consider from `node`. The search root always enumerates
    /// fully; elsewhere a memoized edge is followed directly.
    fn expand(&mut self, node: &Rc<SearchNode>, is_root: bool, excluded: &[NodeKey]) -> Vec<SearchNode> {
        if !is_root {
            if let Some(edge) = self.memo.get(&node.key()).copied() {
                return self
                    .enumerator
                    .successor(node, edge.state, edge.step.as_ref())
                    .into_iter()
                    .collect();
            }
        }
        let mut succ: Vec<SearchNode> = self.enumerator.successors(node, &mut self.walker).into_iter().collect();
        if is_root && !excluded.is_empty() {
            succ.retain(|s| !excluded.contains(&s.key()));
        }
        succ
    }

    /// Best path from `root` to column M.
    ///
    /// `excluded` lists successor keys the root may not move to; `prefix`
    /// lists keys that count as already closed.
    pub fn find_path(
        &mut self,
        root: &Rc<SearchNode>,
        excluded: &[NodeKey],
        prefix: &[NodeKey],
        cancel: &CancelToken,
    ) -> SearchOutcome {
        let m = self.model.num_columns();
        let mut heap = BinaryHeap::new();
        let mut best: AHashMap<NodeKey, f64> = AHashMap::new();
        let mut closed: AHashSet<NodeKey> = prefix.iter().copied().collect();
        let mut best_goal: Option<(f64, Rc<SearchNode>)> = None;
        let mut terminal = None;
        let mut cancelled = false;
        let expanded_before = self.expanded;

        best.insert(root.key(), root.score);
        self.push(&mut heap, Rc::clone(root));

        while let Some(Frontier { node, .. }) = heap.pop() {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            let key = node.key();
            if closed.contains(&key) || best.get(&key).is_some_and(|&s| s > node.score) {
                continue;
            }
            closed.insert(key);

            if node.column >= m {
                terminal = Some(node);
                break;
            }
            let is_root = Rc::ptr_eq(&node, root);
            if !is_root {
                if !self.should_expand(&node) {
                    continue;
                }
                let g = node.goal_score();
                if best_goal.as_ref().is_none_or(|(b, _)| g > *b) {
                    best_goal = Some((g, Rc::clone(&node)));
                }
            }

            self.expanded += 1;
            for succ in self.expand(&node, is_root, excluded) {
                let sk = succ.key();
                if closed.contains(&sk) || best.get(&sk).is_some_and(|&s| s >= succ.score) {
                    continue;
                }
                best.insert(sk, succ.score);
                self.push(&mut heap, Rc::new(succ));
            }
        }

        let expanded = self.expanded - expanded_before;
        match terminal {
            Some(t) => {
                let chain = t.chain();
                let cut = best_goal_position(&chain);
                debug!(
                    "Reached column {} after {} expansions; reporting {} of {} nodes",
                    m,
                    expanded,
                    cut + 1,
                    chain.len()
                );
                SearchOutcome {
                    path: chain[..=cut].to_vec(),
                    terminal: Some(t),
                    partial: false,
                    cancelled: false,
                    expanded,
                }
            }
            None => {
                let path = match best_goal {
                    Some((_, node)) => node.chain(),
                    None => vec![Rc::clone(root)],
                };
                SearchOutcome {
                    path,
                    terminal: None,
                    partial: true,
                    cancelled,
                    expanded,
                }
            }
        }
    }

    /// Memoize the edges of `nodes` from position `from` onward. Existing
    /// entries win.
    pub(crate) fn remember(&mut self, nodes: &[Rc<SearchNode>], from: usize) {
        for pair in nodes.windows(2).skip(from) {
            let next = &pair[1];
            self.memo.entry(pair[0].key()).or_insert(MemoEdge {
                state: next.state,
                step: next.step(),
            });
        }
    }
}

/// Index of the best length-normalized node on `chain`, ignoring the seed.
/// Later nodes win ties.
fn best_goal_position(chain: &[Rc<SearchNode>]) -> usize {
    let mut best = 0;
    let mut best_score = f64::NEG_INFINITY;
    for (i, node) in chain.iter().enumerate().skip(1) {
        let g = node.goal_score();
        if g >= best_score {
            best = i;
            best_score = g;
        }
    }
    best
}
