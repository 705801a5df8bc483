//! Search tree values.
//!
//! Structural identity ([`NodeKey`]) is deliberately separate from the
//! scores a [`SearchNode`] carries; the search keeps its own map from key to
//! best-known score.

use std::cmp::Ordering;
use std::rc::Rc;
use std::time::Duration;

use ahash::AHashSet;

use crate::hmm::profile::HmmState;
use crate::index::kmer::{PackedKmer, Symbol};
use crate::index::rolling_hash::HashPair;

use super::walker::Step;

/// Identity of a search node: where it sits in the graph and in the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeKey {
    pub kmer: PackedKmer,
    pub state: HmmState,
    pub column: u32,
}

/// Residue emitted when entering a match or insert node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Emission {
    /// Residue index in the model alphabet.
    pub residue: u8,
    /// Nucleotides in sequence order (1 or 3 used).
    pub symbols: [Symbol; 3],
    pub width: u8,
}

impl Emission {
    #[inline]
    pub fn nucleotides(&self) -> &[Symbol] {
        &self.symbols[..self.width as usize]
    }
}

pub struct SearchNode {
    pub prev: Option<Rc<SearchNode>>,
    pub kmer: PackedKmer,
    pub hashes: HashPair,
    pub column: usize,
    pub state: HmmState,
    /// Cumulative score with emissions normalized to the column maximum.
    pub score: f64,
    /// Cumulative transition + raw emission log-odds.
    pub real_score: f64,
    /// Residues emitted since the seed.
    pub emitted_len: usize,
    pub indels: u32,
    /// Consecutive steps whose real score did not improve.
    pub negative_streak: u32,
    pub emission: Option<Emission>,
    pub priority: i64,
}

impl SearchNode {
    /// The seed node: a match state at `column`.
    pub fn root(kmer: PackedKmer, hashes: HashPair, column: usize) -> Self {
        Self {
            prev: None,
            kmer,
            hashes,
            column,
            state: HmmState::Match,
            score: 0.0,
            real_score: 0.0,
            emitted_len: 0,
            indels: 0,
            negative_streak: 0,
            emission: None,
            priority: 0,
        }
    }

    #[inline]
    pub fn key(&self) -> NodeKey {
        NodeKey {
            kmer: self.kmer,
            state: self.state,
            column: self.column as u32,
        }
    }

    #[inline]
    pub fn is_root(&self) -> bool {
        self.prev.is_none()
    }

    /// Length-normalized score in bits.
    pub fn goal_score(&self) -> f64 {
        length_normalized_bits(self.real_score, self.emitted_len)
    }

    /// The walk that reached this node, seed first.
    pub fn chain(self: &Rc<Self>) -> Vec<Rc<SearchNode>> {
        let mut out = Vec::new();
        let mut cur = Some(self.clone());
        while let Some(node) = cur {
            cur = node.prev.clone();
            out.push(node);
        }
        out.reverse();
        out
    }

    /// The enumerated step that leads into this node, if it emitted.
    pub fn step(&self) -> Option<Step> {
        self.emission.map(|e| Step {
            kmer: self.kmer,
            hashes: self.hashes,
            symbols: e.symbols,
            width: e.width,
        })
    }
}

impl std::fmt::Debug for SearchNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchNode")
            .field("kmer", &self.kmer)
            .field("state", &self.state)
            .field("column", &self.column)
            .field("score", &self.score)
            .field("real_score", &self.real_score)
            .field("emitted_len", &self.emitted_len)
            .finish()
    }
}

/// `(real + L ln(L/(L+1)) + ln(1/(L+1))) / ln 2`; the length terms vanish at
/// `L = 0`.
pub fn length_normalized_bits(real: f64, len: usize) -> f64 {
    if len == 0 {
        return real / std::f64::consts::LN_2;
    }
    let l = len as f64;
    (real + l * (l / (l + 1.0)).ln() + (1.0 / (l + 1.0)).ln()) / std::f64::consts::LN_2
}

// ---------------------------------------------------------------------------
// CandidatePath
// ---------------------------------------------------------------------------

/// A complete (or best partial) path from the seed.
#[derive(Clone)]
pub struct CandidatePath {
    nodes: Vec<Rc<SearchNode>>,
    keys: Vec<NodeKey>,
    score: f64,
    /// Position of the node this path deviated from its parent path at.
    deviation: usize,
    partial: bool,
    generated: Duration,
}

impl CandidatePath {
    pub fn new(nodes: Vec<Rc<SearchNode>>, deviation: usize, partial: bool, generated: Duration) -> Self {
        let keys = nodes.iter().map(|n| n.key()).collect();
        let score = nodes.last().map(|n| n.real_score).unwrap_or(0.0);
        Self {
            nodes,
            keys,
            score,
            deviation,
            partial,
            generated,
        }
    }

    #[inline]
    pub fn nodes(&self) -> &[Rc<SearchNode>] {
        &self.nodes
    }

    #[inline]
    pub fn keys(&self) -> &[NodeKey] {
        &self.keys
    }

    /// Real score of the last node.
    #[inline]
    pub fn score(&self) -> f64 {
        self.score
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    #[inline]
    pub fn deviation(&self) -> usize {
        self.deviation
    }

    #[inline]
    pub fn is_partial(&self) -> bool {
        self.partial
    }

    /// Time from the start of the seed's search until this path was found.
    #[inline]
    pub fn generated(&self) -> Duration {
        self.generated
    }

    pub fn last(&self) -> Option<&Rc<SearchNode>> {
        self.nodes.last()
    }

    /// The first `i + 1` nodes.
    pub fn subpath(&self, i: usize) -> CandidatePath {
        CandidatePath::new(
            self.nodes[..=i].to_vec(),
            self.deviation.min(i),
            self.partial,
            self.generated,
        )
    }

    /// Distinct k-mers visited.
    pub fn kmers(&self) -> AHashSet<PackedKmer> {
        self.nodes.iter().map(|n| n.kmer).collect()
    }

    /// Same score, length and node sequence.
    pub fn is_exact_duplicate(&self, other: &CandidatePath) -> bool {
        self.score == other.score && self.keys == other.keys
    }
}

impl std::fmt::Debug for CandidatePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CandidatePath")
            .field("len", &self.nodes.len())
            .field("score", &self.score)
            .field("deviation", &self.deviation)
            .field("partial", &self.partial)
            .finish()
    }
}

/// Better paths compare greater: higher score, then longer, then the
/// lexicographically smaller node sequence.
impl Ord for CandidatePath {
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .total_cmp(&other.score)
            .then_with(|| self.keys.len().cmp(&other.keys.len()))
            .then_with(|| other.keys.cmp(&self.keys))
    }
}

impl PartialOrd for CandidatePath {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for CandidatePath {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for CandidatePath {}
