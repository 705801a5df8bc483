//! Cursor over the implicit de Bruijn graph.
//!
//! A [`GraphWalker`] holds a shared handle to a sealed (or counting)
//! [`ProbabilisticKmerIndex`] plus its own mutable position: the current
//! k-mer, its hash pair, and the symbols emitted since the last re-entry.
//! Extensions are attempted in canonical order A, C, G, T. Because the
//! boundary symbol of the current window is the last one tried at that depth,
//! the emitted buffer doubles as the per-depth "tried symbol" stack.
//!
//! Every primitive either succeeds and moves the cursor, or fails and leaves
//! it untouched.

use smallvec::SmallVec;

use crate::hmm::codon::GeneticCode;
use crate::index::kmer::{PackedKmer, SYMBOLS, Symbol};
use crate::index::kmer_index::ProbabilisticKmerIndex;
use crate::index::rolling_hash::{HashPair, RollingHasher};

/// Which end of the window grows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Append on the right (3' extension).
    Right,
    /// Prepend on the left (5' extension).
    Left,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Right => "right",
            Direction::Left => "left",
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One enumerated extension: the k-mer reached and the symbols emitted to
/// reach it, in sequence (5'->3') order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Step {
    pub kmer: PackedKmer,
    pub hashes: HashPair,
    pub symbols: [Symbol; 3],
    pub width: u8,
}

impl Step {
    #[inline]
    pub fn nucleotides(&self) -> &[Symbol] {
        &self.symbols[..self.width as usize]
    }
}

pub struct GraphWalker<'a> {
    index: &'a ProbabilisticKmerIndex,
    hasher: RollingHasher,
    direction: Direction,
    code: GeneticCode,
    /// K-mer at the last re-entry point.
    base: PackedKmer,
    kmer: PackedKmer,
    hashes: HashPair,
    /// Symbols emitted since `base`, in walking order.
    emitted: Vec<Symbol>,
}

impl<'a> GraphWalker<'a> {
    /// Position a walker on `start`. The start k-mer itself is not required
    /// to be present in the index.
    pub fn new(index: &'a ProbabilisticKmerIndex, direction: Direction, start: PackedKmer) -> Self {
        debug_assert_eq!(start.len(), index.k());
        let hasher = *index.hasher();
        Self {
            index,
            hasher,
            direction,
            code: GeneticCode::default(),
            base: start,
            kmer: start,
            hashes: hasher.hash_kmer(&start),
            emitted: Vec::with_capacity(64),
        }
    }

    /// Translation table used by the codon operations.
    pub fn with_genetic_code(mut self, code: GeneticCode) -> Self {
        self.code = code;
        self
    }

    #[inline]
    pub fn kmer(&self) -> PackedKmer {
        self.kmer
    }

    #[inline]
    pub fn hashes(&self) -> HashPair {
        self.hashes
    }

    #[inline]
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Number of symbols emitted since the last re-entry.
    #[inline]
    pub fn depth(&self) -> usize {
        self.emitted.len()
    }

    /// Emitted symbols in walking order.
    pub fn emitted(&self) -> &[Symbol] {
        &self.emitted
    }

    /// Re-enter at a previously visited k-mer. Backtracking history is
    /// discarded.
    pub fn jump_to(&mut self, kmer: PackedKmer, hashes: HashPair) {
        self.base = kmer;
        self.kmer = kmer;
        self.hashes = hashes;
        self.emitted.clear();
    }

    // -----------------------------------------------------------------------
    // Window arithmetic
    // -----------------------------------------------------------------------

    /// Window and hashes after growing by `sym`.
    #[inline]
    fn extended(&self, sym: Symbol) -> (PackedKmer, HashPair) {
        match self.direction {
            Direction::Right => (
                self.kmer.shift_left(sym),
                self.hasher.pair_update_right(self.hashes, self.kmer.first(), sym),
            ),
            Direction::Left => (
                self.kmer.shift_right(sym),
                self.hasher.pair_update_left(self.hashes, self.kmer.last(), sym),
            ),
        }
    }

    /// Window and hashes with the growing-end symbol swapped for `sym`.
    #[inline]
    fn replaced(&self, sym: Symbol) -> (PackedKmer, HashPair) {
        match self.direction {
            Direction::Right => (
                self.kmer.with_last(sym),
                self.hasher.pair_replace_right(self.hashes, self.kmer.last(), sym),
            ),
            Direction::Left => (
                self.kmer.with_first(sym),
                self.hasher.pair_replace_left(self.hashes, self.kmer.first(), sym),
            ),
        }
    }

    /// Symbol at walking position `pos` of `base ++ emitted`.
    #[inline]
    fn walked_symbol(&self, pos: usize) -> Symbol {
        let k = self.base.len();
        if pos >= k {
            return self.emitted[pos - k];
        }
        match self.direction {
            Direction::Right => self.base.symbol_at(pos),
            Direction::Left => self.base.symbol_at(k - 1 - pos),
        }
    }

    #[inline]
    fn push(&mut self, sym: Symbol) {
        let (kmer, hashes) = self.extended(sym);
        self.kmer = kmer;
        self.hashes = hashes;
        self.emitted.push(sym);
    }

    // -----------------------------------------------------------------------
    // Single-symbol primitives
    // -----------------------------------------------------------------------

    /// Extend by the first present symbol.
    pub fn probe(&mut self) -> Option<Symbol> {
        for sym in SYMBOLS {
            let (kmer, hashes) = self.extended(sym);
            if self.index.contains_hashes(hashes) {
                self.kmer = kmer;
                self.hashes = hashes;
                self.emitted.push(sym);
                return Some(sym);
            }
        }
        None
    }

    /// Move the last emitted symbol to the next present one in canonical
    /// order.
    pub fn replace(&mut self) -> Option<Symbol> {
        let current = *self.emitted.last()?;
        for sym in (current + 1)..4 {
            let (kmer, hashes) = self.replaced(sym);
            if self.index.contains_hashes(hashes) {
                self.kmer = kmer;
                self.hashes = hashes;
                if let Some(last) = self.emitted.last_mut() {
                    *last = sym;
                }
                return Some(sym);
            }
        }
        None
    }

    /// Retract the last emitted symbol.
    pub fn backup(&mut self) -> Option<Symbol> {
        let out = self.emitted.pop()?;
        let restored = self.walked_symbol(self.emitted.len());
        match self.direction {
            Direction::Right => {
                self.hashes = self.hasher.pair_update_left(self.hashes, out, restored);
                self.kmer = self.kmer.shift_right(restored);
            }
            Direction::Left => {
                self.hashes = self.hasher.pair_update_right(self.hashes, out, restored);
                self.kmer = self.kmer.shift_left(restored);
            }
        }
        Some(out)
    }

    // -----------------------------------------------------------------------
    // Codon primitives
    // -----------------------------------------------------------------------

    /// The last three emitted symbols in sequence order.
    pub fn current_codon(&self) -> Option<[Symbol; 3]> {
        let n = self.emitted.len();
        if n < 3 {
            return None;
        }
        let e = &self.emitted[n - 3..];
        Some(match self.direction {
            Direction::Right => [e[0], e[1], e[2]],
            Direction::Left => [e[2], e[1], e[0]],
        })
    }

    /// Depth-first search for the next present non-stop codon.
    ///
    /// `placed` codon symbols are currently on the walker. With `advance`
    /// set, the current partial assignment is considered used and the search
    /// moves past it. On failure every placed symbol has been retracted.
    fn seek_codon(&mut self, mut placed: usize, mut advance: bool) -> Option<[Symbol; 3]> {
        loop {
            if advance {
                if placed == 0 {
                    return None;
                }
                if self.replace().is_some() {
                    advance = false;
                } else {
                    self.backup();
                    placed -= 1;
                }
                continue;
            }
            if placed == 3 {
                match self.current_codon() {
                    Some(codon) if !self.code.is_stop(codon) => return Some(codon),
                    _ => advance = true,
                }
                continue;
            }
            if self.probe().is_some() {
                placed += 1;
            } else {
                advance = true;
            }
        }
    }

    /// Extend by the first present codon that does not translate to a stop.
    pub fn next_codon(&mut self) -> Option<[Symbol; 3]> {
        self.seek_codon(0, false)
    }

    /// Replace the current codon by the next present non-stop codon. Stop
    /// codons are skipped, codons ordered after them are still visited.
    pub fn sibling_codon(&mut self) -> Option<[Symbol; 3]> {
        if self.emitted.len() < 3 {
            return None;
        }
        let n = self.emitted.len();
        let saved = [self.emitted[n - 3], self.emitted[n - 2], self.emitted[n - 1]];
        let found = self.seek_codon(3, true);
        if found.is_none() {
            for sym in saved {
                self.push(sym);
            }
        }
        found
    }

    // -----------------------------------------------------------------------
    // Enumeration
    // -----------------------------------------------------------------------

    fn step(&self, symbols: [Symbol; 3], width: u8) -> Step {
        Step {
            kmer: self.kmer,
            hashes: self.hashes,
            symbols,
            width,
        }
    }

    /// All present one-symbol extensions of the current position.
    pub fn extensions(&mut self) -> SmallVec<[Step; 4]> {
        let mut out = SmallVec::new();
        let Some(sym) = self.probe() else {
            return out;
        };
        out.push(self.step([sym, 0, 0], 1));
        while let Some(sym) = self.replace() {
            out.push(self.step([sym, 0, 0], 1));
        }
        self.backup();
        out
    }

    /// All present non-stop codon extensions of the current position.
    pub fn codon_extensions(&mut self) -> SmallVec<[Step; 8]> {
        let mut out = SmallVec::new();
        let Some(codon) = self.next_codon() else {
            return out;
        };
        out.push(self.step(codon, 3));
        while let Some(codon) = self.sibling_codon() {
            out.push(self.step(codon, 3));
        }
        for _ in 0..3 {
            self.backup();
        }
        out
    }
}

impl std::fmt::Debug for GraphWalker<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphWalker")
            .field("direction", &self.direction)
            .field("kmer", &self.kmer)
            .field("depth", &self.emitted.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
