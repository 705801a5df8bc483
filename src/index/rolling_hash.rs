//! Cyclic-polynomial rolling hash over 2-bit nucleotide windows.
//!
//! Each symbol owns a random 64-bit mask. The hash of a window
//! `s[0..L]` is `XOR_i rotl(mask[s_i], L - 1 - i)`. Because rotation
//! distributes over xor, sliding the window by one symbol in either direction
//! is an O(1) update that is bit-identical to recomputing the hash from
//! scratch.
//!
//! The reverse-complement hash is kept in lock-step: appending `s` on the
//! right of the forward strand prepends `complement(s)` on the left of the
//! reverse strand, so every forward operation has a mirrored reverse one.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::kmer::{PackedKmer, Symbol, complement};

// ---------------------------------------------------------------------------
// HashMasks
// ---------------------------------------------------------------------------

/// Per-symbol random masks.
///
/// Constructed once and threaded through every index that uses it. Two
/// indices only answer consistently for the same k-mer if they share masks,
/// which is why the masks are persisted with the index snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashMasks {
    masks: [u64; 4],
}

impl HashMasks {
    /// Deterministic masks derived from `seed`.
    pub fn from_seed(seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        Self::from_rng(&mut rng)
    }

    /// Masks from OS entropy.
    pub fn random() -> Self {
        Self::from_rng(&mut rand::thread_rng())
    }

    fn from_rng<R: Rng>(rng: &mut R) -> Self {
        let mut masks = [0u64; 4];
        for m in masks.iter_mut() {
            // Reject degenerate masks; a zero mask would make the symbol invisible.
            loop {
                let v: u64 = rng.r#gen();
                if v.count_ones() >= 8 && v.count_zeros() >= 8 {
                    *m = v;
                    break;
                }
            }
        }
        Self { masks }
    }

    /// Rebuild from persisted values.
    pub fn from_raw(masks: [u64; 4]) -> Self {
        Self { masks }
    }

    /// Raw mask values (for persistence).
    pub fn raw(&self) -> [u64; 4] {
        self.masks
    }

    #[inline]
    fn get(&self, s: Symbol) -> u64 {
        self.masks[(s & 3) as usize]
    }
}

// ---------------------------------------------------------------------------
// HashPair
// ---------------------------------------------------------------------------

/// Forward and reverse-complement hash of one window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct HashPair {
    pub fwd: u64,
    pub rc: u64,
}

impl HashPair {
    /// Orientation-independent representative.
    #[inline]
    pub fn canonical(&self) -> u64 {
        self.fwd.min(self.rc)
    }
}

// ---------------------------------------------------------------------------
// RollingHasher
// ---------------------------------------------------------------------------

/// Rolling hash operations for windows of length `k`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RollingHasher {
    masks: HashMasks,
    k: u32,
}

impl RollingHasher {
    pub fn new(masks: HashMasks, k: usize) -> Self {
        Self {
            masks,
            k: k as u32,
        }
    }

    #[inline]
    pub fn k(&self) -> usize {
        self.k as usize
    }

    #[inline]
    pub fn masks(&self) -> &HashMasks {
        &self.masks
    }

    // -----------------------------------------------------------------------
    // Single-strand primitives
    // -----------------------------------------------------------------------

    /// Append `sym` on the right of a window that is being built up.
    #[inline]
    pub fn eat_right(&self, h: u64, sym: Symbol) -> u64 {
        h.rotate_left(1) ^ self.masks.get(sym)
    }

    /// Prepend `sym` on the left of a window currently holding `depth` symbols.
    #[inline]
    pub fn eat_left(&self, h: u64, depth: usize, sym: Symbol) -> u64 {
        h ^ self.masks.get(sym).rotate_left(depth as u32)
    }

    /// Slide right: `out` leaves on the left, `inc` enters on the right.
    #[inline]
    pub fn update_right(&self, h: u64, out: Symbol, inc: Symbol) -> u64 {
        h.rotate_left(1) ^ self.masks.get(out).rotate_left(self.k) ^ self.masks.get(inc)
    }

    /// Slide left: `out` leaves on the right, `inc` enters on the left.
    #[inline]
    pub fn update_left(&self, h: u64, out: Symbol, inc: Symbol) -> u64 {
        (h ^ self.masks.get(out)).rotate_right(1) ^ self.masks.get(inc).rotate_left(self.k - 1)
    }

    /// Swap the rightmost symbol.
    #[inline]
    pub fn replace_right(&self, h: u64, old: Symbol, new: Symbol) -> u64 {
        h ^ self.masks.get(old) ^ self.masks.get(new)
    }

    /// Swap the leftmost symbol.
    #[inline]
    pub fn replace_left(&self, h: u64, old: Symbol, new: Symbol) -> u64 {
        h ^ self.masks.get(old).rotate_left(self.k - 1)
            ^ self.masks.get(new).rotate_left(self.k - 1)
    }

    // -----------------------------------------------------------------------
    // Strand-pair operations
    // -----------------------------------------------------------------------

    /// Hash a full window from scratch.
    pub fn hash_symbols(&self, symbols: &[Symbol]) -> HashPair {
        let mut pair = HashPair::default();
        for (depth, &s) in symbols.iter().enumerate() {
            pair = self.pair_eat_right(pair, depth, s);
        }
        pair
    }

    /// Hash a packed k-mer from scratch.
    pub fn hash_kmer(&self, kmer: &PackedKmer) -> HashPair {
        let mut pair = HashPair::default();
        for depth in 0..kmer.len() {
            pair = self.pair_eat_right(pair, depth, kmer.symbol_at(depth));
        }
        pair
    }

    /// Grow a partial window of `depth` symbols by appending `sym`.
    #[inline]
    pub fn pair_eat_right(&self, pair: HashPair, depth: usize, sym: Symbol) -> HashPair {
        HashPair {
            fwd: self.eat_right(pair.fwd, sym),
            rc: self.eat_left(pair.rc, depth, complement(sym)),
        }
    }

    /// Grow a partial window of `depth` symbols by prepending `sym`.
    #[inline]
    pub fn pair_eat_left(&self, pair: HashPair, depth: usize, sym: Symbol) -> HashPair {
        HashPair {
            fwd: self.eat_left(pair.fwd, depth, sym),
            rc: self.eat_right(pair.rc, complement(sym)),
        }
    }

    /// Slide a full window right.
    #[inline]
    pub fn pair_update_right(&self, pair: HashPair, out: Symbol, inc: Symbol) -> HashPair {
        HashPair {
            fwd: self.update_right(pair.fwd, out, inc),
            rc: self.update_left(pair.rc, complement(out), complement(inc)),
        }
    }

    /// Slide a full window left.
    #[inline]
    pub fn pair_update_left(&self, pair: HashPair, out: Symbol, inc: Symbol) -> HashPair {
        HashPair {
            fwd: self.update_left(pair.fwd, out, inc),
            rc: self.update_right(pair.rc, complement(out), complement(inc)),
        }
    }

    /// Swap the rightmost symbol of a full window.
    #[inline]
    pub fn pair_replace_right(&self, pair: HashPair, old: Symbol, new: Symbol) -> HashPair {
        HashPair {
            fwd: self.replace_right(pair.fwd, old, new),
            rc: self.replace_left(pair.rc, complement(old), complement(new)),
        }
    }

    /// Swap the leftmost symbol of a full window.
    #[inline]
    pub fn pair_replace_left(&self, pair: HashPair, old: Symbol, new: Symbol) -> HashPair {
        HashPair {
            fwd: self.replace_left(pair.fwd, old, new),
            rc: self.replace_right(pair.rc, complement(old), complement(new)),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
