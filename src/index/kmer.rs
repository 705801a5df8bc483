//! Strong-typed packed k-mer value.
//!
//! `PackedKmer` stores up to 64 nucleotides at 2 bits per symbol in a `u128`.
//! The leftmost symbol of the window occupies the most significant bit pair,
//! so for two k-mers of equal length the derived ordering is lexicographic
//! over A < C < G < T.
//!
//! Values are immutable: `shift_left` / `shift_right` return the neighbouring
//! k-mer obtained by sliding the window one symbol.

use anyhow::{Result, bail};

/// A nucleotide symbol in 2-bit encoding (A=0, C=1, G=2, T=3).
pub type Symbol = u8;

/// Longest supported k-mer.
pub const MAX_K: usize = 64;

/// Symbols in canonical enumeration order.
pub const SYMBOLS: [Symbol; 4] = [0, 1, 2, 3];

/// Encode an ASCII nucleotide (case-insensitive). `None` for anything else.
#[inline]
pub fn encode_base(b: u8) -> Option<Symbol> {
    match b {
        b'A' | b'a' => Some(0),
        b'C' | b'c' => Some(1),
        b'G' | b'g' => Some(2),
        b'T' | b't' => Some(3),
        _ => None,
    }
}

/// Decode a 2-bit symbol to an upper-case ASCII nucleotide.
#[inline]
pub fn decode_base(s: Symbol) -> u8 {
    b"ACGT"[(s & 3) as usize]
}

/// Watson-Crick complement of a 2-bit symbol.
#[inline]
pub fn complement(s: Symbol) -> Symbol {
    3 - (s & 3)
}

/// A k-mer of fixed length packed 2 bits per symbol.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PackedKmer {
    len: u8,
    bits: u128,
}

impl PackedKmer {
    #[inline]
    fn mask(len: usize) -> u128 {
        if len >= MAX_K {
            u128::MAX
        } else {
            (1u128 << (2 * len)) - 1
        }
    }

    /// Build from raw packed bits. Bits above `2 * len` are cleared.
    #[inline]
    pub fn from_raw(bits: u128, len: usize) -> Self {
        debug_assert!(len >= 1 && len <= MAX_K);
        Self {
            len: len as u8,
            bits: bits & Self::mask(len),
        }
    }

    /// Build from a slice of 2-bit symbols.
    pub fn from_symbols(symbols: &[Symbol]) -> Result<Self> {
        if symbols.is_empty() || symbols.len() > MAX_K {
            bail!(
                "k-mer length {} outside supported range 1..={}",
                symbols.len(),
                MAX_K
            );
        }
        let bits = symbols
            .iter()
            .fold(0u128, |acc, &s| (acc << 2) | (s & 3) as u128);
        Ok(Self::from_raw(bits, symbols.len()))
    }

    /// Parse an ASCII nucleotide string.
    pub fn from_ascii(seq: &[u8]) -> Result<Self> {
        if seq.is_empty() || seq.len() > MAX_K {
            bail!("k-mer length {} outside supported range 1..={}", seq.len(), MAX_K);
        }
        let mut bits = 0u128;
        for (i, &b) in seq.iter().enumerate() {
            let Some(s) = encode_base(b) else {
                bail!("invalid nucleotide '{}' at position {}", b as char, i);
            };
            bits = (bits << 2) | s as u128;
        }
        Ok(Self::from_raw(bits, seq.len()))
    }

    /// Number of symbols.
    #[inline]
    pub fn len(&self) -> usize {
        self.len as usize
    }

    /// Always false; a k-mer holds at least one symbol.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Raw packed bits.
    #[inline]
    pub fn bits(&self) -> u128 {
        self.bits
    }

    /// Symbol at position `i` (0 = leftmost).
    #[inline]
    pub fn symbol_at(&self, i: usize) -> Symbol {
        debug_assert!(i < self.len());
        ((self.bits >> (2 * (self.len() - 1 - i))) & 3) as Symbol
    }

    /// Leftmost symbol.
    #[inline]
    pub fn first(&self) -> Symbol {
        self.symbol_at(0)
    }

    /// Rightmost symbol.
    #[inline]
    pub fn last(&self) -> Symbol {
        (self.bits & 3) as Symbol
    }

    /// Slide the window right: drop the leftmost symbol, append `sym`.
    #[inline]
    pub fn shift_left(&self, sym: Symbol) -> Self {
        Self {
            len: self.len,
            bits: ((self.bits << 2) | (sym & 3) as u128) & Self::mask(self.len()),
        }
    }

    /// Slide the window left: drop the rightmost symbol, prepend `sym`.
    #[inline]
    pub fn shift_right(&self, sym: Symbol) -> Self {
        Self {
            len: self.len,
            bits: (self.bits >> 2) | (((sym & 3) as u128) << (2 * (self.len() - 1))),
        }
    }

    /// Replace the rightmost symbol.
    #[inline]
    pub fn with_last(&self, sym: Symbol) -> Self {
        Self {
            len: self.len,
            bits: (self.bits & !3u128) | (sym & 3) as u128,
        }
    }

    /// Replace the leftmost symbol.
    #[inline]
    pub fn with_first(&self, sym: Symbol) -> Self {
        let shift = 2 * (self.len() - 1);
        Self {
            len: self.len,
            bits: (self.bits & !(3u128 << shift)) | (((sym & 3) as u128) << shift),
        }
    }

    /// Reverse complement.
    pub fn reverse_complement(&self) -> Self {
        let mut bits = 0u128;
        let mut fw = self.bits;
        for _ in 0..self.len() {
            bits = (bits << 2) | (3 - (fw & 3));
            fw >>= 2;
        }
        Self { len: self.len, bits }
    }

    /// Symbols, leftmost first.
    pub fn symbols(&self) -> Vec<Symbol> {
        (0..self.len()).map(|i| self.symbol_at(i)).collect()
    }

    /// Upper-case ASCII rendering.
    pub fn to_ascii(&self) -> Vec<u8> {
        (0..self.len()).map(|i| decode_base(self.symbol_at(i))).collect()
    }
}

impl std::fmt::Debug for PackedKmer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PackedKmer({})", self)
    }
}

impl std::fmt::Display for PackedKmer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for i in 0..self.len() {
            write!(f, "{}", decode_base(self.symbol_at(i)) as char)?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        let km = PackedKmer::from_ascii(b"acgTTGca").unwrap();
        assert_eq!(km.len(), 8);
        assert_eq!(km.to_string(), "ACGTTGCA");
        assert_eq!(km.first(), 0);
        assert_eq!(km.last(), 0);
        assert_eq!(km.symbol_at(3), 3);
    }

    #[test]
    fn test_invalid_symbol_rejected() {
        let err = PackedKmer::from_ascii(b"ACGNT").unwrap_err().to_string();
        assert!(err.contains("invalid nucleotide 'N' at position 3"));
        assert!(PackedKmer::from_ascii(b"").is_err());
    }

    #[test]
    fn test_shift_left_and_right() {
        let km = PackedKmer::from_ascii(b"ACGT").unwrap();
        assert_eq!(km.shift_left(2).to_string(), "CGTG");
        assert_eq!(km.shift_right(3).to_string(), "TACG");
        // Shifting back restores the original window.
        assert_eq!(km.shift_left(2).shift_right(0), km);
        assert_eq!(km.shift_right(3).shift_left(3), km);
    }

    #[test]
    fn test_boundary_replacement() {
        let km = PackedKmer::from_ascii(b"ACGT").unwrap();
        assert_eq!(km.with_last(0).to_string(), "ACGA");
        assert_eq!(km.with_first(3).to_string(), "TCGT");
    }

    #[test]
    fn test_reverse_complement() {
        let km = PackedKmer::from_ascii(b"AACGTT").unwrap();
        assert_eq!(km.reverse_complement(), km);
        let km = PackedKmer::from_ascii(b"AAAC").unwrap();
        assert_eq!(km.reverse_complement().to_string(), "GTTT");
    }

    #[test]
    fn test_full_width_kmer() {
        let seq: Vec<u8> = (0..64).map(|i| b"ACGT"[i % 4]).collect();
        let km = PackedKmer::from_ascii(&seq).unwrap();
        assert_eq!(km.to_ascii(), seq);
        let shifted = km.shift_left(3);
        assert_eq!(shifted.last(), 3);
        assert_eq!(shifted.first(), 1);
    }

    #[test]
    fn test_lexicographic_order() {
        let a = PackedKmer::from_ascii(b"ACGT").unwrap();
        let b = PackedKmer::from_ascii(b"AGAA").unwrap();
        assert!(a < b);
    }
}
