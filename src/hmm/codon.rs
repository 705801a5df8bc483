//! Genetic codes for protein-mode walking.
//!
//! Codons are indexed from their 2-bit symbols (A=0, C=1, G=2, T=3) as
//! `16*s1 + 4*s2 + s3`. Tables are stored in that order.

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

use crate::index::kmer::Symbol;

/// Stop symbol in translated output.
pub const STOP: u8 = b'*';

/// NCBI translation table 1 re-ordered to ACGT codon indexing.
const STANDARD: &[u8; 64] =
    b"KNKNTTTTRSRSIIMIQHQHPPPPRRRRLLLLEDEDAAAAGGGGVVVV*Y*YSSSS*CWCLFLF";

/// A translation table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct GeneticCode {
    id: u8,
    table: [u8; 64],
}

impl GeneticCode {
    /// Look up an NCBI translation table by id. Supported: 1, 4, 11.
    pub fn from_id(id: u8) -> Result<Self> {
        let mut table = *STANDARD;
        match id {
            1 | 11 => {}
            4 => {
                // TGA -> Trp
                table[codon_index([3, 2, 0])] = b'W';
            }
            other => bail!("unsupported genetic code {} (supported: 1, 4, 11)", other),
        }
        Ok(Self { id, table })
    }

    /// Standard code (table 11, bacterial/archaeal).
    pub fn bacterial() -> Self {
        Self {
            id: 11,
            table: *STANDARD,
        }
    }

    pub fn id(&self) -> u8 {
        self.id
    }

    /// Translate one codon to an amino-acid letter (or `*`).
    #[inline]
    pub fn translate(&self, codon: [Symbol; 3]) -> u8 {
        self.table[codon_index(codon)]
    }

    #[inline]
    pub fn is_stop(&self, codon: [Symbol; 3]) -> bool {
        self.translate(codon) == STOP
    }

    /// Translate a nucleotide symbol string in frame 0. Trailing partial
    /// codons are ignored.
    pub fn translate_symbols(&self, symbols: &[Symbol]) -> Vec<u8> {
        symbols
            .chunks_exact(3)
            .map(|c| self.translate([c[0], c[1], c[2]]))
            .collect()
    }
}

impl Default for GeneticCode {
    fn default() -> Self {
        Self::bacterial()
    }
}

impl TryFrom<u8> for GeneticCode {
    type Error = anyhow::Error;

    fn try_from(id: u8) -> Result<Self> {
        Self::from_id(id)
    }
}

impl From<GeneticCode> for u8 {
    fn from(code: GeneticCode) -> u8 {
        code.id
    }
}

#[inline]
pub fn codon_index(codon: [Symbol; 3]) -> usize {
    ((codon[0] & 3) as usize) << 4 | ((codon[1] & 3) as usize) << 2 | (codon[2] & 3) as usize
}
