//! Profile HMM scoring tables.
//!
//! The search consumes a model through the [`ScoringModel`] trait: per-column
//! transition log scores for the nine profile transitions, match/insert
//! emission log-odds, the column count, the alphabet, and an admissible
//! estimate of the best score still reachable from a column.
//!
//! [`ProfileHmm`] is the in-memory implementation. It is built from
//! probabilities ([`ProfileHmmSpec`], stored as JSON) rather than parsed from
//! HMMER files. `reversed()` produces the model used for leftward extension.
//!
//! Column conventions (M = number of match columns):
//! - match emissions for columns `1..=M`
//! - insert emissions for columns `0..=M` (insert `j` sits between `j` and `j+1`)
//! - transitions out of column `j` for `j` in `0..=M`; column 0 is the begin
//!   state, treated as a match state

use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use super::codon::GeneticCode;
use crate::index::kmer::Symbol;

// ---------------------------------------------------------------------------
// States and transitions
// ---------------------------------------------------------------------------

/// Alignment state of a search node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum HmmState {
    Match,
    Insert,
    Delete,
}

/// The nine profile transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transition {
    MM = 0,
    MI = 1,
    MD = 2,
    IM = 3,
    II = 4,
    ID = 5,
    DM = 6,
    DI = 7,
    DD = 8,
}

pub const NUM_TRANSITIONS: usize = 9;

impl Transition {
    /// Transition for a `from -> to` state pair.
    pub fn between(from: HmmState, to: HmmState) -> Self {
        use HmmState::*;
        match (from, to) {
            (Match, Match) => Transition::MM,
            (Match, Insert) => Transition::MI,
            (Match, Delete) => Transition::MD,
            (Insert, Match) => Transition::IM,
            (Insert, Insert) => Transition::II,
            (Insert, Delete) => Transition::ID,
            (Delete, Match) => Transition::DM,
            (Delete, Insert) => Transition::DI,
            (Delete, Delete) => Transition::DD,
        }
    }

    /// The transition a reversed model uses for this one.
    fn reversed(self) -> Self {
        match self {
            Transition::MI => Transition::IM,
            Transition::IM => Transition::MI,
            Transition::MD => Transition::DM,
            Transition::DM => Transition::MD,
            Transition::ID => Transition::DI,
            Transition::DI => Transition::ID,
            same => same,
        }
    }
}

// ---------------------------------------------------------------------------
// Alphabet
// ---------------------------------------------------------------------------

/// Residue alphabet of a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Alphabet {
    Nucleotide,
    Protein,
}

const AMINO_ACIDS: &[u8; 20] = b"ACDEFGHIKLMNPQRSTVWY";

impl Alphabet {
    pub fn size(self) -> usize {
        match self {
            Alphabet::Nucleotide => 4,
            Alphabet::Protein => 20,
        }
    }

    /// Residue index of an ASCII letter, `None` if not in the alphabet.
    pub fn index_of(self, b: u8) -> Option<usize> {
        match self {
            Alphabet::Nucleotide => crate::index::kmer::encode_base(b).map(|s| s as usize),
            Alphabet::Protein => {
                let u = b.to_ascii_uppercase();
                AMINO_ACIDS.iter().position(|&a| a == u)
            }
        }
    }

    /// Upper-case ASCII letter of a residue index.
    pub fn letter(self, residue: usize) -> u8 {
        match self {
            Alphabet::Nucleotide => crate::index::kmer::decode_base(residue as Symbol),
            Alphabet::Protein => AMINO_ACIDS[residue],
        }
    }
}

// ---------------------------------------------------------------------------
// ScoringModel
// ---------------------------------------------------------------------------

/// What the graph search needs from a profile HMM. Scores are natural-log
/// values; emissions are log-odds against a background.
pub trait ScoringModel {
    /// Number of match columns M.
    fn num_columns(&self) -> usize;

    fn alphabet(&self) -> Alphabet;

    /// Genetic code for protein models.
    fn genetic_code(&self) -> Option<GeneticCode>;

    /// Transition score out of column `column`.
    fn tsc(&self, column: usize, t: Transition) -> f64;

    /// Match emission score at `column` (1..=M).
    fn match_score(&self, column: usize, residue: usize) -> f64;

    /// Insert emission score at `column` (0..=M).
    fn insert_score(&self, column: usize, residue: usize) -> f64;

    fn max_match_score(&self, column: usize) -> f64;

    fn max_insert_score(&self, column: usize) -> f64;

    /// Upper bound on the normalized score obtainable from `(state, column)`
    /// to column M. Always `<= 0`.
    fn remaining_score(&self, column: usize, state: HmmState) -> f64;
}

// ---------------------------------------------------------------------------
// ProfileHmmSpec
// ---------------------------------------------------------------------------

/// Probability-space description of a profile HMM, the on-disk JSON form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileHmmSpec {
    pub name: String,
    pub alphabet: Alphabet,
    /// Translation table for protein models.
    #[serde(default)]
    pub genetic_code: Option<GeneticCode>,
    /// Background residue frequencies.
    pub background: Vec<f64>,
    /// Match emission probabilities for columns 1..=M (M rows).
    pub match_emissions: Vec<Vec<f64>>,
    /// Insert emission probabilities for columns 0..=M (M+1 rows).
    pub insert_emissions: Vec<Vec<f64>>,
    /// Transition probabilities out of columns 0..=M (M+1 rows), ordered
    /// MM, MI, MD, IM, II, ID, DM, DI, DD.
    pub transitions: Vec<[f64; NUM_TRANSITIONS]>,
}

impl ProfileHmmSpec {
    /// Write the model description as pretty JSON.
    pub fn save_json(&self, path: &Path) -> Result<()> {
        let file = std::fs::File::create(path)
            .with_context(|| format!("failed to create {}", path.display()))?;
        serde_json::to_writer_pretty(std::io::BufWriter::new(file), self)
            .with_context(|| format!("failed to write HMM {}", path.display()))?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let a = self.alphabet.size();
        let m = self.match_emissions.len();
        if m == 0 {
            bail!("model '{}' has no match columns", self.name);
        }
        if self.background.len() != a {
            bail!(
                "model '{}': background has {} entries, alphabet needs {}",
                self.name,
                self.background.len(),
                a
            );
        }
        if self.background.iter().any(|&p| p <= 0.0) {
            bail!("model '{}': background probabilities must be positive", self.name);
        }
        if self.insert_emissions.len() != m + 1 {
            bail!(
                "model '{}': expected {} insert rows, got {}",
                self.name,
                m + 1,
                self.insert_emissions.len()
            );
        }
        if self.transitions.len() != m + 1 {
            bail!(
                "model '{}': expected {} transition rows, got {}",
                self.name,
                m + 1,
                self.transitions.len()
            );
        }
        for (i, row) in self.match_emissions.iter().chain(&self.insert_emissions).enumerate() {
            if row.len() != a {
                bail!("model '{}': emission row {} has {} entries, expected {}", self.name, i, row.len(), a);
            }
            if row.iter().any(|&p| !(0.0..=1.0).contains(&p)) || row.iter().all(|&p| p == 0.0) {
                bail!("model '{}': emission row {} is not a distribution", self.name, i);
            }
        }
        for (j, row) in self.transitions.iter().enumerate() {
            if row.iter().any(|&p| !(0.0..=1.0).contains(&p)) {
                bail!("model '{}': transition row {} has values outside [0, 1]", self.name, j);
            }
        }
        if self.alphabet == Alphabet::Protein && self.genetic_code.is_none() {
            bail!("protein model '{}' requires a genetic code", self.name);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ProfileHmm
// ---------------------------------------------------------------------------

/// Log-space profile HMM with precomputed maxima and remaining-score bounds.
#[derive(Debug, Clone)]
pub struct ProfileHmm {
    name: String,
    alphabet: Alphabet,
    genetic_code: Option<GeneticCode>,
    m: usize,
    /// `tsc[j][t]`, j in 0..=M.
    tsc: Vec<[f64; NUM_TRANSITIONS]>,
    /// `msc[j][r]`, j in 0..=M (row 0 unused).
    msc: Vec<Vec<f64>>,
    /// `isc[j][r]`, j in 0..=M.
    isc: Vec<Vec<f64>>,
    max_msc: Vec<f64>,
    max_isc: Vec<f64>,
    /// `remaining[j] = [match, insert, delete]` bounds.
    remaining: Vec<[f64; 3]>,
}

impl ProfileHmm {
    /// Convert probabilities into log-odds scores.
    pub fn from_spec(spec: &ProfileHmmSpec) -> Result<Self> {
        spec.validate()?;
        let m = spec.match_emissions.len();
        let log_odds = |row: &Vec<f64>| -> Vec<f64> {
            row.iter()
                .zip(&spec.background)
                .map(|(&p, &bg)| (p / bg).ln())
                .collect()
        };
        let mut msc = Vec::with_capacity(m + 1);
        msc.push(vec![f64::NEG_INFINITY; spec.alphabet.size()]);
        msc.extend(spec.match_emissions.iter().map(log_odds));
        let isc: Vec<Vec<f64>> = spec.insert_emissions.iter().map(log_odds).collect();
        let tsc: Vec<[f64; NUM_TRANSITIONS]> = spec
            .transitions
            .iter()
            .map(|row| row.map(|p| p.ln()))
            .collect();
        Ok(Self::from_log_tables(
            spec.name.clone(),
            spec.alphabet,
            spec.genetic_code,
            tsc,
            msc,
            isc,
        ))
    }

    fn from_log_tables(
        name: String,
        alphabet: Alphabet,
        genetic_code: Option<GeneticCode>,
        tsc: Vec<[f64; NUM_TRANSITIONS]>,
        msc: Vec<Vec<f64>>,
        isc: Vec<Vec<f64>>,
    ) -> Self {
        let m = msc.len() - 1;
        let row_max = |row: &Vec<f64>| row.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let mut max_msc: Vec<f64> = msc.iter().map(row_max).collect();
        max_msc[0] = 0.0;
        let max_isc: Vec<f64> = isc.iter().map(row_max).collect();
        let remaining = remaining_bounds(&tsc, m);
        Self {
            name,
            alphabet,
            genetic_code,
            m,
            tsc,
            msc,
            isc,
            max_msc,
            max_isc,
            remaining,
        }
    }

    /// Load a JSON model description from disk.
    pub fn load_json(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)
            .with_context(|| format!("failed to open HMM {}", path.display()))?;
        let spec: ProfileHmmSpec = serde_json::from_reader(std::io::BufReader::new(file))
            .with_context(|| format!("failed to parse HMM {}", path.display()))?;
        Self::from_spec(&spec).with_context(|| format!("invalid HMM {}", path.display()))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The same model walked from column M towards column 1.
    ///
    /// Reversed column `j'` corresponds to forward column `M - j' + 1`; the
    /// transition out of reversed column `j'` towards `j' + 1` is the forward
    /// transition from column `M - j'` into `M - j' + 1` with its states
    /// swapped (M->D becomes D->M and so on).
    pub fn reversed(&self) -> Self {
        let m = self.m;
        let tsc: Vec<[f64; NUM_TRANSITIONS]> = (0..=m)
            .map(|jr| {
                let src = &self.tsc[m - jr];
                let mut row = [f64::NEG_INFINITY; NUM_TRANSITIONS];
                for t in ALL_TRANSITIONS {
                    row[t.reversed() as usize] = src[t as usize];
                }
                row
            })
            .collect();
        let mut msc = Vec::with_capacity(m + 1);
        msc.push(self.msc[0].clone());
        for jr in 1..=m {
            msc.push(self.msc[m - jr + 1].clone());
        }
        let isc: Vec<Vec<f64>> = (0..=m).map(|jr| self.isc[m - jr].clone()).collect();
        Self::from_log_tables(
            format!("{}.rev", self.name),
            self.alphabet,
            self.genetic_code,
            tsc,
            msc,
            isc,
        )
    }
}

const ALL_TRANSITIONS: [Transition; NUM_TRANSITIONS] = [
    Transition::MM,
    Transition::MI,
    Transition::MD,
    Transition::IM,
    Transition::II,
    Transition::ID,
    Transition::DM,
    Transition::DI,
    Transition::DD,
];

/// Backward DP over transitions only. Normalized emissions contribute at most
/// 0, so this bounds every completion from above. Insert self-loops only
/// lower a completion, and the search never takes the insert/delete cross
/// transitions, so neither appears here.
fn remaining_bounds(tsc: &[[f64; NUM_TRANSITIONS]], m: usize) -> Vec<[f64; 3]> {
    let mut h = vec![[0.0f64; 3]; m + 1];
    for j in (0..m).rev() {
        let t = &tsc[j];
        let next = h[j + 1];
        let ins = t[Transition::IM as usize] + next[0];
        let del = (t[Transition::DM as usize] + next[0]).max(t[Transition::DD as usize] + next[2]);
        let mat = (t[Transition::MM as usize] + next[0])
            .max(t[Transition::MD as usize] + next[2])
            .max(t[Transition::MI as usize] + ins);
        h[j] = [mat, ins, del];
    }
    h
}

impl ScoringModel for ProfileHmm {
    #[inline]
    fn num_columns(&self) -> usize {
        self.m
    }

    #[inline]
    fn alphabet(&self) -> Alphabet {
        self.alphabet
    }

    #[inline]
    fn genetic_code(&self) -> Option<GeneticCode> {
        self.genetic_code
    }

    #[inline]
    fn tsc(&self, column: usize, t: Transition) -> f64 {
        self.tsc[column][t as usize]
    }

    #[inline]
    fn match_score(&self, column: usize, residue: usize) -> f64 {
        self.msc[column][residue]
    }

    #[inline]
    fn insert_score(&self, column: usize, residue: usize) -> f64 {
        self.isc[column][residue]
    }

    #[inline]
    fn max_match_score(&self, column: usize) -> f64 {
        self.max_msc[column]
    }

    #[inline]
    fn max_insert_score(&self, column: usize) -> f64 {
        self.max_isc[column]
    }

    #[inline]
    fn remaining_score(&self, column: usize, state: HmmState) -> f64 {
        let h = &self.remaining[column.min(self.m)];
        match state {
            HmmState::Match => h[0],
            HmmState::Insert => h[1],
            HmmState::Delete => h[2],
        }
    }
}

// ---------------------------------------------------------------------------
// Builders used by tests and demos
// ---------------------------------------------------------------------------

/// Default transition probabilities for a model built from a consensus:
/// strong match-to-match, rare indels.
pub const CONSENSUS_TRANSITIONS: [f64; NUM_TRANSITIONS] =
    [0.90, 0.05, 0.05, 0.50, 0.50, 0.0, 0.50, 0.0, 0.50];

impl ProfileHmmSpec {
    /// A nucleotide model whose match columns favour `consensus` with
    /// probability `fidelity`.
    pub fn from_nucleotide_consensus(name: &str, consensus: &[u8], fidelity: f64) -> Result<Self> {
        Self::from_consensus(name, Alphabet::Nucleotide, None, consensus, fidelity)
    }

    /// A protein model whose match columns favour `consensus`.
    pub fn from_protein_consensus(
        name: &str,
        code: GeneticCode,
        consensus: &[u8],
        fidelity: f64,
    ) -> Result<Self> {
        Self::from_consensus(name, Alphabet::Protein, Some(code), consensus, fidelity)
    }

    fn from_consensus(
        name: &str,
        alphabet: Alphabet,
        genetic_code: Option<GeneticCode>,
        consensus: &[u8],
        fidelity: f64,
    ) -> Result<Self> {
        if !(0.0..1.0).contains(&fidelity) {
            bail!("fidelity must be in [0, 1), got {}", fidelity);
        }
        let a = alphabet.size();
        let uniform = vec![1.0 / a as f64; a];
        let other = (1.0 - fidelity) / (a - 1) as f64;
        let mut match_emissions = Vec::with_capacity(consensus.len());
        for (i, &c) in consensus.iter().enumerate() {
            let Some(r) = alphabet.index_of(c) else {
                bail!("consensus letter '{}' at {} not in alphabet", c as char, i);
            };
            let mut row = vec![other; a];
            row[r] = fidelity;
            match_emissions.push(row);
        }
        let m = consensus.len();
        let mut transitions = vec![CONSENSUS_TRANSITIONS; m + 1];
        // Column M has nowhere to go but the end state.
        transitions[m] = [1.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 0.0, 0.0];
        Ok(Self {
            name: name.to_string(),
            alphabet,
            genetic_code,
            background: uniform.clone(),
            match_emissions,
            insert_emissions: vec![uniform; m + 1],
            transitions,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn toy() -> ProfileHmm {
        let spec = ProfileHmmSpec::from_nucleotide_consensus("toy", b"ACGTTG", 0.85).unwrap();
        ProfileHmm::from_spec(&spec).unwrap()
    }

    #[test]
    fn test_log_odds_conversion() {
        let hmm = toy();
        assert_eq!(hmm.num_columns(), 6);
        let best = (0.85f64 / 0.25).ln();
        assert!((hmm.match_score(1, 0) - best).abs() < 1e-12);
        assert!((hmm.max_match_score(1) - best).abs() < 1e-12);
        assert!(hmm.match_score(1, 1) < 0.0);
        assert!((hmm.insert_score(3, 2)).abs() < 1e-12);
        assert!((hmm.tsc(2, Transition::MM) - 0.9f64.ln()).abs() < 1e-12);
        assert_eq!(hmm.tsc(2, Transition::ID), f64::NEG_INFINITY);
    }

    #[test]
    fn test_remaining_bounds_are_admissible() {
        let hmm = toy();
        let m = hmm.num_columns();
        assert_eq!(hmm.remaining_score(m, HmmState::Match), 0.0);
        // All-match path is the best completion here.
        let expected = (m - 2) as f64 * 0.9f64.ln();
        assert!((hmm.remaining_score(2, HmmState::Match) - expected).abs() < 1e-12);
        for j in 0..m {
            for s in [HmmState::Match, HmmState::Insert, HmmState::Delete] {
                assert!(hmm.remaining_score(j, s) <= 0.0);
            }
            assert!(hmm.remaining_score(j, HmmState::Match) <= hmm.remaining_score(j + 1, HmmState::Match));
        }
    }

    #[test]
    fn test_reversed_model() {
        let hmm = toy();
        let rev = hmm.reversed();
        let m = hmm.num_columns();
        for j in 1..=m {
            for r in 0..4 {
                assert_eq!(rev.match_score(j, r), hmm.match_score(m - j + 1, r));
            }
        }
        assert_eq!(rev.tsc(1, Transition::MD), hmm.tsc(m - 1, Transition::DM));
        assert_eq!(rev.tsc(1, Transition::MI), hmm.tsc(m - 1, Transition::IM));
        assert_eq!(rev.tsc(0, Transition::MM), hmm.tsc(m, Transition::MM));
        // Reversing twice restores the tables.
        let back = rev.reversed();
        for j in 0..=m {
            for t in ALL_TRANSITIONS {
                assert_eq!(back.tsc(j, t), hmm.tsc(j, t));
            }
        }
    }

    #[test]
    fn test_spec_validation() {
        let mut spec = ProfileHmmSpec::from_nucleotide_consensus("bad", b"ACG", 0.9).unwrap();
        spec.transitions.pop();
        assert!(spec.validate().is_err());
        let mut spec = ProfileHmmSpec::from_nucleotide_consensus("bad", b"ACG", 0.9).unwrap();
        spec.background = vec![0.5, 0.5];
        assert!(spec.validate().is_err());
        assert!(ProfileHmmSpec::from_nucleotide_consensus("bad", b"ACN", 0.9).is_err());
        let mut spec =
            ProfileHmmSpec::from_protein_consensus("p", GeneticCode::bacterial(), b"MK", 0.8).unwrap();
        assert!(spec.validate().is_ok());
        spec.genetic_code = None;
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_json_roundtrip() {
        let spec =
            ProfileHmmSpec::from_protein_consensus("prot", GeneticCode::bacterial(), b"MKV", 0.7).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prot.json");
        spec.save_json(&path).unwrap();
        let hmm = ProfileHmm::load_json(&path).unwrap();
        assert_eq!(hmm.name(), "prot");
        assert_eq!(hmm.alphabet(), Alphabet::Protein);
        assert_eq!(hmm.num_columns(), 3);
        assert_eq!(hmm.genetic_code().unwrap().id(), 11);
        let m = Alphabet::Protein.index_of(b'M').unwrap();
        assert!(hmm.match_score(1, m) > 0.0);
    }
}
