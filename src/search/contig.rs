//! Turning search paths into contigs.
//!
//! A contig is the seed joined with one extension, in forward (5'->3')
//! orientation: extension then seed for the left direction, seed then
//! extension for the right. Its score is recomputed end to end against the
//! forward model, seed residues included.

use std::time::Duration;

use anyhow::{Context, Result, bail};

use crate::hmm::codon::STOP;
use crate::hmm::profile::{Alphabet, HmmState, ScoringModel, Transition};
use crate::index::kmer::{PackedKmer, decode_base};

use super::node::CandidatePath;
use super::walker::Direction;

/// One alignment step against the forward model: a state and, for emitting
/// states, the residue index.
pub type AlignedStep = (HmmState, Option<usize>);

/// Log-odds score of `steps` laid on `model` after column `start`.
///
/// Match and delete steps advance one column, insert steps stay on the
/// current one. Transitions are charged between consecutive steps only, so
/// the first step pays its emission alone.
pub fn score_alignment<M: ScoringModel + ?Sized>(model: &M, start: usize, steps: &[AlignedStep]) -> f64 {
    let mut column = start;
    let mut prev: Option<HmmState> = None;
    let mut score = 0.0;
    for &(state, residue) in steps {
        if let Some(from) = prev {
            score += model.tsc(column, Transition::between(from, state));
        }
        match state {
            HmmState::Match => {
                column += 1;
                if let Some(r) = residue {
                    score += model.match_score(column, r);
                }
            }
            HmmState::Insert => {
                if let Some(r) = residue {
                    score += model.insert_score(column, r);
                }
            }
            HmmState::Delete => column += 1,
        }
        prev = Some(state);
    }
    score
}

/// Residue indices the seed aligns to its columns.
///
/// Protein seeds are translated in frame 0; a seed containing a stop codon
/// cannot be placed on a protein model.
pub fn seed_alignment<M: ScoringModel + ?Sized>(model: &M, seed: &PackedKmer) -> Result<Vec<usize>> {
    let symbols = seed.symbols();
    match model.alphabet() {
        Alphabet::Nucleotide => Ok(symbols.into_iter().map(|s| s as usize).collect()),
        Alphabet::Protein => {
            if symbols.len() % 3 != 0 {
                bail!("seed {} is not a whole number of codons", seed);
            }
            let code = model.genetic_code().unwrap_or_default();
            code.translate_symbols(&symbols)
                .into_iter()
                .enumerate()
                .map(|(i, aa)| {
                    if aa == STOP {
                        bail!("seed {} has a stop codon at residue {}", seed, i + 1);
                    }
                    Alphabet::Protein
                        .index_of(aa)
                        .with_context(|| format!("seed {} translates to unknown residue '{}'", seed, aa as char))
                })
                .collect()
        }
    }
}

/// Strings and alignment steps of one extension, forward oriented.
#[derive(Default)]
struct Extension {
    nucleotides: Vec<u8>,
    aligned: Vec<u8>,
    protein: Vec<u8>,
    steps: Vec<AlignedStep>,
}

impl Extension {
    fn from_path(path: &CandidatePath, alphabet: Alphabet, direction: Direction) -> Self {
        let mut ext = Self::default();
        let nodes: Vec<_> = match direction {
            Direction::Right => path.nodes().iter().skip(1).collect(),
            Direction::Left => path.nodes().iter().skip(1).rev().collect(),
        };
        for node in nodes {
            match (node.state, node.emission) {
                (HmmState::Delete, _) | (_, None) => {
                    ext.aligned.push(b'-');
                    ext.steps.push((HmmState::Delete, None));
                }
                (state, Some(e)) => {
                    ext.nucleotides.extend(e.nucleotides().iter().map(|&s| decode_base(s)));
                    let letter = alphabet.letter(e.residue as usize);
                    ext.aligned.push(if state == HmmState::Insert {
                        letter.to_ascii_lowercase()
                    } else {
                        letter
                    });
                    if alphabet == Alphabet::Protein {
                        ext.protein.push(letter);
                    }
                    ext.steps.push((state, Some(e.residue as usize)));
                }
            }
        }
        ext
    }

    /// Model columns consumed (match and delete steps).
    fn columns(&self) -> usize {
        self.steps.iter().filter(|(s, _)| *s != HmmState::Insert).count()
    }
}

/// One reported contig: the seed plus one extension, forward oriented.
#[derive(Debug, Clone, PartialEq)]
pub struct AssembledPath {
    /// First model column the contig covers.
    pub start_column: usize,
    pub nucleotides: Vec<u8>,
    /// Model-aligned residues: match upper case, insert lower case, delete `-`.
    pub aligned: Vec<u8>,
    /// Translation (protein models only).
    pub protein: Vec<u8>,
    /// End-to-end log-odds score against the forward model.
    pub raw_score: f64,
    pub bits: f64,
    pub partial: bool,
    pub generated: Duration,
}

impl AssembledPath {
    /// Join `seed` (first residue at `seed_column`) with the extension found
    /// in `direction` and rescore the result on the forward `model`.
    pub fn assemble<M: ScoringModel + ?Sized>(
        model: &M,
        seed: &PackedKmer,
        seed_column: usize,
        path: &CandidatePath,
        direction: Direction,
    ) -> Result<Self> {
        let alphabet = model.alphabet();
        let seed_residues = seed_alignment(model, seed)?;
        if seed_column == 0 || seed_column + seed_residues.len() > model.num_columns() + 1 {
            bail!(
                "seed at column {} covering {} residues does not fit {} columns",
                seed_column,
                seed_residues.len(),
                model.num_columns()
            );
        }

        let ext = Extension::from_path(path, alphabet, direction);
        let seed_nucl = seed.to_ascii();
        let seed_aligned: Vec<u8> = seed_residues.iter().map(|&r| alphabet.letter(r)).collect();
        let seed_protein = match alphabet {
            Alphabet::Protein => seed_aligned.clone(),
            Alphabet::Nucleotide => Vec::new(),
        };
        let seed_steps: Vec<AlignedStep> = seed_residues.iter().map(|&r| (HmmState::Match, Some(r))).collect();

        let (start_column, nucleotides, aligned, protein, steps) = match direction {
            Direction::Right => (
                seed_column,
                [seed_nucl, ext.nucleotides].concat(),
                [seed_aligned, ext.aligned].concat(),
                [seed_protein, ext.protein].concat(),
                [seed_steps, ext.steps].concat(),
            ),
            Direction::Left => {
                let columns = ext.columns();
                if columns >= seed_column {
                    bail!(
                        "left extension spans {} columns before seed column {}",
                        columns,
                        seed_column
                    );
                }
                (
                    seed_column - columns,
                    [ext.nucleotides, seed_nucl].concat(),
                    [ext.aligned, seed_aligned].concat(),
                    [ext.protein, seed_protein].concat(),
                    [ext.steps, seed_steps].concat(),
                )
            }
        };

        let raw_score = score_alignment(model, start_column - 1, &steps);
        Ok(Self {
            start_column,
            nucleotides,
            aligned,
            protein,
            raw_score,
            bits: raw_score / std::f64::consts::LN_2,
            partial: path.is_partial(),
            generated: path.generated(),
        })
    }
}
