//! Profile HMM scoring and translation.

pub mod codon;
pub mod profile;

pub use codon::GeneticCode;
pub use profile::{Alphabet, HmmState, ProfileHmm, ProfileHmmSpec, ScoringModel, Transition};
