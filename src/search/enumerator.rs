//! Successor generation for the HMM-guided search.

use std::rc::Rc;

use smallvec::SmallVec;

use crate::hmm::profile::{Alphabet, HmmState, ScoringModel, Transition};
use crate::hmm::GeneticCode;

use super::node::{Emission, SearchNode};
use super::walker::{GraphWalker, Step};
use super::weight::WeightPolicy;

/// Fixed-point scale for priorities.
pub const PRIORITY_SCALE: f64 = 1e6;

/// Produces scored successors of a node.
pub struct NodeEnumerator<'m, M: ScoringModel> {
    model: &'m M,
    weight: WeightPolicy,
    code: Option<GeneticCode>,
}

impl<'m, M: ScoringModel> NodeEnumerator<'m, M> {
    pub fn new(model: &'m M, weight: WeightPolicy) -> Self {
        let code = match model.alphabet() {
            Alphabet::Protein => Some(model.genetic_code().unwrap_or_default()),
            Alphabet::Nucleotide => None,
        };
        Self {
            model,
            weight,
            code,
        }
    }

    #[inline]
    pub fn is_protein(&self) -> bool {
        self.code.is_some()
    }

    /// Residue index for an enumerated step, `None` for untranslatable codons.
    fn residue(&self, step: &Step) -> Option<u8> {
        match self.code {
            None => Some(step.symbols[0]),
            Some(code) => {
                let codon = [step.symbols[0], step.symbols[1], step.symbols[2]];
                Alphabet::Protein
                    .index_of(code.translate(codon))
                    .map(|r| r as u8)
            }
        }
    }

    /// `-(score + w * remaining)` in fixed point; smaller pops first.
    pub fn priority(&self, score: f64, column: usize, state: HmmState) -> i64 {
        let w = self.weight.weight(column, self.model.num_columns());
        let estimate = score + w * self.model.remaining_score(column, state);
        (-estimate * PRIORITY_SCALE).round() as i64
    }

    /// The successor of `pred` entering `state`, via `step` for emitting
    /// states. `None` when the move is disallowed or has zero probability.
    pub fn successor(&self, pred: &Rc<SearchNode>, state: HmmState, step: Option<&Step>) -> Option<SearchNode> {
        let m = self.model.num_columns();
        let col = pred.column;
        let t = self.model.tsc(col, Transition::between(pred.state, state));
        if !t.is_finite() {
            return None;
        }
        let (column, raw, norm, emission) = match (state, step) {
            (HmmState::Match, Some(step)) if col < m => {
                let r = self.residue(step)?;
                let e = self.model.match_score(col + 1, r as usize);
                let norm = e - self.model.max_match_score(col + 1);
                (col + 1, e, norm, Some(emission_of(step, r)))
            }
            (HmmState::Insert, Some(step)) if pred.state != HmmState::Delete => {
                let r = self.residue(step)?;
                let e = self.model.insert_score(col, r as usize);
                let norm = e - self.model.max_insert_score(col);
                (col, e, norm, Some(emission_of(step, r)))
            }
            (HmmState::Delete, None) if pred.state != HmmState::Insert && col < m => (col + 1, 0.0, 0.0, None),
            _ => return None,
        };
        if !raw.is_finite() {
            return None;
        }
        let (kmer, hashes) = match step {
            Some(s) => (s.kmer, s.hashes),
            None => (pred.kmer, pred.hashes),
        };
        let delta = t + raw;
        let score = pred.score + t + norm;
        Some(SearchNode {
            prev: Some(Rc::clone(pred)),
            kmer,
            hashes,
            column,
            state,
            score,
            real_score: pred.real_score + delta,
            emitted_len: pred.emitted_len + emission.is_some() as usize,
            indels: pred.indels + (state != HmmState::Match) as u32,
            negative_streak: if delta <= 0.0 { pred.negative_streak + 1 } else { 0 },
            emission,
            priority: self.priority(score, column, state),
        })
    }

    /// Every successor of `node`: a match and an insert per present
    /// extension, then a single delete.
    pub fn successors(&self, node: &Rc<SearchNode>, walker: &mut GraphWalker<'_>) -> SmallVec<[SearchNode; 9]> {
        walker.jump_to(node.kmer, node.hashes);
        let steps: SmallVec<[Step; 8]> = if self.is_protein() {
            walker.codon_extensions()
        } else {
            walker.extensions().into_iter().collect()
        };
        let mut out = SmallVec::new();
        for step in &steps {
            out.extend(self.successor(node, HmmState::Match, Some(step)));
            out.extend(self.successor(node, HmmState::Insert, Some(step)));
        }
        out.extend(self.successor(node, HmmState::Delete, None));
        out
    }
}

fn emission_of(step: &Step, residue: u8) -> Emission {
    Emission {
        residue,
        symbols: step.symbols,
        width: step.width,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hmm::{ProfileHmm, ProfileHmmSpec};
    use crate::index::kmer::PackedKmer;
    use crate::index::kmer_index::{IndexConfig, ProbabilisticKmerIndex};
    use crate::index::rolling_hash::HashMasks;
    use crate::search::walker::Direction;

    fn setup() -> (ProbabilisticKmerIndex, ProfileHmm) {
        let config = IndexConfig {
            k: 6,
            capacity_log2: 14,
            hash_count: 4,
            block_log2: 14,
            bits_per_bucket: 1,
        };
        let mut idx = ProbabilisticKmerIndex::new(config, HashMasks::from_seed(3)).unwrap();
        idx.insert_sequence(b"ACGGTCAT").unwrap();
        idx.insert_sequence(b"ACGGTCGT").unwrap();
        let spec = ProfileHmmSpec::from_nucleotide_consensus("t", b"ACGGTCATGA", 0.9).unwrap();
        (idx, ProfileHmm::from_spec(&spec).unwrap())
    }

    #[test]
    fn test_successor_kinds() {
        let (idx, hmm) = setup();
        let seed = PackedKmer::from_ascii(b"ACGGTC").unwrap();
        let mut walker = GraphWalker::new(&idx, Direction::Right, seed);
        let en = NodeEnumerator::new(&hmm, WeightPolicy::default());
        let root = Rc::new(SearchNode::root(seed, idx.hasher().hash_kmer(&seed), 6));
        let succ = en.successors(&root, &mut walker);
        // A and G extensions, each as match and insert, plus one delete.
        assert_eq!(succ.len(), 5);
        let deletes: Vec<_> = succ.iter().filter(|n| n.state == HmmState::Delete).collect();
        assert_eq!(deletes.len(), 1);
        assert_eq!(deletes[0].kmer, seed);
        assert_eq!(deletes[0].column, 7);
        let best = succ
            .iter()
            .filter(|n| n.state == HmmState::Match)
            .max_by(|a, b| a.score.total_cmp(&b.score))
            .unwrap();
        // Column 7 of the consensus is A.
        assert_eq!(best.emission.unwrap().residue, 0);
        assert!((best.score - 0.9f64.ln()).abs() < 1e-12);
        assert!(best.real_score > 0.0);
        assert_eq!(best.negative_streak, 0);
        assert_eq!(best.emitted_len, 1);
    }

    #[test]
    fn test_state_restrictions() {
        let (idx, hmm) = setup();
        let seed = PackedKmer::from_ascii(b"ACGGTC").unwrap();
        let mut walker = GraphWalker::new(&idx, Direction::Right, seed);
        let en = NodeEnumerator::new(&hmm, WeightPolicy::default());
        let root = Rc::new(SearchNode::root(seed, idx.hasher().hash_kmer(&seed), 6));
        let succ = en.successors(&root, &mut walker);

        let del = Rc::new(succ.into_iter().find(|n| n.state == HmmState::Delete).unwrap());
        let after_delete = en.successors(&del, &mut walker);
        assert!(after_delete.iter().all(|n| n.state != HmmState::Insert));

        let succ = en.successors(&root, &mut walker);
        let ins = Rc::new(succ.into_iter().find(|n| n.state == HmmState::Insert).unwrap());
        assert_eq!(ins.column, 6);
        assert_eq!(ins.indels, 1);
        let after_insert = en.successors(&ins, &mut walker);
        assert!(after_insert.iter().all(|n| n.state != HmmState::Delete));
    }

    #[test]
    fn test_negative_streak_counts_losing_steps() {
        let (idx, hmm) = setup();
        let seed = PackedKmer::from_ascii(b"ACGGTC").unwrap();
        let mut walker = GraphWalker::new(&idx, Direction::Right, seed);
        let en = NodeEnumerator::new(&hmm, WeightPolicy::default());
        let root = Rc::new(SearchNode::root(seed, idx.hasher().hash_kmer(&seed), 6));
        let succ = en.successors(&root, &mut walker);
        let del = succ.iter().find(|n| n.state == HmmState::Delete).unwrap();
        assert_eq!(del.negative_streak, 1);
        assert!(del.real_score < 0.0);
    }

    #[test]
    fn test_priority_orders_by_estimate() {
        let (_, hmm) = setup();
        let en = NodeEnumerator::new(&hmm, WeightPolicy::default());
        assert!(en.priority(-1.0, 5, HmmState::Match) > en.priority(-0.5, 5, HmmState::Match));
        let greedy = NodeEnumerator::new(&hmm, WeightPolicy::Static(2.0));
        assert!(greedy.priority(0.0, 2, HmmState::Match) > en.priority(0.0, 2, HmmState::Match));
    }
}
