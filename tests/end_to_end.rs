//! End-to-end assembly: reads on disk → index → seeds + model → contigs.

use std::path::Path;

use genewalk_rs::hmm::{GeneticCode, ProfileHmm, ProfileHmmSpec};
use genewalk_rs::index::build::{BuildConfig, build_index};
use genewalk_rs::index::kmer_index::{IndexConfig, ProbabilisticKmerIndex};
use genewalk_rs::io::fastx::{open_with_decompression, read_records};
use genewalk_rs::io::output::{OutputPaths, write_contigs};
use genewalk_rs::io::seeds::read_seeds;
use genewalk_rs::search::{DriverConfig, SearchDriver, SearchParams};
use indicatif::ProgressBar;

/// Reference gene; every canonical 10-mer occurs once.
const REFERENCE: &str = "TTTCCTCATGCAATTCAAAACCATGTCCGTAATGTAGGCGAAATAGTAAACCATTTTACG";
/// REFERENCE with a single substitution at position 45.
const VARIANT: &str = "TTTCCTCATGCAATTCAAAACCATGTCCGTAATGTAGGCGAAATAATAAACCATTTTACG";

/// Protein-coding gene; every canonical 9-mer occurs once.
const CODING: &str = "GGATCACAGTCTACACTGCTCACTCCAACCCCGGCCCCTGAGTCCGAGGAGAGGGTGCTT";
const CODING_PROTEIN: &str = "GSQSTLLTPTPAPESEERVL";

fn build(dir: &Path, k: usize, reads: &str) -> ProbabilisticKmerIndex {
    let reads_path = dir.join("reads.fa");
    std::fs::write(&reads_path, reads).unwrap();
    let config = BuildConfig {
        inputs: vec![reads_path],
        output: dir.join("genes.idx"),
        index: IndexConfig {
            k,
            capacity_log2: 18,
            hash_count: 4,
            block_log2: 12,
            bits_per_bucket: 2,
        },
        seed: 42,
        cutoff: 1,
        mercy: false,
    };
    build_index(&config, &ProgressBar::hidden()).unwrap();
    ProbabilisticKmerIndex::load_from_path(&config.output).unwrap()
}

fn fasta(path: &Path) -> Vec<(String, String)> {
    read_records(open_with_decompression(path).unwrap())
        .unwrap()
        .into_iter()
        .map(|r| {
            (
                String::from_utf8(r.name).unwrap(),
                String::from_utf8(r.seq).unwrap(),
            )
        })
        .collect()
}

#[test]
fn reference_outscores_error_variant() {
    let dir = tempfile::tempdir().unwrap();
    let reads = format!(">ref1\n{REFERENCE}\n>ref2\n{REFERENCE}\n>var\n{VARIANT}\n");
    let index = build(dir.path(), 10, &reads);

    let spec = ProfileHmmSpec::from_nucleotide_consensus("toy", REFERENCE.as_bytes(), 0.9).unwrap();
    let hmm_path = dir.path().join("toy.json");
    spec.save_json(&hmm_path).unwrap();
    let hmm = ProfileHmm::load_json(&hmm_path).unwrap();

    let seeds_path = dir.path().join("seeds.txt");
    std::fs::write(&seeds_path, format!("{} 21\n", &REFERENCE[20..30])).unwrap();
    let seeds = read_seeds(&seeds_path, 10, false).unwrap();

    let config = DriverConfig {
        threads: 2,
        timeout: None,
        params: SearchParams {
            k_best: 2,
            ..SearchParams::default()
        },
    };
    let driver = SearchDriver::new(&index, &hmm, config).unwrap();
    let results = driver.run(&seeds, &ProgressBar::hidden()).unwrap();
    assert_eq!(results.len(), 1);

    let right = results[0].right.as_ref().unwrap();
    assert_eq!(right.paths[0].nucleotides, REFERENCE[20..].as_bytes());
    assert_eq!(right.paths[0].start_column, 21);
    for alt in &right.paths[1..] {
        assert!(alt.raw_score <= right.paths[0].raw_score);
    }
    let left = results[0].left.as_ref().unwrap();
    assert_eq!(left.paths[0].nucleotides, REFERENCE[..30].as_bytes());
    assert_eq!(left.paths[0].start_column, 1);
    assert!(left.paths[0].raw_score > 0.0);

    let out = OutputPaths::new(dir.path());
    let n = write_contigs(&out, &results, false).unwrap();
    assert!(n >= 2);
    let nucl = fasta(&out.nucl);
    assert!(nucl.contains(&("seed0_right_1".to_string(), REFERENCE[20..].to_string())));
    assert!(nucl.contains(&("seed0_left_1".to_string(), REFERENCE[..30].to_string())));

    let summary = std::fs::read_to_string(&out.summary).unwrap();
    assert_eq!(summary.lines().count(), n + 1);
    assert!(!out.protein.exists());
}

#[test]
fn protein_model_extends_by_codons() {
    let dir = tempfile::tempdir().unwrap();
    let index = build(dir.path(), 9, &format!(">gene\n{CODING}\n"));

    let spec = ProfileHmmSpec::from_protein_consensus(
        "coding",
        GeneticCode::default(),
        CODING_PROTEIN.as_bytes(),
        0.9,
    )
    .unwrap();
    let hmm = ProfileHmm::from_spec(&spec).unwrap();

    let seeds_path = dir.path().join("seeds.txt");
    std::fs::write(&seeds_path, format!("{} 6 1\n{} 7 0\n", &CODING[15..24], &CODING[18..27])).unwrap();
    let seeds = read_seeds(&seeds_path, 9, true).unwrap();
    assert_eq!(seeds.len(), 1);

    let driver = SearchDriver::new(&index, &hmm, DriverConfig::default()).unwrap();
    let results = driver.run(&seeds, &ProgressBar::hidden()).unwrap();

    let right = &results[0].right.as_ref().unwrap().paths[0];
    assert_eq!(right.nucleotides, CODING[15..].as_bytes());
    assert_eq!(right.protein, &CODING_PROTEIN.as_bytes()[5..]);
    assert_eq!(right.aligned, &CODING_PROTEIN.as_bytes()[5..]);
    let left = &results[0].left.as_ref().unwrap().paths[0];
    assert_eq!(left.nucleotides, CODING[..24].as_bytes());
    assert_eq!(left.protein, &CODING_PROTEIN.as_bytes()[..8]);
    assert_eq!(left.start_column, 1);

    let out = OutputPaths::new(dir.path());
    write_contigs(&out, &results, true).unwrap();
    let prot = fasta(&out.protein);
    assert_eq!(prot[0], ("seed0_left_1".to_string(), CODING_PROTEIN[..8].to_string()));
    assert_eq!(prot[1].1, CODING_PROTEIN[5..]);
}
