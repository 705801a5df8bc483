//! Index build pipeline: reads → counting filter → collapsed snapshot.
//!
//! A producer thread decompresses and parses the read files into a bounded
//! channel; the calling thread is the single writer into the filter. After
//! every read is counted the filter is collapsed at a cutoff and optionally
//! given a mercy pass, which streams the inputs a second time.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Result, bail};
use crossbeam::channel;
use indicatif::ProgressBar;
use tracing::info;

use super::kmer_index::{IndexConfig, ProbabilisticKmerIndex};
use super::rolling_hash::HashMasks;
use crate::io::fastx::{SequenceRecord, open_with_decompression, send_records};

/// Records buffered between the parser and the inserter.
const CHANNEL_CAPACITY: usize = 1024;

/// Configuration for the index build pipeline.
#[derive(Debug, Clone)]
pub struct BuildConfig {
    /// Read files (FASTA/FASTQ, optionally compressed).
    pub inputs: Vec<PathBuf>,
    /// Output path for the index snapshot.
    pub output: PathBuf,
    pub index: IndexConfig,
    /// Seed for the rolling-hash masks.
    pub seed: u64,
    /// Minimum count for a k-mer to survive; 1 keeps every k-mer.
    pub cutoff: u32,
    /// Rescue singleton k-mers bridging two kept k-mers (cutoff 2 only).
    pub mercy: bool,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            inputs: Vec::new(),
            output: PathBuf::from("genewalk.idx"),
            index: IndexConfig::default(),
            seed: 1,
            cutoff: 1,
            mercy: false,
        }
    }
}

/// Parse every record of `inputs` on a producer thread and hand the
/// receiving end of the channel to `consume` on the calling thread.
///
/// Returns `consume`'s result and the number of records parsed.
fn stream_records<T, F>(inputs: &[PathBuf], consume: F) -> Result<(T, u64)>
where
    F: FnOnce(&channel::Receiver<SequenceRecord>) -> Result<T>,
{
    let (sender, receiver) = channel::bounded::<SequenceRecord>(CHANNEL_CAPACITY);
    let num_records = AtomicU64::new(0);
    let num_records_ref = &num_records;

    let consumed = crossbeam::scope(|s| -> Result<T> {
        // Producer thread: parses reads and sends records
        let sender_for_producer = sender.clone();
        let producer = s.spawn(move |_| -> Result<()> {
            for path in inputs {
                info!("Reading sequences from {}", path.display());
                let reader = open_with_decompression(path)?;
                let n = send_records(reader, &sender_for_producer)?;
                num_records_ref.fetch_add(n, Ordering::Relaxed);
            }
            Ok(())
        });

        // Drop original sender so channel closes when producer finishes
        drop(sender);

        let result = consume(&receiver);
        // Unblocks the producer if the consumer stopped early.
        drop(receiver);

        producer
            .join()
            .map_err(|e| anyhow::anyhow!("reader thread panicked: {:?}", e))??;
        result
    })
    .map_err(|e| anyhow::anyhow!("thread panicked: {:?}", e))??;

    Ok((consumed, num_records.load(Ordering::Relaxed)))
}

/// Count every k-mer of every read in `config.inputs` into `index`.
fn count_reads(config: &BuildConfig, index: &mut ProbabilisticKmerIndex, progress: &ProgressBar) -> Result<u64> {
    let (inserted, num_records) = stream_records(&config.inputs, |receiver| {
        let mut inserted = 0u64;
        for record in receiver {
            inserted += index.insert_sequence(&record.seq)?;
            progress.inc(1);
        }
        Ok(inserted)
    })?;

    info!("Counted {} k-mers from {} records", inserted, num_records);
    Ok(inserted)
}

/// Build an index from reads and write it to `config.output`.
pub fn build_index(config: &BuildConfig, progress: &ProgressBar) -> Result<ProbabilisticKmerIndex> {
    if config.inputs.is_empty() {
        bail!("no input read files given");
    }
    if config.cutoff == 0 {
        bail!("cutoff must be at least 1");
    }
    if config.cutoff > 1 && config.cutoff >= 1 << config.index.bits_per_bucket {
        bail!(
            "cutoff {} cannot be represented with {} bits per bucket",
            config.cutoff,
            config.index.bits_per_bucket
        );
    }

    info!(
        "Building k-mer index (k={}, 2^{} buckets, {} probes, {} bits/bucket) from {} file(s)",
        config.index.k,
        config.index.capacity_log2,
        config.index.hash_count,
        config.index.bits_per_bucket,
        config.inputs.len()
    );
    let mut index = ProbabilisticKmerIndex::new(config.index, HashMasks::from_seed(config.seed))?;

    count_reads(config, &mut index, progress)?;
    info!(
        "{} distinct k-mers (estimated), predicted false-positive rate {:.3e}",
        index.unique_kmers(),
        index.predicted_fp_rate()
    );

    index.collapse(config.cutoff)?;
    if config.mercy {
        // Candidates are streamed from a second read of the inputs.
        stream_records(&config.inputs, |receiver| {
            index.mercy_pass(receiver.iter().map(|record| record.seq))
        })?;
    }

    index.save_to_path(&config.output)?;
    info!("Index written to {}", config.output.display());
    Ok(index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::kmer::PackedKmer;

    fn small_config(dir: &std::path::Path, inputs: Vec<PathBuf>) -> BuildConfig {
        BuildConfig {
            inputs,
            output: dir.join("test.idx"),
            index: IndexConfig {
                k: 5,
                capacity_log2: 14,
                hash_count: 3,
                block_log2: 10,
                bits_per_bucket: 2,
            },
            seed: 7,
            cutoff: 1,
            mercy: false,
        }
    }

    #[test]
    fn test_build_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let reads = dir.path().join("reads.fa");
        std::fs::write(&reads, ">r1\nACGTTGCAAT\n>r2\nGGGCCCTTTA\n").unwrap();
        let config = small_config(dir.path(), vec![reads]);

        let built = build_index(&config, &ProgressBar::hidden()).unwrap();
        assert!(built.is_sealed());
        assert_eq!(built.strings_inserted(), 2);

        let loaded = ProbabilisticKmerIndex::load_from_path(&config.output).unwrap();
        for kmer in [&b"ACGTT"[..], b"TGCAA", b"CCTTT"] {
            let kmer = PackedKmer::from_ascii(kmer).unwrap();
            assert!(loaded.contains(&kmer));
        }
        assert_eq!(loaded.stats(), built.stats());
    }

    #[test]
    fn test_cutoff_drops_singletons() {
        let dir = tempfile::tempdir().unwrap();
        let reads = dir.path().join("reads.fq");
        std::fs::write(&reads, "@a\nACGTTGCA\n+\nIIIIIIII\n@b\nACGTTG\n+\nIIIIII\n").unwrap();
        let mut config = small_config(dir.path(), vec![reads]);
        config.cutoff = 2;

        let index = build_index(&config, &ProgressBar::hidden()).unwrap();
        assert!(index.contains(&PackedKmer::from_ascii(b"ACGTT").unwrap()));
        assert!(index.contains(&PackedKmer::from_ascii(b"CGTTG").unwrap()));
        assert!(!index.contains(&PackedKmer::from_ascii(b"TTGCA").unwrap()));
    }

    #[test]
    fn test_mercy_build_promotes_bridging_singleton() {
        let dir = tempfile::tempdir().unwrap();
        let reads = dir.path().join("reads.fa");
        // "CGTAC" only occurs in the full read, between two repeated k-mers.
        std::fs::write(
            &reads,
            ">a1\nAACGTA\n>a2\nAACGTA\n>b1\nGTACCT\n>b2\nGTACCT\n>full\nAACGTACCT\n",
        )
        .unwrap();
        let mut config = small_config(dir.path(), vec![reads]);
        config.cutoff = 2;
        let mid = PackedKmer::from_ascii(b"CGTAC").unwrap();

        let plain = build_index(&config, &ProgressBar::hidden()).unwrap();
        assert!(!plain.contains(&mid));

        config.mercy = true;
        let rescued = build_index(&config, &ProgressBar::hidden()).unwrap();
        assert!(rescued.contains(&mid));
        assert!(rescued.contains(&PackedKmer::from_ascii(b"ACGTA").unwrap()));

        let loaded = ProbabilisticKmerIndex::load_from_path(&config.output).unwrap();
        assert!(loaded.contains(&mid));
    }

    #[test]
    fn test_mercy_skipped_unless_cutoff_two() {
        let dir = tempfile::tempdir().unwrap();
        let reads = dir.path().join("reads.fa");
        std::fs::write(&reads, ">a\nAACGTACCT\n").unwrap();
        let mut config = small_config(dir.path(), vec![reads]);
        config.mercy = true;
        let index = build_index(&config, &ProgressBar::hidden()).unwrap();
        assert!(index.contains(&PackedKmer::from_ascii(b"CGTAC").unwrap()));
    }

    #[test]
    fn test_missing_input_fails() {
        let dir = tempfile::tempdir().unwrap();
        let config = small_config(dir.path(), vec![dir.path().join("nope.fa")]);
        assert!(build_index(&config, &ProgressBar::hidden()).is_err());
        assert!(!config.output.exists());
    }

    #[test]
    fn test_unrepresentable_cutoff_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = small_config(dir.path(), vec![dir.path().join("r.fa")]);
        config.cutoff = 4;
        assert!(build_index(&config, &ProgressBar::hidden()).is_err());
    }
}
