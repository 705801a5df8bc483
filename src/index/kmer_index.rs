//! Probabilistic k-mer index: a counting Bloom filter over canonical
//! rolling hashes.
//!
//! The index answers "was this k-mer (or its reverse complement) observed in
//! the reads?" with no false negatives and a tunable false-positive rate. It
//! stands in for the edge set of an implicit de Bruijn graph: the graph search
//! never stores nodes, it only asks the index whether a neighbouring k-mer
//! exists.
//!
//! Lifecycle:
//! 1. `new` with an [`IndexConfig`] and a [`HashMasks`] instance
//! 2. `insert_sequence` for every read (counting buckets)
//! 3. optional `collapse(cutoff)` to presence bits
//! 4. optional `mercy_pass` over the reads again
//! 5. `save` / `load` for all later searches (read-only, `Sync`)
//!
//! Probe positions use double hashing `h_i = (x + i*y) mod B` inside a block
//! of `B = 2^block_log2` buckets chosen by a second mix of the canonical hash.
//! With `block_log2 == capacity_log2` the layout is a flat filter.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use ahash::AHashSet;
use anyhow::{Context, Result, bail};
use serde::Serialize;
use tracing::{info, warn};

use super::kmer::{PackedKmer, encode_base};
use super::rolling_hash::{HashMasks, HashPair, RollingHasher};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Magic bytes for the index snapshot format.
const INDEX_MAGIC: &[u8; 8] = b"GWKIDX1\0";

/// Snapshot format version.
const INDEX_VERSION: u32 = 1;

/// Mixer seeds for deriving probe parameters from a canonical hash.
const STEP_SEED: u64 = 0x9e37_79b9_7f4a_7c15;
const BLOCK_SEED: u64 = 0x94d0_49bb_1331_11eb;

#[inline]
fn mix64(mut x: u64) -> u64 {
    x ^= x >> 30;
    x = x.wrapping_mul(0xbf58_476d_1ce4_e5b9);
    x ^= x >> 27;
    x = x.wrapping_mul(0x94d0_49bb_1331_11eb);
    x ^ (x >> 31)
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Immutable shape of a probabilistic k-mer index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IndexConfig {
    /// K-mer length.
    pub k: usize,
    /// log2 of the number of buckets.
    pub capacity_log2: u32,
    /// Number of probes per k-mer.
    pub hash_count: u32,
    /// log2 of the probe block size (== `capacity_log2` for a flat layout).
    pub block_log2: u32,
    /// Counter width per bucket while counting (1, 2, 4 or 8).
    pub bits_per_bucket: u32,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            k: 60,
            capacity_log2: 30,
            hash_count: 4,
            block_log2: 12,
            bits_per_bucket: 2,
        }
    }
}

impl IndexConfig {
    /// Check the configuration for values the bucket layout cannot represent.
    pub fn validate(&self) -> Result<()> {
        if self.k == 0 || self.k > super::kmer::MAX_K {
            bail!("k-mer length {} outside supported range 1..={}", self.k, super::kmer::MAX_K);
        }
        if !(6..=40).contains(&self.capacity_log2) {
            bail!("capacity_log2 {} outside supported range 6..=40", self.capacity_log2);
        }
        if self.block_log2 == 0 || self.block_log2 > self.capacity_log2 {
            bail!(
                "block_log2 {} must be in 1..={} (capacity_log2)",
                self.block_log2,
                self.capacity_log2
            );
        }
        if !(1..=16).contains(&self.hash_count) {
            bail!("hash_count {} outside supported range 1..=16", self.hash_count);
        }
        if !matches!(self.bits_per_bucket, 1 | 2 | 4 | 8) {
            bail!("bits_per_bucket must be 1, 2, 4 or 8 (got {})", self.bits_per_bucket);
        }
        Ok(())
    }

    #[inline]
    fn num_buckets(&self) -> u64 {
        1u64 << self.capacity_log2
    }
}

// ---------------------------------------------------------------------------
// Statistics
// ---------------------------------------------------------------------------

/// Summary statistics, serializable for `stats` output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexStats {
    pub config: IndexConfig,
    pub sealed: bool,
    pub cutoff: u32,
    pub current_bits_per_bucket: u32,
    pub total_kmers: u64,
    pub unique_kmers: u64,
    pub strings_inserted: u64,
    pub occupied_buckets: u64,
    pub fill_ratio: f64,
    pub predicted_fp_rate: f64,
    pub size_bytes: u64,
    pub created_unix_secs: u64,
}

// ---------------------------------------------------------------------------
// ProbabilisticKmerIndex
// ---------------------------------------------------------------------------

/// Counting / presence filter over canonical k-mer hashes.
#[derive(Clone)]
pub struct ProbabilisticKmerIndex {
    config: IndexConfig,
    hasher: RollingHasher,
    /// Bucket storage, `bucket_bits` bits per bucket.
    words: Vec<u64>,
    /// Current counter width (drops to 1 after `collapse`).
    bucket_bits: u32,
    sealed: bool,
    cutoff: u32,
    total_kmers: u64,
    unique_kmers: u64,
    strings_inserted: u64,
    created: u64,
}

impl ProbabilisticKmerIndex {
    // -----------------------------------------------------------------------
    // Construction
    // -----------------------------------------------------------------------

    /// Create an empty counting index.
    pub fn new(config: IndexConfig, masks: HashMasks) -> Result<Self> {
        config.validate()?;
        let num_words = Self::num_words(config.num_buckets(), config.bits_per_bucket);
        info!(
            "Allocating k-mer index: k={}, 2^{} buckets x {} bits ({} MiB), {} probes",
            config.k,
            config.capacity_log2,
            config.bits_per_bucket,
            (num_words * 8) >> 20,
            config.hash_count,
        );
        let created = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Ok(Self {
            config,
            hasher: RollingHasher::new(masks, config.k),
            words: vec![0u64; num_words],
            bucket_bits: config.bits_per_bucket,
            sealed: false,
            cutoff: 1,
            total_kmers: 0,
            unique_kmers: 0,
            strings_inserted: 0,
            created,
        })
    }

    fn num_words(buckets: u64, bits: u32) -> usize {
        ((buckets * bits as u64).div_ceil(64)) as usize
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    #[inline]
    pub fn k(&self) -> usize {
        self.config.k
    }

    #[inline]
    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    /// Rolling hash operations bound to this index's masks and k.
    #[inline]
    pub fn hasher(&self) -> &RollingHasher {
        &self.hasher
    }

    #[inline]
    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    #[inline]
    pub fn cutoff(&self) -> u32 {
        self.cutoff
    }

    #[inline]
    pub fn total_kmers(&self) -> u64 {
        self.total_kmers
    }

    #[inline]
    pub fn unique_kmers(&self) -> u64 {
        self.unique_kmers
    }

    #[inline]
    pub fn strings_inserted(&self) -> u64 {
        self.strings_inserted
    }

    #[inline]
    pub fn created_unix_secs(&self) -> u64 {
        self.created
    }

    // -----------------------------------------------------------------------
    // Bucket layout
    // -----------------------------------------------------------------------

    /// Fill `out` with the probe bucket indices for a canonical hash.
    #[inline]
    fn probes(&self, canonical: u64, out: &mut [u64; 16]) -> usize {
        let x = mix64(canonical);
        let y = mix64(canonical ^ STEP_SEED) | 1;
        let block_mask = (1u64 << self.config.block_log2) - 1;
        let num_blocks_log2 = self.config.capacity_log2 - self.config.block_log2;
        let base = if num_blocks_log2 == 0 {
            0
        } else {
            (mix64(x ^ BLOCK_SEED) & ((1u64 << num_blocks_log2) - 1)) << self.config.block_log2
        };
        let n = self.config.hash_count as usize;
        for (i, slot) in out.iter_mut().take(n).enumerate() {
            *slot = base | (x.wrapping_add((i as u64).wrapping_mul(y)) & block_mask);
        }
        n
    }

    #[inline]
    fn bucket(&self, idx: u64) -> u32 {
        let bit = idx * self.bucket_bits as u64;
        let word = (bit >> 6) as usize;
        let shift = bit & 63;
        let mask = (1u64 << self.bucket_bits) - 1;
        ((self.words[word] >> shift) & mask) as u32
    }

    #[inline]
    fn set_bucket(&mut self, idx: u64, value: u32) {
        let bit = idx * self.bucket_bits as u64;
        let word = (bit >> 6) as usize;
        let shift = bit & 63;
        let mask = (1u64 << self.bucket_bits) - 1;
        self.words[word] = (self.words[word] & !(mask << shift)) | (((value as u64) & mask) << shift);
    }

    #[inline]
    fn bucket_max(&self) -> u32 {
        (1u32 << self.bucket_bits) - 1
    }

    // -----------------------------------------------------------------------
    // Insertion
    // -----------------------------------------------------------------------

    /// Count one occurrence of the window with the given hash pair.
    ///
    /// Returns `true` if this was the first observation (some probed bucket
    /// was still empty).
    pub fn insert_hashes(&mut self, pair: HashPair) -> Result<bool> {
        if self.sealed {
            bail!("cannot insert into a sealed k-mer index");
        }
        let mut probes = [0u64; 16];
        let n = self.probes(pair.canonical(), &mut probes);
        let max = self.bucket_max();
        let mut first = false;
        for &idx in &probes[..n] {
            let c = self.bucket(idx);
            if c == 0 {
                first = true;
            }
            if c < max {
                self.set_bucket(idx, c + 1);
            }
        }
        self.total_kmers += 1;
        if first {
            self.unique_kmers += 1;
        }
        Ok(first)
    }

    /// Count one occurrence of `kmer`.
    pub fn insert(&mut self, kmer: &PackedKmer) -> Result<bool> {
        if kmer.len() != self.k() {
            bail!("k-mer length {} does not match index k={}", kmer.len(), self.k());
        }
        let pair = self.hasher.hash_kmer(kmer);
        self.insert_hashes(pair)
    }

    /// Insert every k-mer of a read.
    ///
    /// Symbols outside A/C/G/T reset the window; insertion resumes with the
    /// first full window after the offending position. Returns the number of
    /// k-mers inserted.
    pub fn insert_sequence(&mut self, seq: &[u8]) -> Result<u64> {
        if self.sealed {
            bail!("cannot insert into a sealed k-mer index");
        }
        let windows: Vec<HashPair> = RollingWindows::new(&self.hasher, seq)
            .map(|w| w.hashes)
            .collect();
        for &pair in &windows {
            self.insert_hashes(pair)?;
        }
        self.strings_inserted += 1;
        Ok(windows.len() as u64)
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Membership by precomputed hash pair.
    #[inline]
    pub fn contains_hashes(&self, pair: HashPair) -> bool {
        let mut probes = [0u64; 16];
        let n = self.probes(pair.canonical(), &mut probes);
        probes[..n].iter().all(|&idx| self.bucket(idx) != 0)
    }

    /// Membership of a packed k-mer.
    pub fn contains(&self, kmer: &PackedKmer) -> bool {
        self.contains_hashes(self.hasher.hash_kmer(kmer))
    }

    /// Approximate occurrence count (minimum over the probed buckets).
    ///
    /// After `collapse` this is 0 or 1.
    pub fn count(&self, kmer: &PackedKmer) -> u32 {
        let mut probes = [0u64; 16];
        let n = self.probes(self.hasher.hash_kmer(kmer).canonical(), &mut probes);
        probes[..n].iter().map(|&idx| self.bucket(idx)).min().unwrap_or(0)
    }

    /// Query every k-mer of `seq` in order.
    ///
    /// Unlike insertion, an invalid symbol is reported as an error: there is no
    /// graph position for a window containing it.
    pub fn query_sequence(&self, seq: &[u8]) -> Result<Vec<bool>> {
        if let Some(pos) = seq.iter().position(|&b| encode_base(b).is_none()) {
            bail!(
                "invalid symbol '{}' at position {} in query sequence",
                seq[pos] as char,
                pos
            );
        }
        Ok(RollingWindows::new(&self.hasher, seq)
            .map(|w| self.contains_hashes(w.hashes))
            .collect())
    }

    // -----------------------------------------------------------------------
    // Collapse and mercy k-mers
    // -----------------------------------------------------------------------

    /// Irreversibly convert counts to presence bits, keeping buckets whose
    /// count is at least `cutoff`. Seals the index.
    pub fn collapse(&mut self, cutoff: u32) -> Result<()> {
        if self.sealed {
            bail!("k-mer index is already collapsed");
        }
        if cutoff == 0 {
            bail!("collapse cutoff must be at least 1");
        }
        if cutoff > self.bucket_max() {
            bail!(
                "collapse cutoff {} exceeds the largest count a {}-bit bucket holds ({})",
                cutoff,
                self.bucket_bits,
                self.bucket_max()
            );
        }
        let num_buckets = self.config.num_buckets();
        let mut bits = vec![0u64; Self::num_words(num_buckets, 1)];
        let mut kept = 0u64;
        for idx in 0..num_buckets {
            if self.bucket(idx) >= cutoff {
                bits[(idx >> 6) as usize] |= 1u64 << (idx & 63);
                kept += 1;
            }
        }
        self.words = bits;
        self.bucket_bits = 1;
        self.sealed = true;
        self.cutoff = cutoff;
        info!(
            "Collapsed k-mer index at cutoff {}: {} of {} buckets kept",
            cutoff, kept, num_buckets
        );
        Ok(())
    }

    /// Collect mercy k-mer candidates from one read.
    ///
    /// A candidate is a window absent from the collapsed index whose previous
    /// and next windows in the same read are both present. Windows separated
    /// by an invalid symbol are not neighbours.
    pub fn mercy_candidates(&self, seq: &[u8], out: &mut Vec<HashPair>) {
        let windows: Vec<Window> = RollingWindows::new(&self.hasher, seq).collect();
        for i in 1..windows.len().saturating_sub(1) {
            let (prev, cur, next) = (&windows[i - 1], &windows[i], &windows[i + 1]);
            if prev.pos + 1 != cur.pos || cur.pos + 1 != next.pos {
                continue;
            }
            if !self.contains_hashes(cur.hashes)
                && self.contains_hashes(prev.hashes)
                && self.contains_hashes(next.hashes)
            {
                out.push(cur.hashes);
            }
        }
    }

    /// Mark k-mers present in a sealed index. Returns how many were newly set.
    pub fn promote(&mut self, pairs: &[HashPair]) -> Result<u64> {
        if !self.sealed {
            bail!("mercy k-mers can only be promoted in a collapsed index");
        }
        let mut seen: AHashSet<u64> = AHashSet::with_capacity(pairs.len());
        let mut promoted = 0u64;
        let mut probes = [0u64; 16];
        for pair in pairs {
            let canonical = pair.canonical();
            if !seen.insert(canonical) || self.contains_hashes(*pair) {
                continue;
            }
            let n = self.probes(canonical, &mut probes);
            for &idx in &probes[..n] {
                self.set_bucket(idx, 1);
            }
            promoted += 1;
        }
        Ok(promoted)
    }

    /// Re-scan the reads and promote mercy k-mers.
    ///
    /// Only meaningful at cutoff 2, where an absent read k-mer is exactly a
    /// singleton. Candidates are gathered over the whole corpus before any is
    /// promoted, so one promotion never enables another within the pass.
    pub fn mercy_pass<I, S>(&mut self, reads: I) -> Result<u64>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<[u8]>,
    {
        if !self.sealed {
            bail!("mercy pass requires a collapsed index");
        }
        if self.cutoff != 2 {
            warn!(
                "Mercy k-mer pass skipped: only meaningful at cutoff 2 (index cutoff is {})",
                self.cutoff
            );
            return Ok(0);
        }
        let mut candidates = Vec::new();
        for read in reads {
            self.mercy_candidates(read.as_ref(), &mut candidates);
        }
        let promoted = self.promote(&candidates)?;
        info!(
            "Mercy pass: {} candidate windows, {} k-mers promoted",
            candidates.len(),
            promoted
        );
        Ok(promoted)
    }

    // -----------------------------------------------------------------------
    // Statistics
    // -----------------------------------------------------------------------

    /// Number of non-empty buckets.
    pub fn occupied_buckets(&self) -> u64 {
        if self.bucket_bits == 1 {
            return self.words.iter().map(|w| w.count_ones() as u64).sum();
        }
        (0..self.config.num_buckets())
            .filter(|&idx| self.bucket(idx) != 0)
            .count() as u64
    }

    /// Expected false-positive rate `(1 - e^{-h n / m})^h` for the unique
    /// k-mers counted so far.
    pub fn predicted_fp_rate(&self) -> f64 {
        let h = self.config.hash_count as f64;
        let n = self.unique_kmers as f64;
        let m = self.config.num_buckets() as f64;
        (1.0 - (-h * n / m).exp()).powf(h)
    }

    pub fn stats(&self) -> IndexStats {
        let occupied = self.occupied_buckets();
        IndexStats {
            config: self.config,
            sealed: self.sealed,
            cutoff: self.cutoff,
            current_bits_per_bucket: self.bucket_bits,
            total_kmers: self.total_kmers,
            unique_kmers: self.unique_kmers,
            strings_inserted: self.strings_inserted,
            occupied_buckets: occupied,
            fill_ratio: occupied as f64 / self.config.num_buckets() as f64,
            predicted_fp_rate: self.predicted_fp_rate(),
            size_bytes: (self.words.len() * 8) as u64,
            created_unix_secs: self.created,
        }
    }

    // -----------------------------------------------------------------------
    // Serialization
    // -----------------------------------------------------------------------

    /// Serialize the index to a writer.
    ///
    /// Format (all integers little-endian):
    /// ```text
    /// [magic: 8 bytes "GWKIDX1\0"]
    /// [version: u32]
    /// [k: u32][capacity_log2: u32][hash_count: u32][block_log2: u32]
    /// [bits_per_bucket: u32][current_bits_per_bucket: u32]
    /// [sealed: u8][cutoff: u32]
    /// [masks: 4 x u64]
    /// [total_kmers: u64][unique_kmers: u64][strings_inserted: u64]
    /// [created_unix_secs: u64]
    /// [num_words: u64][words: num_words x u64]
    /// ```
    pub fn save<W: Write>(&self, writer: &mut W) -> Result<()> {
        let mut w = BufWriter::new(writer);
        w.write_all(INDEX_MAGIC)?;
        w.write_all(&INDEX_VERSION.to_le_bytes())?;
        for v in [
            self.config.k as u32,
            self.config.capacity_log2,
            self.config.hash_count,
            self.config.block_log2,
            self.config.bits_per_bucket,
            self.bucket_bits,
        ] {
            w.write_all(&v.to_le_bytes())?;
        }
        w.write_all(&[self.sealed as u8])?;
        w.write_all(&self.cutoff.to_le_bytes())?;
        for m in self.hasher.masks().raw() {
            w.write_all(&m.to_le_bytes())?;
        }
        for v in [
            self.total_kmers,
            self.unique_kmers,
            self.strings_inserted,
            self.created,
            self.words.len() as u64,
        ] {
            w.write_all(&v.to_le_bytes())?;
        }
        for &word in &self.words {
            w.write_all(&word.to_le_bytes())?;
        }
        w.flush()?;
        Ok(())
    }

    /// Deserialize an index from a reader.
    ///
    /// Any inconsistency is fatal: every later search depends on the index.
    pub fn load<R: Read>(reader: &mut R) -> Result<Self> {
        let mut r = BufReader::new(reader);

        let mut magic = [0u8; 8];
        r.read_exact(&mut magic)
            .context("failed to read k-mer index magic")?;
        if magic != *INDEX_MAGIC {
            bail!(
                "invalid k-mer index magic: expected {:?}, got {:?}",
                INDEX_MAGIC,
                magic
            );
        }
        let version = read_u32_le(&mut r).context("failed to read index version")?;
        if version != INDEX_VERSION {
            bail!(
                "unsupported k-mer index version {} (expected {})",
                version,
                INDEX_VERSION
            );
        }

        let config = IndexConfig {
            k: read_u32_le(&mut r)? as usize,
            capacity_log2: read_u32_le(&mut r)?,
            hash_count: read_u32_le(&mut r)?,
            block_log2: read_u32_le(&mut r)?,
            bits_per_bucket: read_u32_le(&mut r)?,
        };
        config.validate().context("corrupt k-mer index configuration")?;
        let bucket_bits = read_u32_le(&mut r)?;
        let mut sealed = [0u8; 1];
        r.read_exact(&mut sealed)?;
        let sealed = match sealed[0] {
            0 => false,
            1 => true,
            other => bail!("corrupt k-mer index: invalid sealed flag {}", other),
        };
        let cutoff = read_u32_le(&mut r)?;
        let expected_bits = if sealed { 1 } else { config.bits_per_bucket };
        if bucket_bits != expected_bits {
            bail!(
                "corrupt k-mer index: {} bits per bucket, expected {}",
                bucket_bits,
                expected_bits
            );
        }

        let mut masks = [0u64; 4];
        for m in masks.iter_mut() {
            *m = read_u64_le(&mut r).context("failed to read hash masks")?;
        }

        let total_kmers = read_u64_le(&mut r)?;
        let unique_kmers = read_u64_le(&mut r)?;
        let strings_inserted = read_u64_le(&mut r)?;
        let created = read_u64_le(&mut r)?;
        let num_words = read_u64_le(&mut r).context("failed to read word count")? as usize;
        let expected_words = Self::num_words(config.num_buckets(), bucket_bits);
        if num_words != expected_words {
            bail!(
                "corrupt k-mer index: {} storage words, expected {}",
                num_words,
                expected_words
            );
        }
        let mut words = Vec::with_capacity(num_words);
        for _ in 0..num_words {
            words.push(read_u64_le(&mut r).context("truncated k-mer index storage")?);
        }

        Ok(Self {
            config,
            hasher: RollingHasher::new(HashMasks::from_raw(masks), config.k),
            words,
            bucket_bits,
            sealed,
            cutoff,
            total_kmers,
            unique_kmers,
            strings_inserted,
            created,
        })
    }

    /// Write the snapshot to `path`.
    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        let mut file = File::create(path)
            .with_context(|| format!("failed to create index file {}", path.display()))?;
        self.save(&mut file)
            .with_context(|| format!("failed to write index to {}", path.display()))
    }

    /// Load a snapshot from `path`.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let mut file = File::open(path)
            .with_context(|| format!("failed to open index file {}", path.display()))?;
        Self::load(&mut file).with_context(|| format!("failed to load index from {}", path.display()))
    }
}

impl std::fmt::Debug for ProbabilisticKmerIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProbabilisticKmerIndex")
            .field("config", &self.config)
            .field("sealed", &self.sealed)
            .field("cutoff", &self.cutoff)
            .field("unique_kmers", &self.unique_kmers)
            .field("total_kmers", &self.total_kmers)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// RollingWindows
// ---------------------------------------------------------------------------

/// One valid k-mer window of a sequence.
#[derive(Debug, Clone, Copy)]
pub struct Window {
    /// Start position on the sequence.
    pub pos: usize,
    pub kmer: PackedKmer,
    pub hashes: HashPair,
}

/// Iterator over the valid k-mer windows of a sequence.
///
/// Windows containing a non-ACGT byte are skipped; the rolling state restarts
/// from scratch after such a byte.
pub struct RollingWindows<'a> {
    hasher: &'a RollingHasher,
    seq: &'a [u8],
    /// Next byte to consume.
    next: usize,
    /// Valid symbols currently in the window (saturates at k).
    filled: usize,
    bits: u128,
    kmer: Option<PackedKmer>,
    hashes: HashPair,
}

impl<'a> RollingWindows<'a> {
    pub fn new(hasher: &'a RollingHasher, seq: &'a [u8]) -> Self {
        Self {
            hasher,
            seq,
            next: 0,
            filled: 0,
            bits: 0,
            kmer: None,
            hashes: HashPair::default(),
        }
    }

    fn restart(&mut self) {
        self.filled = 0;
        self.bits = 0;
        self.kmer = None;
        self.hashes = HashPair::default();
    }
}

impl Iterator for RollingWindows<'_> {
    type Item = Window;

    fn next(&mut self) -> Option<Window> {
        let k = self.hasher.k();
        while self.next < self.seq.len() {
            let b = self.seq[self.next];
            self.next += 1;
            let Some(sym) = encode_base(b) else {
                self.restart();
                continue;
            };
            match self.kmer {
                Some(kmer) => {
                    self.hashes = self.hasher.pair_update_right(self.hashes, kmer.first(), sym);
                    self.kmer = Some(kmer.shift_left(sym));
                }
                None => {
                    self.hashes = self.hasher.pair_eat_right(self.hashes, self.filled, sym);
                    self.bits = (self.bits << 2) | sym as u128;
                    self.filled += 1;
                    if self.filled == k {
                        self.kmer = Some(PackedKmer::from_raw(self.bits, k));
                    }
                }
            }
            if let Some(kmer) = self.kmer {
                return Some(Window {
                    pos: self.next - k,
                    kmer,
                    hashes: self.hashes,
                });
            }
        }
        None
    }
}

// ---------------------------------------------------------------------------
// I/O helpers
// ---------------------------------------------------------------------------

fn read_u64_le<R: Read>(reader: &mut R) -> std::io::Result<u64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

fn read_u32_le<R: Read>(reader: &mut R) -> std::io::Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn small_config(k: usize) -> IndexConfig {
        IndexConfig {
            k,
            capacity_log2: 16,
            hash_count: 4,
            block_log2: 9,
            bits_per_bucket: 2,
        }
    }

    fn random_seq<R: Rng>(rng: &mut R, n: usize) -> Vec<u8> {
        (0..n).map(|_| b"ACGT"[rng.gen_range(0..4)]).collect()
    }

    #[test]
    fn test_config_validation() {
        assert!(small_config(10).validate().is_ok());
        assert!(IndexConfig { k: 0, ..small_config(10) }.validate().is_err());
        assert!(IndexConfig { bits_per_bucket: 3, ..small_config(10) }.validate().is_err());
        assert!(IndexConfig { block_log2: 17, ..small_config(10) }.validate().is_err());
        assert!(IndexConfig { hash_count: 0, ..small_config(10) }.validate().is_err());
    }

    #[test]
    fn test_insert_reports_first_observation() {
        let mut idx = ProbabilisticKmerIndex::new(small_config(5), HashMasks::from_seed(1)).unwrap();
        let km = PackedKmer::from_ascii(b"ACGTA").unwrap();
        assert!(idx.insert(&km).unwrap());
        assert!(!idx.insert(&km).unwrap());
        assert_eq!(idx.total_kmers(), 2);
        assert_eq!(idx.unique_kmers(), 1);
        assert_eq!(idx.count(&km), 2);
    }

    #[test]
    fn test_windows_skip_invalid_symbols() {
        let hasher = RollingHasher::new(HashMasks::from_seed(2), 3);
        let windows: Vec<Window> = RollingWindows::new(&hasher, b"ACGTNACGT").collect();
        let positions: Vec<usize> = windows.iter().map(|w| w.pos).collect();
        assert_eq!(positions, vec![0, 1, 5, 6]);
        assert_eq!(windows[2].kmer.to_string(), "ACG");
        assert_eq!(windows[2].hashes, hasher.hash_kmer(&windows[2].kmer));
    }

    #[test]
    fn test_insert_sequence_resumes_after_invalid() {
        let mut idx = ProbabilisticKmerIndex::new(small_config(4), HashMasks::from_seed(3)).unwrap();
        let n = idx.insert_sequence(b"ACGTAXCGTTA").unwrap();
        // ACGTA -> 2 windows, CGTTA -> 2 windows.
        assert_eq!(n, 4);
        assert_eq!(idx.strings_inserted(), 1);
        assert!(idx.contains(&PackedKmer::from_ascii(b"CGTA").unwrap()));
        assert!(idx.contains(&PackedKmer::from_ascii(b"GTTA").unwrap()));
    }

    #[test]
    fn test_query_sequence_reports_invalid_symbol() {
        let mut idx = ProbabilisticKmerIndex::new(small_config(4), HashMasks::from_seed(4)).unwrap();
        idx.insert_sequence(b"ACGTACGT").unwrap();
        let hits = idx.query_sequence(b"ACGTAC").unwrap();
        assert_eq!(hits, vec![true, true, true]);
        let err = idx.query_sequence(b"ACGRTA").unwrap_err().to_string();
        assert!(err.contains("invalid symbol 'R' at position 3"));
        // The index still answers after a failed query.
        assert!(idx.contains(&PackedKmer::from_ascii(b"ACGT").unwrap()));
    }

    #[test]
    fn test_canonical_membership_agrees() {
        let mut rng = StdRng::seed_from_u64(99);
        let mut idx = ProbabilisticKmerIndex::new(small_config(15), HashMasks::from_seed(5)).unwrap();
        let seq = random_seq(&mut rng, 400);
        idx.insert_sequence(&seq).unwrap();
        for _ in 0..500 {
            let query = PackedKmer::from_ascii(&random_seq(&mut rng, 15)).unwrap();
            assert_eq!(idx.contains(&query), idx.contains(&query.reverse_complement()));
        }
        for start in 0..(seq.len() - 15) {
            let km = PackedKmer::from_ascii(&seq[start..start + 15]).unwrap();
            assert!(idx.contains(&km.reverse_complement()));
        }
    }

    #[test]
    fn test_collapse_keeps_repeated_kmers() {
        let mut idx = ProbabilisticKmerIndex::new(small_config(6), HashMasks::from_seed(6)).unwrap();
        let twice = PackedKmer::from_ascii(b"ACGGTA").unwrap();
        let once = PackedKmer::from_ascii(b"TTGACC").unwrap();
        idx.insert(&twice).unwrap();
        idx.insert(&twice).unwrap();
        idx.insert(&once).unwrap();
        idx.collapse(2).unwrap();
        assert!(idx.is_sealed());
        assert!(idx.contains(&twice));
        assert!(!idx.contains(&once));
        assert!(idx.insert(&once).is_err());
        assert!(idx.collapse(2).is_err());
    }

    #[test]
    fn test_collapse_rejects_cutoff_above_saturation() {
        let mut idx = ProbabilisticKmerIndex::new(small_config(6), HashMasks::from_seed(6)).unwrap();
        let km = PackedKmer::from_ascii(b"ACGGTA").unwrap();
        for _ in 0..10 {
            idx.insert(&km).unwrap();
        }
        assert_eq!(idx.count(&km), 3);
        let err = idx.collapse(4).unwrap_err().to_string();
        assert!(err.contains("exceeds"), "{err}");
        assert!(!idx.is_sealed());
        idx.collapse(3).unwrap();
        assert!(idx.contains(&km));
    }

    #[test]
    fn test_mercy_pass_rescues_singleton_between_present_neighbours() {
        let mut idx = ProbabilisticKmerIndex::new(small_config(5), HashMasks::from_seed(7)).unwrap();
        // Read A covers the left part twice, read B the right part twice; the
        // junction k-mer "CGTAC" appears only in the full read.
        let full = b"AACGTACCT";
        for _ in 0..2 {
            idx.insert_sequence(b"AACGTA").unwrap();
            idx.insert_sequence(b"GTACCT").unwrap();
        }
        idx.insert_sequence(full).unwrap();
        idx.collapse(2).unwrap();
        let mid = PackedKmer::from_ascii(b"CGTAC").unwrap();
        assert!(!idx.contains(&mid));
        let promoted = idx.mercy_pass([&full[..]]).unwrap();
        assert_eq!(promoted, 1);
        assert!(idx.contains(&mid));
    }

    #[test]
    fn test_mercy_pass_requires_cutoff_two() {
        let mut idx = ProbabilisticKmerIndex::new(small_config(5), HashMasks::from_seed(8)).unwrap();
        idx.insert_sequence(b"ACGTACGTTT").unwrap();
        assert!(idx.mercy_pass([b"ACGTACGTTT"]).is_err());
        idx.collapse(3).unwrap();
        assert_eq!(idx.mercy_pass([b"ACGTACGTTT"]).unwrap(), 0);
    }

    #[test]
    fn test_serialization_roundtrip_bytes_and_answers() {
        let mut rng = StdRng::seed_from_u64(10);
        let mut idx = ProbabilisticKmerIndex::new(small_config(12), HashMasks::from_seed(9)).unwrap();
        let seqs: Vec<Vec<u8>> = (0..20).map(|_| random_seq(&mut rng, 80)).collect();
        for s in &seqs {
            idx.insert_sequence(s).unwrap();
        }

        let mut buf = Vec::new();
        idx.save(&mut buf).unwrap();
        let loaded = ProbabilisticKmerIndex::load(&mut &buf[..]).unwrap();

        let mut buf2 = Vec::new();
        loaded.save(&mut buf2).unwrap();
        assert_eq!(buf, buf2);

        for s in &seqs {
            assert!(loaded.query_sequence(s).unwrap().iter().all(|&p| p));
        }
        for _ in 0..200 {
            let probe = PackedKmer::from_ascii(&random_seq(&mut rng, 12)).unwrap();
            assert_eq!(loaded.contains(&probe), idx.contains(&probe));
        }
        assert_eq!(loaded.unique_kmers(), idx.unique_kmers());
        assert_eq!(loaded.created_unix_secs(), idx.created_unix_secs());
    }

    #[test]
    fn test_invalid_magic() {
        let data = b"BADMAGIC\x01\x00\x00\x00";
        let err = ProbabilisticKmerIndex::load(&mut &data[..]).unwrap_err().to_string();
        assert!(err.contains("invalid k-mer index magic"));
    }

    #[test]
    fn test_version_mismatch() {
        let idx = ProbabilisticKmerIndex::new(small_config(8), HashMasks::from_seed(1)).unwrap();
        let mut buf = Vec::new();
        idx.save(&mut buf).unwrap();
        buf[8] = 99;
        let err = ProbabilisticKmerIndex::load(&mut &buf[..]).unwrap_err().to_string();
        assert!(err.contains("unsupported k-mer index version"));
    }

    #[test]
    fn test_truncated_snapshot_fails() {
        let idx = ProbabilisticKmerIndex::new(small_config(8), HashMasks::from_seed(1)).unwrap();
        let mut buf = Vec::new();
        idx.save(&mut buf).unwrap();
        buf.truncate(buf.len() - 16);
        assert!(ProbabilisticKmerIndex::load(&mut &buf[..]).is_err());
    }

    #[test]
    fn test_false_positive_rate_near_prediction() {
        let mut rng = StdRng::seed_from_u64(11);
        let config = IndexConfig {
            k: 20,
            capacity_log2: 16,
            hash_count: 3,
            block_log2: 16,
            bits_per_bucket: 1,
        };
        let mut idx = ProbabilisticKmerIndex::new(config, HashMasks::from_seed(12)).unwrap();
        for _ in 0..100 {
            idx.insert_sequence(&random_seq(&mut rng, 100)).unwrap();
        }
        let predicted = idx.predicted_fp_rate();
        let trials = 20_000;
        let hits = (0..trials)
            .filter(|_| idx.contains(&PackedKmer::from_ascii(&random_seq(&mut rng, 20)).unwrap()))
            .count();
        let observed = hits as f64 / trials as f64;
        assert!(
            (observed - predicted).abs() < 0.02 + predicted * 0.5,
            "observed {observed}, predicted {predicted}"
        );
    }

    #[test]
    fn test_stats() {
        let mut idx = ProbabilisticKmerIndex::new(small_config(5), HashMasks::from_seed(13)).unwrap();
        idx.insert_sequence(b"ACGTACGTAA").unwrap();
        let stats = idx.stats();
        assert_eq!(stats.total_kmers, 6);
        assert!(stats.occupied_buckets > 0);
        assert!(!stats.sealed);
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["config"]["k"], 5);
    }
}
