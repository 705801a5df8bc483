pub mod build;
pub mod kmer;
pub mod kmer_index;
pub mod rolling_hash;
