//! Writers for assembled contigs.
//!
//! A run produces a tab-separated summary with one line per contig plus
//! FASTA files for the nucleotide, aligned and (protein models) translated
//! sequences. Contig ids tie the files together.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::search::contig::AssembledPath;
use crate::search::driver::SeedResult;

/// Summary line for one reported contig.
#[derive(Debug, Clone, PartialEq)]
pub struct ContigRecord {
    pub contig_id: String,
    pub seed: String,
    pub start_column: usize,
    pub nucl_length: usize,
    pub protein_length: usize,
    pub direction: String,
    pub raw_score: f64,
    pub bit_score: f64,
    pub wall_time_secs: f64,
    pub partial: bool,
}

const SUMMARY_HEADER: &str = "contig_id\tseed\tstart_column\tnucl_length\tprotein_length\tdirection\traw_score\tbit_score\twall_time_secs\tpartial";

impl ContigRecord {
    fn new(contig_id: String, seed: String, direction: &str, path: &AssembledPath) -> Self {
        Self {
            contig_id,
            seed,
            start_column: path.start_column,
            nucl_length: path.nucleotides.len(),
            protein_length: path.protein.len(),
            direction: direction.to_string(),
            raw_score: path.raw_score,
            bit_score: path.bits,
            wall_time_secs: path.generated.as_secs_f64(),
            partial: path.partial,
        }
    }

    fn write_tsv<W: Write>(&self, w: &mut W) -> std::io::Result<()> {
        writeln!(
            w,
            "{}\t{}\t{}\t{}\t{}\t{}\t{:.4}\t{:.4}\t{:.3}\t{}",
            self.contig_id,
            self.seed,
            self.start_column,
            self.nucl_length,
            self.protein_length,
            self.direction,
            self.raw_score,
            self.bit_score,
            self.wall_time_secs,
            self.partial as u8
        )
    }
}

/// Paths of the files a run writes under an output prefix.
#[derive(Debug, Clone)]
pub struct OutputPaths {
    pub summary: PathBuf,
    pub nucl: PathBuf,
    pub aligned: PathBuf,
    pub protein: PathBuf,
    pub run_info: PathBuf,
}

impl OutputPaths {
    pub fn new(dir: &Path) -> Self {
        Self {
            summary: dir.join("contigs.tsv"),
            nucl: dir.join("nucl.fasta"),
            aligned: dir.join("aligned.fasta"),
            protein: dir.join("prot.fasta"),
            run_info: dir.join("run_info.json"),
        }
    }
}

fn create(path: &Path) -> Result<BufWriter<File>> {
    let file = File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    Ok(BufWriter::new(file))
}

fn write_fasta<W: Write>(w: &mut W, id: &str, seq: &[u8]) -> std::io::Result<()> {
    writeln!(w, ">{}", id)?;
    for chunk in seq.chunks(80) {
        w.write_all(chunk)?;
        w.write_all(b"\n")?;
    }
    Ok(())
}

/// Flatten search results into contig records, in seed order, left before
/// right.
pub fn collect_records(results: &[SeedResult]) -> Vec<(ContigRecord, &AssembledPath)> {
    let mut out = Vec::new();
    for res in results {
        let seed = res.seed.kmer.to_string();
        for dir in [&res.left, &res.right].into_iter().flatten() {
            for (rank, path) in dir.paths.iter().enumerate() {
                let id = format!("seed{}_{}_{}", res.seed_index, dir.direction, rank + 1);
                out.push((
                    ContigRecord::new(id, seed.clone(), dir.direction.as_str(), path),
                    path,
                ));
            }
        }
    }
    out
}

/// Write the summary and FASTA outputs. Returns the number of contigs.
pub fn write_contigs(paths: &OutputPaths, results: &[SeedResult], protein: bool) -> Result<usize> {
    let records = collect_records(results);

    let mut summary = create(&paths.summary)?;
    let mut nucl = create(&paths.nucl)?;
    let mut aligned = create(&paths.aligned)?;
    let mut prot = if protein { Some(create(&paths.protein)?) } else { None };

    writeln!(summary, "{}", SUMMARY_HEADER)?;
    for (rec, path) in &records {
        rec.write_tsv(&mut summary)?;
        write_fasta(&mut nucl, &rec.contig_id, &path.nucleotides)?;
        write_fasta(&mut aligned, &rec.contig_id, &path.aligned)?;
        if let Some(w) = prot.as_mut() {
            write_fasta(w, &rec.contig_id, &path.protein)?;
        }
    }

    summary.flush()?;
    nucl.flush()?;
    aligned.flush()?;
    if let Some(mut w) = prot {
        w.flush()?;
    }
    Ok(records.len())
}
