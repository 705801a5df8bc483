//! FASTA / FASTQ reading for index construction.
//!
//! Files may be compressed in any format `niffler` detects. Record parsing is
//! delegated to `paraseq`, which picks FASTA or FASTQ from the first byte and
//! handles multi-line records. Sequences are upper-cased; quality strings are
//! discarded.

use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use crossbeam::channel;
use paraseq::Record;

/// One sequence record with owned buffers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceRecord {
    pub name: Vec<u8>,
    pub seq: Vec<u8>,
}

/// Open a file with automatic decompression (gzip, zstd, etc.).
pub fn open_with_decompression(path: &Path) -> Result<Box<dyn Read + Send>> {
    let (reader, _format) = niffler::send::from_path(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    Ok(reader)
}

/// Stream records from `reader` into `visit` until it returns `false` or the
/// input ends. Returns the number of records visited.
pub fn for_each_record<R, F>(reader: R, mut visit: F) -> Result<u64>
where
    R: Read,
    F: FnMut(SequenceRecord) -> bool,
{
    let mut reader = paraseq::fastx::Reader::new(reader)
        .map_err(|e| anyhow::anyhow!("failed to open FASTA/FASTQ stream: {}", e))?;
    let mut record_set = reader.new_record_set();
    let mut num_records = 0u64;

    while record_set
        .fill(&mut reader)
        .map_err(|e| anyhow::anyhow!("failed to read records: {}", e))?
    {
        for rec in record_set.iter() {
            let rec = rec.map_err(|e| {
                anyhow::anyhow!("malformed record after {} records: {}", num_records, e)
            })?;
            let mut seq = rec.seq().into_owned();
            seq.make_ascii_uppercase();
            num_records += 1;
            let keep_going = visit(SequenceRecord {
                name: rec.id().to_vec(),
                seq,
            });
            if !keep_going {
                return Ok(num_records);
            }
        }
    }
    Ok(num_records)
}

/// Read every record of `reader` into memory.
pub fn read_records<R: Read>(reader: R) -> Result<Vec<SequenceRecord>> {
    let mut out = Vec::new();
    for_each_record(reader, |rec| {
        out.push(rec);
        true
    })?;
    Ok(out)
}

/// Send records into a bounded channel; stops early if the receiver hangs up.
pub fn send_records<R: Read>(reader: R, sender: &channel::Sender<SequenceRecord>) -> Result<u64> {
    for_each_record(reader, |rec| sender.send(rec).is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multiline_fasta() {
        let data = b">r1 first\nacgt\nTTGA\n>r2\nGGCC\n";
        let recs = read_records(&data[..]).unwrap();
        assert_eq!(recs.len(), 2);
        assert!(recs[0].name.starts_with(b"r1"));
        assert_eq!(recs[0].seq, b"ACGTTTGA");
        assert_eq!(recs[1].seq, b"GGCC");
    }

    #[test]
    fn test_fastq() {
        let data = b"@q1\nACGTN\n+\nIIIII\n@q2\nttaa\n+\n@@@@\n";
        let recs = read_records(&data[..]).unwrap();
        assert_eq!(recs.len(), 2);
        assert_eq!(recs[0].seq, b"ACGTN");
        assert_eq!(recs[1].name, b"q2");
        assert_eq!(recs[1].seq, b"TTAA");
    }

    #[test]
    fn test_garbage_fails() {
        assert!(read_records(&b"ACGT\n"[..]).is_err());
    }

    #[test]
    fn test_visit_can_stop_early() {
        let mut seen = Vec::new();
        let n = for_each_record(&b">a\nAC\n>b\nGT\n>c\nTT\n"[..], |rec| {
            seen.push(rec.seq);
            false
        })
        .unwrap();
        assert_eq!(n, 1);
        assert_eq!(seen, vec![b"AC".to_vec()]);
    }

    #[test]
    fn test_send_records_stops_when_receiver_drops() {
        let (tx, rx) = channel::bounded(1);
        drop(rx);
        let n = send_records(&b">a\nAC\n>b\nGT\n"[..], &tx).unwrap();
        assert_eq!(n, 1);
    }

    #[test]
    fn test_file_input() {
        use std::io::Write;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reads.fa");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(b">x\nACGTACGT\n").unwrap();
        drop(f);
        let recs = read_records(open_with_decompression(&path).unwrap()).unwrap();
        assert_eq!(recs[0].seq, b"ACGTACGT");
    }
}
