//! Paired-end lock-step framing
//!
//! # Overview
//!
//! Paired-end sequencing produces two files (R1 and R2) where records at the
//! same position are mates. [`PairedFramer`] pulls one record from each
//! framer per step and fails as soon as one file runs out before the other.
//!
//! Both inputs must be the same format; this is checked at construction,
//! before any record is read.

use crate::error::{Result, UploadError};
use crate::io::framer::RecordFramer;
use crate::types::{FileFormat, SequenceRecord};

/// Paired-end record iterator
///
/// Yields `(R1, R2)` tuples.
pub struct PairedFramer {
    reads: RecordFramer,
    mates: RecordFramer,
    pair_count: u64,
}

impl PairedFramer {
    /// Pair two framers
    ///
    /// # Errors
    ///
    /// Fails with a validation error if the two sources are different
    /// formats (FASTA/FASTQ).
    pub fn new(reads: RecordFramer, mates: RecordFramer) -> Result<Self> {
        if reads.format() != mates.format() {
            return Err(UploadError::Validation(
                "Paired files are different types (FASTA/FASTQ)".to_string(),
            ));
        }
        Ok(Self {
            reads,
            mates,
            pair_count: 0,
        })
    }

    /// Shared format of both files
    pub fn format(&self) -> FileFormat {
        self.reads.format()
    }

    /// The R1 framer
    pub fn reads(&self) -> &RecordFramer {
        &self.reads
    }

    /// The R2 framer
    pub fn mates(&self) -> &RecordFramer {
        &self.mates
    }

    /// Number of pairs yielded so far
    pub fn pairs_read(&self) -> u64 {
        self.pair_count
    }

    /// Raw source bytes consumed across both files
    pub fn source_bytes_read(&self) -> u64 {
        self.reads.source_bytes_read() + self.mates.source_bytes_read()
    }
}

impl Iterator for PairedFramer {
    type Item = Result<(SequenceRecord, SequenceRecord)>;

    fn next(&mut self) -> Option<Self::Item> {
        match (self.reads.next(), self.mates.next()) {
            (Some(Ok(r1)), Some(Ok(r2))) => {
                self.pair_count += 1;
                Some(Ok((r1, r2)))
            }

            (None, None) => None,

            (Some(Err(e)), _) | (_, Some(Err(e))) => Some(Err(e)),

            (Some(Ok(_)), None) | (None, Some(Ok(_))) => Some(Err(UploadError::Validation(
                format!(
                    "Paired read files are not the same length ({} and {} diverge after {} pairs)",
                    self.reads.name(),
                    self.mates.name(),
                    self.pair_count
                ),
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fastq(records: usize, tag: &str) -> RecordFramer {
        let mut data = Vec::new();
        for i in 0..records {
            data.extend_from_slice(format!("@read_{}/{}\nACGT\n+\nIIII\n", i, tag).as_bytes());
        }
        RecordFramer::from_bytes(data).unwrap()
    }

    #[test]
    fn test_paired_basic() {
        let mut paired = PairedFramer::new(fastq(3, "1"), fastq(3, "2")).unwrap();

        let pairs: Result<Vec<_>> = paired.by_ref().collect();
        let pairs = pairs.unwrap();
        assert_eq!(pairs.len(), 3);
        assert_eq!(paired.pairs_read(), 3);

        for (i, (r1, r2)) in pairs.iter().enumerate() {
            assert_eq!(r1.id, format!("read_{}/1", i).into_bytes());
            assert_eq!(r2.id, format!("read_{}/2", i).into_bytes());
        }
    }

    #[test]
    fn test_paired_r1_longer() {
        let paired = PairedFramer::new(fastq(3, "1"), fastq(2, "2")).unwrap();
        let results: Vec<_> = paired.collect();

        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok());
        assert!(results[1].is_ok());
        match &results[2] {
            Err(UploadError::Validation(msg)) => {
                assert!(msg.starts_with("Paired read files are not the same length"))
            }
            other => panic!("Expected Validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_paired_r2_longer() {
        let paired = PairedFramer::new(fastq(1, "1"), fastq(2, "2")).unwrap();
        let results: Vec<_> = paired.collect();
        assert_eq!(results.len(), 2);
        assert!(results[1].is_err());
    }

    #[test]
    fn test_paired_format_mismatch() {
        let fasta = RecordFramer::from_bytes(b">a\nACGT\n".to_vec()).unwrap();
        match PairedFramer::new(fasta, fastq(1, "2")) {
            Err(UploadError::Validation(msg)) => assert!(msg.contains("different types")),
            Err(other) => panic!("Expected Validation error, got {:?}", other),
            Ok(_) => panic!("Expected format mismatch"),
        }
    }

    #[test]
    fn test_paired_propagates_record_error() {
        let bad = RecordFramer::from_bytes(b"@a\nACZT\n+\nIIII\n".to_vec()).unwrap();
        let mut paired = PairedFramer::new(bad, fastq(1, "2")).unwrap();
        assert!(matches!(paired.next(), Some(Err(UploadError::Validation(_)))));
    }
}
