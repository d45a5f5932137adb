//! Common types used throughout fastx-upload

use std::fmt;

/// Detected text format of a sequence source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileFormat {
    /// Header line + (possibly wrapped) sequence block
    Fasta,
    /// Header, sequence, `+` separator and quality lines
    Fastq,
}

impl FileFormat {
    /// Byte that starts every record of this format
    pub fn record_marker(self) -> u8 {
        match self {
            FileFormat::Fasta => b'>',
            FileFormat::Fastq => b'@',
        }
    }

    /// Extension used for canonical output filenames
    pub fn canonical_extension(self) -> &'static str {
        match self {
            FileFormat::Fasta => ".fa",
            FileFormat::Fastq => ".fq",
        }
    }
}

impl fmt::Display for FileFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileFormat::Fasta => f.write_str("FASTA"),
            FileFormat::Fastq => f.write_str("FASTQ"),
        }
    }
}

/// Compression wrapper detected on a source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CompressionKind {
    /// Plain text
    #[default]
    None,
    /// gzip (including multi-member / bgzip)
    Gzip,
    /// bzip2
    Bzip2,
}

/// A framed sequence record
///
/// `quality` is present iff the source is FASTQ.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceRecord {
    /// Identifier line without the leading marker
    pub id: Vec<u8>,
    /// Sequence block (may contain line breaks for wrapped FASTA)
    pub sequence: Vec<u8>,
    /// Quality line (FASTQ only)
    pub quality: Option<Vec<u8>>,
}

impl SequenceRecord {
    /// Create a FASTA record
    pub fn fasta(id: impl Into<Vec<u8>>, sequence: impl Into<Vec<u8>>) -> Self {
        Self {
            id: id.into(),
            sequence: sequence.into(),
            quality: None,
        }
    }

    /// Create a FASTQ record
    pub fn fastq(
        id: impl Into<Vec<u8>>,
        sequence: impl Into<Vec<u8>>,
        quality: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            id: id.into(),
            sequence: sequence.into(),
            quality: Some(quality.into()),
        }
    }

    /// Format this record belongs to
    pub fn format(&self) -> FileFormat {
        if self.quality.is_some() {
            FileFormat::Fastq
        } else {
            FileFormat::Fasta
        }
    }

    /// Append the canonical text form of this record to `out`
    ///
    /// FASTA: `>{id}\n{sequence}\n`, FASTQ: `@{id}\n{sequence}\n+\n{quality}\n`.
    pub fn write_canonical(&self, out: &mut Vec<u8>) {
        out.reserve(self.canonical_len());
        out.push(self.format().record_marker());
        out.extend_from_slice(&self.id);
        out.push(b'\n');
        out.extend_from_slice(&self.sequence);
        out.push(b'\n');
        if let Some(quality) = &self.quality {
            out.extend_from_slice(b"+\n");
            out.extend_from_slice(quality);
            out.push(b'\n');
        }
    }

    /// Length in bytes of the canonical text form
    pub fn canonical_len(&self) -> usize {
        let base = 1 + self.id.len() + 1 + self.sequence.len() + 1;
        match &self.quality {
            Some(q) => base + 2 + q.len() + 1,
            None => base,
        }
    }
}
