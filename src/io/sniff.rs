//! Format sniffing: unwrap compression and classify FASTA vs FASTQ
//!
//! Only the first byte of the stream is inspected (after transparent
//! decompression and any leading whitespace). The classifying marker byte
//! (`>` or `@`) is consumed, so the framer always starts right after a
//! record marker.

use crate::error::{Result, UploadError};
use crate::io::compression::{decompress, ByteCounter, CountingReader, OpenedSource, IO_BUFFER_SIZE};
use crate::types::{CompressionKind, FileFormat};
use std::io::{BufRead, BufReader};

/// Sources advertising fewer bytes than this are rejected outright
pub const MIN_SOURCE_SIZE: u64 = 70;

const GZIP_MAGIC: u8 = 0x1f;
const BZIP2_MAGIC: u8 = b'B';

const GZIP_ENDINGS: &[&str] = &[".gz", ".gzip"];
const BZIP2_ENDINGS: &[&str] = &[".bz2", ".bz", ".bzip"];
const FASTA_MARKERS: &[&str] = &[".fa", ".fna", ".fasta"];
const FASTQ_MARKERS: &[&str] = &[".fq", ".fastq"];

/// A classified source, positioned just after its first record marker
pub struct SniffedSource {
    /// Decompressed stream
    pub reader: Box<dyn BufRead + Send>,
    /// Detected format
    pub format: FileFormat,
    /// Detected compression wrapper
    pub compression: CompressionKind,
    /// Name used in messages
    pub name: String,
    /// Raw (pre-decompression) bytes consumed so far
    pub source_bytes: ByteCounter,
}

/// Inspect `source`, unwrap its compression and classify its format
///
/// When `check_filename` is set and the source has a filename, the
/// filename's extensions must agree with the detected content.
pub fn sniff(source: OpenedSource, check_filename: bool) -> Result<SniffedSource> {
    let OpenedSource {
        reader,
        filename,
        size,
    } = source;
    let name = filename.clone().unwrap_or_else(|| "File".to_string());
    let checked_name = if check_filename {
        filename.map(|f| f.to_ascii_lowercase())
    } else {
        None
    };

    if let Some(size) = size {
        if size < MIN_SOURCE_SIZE {
            return Err(UploadError::Validation(format!(
                "{} is too small to be analyzed: {} bytes",
                name, size
            )));
        }
    }

    let (counting, source_bytes) = CountingReader::new(reader);
    let mut reader: Box<dyn BufRead + Send> =
        Box::new(BufReader::with_capacity(IO_BUFFER_SIZE, counting));

    let compression = match peek_byte(&mut reader)? {
        Some(GZIP_MAGIC) => {
            if let Some(f) = &checked_name {
                if !ends_with_any(f, GZIP_ENDINGS) {
                    return Err(UploadError::Validation(format!(
                        "{} is gzipped, but lacks a \".gz\" ending",
                        name
                    )));
                }
            }
            CompressionKind::Gzip
        }
        Some(BZIP2_MAGIC) => {
            if let Some(f) = &checked_name {
                if !ends_with_any(f, BZIP2_ENDINGS) {
                    return Err(UploadError::Validation(format!(
                        "{} is bzipped, but lacks a \".bz2\" ending",
                        name
                    )));
                }
            }
            CompressionKind::Bzip2
        }
        _ => CompressionKind::None,
    };
    let mut reader = decompress(reader, compression);

    skip_whitespace(&mut reader).map_err(|e| corrupt(&name, compression, e))?;
    let first = peek_byte(&mut reader).map_err(|e| corrupt(&name, compression, e))?;

    let format = match first {
        Some(b'>') => {
            if let Some(f) = &checked_name {
                if !contains_any(f, FASTA_MARKERS) {
                    return Err(UploadError::Validation(format!(
                        "{} is FASTA, but lacks a \".fa\" ending",
                        name
                    )));
                }
            }
            FileFormat::Fasta
        }
        Some(b'@') => {
            if let Some(f) = &checked_name {
                if !contains_any(f, FASTQ_MARKERS) {
                    return Err(UploadError::Validation(format!(
                        "{} is FASTQ, but lacks a \".fq\" ending",
                        name
                    )));
                }
            }
            FileFormat::Fastq
        }
        _ => {
            return Err(UploadError::Validation(format!(
                "{} is not valid FASTX",
                name
            )))
        }
    };
    reader.consume(1);

    Ok(SniffedSource {
        reader,
        format,
        compression,
        name,
        source_bytes,
    })
}

fn peek_byte(reader: &mut Box<dyn BufRead + Send>) -> std::io::Result<Option<u8>> {
    Ok(reader.fill_buf()?.first().copied())
}

fn skip_whitespace(reader: &mut Box<dyn BufRead + Send>) -> std::io::Result<()> {
    loop {
        let (skip, done) = {
            let buf = reader.fill_buf()?;
            if buf.is_empty() {
                return Ok(());
            }
            let skip = buf.iter().take_while(|b| b.is_ascii_whitespace()).count();
            (skip, skip < buf.len())
        };
        reader.consume(skip);
        if done {
            return Ok(());
        }
    }
}

fn corrupt(name: &str, compression: CompressionKind, err: std::io::Error) -> UploadError {
    match compression {
        CompressionKind::None => UploadError::Io(err),
        _ => UploadError::Validation(format!(
            "{} could not be decompressed ({:?}): {}",
            name, compression, err
        )),
    }
}

fn ends_with_any(name: &str, endings: &[&str]) -> bool {
    endings.iter().any(|e| name.ends_with(e))
}

fn contains_any(name: &str, markers: &[&str]) -> bool {
    markers.iter().any(|m| name.contains(m))
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::{Cursor, Read, Write};

    fn named(data: Vec<u8>, name: &str) -> OpenedSource {
        OpenedSource::new(Box::new(Cursor::new(data)), Some(name.to_string()), None)
    }

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    fn expect_validation(result: Result<SniffedSource>, needle: &str) {
        match result {
            Err(UploadError::Validation(msg)) => {
                assert!(msg.contains(needle), "message {:?} lacks {:?}", msg, needle)
            }
            Err(other) => panic!("Expected Validation error, got {:?}", other),
            Ok(_) => panic!("Expected Validation error, got Ok"),
        }
    }

    #[test]
    fn test_plain_fasta() {
        let sniffed = sniff(OpenedSource::from_bytes(b">id\nACGT\n".to_vec()), true).unwrap();
        assert_eq!(sniffed.format, FileFormat::Fasta);
        assert_eq!(sniffed.compression, CompressionKind::None);

        // marker consumed
        let mut rest = String::new();
        let mut reader = sniffed.reader;
        reader.read_to_string(&mut rest).unwrap();
        assert_eq!(rest, "id\nACGT\n");
    }

    #[test]
    fn test_plain_fastq() {
        let sniffed = sniff(named(b"@r\nA\n+\nI\n".to_vec(), "reads.fastq"), true).unwrap();
        assert_eq!(sniffed.format, FileFormat::Fastq);
    }

    #[test]
    fn test_gzip_fastq() {
        let data = gzip(b"@r\nACGT\n+\nIIII\n");
        let sniffed = sniff(named(data, "reads.fq.gz"), true).unwrap();
        assert_eq!(sniffed.format, FileFormat::Fastq);
        assert_eq!(sniffed.compression, CompressionKind::Gzip);
    }

    #[test]
    fn test_gzip_without_extension_rejected() {
        let data = gzip(b"@r\nACGT\n+\nIIII\n");
        expect_validation(sniff(named(data, "reads.fq"), true), "lacks a \".gz\" ending");
    }

    #[test]
    fn test_gzip_without_extension_allowed_when_unchecked() {
        let data = gzip(b"@r\nACGT\n+\nIIII\n");
        assert!(sniff(named(data, "reads.fq"), false).is_ok());
    }

    #[test]
    fn test_bzip2_fasta() {
        let mut encoder =
            bzip2::write::BzEncoder::new(Vec::new(), bzip2::Compression::default());
        encoder.write_all(b">chr\nACGTN\n").unwrap();
        let data = encoder.finish().unwrap();

        let sniffed = sniff(named(data.clone(), "genome.fa.bz2"), true).unwrap();
        assert_eq!(sniffed.compression, CompressionKind::Bzip2);
        assert_eq!(sniffed.format, FileFormat::Fasta);

        expect_validation(sniff(named(data, "genome.fa"), true), "bzipped");
    }

    #[test]
    fn test_extension_mismatch() {
        expect_validation(
            sniff(named(b">id\nACGT\n".to_vec(), "reads.fq"), true),
            "is FASTA, but lacks",
        );
        expect_validation(
            sniff(named(b"@id\nA\n+\nI\n".to_vec(), "reads.fasta"), true),
            "is FASTQ, but lacks",
        );
    }

    #[test]
    fn test_extension_check_is_case_insensitive() {
        assert!(sniff(named(b">id\nACGT\n".to_vec(), "GENOME.FASTA"), true).is_ok());
    }

    #[test]
    fn test_not_fastx() {
        expect_validation(
            sniff(OpenedSource::from_bytes(b"chr1\t100\t200\n".to_vec()), true),
            "not valid FASTX",
        );
        expect_validation(sniff(OpenedSource::from_bytes(Vec::new()), true), "not valid FASTX");
    }

    #[test]
    fn test_leading_whitespace_skipped() {
        let sniffed = sniff(OpenedSource::from_bytes(b"\n\n  >id\nACGT\n".to_vec()), true).unwrap();
        assert_eq!(sniffed.format, FileFormat::Fasta);
    }

    #[test]
    fn test_too_small() {
        let source = OpenedSource::new(
            Box::new(Cursor::new(b">id\nACGT\n".to_vec())),
            Some("tiny.fa".into()),
            Some(9),
        );
        expect_validation(sniff(source, true), "too small to be analyzed: 9 bytes");
    }
}
