//! Incremental record framing over chunked input
//!
//! # Algorithm
//!
//! The framer keeps a byte buffer of unconsumed input. Each time a record
//! cannot be completed it compacts the buffer and appends one more bounded
//! chunk. Records are matched in one of two modes:
//!
//! - **interior**: a record must be followed by the next record's marker
//!   (`\n>` for FASTA, `\n@` for FASTQ), proving it is complete
//! - **final**: after an empty read, trailing newlines are trimmed and the
//!   last record is terminated by the end of the buffer
//!
//! The sniffer consumes the first marker, and every interior match consumes
//! the following one, so matching always starts right after a marker.
//!
//! # Memory
//!
//! One read chunk plus at most one partially framed record, regardless of
//! file size. Records are validated and yielded one at a time.

use crate::error::{Result, UploadError};
use crate::io::compression::{ByteCounter, DataSource, OpenedSource};
use crate::io::sniff::{sniff, SniffedSource};
use crate::types::{CompressionKind, FileFormat, SequenceRecord};
use crate::validation::{Alphabet, SequenceValidator, WarningRegistry};
use std::io::{self, BufRead, Read};
use std::path::Path;

/// Default number of bytes pulled from the source per refill (16 MiB)
pub const DEFAULT_READ_CHUNK: usize = 16 * 1024 * 1024;

/// How sources are opened and validated
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FramerOptions {
    /// Accepted nucleotide alphabet
    pub alphabet: Alphabet,
    /// Require filename extensions to match the detected content
    pub check_filename: bool,
    /// Bytes read from the source per refill
    pub chunk_size: usize,
}

impl Default for FramerOptions {
    fn default() -> Self {
        Self {
            alphabet: Alphabet::Strict,
            check_filename: true,
            chunk_size: DEFAULT_READ_CHUNK,
        }
    }
}

/// Outcome of one framing attempt
#[derive(Debug)]
enum Frame {
    /// A complete record and the number of buffer bytes it used
    Record(SequenceRecord, usize),
    /// More input is needed (or, in final mode, the buffer is empty)
    Incomplete,
    /// The buffer can never frame
    Malformed(String),
}

/// Streaming record framer
///
/// Yields validated [`SequenceRecord`]s. The iterator is lazy, forward-only
/// and stops after the first error.
///
/// # Example
///
/// ```
/// use fastx_upload::RecordFramer;
///
/// # fn main() -> fastx_upload::Result<()> {
/// let framer = RecordFramer::from_bytes(b">a\nACGT\n>b\nTTGA".to_vec())?;
/// let records = framer.collect::<fastx_upload::Result<Vec<_>>>()?;
/// assert_eq!(records.len(), 2);
/// assert_eq!(records[1].sequence, b"TTGA");
/// # Ok(())
/// # }
/// ```
pub struct RecordFramer {
    reader: Box<dyn BufRead + Send>,
    format: FileFormat,
    compression: CompressionKind,
    name: String,
    buffer: Vec<u8>,
    cursor: usize,
    chunk_size: usize,
    eof: bool,
    finished: bool,
    records: u64,
    source_bytes: ByteCounter,
    validator: SequenceValidator,
}

impl RecordFramer {
    /// Create a framer over an already sniffed source
    pub fn new(sniffed: SniffedSource, options: &FramerOptions) -> Self {
        let SniffedSource {
            reader,
            format,
            compression,
            name,
            source_bytes,
        } = sniffed;
        Self {
            reader,
            format,
            compression,
            validator: SequenceValidator::new(name.clone(), options.alphabet),
            name,
            buffer: Vec::new(),
            cursor: 0,
            chunk_size: options.chunk_size.max(1),
            eof: false,
            finished: false,
            records: 0,
            source_bytes,
        }
    }

    /// Sniff and frame an opened source
    pub fn from_source(source: OpenedSource, options: &FramerOptions) -> Result<Self> {
        let sniffed = sniff(source, options.check_filename)?;
        Ok(Self::new(sniffed, options))
    }

    /// Sniff and frame a data source
    pub fn open(source: &DataSource, options: &FramerOptions) -> Result<Self> {
        Self::from_source(source.open()?, options)
    }

    /// Sniff and frame a local file
    pub fn from_path<P: AsRef<Path>>(path: P, options: &FramerOptions) -> Result<Self> {
        Self::open(&DataSource::from_path(path), options)
    }

    /// Frame an in-memory buffer with default options
    pub fn from_bytes(data: Vec<u8>) -> Result<Self> {
        Self::from_source(OpenedSource::from_bytes(data), &FramerOptions::default())
    }

    /// Override the refill chunk size
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Detected format
    pub fn format(&self) -> FileFormat {
        self.format
    }

    /// Detected compression
    pub fn compression(&self) -> CompressionKind {
        self.compression
    }

    /// Name used in messages
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Raw source bytes consumed so far
    pub fn source_bytes_read(&self) -> u64 {
        self.source_bytes.get()
    }

    /// Records yielded so far
    pub fn records_read(&self) -> u64 {
        self.records
    }

    /// Warnings emitted for this stream
    pub fn warnings(&self) -> &WarningRegistry {
        self.validator.warnings()
    }

    fn next_record(&mut self) -> Result<Option<SequenceRecord>> {
        loop {
            match frame(self.format, &self.buffer[self.cursor..], self.eof) {
                Frame::Record(mut record, used) => {
                    self.cursor += used;
                    self.validator.validate(&mut record)?;
                    self.records += 1;
                    return Ok(Some(record));
                }
                Frame::Malformed(msg) => {
                    return Err(UploadError::Validation(format!(
                        "{} is not valid {}: {} (record {})",
                        self.name,
                        self.format,
                        msg,
                        self.records + 1
                    )));
                }
                Frame::Incomplete if self.eof => {
                    if self.records == 0 {
                        return Err(UploadError::Validation(format!(
                            "{} contains no {} records",
                            self.name, self.format
                        )));
                    }
                    return Ok(None);
                }
                Frame::Incomplete => self.fill()?,
            }
        }
    }

    /// Compact consumed bytes and append one chunk
    fn fill(&mut self) -> Result<()> {
        if self.cursor > 0 {
            self.buffer.drain(..self.cursor);
            self.cursor = 0;
        }

        let read = Read::by_ref(&mut self.reader)
            .take(self.chunk_size as u64)
            .read_to_end(&mut self.buffer)
            .map_err(|e| self.read_error(e))?;

        if read == 0 {
            self.eof = true;
            while matches!(self.buffer.last(), Some(b'\n') | Some(b'\r')) {
                self.buffer.pop();
            }
        }
        Ok(())
    }

    fn read_error(&self, err: io::Error) -> UploadError {
        let corrupt = matches!(
            err.kind(),
            io::ErrorKind::InvalidData | io::ErrorKind::InvalidInput | io::ErrorKind::UnexpectedEof
        );
        if corrupt && self.compression != CompressionKind::None {
            UploadError::Validation(format!("{} could not be decompressed: {}", self.name, err))
        } else {
            UploadError::Io(err)
        }
    }
}

impl Iterator for RecordFramer {
    type Item = Result<SequenceRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.next_record() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}

fn frame(format: FileFormat, buf: &[u8], last: bool) -> Frame {
    if buf.is_empty() {
        return Frame::Incomplete;
    }
    match format {
        FileFormat::Fasta => frame_fasta(buf, last),
        FileFormat::Fastq => frame_fastq(buf, last),
    }
}

fn frame_fasta(buf: &[u8], last: bool) -> Frame {
    let Some(header_end) = find(buf, b'\n', 0) else {
        return truncated(last, "header is not followed by a sequence");
    };
    let id = trim_cr(&buf[..header_end]);
    if id.is_empty() {
        return Frame::Malformed("record has an empty header".to_string());
    }

    let seq_start = header_end + 1;
    let (block, used) = match find(buf, b'>', seq_start) {
        Some(next) => {
            if buf[next - 1] != b'\n' {
                return Frame::Malformed(format!(
                    "unexpected '>' inside the sequence of {}",
                    lossy(id)
                ));
            }
            (&buf[seq_start..next], next + 1)
        }
        None if last => (&buf[seq_start..], buf.len()),
        None => return Frame::Incomplete,
    };

    let sequence = canonical_block(block);
    if sequence.is_empty() {
        return Frame::Malformed(format!("{} has an empty sequence", lossy(id)));
    }
    Frame::Record(SequenceRecord::fasta(id, sequence), used)
}

fn frame_fastq(buf: &[u8], last: bool) -> Frame {
    let Some(header_end) = find(buf, b'\n', 0) else {
        return truncated(last, "header is not followed by a sequence line");
    };
    let id = trim_cr(&buf[..header_end]);
    if id.is_empty() {
        return Frame::Malformed("record has an empty header".to_string());
    }

    let Some(seq_end) = find(buf, b'\n', header_end + 1) else {
        return truncated(last, "sequence is not followed by a '+' line");
    };
    let sequence = trim_cr(&buf[header_end + 1..seq_end]);
    if sequence.is_empty() {
        return Frame::Malformed(format!("{} has an empty sequence", lossy(id)));
    }

    let sep_start = seq_end + 1;
    match buf.get(sep_start) {
        Some(b'+') => {}
        Some(_) => {
            return Frame::Malformed(format!(
                "expected '+' separator line in {}",
                lossy(id)
            ))
        }
        None => return truncated(last, "sequence is not followed by a '+' line"),
    }
    let Some(sep_end) = find(buf, b'\n', sep_start) else {
        return truncated(last, "separator is not followed by a quality line");
    };

    let qual_start = sep_end + 1;
    let (quality, used) = match find(buf, b'\n', qual_start) {
        Some(qual_end) => match buf.get(qual_end + 1) {
            Some(b'@') => (trim_cr(&buf[qual_start..qual_end]), qual_end + 2),
            Some(_) => {
                return Frame::Malformed(format!(
                    "expected '@' to start the record after {}",
                    lossy(id)
                ))
            }
            None if last => (trim_cr(&buf[qual_start..qual_end]), qual_end + 1),
            None => return Frame::Incomplete,
        },
        None if last => (trim_cr(&buf[qual_start..]), buf.len()),
        None => return Frame::Incomplete,
    };

    if quality.is_empty() {
        return Frame::Malformed(format!("{} has an empty quality line", lossy(id)));
    }
    if quality.len() != sequence.len() {
        return Frame::Malformed(format!(
            "sequence length ({}) != quality length ({}) in {}",
            sequence.len(),
            quality.len(),
            lossy(id)
        ));
    }
    Frame::Record(SequenceRecord::fastq(id, sequence, quality), used)
}

fn truncated(last: bool, what: &str) -> Frame {
    if last {
        Frame::Malformed(format!("truncated record: {}", what))
    } else {
        Frame::Incomplete
    }
}

fn find(buf: &[u8], needle: u8, from: usize) -> Option<usize> {
    buf.get(from..)?
        .iter()
        .position(|&b| b == needle)
        .map(|i| i + from)
}

fn trim_cr(line: &[u8]) -> &[u8] {
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// Drop carriage returns and trailing line breaks from a sequence block
fn canonical_block(block: &[u8]) -> Vec<u8> {
    let mut sequence: Vec<u8> = block.iter().copied().filter(|&b| b != b'\r').collect();
    while sequence.last() == Some(&b'\n') {
        sequence.pop();
    }
    sequence
}

fn lossy(id: &[u8]) -> String {
    String::from_utf8_lossy(id).into_owned()
}
