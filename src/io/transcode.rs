//! Canonical transcoding session
//!
//! A [`Transcoder`] pulls validated records out of one framer (single-end)
//! or two framers in lock step (paired-end), serializes them to canonical
//! text and feeds them into an [`OutputBuffer`]. Consumers pull bounded
//! chunks with [`Transcoder::read_bytes`] or treat the session as a
//! [`std::io::Read`].
//!
//! # Example
//!
//! ```
//! use fastx_upload::io::Transcoder;
//! use fastx_upload::RecordFramer;
//!
//! # fn main() -> fastx_upload::Result<()> {
//! let reads = RecordFramer::from_bytes(b">a\nACGT\n".to_vec())?;
//! let mates = RecordFramer::from_bytes(b">b\nTGCA\n".to_vec())?;
//!
//! let mut session = Transcoder::new(reads, Some(mates), false)?;
//! let out = session.read_bytes(None)?;
//! assert_eq!(&out[..], b">a\nACGT\n>b\nTGCA\n");
//! # Ok(())
//! # }
//! ```

use crate::error::{Result, UploadError};
use crate::io::compression::DataSource;
use crate::io::framer::{FramerOptions, RecordFramer};
use crate::io::paired::PairedFramer;
use crate::io::sink::OutputBuffer;
use crate::types::FileFormat;
use crate::validation::ValidationWarning;
use bytes::Bytes;
use std::io::{self, Read};

/// Called after each pull with the R1 name and cumulative source bytes
pub type ProgressCallback = Box<dyn FnMut(&str, u64) + Send>;

/// How a transcoding session opens and emits its sources
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscodeOptions {
    /// Framing and validation options applied to every source
    pub framer: FramerOptions,
    /// Gzip the canonical output
    pub recompress: bool,
}

impl Default for TranscodeOptions {
    fn default() -> Self {
        Self {
            framer: FramerOptions::default(),
            recompress: true,
        }
    }
}

enum Records {
    Single(RecordFramer),
    Paired(PairedFramer),
}

impl Records {
    fn reads(&self) -> &RecordFramer {
        match self {
            Records::Single(framer) => framer,
            Records::Paired(paired) => paired.reads(),
        }
    }

    fn source_bytes_read(&self) -> u64 {
        match self {
            Records::Single(framer) => framer.source_bytes_read(),
            Records::Paired(paired) => paired.source_bytes_read(),
        }
    }

    /// Serialize the next record (or pair) into `out`; `false` at end
    fn pull_into(&mut self, out: &mut Vec<u8>) -> Result<bool> {
        match self {
            Records::Single(framer) => match framer.next() {
                Some(record) => {
                    record?.write_canonical(out);
                    Ok(true)
                }
                None => Ok(false),
            },
            Records::Paired(paired) => match paired.next() {
                Some(pair) => {
                    let (r1, r2) = pair?;
                    r1.write_canonical(out);
                    r2.write_canonical(out);
                    Ok(true)
                }
                None => Ok(false),
            },
        }
    }
}

/// Streaming validation and transcoding session
pub struct Transcoder {
    records: Records,
    output: OutputBuffer,
    progress: Option<ProgressCallback>,
    scratch: Vec<u8>,
    total_written: u64,
    failure: Option<String>,
}

impl Transcoder {
    /// Create a session over R1 and an optional R2 framer
    ///
    /// # Errors
    ///
    /// Fails if the two framers detected different formats.
    pub fn new(reads: RecordFramer, mates: Option<RecordFramer>, recompress: bool) -> Result<Self> {
        let records = match mates {
            Some(mates) => Records::Paired(PairedFramer::new(reads, mates)?),
            None => Records::Single(reads),
        };
        Ok(Self {
            records,
            output: OutputBuffer::new(recompress),
            progress: None,
            scratch: Vec::new(),
            total_written: 0,
            failure: None,
        })
    }

    /// Open and sniff the given sources
    pub fn open(
        reads: &DataSource,
        mates: Option<&DataSource>,
        options: &TranscodeOptions,
    ) -> Result<Self> {
        let r1 = RecordFramer::open(reads, &options.framer)?;
        let r2 = mates
            .map(|m| RecordFramer::open(m, &options.framer))
            .transpose()?;
        Self::new(r1, r2, options.recompress)
    }

    /// Report progress through `callback`
    pub fn with_progress<F>(mut self, callback: F) -> Self
    where
        F: FnMut(&str, u64) + Send + 'static,
    {
        self.progress = Some(Box::new(callback));
        self
    }

    /// Detected format (shared by both mates)
    pub fn format(&self) -> FileFormat {
        self.records.reads().format()
    }

    /// Name of the R1 source
    pub fn name(&self) -> &str {
        self.records.reads().name()
    }

    /// Whether this session interleaves two files
    pub fn is_paired(&self) -> bool {
        matches!(self.records, Records::Paired(_))
    }

    /// Canonical bytes produced so far (before recompression)
    pub fn total_written(&self) -> u64 {
        self.total_written
    }

    /// Raw source bytes consumed so far (both mates when paired)
    pub fn source_bytes_read(&self) -> u64 {
        self.records.source_bytes_read()
    }

    /// Records yielded so far (pairs count twice)
    pub fn records_read(&self) -> u64 {
        match &self.records {
            Records::Single(framer) => framer.records_read(),
            Records::Paired(paired) => {
                paired.reads().records_read() + paired.mates().records_read()
            }
        }
    }

    /// Distinct warnings of every framer in this session
    pub fn warnings(&self) -> Vec<ValidationWarning> {
        match &self.records {
            Records::Single(framer) => framer.warnings().warnings(),
            Records::Paired(paired) => {
                let mut all = paired.reads().warnings().warnings();
                all.extend(paired.mates().warnings().warnings());
                all
            }
        }
    }

    /// Whether the session has produced all its output
    pub fn is_finished(&self) -> bool {
        self.output.is_closed() && self.output.is_empty()
    }

    /// Pull up to `n` output bytes, or everything that remains with `None`
    ///
    /// Records are framed until at least `n` bytes are buffered or the
    /// session ended. An empty result means the session is exhausted.
    ///
    /// # Errors
    ///
    /// Framing and validation errors end the session; every later call
    /// fails as well.
    pub fn read_bytes(&mut self, n: Option<usize>) -> Result<Bytes> {
        if let Some(msg) = &self.failure {
            return Err(UploadError::Upload(format!(
                "Transcoding of {} already failed: {}",
                self.name(),
                msg
            )));
        }

        let want = n.unwrap_or(usize::MAX);
        while !self.output.is_closed() && self.output.len() < want {
            if let Err(e) = self.pull() {
                self.failure = Some(e.to_string());
                return Err(e);
            }
        }
        Ok(self.output.read(want))
    }

    /// Frame one step and write it to the output buffer
    fn pull(&mut self) -> Result<()> {
        self.scratch.clear();
        let more = self.records.pull_into(&mut self.scratch)?;

        if more {
            self.output.write_all(&self.scratch)?;
            self.total_written += self.scratch.len() as u64;
        } else {
            self.output.close()?;
        }

        if let Some(callback) = self.progress.as_mut() {
            let reads = self.records.reads();
            callback(reads.name(), self.records.source_bytes_read());
        }
        Ok(())
    }
}

impl Read for Transcoder {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let chunk = self
            .read_bytes(Some(buf.len()))
            .map_err(UploadError::into_io)?;
        buf[..chunk.len()].copy_from_slice(&chunk);
        Ok(chunk.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::MultiGzDecoder;
    use std::sync::{Arc, Mutex};

    fn framer(data: &[u8]) -> RecordFramer {
        RecordFramer::from_bytes(data.to_vec()).unwrap()
    }

    fn plain(data: &[u8]) -> Transcoder {
        Transcoder::new(framer(data), None, false).unwrap()
    }

    #[test]
    fn test_single_record_roundtrip() {
        let mut session = plain(b">id\nACGT\n");
        assert_eq!(&session.read_bytes(None).unwrap()[..], b">id\nACGT\n");
        assert!(session.is_finished());
        assert!(session.read_bytes(None).unwrap().is_empty());
    }

    #[test]
    fn test_missing_newline_added() {
        let mut session = plain(b">id\nACGT");
        assert_eq!(&session.read_bytes(None).unwrap()[..], b">id\nACGT\n");
        assert_eq!(session.total_written(), 9);
    }

    #[test]
    fn test_paired_interleave() {
        let mut session =
            Transcoder::new(framer(b">a\nACGT\n"), Some(framer(b">b\nTGCA\n")), false).unwrap();
        assert!(session.is_paired());
        assert_eq!(&session.read_bytes(None).unwrap()[..], b">a\nACGT\n>b\nTGCA\n");
    }

    #[test]
    fn test_paired_unequal_lengths() {
        let mut session = Transcoder::new(
            framer(b">a\nACGT\n>c\nAAAA\n"),
            Some(framer(b">b\nTGCA\n")),
            false,
        )
        .unwrap();
        match session.read_bytes(None) {
            Err(UploadError::Validation(msg)) => assert!(msg.contains("not the same length")),
            other => panic!("Expected Validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_paired_format_mismatch() {
        let result = Transcoder::new(framer(b">a\nACGT\n"), Some(framer(b"@b\nA\n+\nI\n")), false);
        assert!(matches!(result, Err(UploadError::Validation(_))));
    }

    #[test]
    fn test_bounded_reads() {
        let mut session = plain(b">a\nACGT\n>b\nTTTT\n>c\nGGGG\n");
        let first = session.read_bytes(Some(4)).unwrap();
        assert_eq!(&first[..], b">a\nA");

        let mut rest = first.to_vec();
        loop {
            let chunk = session.read_bytes(Some(5)).unwrap();
            if chunk.is_empty() {
                break;
            }
            assert!(chunk.len() <= 5);
            rest.extend_from_slice(&chunk);
        }
        assert_eq!(rest, b">a\nACGT\n>b\nTTTT\n>c\nGGGG\n");
    }

    #[test]
    fn test_recompressed_output_gunzips_to_plain() {
        let data = b"@r1\nACGU\n+\nIIII\n@r2\nGGXX\n+\nIIII\n";
        let expected = plain(data).read_bytes(None).unwrap();

        let mut gz = Transcoder::new(framer(data), None, true).unwrap();
        let compressed = gz.read_bytes(None).unwrap();
        assert_eq!(&compressed[..2], &[0x1f, 0x8b]);

        let mut decoded = Vec::new();
        MultiGzDecoder::new(&compressed[..]).read_to_end(&mut decoded).unwrap();
        assert_eq!(decoded, &expected[..]);
        assert_eq!(&decoded[..], b"@r1\nACGT\n+\nIIII\n@r2\nGGNN\n+\nIIII\n");
    }

    #[test]
    fn test_failure_is_sticky() {
        let mut session = plain(b">a\nACGT\n>b\nACZT\n");
        assert!(matches!(session.read_bytes(None), Err(UploadError::Validation(_))));
        assert!(session.read_bytes(Some(1)).is_err());
    }

    #[test]
    fn test_io_read_carries_typed_error() {
        let mut session = plain(b">a\nACGT\n>b\nACZT\n");
        let mut sink = Vec::new();
        let err = session.read_to_end(&mut sink).unwrap_err();
        assert!(UploadError::from_io(err).is_validation());
    }

    #[test]
    fn test_io_read_copies_everything() {
        let mut session = plain(b"@r\nAC\n+\nII\n@s\nGT\n+\nII\n");
        let mut out = String::new();
        session.read_to_string(&mut out).unwrap();
        assert_eq!(out, "@r\nAC\n+\nII\n@s\nGT\n+\nII\n");
        assert_eq!(session.records_read(), 2);
    }

    #[test]
    fn test_progress_reported_with_r1_name() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let data = b">a\nACGT\n>b\nACGT\n";
        let mut session = plain(data).with_progress(move |name, bytes| {
            sink.lock().unwrap().push((name.to_string(), bytes));
        });
        session.read_bytes(None).unwrap();

        let seen = seen.lock().unwrap();
        // two records plus the closing pull
        assert_eq!(seen.len(), 3);
        assert!(seen.iter().all(|(name, _)| name == "File"));
        assert!(seen.windows(2).all(|w| w[0].1 <= w[1].1));
        assert_eq!(seen.last().unwrap().1, data.len() as u64);
    }

    #[test]
    fn test_warnings_collected_from_both_mates() {
        let session = Transcoder::new(
            framer(b">a\tx\nACGU\n"),
            Some(framer(b">b\nACGT\n")),
            false,
        )
        .unwrap();
        let mut session = session;
        session.read_bytes(None).unwrap();
        assert_eq!(session.warnings().len(), 2);
    }
}
