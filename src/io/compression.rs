//! Source opening and transparent decompression
//!
//! Sources are opened as raw byte streams wrapped in a [`CountingReader`] so
//! progress can be reported in *source* bytes (the on-disk, possibly
//! compressed size), then unwrapped through a streaming gzip or bzip2
//! decoder once the sniffer has looked at the magic byte.
//!
//! Both decoders are the multi-member variants: bgzip files and
//! concatenated `cat a.gz b.gz` outputs decode completely.

use crate::error::Result;
use crate::types::CompressionKind;
use bzip2::read::MultiBzDecoder;
use flate2::read::MultiGzDecoder;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Buffer size used when wrapping raw and decompressed streams
pub const IO_BUFFER_SIZE: usize = 128 * 1024;

/// Where sequence bytes come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataSource {
    /// Local file path
    Local(PathBuf),

    /// Standard input (no filename, no advertised size)
    Stdin,
}

impl DataSource {
    /// Create a local file data source
    pub fn from_path<P: AsRef<Path>>(path: P) -> Self {
        DataSource::Local(path.as_ref().to_path_buf())
    }

    /// Parse a command-line argument, treating `-` as stdin
    pub fn from_arg(arg: &str) -> Self {
        if arg == "-" {
            DataSource::Stdin
        } else {
            DataSource::from_path(arg)
        }
    }

    /// Display name used in messages
    pub fn name(&self) -> String {
        match self {
            DataSource::Local(path) => path.display().to_string(),
            DataSource::Stdin => "<stdin>".to_string(),
        }
    }

    /// Size advertised by the source, if it has one
    pub fn size(&self) -> Result<Option<u64>> {
        match self {
            DataSource::Local(path) => Ok(Some(std::fs::metadata(path)?.len())),
            DataSource::Stdin => Ok(None),
        }
    }

    /// Open the source as an unbuffered byte stream
    pub fn open(&self) -> Result<OpenedSource> {
        match self {
            DataSource::Local(path) => {
                let file = File::open(path)?;
                let size = file.metadata()?.len();
                Ok(OpenedSource::new(
                    Box::new(file),
                    Some(self.name()),
                    Some(size),
                ))
            }
            DataSource::Stdin => Ok(OpenedSource::new(Box::new(io::stdin()), None, None)),
        }
    }
}

/// An opened raw stream plus what the sniffer needs to know about it
pub struct OpenedSource {
    /// Raw bytes (not yet decompressed)
    pub reader: Box<dyn Read + Send>,
    /// Filename used for extension checks; `None` for anonymous streams
    pub filename: Option<String>,
    /// Advertised total size in bytes
    pub size: Option<u64>,
}

impl OpenedSource {
    /// Wrap an arbitrary reader
    pub fn new(reader: Box<dyn Read + Send>, filename: Option<String>, size: Option<u64>) -> Self {
        Self {
            reader,
            filename,
            size,
        }
    }

    /// Wrap an in-memory buffer (no filename, no advertised size)
    pub fn from_bytes(data: impl Into<Vec<u8>>) -> Self {
        Self::new(Box::new(io::Cursor::new(data.into())), None, None)
    }
}

/// Shared counter of bytes pulled through a [`CountingReader`]
#[derive(Debug, Clone, Default)]
pub struct ByteCounter(Arc<AtomicU64>);

impl ByteCounter {
    /// Bytes counted so far
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }

    fn add(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }
}

/// Reader adapter counting the bytes read from the inner stream
pub struct CountingReader<R> {
    inner: R,
    counter: ByteCounter,
}

impl<R: Read> CountingReader<R> {
    /// Wrap `inner`, returning the adapter and a handle to its counter
    pub fn new(inner: R) -> (Self, ByteCounter) {
        let counter = ByteCounter::default();
        (
            Self {
                inner,
                counter: counter.clone(),
            },
            counter,
        )
    }
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.counter.add(n as u64);
        Ok(n)
    }
}

/// Wrap a raw stream in the decoder for `kind`
///
/// The returned reader is buffered so the sniffer can peek into the
/// decompressed bytes.
pub fn decompress(
    raw: Box<dyn BufRead + Send>,
    kind: CompressionKind,
) -> Box<dyn BufRead + Send> {
    match kind {
        CompressionKind::None => raw,
        CompressionKind::Gzip => Box::new(BufReader::with_capacity(
            IO_BUFFER_SIZE,
            MultiGzDecoder::new(raw),
        )),
        CompressionKind::Bzip2 => Box::new(BufReader::with_capacity(
            IO_BUFFER_SIZE,
            MultiBzDecoder::new(raw),
        )),
    }
}
