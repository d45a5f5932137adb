//! Pull-based output buffer for transcoded bytes
//!
//! The `OutputBuffer` is the write side of a transcoding session: canonical
//! records are written into it (optionally through a streaming gzip
//! encoder) and consumers drain it with [`OutputBuffer::read`].
//!
//! # Invariants
//!
//! - Buffered length only decreases by `read`
//! - `close` flushes the encoder and ends writes permanently
//!
//! # Example
//!
//! ```
//! use fastx_upload::io::OutputBuffer;
//!
//! let mut out = OutputBuffer::plain();
//! out.write_all(b">a\nACGT\n").unwrap();
//! out.close().unwrap();
//! assert_eq!(&out.read(3)[..], b">a\n");
//! assert_eq!(&out.read(usize::MAX)[..], b"ACGT\n");
//! ```

use bytes::{Bytes, BytesMut};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{self, Write};

/// Growable byte queue
#[derive(Debug, Default)]
pub struct ChunkBuffer {
    buf: BytesMut,
}

impl ChunkBuffer {
    /// Buffered bytes
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether nothing is buffered
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Remove up to `n` bytes from the front
    pub fn read(&mut self, n: usize) -> Bytes {
        let n = n.min(self.buf.len());
        self.buf.split_to(n).freeze()
    }
}

impl Write for ChunkBuffer {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

enum Stage {
    /// Uncompressed, accepting writes
    Plain(ChunkBuffer),

    /// Gzip compressed, accepting writes
    ///
    /// Uses flate2 with default compression level (6).
    Gzip(GzEncoder<ChunkBuffer>),

    /// Writes ended; remaining bytes can still be read
    Closed(ChunkBuffer),
}

/// Output buffer of a transcoding session
pub struct OutputBuffer {
    stage: Stage,
}

impl OutputBuffer {
    /// Uncompressed buffer
    pub fn plain() -> Self {
        Self {
            stage: Stage::Plain(ChunkBuffer::default()),
        }
    }

    /// Buffer that gzip-compresses everything written into it
    pub fn gzip() -> Self {
        Self {
            stage: Stage::Gzip(GzEncoder::new(ChunkBuffer::default(), Compression::default())),
        }
    }

    /// Create a buffer, recompressing if asked to
    pub fn new(recompress: bool) -> Self {
        if recompress {
            Self::gzip()
        } else {
            Self::plain()
        }
    }

    /// Bytes ready to be read
    pub fn len(&self) -> usize {
        self.buffer().len()
    }

    /// Whether no bytes are ready to be read
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether writes have ended
    pub fn is_closed(&self) -> bool {
        matches!(self.stage, Stage::Closed(_))
    }

    /// Append bytes
    ///
    /// # Errors
    ///
    /// Fails once the buffer is closed.
    pub fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        match &mut self.stage {
            Stage::Plain(buf) => buf.write_all(data),
            Stage::Gzip(encoder) => encoder.write_all(data),
            Stage::Closed(_) => Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "Cannot write to closed output buffer",
            )),
        }
    }

    /// End writes, finishing the gzip member if compressing
    ///
    /// Closing twice is a no-op.
    pub fn close(&mut self) -> io::Result<()> {
        let stage = std::mem::replace(&mut self.stage, Stage::Closed(ChunkBuffer::default()));
        self.stage = Stage::Closed(match stage {
            Stage::Plain(buf) | Stage::Closed(buf) => buf,
            Stage::Gzip(encoder) => encoder.finish()?,
        });
        Ok(())
    }

    /// Remove up to `n` ready bytes
    pub fn read(&mut self, n: usize) -> Bytes {
        match &mut self.stage {
            Stage::Plain(buf) | Stage::Closed(buf) => buf.read(n),
            Stage::Gzip(encoder) => encoder.get_mut().read(n),
        }
    }

    fn buffer(&self) -> &ChunkBuffer {
        match &self.stage {
            Stage::Plain(buf) | Stage::Closed(buf) => buf,
            Stage::Gzip(encoder) => encoder.get_ref(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::io::Read;

    #[test]
    fn test_plain_read_partial() {
        let mut out = OutputBuffer::plain();
        out.write_all(b"hello ").unwrap();
        out.write_all(b"world").unwrap();
        assert_eq!(out.len(), 11);

        assert_eq!(&out.read(5)[..], b"hello");
        assert_eq!(out.len(), 6);
        assert_eq!(&out.read(100)[..], b" world");
        assert!(out.is_empty());
    }

    #[test]
    fn test_write_after_close_fails() {
        let mut out = OutputBuffer::plain();
        out.close().unwrap();
        assert!(out.is_closed());
        assert!(out.write_all(b"x").is_err());
        // closing again is fine
        out.close().unwrap();
    }

    #[test]
    fn test_gzip_roundtrip() {
        let mut out = OutputBuffer::gzip();
        for i in 0..1000 {
            out.write_all(format!(">r{}\nACGT\n", i).as_bytes()).unwrap();
        }
        out.close().unwrap();

        let compressed = out.read(usize::MAX);
        assert_eq!(&compressed[..2], &[0x1f, 0x8b]);

        let mut decoded = String::new();
        GzDecoder::new(&compressed[..]).read_to_string(&mut decoded).unwrap();
        assert_eq!(decoded.lines().count(), 2000);
        assert!(decoded.starts_with(">r0\nACGT\n"));
    }

    #[test]
    fn test_gzip_bytes_readable_before_close() {
        let mut out = OutputBuffer::gzip();
        // incompressible-ish payload forces the encoder to emit output
        let payload: Vec<u8> = (0..200_000u32)
            .map(|i| (i.wrapping_mul(2654435761) >> 24) as u8)
            .collect();
        out.write_all(&payload).unwrap();
        assert!(out.len() > 0);

        let head = out.read(10);
        assert_eq!(head.len(), 10);
        out.close().unwrap();
        assert!(out.len() > 0);
    }
}
