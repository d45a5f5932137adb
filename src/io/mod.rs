//! I/O module: sniffing, framing and transcoding
//!
//! Every stage streams: memory stays bounded by one read chunk plus one
//! partial record per source, regardless of file size.

pub mod compression;
mod framer;
mod paired;
pub mod sink;
mod sniff;
mod transcode;

pub use compression::{ByteCounter, CountingReader, DataSource, OpenedSource};
pub use framer::{FramerOptions, RecordFramer, DEFAULT_READ_CHUNK};
pub use paired::PairedFramer;
pub use sink::OutputBuffer;
pub use sniff::{sniff, SniffedSource, MIN_SOURCE_SIZE};
pub use transcode::{ProgressCallback, TranscodeOptions, Transcoder};
