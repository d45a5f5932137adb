//! fastx-upload: streaming validation and upload of FASTA/FASTQ files
//!
//! # Overview
//!
//! fastx-upload takes sequencing files (FASTA or FASTQ, plain, gzip or
//! bzip2, single or paired-end) and turns them into a validated, canonical,
//! optionally recompressed byte stream that is uploaded while it is being
//! produced. Nothing is staged on disk and memory stays bounded regardless
//! of file size.
//!
//! ## Pipeline
//!
//! ```text
//! sniff ─▶ RecordFramer ─▶ SequenceValidator ─▶ Transcoder ─▶ upload client
//!  (gz/bz2, FASTA/FASTQ)      (per record)     (pairing, gzip)  (direct/multipart)
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use fastx_upload::io::{DataSource, TranscodeOptions, Transcoder};
//! use std::io::Read;
//!
//! # fn main() -> fastx_upload::Result<()> {
//! let mut session = Transcoder::open(
//!     &DataSource::from_path("reads_R1.fq.gz"),
//!     Some(&DataSource::from_path("reads_R2.fq.gz")),
//!     &TranscodeOptions::default(),
//! )?;
//!
//! let mut interleaved_gz = Vec::new();
//! session.read_to_end(&mut interleaved_gz)?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Organization
//!
//! - [`io`]: sniffing, framing, pairing and transcoding
//! - [`validation`]: alphabet checks, base normalization, warnings
//! - [`upload`]: task planning, direct/multipart clients, orchestration
//! - [`config`]: upload tunables and API settings

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod config;
pub mod error;
pub mod io;
pub mod types;
pub mod upload;
pub mod validation;

// Re-export commonly used types
pub use config::{ApiConfig, DirectMode, UploadConfig};
pub use error::{Result, UploadError};
pub use io::{PairedFramer, RecordFramer, Transcoder};
pub use types::{CompressionKind, FileFormat, SequenceRecord};
pub use upload::{UploadInput, UploadOrchestrator, UploadReceipt};
pub use validation::{Alphabet, ValidationWarning};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
