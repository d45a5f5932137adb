//! Upload inputs, resolved sources and per-file tasks

use super::MULTIPART_THRESHOLD;
use crate::config::UploadConfig;
use crate::error::{Result, UploadError};
use crate::io::{sniff, DataSource, FramerOptions, TranscodeOptions, Transcoder};
use crate::types::{CompressionKind, FileFormat};
use std::fmt;
use std::path::{Path, PathBuf};

const COMPRESSION_EXTENSIONS: &[&str] = &[".gz", ".gzip", ".bz", ".bz2", ".bzip"];
const FASTA_EXTENSIONS: &[&str] = &[".fa", ".fna", ".fasta"];
const FASTQ_EXTENSIONS: &[&str] = &[".fq", ".fastq"];

/// Assumed worst-case expansion of compressed sequence data
const DECOMPRESSION_RATIO: u64 = 20;

/// Largest object the store accepts (5 TiB)
const MAX_OBJECT_SIZE: u64 = 5 << 40;

/// A file, or an R1/R2 pair, requested for upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadInput {
    /// One file
    Single(PathBuf),
    /// Paired-end reads, interleaved into one upload
    Paired(PathBuf, PathBuf),
}

impl UploadInput {
    /// Single-file input
    pub fn single<P: AsRef<Path>>(path: P) -> Self {
        UploadInput::Single(path.as_ref().to_path_buf())
    }

    /// Paired-end input
    pub fn paired<P: AsRef<Path>, Q: AsRef<Path>>(reads: P, mates: Q) -> Self {
        UploadInput::Paired(reads.as_ref().to_path_buf(), mates.as_ref().to_path_buf())
    }

    /// The R1 (or only) path
    pub fn reads(&self) -> &Path {
        match self {
            UploadInput::Single(path) | UploadInput::Paired(path, _) => path,
        }
    }

    /// The R2 path of a pair
    pub fn mates(&self) -> Option<&Path> {
        match self {
            UploadInput::Single(_) => None,
            UploadInput::Paired(_, mates) => Some(mates),
        }
    }
}

impl fmt::Display for UploadInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadInput::Single(path) => write!(f, "{}", path.display()),
            UploadInput::Paired(r1, r2) => write!(f, "{} + {}", r1.display(), r2.display()),
        }
    }
}

/// A sniffed input with known format and size
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    input: UploadInput,
    format: FileFormat,
    compression: CompressionKind,
    size: u64,
    output_estimate: u64,
}

impl SourceFile {
    /// Sniff every path of `input` and sum their sizes
    ///
    /// # Errors
    ///
    /// Format, extension and size problems are reported here, before any
    /// network request. Paired files must share a format.
    pub fn resolve(input: UploadInput, options: &FramerOptions) -> Result<Self> {
        let (format, compression, mut size) = sniff_path(input.reads(), options)?;
        let mut output_estimate = estimate_output(compression, size);

        if let Some(mates) = input.mates() {
            let (mate_format, mate_compression, mate_size) = sniff_path(mates, options)?;
            if mate_format != format {
                return Err(UploadError::Validation(
                    "Paired files are different types (FASTA/FASTQ)".to_string(),
                ));
            }
            size += mate_size;
            output_estimate += estimate_output(mate_compression, mate_size);
        }

        Ok(Self {
            input,
            format,
            compression,
            size,
            output_estimate: output_estimate.min(MAX_OBJECT_SIZE),
        })
    }

    /// The requested input
    pub fn input(&self) -> &UploadInput {
        &self.input
    }

    /// Detected format
    pub fn format(&self) -> FileFormat {
        self.format
    }

    /// Compression of the R1 file
    pub fn compression(&self) -> CompressionKind {
        self.compression
    }

    /// On-disk bytes (both mates when paired)
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Upper bound on the transcoded stream size
    ///
    /// Compressed inputs may inflate when stored uncompressed, so their
    /// on-disk size is scaled up; plain inputs only gain a little slack.
    pub fn output_size_estimate(&self) -> u64 {
        self.output_estimate
    }

    /// Whether this is a paired input
    pub fn is_paired(&self) -> bool {
        self.input.mates().is_some()
    }

    /// Start a fresh transcoding session over this source
    pub fn open_transcoder(&self, options: &TranscodeOptions) -> Result<Transcoder> {
        let reads = DataSource::from_path(self.input.reads());
        let mates = self.input.mates().map(DataSource::from_path);
        Transcoder::open(&reads, mates.as_ref(), options)
    }
}

fn sniff_path(path: &Path, options: &FramerOptions) -> Result<(FileFormat, CompressionKind, u64)> {
    let source = DataSource::from_path(path);
    let size = source.size()?.unwrap_or(0);
    let sniffed = sniff(source.open()?, options.check_filename)?;
    Ok((sniffed.format, sniffed.compression, size))
}

fn estimate_output(compression: CompressionKind, size: u64) -> u64 {
    match compression {
        CompressionKind::None => size.saturating_add(size / 64 + 4096),
        CompressionKind::Gzip | CompressionKind::Bzip2 => size.saturating_mul(DECOMPRESSION_RATIO),
    }
}

/// Which transfer path a file takes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SizeClass {
    /// Form POST through the samples API
    Direct,
    /// Object store upload for very large files
    Multipart,
}

impl SizeClass {
    /// Classify by on-disk size; the threshold itself is still direct
    pub fn for_size(size: u64) -> Self {
        if size > MULTIPART_THRESHOLD {
            SizeClass::Multipart
        } else {
            SizeClass::Direct
        }
    }
}

impl fmt::Display for SizeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SizeClass::Direct => write!(f, "direct"),
            SizeClass::Multipart => write!(f, "multipart"),
        }
    }
}

/// Name the uploaded object gets on the server
///
/// Paired-read markers (`_R1_`, `.r2.`, ...) are removed from paired
/// uploads, compression extensions are dropped, FASTA/FASTQ extensions are
/// normalized to `.fa`/`.fq`, and `.gz` is appended when recompressing.
///
/// ```
/// use fastx_upload::upload::canonical_filename;
/// use std::path::Path;
///
/// let name = canonical_filename(Path::new("/data/sample_R1_001.fastq.gz"), true, true);
/// assert_eq!(name, "sample001.fq.gz");
/// ```
pub fn canonical_filename(reads: &Path, paired: bool, recompress: bool) -> String {
    let base = reads
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let base = if paired { strip_pair_markers(&base) } else { base };

    let (mut stem, mut ext) = split_extension(&base);
    if COMPRESSION_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()) {
        let (inner_stem, inner_ext) = split_extension(stem);
        stem = inner_stem;
        ext = inner_ext;
    }

    let lower = ext.to_ascii_lowercase();
    let ext = if FASTA_EXTENSIONS.contains(&lower.as_str()) {
        FileFormat::Fasta.canonical_extension()
    } else if FASTQ_EXTENSIONS.contains(&lower.as_str()) {
        FileFormat::Fastq.canonical_extension()
    } else {
        ext
    };

    let mut name = format!("{}{}", stem, ext);
    if recompress {
        name.push_str(".gz");
    }
    name
}

/// Remove every `[._][Rr][12][._]` occurrence, scanning left to right
fn strip_pair_markers(name: &str) -> String {
    let bytes = name.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let marker = bytes.len() - i >= 4
            && matches!(bytes[i], b'.' | b'_')
            && matches!(bytes[i + 1], b'R' | b'r')
            && matches!(bytes[i + 2], b'1' | b'2')
            && matches!(bytes[i + 3], b'.' | b'_');
        if marker {
            i += 4;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    // markers are ASCII, so the remaining bytes are still valid UTF-8
    String::from_utf8_lossy(&out).into_owned()
}

/// Split off the last extension, ignoring leading dots
fn split_extension(name: &str) -> (&str, &str) {
    let leading = name.len() - name.trim_start_matches('.').len();
    match name[leading..].rfind('.') {
        Some(dot) => name.split_at(leading + dot),
        None => (name, ""),
    }
}

/// One file's upload plan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadTask {
    /// Resolved source
    pub source: SourceFile,
    /// Name the server stores the object under
    pub canonical_filename: String,
    /// Transfer path
    pub size_class: SizeClass,
}

impl UploadTask {
    /// Resolve `input` and plan its upload
    pub fn resolve(input: UploadInput, config: &UploadConfig) -> Result<Self> {
        let source = SourceFile::resolve(input, &config.framer_options())?;
        Ok(Self::from_source(source, config.recompress))
    }

    /// Plan the upload of an already resolved source
    pub fn from_source(source: SourceFile, recompress: bool) -> Self {
        let canonical_filename =
            canonical_filename(source.input().reads(), source.is_paired(), recompress);
        let size_class = SizeClass::for_size(source.size());
        Self {
            source,
            canonical_filename,
            size_class,
        }
    }
}

/// Confirmation of one finished upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    /// Name the object was stored under
    pub filename: String,
    /// Transfer path used
    pub size_class: SizeClass,
    /// Server-side identifier (sample id, object location or S3 path)
    pub remote_id: String,
}
