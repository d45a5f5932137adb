//! Upload and API configuration
//!
//! Settings come from three layers, later ones winning: built-in defaults,
//! an optional TOML file and explicit overrides (CLI flags or `with_*`
//! builder calls).
//!
//! ```toml
//! [upload]
//! max_threads = 8
//! multipart_concurrency = 16
//! recompress = true
//! allow_iupac = false
//! check_filenames = true
//! direct_mode = "init_upload"     # or "presigned"
//!
//! [api]
//! base_url = "https://api.example.org/"
//! ```

use crate::error::{Result, UploadError};
use crate::io::{FramerOptions, TranscodeOptions, DEFAULT_READ_CHUNK};
use crate::upload::{
    DEFAULT_MULTIPART_CONCURRENCY, DEFAULT_UPLOAD_THREADS, MAX_DIRECT_ATTEMPTS, WORKER_WAIT_BOUND,
};
use crate::validation::Alphabet;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Environment variable holding the API base URL
pub const API_BASE_ENV: &str = "FASTX_UPLOAD_API_BASE";

/// Environment variable holding the API key
pub const API_KEY_ENV: &str = "FASTX_UPLOAD_API_KEY";

/// Which server flow small files use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DirectMode {
    /// `init_upload` → form POST → `confirm_upload`
    #[default]
    InitUpload,
    /// Presign → sign → form POST → callback (older servers)
    Presigned,
}

/// Tunables of one upload batch
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UploadConfig {
    /// Concurrent direct uploads; `1` uploads serially on the caller thread
    pub max_threads: usize,
    /// Internal concurrency of the object store for multipart uploads
    pub multipart_concurrency: usize,
    /// Gzip the canonical stream before sending it
    pub recompress: bool,
    /// Accept IUPAC ambiguity codes
    pub allow_iupac: bool,
    /// Require filename extensions to match the content
    pub check_filenames: bool,
    /// Bytes read per framer refill
    pub read_chunk_size: usize,
    /// Server flow for direct uploads
    pub direct_mode: DirectMode,
    /// Attempts per direct upload on connection failures
    pub max_attempts: u32,
    /// Upper bound on waiting for direct upload workers, in seconds
    pub worker_wait_secs: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_threads: DEFAULT_UPLOAD_THREADS,
            multipart_concurrency: DEFAULT_MULTIPART_CONCURRENCY,
            recompress: true,
            allow_iupac: false,
            check_filenames: true,
            read_chunk_size: DEFAULT_READ_CHUNK,
            direct_mode: DirectMode::InitUpload,
            max_attempts: MAX_DIRECT_ATTEMPTS,
            worker_wait_secs: WORKER_WAIT_BOUND.as_secs(),
        }
    }
}

impl UploadConfig {
    /// Set the number of concurrent direct uploads
    pub fn with_max_threads(mut self, threads: usize) -> Self {
        self.max_threads = threads;
        self
    }

    /// Set the multipart store concurrency
    pub fn with_multipart_concurrency(mut self, concurrency: usize) -> Self {
        self.multipart_concurrency = concurrency;
        self
    }

    /// Enable or disable gzip recompression
    pub fn with_recompress(mut self, recompress: bool) -> Self {
        self.recompress = recompress;
        self
    }

    /// Enable or disable IUPAC ambiguity codes
    pub fn with_iupac(mut self, allow: bool) -> Self {
        self.allow_iupac = allow;
        self
    }

    /// Enable or disable filename extension checks
    pub fn with_filename_checks(mut self, check: bool) -> Self {
        self.check_filenames = check;
        self
    }

    /// Set the framer refill size
    pub fn with_read_chunk_size(mut self, bytes: usize) -> Self {
        self.read_chunk_size = bytes;
        self
    }

    /// Select the direct upload flow
    pub fn with_direct_mode(mut self, mode: DirectMode) -> Self {
        self.direct_mode = mode;
        self
    }

    /// Set the number of direct upload attempts
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Set the bound on waiting for workers
    pub fn with_worker_wait(mut self, wait: Duration) -> Self {
        self.worker_wait_secs = wait.as_secs();
        self
    }

    /// Bound on waiting for workers
    pub fn worker_wait(&self) -> Duration {
        Duration::from_secs(self.worker_wait_secs)
    }

    /// Alphabet implied by `allow_iupac`
    pub fn alphabet(&self) -> Alphabet {
        if self.allow_iupac {
            Alphabet::Iupac
        } else {
            Alphabet::Strict
        }
    }

    /// Framer options implied by this configuration
    pub fn framer_options(&self) -> FramerOptions {
        FramerOptions {
            alphabet: self.alphabet(),
            check_filename: self.check_filenames,
            chunk_size: self.read_chunk_size,
        }
    }

    /// Transcoding options implied by this configuration
    pub fn transcode_options(&self) -> TranscodeOptions {
        TranscodeOptions {
            framer: self.framer_options(),
            recompress: self.recompress,
        }
    }

    /// Check that every value is usable
    pub fn validate(&self) -> Result<()> {
        if self.max_threads == 0 {
            return Err(UploadError::Config("max_threads must be at least 1".into()));
        }
        if self.multipart_concurrency == 0 {
            return Err(UploadError::Config(
                "multipart_concurrency must be at least 1".into(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(UploadError::Config("max_attempts must be at least 1".into()));
        }
        if self.read_chunk_size == 0 {
            return Err(UploadError::Config("read_chunk_size must be positive".into()));
        }
        if self.worker_wait_secs == 0 {
            return Err(UploadError::Config("worker_wait_secs must be positive".into()));
        }
        Ok(())
    }

    /// Load the `[upload]` table of a TOML file
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        Ok(ConfigFile::load(path)?.upload)
    }
}

/// Where and how to reach the samples API
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiConfig {
    /// Base URL; server-relative paths are joined onto it
    pub base_url: String,
    /// API key sent as the basic-auth username
    pub api_key: Option<String>,
}

impl ApiConfig {
    /// Create a configuration for `base_url`
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key,
        }
    }

    /// Resolve settings from explicit values, the config file and the environment
    ///
    /// Explicit values win over the file, which wins over the environment.
    pub fn resolve(
        base_url: Option<String>,
        api_key: Option<String>,
        file: Option<&ApiSettings>,
    ) -> Result<Self> {
        let base_url = base_url
            .or_else(|| file.and_then(|f| f.base_url.clone()))
            .or_else(|| std::env::var(API_BASE_ENV).ok())
            .ok_or_else(|| {
                UploadError::Config(format!(
                    "API base URL not set (use --api-base or {})",
                    API_BASE_ENV
                ))
            })?;
        let api_key = api_key
            .or_else(|| file.and_then(|f| f.api_key.clone()))
            .or_else(|| std::env::var(API_KEY_ENV).ok());

        let config = Self::new(base_url, api_key);
        config.validate()?;
        Ok(config)
    }

    /// Base URL with exactly one trailing slash
    pub fn normalized_base(&self) -> String {
        format!("{}/", self.base_url.trim_end_matches('/'))
    }

    /// Check the base URL scheme
    pub fn validate(&self) -> Result<()> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(UploadError::Config(format!(
                "API base URL must start with http:// or https:// (got {})",
                self.base_url
            )));
        }
        Ok(())
    }
}

/// `[api]` table of the config file
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ApiSettings {
    /// Base URL of the samples API
    pub base_url: Option<String>,
    /// API key
    pub api_key: Option<String>,
}

/// Contents of a TOML configuration file
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigFile {
    /// Upload tunables
    pub upload: UploadConfig,
    /// API settings
    pub api: ApiSettings,
}

impl ConfigFile {
    /// Parse a TOML configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| {
            UploadError::Config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        Self::parse(&contents)
    }

    /// Parse TOML text
    pub fn parse(contents: &str) -> Result<Self> {
        let config: ConfigFile = toml::from_str(contents)
            .map_err(|e| UploadError::Config(format!("Failed to parse TOML config: {}", e)))?;
        config.upload.validate()?;
        Ok(config)
    }
}
