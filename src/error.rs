//! Error types for fastx-upload

use std::io;
use thiserror::Error;

/// Result type alias for fastx-upload operations
pub type Result<T> = std::result::Result<T, UploadError>;

/// Error types that can occur while validating or uploading sequence files
#[derive(Debug, Error)]
pub enum UploadError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Structural or content problem in a source file
    ///
    /// Always fatal for the file and never retried.
    #[error("{0}")]
    Validation(String),

    /// Upload initiation, transfer or confirmation failed
    #[error("{0}")]
    Upload(String),

    /// Connection-level transport failure (transient, retryable)
    #[error("Connection error: {0}")]
    Connection(String),

    /// Non-transient transport failure
    #[error("Network error: {0}")]
    Network(String),

    /// Unexpected HTTP status from the API
    #[error("HTTP error {status}: {url}")]
    Http {
        /// HTTP status code
        status: u16,
        /// URL that failed
        url: String,
    },

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Operation aborted through a cancellation token
    #[error("Upload cancelled")]
    Cancelled,

    /// Workers did not finish within the wait bound
    #[error("Timed out after {seconds}s waiting for upload workers")]
    Timeout {
        /// Wait bound in seconds
        seconds: u64,
    },
}

impl UploadError {
    /// Whether this error is a transient connection failure
    pub fn is_connection(&self) -> bool {
        matches!(self, UploadError::Connection(_))
    }

    /// Whether this error is a validation failure
    pub fn is_validation(&self) -> bool {
        matches!(self, UploadError::Validation(_))
    }

    /// Wrap into an `io::Error` so the error can cross a `Read` boundary
    pub fn into_io(self) -> io::Error {
        match self {
            UploadError::Io(e) => e,
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }

    /// Recover a typed error previously wrapped with [`UploadError::into_io`]
    pub fn from_io(err: io::Error) -> Self {
        if err
            .get_ref()
            .map(|inner| inner.is::<UploadError>())
            .unwrap_or(false)
        {
            if let Some(inner) = err.into_inner() {
                if let Ok(typed) = inner.downcast::<UploadError>() {
                    return *typed;
                }
            }
            return UploadError::Io(io::Error::other("failed to recover wrapped error"));
        }
        UploadError::Io(err)
    }
}
