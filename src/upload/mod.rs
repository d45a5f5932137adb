//! Upload orchestration
//!
//! Inputs are resolved into [`UploadTask`]s, routed by size to the direct
//! (form POST) or multipart (object store) path, and uploaded with bounded
//! concurrency. The remote side is reached through the traits in
//! [`remote`]; concrete HTTP implementations live in `http` behind the
//! `network` feature.

mod direct;
mod multipart;
mod orchestrator;
mod pool;
mod progress;
pub mod remote;
mod store;
mod task;

#[cfg(feature = "network")]
pub mod http;

use std::time::Duration;

pub use direct::DirectUploadClient;
pub use multipart::MultipartUploadClient;
pub use orchestrator::UploadOrchestrator;
pub use pool::{CancelToken, FirstError, Permit, Semaphore};
pub use progress::ProgressTracker;
pub use store::AwsCliStore;
pub use task::{canonical_filename, SizeClass, SourceFile, UploadInput, UploadReceipt, UploadTask};

/// Files strictly larger than this many bytes use the multipart path
pub const MULTIPART_THRESHOLD: u64 = 5_000_000_000;

/// Default number of concurrent direct uploads
pub const DEFAULT_UPLOAD_THREADS: usize = 4;

/// Attempts per direct upload on connection failures
pub const MAX_DIRECT_ATTEMPTS: u32 = 3;

/// Default internal concurrency of the multipart object store
pub const DEFAULT_MULTIPART_CONCURRENCY: usize = 10;

/// Upper bound on waiting for direct upload workers (7 days)
pub const WORKER_WAIT_BOUND: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// First delay between direct upload attempts; doubles per retry
pub const INITIAL_BACKOFF: Duration = Duration::from_millis(100);

/// `upload_type` sent with direct uploads
pub const STANDARD_UPLOAD_TYPE: &str = "standard";
