//! Worker coordination primitives
//!
//! A counting semaphore gating concurrent uploads, a shared cancellation
//! flag, and the write-once slot holding the first worker failure.

use crate::error::{Result, UploadError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

/// How often blocked waiters re-check their cancellation token
const CANCEL_POLL: Duration = Duration::from_millis(100);

/// Shared cancellation flag
///
/// Cloning is cheap; all clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Create an untriggered token
    pub fn new() -> Self {
        Self::default()
    }

    /// Trigger cancellation
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was triggered
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// `Err(Cancelled)` once cancellation was triggered
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(UploadError::Cancelled)
        } else {
            Ok(())
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Counting semaphore built on a mutex and a condition variable
#[derive(Debug)]
pub struct Semaphore {
    permits: Mutex<usize>,
    available: Condvar,
}

impl Semaphore {
    /// Create a semaphore with `permits` slots (at least one)
    pub fn new(permits: usize) -> Self {
        Self {
            permits: Mutex::new(permits.max(1)),
            available: Condvar::new(),
        }
    }

    /// Free slots right now
    pub fn available(&self) -> usize {
        *lock(&self.permits)
    }

    /// Block until a slot is free
    ///
    /// # Errors
    ///
    /// `Cancelled` if `cancel` fires while waiting.
    pub fn acquire(&self, cancel: &CancelToken) -> Result<Permit<'_>> {
        let mut permits = lock(&self.permits);
        while *permits == 0 {
            cancel.check()?;
            permits = self
                .available
                .wait_timeout(permits, CANCEL_POLL)
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .0;
        }
        cancel.check()?;
        *permits -= 1;
        Ok(Permit { semaphore: self })
    }

    fn release(&self) {
        *lock(&self.permits) += 1;
        self.available.notify_one();
    }
}

/// Held slot; released on drop
#[derive(Debug)]
pub struct Permit<'a> {
    semaphore: &'a Semaphore,
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        self.semaphore.release();
    }
}

/// Write-once slot for the first failure among workers
#[derive(Debug, Default)]
pub struct FirstError(Mutex<Option<UploadError>>);

impl FirstError {
    /// Store `err` unless an error is already stored
    ///
    /// Returns `true` if this call won.
    pub fn record(&self, err: UploadError) -> bool {
        let mut slot = lock(&self.0);
        if slot.is_some() {
            return false;
        }
        *slot = Some(err);
        true
    }

    /// Remove the recorded error
    pub fn take(&self) -> Option<UploadError> {
        lock(&self.0).take()
    }
}
