//! Batch upload orchestration
//!
//! # Phases
//!
//! 1. Resolve every input (sniffing, sizes, canonical names). Any problem
//!    aborts the batch before a single request is made.
//! 2. Direct uploads: one thread per file gated by a semaphore of
//!    `max_threads` permits, or serially on the caller thread when
//!    `max_threads == 1`.
//! 3. Multipart uploads, strictly one after another on the caller thread,
//!    only if every direct upload succeeded.
//!
//! The first worker failure is kept and returned once every worker has
//! reported back. Waiting is bounded; when the bound expires the shared
//! cancel token fires and a timeout error is returned.

use super::direct::DirectUploadClient;
use super::multipart::MultipartUploadClient;
use super::pool::{CancelToken, FirstError, Semaphore};
use super::progress::ProgressTracker;
use super::remote::{ObjectStore, SamplesResource, UploadSession};
use super::task::{SizeClass, UploadInput, UploadReceipt, UploadTask};
use crate::config::UploadConfig;
use crate::error::{Result, UploadError};
use crate::io::{TranscodeOptions, Transcoder};
use log::{debug, info};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::Instant;

type Listener = Box<dyn FnMut(f64) + Send>;

/// Uploads batches of files and pairs
pub struct UploadOrchestrator {
    direct: DirectUploadClient,
    multipart: MultipartUploadClient,
    config: UploadConfig,
    cancel: CancelToken,
    listener: Option<Listener>,
}

impl UploadOrchestrator {
    /// Create an orchestrator over the given collaborators
    pub fn new(
        resource: Arc<dyn SamplesResource>,
        session: Arc<dyn UploadSession>,
        store: Arc<dyn ObjectStore>,
        config: UploadConfig,
    ) -> Self {
        let direct = DirectUploadClient::new(Arc::clone(&resource), Arc::clone(&session))
            .with_mode(config.direct_mode)
            .with_max_attempts(config.max_attempts);
        let multipart = MultipartUploadClient::new(resource, session, store)
            .with_concurrency(config.multipart_concurrency);
        Self {
            direct,
            multipart,
            config,
            cancel: CancelToken::new(),
            listener: None,
        }
    }

    /// Replace the direct upload client
    pub fn with_direct_client(mut self, client: DirectUploadClient) -> Self {
        self.direct = client;
        self
    }

    /// Report the aggregate progress fraction to `listener`
    pub fn with_progress<F>(mut self, listener: F) -> Self
    where
        F: FnMut(f64) + Send + 'static,
    {
        self.listener = Some(Box::new(listener));
        self
    }

    /// Token that aborts the batch when triggered
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// The batch configuration
    pub fn config(&self) -> &UploadConfig {
        &self.config
    }

    /// Resolve and upload `inputs`, returning one receipt per input in order
    pub fn upload(&mut self, inputs: Vec<UploadInput>) -> Result<Vec<UploadReceipt>> {
        self.config.validate()?;

        let tasks = inputs
            .into_iter()
            .map(|input| UploadTask::resolve(input, &self.config))
            .collect::<Result<Vec<_>>>()?;
        self.upload_tasks(tasks)
    }

    /// Upload already resolved tasks
    pub fn upload_tasks(&mut self, tasks: Vec<UploadTask>) -> Result<Vec<UploadReceipt>> {
        let mut progress = ProgressTracker::new(tasks.iter().map(|t| t.source.size()).collect());
        if let Some(listener) = self.listener.take() {
            progress = progress.with_listener(listener);
        }

        let tasks: Vec<Arc<UploadTask>> = tasks.into_iter().map(Arc::new).collect();
        let direct: Vec<usize> = indices_of(&tasks, SizeClass::Direct);
        let multipart: Vec<usize> = indices_of(&tasks, SizeClass::Multipart);
        info!(
            "Uploading {} file(s): {} direct, {} multipart",
            tasks.len(),
            direct.len(),
            multipart.len()
        );

        let mut receipts: Vec<Option<UploadReceipt>> = vec![None; tasks.len()];

        if self.config.max_threads > 1 && !direct.is_empty() {
            self.run_parallel(&tasks, &direct, &progress, &mut receipts)?;
        } else {
            for &index in &direct {
                let receipt = self.run_one(&tasks[index], index, &progress)?;
                receipts[index] = Some(receipt);
            }
        }

        for &index in &multipart {
            let receipt = self.run_one(&tasks[index], index, &progress)?;
            receipts[index] = Some(receipt);
        }

        receipts
            .into_iter()
            .zip(&tasks)
            .map(|(receipt, task)| {
                receipt.ok_or_else(|| {
                    UploadError::Upload(format!("No receipt for {}", task.canonical_filename))
                })
            })
            .collect()
    }

    /// Upload one task on the caller thread
    fn run_one(
        &self,
        task: &UploadTask,
        index: usize,
        progress: &ProgressTracker,
    ) -> Result<UploadReceipt> {
        let options = self.config.transcode_options();
        let open = opener(task, &options, progress, index);
        let receipt = match task.size_class {
            SizeClass::Direct => self.direct.upload(task, &open, &self.cancel)?,
            SizeClass::Multipart => self.multipart.upload(task, &open, &self.cancel)?,
        };
        progress.complete(index);
        Ok(receipt)
    }

    /// One worker thread per direct task, bounded by the semaphore
    fn run_parallel(
        &self,
        tasks: &[Arc<UploadTask>],
        direct: &[usize],
        progress: &ProgressTracker,
        receipts: &mut [Option<UploadReceipt>],
    ) -> Result<()> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_threads));
        let first_error = Arc::new(FirstError::default());
        let (tx, rx) = mpsc::channel::<(usize, Option<UploadReceipt>)>();
        let options = self.config.transcode_options();

        let mut handles = Vec::with_capacity(direct.len());
        for &index in direct {
            let task = Arc::clone(&tasks[index]);
            let semaphore = Arc::clone(&semaphore);
            let first_error = Arc::clone(&first_error);
            let client = self.direct.clone();
            let cancel = self.cancel.clone();
            let progress = progress.clone();
            let options = options.clone();
            let tx = tx.clone();

            let spawned = thread::Builder::new()
                .name(format!("upload-{}", index))
                .spawn(move || {
                    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                        let _permit = semaphore.acquire(&cancel)?;
                        let open = opener(&task, &options, &progress, index);
                        let receipt = client.upload(&task, &open, &cancel)?;
                        progress.complete(index);
                        Ok::<_, UploadError>(receipt)
                    }));

                    let receipt = match outcome {
                        Ok(Ok(receipt)) => Some(receipt),
                        Ok(Err(e)) => {
                            debug!("Upload of {} failed: {}", task.canonical_filename, e);
                            first_error.record(e);
                            None
                        }
                        Err(_) => {
                            first_error.record(UploadError::Upload(format!(
                                "Upload worker for {} panicked",
                                task.canonical_filename
                            )));
                            None
                        }
                    };
                    // the receiver only disappears after a timeout
                    let _ = tx.send((index, receipt));
                });
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    abandon_workers(&self.cancel, handles);
                    return Err(UploadError::Io(e));
                }
            }
        }
        drop(tx);

        let wait = self.config.worker_wait();
        let deadline = Instant::now() + wait;
        for _ in 0..handles.len() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match rx.recv_timeout(remaining) {
                Ok((index, receipt)) => receipts[index] = receipt,
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    self.cancel.cancel();
                    return Err(UploadError::Timeout {
                        seconds: wait.as_secs(),
                    });
                }
                Err(mpsc::RecvTimeoutError::Disconnected) => break,
            }
        }

        for handle in handles {
            // every worker has reported, so joins return promptly
            let _ = handle.join();
        }

        match first_error.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Cancel the batch and wait for already started workers to wind down
fn abandon_workers(cancel: &CancelToken, handles: Vec<JoinHandle<()>>) {
    cancel.cancel();
    for handle in handles {
        let _ = handle.join();
    }
}

fn indices_of(tasks: &[Arc<UploadTask>], class: SizeClass) -> Vec<usize> {
    tasks
        .iter()
        .enumerate()
        .filter(|(_, task)| task.size_class == class)
        .map(|(index, _)| index)
        .collect()
}

/// Transcoder factory for one task, reporting into progress slot `index`
fn opener<'a>(
    task: &'a UploadTask,
    options: &'a TranscodeOptions,
    progress: &'a ProgressTracker,
    index: usize,
) -> impl Fn() -> Result<Transcoder> + 'a {
    move || {
        Ok(task
            .source
            .open_transcoder(options)?
            .with_progress(progress.reporter(index)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_abandon_joins_started_workers() {
        let cancel = CancelToken::new();
        let semaphore = Arc::new(Semaphore::new(1));
        let finished = Arc::new(AtomicUsize::new(0));
        let _held = semaphore.acquire(&cancel).unwrap();

        let handles: Vec<_> = (0..3)
            .map(|_| {
                let cancel = cancel.clone();
                let semaphore = Arc::clone(&semaphore);
                let finished = Arc::clone(&finished);
                thread::spawn(move || {
                    assert!(semaphore.acquire(&cancel).is_err());
                    finished.fetch_add(1, Ordering::SeqCst);
                })
            })
            .collect();
        thread::sleep(Duration::from_millis(50));
        assert_eq!(finished.load(Ordering::SeqCst), 0);

        abandon_workers(&cancel, handles);
        assert!(cancel.is_cancelled());
        assert_eq!(finished.load(Ordering::SeqCst), 3);
    }
}
