//! Direct (form POST) uploads with connection retry
//!
//! The transcoded stream is posted as the `file` part of a multipart form
//! after the server-provided fields. Only connection-level failures are
//! retried, and every attempt re-opens the source from the start.

use super::pool::{CancelToken, FirstError};
use super::remote::{
    ConfirmUploadRequest, FormFile, HttpResponse, InitUploadRequest, SamplesResource,
    UploadSession,
};
use super::task::{UploadReceipt, UploadTask};
use super::{INITIAL_BACKOFF, MAX_DIRECT_ATTEMPTS, STANDARD_UPLOAD_TYPE};
use crate::config::DirectMode;
use crate::error::{Result, UploadError};
use crate::io::Transcoder;
use log::{debug, info, warn};
use serde_json::{json, Map, Value};
use std::io::{self, Read};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Request body that remembers the typed error behind a failed read
///
/// HTTP clients only see an opaque `io::Error` when the body fails; the
/// original error is kept in the shared slot so it can be surfaced instead
/// of the transport error it caused.
pub(crate) struct TrackedBody {
    inner: Transcoder,
    failure: Arc<FirstError>,
}

impl TrackedBody {
    pub(crate) fn new(inner: Transcoder) -> (Self, Arc<FirstError>) {
        let failure = Arc::new(FirstError::default());
        (
            Self {
                inner,
                failure: Arc::clone(&failure),
            },
            failure,
        )
    }
}

impl Read for TrackedBody {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        match self.inner.read_bytes(Some(buf.len())) {
            Ok(chunk) => {
                buf[..chunk.len()].copy_from_slice(&chunk);
                Ok(chunk.len())
            }
            Err(e) => {
                let io_err = io::Error::new(io::ErrorKind::InvalidData, e.to_string());
                self.failure.record(e);
                Err(io_err)
            }
        }
    }
}

/// Uploads files at or below the multipart threshold
#[derive(Clone)]
pub struct DirectUploadClient {
    resource: Arc<dyn SamplesResource>,
    session: Arc<dyn UploadSession>,
    mode: DirectMode,
    max_attempts: u32,
    initial_backoff: Duration,
}

impl DirectUploadClient {
    /// Create a client using the `init_upload` flow
    pub fn new(resource: Arc<dyn SamplesResource>, session: Arc<dyn UploadSession>) -> Self {
        Self {
            resource,
            session,
            mode: DirectMode::InitUpload,
            max_attempts: MAX_DIRECT_ATTEMPTS,
            initial_backoff: INITIAL_BACKOFF,
        }
    }

    /// Select the server flow
    pub fn with_mode(mut self, mode: DirectMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the number of attempts on connection failures (at least one)
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Set the delay before the first retry
    pub fn with_initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = backoff;
        self
    }

    /// Upload `task`, opening a fresh transcoder per attempt with `open`
    pub fn upload(
        &self,
        task: &UploadTask,
        open: &dyn Fn() -> Result<Transcoder>,
        cancel: &CancelToken,
    ) -> Result<UploadReceipt> {
        cancel.check()?;
        info!(
            "Uploading {} as {} ({} bytes, direct)",
            task.source.input(),
            task.canonical_filename,
            task.source.size()
        );
        match self.mode {
            DirectMode::InitUpload => self.upload_standard(task, open, cancel),
            DirectMode::Presigned => self.upload_presigned(task, open, cancel),
        }
    }

    fn upload_standard(
        &self,
        task: &UploadTask,
        open: &dyn Fn() -> Result<Transcoder>,
        cancel: &CancelToken,
    ) -> Result<UploadReceipt> {
        let filename = &task.canonical_filename;
        let info = self
            .resource
            .init_upload(&InitUploadRequest {
                filename: filename.clone(),
                size: task.source.size(),
                upload_type: STANDARD_UPLOAD_TYPE.to_string(),
            })
            .map_err(|e| initiation_failed(filename, e))?;
        debug!("Initiated upload of {} as sample {}", filename, info.sample_id);

        let fields = form_fields(&info.additional_fields);
        self.post_with_retry(&info.upload_url, &fields, filename, open, cancel)?;

        self.resource
            .confirm_upload(&ConfirmUploadRequest {
                sample_id: info.sample_id.clone(),
                upload_type: STANDARD_UPLOAD_TYPE.to_string(),
            })
            .map_err(|e| {
                debug!("Confirmation of {} failed: {}", filename, e);
                UploadError::Upload(format!("Failed to upload: {}", filename))
            })?;

        Ok(UploadReceipt {
            filename: filename.clone(),
            size_class: task.size_class,
            remote_id: info.sample_id,
        })
    }

    fn upload_presigned(
        &self,
        task: &UploadTask,
        open: &dyn Fn() -> Result<Transcoder>,
        cancel: &CancelToken,
    ) -> Result<UploadReceipt> {
        let filename = &task.canonical_filename;
        let presign = self
            .resource
            .presign_direct_upload()
            .map_err(|e| initiation_failed(filename, e))?;

        let signing_url = self.session.absolute_url(&presign.signing_url);
        let signed: Map<String, Value> = self
            .session
            .post_json(&signing_url, &json!({ "filename": filename }))
            .and_then(|response| response.error_for_status(&signing_url))
            .and_then(|response| response.json())
            .map_err(|e| initiation_failed(filename, e))?;

        let fields = form_fields(&signed);
        let response = self.post_with_retry(&presign.url, &fields, filename, open, cancel)?;
        let location = response.location.unwrap_or_else(|| presign.url.clone());

        let callback_url = self.session.absolute_url(&presign.callback_url);
        let confirmed = self
            .session
            .post_json(&callback_url, &json!({ "location": location, "filename": filename }))
            .map_err(|e| {
                debug!("Callback for {} failed: {}", filename, e);
                UploadError::Upload(format!("Upload confirmation of {} has failed", filename))
            })?;
        if !confirmed.is_success() {
            return Err(UploadError::Upload(format!(
                "Upload confirmation of {} has failed (HTTP {})",
                filename, confirmed.status
            )));
        }

        Ok(UploadReceipt {
            filename: filename.clone(),
            size_class: task.size_class,
            remote_id: location,
        })
    }

    /// POST the form, retrying connection failures with exponential backoff
    fn post_with_retry(
        &self,
        url: &str,
        fields: &[(String, String)],
        filename: &str,
        open: &dyn Fn() -> Result<Transcoder>,
        cancel: &CancelToken,
    ) -> Result<HttpResponse> {
        let mut attempts = 0;
        let mut backoff = self.initial_backoff;

        loop {
            cancel.check()?;
            attempts += 1;

            match self.post_once(url, fields, filename, open) {
                Ok(response) if response.is_success() => return Ok(response),
                Ok(response) => {
                    return Err(UploadError::Upload(format!(
                        "Upload of {} failed with HTTP status {}",
                        filename, response.status
                    )))
                }
                Err(UploadError::Connection(msg)) if attempts < self.max_attempts => {
                    warn!(
                        "Connection problem uploading {} (attempt {}/{}): {}",
                        filename, attempts, self.max_attempts, msg
                    );
                    thread::sleep(backoff);
                    backoff *= 2;
                }
                Err(UploadError::Connection(msg)) => {
                    return Err(UploadError::Upload(format!(
                        "Connectivity issues prevented the upload of {} after {} attempts: {}",
                        filename, attempts, msg
                    )))
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn post_once(
        &self,
        url: &str,
        fields: &[(String, String)],
        filename: &str,
        open: &dyn Fn() -> Result<Transcoder>,
    ) -> Result<HttpResponse> {
        let (body, failure) = TrackedBody::new(open()?);
        let result = self
            .session
            .post_form(url, fields, FormFile::text(filename, Box::new(body)));

        // a failed body read outranks whatever the transport made of it
        if let Some(err) = failure.take() {
            return Err(err);
        }
        result
    }
}

fn initiation_failed(filename: &str, err: UploadError) -> UploadError {
    match err {
        UploadError::Cancelled => err,
        other => UploadError::Upload(format!(
            "The attempt to initiate the upload of {} failed: {}",
            filename, other
        )),
    }
}

/// Stringify server fields, keeping their order
fn form_fields(fields: &Map<String, Value>) -> Vec<(String, String)> {
    fields
        .iter()
        .map(|(key, value)| {
            let value = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (key.clone(), value)
        })
        .collect()
}
