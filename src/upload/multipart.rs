//! Multipart uploads through an object store
//!
//! Files above the threshold skip the form flow: the server hands out
//! temporary credentials for a bucket/key, the transcoded stream goes to
//! the [`ObjectStore`], and the stored path is reported to a callback.

use super::direct::TrackedBody;
use super::pool::CancelToken;
use super::remote::{ObjectStore, ObjectTarget, SamplesResource, UploadSession};
use super::task::{UploadReceipt, UploadTask};
use super::DEFAULT_MULTIPART_CONCURRENCY;
use crate::error::{Result, UploadError};
use crate::io::Transcoder;
use log::{debug, info};
use serde_json::json;
use std::sync::Arc;

/// Uploads files above the multipart threshold
#[derive(Clone)]
pub struct MultipartUploadClient {
    resource: Arc<dyn SamplesResource>,
    session: Arc<dyn UploadSession>,
    store: Arc<dyn ObjectStore>,
    concurrency: usize,
}

impl MultipartUploadClient {
    /// Create a client with the default store concurrency
    pub fn new(
        resource: Arc<dyn SamplesResource>,
        session: Arc<dyn UploadSession>,
        store: Arc<dyn ObjectStore>,
    ) -> Self {
        Self {
            resource,
            session,
            store,
            concurrency: DEFAULT_MULTIPART_CONCURRENCY,
        }
    }

    /// Set the number of parallel part uploads
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Upload `task` through the object store
    pub fn upload(
        &self,
        task: &UploadTask,
        open: &dyn Fn() -> Result<Transcoder>,
        cancel: &CancelToken,
    ) -> Result<UploadReceipt> {
        cancel.check()?;
        let filename = &task.canonical_filename;
        info!(
            "Uploading {} as {} ({} bytes, multipart)",
            task.source.input(),
            filename,
            task.source.size()
        );

        let params = self.resource.init_multipart_upload().map_err(|e| {
            debug!("Multipart initiation for {} failed: {}", filename, e);
            UploadError::Upload(format!(
                "Could not initiate upload of {} with the server",
                filename
            ))
        })?;

        let target = ObjectTarget {
            bucket: params.s3_bucket,
            key: params.file_id,
            access_key: params.upload_access_key,
            secret_key: params.upload_secret_key,
            expected_size: task.source.output_size_estimate(),
            concurrency: self.concurrency,
        };

        let (mut body, failure) = TrackedBody::new(open()?);
        let stored = self.store.put_object(&target, &mut body, cancel);
        if let Some(err) = failure.take() {
            return Err(err);
        }
        stored.map_err(|e| match e {
            UploadError::Cancelled | UploadError::Validation(_) => e,
            other => UploadError::Upload(format!("Upload of {} has failed: {}", filename, other)),
        })?;

        let s3_path = target.s3_path();
        let callback_url = self.session.absolute_url(&params.callback_url);
        let confirmed = self
            .session
            .post_json(&callback_url, &json!({ "s3_path": s3_path, "filename": filename }))
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
            remote_id: s3_path,
        })
    }
}
