//! Remote collaborators: wire types and the traits the upload clients use
//!
//! [`SamplesResource`] starts and confirms uploads, [`UploadSession`]
//! performs HTTP requests, and [`ObjectStore`] receives multipart-sized
//! payloads. [`RestSamplesResource`] implements the samples API on top of
//! any session.

use super::pool::CancelToken;
use crate::error::{Result, UploadError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::io::Read;
use std::sync::Arc;

/// Request body of `init_upload`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitUploadRequest {
    /// Canonical filename
    pub filename: String,
    /// On-disk size in bytes
    pub size: u64,
    /// Always `"standard"` for form uploads
    pub upload_type: String,
}

/// Response of `init_upload`
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InitUploadResponse {
    /// Form POST destination
    pub upload_url: String,
    /// Fields to send before the file part, in server order
    #[serde(default)]
    pub additional_fields: Map<String, Value>,
    /// Identifier to confirm
    #[serde(deserialize_with = "string_or_number")]
    pub sample_id: String,
}

/// Request body of `confirm_upload`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmUploadRequest {
    /// Identifier returned by `init_upload`
    pub sample_id: String,
    /// Same type as the initiation
    pub upload_type: String,
}

/// Response of `presign_upload` (older direct flow)
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PresignedUpload {
    /// Form POST destination
    pub url: String,
    /// Where to request signing fields for a filename
    pub signing_url: String,
    /// Where to report the stored object
    pub callback_url: String,
}

/// Response of `init_multipart_upload`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MultipartUploadParams {
    /// Destination bucket
    pub s3_bucket: String,
    /// Destination key
    pub file_id: String,
    /// Where to report the stored object
    pub callback_url: String,
    /// Temporary access key id
    #[serde(alias = "upload_aws_access_key_id")]
    pub upload_access_key: String,
    /// Temporary secret key
    #[serde(alias = "upload_aws_secret_access_key")]
    pub upload_secret_key: String,
}

fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, got {}",
            other
        ))),
    }
}

/// Upload initiation and confirmation endpoints
pub trait SamplesResource: Send + Sync {
    /// Start an older-style presigned direct upload
    fn presign_direct_upload(&self) -> Result<PresignedUpload>;

    /// Start a multipart upload and obtain temporary store credentials
    fn init_multipart_upload(&self) -> Result<MultipartUploadParams>;

    /// Start a direct form upload
    fn init_upload(&self, request: &InitUploadRequest) -> Result<InitUploadResponse>;

    /// Confirm a finished direct upload
    fn confirm_upload(&self, request: &ConfirmUploadRequest) -> Result<()>;
}

/// Streamed file part of a multipart form
pub struct FormFile {
    /// Filename reported to the server
    pub filename: String,
    /// MIME type of the part
    pub content_type: String,
    /// Part contents, read once
    pub body: Box<dyn Read + Send>,
}

impl FormFile {
    /// `text/plain` part named `filename`
    pub fn text(filename: impl Into<String>, body: Box<dyn Read + Send>) -> Self {
        Self {
            filename: filename.into(),
            content_type: "text/plain".to_string(),
            body,
        }
    }
}

/// Status, `Location` header and body of a response
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HttpResponse {
    /// Status code
    pub status: u16,
    /// `Location` header, if any
    pub location: Option<String>,
    /// Body text
    pub body: String,
}

impl HttpResponse {
    /// Whether the status is 2xx
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Parse the body as JSON
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_str(&self.body)
            .map_err(|e| UploadError::Network(format!("Invalid JSON response: {}", e)))
    }

    /// `Err(Http)` unless the status is 2xx
    pub fn error_for_status(self, url: &str) -> Result<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(UploadError::Http {
                status: self.status,
                url: url.to_string(),
            })
        }
    }
}

/// Authenticated HTTP session
///
/// Connection-level failures must be reported as
/// [`UploadError::Connection`] so callers can retry them.
pub trait UploadSession: Send + Sync {
    /// GET `url` and parse JSON; non-2xx is an error
    fn get_json(&self, url: &str) -> Result<Value>;

    /// POST a JSON body
    fn post_json(&self, url: &str, body: &Value) -> Result<HttpResponse>;

    /// POST a multipart form: `fields` in order, then the streamed `file` part
    fn post_form(&self, url: &str, fields: &[(String, String)], file: FormFile)
        -> Result<HttpResponse>;

    /// Join a server-relative path onto the API base
    fn absolute_url(&self, path: &str) -> String;
}

/// Join `path` onto `base` unless it already is an absolute URL
pub fn join_url(base: &str, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        return path.to_string();
    }
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Where and how to store a multipart payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectTarget {
    /// Bucket name
    pub bucket: String,
    /// Object key
    pub key: String,
    /// Temporary access key id
    pub access_key: String,
    /// Temporary secret key
    pub secret_key: String,
    /// Expected payload size (on-disk source size)
    pub expected_size: u64,
    /// Parallel part uploads
    pub concurrency: usize,
}

impl ObjectTarget {
    /// `s3://bucket/key`
    pub fn s3_path(&self) -> String {
        format!("s3://{}/{}", self.bucket, self.key)
    }
}

/// Destination of multipart uploads
pub trait ObjectStore: Send + Sync {
    /// Stream `body` into `target`, server-side encrypted
    ///
    /// Implementations must stop promptly once `cancel` fires.
    fn put_object(&self, target: &ObjectTarget, body: &mut dyn Read, cancel: &CancelToken)
        -> Result<()>;
}

/// Samples API over an [`UploadSession`]
#[derive(Clone)]
pub struct RestSamplesResource {
    session: Arc<dyn UploadSession>,
}

impl RestSamplesResource {
    /// Presign endpoint of the older direct flow
    pub const PRESIGN_UPLOAD: &'static str = "api/v1/samples/presign_upload";
    /// Multipart initiation endpoint
    pub const INIT_MULTIPART_UPLOAD: &'static str = "api/v1/samples/init_multipart_upload";
    /// Direct initiation endpoint
    pub const INIT_UPLOAD: &'static str = "api/v1/samples/init_upload";
    /// Direct confirmation endpoint
    pub const CONFIRM_UPLOAD: &'static str = "api/v1/samples/confirm_upload";

    /// Use `session` for every request
    pub fn new(session: Arc<dyn UploadSession>) -> Self {
        Self { session }
    }

    fn get<T: DeserializeOwned>(&self, endpoint: &str) -> Result<T> {
        let url = self.session.absolute_url(endpoint);
        let value = self.session.get_json(&url)?;
        serde_json::from_value(value)
            .map_err(|e| UploadError::Network(format!("Invalid response from {}: {}", url, e)))
    }

    fn post<B: Serialize>(&self, endpoint: &str, body: &B) -> Result<HttpResponse> {
        let url = self.session.absolute_url(endpoint);
        let body = serde_json::to_value(body)
            .map_err(|e| UploadError::Network(format!("Could not encode request: {}", e)))?;
        self.session.post_json(&url, &body)?.error_for_status(&url)
    }
}

impl SamplesResource for RestSamplesResource {
    fn presign_direct_upload(&self) -> Result<PresignedUpload> {
        self.get(Self::PRESIGN_UPLOAD)
    }

    fn init_multipart_upload(&self) -> Result<MultipartUploadParams> {
        self.get(Self::INIT_MULTIPART_UPLOAD)
    }

    fn init_upload(&self, request: &InitUploadRequest) -> Result<InitUploadResponse> {
        self.post(Self::INIT_UPLOAD, request)?.json()
    }

    fn confirm_upload(&self, request: &ConfirmUploadRequest) -> Result<()> {
        self.post(Self::CONFIRM_UPLOAD, request).map(|_| ())
    }
}
