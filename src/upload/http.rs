//! Blocking HTTP session for the samples API
//!
//! # Authentication
//!
//! Requests to URLs under the API base carry HTTP basic auth with the API
//! key as username and an empty password. Requests elsewhere (presigned
//! bucket URLs) are sent without credentials.
//!
//! # Errors
//!
//! Connect and timeout failures, and requests cut off by a reset or broken
//! connection, become [`UploadError::Connection`], which the direct upload
//! path retries. Everything else is [`UploadError::Network`] or
//! [`UploadError::Http`].
//!
//! # Example
//!
//! ```no_run
//! use fastx_upload::config::ApiConfig;
//! use fastx_upload::upload::http::HttpSession;
//! use fastx_upload::upload::remote::UploadSession;
//!
//! # fn main() -> fastx_upload::Result<()> {
//! let session = HttpSession::new(ApiConfig::new("https://api.example.org", Some("key".into())))?;
//! let url = session.absolute_url("/api/v1/samples/presign_upload");
//! let params = session.get_json(&url)?;
//! println!("{}", params);
//! # Ok(())
//! # }
//! ```

use super::remote::{join_url, FormFile, HttpResponse, UploadSession};
use crate::config::ApiConfig;
use crate::error::{Result, UploadError};
use reqwest::blocking::{multipart, Client, RequestBuilder, Response};
use serde_json::Value;
use std::error::Error as StdError;
use std::io;
use std::time::Duration;

/// reqwest-backed [`UploadSession`]
#[derive(Clone)]
pub struct HttpSession {
    client: Client,
    base: String,
    api_key: Option<String>,
}

impl HttpSession {
    /// Build a session for `api`
    ///
    /// No overall request timeout is set: large form uploads may take as
    /// long as the transfer needs.
    pub fn new(api: ApiConfig) -> Result<Self> {
        api.validate()?;
        let client = Client::builder()
            .timeout(None::<Duration>)
            .user_agent(format!("fastx-upload/{}", crate::VERSION))
            .build()
            .map_err(|e| UploadError::Network(e.to_string()))?;

        Ok(Self {
            client,
            base: api.normalized_base(),
            api_key: api.api_key,
        })
    }

    /// Base URL (with trailing slash)
    pub fn base(&self) -> &str {
        &self.base
    }

    fn authorize(&self, request: RequestBuilder, url: &str) -> RequestBuilder {
        match &self.api_key {
            Some(key) if url.starts_with(&self.base) => request.basic_auth(key, Some("")),
            _ => request,
        }
    }

    fn send(&self, request: RequestBuilder, url: &str) -> Result<Response> {
        self.authorize(request, url)
            .send()
            .map_err(transport_error)
    }
}

/// Classify a reqwest failure
fn transport_error(err: reqwest::Error) -> UploadError {
    let dropped = (err.is_request() || err.is_body()) && connection_dropped(&err);
    if err.is_connect() || err.is_timeout() || dropped {
        UploadError::Connection(err.to_string())
    } else {
        UploadError::Network(err.to_string())
    }
}

/// Whether an `io::Error` in the source chain says the peer went away
fn connection_dropped(err: &(dyn StdError + 'static)) -> bool {
    let mut source = err.source();
    while let Some(cause) = source {
        if let Some(io_err) = cause.downcast_ref::<io::Error>() {
            if matches!(
                io_err.kind(),
                io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::UnexpectedEof
            ) {
                return true;
            }
        }
        source = cause.source();
    }
    false
}

fn into_response(response: Response) -> Result<HttpResponse> {
    let status = response.status().as_u16();
    let location = response
        .headers()
        .get(reqwest::header::LOCATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let body = response.text().map_err(transport_error)?;
    Ok(HttpResponse {
        status,
        location,
        body,
    })
}

impl UploadSession for HttpSession {
    fn get_json(&self, url: &str) -> Result<Value> {
        let response = self.send(self.client.get(url), url)?;
        into_response(response)?.error_for_status(url)?.json()
    }

    fn post_json(&self, url: &str, body: &Value) -> Result<HttpResponse> {
        let response = self.send(self.client.post(url).json(body), url)?;
        into_response(response)
    }

    fn post_form(
        &self,
        url: &str,
        fields: &[(String, String)],
        file: FormFile,
    ) -> Result<HttpResponse> {
        let mut form = multipart::Form::new();
        for (key, value) in fields {
            form = form.text(key.clone(), value.clone());
        }
        let part = multipart::Part::reader(file.body)
            .file_name(file.filename)
            .mime_str(&file.content_type)
            .map_err(|e| UploadError::Network(e.to_string()))?;
        form = form.part("file", part);

        let response = self.send(self.client.post(url).multipart(form), url)?;
        into_response(response)
    }

    fn absolute_url(&self, path: &str) -> String {
        join_url(&self.base, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::net::TcpListener;
    use std::thread;

    fn session(key: Option<&str>) -> HttpSession {
        HttpSession::new(ApiConfig::new("https://api.example.org", key.map(String::from))).unwrap()
    }

    #[test]
    fn test_absolute_url() {
        let session = session(None);
        assert_eq!(session.base(), "https://api.example.org/");
        assert_eq!(
            session.absolute_url("/api/v1/samples/confirm"),
            "https://api.example.org/api/v1/samples/confirm"
        );
        assert_eq!(session.absolute_url("https://bucket/x"), "https://bucket/x");
    }

    #[test]
    fn test_auth_only_under_base() {
        let session = session(Some("secret"));

        let url = "https://api.example.org/api/v1/x";
        let inside = session
            .authorize(session.client.get(url), url)
            .build()
            .unwrap();
        assert!(inside.headers().contains_key(reqwest::header::AUTHORIZATION));

        let url = "https://bucket.s3.amazonaws.com/";
        let outside = session
            .authorize(session.client.post(url), url)
            .build()
            .unwrap();
        assert!(!outside.headers().contains_key(reqwest::header::AUTHORIZATION));
    }

    #[test]
    fn test_rejects_bad_base() {
        assert!(HttpSession::new(ApiConfig::new("api.example.org", None)).is_err());
    }

    #[test]
    fn test_reset_mid_body_is_retryable() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = [0u8; 4096];
            let _ = stream.read_exact(&mut buf);
            // dropping with unread data pending resets the connection
        });

        let session = HttpSession::new(ApiConfig::new(format!("http://{}", addr), None)).unwrap();
        let body = io::repeat(b'A').take(64 * 1024 * 1024);
        let err = session
            .post_form(
                &format!("http://{}/upload", addr),
                &[],
                FormFile::text("reads.fq", Box::new(body)),
            )
            .unwrap_err();
        server.join().unwrap();

        assert!(err.is_connection(), "got {:?}", err);
    }

    #[test]
    fn test_connection_refused_is_retryable() {
        let session = HttpSession::new(ApiConfig::new("http://127.0.0.1:9", None)).unwrap();
        let err = session.get_json("http://127.0.0.1:9/api").unwrap_err();
        assert!(err.is_connection(), "got {:?}", err);
    }
}
