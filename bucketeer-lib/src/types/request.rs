use std::path::Path;

use http::HeaderMap;
use serde_json::Value;

use crate::{Credential, ErrorKind, Result};

/// A file uploaded alongside a request as a multipart part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileAttachment {
    /// File name reported to the server
    pub name: String,
    /// Raw file content
    pub content: Vec<u8>,
    /// Optional MIME type of the content
    pub content_type: Option<String>,
}

impl FileAttachment {
    /// Create an attachment from in-memory content
    #[must_use]
    pub fn new(name: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
            content_type: None,
        }
    }

    /// Read an attachment from disk, naming it after the file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read.
    pub fn from_path(path: &Path) -> Result<Self> {
        let content =
            std::fs::read(path).map_err(|e| ErrorKind::ReadFile(path.to_path_buf(), e))?;
        let name = path
            .file_name()
            .map_or_else(|| "file".to_string(), |n| n.to_string_lossy().into_owned());
        Ok(Self::new(name, content))
    }

    /// Set the MIME type of the content
    #[must_use]
    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

/// Per-call options recognized by [`crate::Dispatcher::send`].
///
/// ```
/// use bucketeer_lib::RequestOptions;
/// use serde_json::json;
///
/// let options = RequestOptions::new()
///     .body(json!({"content": "hello"}))
///     .reason("cleaning up");
/// assert!(!options.bypass_queue);
/// ```
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// JSON payload in internal case; converted to wire case before sending
    pub body: Option<Value>,
    /// Files sent as a multipart body, with `body` as its JSON metadata part
    pub files: Vec<FileAttachment>,
    /// Audit log reason
    pub reason: Option<String>,
    /// Do not send the `Authorization` header
    pub unauthorized: bool,
    /// Send `body` URL-encoded instead of as JSON (OAuth2 token exchange)
    pub form: bool,
    /// Transmit immediately instead of through the bucket queue
    pub bypass_queue: bool,
    /// Send as this credential instead of the dispatcher's default
    pub credential: Option<Credential>,
    /// Extra headers, applied after all others
    pub headers: HeaderMap,
}

impl RequestOptions {
    /// Options with every flag off
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the JSON payload
    #[must_use]
    pub fn body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Attach a file
    #[must_use]
    pub fn file(mut self, file: FileAttachment) -> Self {
        self.files.push(file);
        self
    }

    /// Set the audit log reason
    #[must_use]
    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Omit the `Authorization` header
    #[must_use]
    pub const fn unauthorized(mut self, unauthorized: bool) -> Self {
        self.unauthorized = unauthorized;
        self
    }

    /// Send the payload URL-encoded
    #[must_use]
    pub const fn form(mut self, form: bool) -> Self {
        self.form = form;
        self
    }

    /// Skip the bucket queue
    #[must_use]
    pub const fn bypass_queue(mut self, bypass_queue: bool) -> Self {
        self.bypass_queue = bypass_queue;
        self
    }

    /// Send as a specific credential
    #[must_use]
    pub fn credential(mut self, credential: impl Into<Credential>) -> Self {
        self.credential = Some(credential.into());
        self
    }

    /// Add extra headers
    #[must_use]
    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.headers.extend(headers);
        self
    }
}
