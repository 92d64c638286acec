use http::{Method, StatusCode};
use serde::{Serialize, Serializer};
use std::path::PathBuf;
use thiserror::Error;

use crate::ResponseBody;

/// Broad classification of a failed dispatch.
///
/// Callers that only need to decide how to render or react to a failure can
/// match on this instead of on every [`ErrorKind`] variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorClass {
    /// No response was obtained at all. Never retried by the dispatcher.
    TransportFailure,
    /// The server answered with a 4xx status other than 429.
    ClientError,
    /// The server kept answering 429 until the retry budget ran out.
    RateLimited,
    /// The server answered with a 5xx status.
    ServerError,
    /// The request could not be built or its result could not be delivered.
    Local,
}

/// Possible errors when dispatching requests with `bucketeer_lib`
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ErrorKind {
    /// The transport failed before any response was received
    #[error("{method} {path} failed without a response: {source}")]
    Transport {
        /// Method of the failed request
        method: Method,
        /// Path of the failed request
        path: String,
        /// The underlying network error
        #[source]
        source: reqwest::Error,
    },

    /// The server rejected the request
    #[error("{method} {path} was rejected with status {status}")]
    Http {
        /// Method of the rejected request
        method: Method,
        /// Path of the rejected request
        path: String,
        /// Status code returned by the server
        status: StatusCode,
        /// Canonical reason phrase for `status`
        status_text: String,
        /// Parsed response body, usually a JSON error object
        body: ResponseBody,
    },

    /// The server kept rate limiting the request
    #[error("{method} {path} is still rate limited after {retries} retries")]
    RetriesExhausted {
        /// Method of the rate limited request
        method: Method,
        /// Path of the rate limited request
        path: String,
        /// Number of retries that were attempted
        retries: u32,
        /// Body of the last 429 response
        body: ResponseBody,
    },

    /// The HTTP client could not be created
    #[error("Error creating request client: {0}")]
    BuildClient(#[source] reqwest::Error),

    /// A header name or value could not be constructed
    #[error("Header could not be parsed: {0}")]
    InvalidHeader(String),

    /// The base URL or a request path does not form a valid URL
    #[error("Cannot build a request URL from `{0}`: {1}")]
    InvalidUrl(String, url::ParseError),

    /// The response body could not be read
    #[error("Error reading response body: {0}")]
    ReadBody(#[source] reqwest::Error),

    /// A file attachment could not be read from disk
    #[error("Cannot read attachment `{}`: {}", .0.display(), .1)]
    ReadFile(PathBuf, std::io::Error),

    /// The request payload could not be serialized
    #[error("Cannot serialize request payload: {0}")]
    Serialize(#[from] serde_json::Error),

    /// The request was dropped before a result could be delivered
    #[error("The request queue was closed before the request completed")]
    QueueClosed,
}

impl ErrorKind {
    /// Classify this error
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Transport { .. } => ErrorClass::TransportFailure,
            Self::Http { status, .. } if status.is_server_error() => ErrorClass::ServerError,
            Self::Http { .. } => ErrorClass::ClientError,
            Self::RetriesExhausted { .. } => ErrorClass::RateLimited,
            _ => ErrorClass::Local,
        }
    }

    /// The HTTP status that ended the request, if the server answered at all
    #[must_use]
    pub const fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Http { status, .. } => Some(*status),
            Self::RetriesExhausted { .. } => Some(StatusCode::TOO_MANY_REQUESTS),
            _ => None,
        }
    }

    /// The parsed body of the final response, if the server answered at all
    #[must_use]
    pub const fn body(&self) -> Option<&ResponseBody> {
        match self {
            Self::Http { body, .. } | Self::RetriesExhausted { body, .. } => Some(body),
            _ => None,
        }
    }

    /// Discord's numeric JSON error code (e.g. `10003` for "Unknown Channel")
    #[must_use]
    pub fn api_code(&self) -> Option<u64> {
        self.body()?.as_json()?.get("code")?.as_u64()
    }
}

impl Serialize for ErrorKind {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}
