use std::fmt::Display;
use std::time::Duration;

use http::{StatusCode, header::CONTENT_TYPE};
use serde::Serialize;
use serde_json::Value;

use crate::ratelimit::clamped_seconds;
use crate::{ErrorKind, Result};

/// The parsed body of a response from the REST API.
///
/// `204 No Content` and empty bodies resolve to [`ResponseBody::Empty`], which
/// is a successful result and never to be confused with a failed request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ResponseBody {
    /// The server sent no content
    Empty,
    /// A JSON document (`Content-Type: application/json`)
    Json(Value),
    /// Any other textual payload
    Text(String),
}

impl ResponseBody {
    /// Read and parse the body of `response` according to its content type
    pub(crate) async fn from_response(response: reqwest::Response) -> Result<Self> {
        if response.status() == StatusCode::NO_CONTENT {
            return Ok(Self::Empty);
        }

        let is_json = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.starts_with("application/json"));
        let text = response.text().await.map_err(ErrorKind::ReadBody)?;

        Ok(Self::parse(&text, is_json))
    }

    pub(crate) fn parse(text: &str, is_json: bool) -> Self {
        if text.is_empty() {
            return Self::Empty;
        }
        if is_json {
            // Servers occasionally mislabel error pages, keep them as text
            if let Ok(value) = serde_json::from_str(text) {
                return Self::Json(value);
            }
        }
        Self::Text(text.to_string())
    }

    /// Returns `true` if the server sent no content
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    /// Borrow the JSON document, if this is one
    #[must_use]
    pub const fn as_json(&self) -> Option<&Value> {
        match self {
            Self::Json(value) => Some(value),
            _ => None,
        }
    }

    /// Take the JSON document, if this is one
    #[must_use]
    pub fn into_json(self) -> Option<Value> {
        match self {
            Self::Json(value) => Some(value),
            _ => None,
        }
    }

    /// The `retry_after` field Discord puts into 429 bodies
    pub(crate) fn retry_after(&self) -> Option<Duration> {
        clamped_seconds(self.as_json()?.get("retry_after")?.as_f64()?)
    }
}

impl Display for ResponseBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => Ok(()),
            Self::Json(value) => write!(f, "{value}"),
            Self::Text(text) => f.write_str(text),
        }
    }
}
