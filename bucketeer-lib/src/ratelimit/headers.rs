//! Handle Discord's rate limit headers.
//!
//! See <https://discord.com/developers/docs/topics/rate-limits#header-format>.

use http::{HeaderMap, HeaderValue};
use std::str::FromStr;
use std::time::{Duration, SystemTime};
use thiserror::Error;

const REMAINING: &str = "x-ratelimit-remaining";
const LIMIT: &str = "x-ratelimit-limit";
const RESET_AFTER: &str = "x-ratelimit-reset-after";
const BUCKET: &str = "x-ratelimit-bucket";
const GLOBAL: &str = "x-ratelimit-global";
const SCOPE: &str = "x-ratelimit-scope";
const RETRY_AFTER: &str = "retry-after";

/// Upper bound for any wait the server asks for
pub(crate) const MAX_RATE_LIMIT_WAIT: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Error, PartialEq, Eq)]
pub(crate) enum RetryAfterParseError {
    #[error("Unable to parse value '{0}'")]
    ValueError(String),

    #[error("Header value contains invalid chars")]
    HeaderValueError,
}

/// Which limit a 429 response was caused by
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::EnumString, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum RateLimitScope {
    /// The per-route limit of this credential
    User,
    /// The account-wide limit of this credential
    Global,
    /// A limit shared with other users of the resource
    Shared,
}

/// The rate limit state reported with a response
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct RateLimitHeaders {
    /// Requests left in the current window
    pub(crate) remaining: Option<u64>,
    /// Requests allowed per window
    pub(crate) limit: Option<u64>,
    /// Time until the current window resets
    pub(crate) reset_after: Option<Duration>,
    /// Server-assigned bucket id, shared by routes with a common limit
    pub(crate) bucket: Option<String>,
    /// The response was caused by the global limit
    pub(crate) global: bool,
    pub(crate) scope: Option<RateLimitScope>,
    pub(crate) retry_after: Option<Duration>,
}

impl RateLimitHeaders {
    pub(crate) fn parse(headers: &HeaderMap) -> Self {
        Self {
            remaining: parse_header_value(headers, REMAINING),
            limit: parse_header_value(headers, LIMIT),
            reset_after: headers.get(RESET_AFTER).and_then(parse_seconds),
            bucket: headers
                .get(BUCKET)
                .and_then(|value| value.to_str().ok())
                .map(ToString::to_string),
            global: headers
                .get(GLOBAL)
                .and_then(|value| value.to_str().ok())
                .is_some_and(|value| value.eq_ignore_ascii_case("true")),
            scope: parse_header_value(headers, SCOPE),
            retry_after: headers
                .get(RETRY_AFTER)
                .and_then(|value| parse_retry_after(value).ok()),
        }
    }

    /// The request ran against a limit shared with other users, so the
    /// local bucket state tells nothing about it
    pub(crate) fn is_shared_scope(&self) -> bool {
        self.scope == Some(RateLimitScope::Shared)
    }
}

/// Parse the "Retry-After" header as specified per
/// [RFC 7231 section 7.1.3](https://www.rfc-editor.org/rfc/rfc7231#section-7.1.3).
///
/// Discord extends delay-seconds with fractional values.
pub(crate) fn parse_retry_after(value: &HeaderValue) -> Result<Duration, RetryAfterParseError> {
    let value = value
        .to_str()
        .map_err(|_| RetryAfterParseError::HeaderValueError)?;

    // RFC 7231: Retry-After = HTTP-date / delay-seconds
    seconds(value).map_or_else(
        || {
            httpdate::parse_http_date(value)
                .map(|s| {
                    s.duration_since(SystemTime::now())
                        // if date is in the past, we can use ZERO
                        .unwrap_or(Duration::ZERO)
                        .min(MAX_RATE_LIMIT_WAIT)
                })
                .map_err(|_| RetryAfterParseError::ValueError(value.into()))
        },
        Ok,
    )
}

fn parse_seconds(value: &HeaderValue) -> Option<Duration> {
    seconds(value.to_str().ok()?)
}

fn seconds(value: &str) -> Option<Duration> {
    clamped_seconds(value.trim().parse::<f64>().ok()?)
}

/// Convert server-sent seconds into a wait of at most
/// [`MAX_RATE_LIMIT_WAIT`]. Negative and non-finite values are rejected.
pub(crate) fn clamped_seconds(secs: f64) -> Option<Duration> {
    if !secs.is_finite() || secs < 0.0 {
        return None;
    }
    Some(
        Duration::try_from_secs_f64(secs)
            .unwrap_or(MAX_RATE_LIMIT_WAIT)
            .min(MAX_RATE_LIMIT_WAIT),
    )
}

fn parse_header_value<T: FromStr>(headers: &HeaderMap, header_name: &str) -> Option<T> {
    headers
        .get(header_name)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse().ok())
}
