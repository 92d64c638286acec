use http::Method;
use std::fmt;
use std::time::{Duration, SystemTime};

use super::snowflake::snowflake_timestamp;

/// Stands in for minor parameters (ids the server does not bucket by)
const PLACEHOLDER: &str = "x";

/// Containers whose id is a major parameter
const MAJOR_CONTAINERS: [&str; 3] = ["channels", "guilds", "webhooks"];

/// Messages younger than this are deleted through their own bucket
const NEW_MESSAGE_AGE: Duration = Duration::from_secs(10);

/// Messages older than this are deleted through their own bucket
const OLD_MESSAGE_AGE: Duration = Duration::from_secs(14 * 24 * 60 * 60);

/// The canonical identifier of a rate limit bucket.
///
/// All requests the server rate limits together map to the same key. It
/// consists of the HTTP method and the path with every minor id replaced by a
/// placeholder. Channel, guild, and webhook ids (major parameters) as well as
/// non-numeric segments such as webhook tokens are kept verbatim. The segment
/// following `reactions` (the emoji) is always a minor parameter.
///
/// # Examples
///
/// ```
/// use bucketeer_lib::RouteKey;
/// use http::Method;
///
/// let key = RouteKey::derive(&Method::GET, "/channels/1/messages/2?limit=5");
/// assert_eq!(key.as_str(), "GET:/channels/1/messages/x");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RouteKey(String);

impl RouteKey {
    /// Derive the key for a request path (query strings are ignored)
    #[must_use]
    pub fn derive(method: &Method, path: &str) -> Self {
        Self::derive_at(method, path, SystemTime::now())
    }

    /// Derive the key as if the request was sent at `now`.
    ///
    /// Time only matters for message deletion: Discord buckets deletions of
    /// messages younger than ten seconds and older than two weeks separately.
    #[must_use]
    pub fn derive_at(method: &Method, path: &str, now: SystemTime) -> Self {
        let path = path.split(['?', '#']).next().unwrap_or_default();
        let segments: Vec<&str> = path.split('/').collect();

        let canonical: Vec<&str> = segments
            .iter()
            .enumerate()
            .map(|(i, &segment)| {
                let previous = i.checked_sub(1).map(|p| segments[p]);
                if previous == Some("reactions") {
                    PLACEHOLDER
                } else if is_id(segment) && !previous.is_some_and(is_major_container) {
                    PLACEHOLDER
                } else {
                    segment
                }
            })
            .collect();

        let mut key = format!("{method}:{}", canonical.join("/"));
        if let Some(suffix) = message_delete_suffix(method, &segments, now) {
            key.push(':');
            key.push_str(suffix);
        }
        Self(key)
    }

    /// Get the key as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Get the key as an owned String
    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }
}

fn is_id(segment: &str) -> bool {
    !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit())
}

fn is_major_container(segment: &str) -> bool {
    MAJOR_CONTAINERS.contains(&segment)
}

/// `DELETE /channels/{channel}/messages/{message}` has two extra buckets
fn message_delete_suffix(method: &Method, segments: &[&str], now: SystemTime) -> Option<&'static str> {
    if method != Method::DELETE {
        return None;
    }
    let ["", "channels", _, "messages", message] = segments else {
        return None;
    };
    let id = message.parse::<u64>().ok()?;
    // Clock skew can put a fresh message in the future; treat it as new
    let age = now
        .duration_since(snowflake_timestamp(id))
        .unwrap_or(Duration::ZERO);

    if age < NEW_MESSAGE_AGE {
        Some("message-delete-10s")
    } else if age > OLD_MESSAGE_AGE {
        Some("message-delete-2w")
    } else {
        None
    }
}

impl fmt::Display for RouteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::route::snowflake_at;
    use rstest::rstest;

    #[rstest]
    #[case(Method::GET, "/channels/1/messages/2", "GET:/channels/1/messages/x")]
    #[case(Method::GET, "/guilds/7/members/8", "GET:/guilds/7/members/x")]
    #[case(Method::PATCH, "/guilds/7/roles/9", "PATCH:/guilds/7/roles/x")]
    #[case(Method::POST, "/webhooks/3/tok-EN_abc", "POST:/webhooks/3/tok-EN_abc")]
    #[case(Method::GET, "/users/@me", "GET:/users/@me")]
    #[case(Method::GET, "/users/80351110224678912", "GET:/users/x")]
    #[case(Method::GET, "/invites/discord-api", "GET:/invites/discord-api")]
    #[case(Method::POST, "/interactions/5/aW50ZXJh/callback", "POST:/interactions/x/aW50ZXJh/callback")]
    #[case(Method::GET, "/guilds/7/audit-logs?limit=10&before=99", "GET:/guilds/7/audit-logs")]
    fn test_derive(#[case] method: Method, #[case] path: &str, #[case] expected: &str) {
        assert_eq!(RouteKey::derive(&method, path).as_str(), expected);
    }

    #[test]
    fn test_reaction_emoji_is_minor() {
        let fire = RouteKey::derive(&Method::PUT, "/channels/1/messages/2/reactions/🔥/@me");
        let custom = RouteKey::derive(
            &Method::PUT,
            "/channels/1/messages/3/reactions/blobcat:1234567/@me",
        );
        let numeric = RouteKey::derive(&Method::PUT, "/channels/1/messages/4/reactions/1234/@me");

        assert_eq!(fire.as_str(), "PUT:/channels/1/messages/x/reactions/x/@me");
        assert_eq!(fire, custom);
        assert_eq!(fire, numeric);
    }

    #[test]
    fn test_major_parameter_separates_buckets() {
        let a = RouteKey::derive(&Method::GET, "/channels/1/messages/2/reactions/🔥/@me");
        let b = RouteKey::derive(&Method::GET, "/channels/10/messages/2/reactions/🔥/@me");
        assert_ne!(a, b);
    }

    #[test]
    fn test_method_separates_buckets() {
        let get = RouteKey::derive(&Method::GET, "/channels/1");
        let patch = RouteKey::derive(&Method::PATCH, "/channels/1");
        assert_ne!(get, patch);
    }

    #[test]
    fn test_derive_is_idempotent() {
        let key = RouteKey::derive(&Method::GET, "/channels/1/messages/2");
        let path = key.as_str().trim_start_matches("GET:");
        assert_eq!(RouteKey::derive(&Method::GET, path), key);
    }

    #[rstest]
    #[case(Duration::from_secs(3), "DELETE:/channels/1/messages/x:message-delete-10s")]
    #[case(Duration::from_secs(20 * 24 * 60 * 60), "DELETE:/channels/1/messages/x:message-delete-2w")]
    #[case(Duration::from_secs(60 * 60), "DELETE:/channels/1/messages/x")]
    fn test_message_delete_exceptions(#[case] age: Duration, #[case] expected: &str) {
        let now = SystemTime::now();
        let id = snowflake_at(now - age);
        let path = format!("/channels/1/messages/{id}");
        assert_eq!(RouteKey::derive_at(&Method::DELETE, &path, now).as_str(), expected);
    }

    #[test]
    fn test_message_delete_exceptions_only_for_delete() {
        let now = SystemTime::now();
        let id = snowflake_at(now);
        let path = format!("/channels/1/messages/{id}");
        assert_eq!(
            RouteKey::derive_at(&Method::GET, &path, now).as_str(),
            "GET:/channels/1/messages/x"
        );
    }

    #[test]
    fn test_future_message_counts_as_new() {
        let now = SystemTime::now();
        let id = snowflake_at(now + Duration::from_secs(5));
        let path = format!("/channels/1/messages/{id}");
        assert!(
            RouteKey::derive_at(&Method::DELETE, &path, now)
                .as_str()
                .ends_with(":message-delete-10s")
        );
    }
}
