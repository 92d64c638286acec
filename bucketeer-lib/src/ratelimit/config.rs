use secrecy::SecretString;
use serde::Deserialize;
use std::time::Duration;

use super::{DEFAULT_INVALID_REQUEST_WARN_THRESHOLD, DEFAULT_INVALID_REQUEST_WINDOW};

/// Official API host; any other host is treated as a REST proxy
pub const DISCORD_API_URL: &str = "https://discord.com/api";

/// API version requests are sent to, 10
pub const DEFAULT_API_VERSION: u8 = 10;

/// Default number of 429 retries before a request fails, 10
pub const DEFAULT_MAX_RETRIES: u32 = 10;

/// Default time an empty bucket queue is kept around, 60 seconds
pub const DEFAULT_DELETE_QUEUE_DELAY: Duration = Duration::from_secs(60);

/// Default cap on outbound requests per second across all buckets, 50
pub const DEFAULT_GLOBAL_REQUESTS_PER_SECOND: u32 = 50;

/// Dispatcher settings as loaded from a configuration file.
///
/// Every field is optional in the file; missing fields take the same defaults
/// as [`crate::DispatcherBuilder`].
///
/// ```
/// # use bucketeer_lib::DispatchConfig;
/// let config: DispatchConfig = toml::from_str(r#"
///     max_retries = 3
///     delete_queue_delay = "5m"
/// "#).unwrap();
/// assert_eq!(config.max_retries, 3);
/// assert_eq!(config.delete_queue_delay.as_secs(), 300);
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct DispatchConfig {
    /// API base URL without the version segment
    pub base_url: String,

    /// API version
    pub api_version: u8,

    /// Default credential
    pub token: Option<SecretString>,

    /// Maximum number of 429 retries per request
    pub max_retries: u32,

    /// Idle time after which an empty bucket queue is evicted
    #[serde(with = "humantime_serde")]
    pub delete_queue_delay: Duration,

    /// Treat `base_url` as a REST proxy; derived from its host when unset
    pub proxy_mode: Option<bool>,

    /// Shared secret sent to a REST proxy
    pub proxy_secret: Option<SecretString>,

    /// Outbound requests per second across all buckets; 0 disables pacing
    pub global_requests_per_second: u32,

    /// Length of the invalid request window
    #[serde(with = "humantime_serde")]
    pub invalid_request_window: Duration,

    /// Invalid requests per window after which a warning is logged
    pub invalid_request_warn_threshold: u64,

    /// User agent override
    pub user_agent: Option<String>,

    /// Per-request timeout
    #[serde(with = "humantime_serde")]
    pub timeout: Option<Duration>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            base_url: DISCORD_API_URL.to_string(),
            api_version: DEFAULT_API_VERSION,
            token: None,
            max_retries: DEFAULT_MAX_RETRIES,
            delete_queue_delay: DEFAULT_DELETE_QUEUE_DELAY,
            proxy_mode: None,
            proxy_secret: None,
            global_requests_per_second: DEFAULT_GLOBAL_REQUESTS_PER_SECOND,
            invalid_request_window: DEFAULT_INVALID_REQUEST_WINDOW,
            invalid_request_warn_threshold: DEFAULT_INVALID_REQUEST_WARN_THRESHOLD,
            user_agent: None,
            timeout: None,
        }
    }
}
