//! Rate limit bookkeeping and per-bucket request queues.
//!
//! Discord limits requests per route (a *bucket*), per account (the *global*
//! limit), and counts invalid requests towards an IP ban. This module holds
//! the state needed to respect all three:
//!
//! - [`RateLimitRegistry`]: limits known to be exhausted, shared by all queues
//! - [`InvalidRequestTracker`]: a rolling count of invalid requests
//! - `BucketQueue`: serializes the requests of one credential to one route
//! - [`DispatchConfig`]: file-loadable dispatcher settings

mod bucket;
mod config;
mod headers;
mod invalid;
mod registry;

pub(crate) use bucket::{BucketQueue, PendingRequest, QueueDriver, QueueKey};
pub use config::{
    DEFAULT_API_VERSION, DEFAULT_DELETE_QUEUE_DELAY, DEFAULT_GLOBAL_REQUESTS_PER_SECOND,
    DEFAULT_MAX_RETRIES, DISCORD_API_URL, DispatchConfig,
};
pub(crate) use headers::{MAX_RATE_LIMIT_WAIT, RateLimitHeaders, clamped_seconds};
pub use headers::RateLimitScope;
pub use invalid::{
    DEFAULT_INVALID_REQUEST_WARN_THRESHOLD, DEFAULT_INVALID_REQUEST_WINDOW, InvalidRequestTracker,
};
pub use registry::{LimiterKey, RateLimitEntry, RateLimitRegistry};
