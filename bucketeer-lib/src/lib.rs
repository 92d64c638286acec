//! `bucketeer` sends requests to the Discord REST API without running into
//! its rate limits.
//!
//! Requests are grouped into buckets the same way the server groups them.
//! Each bucket gets its own queue that sends requests in order, one at a
//! time, and waits whenever the server reports the bucket or the whole
//! account as exhausted. 429 responses are retried, other failures are
//! reported with the status and body the server sent.
//!
//! ```no_run
//! use bucketeer_lib::{DispatcherBuilder, RequestOptions, Result};
//! use secrecy::SecretString;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let dispatcher = DispatcherBuilder::builder()
//!         .token(Some(SecretString::from("my-bot-token")))
//!         .build()
//!         .dispatcher()?;
//!
//!     let message = dispatcher
//!         .post(
//!             "/channels/41771983423143937/messages",
//!             RequestOptions::new().body(json!({"content": "Hello, world!"})),
//!         )
//!         .await?;
//!     println!("{message}");
//!     Ok(())
//! }
//! ```
//!
//! Credentials can be swapped at runtime without losing queued work, see
//! [`Dispatcher::rotate_credential`].

mod dispatcher;
mod hooks;
mod types;

pub mod ratelimit;
pub mod route;
pub mod wire;

pub use crate::{
    dispatcher::{AUDIT_LOG_REASON, DEFAULT_USER_AGENT, Dispatcher, DispatcherBuilder},
    hooks::{DispatchHooks, RequestInfo},
    ratelimit::{DispatchConfig, RateLimitRegistry},
    route::RouteKey,
    types::*,
};
