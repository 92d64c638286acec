//! Bucket identification for Discord REST routes.
//!
//! Discord rate limits requests per route, where routes differing only in a
//! minor parameter share a bucket. [`RouteKey`] canonicalizes concrete paths
//! into these shared identifiers.

mod key;
mod snowflake;

pub use key::RouteKey;
pub use snowflake::{DISCORD_EPOCH, snowflake_at, snowflake_timestamp};
