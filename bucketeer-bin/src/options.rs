use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use std::fs;

use anyhow::{Context, Error, Result, anyhow};
use bucketeer_lib::ratelimit::DEFAULT_MAX_RETRIES;
use bucketeer_lib::{DispatchConfig, FileAttachment, RequestOptions};
use clap::Parser;
use const_format::formatcp;
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use secrecy::SecretString;
use serde::Deserialize;

use crate::verbosity::Verbosity;

pub(crate) const BUCKETEER_CONFIG_FILE: &str = "bucketeer.toml";

// We use a custom help message here because we want to show the default
// value of the config file, but also be able to check if the user has
// provided a custom value. If they didn't, we won't throw an error if
// the file doesn't exist.
const HELP_MSG_CONFIG_FILE: &str = formatcp!(
    "Configuration file to use\n\n[default: {}]",
    BUCKETEER_CONFIG_FILE,
);
const HELP_MSG_MAX_RETRIES: &str = formatcp!(
    "Maximum number of retries after a 429 response\n\n[default: {}]",
    DEFAULT_MAX_RETRIES,
);

// Macro for merging configuration values; CLI values win over file values
macro_rules! fold_in {
    ($cli:ident , $toml:ident ; $ty:ident { $(..$ignore:ident,)* $( $key:ident, )* } ) => {
        if (false) {
            #[allow(dead_code, unused, clippy::diverging_sub_expression)]
            let _check_fold_in_exhaustivity = $ty {
                $($key: unreachable!(), )*
                $($ignore: unreachable!(), )*
            };
        };
        $(
            if $cli.$key.is_none() {
                $cli.$key = $toml.$key;
            }
        )*
    };
}

/// Parse a single header into a [`HeaderName`] and [`HeaderValue`]
///
/// Headers are expected to be in format `Header-Name: Header-Value`.
/// The header name and value are trimmed of whitespace.
///
/// If the header contains multiple colons, the part after the first colon is
/// considered the value.
///
/// # Errors
///
/// This fails if the header does not contain a `:` character or if the
/// header name contains non-ASCII characters.
fn parse_single_header(header: &str) -> Result<(HeaderName, HeaderValue)> {
    let parts: Vec<&str> = header.splitn(2, ':').collect();
    match parts.as_slice() {
        [name, value] => {
            let name = name.trim();
            let name = HeaderName::from_str(name)
                .map_err(|e| anyhow!("Unable to convert header name '{name}': {e}"))?;
            let value = HeaderValue::from_str(value.trim())
                .map_err(|e| anyhow!("Unable to read value of header with name '{name}': {e}"))?;
            Ok((name, value))
        }
        _ => Err(anyhow!(
            "Invalid header format. Expected colon-separated string in the format 'HeaderName: HeaderValue'"
        )),
    }
}

/// Parse an HTTP method, accepting lowercase names
fn parse_method(method: &str) -> Result<Method> {
    Method::from_bytes(method.to_ascii_uppercase().as_bytes())
        .map_err(|e| anyhow!("Invalid HTTP method '{method}': {e}"))
}

/// Send a single request to the Discord REST API, respecting its rate limits.
///
/// The response body is printed to stdout, JSON pretty-printed.
///
/// bucketeer is powered by bucketeer-lib, the Rust library for rate limit
/// aware dispatch.
#[derive(Parser, Debug)]
#[command(version, about)]
pub(crate) struct BucketeerOptions {
    /// HTTP method, e.g. `GET` or `post`
    #[arg(value_parser = parse_method)]
    pub(crate) method: Method,

    /// Path relative to the versioned API base, e.g. `/users/@me`
    pub(crate) path: String,

    /// Configuration file to use
    #[arg(short, long = "config")]
    #[arg(help = HELP_MSG_CONFIG_FILE)]
    pub(crate) config_file: Option<PathBuf>,

    /// JSON request body
    #[arg(short, long)]
    pub(crate) json: Option<String>,

    /// Audit log reason
    #[arg(short, long)]
    pub(crate) reason: Option<String>,

    /// Attach a file; may be given multiple times
    #[arg(short, long = "file")]
    pub(crate) files: Vec<PathBuf>,

    /// Extra request header, e.g. `X-Custom: value`; may be given multiple times
    #[arg(short = 'H', long = "header", value_parser = parse_single_header)]
    pub(crate) headers: Vec<(HeaderName, HeaderValue)>,

    /// Do not send the authorization header
    #[arg(long)]
    pub(crate) unauthorized: bool,

    /// Send the body URL-encoded instead of as JSON
    #[arg(long)]
    pub(crate) form: bool,

    /// Send immediately instead of through the bucket queue
    #[arg(long)]
    pub(crate) bypass_queue: bool,

    #[command(flatten)]
    pub(crate) config: Config,
}

impl BucketeerOptions {
    /// Build the per-request options from the command line
    pub(crate) fn request_options(&self) -> Result<RequestOptions> {
        let mut options = RequestOptions::new()
            .unauthorized(self.unauthorized)
            .form(self.form)
            .bypass_queue(self.bypass_queue);

        if let Some(json) = &self.json {
            let body = serde_json::from_str(json).context("`--json` is not valid JSON")?;
            options = options.body(body);
        }
        if let Some(reason) = &self.reason {
            options = options.reason(reason);
        }
        for path in &self.files {
            options = options.file(FileAttachment::from_path(path)?);
        }
        if !self.headers.is_empty() {
            let headers: HeaderMap = self.headers.iter().cloned().collect();
            options = options.headers(headers);
        }
        Ok(options)
    }
}

/// Dispatcher settings, from the command line or a configuration file.
///
/// Every field is optional so that a value from the command line can be told
/// apart from one that was never given. Unset fields fall back to the
/// configuration file, then to the library defaults.
#[derive(clap::Args, Debug, Deserialize, Clone, Default)]
#[serde(deny_unknown_fields, default)]
pub(crate) struct Config {
    /// Bot or bearer token
    #[arg(short, long, env = "BUCKETEER_TOKEN", hide_env_values = true)]
    pub(crate) token: Option<SecretString>,

    /// API base URL without the version segment
    #[arg(long)]
    pub(crate) base_url: Option<String>,

    /// API version
    #[arg(long)]
    pub(crate) api_version: Option<u8>,

    #[arg(long, help = HELP_MSG_MAX_RETRIES)]
    pub(crate) max_retries: Option<u32>,

    /// Response timeout per request, e.g. `30s`
    #[arg(long, value_parser = humantime::parse_duration)]
    #[serde(with = "humantime_serde")]
    pub(crate) timeout: Option<Duration>,

    /// Treat the base URL as a REST proxy (or not), regardless of its host
    #[arg(long)]
    pub(crate) proxy_mode: Option<bool>,

    /// Shared secret sent to a REST proxy
    #[arg(long, env = "BUCKETEER_PROXY_SECRET", hide_env_values = true)]
    pub(crate) proxy_secret: Option<SecretString>,

    /// Outbound requests per second across all buckets; 0 disables pacing
    #[arg(long)]
    pub(crate) requests_per_second: Option<u32>,

    /// User agent override
    #[arg(long)]
    pub(crate) user_agent: Option<String>,

    #[command(flatten)]
    pub(crate) verbose: Verbosity,
}

impl Config {
    /// Load configuration from a file
    pub(crate) fn load_from_file(path: &Path) -> Result<Config> {
        let contents = fs::read_to_string(path)?;
        toml::from_str(&contents).with_context(|| "Failed to parse configuration file")
    }

    /// Merge the configuration from TOML into the CLI configuration
    pub(crate) fn merge(&mut self, toml: Config) {
        if self.verbose.is_default() {
            self.verbose = toml.verbose;
        }

        // NOTE: if you see an error within this macro call, check to make sure that
        // that the fields provided to fold_in! match all the fields of the Config struct.
        fold_in! {
            // Destination and source configs
            self, toml;

            Config {
                // Keys which are handled outside of fold_in
                ..verbose,

                // Keys that fall back to the file
                token,
                base_url,
                api_version,
                max_retries,
                timeout,
                proxy_mode,
                proxy_secret,
                requests_per_second,
                user_agent,
            }
        }
    }

    /// Settings for the dispatcher, with library defaults for unset values
    pub(crate) fn dispatch_config(&self) -> DispatchConfig {
        let defaults = DispatchConfig::default();
        DispatchConfig {
            base_url: self.base_url.clone().unwrap_or(defaults.base_url),
            api_version: self.api_version.unwrap_or(defaults.api_version),
            token: self.token.clone(),
            max_retries: self.max_retries.unwrap_or(defaults.max_retries),
            proxy_mode: self.proxy_mode,
            proxy_secret: self.proxy_secret.clone(),
            global_requests_per_second: self
                .requests_per_second
                .unwrap_or(defaults.global_requests_per_second),
            user_agent: self.user_agent.clone(),
            timeout: self.timeout,
            ..defaults
        }
    }
}

impl TryFrom<&str> for Config {
    type Error = Error;

    fn try_from(contents: &str) -> Result<Self, Self::Error> {
        toml::from_str(contents).context("Failed to parse configuration")
    }
}
