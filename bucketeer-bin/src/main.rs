//! `bucketeer` sends a single request to the Discord REST API and prints the
//! response.
//!
//! The bucketeer binary is a wrapper around bucketeer-lib, which provides
//! rate limit aware dispatch, retries on 429 responses, and audit log
//! reasons.
//!
//! Fetch the current bot user:
//! ```sh
//! BUCKETEER_TOKEN=... bucketeer get /users/@me
//! ```
//!
//! Send a message with an attachment:
//! ```sh
//! bucketeer post /channels/41771983423143937/messages \
//!     --json '{"content": "see attached"}' --file report.txt
//! ```
//!
//! Kick a member, recording why:
//! ```sh
//! bucketeer delete /guilds/1/members/2 --reason "spam"
//! ```
#![warn(clippy::all, clippy::pedantic)]
#![warn(
    absolute_paths_not_starting_with_crate,
    rustdoc::invalid_html_tags,
    missing_copy_implementations,
    missing_debug_implementations,
    semicolon_in_expressions_from_macros,
    unreachable_pub,
    unused_extern_crates,
    variant_size_differences,
    clippy::missing_const_for_fn
)]
#![deny(anonymous_parameters, macro_use_extern_crate)]
#![deny(missing_docs)]

use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use bucketeer_lib::{DispatcherBuilder, ResponseBody};
use clap::Parser;
use log::error;

mod logging;
mod options;
mod verbosity;

use crate::logging::init_logging;
use crate::options::{BUCKETEER_CONFIG_FILE, BucketeerOptions, Config};

/// A C-like enum that can be cast to `i32` and used as process exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExitCode {
    Success = 0,
    // NOTE: exit code 1 is used for any `Result::Err` bubbled up to `main()`
    // using the `?` operator.
    #[allow(unused)]
    UnexpectedFailure = 1,
    RequestFailure = 2,
    ConfigFile = 3,
}

fn main() -> Result<()> {
    // std::process::exit doesn't guarantee that all destructors will be run,
    // therefore we wrap the main code in another function to ensure that.
    let exit_code = run_main()?;
    std::process::exit(exit_code);
}

/// Merge all provided config options into one.
/// This includes a potential config file, command-line- and environment variables
fn load_config() -> Result<BucketeerOptions> {
    let mut opts = BucketeerOptions::parse();

    // Load a potentially existing config file and merge it into the config from
    // the CLI. The default file is only read if it exists.
    let config_file = match &opts.config_file {
        Some(path) => Some(path.clone()),
        None => Some(PathBuf::from(BUCKETEER_CONFIG_FILE)).filter(|path| path.is_file()),
    };
    if let Some(config_file) = config_file {
        match Config::load_from_file(&config_file) {
            Ok(c) => opts.config.merge(c),
            Err(e) => {
                init_logging(&opts.config.verbose);
                bail!(
                    "Cannot load configuration file `{}`: {e:?}",
                    config_file.display()
                );
            }
        }
    }

    init_logging(&opts.config.verbose);
    Ok(opts)
}

/// Set up runtime and call bucketeer entrypoint
fn run_main() -> Result<i32> {
    let opts = match load_config() {
        Ok(opts) => opts,
        Err(e) => {
            error!("Error while loading config: {e}");
            return Ok(ExitCode::ConfigFile as i32);
        }
    };

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(run(&opts))
}

/// Send the request given on the command line
async fn run(opts: &BucketeerOptions) -> Result<i32> {
    let dispatcher = DispatcherBuilder::from_config(opts.config.dispatch_config())
        .dispatcher()
        .context("Cannot create dispatcher")?;
    let options = opts.request_options()?;

    match dispatcher.send(opts.method.clone(), &opts.path, options).await {
        Ok(body) => {
            print_body(&body)?;
            Ok(ExitCode::Success as i32)
        }
        Err(e) => {
            error!("{e} ({})", e.class());
            if let Some(body) = e.body() {
                print_body(body)?;
            }
            Ok(ExitCode::RequestFailure as i32)
        }
    }
}

fn print_body(body: &ResponseBody) -> Result<()> {
    let mut stdout = io::stdout().lock();
    match body {
        ResponseBody::Empty => {}
        ResponseBody::Json(value) => writeln!(stdout, "{}", serde_json::to_string_pretty(value)?)?,
        ResponseBody::Text(text) => writeln!(stdout, "{text}")?,
    }
    Ok(())
}
