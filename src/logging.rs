//! Tracing subscriber setup for the `roadworks` binary.
//!
//! `ROADWORKS_LOG` takes precedence over the configured level, using the
//! usual `EnvFilter` directive syntax (`roadworks=debug,rusqlite=warn`).
//! Logs go to stderr so command output on stdout stays machine-readable.

use anyhow::Result;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::roadworks_config::{LogFormat, LoggingConfig};

pub const LOG_ENV_VAR: &str = "ROADWORKS_LOG";

/// Filter from `ROADWORKS_LOG`, falling back to `default_level`.
pub fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV_VAR).unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Install the global subscriber. `verbose` raises the default to `debug`.
pub fn init(config: &LoggingConfig, verbose: bool) -> Result<()> {
    let level = if verbose { "debug" } else { config.level.as_str() };
    let registry = tracing_subscriber::registry().with(env_filter(level));
    match config.format {
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_writer(std::io::stderr),
            )
            .try_init()?,
        LogFormat::Pretty => registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .without_time()
                    .with_writer(std::io::stderr),
            )
            .try_init()?,
    }
    Ok(())
}
