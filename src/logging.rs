// src/logging.rs

//! Logging setup for `jobvisor` using `tracing` + `tracing-subscriber`.
//!
//! The filter comes from, in order:
//! 1. `--log-level` on the command line, applied to every target;
//! 2. `JOBVISOR_LOG`, in `EnvFilter` directive syntax
//!    (`debug`, `jobvisor::process=trace,info`, ...);
//! 3. `info`.
//!
//! Logs go to STDERR so that a job running with `to_screen = true` keeps
//! STDOUT to itself.

use anyhow::anyhow;
use tracing_subscriber::{EnvFilter, fmt};

use crate::cli::LogLevel;
use crate::errors::{JobError, Result};

/// Environment variable holding the default log filter.
pub const LOG_ENV: &str = "JOBVISOR_LOG";

/// Install the global subscriber. Fails if one is already installed.
pub fn init_logging(cli_level: Option<LogLevel>) -> Result<()> {
    let env = std::env::var(LOG_ENV).ok();
    let filter = build_filter(cli_level, env.as_deref())?;

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow!("unable to install log subscriber: {e}"))?;

    Ok(())
}

/// Log filter for a CLI level and the raw `JOBVISOR_LOG` value.
pub fn build_filter(cli_level: Option<LogLevel>, env: Option<&str>) -> Result<EnvFilter> {
    if let Some(level) = cli_level {
        return Ok(EnvFilter::new(level.as_directive()));
    }
    match env.map(str::trim).filter(|s| !s.is_empty()) {
        Some(directives) => EnvFilter::try_new(directives).map_err(|e| {
            JobError::ConfigError(format!("invalid {LOG_ENV} '{directives}': {e}"))
        }),
        None => Ok(EnvFilter::new("info")),
    }
}
