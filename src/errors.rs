// src/errors.rs

//! Crate-wide error type and result alias.
//!
//! Two of the variants are not failures: [`JobError::JobComplete`] and
//! [`JobError::Canceled`] travel through the same `Result` channel so that a
//! wait loop can stop the moment either happens, but callers should treat
//! them as regular ends of a run (see [`JobError::is_success`]).

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum JobError {
    #[error("process {process} disappeared {context}")]
    VanishedProcess { process: String, context: String },

    #[error("access denied while signalling {process}")]
    PermissionDenied { process: String },

    #[error("{job} is not running ({process} is {status})")]
    NotRunning {
        job: String,
        process: String,
        status: String,
    },

    #[error("{job} stopped unexpectedly{}{}", fmt_elapsed(.elapsed), fmt_log(.log))]
    UnexpectedTermination {
        job: String,
        elapsed: Option<f64>,
        log: Option<PathBuf>,
    },

    #[error("{message}")]
    LoopLimitExceeded { message: String, limit: Option<u64> },

    #[error("unable to find child process of {parent} in {seconds:.1} seconds")]
    ChildSearchFailed { parent: String, seconds: f64 },

    #[error("run stopped after {} {unit}", trim_float(.elapsed))]
    Canceled { elapsed: f64, unit: String },

    #[error("job complete, run-time was {}", fmt_run_time(.run_time))]
    JobComplete { run_time: Duration },

    #[error("executable not found: {0}")]
    ExecutableNotFound(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("invalid time pattern: {0}")]
    RegexError(#[from] regex::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl JobError {
    /// True for the distinguished non-error ends of a run.
    pub fn is_success(&self) -> bool {
        matches!(self, JobError::JobComplete { .. } | JobError::Canceled { .. })
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self, JobError::Canceled { .. })
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, JobError::JobComplete { .. })
    }

    pub(crate) fn loop_limit(message: impl Into<String>, limit: Option<u64>) -> Self {
        JobError::LoopLimitExceeded {
            message: message.into(),
            limit,
        }
    }
}

fn fmt_elapsed(elapsed: &Option<f64>) -> String {
    elapsed
        .map(|t| format!(" after {}", trim_float(&t)))
        .unwrap_or_default()
}

fn fmt_log(log: &Option<PathBuf>) -> String {
    match log.as_ref().and_then(|p| p.file_name()) {
        Some(name) => format!(", check {} for details", name.to_string_lossy()),
        None => String::new(),
    }
}

/// `12.50` -> `12.5`, `3.00` -> `3`.
pub(crate) fn trim_float(value: &f64) -> String {
    let s = format!("{value:.2}");
    s.trim_end_matches('0').trim_end_matches('.').to_string()
}

/// Whole seconds as `H:MM:SS`.
pub(crate) fn fmt_run_time(run_time: &Duration) -> String {
    let secs = run_time.as_secs();
    format!("{}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, JobError>;
