// src/types.rs

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

/// What `suspend()` / `resume()` do for a job.
///
/// Configured as a single signed number of seconds (`keep_alive = 5`):
///
/// - positive: `Delayed(window)`, suspension is deferred by `window` and
///   dropped if the job is resumed first.
/// - zero: `Immediate`, suspend and resume act on every call.
/// - negative: `Disabled`, suspend and resume are no-ops.
///
/// NaN and windows too large for a `Duration` (`inf`, `1e30`) are rejected.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(try_from = "f64")]
pub enum KeepAlive {
    Delayed(Duration),
    Immediate,
    Disabled,
}

impl Default for KeepAlive {
    fn default() -> Self {
        KeepAlive::Immediate
    }
}

impl TryFrom<f64> for KeepAlive {
    type Error = String;

    fn try_from(seconds: f64) -> Result<Self, Self::Error> {
        if seconds.is_nan() {
            Err("keep_alive must be a number of seconds, got NaN".to_string())
        } else if seconds > 0.0 {
            Duration::try_from_secs_f64(seconds)
                .map(KeepAlive::Delayed)
                .map_err(|e| format!("keep_alive {seconds} is out of range: {e}"))
        } else if seconds < 0.0 {
            Ok(KeepAlive::Disabled)
        } else {
            Ok(KeepAlive::Immediate)
        }
    }
}

impl FromStr for KeepAlive {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let seconds = s
            .trim()
            .parse::<f64>()
            .map_err(|e| format!("invalid keep_alive '{s}': {e}"))?;
        KeepAlive::try_from(seconds)
    }
}

impl fmt::Display for KeepAlive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeepAlive::Delayed(window) => write!(f, "delayed {:.1}s", window.as_secs_f64()),
            KeepAlive::Immediate => write!(f, "immediate"),
            KeepAlive::Disabled => write!(f, "disabled"),
        }
    }
}

/// Live state of an OS process as seen by a [`crate::process::ProcessTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    Running,
    Sleeping,
    Stopped,
    Zombie,
    Gone,
}

impl ProcessStatus {
    /// The process exists and has not exited. A stopped (suspended) process
    /// still counts as alive.
    pub fn is_alive(self) -> bool {
        matches!(
            self,
            ProcessStatus::Running | ProcessStatus::Sleeping | ProcessStatus::Stopped
        )
    }
}

impl fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProcessStatus::Running => "running",
            ProcessStatus::Sleeping => "sleeping",
            ProcessStatus::Stopped => "stopped",
            ProcessStatus::Zombie => "zombie",
            ProcessStatus::Gone => "gone",
        };
        f.write_str(s)
    }
}

/// Signals the supervisor sends to processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessSignal {
    Suspend,
    Resume,
    Kill,
}
