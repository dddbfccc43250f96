// src/job/progress.rs

//! Elapsed-progress extraction from the tail of a growing log file.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use regex::Regex;
use tracing::trace;

use crate::errors::Result;

/// Default trailing window scanned for progress.
pub const DEFAULT_TAIL_BYTES: u64 = 10 * 1024;

/// Reads the most recent elapsed-time value a job wrote to its log.
///
/// Only the last `window_bytes` of the file are read on each call, so the
/// cost stays flat while the log grows.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    log_path: PathBuf,
    pattern: Regex,
    tag: String,
    window_bytes: u64,
}

impl ProgressTracker {
    /// `pattern` must have at least one capture group; group 1 is the value.
    pub fn new(log_path: impl Into<PathBuf>, pattern: &str, tag: impl Into<String>) -> Result<Self> {
        Ok(Self {
            log_path: log_path.into(),
            pattern: Regex::new(pattern)?,
            tag: tag.into(),
            window_bytes: DEFAULT_TAIL_BYTES,
        })
    }

    pub fn with_window(mut self, window_bytes: u64) -> Self {
        self.window_bytes = window_bytes.max(1);
        self
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Last value matched in the trailing window, `0.0` when the file is
    /// missing, the tag is absent or nothing parses.
    pub fn latest_time(&self) -> f64 {
        let Ok(window) = tail_window(&self.log_path, self.window_bytes) else {
            return 0.0;
        };
        if !window.contains(&self.tag) {
            return 0.0;
        }

        let value = self
            .pattern
            .captures_iter(&window)
            .filter_map(|caps| caps.get(1))
            .last()
            .and_then(|m| m.as_str().parse::<f64>().ok())
            .unwrap_or(0.0);

        trace!(log = %self.log_path.display(), value, "progress read");
        value
    }
}

/// The last `size` bytes of `path`, decoded lossily.
pub fn tail_window(path: &Path, size: u64) -> std::io::Result<String> {
    let mut file = File::open(path)?;
    let len = file.metadata()?.len();
    let start = len.saturating_sub(size);
    file.seek(SeekFrom::Start(start))?;

    let mut buf = Vec::with_capacity((len - start) as usize);
    file.read_to_end(&mut buf)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}
