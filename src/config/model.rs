// src/config/model.rs

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::types::KeepAlive;

/// Default elapsed-time pattern: `TIME 12.5` style lines.
pub const DEFAULT_TIME_REGEX: &str = r"TIME\s+([0-9]*\.?[0-9]+)";

/// Validated job configuration.
///
/// Only obtainable through `JobFile::try_from(RawJobFile)` (or
/// [`crate::config::load_and_validate`]), so holders can rely on the
/// invariants checked in `validate.rs`.
#[derive(Debug, Clone)]
pub struct JobFile {
    pub job: JobSection,
    pub discovery: DiscoverySection,
    pub run: RunSection,
}

impl JobFile {
    pub(crate) fn new_unchecked(
        job: JobSection,
        discovery: DiscoverySection,
        run: RunSection,
    ) -> Self {
        Self {
            job,
            discovery,
            run,
        }
    }
}

/// Configuration as read from a TOML file, before validation:
///
/// ```toml
/// [job]
/// name = "sim"
/// cmd = ["mpirun", "--np", "4", "sim", "CASE"]
/// case = "run/CASE"
/// end_time = 365
/// keep_alive = 5
///
/// [job.markers]
/// interface = { suffix = ".I", width = 4 }
/// ok = ".OK"
///
/// [discovery]
/// child_wait_ms = 250
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct RawJobFile {
    pub job: JobSection,

    #[serde(default)]
    pub discovery: DiscoverySection,

    #[serde(default)]
    pub run: RunSection,
}

/// `[job]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct JobSection {
    /// Display name; also names the log file.
    pub name: String,

    /// Process-name prefix of the worker process. Defaults to `name`.
    #[serde(default)]
    pub app_name: Option<String>,

    /// Executable followed by its arguments.
    pub cmd: Vec<String>,

    /// Case path. The log file lives in its parent directory and marker
    /// files are named after it.
    #[serde(default = "default_case")]
    pub case: PathBuf,

    /// Directory the command runs in; inherited when unset.
    #[serde(default)]
    pub workdir: Option<PathBuf>,

    /// Elapsed progress at which the job counts as complete.
    #[serde(default)]
    pub end_time: Option<f64>,

    /// Suspend policy, in seconds (see [`KeepAlive`]).
    #[serde(default)]
    pub keep_alive: KeepAlive,

    /// Suspend/resume/kill worker children as well as the parent.
    #[serde(default = "default_true")]
    pub stop_children: bool,

    /// Keep a writable pipe to the job's stdin.
    #[serde(default)]
    pub pipe: bool,

    /// Let the job write to our stdout/stderr instead of its log file.
    #[serde(default)]
    pub to_screen: bool,

    /// Leave marker files behind on close.
    #[serde(default)]
    pub keep_files: bool,

    /// Record per-step execution times in `<name>_timer.dat`.
    #[serde(default)]
    pub step_timer: bool,

    /// Extra text between the job name and `.log`.
    #[serde(default)]
    pub log_tag: Option<String>,

    /// Regex whose first capture group is the elapsed progress value.
    #[serde(default = "default_time_regex")]
    pub time_regex: String,

    /// Text that must occur in the log tail before the regex is tried.
    #[serde(default = "default_time_tag")]
    pub time_tag: String,

    /// Unit of the progress value, used in messages.
    #[serde(default = "default_time_unit")]
    pub time_unit: String,

    /// Trailing bytes of the log scanned for progress.
    #[serde(default = "default_tail_bytes")]
    pub tail_bytes: u64,

    #[serde(default)]
    pub markers: MarkerSection,
}

fn default_case() -> PathBuf {
    PathBuf::from(".")
}

fn default_true() -> bool {
    true
}

fn default_time_regex() -> String {
    DEFAULT_TIME_REGEX.to_string()
}

fn default_time_tag() -> String {
    "TIME".to_string()
}

fn default_time_unit() -> String {
    "days".to_string()
}

fn default_tail_bytes() -> u64 {
    10 * 1024
}

impl JobSection {
    pub fn effective_app_name(&self) -> &str {
        self.app_name.as_deref().unwrap_or(&self.name)
    }

    /// `<case dir>/<name><log_tag>.log`, name lower-cased.
    pub fn log_path(&self) -> PathBuf {
        let file = format!(
            "{}{}.log",
            self.name.to_lowercase(),
            self.log_tag.as_deref().unwrap_or("")
        );
        self.case_dir().join(file)
    }

    pub fn case_dir(&self) -> &Path {
        self.case.parent().unwrap_or_else(|| Path::new(""))
    }

    pub fn step_timer_path(&self) -> PathBuf {
        self.case_dir()
            .join(format!("{}_timer.dat", self.name.to_lowercase()))
    }
}

/// `[job.markers]` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MarkerSection {
    /// Numbered interface markers: case path + suffix + zero-padded number.
    #[serde(default)]
    pub interface: Option<NumberedMarker>,

    /// Single completion marker: case path + this suffix.
    #[serde(default)]
    pub ok: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NumberedMarker {
    pub suffix: String,
    pub width: usize,
}

/// `[discovery]` section: how the process tree is resolved after launch.
#[derive(Debug, Clone, Deserialize)]
pub struct DiscoverySection {
    /// Name of the parallel launcher process.
    #[serde(default = "default_launcher")]
    pub launcher: String,

    #[serde(default = "default_launcher_attempts")]
    pub launcher_attempts: u64,

    #[serde(default = "default_launcher_wait_ms")]
    pub launcher_wait_ms: u64,

    #[serde(default = "default_child_wait_ms")]
    pub child_wait_ms: u64,

    #[serde(default = "default_child_limit")]
    pub child_limit: u64,

    /// Fail `start()` when no worker child turns up.
    #[serde(default = "default_true")]
    pub require_child: bool,
}

fn default_launcher() -> String {
    "mpirun".to_string()
}

fn default_launcher_attempts() -> u64 {
    20
}

fn default_launcher_wait_ms() -> u64 {
    100
}

fn default_child_wait_ms() -> u64 {
    500
}

fn default_child_limit() -> u64 {
    500
}

impl Default for DiscoverySection {
    fn default() -> Self {
        Self {
            launcher: default_launcher(),
            launcher_attempts: default_launcher_attempts(),
            launcher_wait_ms: default_launcher_wait_ms(),
            child_wait_ms: default_child_wait_ms(),
            child_limit: default_child_limit(),
            require_child: true,
        }
    }
}

impl DiscoverySection {
    pub fn launcher_wait(&self) -> Duration {
        Duration::from_millis(self.launcher_wait_ms)
    }

    pub fn child_wait(&self) -> Duration {
        Duration::from_millis(self.child_wait_ms)
    }
}

/// `[run]` section, used by the `jobvisor` binary.
#[derive(Debug, Clone, Deserialize)]
pub struct RunSection {
    /// How often progress is checked while the job runs.
    #[serde(default = "default_poll_ms")]
    pub poll_ms: u64,

    /// How long `quit()` waits for the job to exit before killing it.
    #[serde(default = "default_quit_wait_min")]
    pub quit_wait_min: f64,
}

fn default_poll_ms() -> u64 {
    1000
}

fn default_quit_wait_min() -> f64 {
    1.0
}

impl Default for RunSection {
    fn default() -> Self {
        Self {
            poll_ms: default_poll_ms(),
            quit_wait_min: default_quit_wait_min(),
        }
    }
}

impl RunSection {
    pub fn poll(&self) -> Duration {
        Duration::from_millis(self.poll_ms)
    }
}
