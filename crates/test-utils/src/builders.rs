#![allow(dead_code)]

use std::path::{Path, PathBuf};

use jobvisor::config::{
    DiscoverySection, JobFile, JobSection, MarkerSection, NumberedMarker, RawJobFile, RunSection,
};
use jobvisor::config::model::DEFAULT_TIME_REGEX;
use jobvisor::types::KeepAlive;

/// Builder for `JobFile` to simplify test setup.
///
/// Starts from the same defaults a minimal TOML file would get, with the
/// discovery waits shortened so tests do not sit out the production bounds.
pub struct JobFileBuilder {
    config: RawJobFile,
}

impl JobFileBuilder {
    pub fn new(name: &str, cmd: &[&str]) -> Self {
        Self {
            config: RawJobFile {
                job: JobSection {
                    name: name.to_string(),
                    app_name: None,
                    cmd: cmd.iter().map(|s| s.to_string()).collect(),
                    case: PathBuf::from("."),
                    workdir: None,
                    end_time: None,
                    keep_alive: KeepAlive::Immediate,
                    stop_children: true,
                    pipe: false,
                    to_screen: false,
                    keep_files: false,
                    step_timer: false,
                    log_tag: None,
                    time_regex: DEFAULT_TIME_REGEX.to_string(),
                    time_tag: "TIME".to_string(),
                    time_unit: "days".to_string(),
                    tail_bytes: 10 * 1024,
                    markers: MarkerSection::default(),
                },
                discovery: DiscoverySection {
                    launcher_attempts: 3,
                    launcher_wait_ms: 10,
                    child_wait_ms: 10,
                    child_limit: 5,
                    require_child: false,
                    ..DiscoverySection::default()
                },
                run: RunSection {
                    poll_ms: 20,
                    quit_wait_min: 0.05,
                },
            },
        }
    }

    pub fn app_name(mut self, app_name: &str) -> Self {
        self.config.job.app_name = Some(app_name.to_string());
        self
    }

    /// Case path; log and marker files end up next to it.
    pub fn case(mut self, case: impl AsRef<Path>) -> Self {
        self.config.job.case = case.as_ref().to_path_buf();
        self
    }

    pub fn workdir(mut self, dir: impl AsRef<Path>) -> Self {
        self.config.job.workdir = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn end_time(mut self, end_time: f64) -> Self {
        self.config.job.end_time = Some(end_time);
        self
    }

    pub fn keep_alive(mut self, seconds: f64) -> Self {
        self.config.job.keep_alive = KeepAlive::try_from(seconds).expect("keep_alive in range");
        self
    }

    pub fn stop_children(mut self, val: bool) -> Self {
        self.config.job.stop_children = val;
        self
    }

    pub fn pipe(mut self, val: bool) -> Self {
        self.config.job.pipe = val;
        self
    }

    pub fn keep_files(mut self, val: bool) -> Self {
        self.config.job.keep_files = val;
        self
    }

    pub fn step_timer(mut self, val: bool) -> Self {
        self.config.job.step_timer = val;
        self
    }

    pub fn tail_bytes(mut self, bytes: u64) -> Self {
        self.config.job.tail_bytes = bytes;
        self
    }

    pub fn interface_marker(mut self, suffix: &str, width: usize) -> Self {
        self.config.job.markers.interface = Some(NumberedMarker {
            suffix: suffix.to_string(),
            width,
        });
        self
    }

    pub fn ok_marker(mut self, suffix: &str) -> Self {
        self.config.job.markers.ok = Some(suffix.to_string());
        self
    }

    pub fn launcher(mut self, name: &str) -> Self {
        self.config.discovery.launcher = name.to_string();
        self
    }

    pub fn child_search(mut self, wait_ms: u64, limit: u64) -> Self {
        self.config.discovery.child_wait_ms = wait_ms;
        self.config.discovery.child_limit = limit;
        self
    }

    pub fn require_child(mut self, val: bool) -> Self {
        self.config.discovery.require_child = val;
        self
    }

    pub fn poll_ms(mut self, ms: u64) -> Self {
        self.config.run.poll_ms = ms;
        self
    }

    pub fn quit_wait_min(mut self, minutes: f64) -> Self {
        self.config.run.quit_wait_min = minutes;
        self
    }

    pub fn raw(self) -> RawJobFile {
        self.config
    }

    pub fn build(self) -> JobFile {
        JobFile::try_from(self.config).expect("Failed to build valid job file from builder")
    }
}
