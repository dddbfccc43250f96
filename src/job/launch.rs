// src/job/launch.rs

//! Spawning the job executable and locating its parallel launcher.

use std::env;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::{Child, Command};
use tracing::{debug, info};

use crate::errors::{JobError, Result};
use crate::poll::loop_until;
use crate::process::ProcessTable;

/// Where the job's stdout/stderr go.
#[derive(Debug)]
pub enum OutputSink {
    /// Both streams appended to this file.
    Log(File),
    /// Inherited from the supervisor.
    Screen,
}

/// Launch settings for [`spawn_job`].
#[derive(Debug)]
pub struct LaunchOptions<'a> {
    pub cmd: &'a [String],
    pub workdir: Option<&'a Path>,
    pub output: OutputSink,
    /// Keep a writable pipe to the job's stdin.
    pub pipe: bool,
}

/// Number of parallel ranks requested on the command line, if any.
///
/// Recognises `--np N`, `-np N`, `-n N` and `--np=N`; the last occurrence
/// wins.
pub fn parallel_ranks(cmd: &[String]) -> Option<u32> {
    let mut ranks = None;
    let mut args = cmd.iter().peekable();

    while let Some(arg) = args.next() {
        if let Some(value) = arg.strip_prefix("--np=") {
            ranks = value.parse().ok().or(ranks);
        } else if matches!(arg.as_str(), "--np" | "-np" | "-n") {
            if let Some(value) = args.peek() {
                ranks = value.parse().ok().or(ranks);
            }
        }
    }

    ranks
}

/// The command runs `launcher` itself (`mpirun ...`, `/opt/mpi/bin/mpirun ...`).
pub fn runs_launcher(cmd: &[String], launcher: &str) -> bool {
    cmd.first()
        .and_then(|exe| Path::new(exe).file_name())
        .is_some_and(|name| name == launcher)
}

/// Locate the launcher process of a parallel run.
///
/// Only searched when the command runs `launcher` with more than one rank;
/// then polled up to `attempts` times, `wait` apart. `None` means the
/// spawned pid should be treated as the parent.
pub async fn find_launcher(
    table: &dyn ProcessTable,
    cmd: &[String],
    launcher: &str,
    attempts: u64,
    wait: Duration,
) -> Result<Option<u32>> {
    if !runs_launcher(cmd, launcher) || parallel_ranks(cmd).is_none_or(|n| n <= 1) {
        return Ok(None);
    }

    let mut found = None;
    let n = loop_until(
        || {
            found = table.find(launcher);
            Ok(found.is_some())
        },
        Some(wait),
        Some(attempts.saturating_sub(1)),
        || Ok(()),
    )
    .await?;

    match n {
        Some(n) => debug!(launcher, pid = ?found, attempts = n + 1, "launcher found"),
        None => debug!(launcher, attempts, "launcher not found; using spawned process"),
    }
    Ok(found)
}

/// Full path of `exe`, searched on `PATH` unless it already contains a
/// path separator.
pub fn resolve_executable(exe: &str) -> Result<PathBuf> {
    let candidate = Path::new(exe);
    if candidate.components().count() > 1 {
        return if is_executable(candidate) {
            Ok(candidate.to_path_buf())
        } else {
            Err(JobError::ExecutableNotFound(exe.to_string()))
        };
    }

    let path = env::var_os("PATH").unwrap_or_default();
    env::split_paths(&path)
        .map(|dir| dir.join(exe))
        .find(|p| is_executable(p))
        .ok_or_else(|| JobError::ExecutableNotFound(exe.to_string()))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file() || path.with_extension("exe").is_file()
}

/// Spawn the job. The child is killed if the returned handle is dropped.
pub fn spawn_job(opts: LaunchOptions<'_>) -> Result<Child> {
    let (exe, args) = opts
        .cmd
        .split_first()
        .ok_or_else(|| JobError::ConfigError("empty command".to_string()))?;

    let mut cmd = Command::new(exe);
    cmd.args(args).kill_on_drop(true);

    if let Some(dir) = opts.workdir {
        cmd.current_dir(dir);
    }

    match opts.output {
        OutputSink::Log(file) => {
            let err = file.try_clone()?;
            cmd.stdout(Stdio::from(file)).stderr(Stdio::from(err));
        }
        OutputSink::Screen => {
            cmd.stdout(Stdio::inherit()).stderr(Stdio::inherit());
        }
    }

    if opts.pipe {
        info!("starting in pipe mode");
        cmd.stdin(Stdio::piped());
    } else {
        cmd.stdin(Stdio::null());
    }

    info!(cmd = %opts.cmd.join(" "), "starting job");

    let child = cmd.spawn().map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => JobError::ExecutableNotFound(exe.clone()),
        _ => JobError::IoError(e),
    })?;

    Ok(child)
}
