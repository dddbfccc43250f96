// src/job/supervisor.rs

//! Lifecycle of one supervised job.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use anyhow::Context;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin};
use tracing::{Span, debug, info, info_span, warn};

use super::CancelHandle;
use super::launch::{LaunchOptions, OutputSink, find_launcher, resolve_executable, spawn_job};
use super::markers::MarkerFile;
use super::progress::ProgressTracker;
use crate::config::{DiscoverySection, JobFile, JobSection};
use crate::errors::{JobError, Result};
use crate::poll::{LivenessCheck, WaitSpec, limit_from_minutes, loop_until};
use crate::process::{ErrorHook, ProcessHandle, ProcessTable, SystemProcessTable};
use crate::timer::{DeferredActionTimer, SUSPEND_TIMER_PRECISION, StepTimer, TimerState};
use crate::types::KeepAlive;

/// Pause between attempts of the suspend/resume confirmation wait.
const CONFIRM_PAUSE: Duration = Duration::from_millis(10);
/// Bound of the suspend/resume confirmation wait, in minutes.
const CONFIRM_WAIT_MIN: f64 = 0.02;
/// Pause of `quit()`'s wait for the job to exit.
const QUIT_PAUSE: Duration = Duration::from_millis(10);

/// Supervises one job: launch, process-tree discovery, suspend/resume,
/// bounded waits, progress tracking and teardown.
///
/// The active set (the handles that receive suspend/resume/kill) is fixed
/// once the process tree has been resolved and stays fixed until `close()`.
/// It holds the worker children followed by the parent when
/// `stop_children` is set, and the parent alone otherwise.
#[derive(Debug)]
pub struct JobSupervisor {
    cfg: JobSection,
    discovery: DiscoverySection,
    quit_wait_min: f64,
    table: Arc<dyn ProcessTable>,
    span: Span,

    log_path: Option<PathBuf>,
    progress: Option<ProgressTracker>,
    end_time: Option<f64>,
    elapsed: AtomicU64,
    steps: u64,
    canceled: CancelHandle,
    unexpected_stop: Arc<AtomicBool>,

    parent: Option<ProcessHandle>,
    children: Vec<ProcessHandle>,
    main: Option<ProcessHandle>,
    active: Vec<ProcessHandle>,

    child: Option<Child>,
    stdin: Option<ChildStdin>,
    suspend_timer: Option<DeferredActionTimer>,
    step_timer: Option<StepTimer>,
    interface: Option<MarkerFile>,
    ok_marker: Option<MarkerFile>,
    started_at: Option<Instant>,
    closed: bool,
}

impl JobSupervisor {
    /// Supervisor over the live process table.
    pub fn new(cfg: &JobFile) -> Result<Self> {
        Self::with_table(cfg, Arc::new(SystemProcessTable::new()))
    }

    pub fn with_table(cfg: &JobFile, table: Arc<dyn ProcessTable>) -> Result<Self> {
        let job = cfg.job.clone();
        let span = info_span!("job", job = %job.name);

        let log_path = (!job.to_screen).then(|| job.log_path());
        let progress = match &log_path {
            Some(path) => Some(
                ProgressTracker::new(path, &job.time_regex, job.time_tag.clone())?
                    .with_window(job.tail_bytes),
            ),
            None => None,
        };

        let interface = job
            .markers
            .interface
            .as_ref()
            .map(|m| MarkerFile::numbered(case_marker(&job.case, &m.suffix), m.width));
        let ok_marker = job
            .markers
            .ok
            .as_ref()
            .map(|suffix| MarkerFile::single(case_marker(&job.case, suffix)));

        Ok(Self {
            end_time: job.end_time,
            cfg: job,
            discovery: cfg.discovery.clone(),
            quit_wait_min: cfg.run.quit_wait_min,
            table,
            span,
            log_path,
            progress,
            elapsed: AtomicU64::new(0f64.to_bits()),
            steps: 0,
            canceled: CancelHandle::new(),
            unexpected_stop: Arc::new(AtomicBool::new(false)),
            parent: None,
            children: Vec::new(),
            main: None,
            active: Vec::new(),
            child: None,
            stdin: None,
            suspend_timer: None,
            step_timer: None,
            interface,
            ok_marker,
            started_at: None,
            closed: false,
        })
    }

    /// The executable exists and is runnable.
    pub fn check_input(&self) -> Result<PathBuf> {
        let exe = self
            .cfg
            .cmd
            .first()
            .ok_or_else(|| JobError::ConfigError("empty command".to_string()))?;
        let path = resolve_executable(exe)?;
        debug!(parent: &self.span, exe = %path.display(), "executable found");
        Ok(path)
    }

    /// Launch the job and resolve its process tree.
    pub async fn start(&mut self) -> Result<()> {
        self.ensure_not_started()?;

        let output = match &self.log_path {
            Some(path) => OutputSink::Log(
                File::create(path)
                    .with_context(|| format!("unable to open log file {}", path.display()))?,
            ),
            None => OutputSink::Screen,
        };

        let mut child = spawn_job(LaunchOptions {
            cmd: &self.cfg.cmd,
            workdir: self.cfg.workdir.as_deref(),
            output,
            pipe: self.cfg.pipe,
        })?;
        self.stdin = child.stdin.take();
        let pid = child.id().ok_or_else(|| JobError::VanishedProcess {
            process: self.cfg.cmd.join(" "),
            context: "right after launch".to_string(),
        })?;
        self.child = Some(child);

        if let Err(err) = self.attach(pid).await {
            self.kill_launched(pid).await;
            return Err(err);
        }
        Ok(())
    }

    /// Kill the tree of a launched job that could not be attached, so no
    /// worker outlives the failed start.
    async fn kill_launched(&self, pid: u32) {
        let handle = match ProcessHandle::from_pid(
            Arc::clone(&self.table),
            pid,
            self.cfg.effective_app_name(),
            self.span.clone(),
        ) {
            Ok(handle) => handle,
            Err(_) => {
                debug!(parent: &self.span, pid, "launched process already gone");
                return;
            }
        };
        warn!(parent: &self.span, process = %handle, "start failed; killing launched process tree");
        if let Err(err) = handle.kill(true).await {
            warn!(parent: &self.span, process = %handle, error = %err, "unable to kill launched process tree");
        }
    }

    /// Supervise an already running process as if it had been launched by
    /// `start()`.
    pub async fn attach(&mut self, pid: u32) -> Result<()> {
        if self.parent.is_some() || self.closed {
            return Err(JobError::ConfigError(format!(
                "job '{}' was already started",
                self.cfg.name
            )));
        }
        self.started_at = Some(Instant::now());

        self.set_processes(pid).await?;

        if let KeepAlive::Delayed(window) = self.cfg.keep_alive {
            let active = self.active.clone();
            let span = self.span.clone();
            self.suspend_timer = Some(DeferredActionTimer::new(
                window,
                SUSPEND_TIMER_PRECISION,
                Arc::new(move || {
                    let ok = suspend_handles(&active);
                    info!(parent: &span, ok, "delayed suspend");
                }),
            ));
        }

        if self.cfg.step_timer {
            let mut timer = StepTimer::create(self.cfg.step_timer_path())?;
            timer.start();
            self.step_timer = Some(timer);
        }

        Ok(())
    }

    fn ensure_not_started(&self) -> Result<()> {
        if self.child.is_some() || self.parent.is_some() || self.closed {
            return Err(JobError::ConfigError(format!(
                "job '{}' was already started",
                self.cfg.name
            )));
        }
        Ok(())
    }

    /// Resolve parent, children, main and active handles for `pid`.
    async fn set_processes(&mut self, pid: u32) -> Result<()> {
        let launcher = find_launcher(
            self.table.as_ref(),
            &self.cfg.cmd,
            &self.discovery.launcher,
            self.discovery.launcher_attempts,
            self.discovery.launcher_wait(),
        )
        .await?;

        let parent = ProcessHandle::from_pid(
            Arc::clone(&self.table),
            launcher.unwrap_or(pid),
            self.cfg.effective_app_name(),
            self.span.clone(),
        )?
        .with_error_hook(self.vanish_hook());
        info!(parent: &self.span, process = %parent, "parent process");

        let search = parent
            .get_children(
                self.discovery.child_wait(),
                self.discovery.child_limit,
                self.discovery.require_child,
            )
            .await?;
        let names: Vec<String> = search.children.iter().map(ToString::to_string).collect();
        info!(
            parent: &self.span,
            children = %names.join(", "),
            seconds = ?search.elapsed.map(|d| d.as_secs_f64()),
            "child processes"
        );

        self.children = search.children;
        self.main = Some(self.children.last().unwrap_or(&parent).clone());
        self.active = if self.cfg.stop_children {
            self.children.iter().cloned().chain([parent.clone()]).collect()
        } else {
            vec![parent.clone()]
        };
        self.parent = Some(parent);

        Ok(())
    }

    /// Error raised when an active process has died outside a planned
    /// shutdown. Also flags the job as stopped unexpectedly.
    fn vanish_hook(&self) -> ErrorHook {
        let job = self.cfg.name.clone();
        let log = self.log_path.clone();
        let progress = self.progress.clone();
        let flag = Arc::clone(&self.unexpected_stop);
        Arc::new(move |_: &ProcessHandle| {
            flag.store(true, Ordering::SeqCst);
            JobError::UnexpectedTermination {
                job: job.clone(),
                elapsed: Some(progress.as_ref().map_or(0.0, ProgressTracker::latest_time)),
                log: log.clone(),
            }
        })
    }

    /// Suspend every active process. `true` if all signals went through.
    /// Every handle is signalled even when an earlier one fails.
    pub fn suspend_all(&self) -> bool {
        suspend_handles(&self.active)
    }

    /// Resume every active process. `true` if all signals went through.
    pub fn resume_all(&self) -> bool {
        let resumed: Vec<bool> = self.active.iter().map(ProcessHandle::resume).collect();
        resumed.into_iter().all(|ok| ok)
    }

    /// Suspend according to the keep-alive policy. With `check` the call
    /// waits (briefly, without failing) until each process reports sleeping.
    pub async fn suspend(&mut self, check: bool) -> Result<()> {
        match self.cfg.keep_alive {
            KeepAlive::Delayed(window) => {
                info!(parent: &self.span, window = ?window, "delayed suspend");
                if let Some(timer) = self.suspend_timer.as_mut() {
                    timer.start();
                }
            }
            KeepAlive::Disabled => info!(parent: &self.span, "no suspend"),
            KeepAlive::Immediate => {
                info!(parent: &self.span, "suspend");
                self.suspend_all();
                if check {
                    for proc in &self.active {
                        self.wait_for(
                            || proc.is_sleeping(),
                            WaitSpec::new(format!("{proc} is sleeping"))
                                .pause(Some(CONFIRM_PAUSE))
                                .minutes(CONFIRM_WAIT_MIN),
                        )
                        .await?;
                    }
                }
                if let Some(timer) = &self.step_timer {
                    timer.stop()?;
                }
            }
        }
        self.log_process_status();
        Ok(())
    }

    /// Resume according to the keep-alive policy.
    ///
    /// A delayed suspend that has not fired yet is simply dropped. Once it
    /// has fired the processes are resumed and the log says how long they
    /// were suspended.
    pub async fn resume(&mut self, check: bool) -> Result<()> {
        if let (KeepAlive::Delayed(_), Some(timer)) = (self.cfg.keep_alive, &self.suspend_timer) {
            if timer.cancel_if_alive() {
                let delayed = timer.endtime().unwrap_or_default().as_secs_f64();
                info!(parent: &self.span, "no resume (suspend delayed {delayed:.0} sec)");
                self.log_process_status();
                return Ok(());
            }
        }

        if self.cfg.keep_alive == KeepAlive::Disabled {
            info!(parent: &self.span, "no resume (not suspended)");
            self.log_process_status();
            return Ok(());
        }

        match &self.suspend_timer {
            Some(timer) if !timer.is_alive() => {
                info!(parent: &self.span, "resume (suspended {:.0} sec ago)", -timer.uptime());
            }
            _ => info!(parent: &self.span, "resume"),
        }
        self.resume_all();
        if check {
            for proc in &self.active {
                self.wait_for(
                    || Ok(proc.is_running()),
                    WaitSpec::new(format!("{proc} is running"))
                        .pause(Some(CONFIRM_PAUSE))
                        .minutes(CONFIRM_WAIT_MIN),
                )
                .await?;
            }
        }
        if let Some(timer) = self.step_timer.as_mut() {
            timer.start();
        }
        self.log_process_status();
        Ok(())
    }

    /// Poll `predicate` as described by `spec`.
    ///
    /// Returns `Ok(true)` on success and `Ok(false)` when the bound is
    /// exhausted, unless the spec asks for `LoopLimitExceeded` instead.
    /// Errors from the predicate or the liveness check end the wait at once.
    pub async fn wait_for<P>(&self, predicate: P, spec: WaitSpec<'_>) -> Result<bool>
    where
        P: FnMut() -> Result<bool>,
    {
        let WaitSpec {
            label,
            pause,
            limit,
            liveness,
            raise_on_exhaustion,
            error,
            timed,
        } = spec;

        debug!(parent: &self.span, wait = %label, ?limit, ?pause, "waiting");
        let started = Instant::now();

        let outcome = match liveness {
            LivenessCheck::Job => {
                loop_until(predicate, pause, limit, || {
                    self.assert_running_and_stop_if_canceled()
                })
                .await?
            }
            LivenessCheck::Skip => loop_until(predicate, pause, limit, || Ok(())).await?,
            LivenessCheck::Custom(check) => loop_until(predicate, pause, limit, check).await?,
        };

        let seconds = timed.then(|| started.elapsed().as_secs_f64());
        match outcome {
            Some(loops) => {
                debug!(parent: &self.span, wait = %label, loops, ?seconds, "wait done");
                Ok(true)
            }
            None if raise_on_exhaustion => Err(JobError::loop_limit(
                error.unwrap_or_else(|| {
                    format!(
                        "wait_for({label}) reached loop-limit {}",
                        limit.unwrap_or_default()
                    )
                }),
                limit,
            )),
            None => {
                debug!(parent: &self.span, wait = %label, ?seconds, "loop limit reached");
                Ok(false)
            }
        }
    }

    /// Wait for the main process to stop; kill the job if it is still
    /// running after `minutes`.
    pub async fn wait_for_process_to_finish(
        &mut self,
        minutes: Option<f64>,
        pause: Option<Duration>,
        liveness: LivenessCheck<'_>,
    ) -> Result<()> {
        let Some(main) = self.main.clone() else {
            return Ok(());
        };
        info!(parent: &self.span, process = %main, "waiting for process to finish");

        let spec = WaitSpec::new(format!("{main} to finish"))
            .pause(pause)
            .limit(limit_from_minutes(minutes, pause))
            .liveness(liveness);
        let finished = self.wait_for(|| Ok(main.is_not_running()), spec).await?;

        if !finished {
            let names: Vec<String> = self.active.iter().map(ToString::to_string).collect();
            warn!(
                parent: &self.span,
                minutes = minutes.unwrap_or_default(),
                active = %names.join(", "),
                "process did not finish in time and will be killed"
            );
            self.kill().await?;
        }
        Ok(())
    }

    /// Wait for each file to exist, in order. A file still missing after
    /// `minutes` fails the wait with an error naming it.
    pub async fn wait_for_files(&self, paths: &[PathBuf], minutes: Option<f64>) -> Result<()> {
        for path in paths {
            let mut spec = WaitSpec::new(format!("{} exists", path.display()))
                .raise_on_exhaustion(Some(format!("{} is missing", path.display())));
            if let Some(minutes) = minutes {
                spec = spec.minutes(minutes);
            }
            self.wait_for(|| Ok(path.is_file()), spec).await?;
            debug!(parent: &self.span, file = %path.display(), "file exists");
        }
        Ok(())
    }

    /// Every active process still runs and the job was not canceled.
    pub fn assert_running_and_stop_if_canceled(&self) -> Result<()> {
        for proc in &self.active {
            proc.assert_running()?;
        }
        self.stop_if_canceled()
    }

    /// `Err(Canceled)` once `cancel()` has been called.
    pub fn stop_if_canceled(&self) -> Result<()> {
        if !self.canceled.is_canceled() {
            return Ok(());
        }
        self.unexpected_stop.store(true, Ordering::SeqCst);
        Err(JobError::Canceled {
            elapsed: self.time(),
            unit: self.cfg.time_unit.clone(),
        })
    }

    /// Latest elapsed progress found in the log; `0.0` without a log.
    pub fn time(&self) -> f64 {
        self.progress.as_ref().map_or(0.0, ProgressTracker::latest_time)
    }

    /// Refresh elapsed progress and fail with `JobComplete` once it has
    /// reached the end time.
    pub fn get_time_and_stop_if_limit_reached(&self) -> Result<f64> {
        let t = self.time();
        self.elapsed.store(t.to_bits(), Ordering::Relaxed);
        match self.end_time {
            Some(end) if t >= end => {
                info!(parent: &self.span, elapsed = t, end_time = end, "end time reached");
                Err(self.complete())
            }
            _ => Ok(t),
        }
    }

    /// Progress value recorded by the last
    /// [`get_time_and_stop_if_limit_reached`](Self::get_time_and_stop_if_limit_reached).
    pub fn elapsed(&self) -> f64 {
        f64::from_bits(self.elapsed.load(Ordering::Relaxed))
    }

    pub fn cancel(&self) {
        info!(parent: &self.span, "cancel requested");
        self.canceled.cancel();
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.canceled.clone()
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled.is_canceled()
    }

    /// All active processes are running. `false` before start and after
    /// close.
    pub fn is_running(&self) -> bool {
        !self.active.is_empty() && self.active.iter().all(ProcessHandle::is_running)
    }

    /// An active process died unplanned, or the job was canceled.
    pub fn stopped_unexpectedly(&self) -> bool {
        self.unexpected_stop.load(Ordering::SeqCst)
    }

    /// Kill every active process and its descendants, then close.
    ///
    /// Processes that are already gone or refuse the signal are logged and
    /// skipped.
    pub async fn kill(&mut self) -> Result<()> {
        for proc in &self.active {
            debug!(parent: &self.span, process = %proc, "killing");
            match proc.kill(true).await {
                Ok(()) => debug!(parent: &self.span, process = %proc, "killed"),
                Err(JobError::VanishedProcess { .. }) => {
                    debug!(parent: &self.span, process = %proc, "process already gone");
                }
                Err(JobError::PermissionDenied { process }) => {
                    warn!(parent: &self.span, process = %process, "access denied while killing");
                }
                Err(err) => return Err(err),
            }
        }
        self.close().await
    }

    /// Resume, give the job `quit_wait_min` minutes to exit on its own,
    /// kill it if it does not, then close.
    pub async fn quit(&mut self) -> Result<()> {
        info!(parent: &self.span, "quitting");
        self.resume(false).await?;
        self.wait_for_process_to_finish(
            Some(self.quit_wait_min),
            Some(QUIT_PAUSE),
            LivenessCheck::Skip,
        )
        .await?;
        self.close().await?;
        info!(parent: &self.span, "finished");
        Ok(())
    }

    /// Tear down: forget the process set, stop the suspend timer, drop the
    /// stdin pipe and delete marker files unless `keep_files` is set. Does
    /// not signal any process. Calling it again does nothing.
    pub async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        self.parent = None;
        self.main = None;
        self.children.clear();
        self.active.clear();
        self.stdin = None;

        if let Some(mut timer) = self.suspend_timer.take() {
            timer.close().await;
        }

        if let Some(child) = self.child.as_mut() {
            match child.try_wait() {
                Ok(Some(status)) => debug!(parent: &self.span, %status, "job exited"),
                Ok(None) => debug!(parent: &self.span, "job still running at close"),
                Err(e) => warn!(parent: &self.span, error = %e, "unable to query job exit status"),
            }
        }

        if !self.cfg.keep_files {
            if let Some(interface) = &self.interface {
                interface.delete_all()?;
            }
            if let Some(ok) = &self.ok_marker {
                ok.delete();
            }
        }

        debug!(parent: &self.span, "closed");
        Ok(())
    }

    /// Write one line to the job's stdin (pipe mode only).
    pub async fn write_stdin(&mut self, line: &str) -> Result<()> {
        debug!(parent: &self.span, line, "writing to stdin");
        let stdin = self.stdin.as_mut().ok_or_else(|| {
            JobError::ConfigError("stdin is not piped, unable to write".to_string())
        })?;
        stdin.write_all(format!("{line}\n").as_bytes()).await?;
        stdin.flush().await?;
        Ok(())
    }

    /// Log the status of every active process.
    pub fn log_process_status(&self) {
        let status: Vec<String> = self.active.iter().map(ProcessHandle::current_status).collect();
        debug!(parent: &self.span, status = %status.join(", "), "process status");
    }

    /// Aggregated suspend/resume denials of the active set, if any.
    pub fn log_suspend_errors(&self) -> Option<String> {
        let errors: Vec<String> = self
            .active
            .iter()
            .filter_map(ProcessHandle::suspend_errors)
            .collect();
        if errors.is_empty() {
            return None;
        }
        let text = errors.join(", ");
        warn!(parent: &self.span, "{text}");
        Some(text)
    }

    /// Wall-clock time since start.
    pub fn run_time(&self) -> Duration {
        self.started_at.map(|t| t.elapsed()).unwrap_or_default()
    }

    pub fn complete(&self) -> JobError {
        JobError::JobComplete {
            run_time: self.run_time(),
        }
    }

    pub fn complete_message(&self) -> String {
        self.complete().to_string()
    }

    pub fn name(&self) -> &str {
        &self.cfg.name
    }

    pub fn app_name(&self) -> &str {
        self.cfg.effective_app_name()
    }

    pub fn cmd(&self) -> &[String] {
        &self.cfg.cmd
    }

    pub fn log_path(&self) -> Option<&Path> {
        self.log_path.as_deref()
    }

    pub fn keep_alive(&self) -> KeepAlive {
        self.cfg.keep_alive
    }

    pub fn end_time(&self) -> Option<f64> {
        self.end_time
    }

    pub fn set_end_time(&mut self, end_time: Option<f64>) {
        self.end_time = end_time;
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn advance_step(&mut self) -> u64 {
        self.steps += 1;
        self.steps
    }

    pub fn parent(&self) -> Option<&ProcessHandle> {
        self.parent.as_ref()
    }

    pub fn main(&self) -> Option<&ProcessHandle> {
        self.main.as_ref()
    }

    pub fn children(&self) -> &[ProcessHandle] {
        &self.children
    }

    pub fn active(&self) -> &[ProcessHandle] {
        &self.active
    }

    pub fn suspend_timer_state(&self) -> Option<TimerState> {
        self.suspend_timer.as_ref().map(DeferredActionTimer::state)
    }

    pub fn step_timer(&self) -> Option<&StepTimer> {
        self.step_timer.as_ref()
    }

    pub fn interface_marker(&self) -> Option<&MarkerFile> {
        self.interface.as_ref()
    }

    pub fn ok_marker(&self) -> Option<&MarkerFile> {
        self.ok_marker.as_ref()
    }

    pub fn span(&self) -> &Span {
        &self.span
    }
}

fn suspend_handles(handles: &[ProcessHandle]) -> bool {
    let suspended: Vec<bool> = handles.iter().map(ProcessHandle::suspend).collect();
    suspended.into_iter().all(|ok| ok)
}

/// `case` with `suffix` appended to its file name.
fn case_marker(case: &Path, suffix: &str) -> PathBuf {
    let mut name = case.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}
