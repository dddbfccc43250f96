// src/process/handle.rs

//! Handle to one OS process of a supervised job.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use tokio::time::sleep;
use tracing::{Span, debug, trace, warn};

use super::{ProcessError, ProcessSignal, ProcessStatus, ProcessTable};
use crate::errors::{JobError, Result};
use crate::poll::loop_until;

/// Interval between child-process searches.
pub const CHILD_SEARCH_WAIT: Duration = Duration::from_millis(500);
/// Number of child-process searches before giving up.
pub const CHILD_SEARCH_LIMIT: u64 = 500;

const KILL_WAIT_PAUSE: Duration = Duration::from_millis(10);

/// Builds the error reported when a process that had to be running is gone.
pub type ErrorHook = Arc<dyn Fn(&ProcessHandle) -> JobError + Send + Sync>;

/// Result of [`ProcessHandle::get_children`].
#[derive(Debug, Default)]
pub struct ChildSearch {
    /// Every descendant seen when a name match occurred, breadth-first.
    pub children: Vec<ProcessHandle>,
    /// Time spent searching; `None` when no search ran or nothing matched.
    pub elapsed: Option<Duration>,
}

/// One OS process.
///
/// The pid, display name and start time are fixed at construction. Status
/// is read from the [`ProcessTable`] on every query, and the first time the
/// process is found gone (or its pid held by a process with another start
/// time) the handle latches to `Gone` for good. Clones share the latch and
/// the permission-denied counter.
#[derive(Clone)]
pub struct ProcessHandle {
    pid: u32,
    started: Option<u64>,
    gone: Arc<AtomicBool>,
    name: String,
    app_name: String,
    table: Arc<dyn ProcessTable>,
    on_vanish: ErrorHook,
    denied: Arc<AtomicU32>,
    span: Span,
}

impl fmt::Display for ProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}' ({})", self.name, self.pid)
    }
}

impl fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("pid", &self.pid)
            .field("name", &self.name)
            .field("app_name", &self.app_name)
            .field("denied", &self.denied.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl ProcessHandle {
    /// First live process called exactly `name`.
    pub fn find(table: &dyn ProcessTable, name: &str) -> Option<u32> {
        table.find(name)
    }

    /// Wrap an existing process.
    ///
    /// `app_name` is the job name used in error messages and, lower-cased, as
    /// the name prefix when searching for worker children.
    pub fn from_pid(
        table: Arc<dyn ProcessTable>,
        pid: u32,
        app_name: &str,
        span: Span,
    ) -> Result<Self> {
        let name = table.name(pid).map_err(|_| JobError::VanishedProcess {
            process: pid.to_string(),
            context: "before it could be attached".to_string(),
        })?;

        let started = table.start_time(pid);
        debug!(parent: &span, pid, name = %name, ?started, "attached process");

        Ok(Self {
            pid,
            started,
            gone: Arc::new(AtomicBool::new(false)),
            name,
            app_name: app_name.to_string(),
            table,
            on_vanish: Arc::new(default_vanish_error),
            denied: Arc::new(AtomicU32::new(0)),
            span,
        })
    }

    /// Replace the error produced when this process is unexpectedly gone.
    pub fn with_error_hook(mut self, hook: ErrorHook) -> Self {
        self.on_vanish = hook;
        self
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    pub fn status(&self) -> ProcessStatus {
        if self.gone.load(Ordering::Acquire) {
            return ProcessStatus::Gone;
        }
        let status = self.table.status(self.pid);
        if status == ProcessStatus::Gone || !self.holds_pid() {
            trace!(parent: &self.span, pid = self.pid, "process gone");
            self.gone.store(true, Ordering::Release);
            return ProcessStatus::Gone;
        }
        status
    }

    /// The pid still belongs to the process this handle attached to.
    fn holds_pid(&self) -> bool {
        self.started.is_none() || self.table.start_time(self.pid) == self.started
    }

    pub fn is_running(&self) -> bool {
        self.status().is_alive()
    }

    pub fn is_not_running(&self) -> bool {
        !self.is_running()
    }

    /// `Ok` while running; the error hook's error once the process is gone,
    /// `NotRunning` for a zombie.
    pub fn assert_running(&self) -> Result<()> {
        match self.status() {
            s if s.is_alive() => Ok(()),
            ProcessStatus::Gone => Err((self.on_vanish)(self)),
            other => Err(JobError::NotRunning {
                job: self.app_name.clone(),
                process: self.name.clone(),
                status: other.to_string(),
            }),
        }
    }

    /// Whether a suspension has taken effect.
    ///
    /// Fails with `VanishedProcess` if the process exited or became a zombie,
    /// since it can then never reach the sleeping state.
    pub fn is_sleeping(&self) -> Result<bool> {
        match self.status() {
            ProcessStatus::Sleeping | ProcessStatus::Stopped => Ok(true),
            ProcessStatus::Running => Ok(false),
            ProcessStatus::Zombie | ProcessStatus::Gone => Err(JobError::VanishedProcess {
                process: self.to_string(),
                context: "while trying to sleep".to_string(),
            }),
        }
    }

    /// Stop the process. `false` if it is gone or the OS refused.
    pub fn suspend(&self) -> bool {
        self.send(ProcessSignal::Suspend)
    }

    /// Continue a stopped process. `false` if it is gone or the OS refused.
    pub fn resume(&self) -> bool {
        self.send(ProcessSignal::Resume)
    }

    fn send(&self, signal: ProcessSignal) -> bool {
        if self.status() == ProcessStatus::Gone {
            return false;
        }
        match self.table.signal(self.pid, signal) {
            Ok(()) => true,
            Err(ProcessError::AccessDenied(_)) => {
                let n = self.denied.fetch_add(1, Ordering::Relaxed) + 1;
                debug!(parent: &self.span, pid = self.pid, ?signal, denied = n, "signal denied");
                false
            }
            Err(ProcessError::NoSuchProcess(_)) => false,
            Err(err) => {
                warn!(parent: &self.span, pid = self.pid, ?signal, error = %err, "signal failed");
                false
            }
        }
    }

    /// How many suspend/resume signals were refused by the OS.
    pub fn denied_count(&self) -> u32 {
        self.denied.load(Ordering::Relaxed)
    }

    /// Diagnostic for refused signals, if there were any.
    pub fn suspend_errors(&self) -> Option<String> {
        match self.denied_count() {
            0 => None,
            n => Some(format!("{} failed to suspend/resume {n} times", self.name)),
        }
    }

    /// `"<name> <status>"`, or `"<name> is missing"` once gone.
    pub fn current_status(&self) -> String {
        match self.status() {
            ProcessStatus::Gone => format!("{} is missing", self.name),
            status => format!("{} {status}", self.name),
        }
    }

    /// Kill the process, and with `recursive` its whole tree.
    ///
    /// The recursive kill repeats enumerate, kill, wait-for-exit until an
    /// enumeration finds nothing new alive: killing a process can reveal
    /// further descendants before it exits, so one pass is not enough.
    /// Members are tracked by pid and start time. Descendants are looked up
    /// only from members that still hold their pid (alive or not yet reaped),
    /// and a member counts as exited once it stops running or its pid passes
    /// to another process. A recycled pid is never signalled.
    ///
    /// Non-recursive kills report a missing process as `VanishedProcess`;
    /// recursive kills treat it as already done. `PermissionDenied` is
    /// returned after the rest of the tree has been dealt with.
    pub async fn kill(&self, recursive: bool) -> Result<()> {
        if !recursive {
            if self.status() == ProcessStatus::Gone {
                return Err(JobError::VanishedProcess {
                    process: self.to_string(),
                    context: "before it could be killed".to_string(),
                });
            }
            return self.table.signal(self.pid, ProcessSignal::Kill).map_err(|err| {
                map_signal_error(err, self.to_string(), "before it could be killed")
            });
        }

        if self.status() == ProcessStatus::Gone {
            debug!(parent: &self.span, pid = self.pid, "process already gone; nothing to kill");
            return Ok(());
        }

        let root = Member {
            pid: self.pid,
            started: self.started,
        };
        let mut killed: BTreeSet<Member> = BTreeSet::new();
        let mut denied: BTreeSet<Member> = BTreeSet::new();
        let mut round = 0u32;

        loop {
            let members: Vec<Member> = self
                .enumerate_tree(root, &killed)
                .into_iter()
                .filter(|m| !killed.contains(m) && !denied.contains(m))
                .collect();
            if members.is_empty() {
                break;
            }
            round += 1;
            trace!(parent: &self.span, pid = self.pid, round, ?members, "killing process tree");

            let mut waiting = Vec::with_capacity(members.len());
            for member in members {
                // Last check before the signal; the pid may have been recycled
                // since the enumeration.
                if !self.is_alive(member) {
                    killed.insert(member);
                    continue;
                }
                match self.table.signal(member.pid, ProcessSignal::Kill) {
                    Ok(()) | Err(ProcessError::NoSuchProcess(_)) => {
                        killed.insert(member);
                        waiting.push(member);
                    }
                    Err(ProcessError::AccessDenied(_)) => {
                        warn!(parent: &self.span, pid = member.pid, "access denied while killing");
                        denied.insert(member);
                    }
                    Err(err) => {
                        warn!(parent: &self.span, pid = member.pid, error = %err, "kill failed");
                        denied.insert(member);
                    }
                }
            }

            while waiting.iter().any(|&m| self.is_alive(m)) {
                sleep(KILL_WAIT_PAUSE).await;
            }
        }

        debug!(parent: &self.span, pid = self.pid, rounds = round, "process tree killed");

        match denied.first() {
            Some(member) => Err(JobError::PermissionDenied {
                process: format!("{} in tree of {self}", member.pid),
            }),
            None => Ok(()),
        }
    }

    /// Alive members of the tree: the root and the descendants of the root
    /// and of every killed member that still holds its pid.
    fn enumerate_tree(&self, root: Member, killed: &BTreeSet<Member>) -> Vec<Member> {
        let mut members = Vec::new();
        let mut included = BTreeSet::new();

        for parent in std::iter::once(root).chain(killed.iter().copied()) {
            if !self.holds(parent) {
                continue;
            }
            if self.is_alive(parent) && included.insert(parent.pid) {
                members.push(parent);
            }
            for pid in self.table.children(parent.pid, true) {
                let member = Member {
                    pid,
                    started: self.table.start_time(pid),
                };
                if self.is_alive(member) && included.insert(pid) {
                    members.push(member);
                }
            }
        }

        members
    }

    /// `member` is still in the table under the same start time.
    fn holds(&self, member: Member) -> bool {
        match self.table.start_time(member.pid) {
            Some(started) => member.started.is_none_or(|s| s == started),
            None => false,
        }
    }

    fn is_alive(&self, member: Member) -> bool {
        self.table.status(member.pid).is_alive() && self.holds(member)
    }

    /// Look for worker descendants whose name starts with the job name.
    ///
    /// Polls every `wait`, at most `limit` times. Each attempt first checks
    /// that this process still runs, then lists all descendants and stops
    /// as soon as one name starts with the lower-cased `app_name`. On a
    /// match every descendant is returned as a handle sharing this handle's
    /// job name, error hook and span.
    ///
    /// Nothing is searched if this process's own name already matches. When
    /// the search fails (process gone or limit exhausted) the result is
    /// empty, or an error if `raise_on_failure` is set.
    pub async fn get_children(
        &self,
        wait: Duration,
        limit: u64,
        raise_on_failure: bool,
    ) -> Result<ChildSearch> {
        let prefix = self.app_name.to_lowercase();

        let own = self.table.name(self.pid).unwrap_or_else(|_| self.name.clone());
        if own.to_lowercase().starts_with(&prefix) {
            debug!(parent: &self.span, pid = self.pid, "process is the worker itself; no child search");
            return Ok(ChildSearch::default());
        }

        let mut found: Vec<u32> = Vec::new();
        let mut vanished = false;

        let attempts = loop_until(
            || {
                if self.is_not_running() {
                    if raise_on_failure {
                        return Err(JobError::VanishedProcess {
                            process: self.to_string(),
                            context: "while searching for child-processes".to_string(),
                        });
                    }
                    vanished = true;
                    return Ok(true);
                }

                let children = self.table.children(self.pid, true);
                trace!(parent: &self.span, pid = self.pid, ?children, prefix = %prefix, "searching for child-process");

                let matched = children.iter().any(|&c| {
                    self.table
                        .name(c)
                        .map(|n| n.to_lowercase().starts_with(&prefix))
                        .unwrap_or(false)
                });
                if matched {
                    found = children;
                }
                Ok(matched)
            },
            Some(wait),
            Some(limit.saturating_sub(1)),
            || Ok(()),
        )
        .await?;

        if vanished {
            debug!(parent: &self.span, pid = self.pid, "parent gone during child search");
            return Ok(ChildSearch::default());
        }

        let Some(n) = attempts else {
            let seconds = wait.as_secs_f64() * limit as f64;
            if raise_on_failure {
                return Err(JobError::ChildSearchFailed {
                    parent: self.to_string(),
                    seconds,
                });
            }
            debug!(parent: &self.span, pid = self.pid, seconds, "no matching child-process found");
            return Ok(ChildSearch::default());
        };

        let elapsed = wait.saturating_mul(u32::try_from(n).unwrap_or(u32::MAX));
        let children = found
            .into_iter()
            .filter_map(|pid| self.adopt(pid))
            .collect();

        Ok(ChildSearch {
            children,
            elapsed: Some(elapsed),
        })
    }

    /// Handle for a descendant, inheriting job name, error hook and span.
    /// `None` if it already exited.
    fn adopt(&self, pid: u32) -> Option<ProcessHandle> {
        ProcessHandle::from_pid(Arc::clone(&self.table), pid, &self.app_name, self.span.clone())
            .ok()
            .map(|child| child.with_error_hook(Arc::clone(&self.on_vanish)))
    }
}

/// A process as seen by a recursive kill: pid plus start time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Member {
    pid: u32,
    started: Option<u64>,
}

fn default_vanish_error(handle: &ProcessHandle) -> JobError {
    JobError::UnexpectedTermination {
        job: handle.app_name.clone(),
        elapsed: None,
        log: None,
    }
}

fn map_signal_error(err: ProcessError, process: String, context: &str) -> JobError {
    match err {
        ProcessError::NoSuchProcess(_) => JobError::VanishedProcess {
            process,
            context: context.to_string(),
        },
        ProcessError::AccessDenied(_) => JobError::PermissionDenied { process },
        other => JobError::Other(anyhow::anyhow!(other)),
    }
}
