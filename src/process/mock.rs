// src/process/mock.rs

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use super::{ProcessError, ProcessResult, ProcessSignal, ProcessStatus, ProcessTable};

#[derive(Debug, Clone)]
pub struct MockProcess {
    pub name: String,
    pub parent: Option<u32>,
    pub status: ProcessStatus,
    /// Start tick; a recycled pid gets a new one.
    pub started: u64,
}

#[derive(Debug, Clone)]
struct Delayed {
    pid: u32,
    name: String,
    parent: u32,
    remaining_polls: u32,
}

#[derive(Debug, Default)]
struct Inner {
    procs: BTreeMap<u32, MockProcess>,
    denied: BTreeSet<u32>,
    spawn_on_kill: HashMap<u32, Vec<(u32, String)>>,
    recycle_on_kill: HashMap<u32, String>,
    delayed: Vec<Delayed>,
    signals: Vec<(u32, ProcessSignal)>,
    next_pid: u32,
    clock: u64,
}

impl Inner {
    fn start(&mut self, pid: u32, name: String, parent: Option<u32>) {
        self.clock += 1;
        self.procs.insert(
            pid,
            MockProcess {
                name,
                parent,
                status: ProcessStatus::Running,
                started: self.clock,
            },
        );
    }

    fn allocate(&mut self) -> u32 {
        let pid = self.next_pid;
        self.next_pid += 1;
        pid
    }
}

/// In-memory process table.
///
/// A killed process stays in the table as a zombie, keeping its start time
/// and children, until [`exit`](Self::exit) reaps it. `spawn_on_kill` rules
/// add children under the dying process. Clones share the same table.
#[derive(Debug, Clone)]
pub struct MockProcessTable {
    inner: Arc<Mutex<Inner>>,
}

impl Default for MockProcessTable {
    fn default() -> Self {
        Self::new()
    }
}

impl MockProcessTable {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                next_pid: 1000,
                ..Inner::default()
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Add a running process and return its pid.
    pub fn spawn(&self, name: &str, parent: Option<u32>) -> u32 {
        let mut inner = self.lock();
        let pid = inner.allocate();
        inner.start(pid, name.to_string(), parent);
        pid
    }

    /// Hand `pid` to a new, unrelated process, replacing whatever had it.
    pub fn reuse(&self, pid: u32, name: &str, parent: Option<u32>) {
        self.lock().start(pid, name.to_string(), parent);
    }

    /// Add a child of `parent` that only shows up after `polls` calls to
    /// `children()` on that parent.
    pub fn spawn_after(&self, name: &str, parent: u32, polls: u32) -> u32 {
        let mut inner = self.lock();
        let pid = inner.allocate();
        inner.delayed.push(Delayed {
            pid,
            name: name.to_string(),
            parent,
            remaining_polls: polls,
        });
        pid
    }

    /// When `pid` is killed, a new running child named `name` appears under it.
    pub fn spawn_on_kill(&self, pid: u32, name: &str) -> u32 {
        let mut inner = self.lock();
        let child = inner.allocate();
        inner
            .spawn_on_kill
            .entry(pid)
            .or_default()
            .push((child, name.to_string()));
        child
    }

    /// When `pid` is killed it is reaped at once and the pid goes to a new
    /// process named `name`.
    pub fn recycle_on_kill(&self, pid: u32, name: &str) {
        self.lock().recycle_on_kill.insert(pid, name.to_string());
    }

    pub fn set_status(&self, pid: u32, status: ProcessStatus) {
        let mut inner = self.lock();
        if status == ProcessStatus::Gone {
            inner.procs.remove(&pid);
        } else if let Some(p) = inner.procs.get_mut(&pid) {
            p.status = status;
        }
    }

    /// The process exits on its own, or a zombie is reaped.
    pub fn exit(&self, pid: u32) {
        self.set_status(pid, ProcessStatus::Gone);
    }

    /// Every signal to `pid` fails with `AccessDenied`.
    pub fn deny(&self, pid: u32) {
        self.lock().denied.insert(pid);
    }

    pub fn is_alive(&self, pid: u32) -> bool {
        self.status(pid).is_alive()
    }

    /// Successfully delivered signals, in order.
    pub fn signals(&self) -> Vec<(u32, ProcessSignal)> {
        self.lock().signals.clone()
    }

    pub fn alive_pids(&self) -> Vec<u32> {
        self.lock()
            .procs
            .iter()
            .filter(|(_, p)| p.status.is_alive())
            .map(|(pid, _)| *pid)
            .collect()
    }
}

impl ProcessTable for MockProcessTable {
    fn find(&self, name: &str) -> Option<u32> {
        self.lock()
            .procs
            .iter()
            .find(|(_, p)| p.status.is_alive() && p.name == name)
            .map(|(pid, _)| *pid)
    }

    fn name(&self, pid: u32) -> ProcessResult<String> {
        self.lock()
            .procs
            .get(&pid)
            .map(|p| p.name.clone())
            .ok_or(ProcessError::NoSuchProcess(pid))
    }

    fn start_time(&self, pid: u32) -> Option<u64> {
        self.lock().procs.get(&pid).map(|p| p.started)
    }

    fn status(&self, pid: u32) -> ProcessStatus {
        self.lock()
            .procs
            .get(&pid)
            .map(|p| p.status)
            .unwrap_or(ProcessStatus::Gone)
    }

    fn direct_children(&self, pid: u32) -> Vec<u32> {
        let mut inner = self.lock();

        let mut ready = Vec::new();
        for d in inner.delayed.iter_mut().filter(|d| d.parent == pid) {
            if d.remaining_polls == 0 {
                ready.push(d.pid);
            } else {
                d.remaining_polls -= 1;
            }
        }
        for pid_ready in ready {
            if let Some(pos) = inner.delayed.iter().position(|d| d.pid == pid_ready) {
                let d = inner.delayed.remove(pos);
                inner.start(d.pid, d.name, Some(d.parent));
            }
        }

        inner
            .procs
            .iter()
            .filter(|(_, p)| p.parent == Some(pid))
            .map(|(child, _)| *child)
            .collect()
    }

    fn signal(&self, pid: u32, signal: ProcessSignal) -> ProcessResult<()> {
        let mut inner = self.lock();

        let status = match inner.procs.get(&pid) {
            Some(p) => p.status,
            None => return Err(ProcessError::NoSuchProcess(pid)),
        };
        if inner.denied.contains(&pid) {
            return Err(ProcessError::AccessDenied(pid));
        }
        inner.signals.push((pid, signal));

        if status == ProcessStatus::Zombie {
            return Ok(());
        }

        match signal {
            ProcessSignal::Suspend => {
                if let Some(p) = inner.procs.get_mut(&pid) {
                    p.status = ProcessStatus::Stopped;
                }
            }
            ProcessSignal::Resume => {
                if let Some(p) = inner.procs.get_mut(&pid) {
                    if p.status == ProcessStatus::Stopped {
                        p.status = ProcessStatus::Running;
                    }
                }
            }
            ProcessSignal::Kill => {
                if let Some(name) = inner.recycle_on_kill.remove(&pid) {
                    inner.start(pid, name, None);
                    return Ok(());
                }
                if let Some(p) = inner.procs.get_mut(&pid) {
                    p.status = ProcessStatus::Zombie;
                }
                if let Some(spawned) = inner.spawn_on_kill.remove(&pid) {
                    for (child, name) in spawned {
                        inner.start(child, name, Some(pid));
                    }
                }
            }
        }

        Ok(())
    }
}
