// src/process/system.rs

//! Live [`ProcessTable`] backed by `sysinfo` and `nix`.
//!
//! Nothing is cached between calls: every query refreshes the relevant part
//! of the process list first, so a status read always reflects the OS at
//! that moment.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};
use tracing::trace;

use super::{ProcessError, ProcessResult, ProcessSignal, ProcessStatus, ProcessTable};

#[derive(Debug, Default)]
pub struct SystemProcessTable {
    system: Mutex<System>,
}

impl SystemProcessTable {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, System> {
        // A panic while refreshing leaves nothing half-updated that we rely on.
        self.system.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn refresh_all(&self) -> MutexGuard<'_, System> {
        let mut system = self.lock();
        system.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::nothing(),
        );
        system
    }

    fn refresh_one(&self, pid: u32) -> MutexGuard<'_, System> {
        let mut system = self.lock();
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[Pid::from_u32(pid)]),
            true,
            ProcessRefreshKind::nothing(),
        );
        system
    }
}

impl ProcessTable for SystemProcessTable {
    fn find(&self, name: &str) -> Option<u32> {
        let system = self.refresh_all();
        let mut matches: Vec<u32> = system
            .processes()
            .iter()
            .filter(|(_, p)| p.thread_kind().is_none() && p.name() == name)
            .map(|(pid, _)| pid.as_u32())
            .collect();
        matches.sort_unstable();
        matches.first().copied()
    }

    fn name(&self, pid: u32) -> ProcessResult<String> {
        let system = self.refresh_one(pid);
        system
            .process(Pid::from_u32(pid))
            .map(|p| p.name().to_string_lossy().into_owned())
            .ok_or(ProcessError::NoSuchProcess(pid))
    }

    fn status(&self, pid: u32) -> ProcessStatus {
        let system = self.refresh_one(pid);
        match system.process(Pid::from_u32(pid)) {
            Some(process) => map_status(process.status()),
            None => ProcessStatus::Gone,
        }
    }

    fn start_time(&self, pid: u32) -> Option<u64> {
        let system = self.refresh_one(pid);
        system.process(Pid::from_u32(pid)).map(|p| p.start_time())
    }

    fn direct_children(&self, pid: u32) -> Vec<u32> {
        self.children(pid, false)
    }

    /// One refresh, then a walk over the parent links of that snapshot.
    fn children(&self, pid: u32, recursive: bool) -> Vec<u32> {
        let system = self.refresh_all();

        let mut by_parent: HashMap<u32, Vec<u32>> = HashMap::new();
        for (child, process) in system.processes() {
            if process.thread_kind().is_some() {
                continue;
            }
            if let Some(parent) = process.parent() {
                by_parent.entry(parent.as_u32()).or_default().push(child.as_u32());
            }
        }
        drop(system);
        for children in by_parent.values_mut() {
            children.sort_unstable();
        }

        let direct = by_parent.remove(&pid).unwrap_or_default();
        if !recursive {
            return direct;
        }

        let mut out = Vec::new();
        let mut seen = BTreeSet::from([pid]);
        let mut queue: VecDeque<u32> = direct.into_iter().collect();
        while let Some(next) = queue.pop_front() {
            if !seen.insert(next) {
                continue;
            }
            out.push(next);
            if let Some(grandchildren) = by_parent.remove(&next) {
                queue.extend(grandchildren);
            }
        }
        out
    }

    fn signal(&self, pid: u32, signal: ProcessSignal) -> ProcessResult<()> {
        trace!(pid, ?signal, "sending signal");
        send_signal(pid, signal)
    }
}

fn map_status(status: sysinfo::ProcessStatus) -> ProcessStatus {
    use sysinfo::ProcessStatus as Sys;

    match status {
        Sys::Run => ProcessStatus::Running,
        Sys::Stop | Sys::Tracing => ProcessStatus::Stopped,
        Sys::Zombie => ProcessStatus::Zombie,
        Sys::Dead => ProcessStatus::Gone,
        _ => ProcessStatus::Sleeping,
    }
}

#[cfg(unix)]
fn send_signal(pid: u32, signal: ProcessSignal) -> ProcessResult<()> {
    use nix::errno::Errno;
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid as NixPid;

    let raw = i32::try_from(pid).map_err(|_| ProcessError::NoSuchProcess(pid))?;
    let sig = match signal {
        ProcessSignal::Suspend => Signal::SIGSTOP,
        ProcessSignal::Resume => Signal::SIGCONT,
        ProcessSignal::Kill => Signal::SIGKILL,
    };

    kill(NixPid::from_raw(raw), sig).map_err(|errno| match errno {
        Errno::ESRCH => ProcessError::NoSuchProcess(pid),
        Errno::EPERM => ProcessError::AccessDenied(pid),
        other => ProcessError::Other {
            pid,
            message: other.to_string(),
        },
    })
}

#[cfg(not(unix))]
fn send_signal(pid: u32, signal: ProcessSignal) -> ProcessResult<()> {
    use sysinfo::Signal;

    let mut system = System::new();
    let sys_pid = Pid::from_u32(pid);
    system.refresh_processes_specifics(
        ProcessesToUpdate::Some(&[sys_pid]),
        true,
        ProcessRefreshKind::nothing(),
    );
    let process = system
        .process(sys_pid)
        .ok_or(ProcessError::NoSuchProcess(pid))?;
    let sig = match signal {
        ProcessSignal::Suspend => Signal::Stop,
        ProcessSignal::Resume => Signal::Continue,
        ProcessSignal::Kill => Signal::Kill,
    };

    match process.kill_with(sig) {
        Some(true) => Ok(()),
        Some(false) => Err(ProcessError::AccessDenied(pid)),
        None => Err(ProcessError::Other {
            pid,
            message: format!("{signal:?} is not supported on this platform"),
        }),
    }
}
