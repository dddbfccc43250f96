// src/process/mod.rs

//! Process inspection and control.
//!
//! Everything the supervisor knows about OS processes goes through the
//! [`ProcessTable`] trait so tests can swap the live system for an in-memory
//! tree:
//!
//! - [`system`] implements it on top of `sysinfo` (process list, names,
//!   parent links, status) and `nix` signals.
//! - [`mock`] is a scriptable in-memory table used by the test-suite.
//! - [`handle`] wraps one pid in a [`ProcessHandle`] that turns the racy
//!   table operations into the tri-state outcomes the supervisor relies on.

use std::collections::{BTreeSet, VecDeque};
use std::fmt::Debug;

use thiserror::Error;

pub use crate::types::{ProcessSignal, ProcessStatus};

pub mod handle;
pub mod mock;
pub mod system;

pub use handle::{ChildSearch, ErrorHook, ProcessHandle};
pub use mock::MockProcessTable;
pub use system::SystemProcessTable;

/// Failure of a single table operation.
///
/// `NoSuchProcess` and `AccessDenied` are the two conditions every caller
/// must be able to tell apart; anything else lands in `Other`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProcessError {
    #[error("no such process: {0}")]
    NoSuchProcess(u32),

    #[error("access denied for process {0}")]
    AccessDenied(u32),

    #[error("process {pid}: {message}")]
    Other { pid: u32, message: String },
}

pub type ProcessResult<T> = std::result::Result<T, ProcessError>;

/// Abstract process-inspection interface.
pub trait ProcessTable: Send + Sync + Debug {
    /// First live process whose name equals `name`.
    fn find(&self, name: &str) -> Option<u32>;

    fn name(&self, pid: u32) -> ProcessResult<String>;

    /// Current status; a missing process is `Gone`, never an error.
    fn status(&self, pid: u32) -> ProcessStatus;

    /// When the process holding `pid` started, `None` if there is none.
    ///
    /// Together with the pid this identifies a process: a recycled pid
    /// reports a different start time.
    fn start_time(&self, pid: u32) -> Option<u64>;

    /// Direct children of `pid`, in ascending pid order.
    fn direct_children(&self, pid: u32) -> Vec<u32>;

    fn signal(&self, pid: u32, signal: ProcessSignal) -> ProcessResult<()>;

    /// Children of `pid`, breadth-first when `recursive`.
    ///
    /// The default walks [`direct_children`](Self::direct_children); tables
    /// that can list every parent link at once should override it.
    fn children(&self, pid: u32, recursive: bool) -> Vec<u32> {
        if !recursive {
            return self.direct_children(pid);
        }

        let mut out = Vec::new();
        let mut seen = BTreeSet::from([pid]);
        let mut queue = VecDeque::from([pid]);

        while let Some(next) = queue.pop_front() {
            for child in self.direct_children(next) {
                if seen.insert(child) {
                    out.push(child);
                    queue.push_back(child);
                }
            }
        }

        out
    }
}
