// src/job/mod.rs

//! One supervised job.
//!
//! - [`supervisor`] drives the job's lifecycle over its active process set.
//! - [`launch`] spawns the executable and finds a parallel launcher.
//! - [`progress`] reads elapsed progress from the tail of the job log.
//! - [`markers`] manages the small files used to synchronise with the job.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

pub mod launch;
pub mod markers;
pub mod progress;
pub mod supervisor;

pub use markers::MarkerFile;
pub use progress::ProgressTracker;
pub use supervisor::JobSupervisor;

/// Cooperative cancellation flag shared with the supervisor.
///
/// Setting it does not interrupt anything by itself; the supervisor's
/// liveness check observes it between wait attempts.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_canceled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
