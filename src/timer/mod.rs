// src/timer/mod.rs

//! Timers used by the supervisor.
//!
//! - [`deferred`] holds the single-shot [`DeferredActionTimer`] behind the
//!   delayed-suspend policy.
//! - [`step`] writes per-step execution times to a small text file.

pub mod deferred;
pub mod step;

pub use deferred::{DeferredActionTimer, TimerAction, TimerState};
pub use step::StepTimer;

/// Tick precision of the delayed-suspend timer.
pub const SUSPEND_TIMER_PRECISION: std::time::Duration = std::time::Duration::from_millis(100);
