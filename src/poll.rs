// src/poll.rs

//! Bounded polling.
//!
//! [`loop_until`] is the retry primitive every wait in the crate is built on:
//! child discovery, launcher detection, suspend confirmation and the
//! supervisor's `wait_for*` family. [`WaitSpec`] is the explicit description
//! of one bounded wait as the supervisor consumes it.

use std::fmt;
use std::time::Duration;

use tokio::time::sleep;

use crate::errors::Result;

/// Pause used by [`WaitSpec::new`] when nothing else is configured.
pub const DEFAULT_PAUSE: Duration = Duration::from_millis(10);

/// Evaluate `predicate` until it returns `true`.
///
/// Returns `Ok(Some(n))` where `n` is the number of failed attempts before
/// the successful one, or `Ok(None)` once more than `limit` attempts have
/// failed. With `limit = None` the loop only ends on success or error.
///
/// Between attempts the loop sleeps `pause` (skipped for `None` or a zero
/// duration) and then runs `liveness`. An `Err` from either closure aborts
/// the loop immediately and is returned as is.
pub async fn loop_until<P, L>(
    mut predicate: P,
    pause: Option<Duration>,
    limit: Option<u64>,
    mut liveness: L,
) -> Result<Option<u64>>
where
    P: FnMut() -> Result<bool>,
    L: FnMut() -> Result<()>,
{
    let pause = pause.filter(|p| !p.is_zero());
    let mut n: u64 = 0;

    loop {
        if predicate()? {
            return Ok(Some(n));
        }
        if let Some(pause) = pause {
            sleep(pause).await;
        }
        n += 1;
        if limit.is_some_and(|limit| n > limit) {
            return Ok(None);
        }
        liveness()?;
    }
}

/// Iteration bound for a wait of `minutes` at one attempt per `pause`.
///
/// `floor(minutes * 60 / pause)`; `None` (unbounded) when either side is
/// missing or the pause is zero.
pub fn limit_from_minutes(minutes: Option<f64>, pause: Option<Duration>) -> Option<u64> {
    let minutes = minutes?;
    let pause = pause.filter(|p| !p.is_zero())?;
    let limit = (minutes * 60.0 / pause.as_secs_f64()).floor();
    Some(if limit > 0.0 { limit as u64 } else { 0 })
}

/// What runs between attempts of a supervised wait.
pub enum LivenessCheck<'a> {
    /// The supervisor's own check: every active process is still running and
    /// the job has not been canceled.
    Job,
    /// Nothing; only the predicate and the bound end the wait.
    Skip,
    /// Caller-supplied check. Returning `Err` aborts the wait.
    Custom(Box<dyn FnMut() -> Result<()> + 'a>),
}

impl fmt::Debug for LivenessCheck<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LivenessCheck::Job => f.write_str("Job"),
            LivenessCheck::Skip => f.write_str("Skip"),
            LivenessCheck::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// One bounded wait, minus the predicate itself.
#[derive(Debug)]
pub struct WaitSpec<'a> {
    /// Name of the thing being waited for, used in logs and errors.
    pub label: String,
    /// Sleep between attempts; `None` retries as fast as possible.
    pub pause: Option<Duration>,
    /// Maximum number of failed attempts; `None` is unbounded.
    pub limit: Option<u64>,
    pub liveness: LivenessCheck<'a>,
    /// Turn an exhausted bound into `JobError::LoopLimitExceeded` instead of
    /// returning `false`.
    pub raise_on_exhaustion: bool,
    /// Message for the exhaustion error, replacing the generated one.
    pub error: Option<String>,
    /// Log how long the wait took.
    pub timed: bool,
}

impl<'a> WaitSpec<'a> {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            pause: Some(DEFAULT_PAUSE),
            limit: None,
            liveness: LivenessCheck::Job,
            raise_on_exhaustion: false,
            error: None,
            timed: false,
        }
    }

    pub fn pause(mut self, pause: Option<Duration>) -> Self {
        self.pause = pause;
        self
    }

    pub fn limit(mut self, limit: Option<u64>) -> Self {
        self.limit = limit;
        self
    }

    /// Bound the wait to roughly `minutes` given the current pause.
    pub fn minutes(mut self, minutes: f64) -> Self {
        self.limit = limit_from_minutes(Some(minutes), self.pause);
        self
    }

    pub fn liveness(mut self, liveness: LivenessCheck<'a>) -> Self {
        self.liveness = liveness;
        self
    }

    pub fn raise_on_exhaustion(mut self, error: Option<String>) -> Self {
        self.raise_on_exhaustion = true;
        self.error = error;
        self
    }

    /// Shorthand for a caller-supplied liveness check.
    pub fn check(self, check: impl FnMut() -> Result<()> + 'a) -> Self {
        self.liveness(LivenessCheck::Custom(Box::new(check)))
    }

    pub fn timed(mut self) -> Self {
        self.timed = true;
        self
    }
}
