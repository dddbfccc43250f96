// src/timer/deferred.rs

//! Single-shot deferred action.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval};
use tracing::{debug, trace, warn};

pub type TimerAction = Arc<dyn Fn() + Send + Sync>;

/// Where the current deferral window stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerState {
    /// Never started.
    Idle,
    /// Window open; the action will run once the threshold is reached.
    Armed,
    /// The action ran for this window.
    Fired,
    /// The window was closed by `cancel_if_alive` before the action ran.
    Canceled,
}

#[derive(Debug)]
struct Window {
    state: TimerState,
    started: Option<Instant>,
    resolved_at: Option<Duration>,
}

impl Window {
    fn elapsed(&self) -> Duration {
        self.started.map(|s| s.elapsed()).unwrap_or_default()
    }
}

struct Shared {
    threshold: Duration,
    window: Mutex<Window>,
    action: TimerAction,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Window> {
        self.window.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Resolve the window as fired if it is armed and due, then run the
    /// action outside the lock. Tick and cancel both resolve under the same
    /// lock, so only one of them can win a window.
    fn tick(&self) {
        let fire = {
            let mut window = self.lock();
            let elapsed = window.elapsed();
            if window.state == TimerState::Armed && elapsed >= self.threshold {
                window.state = TimerState::Fired;
                window.resolved_at = Some(elapsed);
                true
            } else {
                false
            }
        };

        if fire {
            debug!(threshold = ?self.threshold, "deferred action firing");
            (self.action)();
        }
    }
}

/// Runs an action once a threshold has elapsed since `start()`, unless
/// `cancel_if_alive()` gets there first.
///
/// The ticking happens on a Tokio task spawned by the first `start()` and
/// kept for the timer's lifetime; each `start()` opens a fresh window.
/// `close()` stops and joins the task. Dropping an unclosed timer aborts it.
pub struct DeferredActionTimer {
    shared: Arc<Shared>,
    precision: Duration,
    shutdown: Option<watch::Sender<bool>>,
    task: Option<JoinHandle<()>>,
}

impl fmt::Debug for DeferredActionTimer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredActionTimer")
            .field("threshold", &self.shared.threshold)
            .field("precision", &self.precision)
            .field("state", &self.state())
            .field("running", &self.task.is_some())
            .finish()
    }
}

impl DeferredActionTimer {
    pub fn new(threshold: Duration, precision: Duration, action: TimerAction) -> Self {
        Self {
            shared: Arc::new(Shared {
                threshold,
                window: Mutex::new(Window {
                    state: TimerState::Idle,
                    started: None,
                    resolved_at: None,
                }),
                action,
            }),
            precision,
            shutdown: None,
            task: None,
        }
    }

    pub fn threshold(&self) -> Duration {
        self.shared.threshold
    }

    pub fn state(&self) -> TimerState {
        self.shared.lock().state
    }

    /// Open a new window. Must be called inside a Tokio runtime.
    pub fn start(&mut self) {
        {
            let mut window = self.shared.lock();
            window.state = TimerState::Armed;
            window.started = Some(Instant::now());
            window.resolved_at = None;
        }

        if self.task.is_none() {
            let (tx, rx) = watch::channel(false);
            let shared = Arc::clone(&self.shared);
            let precision = self.precision;
            self.task = Some(tokio::spawn(run_ticker(shared, precision, rx)));
            self.shutdown = Some(tx);
            trace!(precision = ?precision, "timer task started");
        }
    }

    /// Suppress the pending action of the current window.
    ///
    /// Returns `true` if the window was armed; it is then resolved as
    /// canceled at the current elapsed time. Returns `false` (and changes
    /// nothing) once the window has fired or was already canceled, and for
    /// a timer that was never started.
    pub fn cancel_if_alive(&self) -> bool {
        let mut window = self.shared.lock();
        if window.state != TimerState::Armed {
            return false;
        }
        let elapsed = window.elapsed();
        window.state = TimerState::Canceled;
        window.resolved_at = Some(elapsed);
        true
    }

    /// The current window has not been resolved yet.
    pub fn is_alive(&self) -> bool {
        matches!(self.state(), TimerState::Idle | TimerState::Armed)
    }

    /// Offset into the window at which it fired or was canceled.
    pub fn endtime(&self) -> Option<Duration> {
        self.shared.lock().resolved_at
    }

    /// Time since the window opened.
    pub fn time(&self) -> Duration {
        self.shared.lock().elapsed()
    }

    /// Seconds left until the threshold; negative once past it.
    pub fn uptime(&self) -> f64 {
        self.shared.threshold.as_secs_f64() - self.time().as_secs_f64()
    }

    /// Stop the background task and wait for it. Safe to call repeatedly and
    /// on a timer that never started.
    pub async fn close(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(true);
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "timer task ended abnormally");
            }
        }
    }
}

impl Drop for DeferredActionTimer {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn run_ticker(shared: Arc<Shared>, precision: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = interval(precision.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => shared.tick(),
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    trace!("timer task stopped");
}
