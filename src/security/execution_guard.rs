//! Wall-clock execution deadline enforced by a polling watchdog task.
//!
//! Script execution inside V8 is synchronous and opaque: the calling thread
//! cannot check a clock while JavaScript is running. The guard is a
//! background task that polls the elapsed time and calls the target's
//! `terminate_execution()` once the deadline has passed.
//!
//! ## How it works
//!
//! 1. `ExecutionGuard::start()` records a monotonic start instant and spawns
//!    the polling task on the configured [`GuardExecutor`]
//! 2. Each poll: stop if cancelled or the target is no longer in use;
//!    otherwise compare elapsed time against the timeout
//! 3. On timeout: re-check that the target is still in use, terminate it,
//!    log the elapsed time and stop for good (single shot)
//! 4. On `close()` / drop: set the quitting flag and abort the task
//!
//! The quitting flag and the firing decision share one mutex, so once
//! `cancel()` has returned the guard can no longer fire.

use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::instrument::WithSubscriber;

use super::GuardExecutor;
use crate::error::Result;

/// Something a guard can watch and interrupt.
pub trait GuardTarget: Send + Sync {
    /// Whether a call is currently running against the target.
    fn is_in_use(&self) -> bool;

    /// Request the engine to unwind at its next safe point.
    fn terminate_execution(&self) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardState {
    Running,
    /// The deadline passed while the target was watched
    Expired,
    /// Cancelled, or the target stopped being in use
    Stopped,
}

/// Handle to a running execution guard.
///
/// # Example
///
/// ```rust,ignore
/// let guard = ExecutionGuard::start(target, Duration::from_secs(30), interval, &executor, None)?;
/// let result = run_script();
/// guard.close();
///
/// if guard.was_triggered() {
///     // the script was interrupted
/// }
/// ```
pub struct ExecutionGuard {
    shared: Arc<GuardShared>,
    task: Option<JoinHandle<()>>,
}

struct GuardShared {
    target: Arc<dyn GuardTarget>,
    timeout: Duration,
    check_interval: Duration,
    started_at: Instant,
    /// Guards `quitting` and `state` together with the firing decision
    control: Mutex<GuardControl>,
    triggered: AtomicBool,
}

struct GuardControl {
    quitting: bool,
    /// Set once the target has been seen in use
    armed: bool,
    state: GuardState,
    elapsed_at_fire: Option<Duration>,
}

enum Poll {
    Continue,
    Done,
}

impl ExecutionGuard {
    /// Start watching `target`.
    ///
    /// Logs go to `dispatch` when provided, otherwise to the dispatcher that
    /// is current on the calling thread.
    pub fn start(
        target: Arc<dyn GuardTarget>,
        timeout: Duration,
        check_interval: Duration,
        executor: &GuardExecutor,
        dispatch: Option<&tracing::Dispatch>,
    ) -> Result<Self> {
        Self::spawn(target, timeout, check_interval, executor, dispatch, true)
    }

    /// Like [`ExecutionGuard::start`], but an idle target does not stop the
    /// guard until it has been seen in use once. A target that stays idle
    /// past the timeout stops the guard without firing.
    pub fn start_deferred(
        target: Arc<dyn GuardTarget>,
        timeout: Duration,
        check_interval: Duration,
        executor: &GuardExecutor,
        dispatch: Option<&tracing::Dispatch>,
    ) -> Result<Self> {
        Self::spawn(target, timeout, check_interval, executor, dispatch, false)
    }

    fn spawn(
        target: Arc<dyn GuardTarget>,
        timeout: Duration,
        check_interval: Duration,
        executor: &GuardExecutor,
        dispatch: Option<&tracing::Dispatch>,
        armed: bool,
    ) -> Result<Self> {
        let shared = Arc::new(GuardShared {
            target,
            timeout,
            check_interval,
            started_at: Instant::now(),
            control: Mutex::new(GuardControl {
                quitting: false,
                armed,
                state: GuardState::Running,
                elapsed_at_fire: None,
            }),
            triggered: AtomicBool::new(false),
        });

        let dispatch = dispatch
            .cloned()
            .unwrap_or_else(|| tracing::dispatcher::get_default(|d| d.clone()));

        let task_shared = Arc::clone(&shared);
        let task = executor.spawn(
            async move {
                loop {
                    match task_shared.poll() {
                        Poll::Continue => tokio::time::sleep(task_shared.check_interval).await,
                        Poll::Done => break,
                    }
                }
            }
            .with_subscriber(dispatch),
        )?;

        tracing::trace!("Execution guard started (timeout: {:?})", timeout);

        Ok(Self {
            shared,
            task: Some(task),
        })
    }

    /// Stop polling. Does not interrupt anything.
    pub fn cancel(&self) {
        let mut control = self.shared.control.lock();
        control.quitting = true;
        if control.state == GuardState::Running {
            control.state = GuardState::Stopped;
        }
    }

    /// Cancel and abort the background task if it is still alive.
    pub fn close(&mut self) {
        self.cancel();
        if let Some(task) = self.task.take() {
            if !task.is_finished() {
                task.abort();
            }
        }
    }

    pub fn is_quitting(&self) -> bool {
        self.shared.control.lock().quitting
    }

    pub fn state(&self) -> GuardState {
        self.shared.control.lock().state
    }

    /// Whether the guard terminated its target.
    pub fn was_triggered(&self) -> bool {
        self.shared.triggered.load(Ordering::SeqCst)
    }

    /// Elapsed time observed when the deadline fired.
    pub fn elapsed_at_fire(&self) -> Option<Duration> {
        self.shared.control.lock().elapsed_at_fire
    }

    pub fn timeout(&self) -> Duration {
        self.shared.timeout
    }

    pub fn elapsed(&self) -> Duration {
        self.shared.started_at.elapsed()
    }
}

impl Drop for ExecutionGuard {
    fn drop(&mut self) {
        self.close();
    }
}

impl GuardShared {
    fn poll(&self) -> Poll {
        let mut control = self.control.lock();

        if control.quitting {
            return Poll::Done;
        }

        let elapsed = self.started_at.elapsed();

        if !self.target.is_in_use() {
            if !control.armed && elapsed < self.timeout {
                return Poll::Continue;
            }
            control.quitting = true;
            control.state = GuardState::Stopped;
            return Poll::Done;
        }
        control.armed = true;

        if elapsed < self.timeout {
            return Poll::Continue;
        }

        // Re-check right before firing: the call may have just finished
        if self.target.is_in_use() {
            match self.target.terminate_execution() {
                Ok(()) => {
                    self.triggered.store(true, Ordering::SeqCst);
                    tracing::warn!(
                        elapsed_ms = elapsed.as_millis() as u64,
                        "Execution was terminated after {}ms.",
                        elapsed.as_millis()
                    );
                }
                Err(e) => {
                    tracing::error!("Failed to terminate execution: {}", e);
                }
            }
        }

        control.quitting = true;
        control.state = GuardState::Expired;
        control.elapsed_at_fire = Some(elapsed);
        Poll::Done
    }
}
