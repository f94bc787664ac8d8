//! The cross-thread control surface for a running loop.
//!
//! # Why
//! The scheduling core never names this type, only the capabilities
//! "(any thread)" next to `resume` and the sticky `fatal_error` slot next
//! to `abort`. Giving it a concrete, cloneable type is what lets
//! `on_complete`, `on_failure`, the periodic-timer thread, and ordinary
//! application code all share one wake signal without reaching into the
//! run loop's internals.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::coordinator::CoordinatorRequestSink;
use crate::error::RunLoopError;

struct Inner {
    wake_mutex: Mutex<()>,
    wake_cv: Condvar,
    /// Set once the coordinator-originated shutdown path (a task calling
    /// `Coordinator::request_shutdown()`) has been absorbed by `resume`.
    /// Gates the full-drain exit in `RunLoop::tick_loop`.
    draining_requested: std::sync::atomic::AtomicBool,
    /// Set only by the explicit [`RunLoopHandle::shutdown`] call. Gates an
    /// immediate, single-tick-bounded exit that does not wait for queued
    /// work or in-flight callbacks to drain.
    stop_requested: std::sync::atomic::AtomicBool,
    fatal_error: Mutex<Option<RunLoopError>>,
    requests: Arc<CoordinatorRequestSink>,
}

/// A `Clone + Send + Sync` handle to a running loop. Cloning is cheap (an
/// `Arc` bump); every clone controls the same underlying loop.
#[derive(Clone)]
pub struct RunLoopHandle {
    inner: Arc<Inner>,
}

impl RunLoopHandle {
    pub(crate) fn new(requests: Arc<CoordinatorRequestSink>) -> Self {
        Self {
            inner: Arc::new(Inner {
                wake_mutex: Mutex::new(()),
                wake_cv: Condvar::new(),
                draining_requested: std::sync::atomic::AtomicBool::new(false),
                stop_requested: std::sync::atomic::AtomicBool::new(false),
                fatal_error: Mutex::new(None),
                requests,
            }),
        }
    }

    /// Wakes the loop thread so it re-evaluates readiness. Safe to call
    /// from any thread, any number of times; a redundant wakeup just
    /// causes one extra no-op tick.
    pub fn resume(&self) {
        let _guard = self.inner.wake_mutex.lock();
        if self.inner.requests.shutdown_requested() && !self.inner.requests.has_pending_commits() {
            self.inner
                .draining_requested
                .store(true, std::sync::atomic::Ordering::Release);
        }
        self.inner.wake_cv.notify_all();
    }

    /// Requests an immediate, single-tick-bounded stop: the loop finishes
    /// whatever it is already doing on its current tick and exits on its
    /// next iteration, without waiting for queued messages or in-flight
    /// callbacks to drain. Distinct from the coordinator-originated
    /// shutdown path (`Coordinator::request_shutdown`), which drains
    /// fully before exiting — this is the operator-initiated "stop now"
    /// path and never waits on task-controlled state that might never
    /// resolve (a queued message with no capacity to run, a callback with
    /// no `callback_timeout` that never completes).
    pub fn shutdown(&self) {
        self.inner
            .stop_requested
            .store(true, std::sync::atomic::Ordering::Release);
        self.resume();
    }

    /// Sets the sticky fatal error, first writer wins, then wakes the
    /// loop so it notices on its next readiness check.
    pub(crate) fn abort(&self, error: RunLoopError) {
        {
            let mut slot = self.inner.fatal_error.lock();
            if slot.is_none() {
                tracing::error!(error = %error, "run loop aborting");
                *slot = Some(error);
            }
        }
        self.resume();
    }

    /// Whether a coordinator-originated shutdown has been absorbed and
    /// the loop should stop pulling new envelopes and drain to idle.
    pub(crate) fn is_draining(&self) -> bool {
        self.inner
            .draining_requested
            .load(std::sync::atomic::Ordering::Acquire)
    }

    /// Whether the explicit [`Self::shutdown`] path has been invoked and
    /// the loop should exit after its current tick, regardless of
    /// whether any task still has queued or in-flight work.
    pub(crate) fn is_stop_requested(&self) -> bool {
        self.inner
            .stop_requested
            .load(std::sync::atomic::Ordering::Acquire)
    }

    pub(crate) fn take_fatal_error(&self) -> Option<RunLoopError> {
        self.inner.fatal_error.lock().clone()
    }

    /// Re-checks `ready` under the wake mutex and, if it's false, blocks
    /// until either `resume`/`abort`/`shutdown` notifies or `timeout`
    /// elapses (`None` blocks indefinitely). Checking and waiting under
    /// the same lock is what prevents a wakeup landing between the check
    /// and the wait from being lost.
    pub(crate) fn wait_while_idle(&self, ready: impl Fn() -> bool, timeout: Option<Duration>) {
        let mut guard = self.inner.wake_mutex.lock();
        if ready() {
            return;
        }
        match timeout {
            Some(d) => {
                self.inner.wake_cv.wait_for(&mut guard, d);
            }
            None => {
                self.inner.wake_cv.wait(&mut guard);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle() -> RunLoopHandle {
        RunLoopHandle::new(Arc::new(CoordinatorRequestSink::new()))
    }

    #[test]
    fn explicit_shutdown_is_immediate() {
        let handle = handle();
        assert!(!handle.is_stop_requested());
        assert!(!handle.is_draining());
        handle.shutdown();
        assert!(handle.is_stop_requested());
        // Explicit shutdown never flips the coordinator-draining flag —
        // that path is reserved for `Coordinator::request_shutdown`.
        assert!(!handle.is_draining());
    }

    #[test]
    fn first_abort_wins() {
        let handle = handle();
        handle.abort(RunLoopError::Consumer("first".into()));
        handle.abort(RunLoopError::Consumer("second".into()));
        match handle.take_fatal_error().unwrap() {
            RunLoopError::Consumer(message) => assert_eq!(message, "first"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn wait_while_idle_returns_immediately_when_already_ready() {
        let handle = handle();
        // Must not block: a blocking call here would hang the test suite.
        handle.wait_while_idle(|| true, None);
    }
}
