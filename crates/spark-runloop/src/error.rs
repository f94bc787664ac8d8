//! Crate-level error type.
//!
//! # Why
//! The run loop's abort policy is "first writer wins, every later reader
//! sees *some* error" (see [`crate::handle::RunLoopHandle::abort`]). That
//! means the error has to be stored once and handed out repeatedly, so it
//! must be `Clone` without forcing every caller to box and re-box a cause.
//! [`SharedFailure`] buys that by wrapping the boxed cause in an `Arc`
//! once, at the boundary where a user task's error crosses into run-loop
//! state — the same boxed-cause-at-the-boundary shape
//! `spark-core::governance::timeout::profile::Timeout::try_new` uses for
//! validation errors, adapted here for an error that must survive beyond
//! a single `Result`.
//!
//! No `unwrap`/`expect`/`panic!` appears in any path reachable from
//! consumer, task, or offset-manager input. The sole panic in this crate
//! is the documented "handle used after being consumed" misuse case in
//! [`crate::callback::Callback`], mirroring
//! `spark-core::runtime::task::JoinHandle`'s own convention for the same
//! programmer error.

use std::fmt;
use std::sync::Arc;

/// The error type a user task returns from a failed `process`, `window`,
/// or `commit` call. Boxed so task authors can use `?` with any error
/// type that implements [`std::error::Error`].
pub type TaskFailure = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A [`TaskFailure`] that has been admitted into run-loop state and must
/// now be cheap to clone and hand to multiple readers.
#[derive(Clone)]
pub struct SharedFailure(Arc<dyn std::error::Error + Send + Sync + 'static>);

impl From<TaskFailure> for SharedFailure {
    fn from(cause: TaskFailure) -> Self {
        Self(Arc::from(cause))
    }
}

impl fmt::Display for SharedFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl fmt::Debug for SharedFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

/// Every way the run loop can come to a stop before a clean shutdown.
///
/// Every variant is terminal: the loop thread tears down and exits with
/// this value wrapped in [`crate::report::RunLoopReport::Fatal`]. None of
/// these are recoverable mid-run — the sticky `fatal_error` slot exists
/// precisely because retrying is not an option once one is set.
#[derive(Clone, Debug, thiserror::Error)]
pub enum RunLoopError {
    /// `choose_envelope` returned an envelope for a partition with no
    /// registered task. A static assignment mismatch, never expected to
    /// occur with a correctly built [`crate::run_loop::RunLoopBuilder`].
    #[error("partition {partition:?} has no task assignment")]
    UnmappedPartition { partition: Arc<str> },

    /// A user task's `process`, `window`, or `commit` returned an error,
    /// or a callback completed with `Callback::fail`.
    #[error("task '{task}' failed: {cause}")]
    UserTaskFailed { task: String, cause: SharedFailure },

    /// A dispatched callback was never completed within the configured
    /// `callback_timeout`.
    #[error("task '{task}' callback (sequence {sequence}) timed out")]
    CallbackTimeout { task: String, sequence: u64 },

    /// The multiplexed consumer's `choose` call failed.
    #[error("consumer error: {0}")]
    Consumer(String),

    /// The offset manager rejected or failed a commit.
    #[error("offset manager error: {0}")]
    OffsetManager(String),

    /// [`crate::config::RunLoopConfig`] construction rejected its inputs.
    #[error("invalid run loop configuration: {0}")]
    InvalidConfig(String),
}
