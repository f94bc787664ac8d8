//! The value the loop thread produces on exit.

use std::collections::HashMap;

use crate::error::RunLoopError;

/// Per-task counters snapshotted at teardown, keyed by task name. Kept
/// deliberately small (counts only, no histograms) — a host wanting full
/// metrics detail should read them from its own [`crate::metrics::MetricsSink`]
/// implementation throughout the run, not wait for this snapshot.
#[derive(Debug, Clone, Default)]
pub struct TaskSummary {
    pub envelopes_processed: u64,
    pub windows_run: u64,
    pub commits_run: u64,
}

/// Why the loop thread stopped.
#[derive(Debug, Clone)]
pub enum StopReason {
    /// Either `RunLoopHandle::shutdown` was called (the loop exits after
    /// its current tick, without waiting for any task to drain) or a
    /// coordinator-originated shutdown ran to completion (every task
    /// drained cleanly first).
    Shutdown,
    /// A user task failed, a callback timed out, the consumer or offset
    /// manager errored, or a contract violation was detected.
    Fatal(RunLoopError),
}

/// Returned by [`crate::run_loop::RunLoop::run`] once the loop thread
/// exits, bundling the stop reason with a final summary per task. A
/// bootstrap harness (out of scope for this crate) uses this to decide a
/// process exit code and what to log on the way out.
#[derive(Debug, Clone)]
pub struct RunLoopReport {
    pub reason: StopReason,
    pub tasks: HashMap<String, TaskSummary>,
}

impl RunLoopReport {
    pub fn is_clean_shutdown(&self) -> bool {
        matches!(self.reason, StopReason::Shutdown)
    }

    pub fn fatal_error(&self) -> Option<&RunLoopError> {
        match &self.reason {
            StopReason::Fatal(error) => Some(error),
            StopReason::Shutdown => None,
        }
    }
}
