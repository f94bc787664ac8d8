//! The coordinator object a user task mutates during `process`/`window`,
//! and the loop-wide sink those requests drain into.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

/// Per-dispatch scratch object handed to a user task. The task records
/// what it wants (an early commit, a full shutdown) by calling these
/// methods; nothing takes effect until the owning callback is completed
/// (or, for `window`, until `window` returns) and the run loop folds the
/// recorded requests into the [`CoordinatorRequestSink`].
#[derive(Debug, Default, Clone)]
pub struct Coordinator {
    commit: bool,
    shutdown: bool,
}

impl Coordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the owning task to run `commit` on a future tick, ahead of its
    /// normal periodic schedule.
    pub fn request_commit(&mut self) {
        self.commit = true;
    }

    /// Ask the run loop to begin a clean shutdown once every task finishes
    /// its in-flight work.
    pub fn request_shutdown(&mut self) {
        self.shutdown = true;
    }

    pub(crate) fn wants_commit(&self) -> bool {
        self.commit
    }

    pub(crate) fn wants_shutdown(&self) -> bool {
        self.shutdown
    }
}

/// Aggregates coordinator requests across every task, feeding
/// [`crate::task_state::TaskState::is_ready`] (pending commit requests)
/// and the run loop's shutdown check (sticky once any task asks).
pub(crate) struct CoordinatorRequestSink {
    commit_requests: Mutex<HashSet<String>>,
    shutdown_requested: AtomicBool,
}

impl CoordinatorRequestSink {
    pub fn new() -> Self {
        Self {
            commit_requests: Mutex::new(HashSet::new()),
            shutdown_requested: AtomicBool::new(false),
        }
    }

    /// Folds a retired or just-returned coordinator's requests in. Called
    /// from whichever thread retired the handle (any callback-invoking
    /// thread for `process`, the blocking pool or loop thread for
    /// `window`).
    pub fn absorb(&self, task: &str, coordinator: &Coordinator) {
        if coordinator.wants_commit() {
            self.commit_requests.lock().insert(task.to_string());
        }
        if coordinator.wants_shutdown() {
            self.shutdown_requested.store(true, Ordering::Release);
        }
    }

    /// Consumes a pending commit request for `task`, if any. Called once
    /// per tick from `TaskState::is_ready`.
    pub fn take_commit_request(&self, task: &str) -> bool {
        self.commit_requests.lock().remove(task)
    }

    pub fn has_pending_commits(&self) -> bool {
        !self.commit_requests.lock().is_empty()
    }

    pub fn shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commit_request_is_consumed_exactly_once() {
        let sink = CoordinatorRequestSink::new();
        let mut coordinator = Coordinator::new();
        coordinator.request_commit();
        sink.absorb("task-a", &coordinator);

        assert!(sink.has_pending_commits());
        assert!(sink.take_commit_request("task-a"));
        assert!(!sink.take_commit_request("task-a"));
        assert!(!sink.has_pending_commits());
    }

    #[test]
    fn shutdown_request_is_sticky() {
        let sink = CoordinatorRequestSink::new();
        assert!(!sink.shutdown_requested());

        let mut coordinator = Coordinator::new();
        coordinator.request_shutdown();
        sink.absorb("task-a", &coordinator);

        assert!(sink.shutdown_requested());
        // A later coordinator with nothing set must not clear it.
        sink.absorb("task-b", &Coordinator::new());
        assert!(sink.shutdown_requested());
    }
}
