//! Per-task readiness bookkeeping.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::coordinator::CoordinatorRequestSink;
use crate::envelope::{Envelope, PendingEnvelope};

/// What a task should do next, decided by [`TaskState::next_op`].
pub(crate) enum NextOp {
    Commit,
    Window,
    Process,
    NoOp,
}

/// Everything the run loop needs to decide whether and what to dispatch
/// for one task on a given tick.
///
/// `messages_in_flight`, `window_or_commit_in_flight`, `need_window`, and
/// `need_commit` are all atomics because they are read from the loop
/// thread and written from arbitrary callback-invoking threads
/// (`on_complete`/`on_failure`) and the periodic-timer thread. The
/// pending queue is different: only the loop thread ever pushes
/// (`run_tasks`) or pops (`fetch_envelope`) from it, so a plain mutex
/// rather than anything lock-free is enough — there is never real
/// contention on it, only the compiler's insistence that shared state
/// crossing an `Arc` boundary be guarded by something.
pub(crate) struct TaskState<E: Envelope> {
    task_name: String,
    max_concurrency: usize,
    messages_in_flight: AtomicUsize,
    window_or_commit_in_flight: AtomicBool,
    need_window: AtomicBool,
    need_commit: AtomicBool,
    pending_queue: Mutex<VecDeque<Arc<PendingEnvelope<E>>>>,
}

impl<E: Envelope> TaskState<E> {
    pub fn new(task_name: String, max_concurrency: usize) -> Self {
        Self {
            task_name,
            max_concurrency: max_concurrency.max(1),
            messages_in_flight: AtomicUsize::new(0),
            window_or_commit_in_flight: AtomicBool::new(false),
            need_window: AtomicBool::new(false),
            need_commit: AtomicBool::new(false),
            pending_queue: Mutex::new(VecDeque::new()),
        }
    }

    pub fn task_name(&self) -> &str {
        &self.task_name
    }

    pub fn enqueue(&self, pending: Arc<PendingEnvelope<E>>) {
        self.pending_queue.lock().push_back(pending);
    }

    pub fn request_window(&self) {
        self.need_window.store(true, Ordering::Release);
    }

    pub fn request_commit(&self) {
        self.need_commit.store(true, Ordering::Release);
    }

    pub fn increment_in_flight(&self) {
        self.messages_in_flight.fetch_add(1, Ordering::AcqRel);
    }

    pub fn decrement_in_flight(&self) {
        self.messages_in_flight.fetch_sub(1, Ordering::AcqRel);
    }

    pub fn queue_len(&self) -> usize {
        self.pending_queue.lock().len()
    }

    /// `messages_in_flight / max_concurrency`, reported to
    /// `MetricsSink::set_utilization`. `max_concurrency` is clamped to at
    /// least 1 in `new`, so this never divides by zero.
    pub fn utilization(&self) -> f64 {
        self.messages_in_flight.load(Ordering::Acquire) as f64 / self.max_concurrency as f64
    }

    pub fn finish_window_or_commit(&self) {
        self.window_or_commit_in_flight.store(false, Ordering::Release);
    }

    /// Whether this task may be dispatched at all right now. Commit and
    /// window take priority and require full drain (zero in-flight
    /// messages); ordinary processing only requires headroom under
    /// `max_concurrency`. Either way, a window/commit already in flight
    /// blocks everything else for this task.
    pub fn is_ready(&self, requests: &CoordinatorRequestSink) -> bool {
        if requests.take_commit_request(&self.task_name) {
            self.need_commit.store(true, Ordering::Release);
        }

        if self.window_or_commit_in_flight.load(Ordering::Acquire) {
            return false;
        }

        let needs_side_op =
            self.need_commit.load(Ordering::Acquire) || self.need_window.load(Ordering::Acquire);
        if needs_side_op {
            self.messages_in_flight.load(Ordering::Acquire) == 0
        } else {
            self.messages_in_flight.load(Ordering::Acquire) < self.max_concurrency
        }
    }

    /// Decides this task's next operation, in commit > window > process >
    /// no-op priority order. Claiming commit or window flips
    /// `window_or_commit_in_flight`; the caller is responsible for
    /// clearing it once the operation finishes.
    pub fn next_op(&self, requests: &CoordinatorRequestSink) -> NextOp {
        if !self.is_ready(requests) {
            return NextOp::NoOp;
        }

        if self
            .need_commit
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.window_or_commit_in_flight.store(true, Ordering::Release);
            return NextOp::Commit;
        }

        if self
            .need_window
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.window_or_commit_in_flight.store(true, Ordering::Release);
            return NextOp::Window;
        }

        if !self.pending_queue.lock().is_empty() {
            return NextOp::Process;
        }

        NextOp::NoOp
    }

    pub fn pop_pending(&self) -> Option<Arc<PendingEnvelope<E>>> {
        self.pending_queue.lock().pop_front()
    }

    pub fn has_pending_work(&self) -> bool {
        !self.pending_queue.lock().is_empty()
            || self.need_window.load(Ordering::Acquire)
            || self.need_commit.load(Ordering::Acquire)
    }

    /// Whether this task has nothing outstanding at all: no queued
    /// envelopes, no armed window/commit, no in-flight callbacks, and no
    /// window/commit currently running. Used to gate a clean shutdown —
    /// draining must finish before the loop exits, not just stop
    /// accepting new work.
    pub fn is_idle(&self) -> bool {
        self.messages_in_flight.load(Ordering::Acquire) == 0
            && !self.window_or_commit_in_flight.load(Ordering::Acquire)
            && !self.has_pending_work()
    }
}
