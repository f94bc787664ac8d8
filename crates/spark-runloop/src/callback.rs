//! The completion callback a user task is handed for each dispatched
//! envelope.

use std::sync::Arc;

use crate::coordinator::Coordinator;
use crate::envelope::Envelope;
use crate::error::TaskFailure;
use crate::worker::TaskWorker;

/// Handed to `UserTask::process` alongside the envelope. Calling
/// [`new_handle`](Self::new_handle) registers one in-flight callback and
/// returns the [`Callback`] used to complete it.
pub struct CallbackFactory<E: Envelope> {
    pub(crate) worker: Arc<TaskWorker<E>>,
    pub(crate) envelope: Arc<E>,
}

impl<E: Envelope> CallbackFactory<E> {
    /// Registers a new in-flight callback for this dispatch, allocating its
    /// reorder-buffer sequence and arming the callback-timeout watchdog if
    /// one is configured. `messages_in_flight` is *not* bumped here — the
    /// dispatching worker already did that synchronously before spawning
    /// `process`, since this call only happens once the spawned future is
    /// actually polled, which is too late to bound concurrency against.
    /// `coordinator` is captured at this point, so a task should call
    /// `coordinator.request_commit()`/`request_shutdown()` before calling
    /// this, not after.
    pub fn new_handle(&self, coordinator: Coordinator) -> Callback<E> {
        let sequence = self.worker.begin_dispatch(self.envelope.clone(), coordinator);
        Callback {
            worker: self.worker.clone(),
            sequence,
        }
    }
}

/// A single-use completion token. Exactly one of [`success`](Self::success)
/// or [`fail`](Self::fail) should be called; the type system enforces "at
/// most once" via consuming `self`, and the worker silently drops a
/// second completion for the same sequence (which can only happen via
/// the timeout watchdog racing a late, legitimate completion) rather than
/// panicking on it.
pub struct Callback<E: Envelope> {
    worker: Arc<TaskWorker<E>>,
    sequence: u64,
}

impl<E: Envelope> Callback<E> {
    pub fn success(self) {
        self.worker.complete(self.sequence);
    }

    pub fn fail(self, error: TaskFailure) {
        self.worker.fail(self.sequence, error);
    }
}
