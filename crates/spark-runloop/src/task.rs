//! The user task contract.

use std::sync::Arc;

use async_trait::async_trait;

use crate::callback::CallbackFactory;
use crate::coordinator::Coordinator;
use crate::envelope::{Envelope, Partition};
use crate::error::TaskFailure;

/// Application logic plugged into the run loop. One instance owns one
/// task's state; the run loop never calls two of its methods
/// concurrently (`process` dispatches may overlap up to
/// `max_concurrency`, but `window` and `commit` are always serialized
/// against every in-flight `process` for the same task).
#[async_trait]
pub trait UserTask<E: Envelope>: Send + Sync + 'static {
    /// Stable name used in logs, metrics, and coordinator bookkeeping.
    fn task_name(&self) -> &str;

    /// Every partition this task is subscribed to.
    fn partitions(&self) -> &[Partition];

    /// Whether `window` should ever be scheduled for this task. Tasks
    /// that don't implement windowed aggregation should leave this
    /// `false` so the periodic timer never arms a window tick for them.
    fn is_windowable(&self) -> bool {
        false
    }

    /// Processes one envelope. Must eventually call
    /// `callback.new_handle(coordinator)` exactly once and complete the
    /// returned [`crate::callback::Callback`] exactly once — calling it
    /// zero times stalls this task's concurrency slot forever, and
    /// calling it more than once is silently ignored past the first.
    async fn process(&self, envelope: Arc<E>, coordinator: Coordinator, callback: CallbackFactory<E>);

    /// Runs this task's periodic windowed aggregation, if any. Only
    /// called when [`is_windowable`](Self::is_windowable) is `true`.
    fn window(&self, coordinator: &mut Coordinator) -> Result<(), TaskFailure> {
        let _ = coordinator;
        Ok(())
    }

    /// Flushes this task's state to durable storage. Runs with zero
    /// messages in flight.
    fn commit(&self) -> Result<(), TaskFailure> {
        Ok(())
    }
}
