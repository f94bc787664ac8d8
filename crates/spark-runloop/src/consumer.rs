//! The multiplexed consumer contract.

use std::sync::Arc;
use std::time::Duration;

use crate::envelope::{Envelope, Partition};

/// A single shared source of inbound records across every partition this
/// container is assigned. The run loop never knows how many partitions
/// are behind it or how they are fetched — only that `choose` hands back
/// at most one envelope per call and that `try_update` exists to release
/// backpressure once a partition's head has actually been dispatched.
pub trait MultiplexedConsumer<E: Envelope>: Send + Sync + 'static {
    /// Returns the next envelope to dispatch, or `None` if nothing is
    /// immediately available. Must not block — a consumer with nothing
    /// ready should return `Ok(None)` rather than waiting, since the run
    /// loop decides how long to idle based on [`poll_interval`].
    fn choose(&self) -> Result<Option<Arc<E>>, Box<dyn std::error::Error + Send + Sync>>;

    /// Called once a partition's head envelope has actually been fetched
    /// by a task (not merely broadcast into a queue), signalling that the
    /// consumer may advance its read cursor for that partition and lift
    /// any backpressure it was applying there.
    fn try_update(&self, partition: &Partition);

    /// How long `block_if_busy` should wait before re-polling `choose`
    /// when no task has other work pending. Implementations backed by a
    /// blocking fetch API typically return a small duration (tens of
    /// milliseconds); implementations that can register a wakeup may
    /// return a longer one.
    fn poll_interval(&self) -> Duration {
        Duration::from_millis(50)
    }
}
