//! The offset manager contract.

use crate::envelope::Partition;

/// Durable record of "how far has this task committed on this
/// partition". The run loop calls `update` only with offsets that have
/// already cleared the reorder buffer for their task, so every call it
/// makes represents a safe, monotonically increasing commit point for
/// that `(task, partition)` pair.
pub trait OffsetManager: Send + Sync + 'static {
    fn update(
        &self,
        task: &str,
        partition: &Partition,
        offset: u64,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}
