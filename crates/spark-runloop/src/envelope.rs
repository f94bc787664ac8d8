//! Inbound message shape and the per-dispatch wrapper around it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A partition key. Cheap to clone and hash, since it is threaded through
/// every pending-queue entry, every task's assignment map, and every
/// commit call.
pub type Partition = Arc<str>;

/// An opaque inbound record. The run loop never inspects a message's
/// payload — only its routing key and its position within that
/// partition's stream.
pub trait Envelope: Send + Sync + std::fmt::Debug + 'static {
    /// Which partition this record arrived on.
    fn partition(&self) -> &Partition;

    /// The record's offset within its partition, used both for the
    /// reorder buffer's retirement order and for offset-manager commits.
    fn offset(&self) -> u64;
}

/// One envelope as it sits in a task's pending queue, broadcast-shared
/// across every task subscribed to its partition.
///
/// `processed` exists only to settle the broadcast-fan-out race: several
/// tasks may hold the same `Arc<PendingEnvelope<E>>` in their queues, but
/// only the task that actually dequeues it first should advance the
/// shared consumer's cursor for that partition. Guarded with an atomic
/// rather than reserved for the loop thread alone, because a broadcast
/// envelope can in principle be fetched by more than one task's
/// `fetch_envelope` within the same tick.
pub struct PendingEnvelope<E: Envelope> {
    envelope: Arc<E>,
    processed: AtomicBool,
}

impl<E: Envelope> PendingEnvelope<E> {
    pub(crate) fn new(envelope: Arc<E>) -> Self {
        Self {
            envelope,
            processed: AtomicBool::new(false),
        }
    }

    pub fn envelope(&self) -> &Arc<E> {
        &self.envelope
    }

    /// Flips the processed flag, returning `true` only to the caller that
    /// performed the flip. Every other caller (duplicate fetch of a
    /// broadcast envelope) gets `false` and must not advance the
    /// consumer's cursor again.
    pub(crate) fn mark_processed(&self) -> bool {
        self.processed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl<E: Envelope> std::fmt::Debug for PendingEnvelope<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingEnvelope")
            .field("envelope", &self.envelope)
            .field("processed", &self.processed.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Record {
        partition: Partition,
        offset: u64,
    }

    impl Envelope for Record {
        fn partition(&self) -> &Partition {
            &self.partition
        }

        fn offset(&self) -> u64 {
            self.offset
        }
    }

    #[test]
    fn only_the_first_mark_processed_wins() {
        let pending = PendingEnvelope::new(Arc::new(Record {
            partition: Partition::from("p0"),
            offset: 7,
        }));
        assert!(pending.mark_processed());
        assert!(!pending.mark_processed());
        assert!(!pending.mark_processed());
    }
}
