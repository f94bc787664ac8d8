//! Out-of-order completion reconciliation.
//!
//! # Grounding
//! The contiguous-prefix retirement loop below is the same shape as
//! `PartitionTracker`'s completion handling in the Kafka deduplicator
//! reference material: completions are kept in a side map keyed by their
//! dispatch position until the position immediately after the last
//! retired one shows up, at which point as long a run as possible is
//! drained in one pass. Offsets only ever move forward here because the
//! caller feeds them in dispatch order by construction (sequence numbers
//! are assigned in `fetch_envelope` order), not because this buffer
//! re-sorts anything itself.

use std::collections::BTreeMap;

use crate::coordinator::Coordinator;
use crate::envelope::Partition;

struct RetiredEntry {
    partition: Partition,
    offset: u64,
    coordinator: Coordinator,
}

/// Buffers out-of-order completions for one task and releases them in
/// contiguous runs as gaps fill in.
pub(crate) struct CallbackReorderBuffer {
    next_to_retire: u64,
    pending: BTreeMap<u64, RetiredEntry>,
}

impl CallbackReorderBuffer {
    pub fn new() -> Self {
        Self {
            next_to_retire: 0,
            pending: BTreeMap::new(),
        }
    }

    /// Records a completion at `sequence` and drains every contiguous
    /// entry starting at the current retirement cursor. Returns the last
    /// entry retired in this call, if any — that is the one whose offset
    /// and coordinator should actually be committed, since everything
    /// before it in the run is now superseded.
    pub fn retire(
        &mut self,
        sequence: u64,
        partition: Partition,
        offset: u64,
        coordinator: Coordinator,
    ) -> Option<(Partition, u64, Coordinator)> {
        self.pending.insert(
            sequence,
            RetiredEntry {
                partition,
                offset,
                coordinator,
            },
        );

        let mut last = None;
        while let Some(entry) = self.pending.remove(&self.next_to_retire) {
            self.next_to_retire += 1;
            last = Some((entry.partition, entry.offset, entry.coordinator));
        }
        last
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn partition() -> Partition {
        Partition::from("p0")
    }

    #[test]
    fn out_of_order_completion_commits_only_the_contiguous_tail() {
        let mut buffer = CallbackReorderBuffer::new();

        // E3 completes first: nothing retires, seq 0 and 1 still pending.
        assert!(buffer
            .retire(2, partition(), 103, Coordinator::new())
            .is_none());

        // E1 completes: only seq 0 retires.
        let (_, offset, _) = buffer
            .retire(0, partition(), 101, Coordinator::new())
            .expect("seq 0 should retire alone");
        assert_eq!(offset, 101);

        // E4 completes: still blocked on seq 1.
        assert!(buffer
            .retire(3, partition(), 104, Coordinator::new())
            .is_none());

        // E2 completes: seq 1, 2, 3 all retire in one pass; offset 104 wins.
        let (_, offset, _) = buffer
            .retire(1, partition(), 102, Coordinator::new())
            .expect("seq 1..=3 should retire together");
        assert_eq!(offset, 104);
    }

    #[test]
    fn in_order_completion_retires_immediately() {
        let mut buffer = CallbackReorderBuffer::new();
        for (seq, offset) in [(0, 10), (1, 11), (2, 12)] {
            let (_, retired_offset, _) = buffer
                .retire(seq, partition(), offset, Coordinator::new())
                .expect("in-order completion retires immediately");
            assert_eq!(retired_offset, offset);
        }
    }

    proptest::proptest! {
        /// Invariant 1: whatever order completions arrive in, the
        /// sequence of offsets actually retired is the same strictly
        /// increasing run that in-order completion would have produced,
        /// and the final committed offset always equals the offset of
        /// the highest contiguous sequence completed.
        #[test]
        fn retirement_is_order_independent(seed in proptest::prelude::any::<u64>()) {
            use proptest::prelude::*;
            let _ = seed; // drives nothing directly; shuffles are derived below

            let n: u64 = 32;
            let mut order: Vec<u64> = (0..n).collect();
            // A cheap deterministic shuffle keyed on the proptest-provided
            // seed, avoiding a dependency on external randomness sources
            // inside the property itself.
            let mut state = seed.wrapping_add(0x9E3779B97F4A7C15);
            for i in (1..order.len()).rev() {
                state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
                let j = (state >> 33) as usize % (i + 1);
                order.swap(i, j);
            }

            let mut buffer = CallbackReorderBuffer::new();
            let mut last_retired: Option<u64> = None;
            for &seq in &order {
                if let Some((_, offset, _)) = buffer.retire(seq, partition(), seq, Coordinator::new()) {
                    if let Some(prev) = last_retired {
                        prop_assert!(offset > prev, "offsets must strictly increase");
                    }
                    last_retired = Some(offset);
                }
            }
            // Every sequence has now completed, so the buffer must have
            // drained the entire contiguous run up to n - 1.
            prop_assert_eq!(last_retired, Some(n - 1));
        }
    }
}
