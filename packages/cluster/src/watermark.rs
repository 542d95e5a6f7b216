//! Watermark-buffered aggregation of link-status reports.
//!
//! Per-edge reports trickle in from up to K observers per subject. The
//! buffer counts reports per subject and withholds delivery until a
//! quiescence condition holds: a subject becomes "in progress" at the
//! soft watermark L and "ready" at the hard watermark H, and a batch is
//! released only when no subject remains strictly between the two. This
//! turns correlated failures and joins into one atomic batch instead of
//! a trickle of single-node proposals.
//!
//! The buffer is pure state; the caller serializes access, deduplicates
//! reports, and fences stale configurations before calling in.

use std::collections::HashMap;

use vigil_core::messages::LinkUpdatePayload;
use vigil_core::Endpoint;

use crate::settings::SettingsError;

/// Aggregates per-subject report counts into stable batches.
#[derive(Debug)]
pub struct WatermarkBuffer {
    high: usize,
    low: usize,
    counters: HashMap<Endpoint, usize>,
    updates_in_progress: usize,
    ready: Vec<Endpoint>,
    deliver_count: u64,
}

impl WatermarkBuffer {
    /// Creates a buffer for `ring_count` rings with hard watermark `high`
    /// and soft watermark `low`.
    ///
    /// # Errors
    ///
    /// Fails unless `ring_count >= 3` and `ring_count >= high > low >= 0`.
    pub fn new(ring_count: usize, high: usize, low: usize) -> Result<Self, SettingsError> {
        if ring_count < 3 {
            return Err(SettingsError::RingCountTooSmall(ring_count));
        }
        if high > ring_count || high <= low {
            return Err(SettingsError::InvalidWatermarks {
                ring_count,
                high,
                low,
            });
        }
        Ok(Self {
            high,
            low,
            counters: HashMap::new(),
            updates_in_progress: 0,
            ready: Vec::new(),
            deliver_count: 0,
        })
    }

    /// Feeds one (already deduplicated, already fenced) report.
    ///
    /// Returns the stable batch if this report completed one, otherwise an
    /// empty list. A returned batch is an immutable snapshot: the counters
    /// of its subjects are reset and the ready list is drained atomically
    /// before returning.
    pub fn receive(&mut self, update: &LinkUpdatePayload) -> Vec<Endpoint> {
        let subject = &update.link_dst;
        let count = {
            let slot = self.counters.entry(subject.clone()).or_insert(0);
            *slot += 1;
            *slot
        };

        // With L = 0 the open interval (L, H) can never hold a subject, so
        // the in-progress count stays at zero and every subject delivers
        // alone on reaching H.
        if self.low > 0 && count == self.low {
            self.updates_in_progress += 1;
        }

        if count == self.high {
            self.ready.push(subject.clone());
            if self.low > 0 {
                assert!(
                    self.updates_in_progress > 0,
                    "subject {subject} reached H={} with no update in progress",
                    self.high
                );
                self.updates_in_progress -= 1;
            }
            if self.updates_in_progress == 0 {
                let batch = std::mem::take(&mut self.ready);
                for delivered in &batch {
                    self.counters.remove(delivered);
                }
                self.deliver_count += 1;
                return batch;
            }
        }

        Vec::new()
    }

    /// Drops all aggregation state. Called when a new view is installed;
    /// the delivery sequence deliberately survives so batches stay
    /// globally ordered.
    pub fn clear(&mut self) {
        self.counters.clear();
        self.ready.clear();
        self.updates_in_progress = 0;
    }

    /// Number of batches delivered so far.
    #[must_use]
    pub fn deliver_count(&self) -> u64 {
        self.deliver_count
    }

    /// Current report count for a subject (zero if none recorded).
    #[must_use]
    pub fn counter(&self, subject: &Endpoint) -> usize {
        self.counters.get(subject).copied().unwrap_or(0)
    }

    /// Number of subjects currently strictly between the watermarks.
    #[must_use]
    pub fn updates_in_progress(&self) -> usize {
        self.updates_in_progress
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use vigil_core::messages::LinkStatus;
    use vigil_core::ConfigurationId;

    use super::*;

    fn ep(n: u16) -> Endpoint {
        Endpoint::new(format!("10.0.0.{n}"), 5000)
    }

    /// A report about `dst` from observer `src` on `ring`.
    fn report(src: u16, dst: u16, ring: u32) -> LinkUpdatePayload {
        LinkUpdatePayload {
            sender: ep(src),
            link_src: ep(src),
            link_dst: ep(dst),
            status: LinkStatus::Down,
            ring_number: ring,
            configuration_id: ConfigurationId::from_u64(1),
            joiner_id: None,
            metadata: None,
        }
    }

    fn buffer() -> WatermarkBuffer {
        WatermarkBuffer::new(10, 8, 1).unwrap()
    }

    // -- construction --

    #[test]
    fn new_accepts_boundary_parameters() {
        assert!(WatermarkBuffer::new(3, 3, 0).is_ok());
        assert!(WatermarkBuffer::new(10, 8, 1).is_ok());
        assert!(WatermarkBuffer::new(10, 10, 9).is_ok());
    }

    #[test]
    fn new_rejects_bad_parameters() {
        // K too small.
        assert!(WatermarkBuffer::new(2, 2, 1).is_err());
        // H == L.
        assert!(WatermarkBuffer::new(3, 3, 3).is_err());
        // H > K.
        assert!(WatermarkBuffer::new(3, 4, 1).is_err());
        // H < L.
        assert!(WatermarkBuffer::new(10, 2, 5).is_err());
    }

    // -- single-subject delivery --

    #[test]
    fn single_subject_delivers_at_hard_watermark() {
        let mut buf = buffer();
        for observer in 1..8 {
            assert!(buf.receive(&report(observer, 42, u32::from(observer) - 1)).is_empty());
        }
        let batch = buf.receive(&report(8, 42, 7));
        assert_eq!(batch, vec![ep(42)]);
        assert_eq!(buf.deliver_count(), 1);
    }

    #[test]
    fn delivery_resets_the_subject_counter() {
        let mut buf = buffer();
        for observer in 1..=8 {
            buf.receive(&report(observer, 42, u32::from(observer) - 1));
        }
        assert_eq!(buf.counter(&ep(42)), 0);
        assert_eq!(buf.updates_in_progress(), 0);
    }

    #[test]
    fn reports_below_hard_watermark_never_deliver() {
        let mut buf = buffer();
        for observer in 1..=7 {
            assert!(buf.receive(&report(observer, 42, u32::from(observer) - 1)).is_empty());
        }
        assert_eq!(buf.deliver_count(), 0);
        assert_eq!(buf.counter(&ep(42)), 7);
    }

    // -- correlated batching --

    #[test]
    fn in_progress_subject_suppresses_partial_batch() {
        let mut buf = buffer();

        // Two reports put subject 50 in progress (1 >= L, < H).
        buf.receive(&report(1, 50, 0));
        buf.receive(&report(2, 50, 1));

        // Subject 42 reaching H must not deliver while 50 is open.
        for observer in 1..=8 {
            let batch = buf.receive(&report(observer, 42, u32::from(observer) - 1));
            assert!(batch.is_empty(), "delivered early with subject 50 open");
        }

        // Closing subject 50 releases both in one atomic batch.
        let mut batch = Vec::new();
        for observer in 3..=8 {
            batch = buf.receive(&report(observer, 50, u32::from(observer) - 1));
        }
        batch.sort();
        assert_eq!(batch, vec![ep(42), ep(50)]);
        assert_eq!(buf.deliver_count(), 1);
    }

    #[test]
    fn independent_subjects_deliver_separately() {
        let mut buf = buffer();
        for observer in 1..=8 {
            buf.receive(&report(observer, 42, u32::from(observer) - 1));
        }
        for observer in 1..=8 {
            let batch = buf.receive(&report(observer, 50, u32::from(observer) - 1));
            if observer == 8 {
                assert_eq!(batch, vec![ep(50)]);
            }
        }
        assert_eq!(buf.deliver_count(), 2);
    }

    #[test]
    fn counter_beyond_hard_watermark_does_not_redeliver() {
        let mut buf = buffer();
        // Subject 50 held open so 42's extra reports accumulate past H.
        buf.receive(&report(1, 50, 0));
        for observer in 1..=10 {
            assert!(buf.receive(&report(observer, 42, u32::from(observer) - 1)).is_empty());
        }
        assert_eq!(buf.counter(&ep(42)), 10);

        for observer in 2..=8 {
            buf.receive(&report(observer, 50, u32::from(observer) - 1));
        }
        assert_eq!(buf.deliver_count(), 1);
    }

    // -- L = 0 --

    #[test]
    fn zero_low_watermark_delivers_each_subject_alone() {
        let mut buf = WatermarkBuffer::new(3, 3, 0).unwrap();

        buf.receive(&report(1, 50, 0));
        for observer in 1..=3 {
            let batch = buf.receive(&report(observer, 42, u32::from(observer) - 1));
            if observer == 3 {
                // Subject 50's single report cannot hold the batch: with
                // L = 0 nothing is ever "in progress".
                assert_eq!(batch, vec![ep(42)]);
            } else {
                assert!(batch.is_empty());
            }
        }
    }

    // -- clear --

    #[test]
    fn clear_drops_counters_but_keeps_delivery_sequence() {
        let mut buf = buffer();
        for observer in 1..=8 {
            buf.receive(&report(observer, 42, u32::from(observer) - 1));
        }
        assert_eq!(buf.deliver_count(), 1);

        buf.receive(&report(1, 50, 0));
        buf.clear();
        assert_eq!(buf.counter(&ep(50)), 0);
        assert_eq!(buf.updates_in_progress(), 0);
        assert_eq!(buf.deliver_count(), 1);
    }

    // -- order insensitivity --

    proptest! {
        /// H distinct reports about one subject, in any order, produce
        /// exactly one batch containing exactly that subject.
        #[test]
        fn lone_subject_batch_is_order_insensitive(order in Just((1u16..=8).collect::<Vec<_>>()).prop_shuffle()) {
            let mut buf = buffer();
            let mut batches = Vec::new();
            for observer in order {
                let batch = buf.receive(&report(observer, 42, u32::from(observer) - 1));
                if !batch.is_empty() {
                    batches.push(batch);
                }
            }
            prop_assert_eq!(batches, vec![vec![ep(42)]]);
            prop_assert_eq!(buf.deliver_count(), 1);
        }

        /// Interleaving two subjects' full report sets in any order always
        /// delivers both subjects, however the batches split.
        #[test]
        fn delivered_subjects_are_order_insensitive(
            order in Just(
                (1u16..=8)
                    .flat_map(|observer| [(observer, 42u16), (observer, 50u16)])
                    .collect::<Vec<_>>()
            ).prop_shuffle()
        ) {
            let mut buf = buffer();
            let mut delivered = Vec::new();
            for (observer, subject) in order {
                delivered.extend(buf.receive(&report(observer, subject, u32::from(observer) - 1)));
            }
            delivered.sort();
            prop_assert_eq!(delivered, vec![ep(42), ep(50)]);
        }
    }
}
