//! Sequencing & Dedup Buffer
//!
//! Tracks a high-watermark sequence per stream and decides, for each
//! decoded event, whether it is admitted, a duplicate, or admitted with
//! a gap (prior sequences were never seen, e.g. across a reconnect).
//!
//! # Invariant
//!
//! For any stream, admitted sequences are strictly increasing. A
//! duplicate (sequence at or below the watermark) is never admitted, so
//! consumers never observe the same sequence twice nor a lower sequence
//! after a higher one.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::domain::streaming::{MissingRange, StreamId};

// =============================================================================
// Admission
// =============================================================================

/// Outcome of admitting one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The event advances the watermark and must be delivered. `gap`
    /// is set when sequences between the previous watermark and this
    /// event were never admitted; it is informational and never blocks
    /// delivery.
    Accept {
        /// Missing sequence range, if any.
        gap: Option<MissingRange>,
    },
    /// The sequence is at or below the watermark; the event must be
    /// discarded without delivery.
    DuplicateDrop,
}

impl Admission {
    /// Whether the event should be delivered.
    #[must_use]
    pub const fn is_accept(&self) -> bool {
        matches!(self, Self::Accept { .. })
    }
}

// =============================================================================
// Sequence Buffer
// =============================================================================

/// Per-stream watermark state.
///
/// Admission is strictly sequential per stream (the pipeline task is
/// the only caller of [`SequenceBuffer::admit`]); the mutex exists so
/// the control path can reset watermarks on fresh subscriptions.
///
/// # Example
///
/// ```rust
/// use binance_stream_client::domain::sequencing::{Admission, SequenceBuffer};
///
/// let buffer = SequenceBuffer::new();
///
/// assert_eq!(buffer.admit("btcusdt@kline_1m", 1), Admission::Accept { gap: None });
/// assert_eq!(buffer.admit("btcusdt@kline_1m", 1), Admission::DuplicateDrop);
///
/// // Sequence 3 skipped: admitted, but flagged.
/// match buffer.admit("btcusdt@kline_1m", 4) {
///     Admission::Accept { gap: Some(gap) } => assert_eq!((gap.from, gap.to), (2, 3)),
///     other => panic!("unexpected admission: {other:?}"),
/// }
/// ```
#[derive(Debug, Default)]
pub struct SequenceBuffer {
    watermarks: Mutex<HashMap<StreamId, u64>>,
}

impl SequenceBuffer {
    /// Create an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self {
            watermarks: Mutex::new(HashMap::new()),
        }
    }

    /// Admit one event for `stream_id` with the given sequence.
    ///
    /// The first event for a stream (or the first after a
    /// [`reset`](Self::reset)) is always accepted with no gap.
    pub fn admit(&self, stream_id: &str, sequence: u64) -> Admission {
        let mut watermarks = self.watermarks.lock();

        match watermarks.get_mut(stream_id) {
            None => {
                watermarks.insert(stream_id.to_string(), sequence);
                Admission::Accept { gap: None }
            }
            Some(watermark) if sequence <= *watermark => Admission::DuplicateDrop,
            Some(watermark) => {
                let gap = (sequence > *watermark + 1).then(|| MissingRange {
                    from: *watermark + 1,
                    to: sequence - 1,
                });
                *watermark = sequence;
                Admission::Accept { gap }
            }
        }
    }

    /// Forget the watermark for a stream. The next event on the stream
    /// is accepted unconditionally with no gap flagged.
    pub fn reset(&self, stream_id: &str) {
        self.watermarks.lock().remove(stream_id);
    }

    /// Current watermark for a stream, if any event has been admitted.
    #[must_use]
    pub fn watermark(&self, stream_id: &str) -> Option<u64> {
        self.watermarks.lock().get(stream_id).copied()
    }

    /// Number of streams with a known watermark.
    #[must_use]
    pub fn stream_count(&self) -> usize {
        self.watermarks.lock().len()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn first_event_accepted_without_gap() {
        let buffer = SequenceBuffer::new();
        assert_eq!(buffer.admit("s", 10), Admission::Accept { gap: None });
        assert_eq!(buffer.watermark("s"), Some(10));
    }

    #[test]
    fn duplicate_dropped() {
        let buffer = SequenceBuffer::new();
        buffer.admit("s", 5);

        assert_eq!(buffer.admit("s", 5), Admission::DuplicateDrop);
        assert_eq!(buffer.admit("s", 3), Admission::DuplicateDrop);
        assert_eq!(buffer.watermark("s"), Some(5));
    }

    #[test]
    fn contiguous_sequence_has_no_gap() {
        let buffer = SequenceBuffer::new();
        buffer.admit("s", 1);

        assert_eq!(buffer.admit("s", 2), Admission::Accept { gap: None });
        assert_eq!(buffer.admit("s", 3), Admission::Accept { gap: None });
    }

    #[test]
    fn skipped_sequence_flags_gap() {
        let buffer = SequenceBuffer::new();
        buffer.admit("s", 2);

        match buffer.admit("s", 7) {
            Admission::Accept { gap: Some(gap) } => {
                assert_eq!(gap.from, 3);
                assert_eq!(gap.to, 6);
                assert_eq!(gap.len(), 4);
            }
            other => panic!("unexpected admission: {other:?}"),
        }
    }

    #[test]
    fn duplicate_then_skip_on_one_stream() {
        let buffer = SequenceBuffer::new();

        assert_eq!(buffer.admit("btcusdt@kline_1m", 1), Admission::Accept { gap: None });
        assert_eq!(buffer.admit("btcusdt@kline_1m", 2), Admission::Accept { gap: None });
        assert_eq!(buffer.admit("btcusdt@kline_1m", 2), Admission::DuplicateDrop);
        assert_eq!(
            buffer.admit("btcusdt@kline_1m", 4),
            Admission::Accept {
                gap: Some(MissingRange { from: 3, to: 3 })
            }
        );
    }

    #[test]
    fn streams_are_independent() {
        let buffer = SequenceBuffer::new();
        buffer.admit("a", 100);

        // A fresh stream starts its own watermark.
        assert_eq!(buffer.admit("b", 1), Admission::Accept { gap: None });
        assert_eq!(buffer.watermark("a"), Some(100));
        assert_eq!(buffer.watermark("b"), Some(1));
    }

    #[test]
    fn reset_forgets_watermark() {
        let buffer = SequenceBuffer::new();
        buffer.admit("s", 50);
        buffer.reset("s");

        assert_eq!(buffer.watermark("s"), None);
        // First event after reset: accepted, no gap even though lower.
        assert_eq!(buffer.admit("s", 1), Admission::Accept { gap: None });
    }

    #[test]
    fn reset_unknown_stream_is_noop() {
        let buffer = SequenceBuffer::new();
        buffer.reset("never-seen");
        assert_eq!(buffer.stream_count(), 0);
    }

    proptest! {
        // Under any input sequence, admitted sequences are strictly
        // increasing and replaying the same frame is never admitted twice.
        #[test]
        fn admitted_sequences_strictly_increase(sequences in proptest::collection::vec(0u64..1000, 1..200)) {
            let buffer = SequenceBuffer::new();
            let mut delivered = Vec::new();

            for seq in sequences {
                if buffer.admit("s", seq).is_accept() {
                    delivered.push(seq);
                }
            }

            for pair in delivered.windows(2) {
                prop_assert!(pair[0] < pair[1]);
            }
        }

        #[test]
        fn replay_is_idempotent(sequences in proptest::collection::vec(0u64..1000, 1..100)) {
            let buffer = SequenceBuffer::new();

            for seq in &sequences {
                let _ = buffer.admit("s", *seq);
            }

            // Replaying the exact same frames admits nothing.
            for seq in &sequences {
                prop_assert_eq!(buffer.admit("s", *seq), Admission::DuplicateDrop);
            }
        }
    }
}
