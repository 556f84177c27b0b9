//! The per-session event ring.
//!
//! A bounded deque of `(seq, message)` pairs providing at-least-once
//! delivery across browser reconnects. Sequence numbers start at 1 and
//! never repeat; FIFO eviction bumps the earliest-available watermark, and
//! replay below the watermark is best-effort (the subscriber rebuilds from
//! a fresh history snapshot on gap).

use serde_json::Value;
use std::collections::VecDeque;

use switchboard_protocol::browser::SequencedEvent;

/// Default ring capacity.
pub const DEFAULT_RING_CAPACITY: usize = 512;

/// Bounded ring of sequenced events.
#[derive(Debug)]
pub struct EventRing {
    capacity: usize,
    entries: VecDeque<SequencedEvent>,
    next_seq: u64,
}

impl EventRing {
    /// Create a ring holding at most `capacity` events.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: VecDeque::with_capacity(capacity.max(1)),
            next_seq: 1,
        }
    }

    /// Append a message, assigning the next sequence number. Evicts the
    /// oldest entry when full.
    pub fn append(&mut self, message: Value) -> u64 {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.saturating_add(1);
        if self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(SequencedEvent { seq, message });
        seq
    }

    /// Everything still held with `seq > last_acked`, in order.
    ///
    /// When `last_acked` is below the eviction watermark this returns all
    /// surviving entries; the gap is the subscriber's to handle.
    #[must_use]
    pub fn replay_from(&self, last_acked: u64) -> Vec<SequencedEvent> {
        self.entries
            .iter()
            .filter(|e| e.seq > last_acked)
            .cloned()
            .collect()
    }

    /// The oldest surviving sequence number.
    #[must_use]
    pub fn earliest_seq(&self) -> Option<u64> {
        self.entries.front().map(|e| e.seq)
    }

    /// The most recently assigned sequence number (0 when empty-new).
    #[must_use]
    pub fn last_seq(&self) -> u64 {
        self.next_seq.saturating_sub(1)
    }

    /// Number of events currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the ring holds nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for EventRing {
    fn default() -> Self {
        Self::new(DEFAULT_RING_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn seq_starts_at_one_and_is_strictly_increasing() {
        let mut ring = EventRing::new(8);
        assert_eq!(ring.append(json!({"n": 1})), 1);
        assert_eq!(ring.append(json!({"n": 2})), 2);
        assert_eq!(ring.append(json!({"n": 3})), 3);
        assert_eq!(ring.last_seq(), 3);
    }

    #[test]
    fn eviction_bumps_the_watermark() {
        let mut ring = EventRing::new(3);
        for n in 1..=5 {
            ring.append(json!({"n": n}));
        }
        assert_eq!(ring.len(), 3);
        assert_eq!(ring.earliest_seq(), Some(3));
        assert_eq!(ring.last_seq(), 5);
    }

    #[test]
    fn replay_returns_only_unacked_events() {
        let mut ring = EventRing::new(8);
        for n in 1..=5 {
            ring.append(json!({"n": n}));
        }
        let replay = ring.replay_from(3);
        let seqs: Vec<u64> = replay.iter().map(|e| e.seq).collect();
        assert_eq!(seqs, [4, 5]);
    }

    #[test]
    fn replay_below_watermark_is_best_effort() {
        // Ring capacity 128, events 1..=200: earliest survivor is 73.
        let mut ring = EventRing::new(128);
        for n in 1..=200 {
            ring.append(json!({"n": n}));
        }
        assert_eq!(ring.earliest_seq(), Some(73));

        let replay = ring.replay_from(10);
        assert_eq!(replay.len(), 128);
        assert_eq!(replay.first().unwrap().seq, 73);
        assert_eq!(replay.last().unwrap().seq, 200);
    }

    #[test]
    fn replay_from_latest_is_empty() {
        let mut ring = EventRing::new(8);
        ring.append(json!({}));
        ring.append(json!({}));
        assert!(ring.replay_from(2).is_empty());
    }
}
