//! Reliable, ordered delivery of discrete facts over an unreliable transport.
//!
//! The sender numbers every message and keeps it until the receiver
//! acknowledges it cumulatively. Unacknowledged messages are resent on every
//! flush. The receiver buffers gaps and only ever hands messages out in
//! sequence order, each exactly once.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

/// Largest number of messages packed into one flush.
pub const MAX_BATCH: usize = 32;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sequenced<T> {
    pub seq: u32,
    pub message: T,
}

#[derive(Debug, Clone)]
pub struct ReliableSender<T> {
    next_seq: u32,
    unacked: VecDeque<Sequenced<T>>,
}

impl<T: Clone> Default for ReliableSender<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> ReliableSender<T> {
    pub fn new() -> Self {
        Self {
            next_seq: 1,
            unacked: VecDeque::new(),
        }
    }

    /// Queues a message and returns its sequence number.
    pub fn push(&mut self, message: T) -> u32 {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        self.unacked.push_back(Sequenced { seq, message });
        seq
    }

    /// Drops every message up to and including `seq`.
    pub fn acknowledge(&mut self, seq: u32) {
        while let Some(front) = self.unacked.front() {
            if crate::seq_newer(front.seq, seq) {
                break;
            }
            self.unacked.pop_front();
        }
    }

    /// Oldest unacknowledged messages, at most [`MAX_BATCH`] of them.
    pub fn pending(&self) -> Vec<Sequenced<T>> {
        self.unacked.iter().take(MAX_BATCH).cloned().collect()
    }

    pub fn unacked_len(&self) -> usize {
        self.unacked.len()
    }

    pub fn is_idle(&self) -> bool {
        self.unacked.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct ReliableReceiver<T> {
    next_expected: u32,
    buffered: BTreeMap<u32, T>,
    delivered: u32,
}

impl<T> Default for ReliableReceiver<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ReliableReceiver<T> {
    pub fn new() -> Self {
        Self {
            next_expected: 1,
            buffered: BTreeMap::new(),
            delivered: 0,
        }
    }

    /// Accepts one message and returns everything that is now deliverable,
    /// in order. Duplicates and already-delivered sequences are dropped.
    pub fn receive(&mut self, incoming: Sequenced<T>) -> Vec<T> {
        if incoming.seq != self.next_expected && !crate::seq_newer(incoming.seq, self.next_expected)
        {
            return Vec::new();
        }
        self.buffered.entry(incoming.seq).or_insert(incoming.message);

        let mut ready = Vec::new();
        while let Some(message) = self.buffered.remove(&self.next_expected) {
            debug_assert!(
                self.delivered == 0 || crate::seq_newer(self.next_expected, self.delivered),
                "reliable channel delivered out of order"
            );
            self.delivered = self.next_expected;
            self.next_expected = self.next_expected.wrapping_add(1);
            ready.push(message);
        }
        ready
    }

    pub fn receive_batch(&mut self, batch: Vec<Sequenced<T>>) -> Vec<T> {
        batch
            .into_iter()
            .flat_map(|message| self.receive(message))
            .collect()
    }

    /// Cumulative acknowledgement: highest sequence delivered so far.
    pub fn ack(&self) -> u32 {
        self.delivered
    }

    pub fn buffered_len(&self) -> usize {
        self.buffered.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seq(seq: u32, message: &'static str) -> Sequenced<&'static str> {
        Sequenced { seq, message }
    }

    #[test]
    fn test_sender_numbers_from_one() {
        let mut sender = ReliableSender::new();
        assert_eq!(sender.push("a"), 1);
        assert_eq!(sender.push("b"), 2);
        assert_eq!(sender.unacked_len(), 2);
    }

    #[test]
    fn test_cumulative_ack() {
        let mut sender = ReliableSender::new();
        for m in ["a", "b", "c"] {
            sender.push(m);
        }
        sender.acknowledge(2);
        let pending = sender.pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].seq, 3);
        sender.acknowledge(1);
        assert_eq!(sender.unacked_len(), 1);
        sender.acknowledge(3);
        assert!(sender.is_idle());
    }

    #[test]
    fn test_pending_capped() {
        let mut sender = ReliableSender::new();
        for i in 0..100 {
            sender.push(i);
        }
        let pending = sender.pending();
        assert_eq!(pending.len(), MAX_BATCH);
        assert_eq!(pending[0].seq, 1);
    }

    #[test]
    fn test_receiver_buffers_gaps() {
        let mut receiver = ReliableReceiver::new();
        assert!(receiver.receive(seq(2, "b")).is_empty());
        assert!(receiver.receive(seq(3, "c")).is_empty());
        assert_eq!(receiver.ack(), 0);
        assert_eq!(receiver.receive(seq(1, "a")), vec!["a", "b", "c"]);
        assert_eq!(receiver.ack(), 3);
        assert_eq!(receiver.buffered_len(), 0);
    }

    #[test]
    fn test_receiver_drops_duplicates() {
        let mut receiver = ReliableReceiver::new();
        assert_eq!(receiver.receive(seq(1, "a")), vec!["a"]);
        assert!(receiver.receive(seq(1, "a")).is_empty());
        assert!(receiver.receive(seq(3, "c")).is_empty());
        assert!(receiver.receive(seq(3, "c")).is_empty());
        assert_eq!(receiver.receive(seq(2, "b")), vec!["b", "c"]);
    }

    #[test]
    fn test_resend_until_acked() {
        let mut sender = ReliableSender::new();
        let mut receiver = ReliableReceiver::new();
        sender.push("start");
        sender.push("score");

        // First flush lost entirely.
        let lost = sender.pending();
        let delivered = receiver.receive_batch(sender.pending());
        assert_eq!(delivered, vec!["start", "score"]);

        sender.acknowledge(receiver.ack());
        assert!(sender.is_idle());

        // A late copy of the first flush changes nothing.
        assert!(receiver.receive_batch(lost).is_empty());
    }
}
