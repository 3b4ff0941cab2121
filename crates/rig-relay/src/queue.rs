//! Ordered queue of messages awaiting relay
//!
//! FIFO and unbounded except by memory. A failed batch goes back to the
//! front in its original order, so nothing is lost or reordered across
//! retries. A batch that failed after the far end already stored it will
//! be sent twice.

use std::collections::VecDeque;

use serde::Serialize;

use crate::wsjtx::WsjtxMessage;

/// One message as relayed upstream
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelayMessage {
    /// Receipt time, milliseconds since the Unix epoch
    pub received_at: u64,
    /// Decoder client id
    pub client: Option<String>,
    #[serde(flatten)]
    pub message: WsjtxMessage,
}

/// FIFO of pending messages
#[derive(Debug, Default)]
pub struct RelayQueue {
    items: VecDeque<RelayMessage>,
}

impl RelayQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: RelayMessage) {
        self.items.push_back(message);
    }

    /// Remove up to `max` messages from the front
    pub fn take_batch(&mut self, max: usize) -> Vec<RelayMessage> {
        let n = max.min(self.items.len());
        self.items.drain(..n).collect()
    }

    /// Put a failed batch back at the front, keeping its order
    pub fn requeue_front(&mut self, batch: Vec<RelayMessage>) {
        for message in batch.into_iter().rev() {
            self.items.push_front(message);
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RelayMessage> {
        self.items.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wsjtx::Clear;

    fn msg(n: u64) -> RelayMessage {
        RelayMessage {
            received_at: n,
            client: None,
            message: WsjtxMessage::Clear(Clear { window: None }),
        }
    }

    fn order(q: &RelayQueue) -> Vec<u64> {
        q.iter().map(|m| m.received_at).collect()
    }

    #[test]
    fn test_fifo() {
        let mut q = RelayQueue::new();
        (1..=4).for_each(|n| q.push(msg(n)));
        let batch = q.take_batch(3);
        assert_eq!(batch.iter().map(|m| m.received_at).collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(order(&q), vec![4]);
    }

    #[test]
    fn test_requeue_goes_ahead_of_newer_items() {
        let mut q = RelayQueue::new();
        (1..=3).for_each(|n| q.push(msg(n)));
        let batch = q.take_batch(10);
        q.push(msg(4));
        q.requeue_front(batch);
        assert_eq!(order(&q), vec![1, 2, 3, 4]);
    }
}
