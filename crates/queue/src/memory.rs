//! In-process queue for local mode and tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::time::{Duration, Instant};

use crate::consumer::{QueueConsumer, QueueHealth, QueueMessage};
use crate::error::QueueError;
use crate::sink::{MessageSink, OutboundMessage};

struct Stored {
    id: String,
    body: String,
    sent_at: DateTime<Utc>,
    visible_at: Instant,
    attempts: u32,
}

#[derive(Default)]
struct State {
    ready: VecDeque<Stored>,
    in_flight: HashMap<String, Stored>,
}

/// A queue held in memory. Honours per-message delay, and nacked messages
/// return to the back of the queue with their attempt count kept.
#[derive(Default)]
pub struct MemoryQueue {
    state: Mutex<State>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bodies of every message not yet received, visible or delayed.
    pub fn pending_bodies(&self) -> Vec<String> {
        self.lock().ready.iter().map(|m| m.body.clone()).collect()
    }

    pub fn in_flight(&self) -> usize {
        self.lock().in_flight.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        // A panic while holding the lock leaves plain data behind; keep going.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl MessageSink for MemoryQueue {
    async fn send_batch(&self, messages: Vec<OutboundMessage>) -> Result<(), QueueError> {
        let now = Instant::now();
        let mut state = self.lock();
        for msg in messages {
            state.ready.push_back(Stored {
                id: uuid::Uuid::new_v4().to_string(),
                body: msg.body,
                sent_at: Utc::now(),
                visible_at: now + Duration::from_secs(u64::from(msg.delay_seconds)),
                attempts: 0,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl QueueConsumer for MemoryQueue {
    async fn poll_batch(&self, max_messages: u32) -> Result<Vec<QueueMessage>, QueueError> {
        let now = Instant::now();
        let mut state = self.lock();
        let mut delivered = Vec::new();
        let mut remaining = VecDeque::with_capacity(state.ready.len());

        while let Some(mut stored) = state.ready.pop_front() {
            if delivered.len() as u32 >= max_messages || stored.visible_at > now {
                remaining.push_back(stored);
                continue;
            }
            stored.attempts += 1;
            let receipt_handle = format!("{}#{}", stored.id, stored.attempts);
            delivered.push(QueueMessage {
                id: stored.id.clone(),
                body: stored.body.clone(),
                receipt_handle: receipt_handle.clone(),
                timestamp: stored.sent_at,
                attempt_count: stored.attempts,
            });
            state.in_flight.insert(receipt_handle, stored);
        }

        state.ready = remaining;
        Ok(delivered)
    }

    async fn ack(&self, receipt_handle: &str) -> Result<(), QueueError> {
        self.lock()
            .in_flight
            .remove(receipt_handle)
            .map(|_| ())
            .ok_or_else(|| QueueError::Ack(format!("unknown receipt handle {receipt_handle}")))
    }

    async fn nack(&self, receipt_handle: &str) -> Result<(), QueueError> {
        let mut state = self.lock();
        let mut stored = state
            .in_flight
            .remove(receipt_handle)
            .ok_or_else(|| QueueError::Ack(format!("unknown receipt handle {receipt_handle}")))?;
        stored.visible_at = Instant::now();
        state.ready.push_back(stored);
        Ok(())
    }

    async fn health_check(&self) -> Result<QueueHealth, QueueError> {
        Ok(QueueHealth {
            connected: true,
            approximate_message_count: Some(self.lock().ready.len() as u64),
            provider: "memory".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delivers_in_order_and_acks() {
        let queue = MemoryQueue::new();
        queue
            .send_batch(vec![OutboundMessage::new("a"), OutboundMessage::new("b")])
            .await
            .unwrap();

        let batch = queue.poll_batch(10).await.unwrap();
        assert_eq!(batch.iter().map(|m| m.body.as_str()).collect::<Vec<_>>(), ["a", "b"]);
        assert_eq!(queue.in_flight(), 2);

        for msg in &batch {
            queue.ack(&msg.receipt_handle).await.unwrap();
        }
        assert_eq!(queue.in_flight(), 0);
        assert!(queue.poll_batch(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn respects_max_messages() {
        let queue = MemoryQueue::new();
        let msgs = (0..5).map(|i| OutboundMessage::new(i.to_string())).collect();
        queue.send_batch(msgs).await.unwrap();

        assert_eq!(queue.poll_batch(3).await.unwrap().len(), 3);
        assert_eq!(queue.poll_batch(3).await.unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_message_is_hidden_until_due() {
        let queue = MemoryQueue::new();
        queue
            .send_batch(vec![OutboundMessage::new("later").with_delay(30)])
            .await
            .unwrap();

        assert!(queue.poll_batch(10).await.unwrap().is_empty());
        assert_eq!(queue.pending_bodies(), vec!["later".to_string()]);

        tokio::time::advance(Duration::from_secs(31)).await;
        let batch = queue.poll_batch(10).await.unwrap();
        assert_eq!(batch.len(), 1);
    }

    #[tokio::test]
    async fn nack_redelivers_with_higher_attempt() {
        let queue = MemoryQueue::new();
        queue.send_batch(vec![OutboundMessage::new("x")]).await.unwrap();

        let first = queue.poll_batch(1).await.unwrap().remove(0);
        assert_eq!(first.attempt_count, 1);
        queue.nack(&first.receipt_handle).await.unwrap();

        let second = queue.poll_batch(1).await.unwrap().remove(0);
        assert_eq!(second.id, first.id);
        assert_eq!(second.attempt_count, 2);
        assert!(queue.ack(&first.receipt_handle).await.is_err());
    }
}
