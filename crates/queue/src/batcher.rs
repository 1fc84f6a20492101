//! Micro-batch accumulator for received change events.
//!
//! Change events arrive a few at a time; the trigger evaluates them in one
//! batch so policies are fetched and the evaluation function is called once
//! per batch instead of once per message.
//!
//! A message can be redelivered while still buffered (its visibility timeout
//! ran out before the batch flushed). Redeliveries collapse into the buffered
//! entry, which takes the newest receipt handle since only that one can still
//! settle the message.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;
use warden_core::config::QueueConfig;

use crate::consumer::QueueMessage;

/// Accumulates distinct queue messages and flushes when `max_size` are
/// buffered or `max_wait` has passed since the first one arrived.
pub struct MicroBatcher {
    buffer: Vec<QueueMessage>,
    /// Message ID → position in `buffer`.
    positions: HashMap<String, usize>,
    max_size: usize,
    max_wait: Duration,
    batch_started: Option<Instant>,
}

impl MicroBatcher {
    pub fn new(max_size: usize, max_wait: Duration) -> Self {
        let max_size = max_size.max(1);
        Self {
            buffer: Vec::with_capacity(max_size),
            positions: HashMap::with_capacity(max_size),
            max_size,
            max_wait,
            batch_started: None,
        }
    }

    /// Thresholds from `TRIGGER_BATCH_MAX_MESSAGES` / `TRIGGER_BATCH_MAX_WAIT_MS`.
    pub fn from_config(queues: &QueueConfig) -> Self {
        Self::new(queues.batch_max_messages, Duration::from_millis(queues.batch_max_wait_ms))
    }

    /// Add messages; the batch timer starts on the first non-empty push.
    /// Returns how many were redeliveries of an already-buffered message.
    pub fn push(&mut self, messages: Vec<QueueMessage>) -> usize {
        if self.batch_started.is_none() && !messages.is_empty() {
            self.batch_started = Some(Instant::now());
        }

        let mut redelivered = 0;
        for msg in messages {
            match self.positions.get(&msg.id) {
                Some(&at) => {
                    let held = &mut self.buffer[at];
                    held.receipt_handle = msg.receipt_handle;
                    held.attempt_count = held.attempt_count.max(msg.attempt_count);
                    redelivered += 1;
                }
                None => {
                    self.positions.insert(msg.id.clone(), self.buffer.len());
                    self.buffer.push(msg);
                }
            }
        }
        if redelivered > 0 {
            tracing::debug!(redelivered, buffered = self.buffer.len(), "merged redelivered change events");
        }
        redelivered
    }

    pub fn should_flush(&self) -> bool {
        !self.buffer.is_empty()
            && (self.buffer.len() >= self.max_size
                || self.batch_started.is_some_and(|started| started.elapsed() >= self.max_wait))
    }

    /// Take everything buffered and reset the timer.
    pub fn flush(&mut self) -> Vec<QueueMessage> {
        self.batch_started = None;
        self.positions.clear();
        std::mem::take(&mut self.buffer)
    }

    pub fn try_flush(&mut self) -> Option<Vec<QueueMessage>> {
        self.should_flush().then(|| self.flush())
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn event(id: &str, handle: &str, attempt: u32) -> QueueMessage {
        QueueMessage {
            id: id.to_string(),
            body: format!(r#"{{"id":"{id}"}}"#),
            receipt_handle: handle.to_string(),
            timestamp: Utc::now(),
            attempt_count: attempt,
        }
    }

    fn events(count: usize) -> Vec<QueueMessage> {
        (0..count).map(|i| event(&format!("evt-{i}"), &format!("h-{i}"), 1)).collect()
    }

    #[test]
    fn size_threshold_counts_distinct_messages() {
        let mut batcher = MicroBatcher::new(3, Duration::from_secs(60));
        batcher.push(events(2));
        assert_eq!(batcher.push(events(2)), 2);
        assert!(batcher.try_flush().is_none());

        batcher.push(vec![event("evt-9", "h-9", 1)]);
        assert_eq!(batcher.try_flush().map(|b| b.len()), Some(3));
        assert!(batcher.is_empty());
    }

    #[test]
    fn redelivery_keeps_position_and_takes_newest_handle() {
        let mut batcher = MicroBatcher::new(10, Duration::from_secs(60));
        batcher.push(vec![event("a", "a-1", 1), event("b", "b-1", 1)]);
        batcher.push(vec![event("a", "a-2", 2)]);

        let batch = batcher.flush();
        let ids: Vec<_> = batch.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, ["a", "b"]);
        assert_eq!(batch[0].receipt_handle, "a-2");
        assert_eq!(batch[0].attempt_count, 2);
    }

    #[test]
    fn from_config_uses_trigger_thresholds() {
        let mut queues = warden_core::Config::from_env().queues;
        queues.batch_max_messages = 2;
        queues.batch_max_wait_ms = 60_000;

        let mut batcher = MicroBatcher::from_config(&queues);
        batcher.push(events(1));
        assert!(!batcher.should_flush());
        batcher.push(vec![event("evt-7", "h-7", 1)]);
        assert!(batcher.should_flush());
    }

    #[tokio::test(start_paused = true)]
    async fn wait_threshold_starts_on_first_message() {
        let mut batcher = MicroBatcher::new(100, Duration::from_secs(2));
        batcher.push(vec![]);
        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(!batcher.should_flush());

        batcher.push(events(1));
        assert!(!batcher.should_flush());
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(batcher.should_flush());
    }

    #[test]
    fn flush_forgets_previous_ids() {
        let mut batcher = MicroBatcher::new(5, Duration::from_secs(60));
        batcher.push(events(3));
        assert_eq!(batcher.flush().len(), 3);
        assert!(!batcher.should_flush());

        // The same message after a flush belongs to the next batch.
        assert_eq!(batcher.push(events(1)), 0);
        assert_eq!(batcher.len(), 1);
    }
}
