//! Receiving side of a work queue.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::QueueError;

/// A raw message received from a queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueMessage {
    /// Provider message identifier.
    pub id: String,
    /// Raw message body (JSON change event or alert candidate).
    pub body: String,
    /// Handle used to ack or nack this delivery.
    pub receipt_handle: String,
    /// When the message was sent to the queue.
    pub timestamp: DateTime<Utc>,
    /// Delivery attempt, starting at 1. Redeliveries increment it.
    pub attempt_count: u32,
}

/// Health status of a queue connection.
#[derive(Debug, Clone, Serialize)]
pub struct QueueHealth {
    pub connected: bool,
    pub approximate_message_count: Option<u64>,
    /// Backend name ("sqs", "memory").
    pub provider: String,
}

impl fmt::Display for QueueHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "QueueHealth {{ connected: {}, messages: {:?}, provider: {} }}",
            self.connected, self.approximate_message_count, self.provider
        )
    }
}

/// A queue that delivers messages at least once.
///
/// A message stays invisible after `poll_batch` until it is acked (deleted)
/// or nacked (made visible again). Unacked messages reappear once the
/// provider's visibility timeout passes, so every handler downstream must be
/// safe to run twice on the same body.
#[async_trait]
pub trait QueueConsumer: Send + Sync {
    /// Receive up to `max_messages`. Returns an empty vec when idle.
    async fn poll_batch(&self, max_messages: u32) -> Result<Vec<QueueMessage>, QueueError>;

    /// Processing succeeded; remove the message.
    async fn ack(&self, receipt_handle: &str) -> Result<(), QueueError>;

    /// Processing failed; make the message visible for redelivery now.
    async fn nack(&self, receipt_handle: &str) -> Result<(), QueueError>;

    async fn health_check(&self) -> Result<QueueHealth, QueueError>;

    /// Approximate depth of the dead-letter queue, if one is attached.
    async fn dlq_depth(&self) -> Result<Option<u64>, QueueError> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_message_serde_roundtrip() {
        let msg = QueueMessage {
            id: "msg-123".to_string(),
            body: r#"{"id":"r1","type":"AWS.S3.Bucket","attributes":{}}"#.to_string(),
            receipt_handle: "handle-abc".to_string(),
            timestamp: Utc::now(),
            attempt_count: 2,
        };

        let json = serde_json::to_string(&msg).unwrap();
        let deserialized: QueueMessage = serde_json::from_str(&json).unwrap();

        assert_eq!(msg.body, deserialized.body);
        assert_eq!(msg.receipt_handle, deserialized.receipt_handle);
        assert_eq!(deserialized.attempt_count, 2);
    }

    #[test]
    fn test_queue_health_display() {
        let health = QueueHealth {
            connected: true,
            approximate_message_count: Some(42),
            provider: "memory".to_string(),
        };
        let display = health.to_string();
        assert!(display.contains("connected: true"));
        assert!(display.contains("42"));
        assert!(display.contains("memory"));
    }
}
