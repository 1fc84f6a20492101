//! Sending side of a work queue.

use async_trait::async_trait;
use serde::Serialize;

use crate::error::QueueError;

/// A message to enqueue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub body: String,
    /// Seconds the message stays invisible after it is sent.
    pub delay_seconds: u32,
}

impl OutboundMessage {
    pub fn new(body: impl Into<String>) -> Self {
        Self { body: body.into(), delay_seconds: 0 }
    }

    /// Serialize `value` as the JSON body.
    pub fn json<T: Serialize>(value: &T) -> Result<Self, QueueError> {
        Ok(Self::new(serde_json::to_string(value)?))
    }

    pub fn with_delay(mut self, delay_seconds: u32) -> Self {
        self.delay_seconds = delay_seconds;
        self
    }

    /// Size counted against the per-call payload cap.
    pub fn payload_size(&self) -> usize {
        self.body.len()
    }
}

/// Anything messages can be sent to in bulk.
#[async_trait]
pub trait MessageSink: Send + Sync {
    /// Send every message, or fail reporting how many went through.
    async fn send_batch(&self, messages: Vec<OutboundMessage>) -> Result<(), QueueError>;
}
