//! Queue error types.

use thiserror::Error;
use warden_batch::BatchError;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("message parse error: {0}")]
    Parse(String),

    #[error("acknowledge error: {0}")]
    Ack(String),

    #[error("send failed: {0}")]
    Send(#[from] BatchError),

    #[error("provider error: {0}")]
    Provider(String),
}

impl From<serde_json::Error> for QueueError {
    fn from(e: serde_json::Error) -> Self {
        Self::Parse(e.to_string())
    }
}
