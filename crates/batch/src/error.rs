//! Batch error types.

use std::time::Duration;

use thiserror::Error;

/// Outcome of a single remote call that did not complete.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CallError {
    /// Capacity, throttling or server-side failure; safe to retry.
    #[error("transient: {0}")]
    Transient(String),

    /// Anything else; retrying would not help.
    #[error("permanent: {0}")]
    Permanent(String),
}

impl CallError {
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    pub fn permanent(msg: impl Into<String>) -> Self {
        Self::Permanent(msg.into())
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Fatal failure of a whole batch operation.
#[derive(Debug, Error)]
pub enum BatchError {
    #[error("{operation} permanently failed ({succeeded} succeeded, {failed} failed): {reason}")]
    Permanent {
        operation: String,
        succeeded: usize,
        failed: usize,
        reason: String,
    },

    #[error("{operation} gave up after {elapsed:?} ({succeeded} succeeded, {failed} failed): {reason}")]
    Exhausted {
        operation: String,
        succeeded: usize,
        failed: usize,
        elapsed: Duration,
        reason: String,
    },
}

impl BatchError {
    /// Items confirmed written/sent before the failure.
    pub fn succeeded(&self) -> usize {
        match self {
            Self::Permanent { succeeded, .. } | Self::Exhausted { succeeded, .. } => *succeeded,
        }
    }

    /// Items that were never confirmed.
    pub fn failed(&self) -> usize {
        match self {
            Self::Permanent { failed, .. } | Self::Exhausted { failed, .. } => *failed,
        }
    }
}
