use thiserror::Error;
use warden_compliance::ComplianceError;
use warden_core::WardenError;
use warden_queue::QueueError;

#[derive(Error, Debug)]
pub enum TriggerError {
    /// The policy or resource inventory could not be read.
    #[error("Inventory error: {0}")]
    Inventory(#[from] WardenError),

    /// The evaluation function failed; the whole batch is abandoned.
    #[error("Policy evaluation failed: {0}")]
    Evaluation(String),

    #[error("Compliance store error: {0}")]
    Compliance(#[from] ComplianceError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),
}
