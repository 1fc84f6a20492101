use thiserror::Error;
use warden_batch::BatchError;
use warden_core::WardenError;

#[derive(Debug, Error)]
pub enum ComplianceError {
    #[error("database error: {0}")]
    Database(String),

    #[error(transparent)]
    Batch(#[from] BatchError),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("corrupt record {resource_id}/{policy_id}: {reason}")]
    CorruptRecord {
        resource_id: String,
        policy_id: String,
        reason: String,
    },

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl From<sqlx::Error> for ComplianceError {
    fn from(e: sqlx::Error) -> Self {
        Self::Database(e.to_string())
    }
}

impl From<ComplianceError> for WardenError {
    fn from(e: ComplianceError) -> Self {
        WardenError::Other(e.to_string())
    }
}
