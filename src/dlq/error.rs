//! Error types for the dead letter queue

use crate::error::AppError;
use crate::outbox::OutboxError;

/// Result type for DLQ operations
pub type DlqResult<T> = std::result::Result<T, DlqError>;

/// Errors raised by DLQ persistence and management
#[derive(Debug, thiserror::Error)]
pub enum DlqError {
    /// Backing store failed
    #[error("DLQ storage error: {0}")]
    Storage(String),

    /// Entry could not be encoded or decoded
    #[error("DLQ serialization error: {0}")]
    Serialization(String),

    /// The outbox table rejected a redelivery reset
    #[error("Outbox error during DLQ operation: {0}")]
    Outbox(#[from] OutboxError),
}

impl From<redis::RedisError> for DlqError {
    fn from(err: redis::RedisError) -> Self {
        DlqError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for DlqError {
    fn from(err: serde_json::Error) -> Self {
        DlqError::Serialization(err.to_string())
    }
}

impl From<DlqError> for AppError {
    fn from(err: DlqError) -> Self {
        match err {
            DlqError::Storage(msg) => AppError::Database(msg),
            DlqError::Serialization(msg) => AppError::Serialization(msg),
            DlqError::Outbox(e) => e.into(),
        }
    }
}
