//! Error types for outbox operations

use crate::error::AppError;

/// Result type for outbox operations
pub type OutboxResult<T> = std::result::Result<T, OutboxError>;

/// Payload validation failures
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SchemaError {
    /// The payload does not match the registered schema
    #[error("Payload for {aggregate_type}/{event_type} does not match schema v{version}: {reason}")]
    Mismatch {
        aggregate_type: String,
        event_type: String,
        version: u32,
        reason: String,
    },

    /// The schema expects a JSON object
    #[error("Payload for {aggregate_type}/{event_type} is not a JSON object")]
    NotAnObject {
        aggregate_type: String,
        event_type: String,
    },
}

/// Errors raised by the outbox table and consumer
#[derive(Debug, thiserror::Error)]
pub enum OutboxError {
    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// No row with this id
    #[error("Outbox record {0} not found")]
    NotFound(i64),

    /// Payload rejected by the schema registry
    #[error(transparent)]
    Validation(#[from] SchemaError),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<sqlx::Error> for OutboxError {
    fn from(err: sqlx::Error) -> Self {
        OutboxError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for OutboxError {
    fn from(err: serde_json::Error) -> Self {
        OutboxError::Serialization(err.to_string())
    }
}

impl From<OutboxError> for AppError {
    fn from(err: OutboxError) -> Self {
        match err {
            OutboxError::Database(msg) => AppError::Database(msg),
            OutboxError::NotFound(id) => AppError::NotFound(format!("Outbox record {}", id)),
            OutboxError::Validation(e) => AppError::Validation(e.to_string()),
            OutboxError::Serialization(msg) => AppError::Serialization(msg),
        }
    }
}
