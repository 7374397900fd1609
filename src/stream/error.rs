//! Error types for stream log operations

use crate::error::AppError;

/// Result type for stream operations
pub type StreamResult<T> = std::result::Result<T, StreamError>;

/// Errors that can occur while appending to or reading from the stream log
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// Connection to the log store failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Append was refused or lost
    #[error("Publish failed: {0}")]
    PublishFailed(String),

    /// Range or length query failed
    #[error("Read failed: {0}")]
    ReadFailed(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// A stored entry does not carry the expected fields
    #[error("Invalid message format: {0}")]
    InvalidMessage(String),

    /// The breaker protecting the log store rejected the call
    #[error("Circuit open for '{0}'")]
    CircuitOpen(String),
}

impl StreamError {
    /// True when the log store was never reached
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, StreamError::CircuitOpen(_))
    }
}

impl From<serde_json::Error> for StreamError {
    fn from(err: serde_json::Error) -> Self {
        StreamError::SerializationError(err.to_string())
    }
}

impl From<redis::RedisError> for StreamError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_connection_dropped() || err.is_connection_refusal() || err.is_timeout() {
            StreamError::ConnectionFailed(err.to_string())
        } else {
            StreamError::ReadFailed(err.to_string())
        }
    }
}

impl From<StreamError> for AppError {
    fn from(err: StreamError) -> Self {
        match err {
            StreamError::ConnectionFailed(msg)
            | StreamError::PublishFailed(msg)
            | StreamError::ReadFailed(msg) => AppError::Network(msg),
            StreamError::SerializationError(msg) => AppError::Serialization(msg),
            StreamError::InvalidMessage(msg) => AppError::Validation(msg),
            StreamError::CircuitOpen(name) => {
                AppError::Unavailable(format!("Stream log circuit open: {}", name))
            }
        }
    }
}
