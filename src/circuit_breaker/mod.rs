//! Circuit breaker for isolating failures of unreliable dependencies.
//!
//! One breaker exists per protected dependency name. Breakers are created
//! lazily through a [`CircuitBreakerRegistry`] owned by the application
//! context, so independent dependencies fail in isolation.
//!
//! # Circuit Breaker States
//!
//! - **Closed**: Normal operation, requests pass through, failures are counted
//! - **Open**: Fast-fail mode, all requests are rejected immediately
//! - **Half-Open**: A bounded number of concurrent trial requests probe recovery
//!
//! Transitions are evaluated lazily on each call attempt; there is no
//! background timer.
//!
//! # Example
//!
//! ```no_run
//! use outbox_relay::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = CircuitBreakerConfig::builder()
//!         .failure_threshold(5)
//!         .recovery_timeout(std::time::Duration::from_secs(60))
//!         .build()?;
//!
//!     let breaker = CircuitBreaker::new("stream-log", config);
//!
//!     let result = breaker.call(|| Box::pin(async {
//!         Ok::<_, std::io::Error>(42)
//!     })).await;
//!
//!     Ok(())
//! }
//! ```

mod config;
mod core;
mod metrics;
mod registry;
mod state;

pub use config::{CircuitBreakerConfig, CircuitBreakerConfigBuilder};
pub use self::core::{CircuitBreaker, CircuitBreakerStats};
pub use metrics::{init_circuit_breaker_metrics, CIRCUIT_BREAKER_METRICS};
pub use registry::{CircuitBreakerRegistry, RegistryHealth, StateCount};
pub use state::{CircuitBreakerState, StateData, StateTransition};

use crate::error::AppError;

/// Result type for circuit breaker operations
pub type CircuitBreakerResult<T> = std::result::Result<T, CircuitBreakerError>;

/// Errors that can occur in circuit breaker operations
#[derive(Debug, thiserror::Error)]
pub enum CircuitBreakerError {
    /// Circuit is open and rejecting requests
    #[error("Circuit breaker is open for '{0}'")]
    Open(String),

    /// Circuit is half-open and all trial slots are taken
    #[error("Circuit breaker '{0}' is half-open and its trial call limit is exhausted")]
    HalfOpenLimitExceeded(String),

    /// Configuration is invalid
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Operation failed
    #[error("Operation failed: {0}")]
    OperationFailed(String),

    /// Circuit breaker not found in registry
    #[error("Circuit breaker '{0}' not found")]
    NotFound(String),
}

impl CircuitBreakerError {
    /// True when the breaker refused the call without invoking it
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            CircuitBreakerError::Open(_) | CircuitBreakerError::HalfOpenLimitExceeded(_)
        )
    }
}

impl From<CircuitBreakerError> for AppError {
    fn from(err: CircuitBreakerError) -> Self {
        match err {
            CircuitBreakerError::Open(name) | CircuitBreakerError::HalfOpenLimitExceeded(name) => {
                AppError::Unavailable(format!("Circuit breaker rejecting calls: {}", name))
            }
            CircuitBreakerError::InvalidConfig(msg) => AppError::Configuration(msg),
            CircuitBreakerError::OperationFailed(msg) => AppError::Internal(msg),
            CircuitBreakerError::NotFound(name) => {
                AppError::NotFound(format!("Circuit breaker: {}", name))
            }
        }
    }
}
