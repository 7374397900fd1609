//! Outbox relay: drains a transactional outbox table into a partitioned
//! stream log, with dead letter reprocessing and circuit breaking around
//! the stream log.

pub mod circuit_breaker;
pub mod config;
pub mod context;
pub mod dlq;
pub mod error;
pub mod metrics;
pub mod outbox;
pub mod stream;
pub mod telemetry;

pub use config::Config;
pub use context::{AppContext, RelaySnapshot, RelayTasks};
pub use error::{AppError, Result};
