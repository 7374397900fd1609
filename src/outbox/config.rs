//! Outbox consumer configuration

use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Poll loop settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxConfig {
    /// Pause between poll cycles in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Maximum rows fetched per cycle
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Failed attempts after which a row is handed to the DLQ
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl OutboxConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(AppError::Configuration(
                "outbox.poll_interval_ms must be greater than 0".to_string(),
            ));
        }
        if self.batch_size == 0 {
            return Err(AppError::Configuration(
                "outbox.batch_size must be greater than 0".to_string(),
            ));
        }
        if self.max_retries == 0 {
            return Err(AppError::Configuration(
                "outbox.max_retries must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
        }
    }
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_batch_size() -> usize {
    50
}

fn default_max_retries() -> u32 {
    3
}
