//! Stream producer configuration

use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};

/// Stream log settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Approximate cap on entries per topic; 0 disables trimming
    #[serde(default = "default_max_len")]
    pub max_len: usize,

    /// Prefix prepended to every topic when forming the store key
    #[serde(default)]
    pub key_prefix: String,

    /// Topic for aggregate types without a dedicated route
    #[serde(default = "default_topic")]
    pub default_topic: String,
}

impl StreamConfig {
    /// Trimming bound passed to the log store
    pub fn trim_len(&self) -> Option<usize> {
        (self.max_len > 0).then_some(self.max_len)
    }

    pub fn validate(&self) -> Result<()> {
        if self.default_topic.trim().is_empty() {
            return Err(AppError::Configuration(
                "stream.default_topic must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            max_len: default_max_len(),
            key_prefix: String::new(),
            default_topic: default_topic(),
        }
    }
}

fn default_max_len() -> usize {
    10_000
}

fn default_topic() -> String {
    "events".to_string()
}
