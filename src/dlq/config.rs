//! Dead letter queue configuration

use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Backoff, retention and alert thresholds for the DLQ
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DlqConfig {
    /// Backoff before the first reprocess attempt is repeated
    #[serde(default = "default_initial_delay_secs")]
    pub initial_delay_secs: u64,

    /// Upper bound on the backoff window
    #[serde(default = "default_max_delay_secs")]
    pub max_delay_secs: u64,

    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Failed reprocess attempts after which an entry needs an operator
    #[serde(default = "default_manual_intervention_threshold")]
    pub manual_intervention_threshold: u32,

    /// Age after which active entries expire into the audit list
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    /// Age after which audit records are purged
    #[serde(default = "default_audit_retention_days")]
    pub audit_retention_days: u32,

    #[serde(default = "default_reprocess_interval_secs")]
    pub reprocess_interval_secs: u64,

    #[serde(default = "default_reprocess_batch_size")]
    pub reprocess_batch_size: usize,

    #[serde(default = "default_alert_max_active_entries")]
    pub alert_max_active_entries: u64,

    #[serde(default = "default_alert_max_age_hours")]
    pub alert_max_age_hours: u64,

    #[serde(default = "default_alert_max_failure_rate")]
    pub alert_max_failure_rate: f64,
}

impl DlqConfig {
    /// Backoff window after `attempts` failed reprocess attempts
    pub fn backoff(&self, attempts: u32) -> Duration {
        let initial = self.initial_delay_secs as f64;
        let cap = self.max_delay_secs as f64;
        let exponent = i32::try_from(attempts).unwrap_or(i32::MAX);
        let secs = (initial * self.backoff_multiplier.powi(exponent)).min(cap);
        Duration::from_secs_f64(secs.max(0.0))
    }

    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.retention_days))
    }

    pub fn reprocess_interval(&self) -> Duration {
        Duration::from_secs(self.reprocess_interval_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.initial_delay_secs == 0 {
            return Err(AppError::Configuration(
                "dlq.initial_delay_secs must be greater than 0".to_string(),
            ));
        }
        if self.max_delay_secs < self.initial_delay_secs {
            return Err(AppError::Configuration(
                "dlq.max_delay_secs must not be smaller than dlq.initial_delay_secs".to_string(),
            ));
        }
        if !(self.backoff_multiplier >= 1.0) {
            return Err(AppError::Configuration(
                "dlq.backoff_multiplier must be at least 1.0".to_string(),
            ));
        }
        if self.manual_intervention_threshold == 0 {
            return Err(AppError::Configuration(
                "dlq.manual_intervention_threshold must be greater than 0".to_string(),
            ));
        }
        if self.retention_days == 0 || self.audit_retention_days == 0 {
            return Err(AppError::Configuration(
                "dlq retention windows must be greater than 0".to_string(),
            ));
        }
        if self.reprocess_interval_secs == 0 || self.reprocess_batch_size == 0 {
            return Err(AppError::Configuration(
                "dlq reprocess interval and batch size must be greater than 0".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.alert_max_failure_rate) {
            return Err(AppError::Configuration(
                "dlq.alert_max_failure_rate must be within [0, 1]".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for DlqConfig {
    fn default() -> Self {
        Self {
            initial_delay_secs: default_initial_delay_secs(),
            max_delay_secs: default_max_delay_secs(),
            backoff_multiplier: default_backoff_multiplier(),
            manual_intervention_threshold: default_manual_intervention_threshold(),
            retention_days: default_retention_days(),
            audit_retention_days: default_audit_retention_days(),
            reprocess_interval_secs: default_reprocess_interval_secs(),
            reprocess_batch_size: default_reprocess_batch_size(),
            alert_max_active_entries: default_alert_max_active_entries(),
            alert_max_age_hours: default_alert_max_age_hours(),
            alert_max_failure_rate: default_alert_max_failure_rate(),
        }
    }
}

fn default_initial_delay_secs() -> u64 {
    60
}

fn default_max_delay_secs() -> u64 {
    3600
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_manual_intervention_threshold() -> u32 {
    5
}

fn default_retention_days() -> u32 {
    7
}

fn default_audit_retention_days() -> u32 {
    30
}

fn default_reprocess_interval_secs() -> u64 {
    30
}

fn default_reprocess_batch_size() -> usize {
    100
}

fn default_alert_max_active_entries() -> u64 {
    100
}

fn default_alert_max_age_hours() -> u64 {
    24
}

fn default_alert_max_failure_rate() -> f64 {
    0.10
}
