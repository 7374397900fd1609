use crate::circuit_breaker::CircuitBreakerConfig;
use crate::dlq::DlqConfig;
use crate::error::{AppError, Result};
use crate::outbox::OutboxConfig;
use crate::stream::StreamConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Environment variable naming an optional override file
pub const CONFIG_PATH_ENV: &str = "OUTBOX_RELAY_CONFIG";

pub const DEFAULT_CONFIG_PATH: &str = "config/outbox-relay.toml";

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Outbox poll loop
    #[serde(default)]
    pub outbox: OutboxConfig,

    /// Dead letter queue backoff, retention and alerts
    #[serde(default)]
    pub dlq: DlqConfig,

    /// Thresholds for every circuit breaker the relay creates
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerSettings,

    /// Stream log trimming and routing
    #[serde(default)]
    pub stream: StreamConfig,

    /// Storage backends
    #[serde(default)]
    pub state: StateConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Load configuration from the embedded defaults, an optional file and
    /// `OUTBOX_RELAY__*` environment variables, in increasing precedence
    pub fn load() -> std::result::Result<Self, config::ConfigError> {
        let config_path =
            std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(&config_path)
    }

    /// Same as [`Config::load`] with an explicit override file
    pub fn load_from(config_path: &str) -> std::result::Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::File::from_str(
                include_str!("../config/default.toml"),
                config::FileFormat::Toml,
            ))
            .add_source(config::File::with_name(config_path).required(false))
            .add_source(
                config::Environment::with_prefix("OUTBOX_RELAY")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    /// Load and validate
    pub fn load_validated() -> Result<Self> {
        let config = Self::load()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.outbox.validate()?;
        self.dlq.validate()?;
        self.circuit_breaker.to_breaker_config().validate()?;
        self.stream.validate()?;
        self.state.validate()?;
        Ok(())
    }
}

/// Circuit breaker thresholds as they appear in configuration files
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerSettings {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    #[serde(default = "default_recovery_timeout_secs")]
    pub recovery_timeout_secs: u64,

    #[serde(default = "default_half_open_max_calls")]
    pub half_open_max_calls: u32,

    #[serde(default = "default_latency_window_size")]
    pub latency_window_size: usize,
}

impl CircuitBreakerSettings {
    pub fn to_breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            recovery_timeout: Duration::from_secs(self.recovery_timeout_secs),
            half_open_max_calls: self.half_open_max_calls,
            latency_window_size: self.latency_window_size,
        }
    }
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            recovery_timeout_secs: default_recovery_timeout_secs(),
            half_open_max_calls: default_half_open_max_calls(),
            latency_window_size: default_latency_window_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateConfig {
    /// Storage backend type
    #[serde(default)]
    pub backend: StateBackend,

    /// PostgreSQL connection string for the outbox table
    pub database_url: Option<String>,

    /// Redis connection string for the stream log and DLQ
    pub redis_url: Option<String>,

    /// Database connection pool size
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
}

impl StateConfig {
    pub fn validate(&self) -> Result<()> {
        if self.pool_size == 0 {
            return Err(AppError::Configuration(
                "state.pool_size must be greater than 0".to_string(),
            ));
        }
        if self.backend == StateBackend::External {
            if self.database_url.is_none() {
                return Err(AppError::Configuration(
                    "state.database_url is required for the external backend".to_string(),
                ));
            }
            if self.redis_url.is_none() {
                return Err(AppError::Configuration(
                    "state.redis_url is required for the external backend".to_string(),
                ));
            }
        }
        Ok(())
    }
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            backend: StateBackend::default(),
            database_url: None,
            redis_url: None,
            pool_size: default_pool_size(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StateBackend {
    /// Process-local stores; nothing survives a restart
    #[default]
    InMemory,
    /// PostgreSQL outbox table, Redis stream log and Redis DLQ
    External,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default)]
    pub json_logs: bool,

    /// Service name
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// Enable Prometheus metrics
    #[serde(default = "default_true")]
    pub prometheus_enabled: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logs: false,
            service_name: default_service_name(),
            prometheus_enabled: true,
        }
    }
}

// Default value functions
fn default_failure_threshold() -> u32 {
    5
}

fn default_recovery_timeout_secs() -> u64 {
    60
}

fn default_half_open_max_calls() -> u32 {
    3
}

fn default_latency_window_size() -> usize {
    100
}

fn default_pool_size() -> u32 {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_service_name() -> String {
    "outbox-relay".to_string()
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedded_defaults_match_code_defaults() {
        let config: Config = config::Config::builder()
            .add_source(config::File::from_str(
                include_str!("../config/default.toml"),
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.outbox.poll_interval_ms, 100);
        assert_eq!(config.outbox.batch_size, 50);
        assert_eq!(config.outbox.max_retries, 3);
        assert_eq!(config.dlq.initial_delay_secs, 60);
        assert_eq!(config.dlq.max_delay_secs, 3600);
        assert_eq!(config.dlq.manual_intervention_threshold, 5);
        assert_eq!(config.dlq.retention_days, 7);
        assert_eq!(config.circuit_breaker.failure_threshold, 5);
        assert_eq!(config.circuit_breaker.recovery_timeout_secs, 60);
        assert_eq!(config.circuit_breaker.half_open_max_calls, 3);
        assert_eq!(config.stream.default_topic, "events");
        assert_eq!(config.state.backend, StateBackend::InMemory);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_sources_fall_back_to_defaults() {
        let config: Config = config::Config::builder()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert_eq!(config.outbox.batch_size, 50);
        assert_eq!(config.observability.service_name, "outbox-relay");
    }

    #[test]
    fn test_external_backend_requires_urls() {
        let state = StateConfig {
            backend: StateBackend::External,
            database_url: Some("postgres://localhost/outbox".to_string()),
            ..Default::default()
        };
        assert!(matches!(state.validate(), Err(AppError::Configuration(_))));
    }

    #[test]
    fn test_breaker_settings_conversion() {
        let settings = CircuitBreakerSettings {
            recovery_timeout_secs: 15,
            ..Default::default()
        };
        let config = settings.to_breaker_config();
        assert_eq!(config.recovery_timeout, Duration::from_secs(15));
        assert_eq!(config.failure_threshold, 5);
    }
}
