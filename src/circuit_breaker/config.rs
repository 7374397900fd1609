//! Circuit breaker configuration with builder pattern.

use crate::circuit_breaker::CircuitBreakerError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for a circuit breaker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures before opening the circuit
    pub failure_threshold: u32,

    /// Time to stay open before admitting trial calls
    pub recovery_timeout: Duration,

    /// Maximum number of concurrent trial calls while half-open; this many
    /// consecutive successes close the circuit again
    pub half_open_max_calls: u32,

    /// Capacity of the rolling latency window
    pub latency_window_size: usize,
}

impl CircuitBreakerConfig {
    /// Create a new builder for CircuitBreakerConfig
    pub fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder::default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), CircuitBreakerError> {
        if self.failure_threshold == 0 {
            return Err(CircuitBreakerError::InvalidConfig(
                "failure_threshold must be greater than 0".to_string(),
            ));
        }

        if self.recovery_timeout.is_zero() {
            return Err(CircuitBreakerError::InvalidConfig(
                "recovery_timeout must be greater than 0".to_string(),
            ));
        }

        if self.half_open_max_calls == 0 {
            return Err(CircuitBreakerError::InvalidConfig(
                "half_open_max_calls must be greater than 0".to_string(),
            ));
        }

        if self.latency_window_size == 0 {
            return Err(CircuitBreakerError::InvalidConfig(
                "latency_window_size must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            half_open_max_calls: 3,
            latency_window_size: 100,
        }
    }
}

/// Builder for CircuitBreakerConfig with fluent API
#[derive(Debug, Clone, Default)]
pub struct CircuitBreakerConfigBuilder {
    failure_threshold: Option<u32>,
    recovery_timeout: Option<Duration>,
    half_open_max_calls: Option<u32>,
    latency_window_size: Option<usize>,
}

impl CircuitBreakerConfigBuilder {
    /// Set the failure threshold
    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = Some(threshold);
        self
    }

    /// Set the recovery timeout
    pub fn recovery_timeout(mut self, duration: Duration) -> Self {
        self.recovery_timeout = Some(duration);
        self
    }

    /// Set the maximum concurrent trial calls in half-open state
    pub fn half_open_max_calls(mut self, max: u32) -> Self {
        self.half_open_max_calls = Some(max);
        self
    }

    /// Set the latency window capacity
    pub fn latency_window_size(mut self, size: usize) -> Self {
        self.latency_window_size = Some(size);
        self
    }

    /// Build the configuration
    pub fn build(self) -> Result<CircuitBreakerConfig, CircuitBreakerError> {
        let default = CircuitBreakerConfig::default();

        let config = CircuitBreakerConfig {
            failure_threshold: self.failure_threshold.unwrap_or(default.failure_threshold),
            recovery_timeout: self.recovery_timeout.unwrap_or(default.recovery_timeout),
            half_open_max_calls: self
                .half_open_max_calls
                .unwrap_or(default.half_open_max_calls),
            latency_window_size: self
                .latency_window_size
                .unwrap_or(default.latency_window_size),
        };

        config.validate()?;
        Ok(config)
    }
}

/// Predefined configurations for the dependencies this relay talks to
impl CircuitBreakerConfig {
    /// Configuration for the stream log (moderate tolerance, quick probing)
    pub fn for_stream_log() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
            half_open_max_calls: 3,
            latency_window_size: 100,
        }
    }

    /// Configuration for the outbox database (higher tolerance)
    pub fn for_database() -> Self {
        Self {
            failure_threshold: 10,
            recovery_timeout: Duration::from_secs(10),
            half_open_max_calls: 5,
            latency_window_size: 100,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CircuitBreakerConfig::default();
        assert_eq!(config.failure_threshold, 5);
        assert_eq!(config.recovery_timeout, Duration::from_secs(60));
        assert_eq!(config.half_open_max_calls, 3);
        assert_eq!(config.latency_window_size, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = CircuitBreakerConfig::builder()
            .failure_threshold(10)
            .half_open_max_calls(2)
            .recovery_timeout(Duration::from_secs(30))
            .build()
            .unwrap();

        assert_eq!(config.failure_threshold, 10);
        assert_eq!(config.half_open_max_calls, 2);
        assert_eq!(config.recovery_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_builder_with_defaults() {
        let config = CircuitBreakerConfig::builder()
            .failure_threshold(7)
            .build()
            .unwrap();

        assert_eq!(config.failure_threshold, 7);
        assert_eq!(config.half_open_max_calls, 3); // default
    }

    #[test]
    fn test_invalid_config_zero_failure_threshold() {
        let result = CircuitBreakerConfig::builder()
            .failure_threshold(0)
            .build();

        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_config_zero_recovery_timeout() {
        let result = CircuitBreakerConfig::builder()
            .recovery_timeout(Duration::ZERO)
            .build();

        assert!(matches!(result, Err(CircuitBreakerError::InvalidConfig(_))));
    }

    #[test]
    fn test_predefined_configs() {
        assert!(CircuitBreakerConfig::for_stream_log().validate().is_ok());
        assert!(CircuitBreakerConfig::for_database().validate().is_ok());
    }
}
