//! Registry owning one circuit breaker per dependency name.

use crate::circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitBreakerResult,
    CircuitBreakerState, CircuitBreakerStats,
};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Registry of circuit breakers keyed by dependency name.
///
/// Owned by the application context rather than stored in a global.
pub struct CircuitBreakerRegistry {
    /// Map of circuit breaker name to instance
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    /// Thresholds used when a breaker is created without explicit config
    default_config: CircuitBreakerConfig,
}

impl CircuitBreakerRegistry {
    /// Create a new registry using the stock defaults for lazily created breakers
    pub fn new() -> Self {
        Self::with_default_config(CircuitBreakerConfig::default())
    }

    /// Create a new registry with custom defaults for lazily created breakers
    pub fn with_default_config(default_config: CircuitBreakerConfig) -> Self {
        Self {
            breakers: DashMap::new(),
            default_config,
        }
    }

    /// Thresholds applied by [`CircuitBreakerRegistry::get_or_default`]
    pub fn default_config(&self) -> &CircuitBreakerConfig {
        &self.default_config
    }

    /// Get or create a circuit breaker with the given name and config
    pub fn get_or_create(
        &self,
        name: impl Into<String>,
        config: CircuitBreakerConfig,
    ) -> Arc<CircuitBreaker> {
        let name = name.into();

        self.breakers
            .entry(name.clone())
            .or_insert_with(|| {
                info!(name = %name, "Creating new circuit breaker in registry");
                Arc::new(CircuitBreaker::new(name.clone(), config))
            })
            .clone()
    }

    /// Get or create a circuit breaker using the registry defaults
    pub fn get_or_default(&self, name: impl Into<String>) -> Arc<CircuitBreaker> {
        self.get_or_create(name, self.default_config.clone())
    }

    /// Get an existing circuit breaker by name
    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(name).map(|entry| entry.value().clone())
    }

    /// Get an existing circuit breaker, failing if it was never created
    pub fn require(&self, name: &str) -> CircuitBreakerResult<Arc<CircuitBreaker>> {
        self.get(name)
            .ok_or_else(|| CircuitBreakerError::NotFound(name.to_string()))
    }

    /// Remove a circuit breaker from the registry
    pub fn remove(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        debug!(name = %name, "Removing circuit breaker from registry");
        self.breakers.remove(name).map(|(_, breaker)| breaker)
    }

    /// Get all circuit breaker names
    pub fn list_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.breakers.iter().map(|entry| entry.key().clone()).collect();
        names.sort();
        names
    }

    /// Get statistics for all circuit breakers
    pub fn get_all_stats(&self) -> Vec<CircuitBreakerStats> {
        let mut stats: Vec<CircuitBreakerStats> = self
            .breakers
            .iter()
            .map(|entry| entry.value().stats())
            .collect();
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        stats
    }

    /// Reset all circuit breakers to closed state
    pub fn reset_all(&self) {
        info!("Resetting all circuit breakers");
        for entry in self.breakers.iter() {
            entry.value().reset();
        }
    }

    /// Get count of circuit breakers in each state
    pub fn get_state_counts(&self) -> StateCount {
        let mut counts = StateCount::default();

        for entry in self.breakers.iter() {
            match entry.value().state() {
                CircuitBreakerState::Closed => counts.closed += 1,
                CircuitBreakerState::Open => counts.open += 1,
                CircuitBreakerState::HalfOpen => counts.half_open += 1,
            }
        }

        counts
    }

    /// Check if any circuit breakers are open
    pub fn has_open_circuits(&self) -> bool {
        self.breakers
            .iter()
            .any(|entry| entry.value().state() == CircuitBreakerState::Open)
    }

    /// Get health check information
    pub fn health_check(&self) -> RegistryHealth {
        let state_counts = self.get_state_counts();

        RegistryHealth {
            total_breakers: state_counts.total(),
            closed: state_counts.closed,
            open: state_counts.open,
            half_open: state_counts.half_open,
            healthy: state_counts.open == 0,
        }
    }

    /// Get the total number of circuit breakers
    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    /// Check if the registry is empty
    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Count of circuit breakers in each state
#[derive(Debug, Clone, Default)]
pub struct StateCount {
    pub closed: usize,
    pub open: usize,
    pub half_open: usize,
}

impl StateCount {
    pub fn total(&self) -> usize {
        self.closed + self.open + self.half_open
    }
}

/// Health information for the circuit breaker registry
#[derive(Debug, Clone, serde::Serialize)]
pub struct RegistryHealth {
    pub total_breakers: usize,
    pub closed: usize,
    pub open: usize,
    pub half_open: usize,
    pub healthy: bool,
}
