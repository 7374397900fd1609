//! Core circuit breaker implementation with async support.

use crate::circuit_breaker::metrics::CIRCUIT_BREAKER_METRICS;
use crate::circuit_breaker::{
    CircuitBreakerConfig, CircuitBreakerError, CircuitBreakerResult, CircuitBreakerState,
    StateData, StateTransition,
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// A thread-safe, async circuit breaker
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    /// Unique name for this circuit breaker
    name: String,
    /// Configuration
    config: CircuitBreakerConfig,
    /// State, counters and latency window; the only lock a breaker holds
    state: Arc<Mutex<StateData>>,
}

/// Holds one half-open trial slot; releases it when the call finishes or is dropped.
struct TrialPermit {
    state: Arc<Mutex<StateData>>,
    generation: u64,
}

impl Drop for TrialPermit {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        // A transition since admission already cleared the slot count.
        if state.transition_count == self.generation && state.half_open_in_flight > 0 {
            state.half_open_in_flight -= 1;
        }
    }
}

impl CircuitBreaker {
    /// Create a new circuit breaker
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let name = name.into();
        info!(
            name = %name,
            config = ?config,
            "Creating new circuit breaker"
        );

        let state = StateData::new(config.latency_window_size);
        Self {
            name,
            config,
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Get the name of this circuit breaker
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the current state
    pub fn state(&self) -> CircuitBreakerState {
        self.state.lock().state
    }

    /// Get the current configuration
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Execute an async operation protected by the circuit breaker.
    ///
    /// While open the operation is never invoked. While half-open at most
    /// `half_open_max_calls` trial operations run concurrently. The breaker
    /// does not enforce a timeout on the operation itself.
    pub async fn call<F, T, E>(&self, f: F) -> CircuitBreakerResult<T>
    where
        F: FnOnce() -> Pin<Box<dyn Future<Output = Result<T, E>> + Send>> + Send,
        E: std::error::Error + Send + 'static,
    {
        let _permit = self.admit()?;

        CIRCUIT_BREAKER_METRICS
            .calls_total
            .with_label_values(&[&self.name, "allowed"])
            .inc();

        let start = Instant::now();
        let result = f().await;
        let duration = start.elapsed();

        CIRCUIT_BREAKER_METRICS
            .call_duration
            .with_label_values(&[&self.name])
            .observe(duration.as_secs_f64());

        match result {
            Ok(value) => {
                self.on_success(duration);
                CIRCUIT_BREAKER_METRICS
                    .successful_calls
                    .with_label_values(&[&self.name])
                    .inc();
                Ok(value)
            }
            Err(err) => {
                self.on_failure(duration);
                CIRCUIT_BREAKER_METRICS
                    .failed_calls
                    .with_label_values(&[&self.name])
                    .inc();
                Err(CircuitBreakerError::OperationFailed(err.to_string()))
            }
        }
    }

    /// Execute an async operation, falling back when the breaker rejects the call
    pub async fn call_with_fallback<F, FB, T, E>(
        &self,
        f: F,
        fallback: FB,
    ) -> CircuitBreakerResult<T>
    where
        F: FnOnce() -> Pin<Box<dyn Future<Output = Result<T, E>> + Send>> + Send,
        FB: FnOnce() -> Pin<Box<dyn Future<Output = T> + Send>> + Send,
        E: std::error::Error + Send + 'static,
    {
        match self.call(f).await {
            Ok(value) => Ok(value),
            Err(err) if err.is_rejection() => {
                debug!(
                    name = %self.name,
                    error = %err,
                    "Circuit breaker rejected call, using fallback"
                );
                Ok(fallback().await)
            }
            Err(err) => Err(err),
        }
    }

    /// Decide whether a call may proceed, applying the lazy Open -> HalfOpen transition
    fn admit(&self) -> CircuitBreakerResult<Option<TrialPermit>> {
        let mut state = self.state.lock();
        state.total_calls += 1;

        if state.should_attempt_reset(self.config.recovery_timeout) {
            let transition = state.transition_to(CircuitBreakerState::HalfOpen);
            self.log_transition(&transition);
        }

        match state.state {
            CircuitBreakerState::Closed => Ok(None),
            CircuitBreakerState::Open => {
                state.rejected_calls += 1;
                CIRCUIT_BREAKER_METRICS
                    .rejected_calls
                    .with_label_values(&[&self.name, "open"])
                    .inc();
                Err(CircuitBreakerError::Open(self.name.clone()))
            }
            CircuitBreakerState::HalfOpen => {
                if state.half_open_in_flight >= self.config.half_open_max_calls {
                    state.rejected_calls += 1;
                    CIRCUIT_BREAKER_METRICS
                        .rejected_calls
                        .with_label_values(&[&self.name, "half_open_limit"])
                        .inc();
                    Err(CircuitBreakerError::HalfOpenLimitExceeded(self.name.clone()))
                } else {
                    state.half_open_in_flight += 1;
                    Ok(Some(TrialPermit {
                        state: Arc::clone(&self.state),
                        generation: state.transition_count,
                    }))
                }
            }
        }
    }

    /// Handle successful operation
    fn on_success(&self, latency: Duration) {
        let mut state = self.state.lock();
        state.record_success(latency);

        debug!(
            name = %self.name,
            current_state = %state.state,
            consecutive_successes = state.consecutive_successes,
            "Operation succeeded"
        );

        if state.state == CircuitBreakerState::HalfOpen
            && state.consecutive_successes >= self.config.half_open_max_calls
        {
            let transition = state.transition_to(CircuitBreakerState::Closed);
            self.log_transition(&transition);
        }
    }

    /// Handle failed operation
    fn on_failure(&self, latency: Duration) {
        let mut state = self.state.lock();
        state.record_failure(latency);

        warn!(
            name = %self.name,
            current_state = %state.state,
            consecutive_failures = state.consecutive_failures,
            "Operation failed"
        );

        match state.state {
            CircuitBreakerState::Closed
                if state.consecutive_failures >= self.config.failure_threshold =>
            {
                let transition = state.transition_to(CircuitBreakerState::Open);
                self.log_transition(&transition);
            }
            CircuitBreakerState::HalfOpen => {
                let transition = state.transition_to(CircuitBreakerState::Open);
                self.log_transition(&transition);
            }
            _ => {}
        }
    }

    /// Log and record state transition
    fn log_transition(&self, transition: &StateTransition) {
        info!(
            name = %self.name,
            from = %transition.from,
            to = %transition.to,
            reason = %transition.reason,
            "Circuit breaker state transition"
        );

        CIRCUIT_BREAKER_METRICS
            .state
            .with_label_values(&[&self.name])
            .set(transition.to.to_metric_value());

        CIRCUIT_BREAKER_METRICS
            .state_transitions
            .with_label_values(&[&self.name, &transition.from.to_string(), &transition.to.to_string()])
            .inc();
    }

    /// Get statistics for this circuit breaker
    pub fn stats(&self) -> CircuitBreakerStats {
        let state = self.state.lock();
        CircuitBreakerStats {
            name: self.name.clone(),
            state: state.state,
            consecutive_failures: state.consecutive_failures,
            consecutive_successes: state.consecutive_successes,
            transition_count: state.transition_count,
            last_state_change: state.last_state_change,
            total_calls: state.total_calls,
            successful_calls: state.successful_calls,
            failed_calls: state.failed_calls,
            rejected_calls: state.rejected_calls,
            half_open_in_flight: state.half_open_in_flight,
            average_latency_ms: state
                .average_latency()
                .map(|latency| latency.as_secs_f64() * 1000.0),
        }
    }

    /// Force the circuit breaker to closed state with all counters zeroed
    pub fn reset(&self) {
        let mut state = self.state.lock();
        if let Some(transition) = state.reset() {
            self.log_transition(&transition);
        }
    }

    /// Force the circuit breaker to open state regardless of counters
    pub fn force_open(&self) {
        let mut state = self.state.lock();
        if state.state != CircuitBreakerState::Open {
            let transition = state.transition_to(CircuitBreakerState::Open);
            self.log_transition(&transition);
        }
    }
}

/// Statistics for a circuit breaker
#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerStats {
    pub name: String,
    pub state: CircuitBreakerState,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub transition_count: u64,
    pub last_state_change: DateTime<Utc>,
    pub total_calls: u64,
    pub successful_calls: u64,
    pub failed_calls: u64,
    pub rejected_calls: u64,
    pub half_open_in_flight: u32,
    pub average_latency_ms: Option<f64>,
}
