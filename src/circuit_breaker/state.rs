//! Circuit breaker state machine implementation.
//!
//! This module handles state transitions, counters and the rolling latency
//! window. Everything here is mutated behind the breaker's single mutex.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

/// The current state of a circuit breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitBreakerState {
    /// Circuit is closed - requests are allowed through, failures are counted
    Closed,
    /// Circuit is open - all requests are rejected, waiting for recovery timeout
    Open,
    /// Circuit is half-open - testing recovery with limited requests
    HalfOpen,
}

impl CircuitBreakerState {
    /// Convert state to numeric value for Prometheus gauge
    pub fn to_metric_value(&self) -> f64 {
        match self {
            CircuitBreakerState::Closed => 0.0,
            CircuitBreakerState::Open => 1.0,
            CircuitBreakerState::HalfOpen => 2.0,
        }
    }

    /// Check if requests may be admitted in this state
    pub fn allows_requests(&self) -> bool {
        matches!(self, CircuitBreakerState::Closed | CircuitBreakerState::HalfOpen)
    }
}

impl fmt::Display for CircuitBreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitBreakerState::Closed => write!(f, "closed"),
            CircuitBreakerState::Open => write!(f, "open"),
            CircuitBreakerState::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Represents a state transition in the circuit breaker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    /// Previous state
    pub from: CircuitBreakerState,
    /// New state
    pub to: CircuitBreakerState,
    /// When the transition occurred
    pub timestamp: DateTime<Utc>,
    /// Reason for the transition
    pub reason: String,
}

impl StateTransition {
    /// Create a new state transition
    pub fn new(from: CircuitBreakerState, to: CircuitBreakerState, reason: String) -> Self {
        Self {
            from,
            to,
            timestamp: Utc::now(),
            reason,
        }
    }
}

/// Internal state data for the circuit breaker
#[derive(Debug, Clone)]
pub struct StateData {
    /// Current state
    pub state: CircuitBreakerState,
    /// Number of consecutive failures
    pub consecutive_failures: u32,
    /// Number of consecutive successes
    pub consecutive_successes: u32,
    /// When the state was last changed (wall clock, for reporting)
    pub last_state_change: DateTime<Utc>,
    /// When the state was last changed (monotonic, for timeouts)
    pub state_entered_at: Instant,
    /// Total number of state transitions
    pub transition_count: u64,
    /// Trial calls currently executing while half-open
    pub half_open_in_flight: u32,
    /// Every call attempt, including rejected ones
    pub total_calls: u64,
    pub successful_calls: u64,
    pub failed_calls: u64,
    pub rejected_calls: u64,
    latencies: VecDeque<Duration>,
    latency_capacity: usize,
}

impl StateData {
    /// Create new state data in Closed state
    pub fn new(latency_capacity: usize) -> Self {
        Self {
            state: CircuitBreakerState::Closed,
            consecutive_failures: 0,
            consecutive_successes: 0,
            last_state_change: Utc::now(),
            state_entered_at: Instant::now(),
            transition_count: 0,
            half_open_in_flight: 0,
            total_calls: 0,
            successful_calls: 0,
            failed_calls: 0,
            rejected_calls: 0,
            latencies: VecDeque::with_capacity(latency_capacity),
            latency_capacity: latency_capacity.max(1),
        }
    }

    /// Record a successful request
    pub fn record_success(&mut self, latency: Duration) {
        self.consecutive_failures = 0;
        self.consecutive_successes += 1;
        self.successful_calls += 1;
        self.record_latency(latency);
    }

    /// Record a failed request
    pub fn record_failure(&mut self, latency: Duration) {
        self.consecutive_successes = 0;
        self.consecutive_failures += 1;
        self.failed_calls += 1;
        self.record_latency(latency);
    }

    fn record_latency(&mut self, latency: Duration) {
        if self.latencies.len() == self.latency_capacity {
            self.latencies.pop_front();
        }
        self.latencies.push_back(latency);
    }

    /// Number of samples currently held in the latency window
    pub fn latency_samples(&self) -> usize {
        self.latencies.len()
    }

    /// Moving average over the latency window
    pub fn average_latency(&self) -> Option<Duration> {
        if self.latencies.is_empty() {
            return None;
        }
        let total: Duration = self.latencies.iter().sum();
        Some(total / self.latencies.len() as u32)
    }

    /// Transition to a new state
    pub fn transition_to(&mut self, new_state: CircuitBreakerState) -> StateTransition {
        let transition = StateTransition::new(
            self.state,
            new_state,
            self.transition_reason(new_state),
        );

        self.state = new_state;
        self.last_state_change = Utc::now();
        self.state_entered_at = Instant::now();
        self.transition_count += 1;
        self.half_open_in_flight = 0;

        match new_state {
            CircuitBreakerState::Closed | CircuitBreakerState::HalfOpen => {
                self.consecutive_failures = 0;
                self.consecutive_successes = 0;
            }
            CircuitBreakerState::Open => {}
        }

        transition
    }

    /// Zero every counter and return to Closed
    pub fn reset(&mut self) -> Option<StateTransition> {
        let transition = if self.state != CircuitBreakerState::Closed {
            Some(self.transition_to(CircuitBreakerState::Closed))
        } else {
            None
        };

        self.consecutive_failures = 0;
        self.consecutive_successes = 0;
        self.total_calls = 0;
        self.successful_calls = 0;
        self.failed_calls = 0;
        self.rejected_calls = 0;
        self.half_open_in_flight = 0;
        self.latencies.clear();

        transition
    }

    /// Get a human-readable reason for the state transition
    fn transition_reason(&self, new_state: CircuitBreakerState) -> String {
        match (self.state, new_state) {
            (CircuitBreakerState::Closed, CircuitBreakerState::Open) => {
                format!("Failure threshold exceeded ({} consecutive failures)", self.consecutive_failures)
            }
            (CircuitBreakerState::Open, CircuitBreakerState::HalfOpen) => {
                "Recovery timeout elapsed, testing recovery".to_string()
            }
            (CircuitBreakerState::HalfOpen, CircuitBreakerState::Closed) => {
                format!("Recovery successful ({} consecutive successes)", self.consecutive_successes)
            }
            (CircuitBreakerState::HalfOpen, CircuitBreakerState::Open) => {
                "Recovery test failed".to_string()
            }
            _ => format!("Transitioned from {} to {}", self.state, new_state),
        }
    }

    /// Check if enough time has passed to transition from Open to HalfOpen
    pub fn should_attempt_reset(&self, recovery_timeout: Duration) -> bool {
        self.state == CircuitBreakerState::Open && self.state_entered_at.elapsed() >= recovery_timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn test_state_metric_values() {
        assert_eq!(CircuitBreakerState::Closed.to_metric_value(), 0.0);
        assert_eq!(CircuitBreakerState::Open.to_metric_value(), 1.0);
        assert_eq!(CircuitBreakerState::HalfOpen.to_metric_value(), 2.0);
    }

    #[test]
    fn test_state_serializes_in_upper_snake_case() {
        let json = serde_json::to_string(&CircuitBreakerState::HalfOpen).unwrap();
        assert_eq!(json, "\"HALF_OPEN\"");
    }

    #[test]
    fn test_success_resets_failure_streak() {
        let mut data = StateData::new(10);
        data.record_failure(Duration::from_millis(5));
        data.record_failure(Duration::from_millis(5));
        assert_eq!(data.consecutive_failures, 2);

        data.record_success(Duration::from_millis(5));
        assert_eq!(data.consecutive_failures, 0);
        assert_eq!(data.consecutive_successes, 1);
        assert_eq!(data.failed_calls, 2);
        assert_eq!(data.successful_calls, 1);
    }

    #[test]
    fn test_latency_window_evicts_oldest() {
        let mut data = StateData::new(3);
        data.record_success(Duration::from_millis(100));
        data.record_success(Duration::from_millis(10));
        data.record_success(Duration::from_millis(10));
        data.record_success(Duration::from_millis(10));

        assert_eq!(data.latency_samples(), 3);
        assert_eq!(data.average_latency(), Some(Duration::from_millis(10)));
    }

    #[test]
    fn test_average_latency_empty() {
        let data = StateData::new(5);
        assert!(data.average_latency().is_none());
    }

    #[test]
    fn test_state_transition() {
        let mut data = StateData::new(10);
        assert_eq!(data.state, CircuitBreakerState::Closed);
        assert_eq!(data.transition_count, 0);

        let transition = data.transition_to(CircuitBreakerState::Open);
        assert_eq!(transition.from, CircuitBreakerState::Closed);
        assert_eq!(transition.to, CircuitBreakerState::Open);
        assert_eq!(data.state, CircuitBreakerState::Open);
        assert_eq!(data.transition_count, 1);
    }

    #[test]
    fn test_should_attempt_reset() {
        let mut data = StateData::new(10);
        data.transition_to(CircuitBreakerState::Open);

        assert!(!data.should_attempt_reset(Duration::from_millis(100)));

        sleep(Duration::from_millis(150));
        assert!(data.should_attempt_reset(Duration::from_millis(100)));
    }

    #[test]
    fn test_reset_zeroes_everything() {
        let mut data = StateData::new(10);
        data.record_failure(Duration::from_millis(1));
        data.record_failure(Duration::from_millis(1));
        data.rejected_calls = 4;
        data.transition_to(CircuitBreakerState::Open);

        let transition = data.reset();
        assert!(transition.is_some());
        assert_eq!(data.state, CircuitBreakerState::Closed);
        assert_eq!(data.consecutive_failures, 0);
        assert_eq!(data.failed_calls, 0);
        assert_eq!(data.rejected_calls, 0);
        assert!(data.average_latency().is_none());
    }
}
