// Comprehensive Circuit Breaker Test Suite
// Unit, concurrency and registry scenarios for the breaker guarding the stream log

use outbox_relay::circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitBreakerRegistry,
    CircuitBreakerState,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;

async fn fail(cb: &CircuitBreaker) -> Result<i32, CircuitBreakerError> {
    cb.call(|| {
        Box::pin(async {
            Err::<i32, std::io::Error>(std::io::Error::new(
                std::io::ErrorKind::Other,
                "error",
            ))
        })
    })
    .await
}

async fn succeed(cb: &CircuitBreaker) -> Result<i32, CircuitBreakerError> {
    cb.call(|| Box::pin(async { Ok::<i32, std::io::Error>(42) }))
        .await
}

fn quick_recovery(failure_threshold: u32, half_open_max_calls: u32) -> CircuitBreakerConfig {
    CircuitBreakerConfig::builder()
        .failure_threshold(failure_threshold)
        .recovery_timeout(Duration::from_millis(100))
        .half_open_max_calls(half_open_max_calls)
        .build()
        .unwrap()
}

// ============================================================================
// UNIT TESTS - State Transitions
// ============================================================================

#[tokio::test]
async fn test_circuit_breaker_starts_closed() {
    let cb = CircuitBreaker::new("test_starts_closed", CircuitBreakerConfig::default());
    assert_eq!(cb.state(), CircuitBreakerState::Closed);
}

#[tokio::test]
async fn test_successful_call_stays_closed() {
    let cb = CircuitBreaker::new("test_success", CircuitBreakerConfig::default());

    assert_eq!(succeed(&cb).await.unwrap(), 42);
    assert_eq!(cb.state(), CircuitBreakerState::Closed);
}

#[tokio::test]
async fn test_circuit_opens_after_threshold_failures() {
    let config = CircuitBreakerConfig::builder()
        .failure_threshold(3)
        .build()
        .unwrap();
    let cb = CircuitBreaker::new("test_opens", config);

    for _ in 0..3 {
        let _ = fail(&cb).await;
    }

    assert_eq!(cb.state(), CircuitBreakerState::Open);
}

#[tokio::test]
async fn test_open_circuit_rejects_without_invoking() {
    let config = CircuitBreakerConfig::builder()
        .failure_threshold(2)
        .build()
        .unwrap();
    let cb = CircuitBreaker::new("test_rejects", config);

    for _ in 0..2 {
        let _ = fail(&cb).await;
    }
    assert_eq!(cb.state(), CircuitBreakerState::Open);

    let invoked = Arc::new(AtomicUsize::new(0));
    let counter = invoked.clone();
    let result = cb
        .call(move || {
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<i32, std::io::Error>(42)
            })
        })
        .await;

    assert!(matches!(result, Err(CircuitBreakerError::Open(_))));
    assert_eq!(invoked.load(Ordering::SeqCst), 0);
    assert_eq!(cb.stats().rejected_calls, 1);
}

#[tokio::test]
async fn test_circuit_transitions_to_half_open_after_timeout() {
    let cb = CircuitBreaker::new("test_half_open", quick_recovery(2, 3));

    for _ in 0..2 {
        let _ = fail(&cb).await;
    }
    assert_eq!(cb.state(), CircuitBreakerState::Open);

    // No background timer: the state only moves on the next call
    sleep(Duration::from_millis(150)).await;
    assert_eq!(cb.state(), CircuitBreakerState::Open);

    let _ = succeed(&cb).await;
    assert_eq!(cb.state(), CircuitBreakerState::HalfOpen);
}

#[tokio::test]
async fn test_half_open_closes_after_max_calls_successes() {
    let cb = CircuitBreaker::new("test_half_open_close", quick_recovery(2, 3));

    for _ in 0..2 {
        let _ = fail(&cb).await;
    }
    sleep(Duration::from_millis(150)).await;

    for _ in 0..2 {
        succeed(&cb).await.unwrap();
        assert_eq!(cb.state(), CircuitBreakerState::HalfOpen);
    }
    succeed(&cb).await.unwrap();

    assert_eq!(cb.state(), CircuitBreakerState::Closed);
}

#[tokio::test]
async fn test_half_open_reopens_on_failure() {
    let cb = CircuitBreaker::new("test_half_open_reopen", quick_recovery(2, 3));

    for _ in 0..2 {
        let _ = fail(&cb).await;
    }
    sleep(Duration::from_millis(150)).await;

    let _ = fail(&cb).await;

    assert_eq!(cb.state(), CircuitBreakerState::Open);
    assert!(matches!(succeed(&cb).await, Err(CircuitBreakerError::Open(_))));
}

// ============================================================================
// FALLBACK TESTS
// ============================================================================

#[tokio::test]
async fn test_fallback_on_open_circuit() {
    let config = CircuitBreakerConfig::builder()
        .failure_threshold(2)
        .build()
        .unwrap();
    let cb = CircuitBreaker::new("test_fallback_open", config);

    for _ in 0..2 {
        let _ = fail(&cb).await;
    }

    let result = cb
        .call_with_fallback(
            || Box::pin(async { Ok::<i32, std::io::Error>(42) }),
            || Box::pin(async { 100 }),
        )
        .await
        .unwrap();

    assert_eq!(result, 100, "Should use fallback value");
}

#[tokio::test]
async fn test_fallback_not_used_for_operation_errors() {
    let cb = CircuitBreaker::new("test_fallback_error", CircuitBreakerConfig::default());

    let result = cb
        .call_with_fallback(
            || {
                Box::pin(async {
                    Err::<i32, std::io::Error>(std::io::Error::new(
                        std::io::ErrorKind::Other,
                        "boom",
                    ))
                })
            },
            || Box::pin(async { 100 }),
        )
        .await;

    assert!(matches!(result, Err(CircuitBreakerError::OperationFailed(_))));
}

// ============================================================================
// MANUAL OPERATIONS TESTS
// ============================================================================

#[tokio::test]
async fn test_force_open() {
    let cb = CircuitBreaker::new("test_force_open", CircuitBreakerConfig::default());

    cb.force_open();

    assert_eq!(cb.state(), CircuitBreakerState::Open);
    assert!(succeed(&cb).await.is_err());
}

#[tokio::test]
async fn test_reset() {
    let config = CircuitBreakerConfig::builder()
        .failure_threshold(2)
        .build()
        .unwrap();
    let cb = CircuitBreaker::new("test_reset", config);

    for _ in 0..2 {
        let _ = fail(&cb).await;
    }
    assert_eq!(cb.state(), CircuitBreakerState::Open);

    cb.reset();

    assert_eq!(cb.state(), CircuitBreakerState::Closed);
    assert_eq!(cb.stats().consecutive_failures, 0);
    assert_eq!(succeed(&cb).await.unwrap(), 42);
}

// ============================================================================
// CONCURRENCY TESTS
// ============================================================================

#[tokio::test]
async fn test_concurrent_calls_closed_state() {
    let cb = Arc::new(CircuitBreaker::new(
        "test_concurrent_closed",
        CircuitBreakerConfig::default(),
    ));

    let mut handles = vec![];
    for i in 0..100 {
        let cb_clone = cb.clone();
        handles.push(tokio::spawn(async move {
            cb_clone
                .call(|| Box::pin(async move { Ok::<i32, std::io::Error>(i) }))
                .await
        }));
    }

    let results = futures::future::join_all(handles).await;
    for result in results {
        assert!(result.unwrap().is_ok());
    }

    assert_eq!(cb.state(), CircuitBreakerState::Closed);
    assert_eq!(cb.stats().successful_calls, 100);
}

#[tokio::test]
async fn test_half_open_admits_at_most_max_concurrent_trials() {
    let max_calls = 3;
    let cb = Arc::new(CircuitBreaker::new(
        "test_half_open_limit",
        quick_recovery(1, max_calls),
    ));
    let _ = fail(&cb).await;
    sleep(Duration::from_millis(150)).await;

    // Trial calls park until released
    let (release, gate) = watch::channel(false);
    let mut handles = vec![];
    for _ in 0..max_calls {
        let cb = cb.clone();
        let mut gate = gate.clone();
        handles.push(tokio::spawn(async move {
            cb.call(move || {
                Box::pin(async move { gate.wait_for(|open| *open).await.map(|_| 1) })
            })
            .await
        }));
    }

    for _ in 0..100 {
        if cb.stats().half_open_in_flight == max_calls {
            break;
        }
        sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(cb.state(), CircuitBreakerState::HalfOpen);
    assert_eq!(cb.stats().half_open_in_flight, max_calls);

    let extra = succeed(&cb).await;
    assert!(matches!(extra, Err(CircuitBreakerError::HalfOpenLimitExceeded(_))));

    release.send_replace(true);
    for handle in futures::future::join_all(handles).await {
        assert_eq!(handle.unwrap().unwrap(), 1);
    }

    assert_eq!(cb.state(), CircuitBreakerState::Closed);
    assert_eq!(cb.stats().half_open_in_flight, 0);
}

#[tokio::test]
async fn test_dropped_trial_call_releases_its_slot() {
    let cb = Arc::new(CircuitBreaker::new("test_trial_drop", quick_recovery(1, 1)));
    let _ = fail(&cb).await;
    sleep(Duration::from_millis(150)).await;

    let cb_clone = cb.clone();
    let handle = tokio::spawn(async move {
        cb_clone
            .call(|| {
                Box::pin(async {
                    sleep(Duration::from_secs(60)).await;
                    Ok::<i32, std::io::Error>(0)
                })
            })
            .await
    });

    for _ in 0..100 {
        if cb.stats().half_open_in_flight == 1 {
            break;
        }
        sleep(Duration::from_millis(5)).await;
    }
    handle.abort();
    let _ = handle.await;

    assert_eq!(cb.stats().half_open_in_flight, 0);
    assert_eq!(succeed(&cb).await.unwrap(), 42);
    assert_eq!(cb.state(), CircuitBreakerState::Closed);
}

// ============================================================================
// CONFIGURATION TESTS
// ============================================================================

#[tokio::test]
async fn test_config_builder() {
    let config = CircuitBreakerConfig::builder()
        .failure_threshold(10)
        .recovery_timeout(Duration::from_secs(60))
        .half_open_max_calls(5)
        .build()
        .unwrap();

    let cb = CircuitBreaker::new("test_builder", config);

    assert_eq!(cb.config().failure_threshold, 10);
    assert_eq!(cb.config().recovery_timeout, Duration::from_secs(60));
    assert_eq!(cb.config().half_open_max_calls, 5);
}

#[tokio::test]
async fn test_config_builder_rejects_zero_threshold() {
    let result = CircuitBreakerConfig::builder().failure_threshold(0).build();
    assert!(matches!(result, Err(CircuitBreakerError::InvalidConfig(_))));
}

// ============================================================================
// STATISTICS TESTS
// ============================================================================

#[tokio::test]
async fn test_statistics() {
    let config = CircuitBreakerConfig::builder()
        .failure_threshold(3)
        .build()
        .unwrap();
    let cb = CircuitBreaker::new("test_stats", config);

    let stats = cb.stats();
    assert_eq!(stats.name, "test_stats");
    assert_eq!(stats.state, CircuitBreakerState::Closed);
    assert_eq!(stats.consecutive_failures, 0);
    assert_eq!(stats.transition_count, 0);

    for _ in 0..2 {
        let _ = fail(&cb).await;
    }
    assert_eq!(cb.stats().consecutive_failures, 2);

    let _ = fail(&cb).await;

    let stats = cb.stats();
    assert_eq!(stats.state, CircuitBreakerState::Open);
    assert_eq!(stats.transition_count, 1);
    assert_eq!(stats.failed_calls, 3);
    assert!(stats.average_latency_ms.is_some());
}

// ============================================================================
// EDGE CASES
// ============================================================================

#[tokio::test]
async fn test_exactly_at_threshold() {
    let config = CircuitBreakerConfig::builder()
        .failure_threshold(5)
        .build()
        .unwrap();
    let cb = CircuitBreaker::new("test_exact_threshold", config);

    for _ in 0..4 {
        let _ = fail(&cb).await;
    }
    assert_eq!(cb.state(), CircuitBreakerState::Closed);

    let _ = fail(&cb).await;
    assert_eq!(cb.state(), CircuitBreakerState::Open);
}

#[tokio::test]
async fn test_failure_count_resets_on_success() {
    let config = CircuitBreakerConfig::builder()
        .failure_threshold(5)
        .build()
        .unwrap();
    let cb = CircuitBreaker::new("test_reset_failures", config);

    for _ in 0..3 {
        let _ = fail(&cb).await;
    }
    let _ = succeed(&cb).await;

    for _ in 0..4 {
        let _ = fail(&cb).await;
    }

    assert_eq!(cb.state(), CircuitBreakerState::Closed);
}

// ============================================================================
// REGISTRY TESTS
// ============================================================================

#[tokio::test]
async fn test_registry_isolates_dependencies() {
    let registry = CircuitBreakerRegistry::with_default_config(quick_recovery(1, 1));
    let stream = registry.get_or_default("stream-log");
    let database = registry.get_or_default("database");

    let _ = fail(&stream).await;

    assert_eq!(stream.state(), CircuitBreakerState::Open);
    assert_eq!(database.state(), CircuitBreakerState::Closed);
    assert!(registry.has_open_circuits());

    let counts = registry.get_state_counts();
    assert_eq!(counts.open, 1);
    assert_eq!(counts.closed, 1);

    registry.reset_all();
    assert!(!registry.has_open_circuits());
}

#[tokio::test]
async fn test_registry_returns_shared_instance() {
    let registry = CircuitBreakerRegistry::new();
    let a = registry.get_or_default("stream-log");
    let b = registry.get_or_default("stream-log");

    a.force_open();
    assert_eq!(b.state(), CircuitBreakerState::Open);
    assert_eq!(registry.len(), 1);
}
