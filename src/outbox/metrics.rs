//! Prometheus metrics and pull-based counters for the outbox consumer.

use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use parking_lot::Mutex;
use prometheus::{CounterVec, Histogram, HistogramOpts, Opts, Registry};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Outbox consumer metrics
pub struct OutboxMetrics {
    /// Rows delivered and marked processed
    pub events_processed: CounterVec,

    /// Failed delivery attempts, by reason (validation, publish)
    pub events_failed: CounterVec,

    /// Rows handed to the dead letter queue
    pub events_dead_lettered: CounterVec,

    /// Wall time of one poll cycle
    pub batch_duration: Histogram,

    /// Rows fetched per poll cycle
    pub batch_size: Histogram,
}

impl OutboxMetrics {
    fn new() -> Self {
        Self {
            events_processed: CounterVec::new(
                Opts::new("outbox_events_processed_total", "Outbox rows delivered to the stream log")
                    .namespace("outbox_relay"),
                &["aggregate_type"],
            )
            .expect("Failed to create outbox_events_processed_total metric"),

            events_failed: CounterVec::new(
                Opts::new("outbox_events_failed_total", "Failed outbox delivery attempts")
                    .namespace("outbox_relay"),
                &["aggregate_type", "reason"],
            )
            .expect("Failed to create outbox_events_failed_total metric"),

            events_dead_lettered: CounterVec::new(
                Opts::new("outbox_events_dead_lettered_total", "Outbox rows moved to the DLQ")
                    .namespace("outbox_relay"),
                &["aggregate_type"],
            )
            .expect("Failed to create outbox_events_dead_lettered_total metric"),

            batch_duration: Histogram::with_opts(
                HistogramOpts::new("outbox_batch_duration_seconds", "Duration of one poll cycle")
                    .namespace("outbox_relay")
                    .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0]),
            )
            .expect("Failed to create outbox_batch_duration_seconds metric"),

            batch_size: Histogram::with_opts(
                HistogramOpts::new("outbox_batch_size", "Rows fetched per poll cycle")
                    .namespace("outbox_relay")
                    .buckets(vec![0.0, 1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0]),
            )
            .expect("Failed to create outbox_batch_size metric"),
        }
    }
}

lazy_static! {
    pub static ref OUTBOX_METRICS: OutboxMetrics = OutboxMetrics::new();
}

/// Register outbox metrics with a Prometheus registry
pub fn init_outbox_metrics(registry: &Registry) -> Result<(), prometheus::Error> {
    registry.register(Box::new(OUTBOX_METRICS.events_processed.clone()))?;
    registry.register(Box::new(OUTBOX_METRICS.events_failed.clone()))?;
    registry.register(Box::new(OUTBOX_METRICS.events_dead_lettered.clone()))?;
    registry.register(Box::new(OUTBOX_METRICS.batch_duration.clone()))?;
    registry.register(Box::new(OUTBOX_METRICS.batch_size.clone()))?;
    Ok(())
}

/// Per-consumer counters read by [`ConsumerSnapshot`]
#[derive(Default)]
pub(crate) struct ConsumerStats {
    pub processed: AtomicU64,
    pub errors: AtomicU64,
    pub dead_lettered: AtomicU64,
    pub cycles: AtomicU64,
    pub last_poll_at: Mutex<Option<DateTime<Utc>>>,
    pub last_batch_duration: Mutex<Option<Duration>>,
}

impl ConsumerStats {
    pub fn snapshot(&self, running: bool) -> ConsumerSnapshot {
        ConsumerSnapshot {
            running,
            processed_total: self.processed.load(Ordering::Relaxed),
            error_total: self.errors.load(Ordering::Relaxed),
            dead_lettered_total: self.dead_lettered.load(Ordering::Relaxed),
            cycles_total: self.cycles.load(Ordering::Relaxed),
            last_poll_at: *self.last_poll_at.lock(),
            last_batch_duration_ms: self
                .last_batch_duration
                .lock()
                .map(|d| d.as_secs_f64() * 1000.0),
        }
    }
}

/// Point-in-time view of the consumer for external exporters
#[derive(Debug, Clone, Serialize)]
pub struct ConsumerSnapshot {
    pub running: bool,
    pub processed_total: u64,
    pub error_total: u64,
    pub dead_lettered_total: u64,
    pub cycles_total: u64,
    pub last_poll_at: Option<DateTime<Utc>>,
    pub last_batch_duration_ms: Option<f64>,
}
