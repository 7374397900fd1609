//! Prometheus metrics for the stream producer

use lazy_static::lazy_static;
use prometheus::{CounterVec, HistogramOpts, HistogramVec, Opts, Registry};

/// Stream producer metrics
pub struct StreamMetrics {
    /// Entries appended, by topic and backend
    pub messages_published: CounterVec,

    /// Failed appends, by topic, backend and reason
    pub publish_failures: CounterVec,

    /// Append latency
    pub publish_latency: HistogramVec,

    /// Size of the encoded payload field
    pub payload_size: HistogramVec,
}

impl StreamMetrics {
    fn new() -> Self {
        Self {
            messages_published: CounterVec::new(
                Opts::new("stream_messages_published_total", "Total number of entries appended")
                    .namespace("outbox_relay"),
                &["topic", "backend"],
            )
            .expect("Failed to create stream_messages_published_total metric"),

            publish_failures: CounterVec::new(
                Opts::new("stream_publish_failures_total", "Total number of failed appends")
                    .namespace("outbox_relay"),
                &["topic", "backend", "reason"],
            )
            .expect("Failed to create stream_publish_failures_total metric"),

            publish_latency: HistogramVec::new(
                HistogramOpts::new("stream_publish_latency_seconds", "Append latency in seconds")
                    .namespace("outbox_relay"),
                &["topic", "backend"],
            )
            .expect("Failed to create stream_publish_latency_seconds metric"),

            payload_size: HistogramVec::new(
                HistogramOpts::new("stream_payload_size_bytes", "Encoded payload size in bytes")
                    .namespace("outbox_relay")
                    .buckets(prometheus::exponential_buckets(64.0, 4.0, 8).unwrap_or_default()),
                &["topic"],
            )
            .expect("Failed to create stream_payload_size_bytes metric"),
        }
    }
}

lazy_static! {
    pub static ref STREAM_METRICS: StreamMetrics = StreamMetrics::new();
}

/// Register stream metrics with a Prometheus registry
pub fn init_stream_metrics(registry: &Registry) -> Result<(), prometheus::Error> {
    registry.register(Box::new(STREAM_METRICS.messages_published.clone()))?;
    registry.register(Box::new(STREAM_METRICS.publish_failures.clone()))?;
    registry.register(Box::new(STREAM_METRICS.publish_latency.clone()))?;
    registry.register(Box::new(STREAM_METRICS.payload_size.clone()))?;
    Ok(())
}
