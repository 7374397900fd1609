//! Exposition of relay metrics through a context registry.

mod common;

use common::{order_event, parse_prometheus_output, sample_value, test_config, FailingStreamLog, Harness};
use outbox_relay::stream::InMemoryStreamLog;
use std::sync::Arc;

#[tokio::test]
async fn test_delivered_events_are_counted_per_aggregate_type() {
    let mut config = test_config();
    config.observability.prometheus_enabled = true;
    let harness = Harness::with_config(Arc::new(InMemoryStreamLog::new()), config);

    for i in 0..3 {
        harness.insert(order_event(&format!("metrics-ord-{i}"))).await;
    }
    harness.drain(5).await;

    let metrics = parse_prometheus_output(&harness.ctx.metrics_text());

    let processed = &metrics["outbox_relay_outbox_events_processed_total"];
    assert!(sample_value(processed, &[("aggregate_type", "order")]).unwrap() >= 3.0);

    let published = &metrics["outbox_relay_stream_messages_published_total"];
    assert!(sample_value(published, &[("topic", "orders"), ("backend", "memory")]).unwrap() >= 3.0);

    assert!(metrics.contains_key("outbox_relay_outbox_batch_duration_seconds"));
    assert!(metrics.contains_key("outbox_relay_circuit_breaker_calls_total"));
}

#[tokio::test]
async fn test_dead_lettered_events_are_counted() {
    let mut config = test_config();
    config.observability.prometheus_enabled = true;
    let harness = Harness::with_config(Arc::new(FailingStreamLog::default()), config);

    harness.insert(order_event("metrics-dlq-1")).await;
    harness.drain(10).await;

    let metrics = parse_prometheus_output(&harness.ctx.metrics_text());
    let added = &metrics["outbox_relay_dlq_entries_added_total"];
    assert!(sample_value(added, &[("aggregate_type", "order")]).unwrap() >= 1.0);

    let failed = &metrics["outbox_relay_outbox_events_failed_total"];
    assert!(sample_value(failed, &[("aggregate_type", "order"), ("reason", "publish")]).unwrap() >= 3.0);
}

#[test]
fn test_disabled_metrics_render_nothing() {
    let harness = Harness::new(Arc::new(InMemoryStreamLog::new()));
    assert!(harness.ctx.metrics_text().is_empty());
}
