//! Prometheus metrics for the dead letter queue

use lazy_static::lazy_static;
use prometheus::{CounterVec, GaugeVec, Opts, Registry};

/// DLQ metrics, labelled by aggregate type
pub struct DlqMetrics {
    pub entries_added: CounterVec,
    pub reprocessed: CounterVec,
    pub reprocess_failed: CounterVec,
    pub escalated_manual: CounterVec,
    pub expired: CounterVec,
    pub resolved: CounterVec,
    /// Active entries observed by the last stats collection
    pub active_entries: GaugeVec,
}

fn counter(name: &str, help: &str) -> CounterVec {
    CounterVec::new(Opts::new(name, help).namespace("outbox_relay"), &["aggregate_type"])
        .unwrap_or_else(|e| panic!("Failed to create {} metric: {}", name, e))
}

impl DlqMetrics {
    fn new() -> Self {
        Self {
            entries_added: counter("dlq_entries_added_total", "Events moved into the DLQ"),
            reprocessed: counter("dlq_reprocessed_total", "DLQ entries handed back to the outbox"),
            reprocess_failed: counter("dlq_reprocess_failed_total", "Failed DLQ reprocess attempts"),
            escalated_manual: counter("dlq_manual_total", "DLQ entries escalated to manual intervention"),
            expired: counter("dlq_expired_total", "DLQ entries expired into the audit list"),
            resolved: counter("dlq_resolved_total", "DLQ entries resolved by an operator"),
            active_entries: GaugeVec::new(
                Opts::new("dlq_active_entries", "Active DLQ entries").namespace("outbox_relay"),
                &["aggregate_type"],
            )
            .expect("Failed to create dlq_active_entries metric"),
        }
    }
}

lazy_static! {
    pub static ref DLQ_METRICS: DlqMetrics = DlqMetrics::new();
}

/// Register DLQ metrics with a Prometheus registry
pub fn init_dlq_metrics(registry: &Registry) -> Result<(), prometheus::Error> {
    registry.register(Box::new(DLQ_METRICS.entries_added.clone()))?;
    registry.register(Box::new(DLQ_METRICS.reprocessed.clone()))?;
    registry.register(Box::new(DLQ_METRICS.reprocess_failed.clone()))?;
    registry.register(Box::new(DLQ_METRICS.escalated_manual.clone()))?;
    registry.register(Box::new(DLQ_METRICS.expired.clone()))?;
    registry.register(Box::new(DLQ_METRICS.resolved.clone()))?;
    registry.register(Box::new(DLQ_METRICS.active_entries.clone()))?;
    Ok(())
}
