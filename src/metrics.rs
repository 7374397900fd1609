//! Prometheus registration and text exposition for every component.
//!
//! Collectors are process-wide statics owned by their component modules;
//! this module registers them into a caller-owned [`Registry`] and renders
//! it. Serving the output over HTTP is left to the embedding process.

use crate::circuit_breaker::init_circuit_breaker_metrics;
use crate::dlq::init_dlq_metrics;
use crate::outbox::init_outbox_metrics;
use crate::stream::init_stream_metrics;
use prometheus::{Encoder, Registry, TextEncoder};

/// Register all collectors into `registry`
pub fn init_metrics(registry: &Registry) -> Result<(), prometheus::Error> {
    init_circuit_breaker_metrics(registry)?;
    init_stream_metrics(registry)?;
    init_outbox_metrics(registry)?;
    init_dlq_metrics(registry)?;

    tracing::info!("Prometheus metrics initialized");
    Ok(())
}

/// Render `registry` in the Prometheus text format
pub fn encode_metrics(registry: &Registry) -> String {
    let encoder = TextEncoder::new();
    let metric_families = registry.gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return String::from("# Error encoding metrics\n");
    }

    String::from_utf8(buffer).unwrap_or_else(|e| {
        tracing::error!("Failed to convert metrics to string: {}", e);
        String::from("# Error converting metrics\n")
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::CIRCUIT_BREAKER_METRICS;

    #[test]
    fn test_init_and_encode() {
        let registry = Registry::new();
        init_metrics(&registry).unwrap();

        CIRCUIT_BREAKER_METRICS
            .calls_total
            .with_label_values(&["encode-test", "allowed"])
            .inc();

        let text = encode_metrics(&registry);
        assert!(text.contains("outbox_relay_circuit_breaker_calls_total"));
    }
}
