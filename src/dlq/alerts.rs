//! DLQ statistics and threshold alerts.

use crate::dlq::config::DlqConfig;
use crate::dlq::entry::DlqStatus;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Entry counts for one aggregate type
#[derive(Debug, Clone, Default, Serialize)]
pub struct AggregateStats {
    pub active: u64,
    pub pending: u64,
    pub processing: u64,
    pub failed: u64,
    pub manual: u64,
    pub oldest_failed_at: Option<DateTime<Utc>>,
}

impl AggregateStats {
    pub(crate) fn count(&mut self, status: DlqStatus, failed_at: DateTime<Utc>) {
        self.active += 1;
        match status {
            DlqStatus::Pending => self.pending += 1,
            DlqStatus::Processing => self.processing += 1,
            DlqStatus::Failed => self.failed += 1,
            DlqStatus::Manual => self.manual += 1,
            DlqStatus::Expired => {}
        }
        self.oldest_failed_at = Some(match self.oldest_failed_at {
            Some(oldest) => oldest.min(failed_at),
            None => failed_at,
        });
    }
}

/// Aggregate view of the DLQ used for alerting and reporting
#[derive(Debug, Clone, Serialize)]
pub struct DlqStats {
    pub collected_at: DateTime<Utc>,
    pub aggregates: BTreeMap<String, AggregateStats>,
    pub total_active: u64,
    pub total_manual: u64,
    pub oldest_entry_age_secs: Option<i64>,
    pub expired_audit: u64,
    pub resolved_audit: u64,
    /// Outbox rows the failure rate is measured against
    pub outbox_events_total: u64,
    /// Active entries per outbox event, within [0, 1]
    pub failure_rate: f64,
    /// Counters since this process started
    pub added_total: u64,
    pub reprocessed_total: u64,
    pub reprocess_failed_total: u64,
}

/// Share of outbox events currently held by the DLQ
pub fn failure_rate(dlq_entries: u64, outbox_events_total: u64) -> f64 {
    if outbox_events_total == 0 {
        return 0.0;
    }
    (dlq_entries as f64 / outbox_events_total as f64).clamp(0.0, 1.0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Warning,
    Error,
    Critical,
}

impl fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            AlertSeverity::Warning => "warning",
            AlertSeverity::Error => "error",
            AlertSeverity::Critical => "critical",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    HighVolume,
    StaleEntries,
    HighFailureRate,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DlqAlert {
    pub severity: AlertSeverity,
    pub kind: AlertKind,
    pub message: String,
    pub value: f64,
    pub threshold: f64,
}

/// Evaluate the independent threshold rules; any subset may fire
pub fn evaluate_alerts(stats: &DlqStats, config: &DlqConfig) -> Vec<DlqAlert> {
    let mut alerts = Vec::new();

    if stats.total_active > config.alert_max_active_entries {
        alerts.push(DlqAlert {
            severity: AlertSeverity::Warning,
            kind: AlertKind::HighVolume,
            message: format!(
                "{} active DLQ entries exceed the limit of {}",
                stats.total_active, config.alert_max_active_entries
            ),
            value: stats.total_active as f64,
            threshold: config.alert_max_active_entries as f64,
        });
    }

    if let Some(age_secs) = stats.oldest_entry_age_secs {
        let age_hours = age_secs as f64 / 3600.0;
        if age_hours > config.alert_max_age_hours as f64 {
            alerts.push(DlqAlert {
                severity: AlertSeverity::Error,
                kind: AlertKind::StaleEntries,
                message: format!(
                    "Oldest DLQ entry is {:.1}h old, limit is {}h",
                    age_hours, config.alert_max_age_hours
                ),
                value: age_hours,
                threshold: config.alert_max_age_hours as f64,
            });
        }
    }

    if stats.failure_rate > config.alert_max_failure_rate {
        alerts.push(DlqAlert {
            severity: AlertSeverity::Critical,
            kind: AlertKind::HighFailureRate,
            message: format!(
                "DLQ failure rate {:.1}% exceeds {:.1}%",
                stats.failure_rate * 100.0,
                config.alert_max_failure_rate * 100.0
            ),
            value: stats.failure_rate,
            threshold: config.alert_max_failure_rate,
        });
    }

    alerts
}
