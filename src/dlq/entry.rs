//! Dead letter entries and their lifecycle rules.

use crate::dlq::config::DlqConfig;
use crate::outbox::OutboxRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a dead letter entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DlqStatus {
    /// Waiting for its backoff window to elapse
    Pending,
    /// A reprocess attempt is in flight
    Processing,
    /// Recorded as failed by an earlier writer; not reprocessed automatically
    Failed,
    /// Older than the retention window; only present in the audit list
    Expired,
    /// Exhausted automatic attempts; waits for an operator
    Manual,
}

impl fmt::Display for DlqStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            DlqStatus::Pending => "PENDING",
            DlqStatus::Processing => "PROCESSING",
            DlqStatus::Failed => "FAILED",
            DlqStatus::Expired => "EXPIRED",
            DlqStatus::Manual => "MANUAL",
        };
        f.write_str(label)
    }
}

/// An outbox event held outside the live delivery path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DlqEntry {
    /// Id of the originating outbox row
    pub event_id: i64,
    pub aggregate_id: String,
    pub aggregate_type: String,
    pub event_type: String,
    pub payload: serde_json::Value,
    /// Outbox retry count at the time of dead-lettering
    pub retry_count: u32,
    pub created_at: DateTime<Utc>,
    pub failed_at: DateTime<Utc>,
    pub failure_reason: String,
    pub last_attempt: Option<DateTime<Utc>>,
    pub status: DlqStatus,
    /// Failed reprocess attempts; drives backoff and the manual ceiling
    #[serde(default)]
    pub dlq_retry_count: u32,
}

impl DlqEntry {
    pub fn from_record(record: &OutboxRecord, failure_reason: impl Into<String>, failed_at: DateTime<Utc>) -> Self {
        Self {
            event_id: record.id,
            aggregate_id: record.aggregate_id.clone(),
            aggregate_type: record.aggregate_type.clone(),
            event_type: record.event_type.clone(),
            payload: record.payload.clone(),
            retry_count: record.retry_count,
            created_at: record.created_at,
            failed_at,
            failure_reason: failure_reason.into(),
            last_attempt: None,
            status: DlqStatus::Pending,
            dlq_retry_count: 0,
        }
    }

    /// Earliest time the next reprocess attempt may start; `None` if never attempted
    pub fn next_attempt_at(&self, config: &DlqConfig) -> Option<DateTime<Utc>> {
        let backoff = chrono::Duration::from_std(config.backoff(self.dlq_retry_count))
            .unwrap_or_else(|_| chrono::Duration::seconds(config.max_delay_secs as i64));
        self.last_attempt.map(|at| at + backoff)
    }

    /// Pending and past its backoff window
    pub fn is_eligible(&self, config: &DlqConfig, now: DateTime<Utc>) -> bool {
        self.status == DlqStatus::Pending
            && self.next_attempt_at(config).map_or(true, |next| next <= now)
    }

    /// Older than the retention window, measured from `failed_at`
    pub fn is_expired(&self, config: &DlqConfig, now: DateTime<Utc>) -> bool {
        now - self.failed_at > config.retention()
    }

    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.failed_at
    }
}

/// Which audit trail a record belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    Expired,
    Resolved,
}

impl AuditKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditKind::Expired => "expired",
            AuditKind::Resolved => "resolved",
        }
    }
}

impl fmt::Display for AuditKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An entry removed from the active list, kept for audit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub kind: AuditKind,
    pub recorded_at: DateTime<Utc>,
    pub resolved_by: Option<String>,
    pub entry: DlqEntry,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn entry(now: DateTime<Utc>) -> DlqEntry {
        let record = OutboxRecord {
            id: 7,
            aggregate_id: "ord-7".to_string(),
            aggregate_type: "order".to_string(),
            event_type: "order_created".to_string(),
            payload: json!({"order_id": "ord-7"}),
            processed: true,
            processed_at: Some(now),
            retry_count: 3,
            created_at: now - Duration::minutes(5),
        };
        DlqEntry::from_record(&record, "publish failed", now)
    }

    #[test]
    fn test_new_entry_is_pending_and_immediately_eligible() {
        let now = Utc::now();
        let entry = entry(now);
        assert_eq!(entry.status, DlqStatus::Pending);
        assert_eq!(entry.retry_count, 3);
        assert_eq!(entry.dlq_retry_count, 0);
        assert!(entry.is_eligible(&DlqConfig::default(), now));
    }

    #[test]
    fn test_backoff_window() {
        let now = Utc::now();
        let config = DlqConfig::default();
        let mut entry = entry(now);
        entry.dlq_retry_count = 2;

        entry.last_attempt = Some(now - Duration::seconds(100));
        assert!(!entry.is_eligible(&config, now));

        entry.last_attempt = Some(now - Duration::seconds(300));
        assert!(entry.is_eligible(&config, now));
    }

    #[test]
    fn test_only_pending_entries_are_eligible() {
        let now = Utc::now();
        let config = DlqConfig::default();
        let mut entry = entry(now);

        for status in [DlqStatus::Processing, DlqStatus::Failed, DlqStatus::Manual] {
            entry.status = status;
            assert!(!entry.is_eligible(&config, now));
        }
    }

    #[test]
    fn test_expiry() {
        let now = Utc::now();
        let config = DlqConfig::default();
        let mut entry = entry(now);
        assert!(!entry.is_expired(&config, now));

        entry.failed_at = now - Duration::days(8);
        assert!(entry.is_expired(&config, now));
    }

    #[test]
    fn test_status_wire_format() {
        assert_eq!(serde_json::to_string(&DlqStatus::Manual).unwrap(), "\"MANUAL\"");
        let status: DlqStatus = serde_json::from_str("\"PENDING\"").unwrap();
        assert_eq!(status, DlqStatus::Pending);
    }
}
