//! Outbox table rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A row of the outbox table, written in the same transaction as the
/// business change it describes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxRecord {
    /// Monotonic primary key
    pub id: i64,
    pub aggregate_id: String,
    pub aggregate_type: String,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub processed: bool,
    pub processed_at: Option<DateTime<Utc>>,
    /// Failed publish attempts since the row was last (re)queued
    pub retry_count: u32,
    pub created_at: DateTime<Utc>,
}

/// Fields supplied by the producing transaction when inserting a row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewOutboxRecord {
    pub aggregate_id: String,
    pub aggregate_type: String,
    pub event_type: String,
    pub payload: serde_json::Value,
}

impl NewOutboxRecord {
    pub fn new(
        aggregate_type: impl Into<String>,
        aggregate_id: impl Into<String>,
        event_type: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            aggregate_id: aggregate_id.into(),
            aggregate_type: aggregate_type.into(),
            event_type: event_type.into(),
            payload,
        }
    }
}
