//! DLQ persistence abstraction and the in-memory backend.
//!
//! Active entries are indexed by outbox event id within each aggregate
//! type, so updates and removals never compare serialized entries.

use crate::dlq::entry::{AuditKind, AuditRecord, DlqEntry};
use crate::dlq::error::DlqResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};

/// Storage for active dead letter entries and their audit trails
#[async_trait]
pub trait DlqStore: Send + Sync {
    /// Insert or replace the entry with the same event id
    async fn upsert(&self, entry: &DlqEntry) -> DlqResult<()>;

    async fn get(&self, aggregate_type: &str, event_id: i64) -> DlqResult<Option<DlqEntry>>;

    /// All active entries of an aggregate type, ordered by event id.
    /// Entries that fail to decode are skipped.
    async fn scan(&self, aggregate_type: &str) -> DlqResult<Vec<DlqEntry>>;

    /// Returns `false` when no entry had this id
    async fn remove(&self, aggregate_type: &str, event_id: i64) -> DlqResult<bool>;

    /// Aggregate types that have ever held an entry
    async fn aggregate_types(&self) -> DlqResult<Vec<String>>;

    /// Remove the active entry and append the audit record in one step.
    /// Returns `false`, appending nothing, when the entry is not active.
    async fn move_to_audit(&self, record: &AuditRecord) -> DlqResult<bool>;

    /// Audit records of one kind, oldest first
    async fn list_audit(&self, kind: AuditKind) -> DlqResult<Vec<AuditRecord>>;

    /// Drop audit records recorded before `older_than`; returns how many
    async fn purge_audit(&self, kind: AuditKind, older_than: DateTime<Utc>) -> DlqResult<usize>;
}

/// Process-local DLQ storage for development and tests
#[derive(Default)]
pub struct InMemoryDlqStore {
    active: DashMap<String, BTreeMap<i64, DlqEntry>>,
    audit: Mutex<HashMap<AuditKind, Vec<AuditRecord>>>,
}

impl InMemoryDlqStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DlqStore for InMemoryDlqStore {
    async fn upsert(&self, entry: &DlqEntry) -> DlqResult<()> {
        self.active
            .entry(entry.aggregate_type.clone())
            .or_default()
            .insert(entry.event_id, entry.clone());
        Ok(())
    }

    async fn get(&self, aggregate_type: &str, event_id: i64) -> DlqResult<Option<DlqEntry>> {
        Ok(self
            .active
            .get(aggregate_type)
            .and_then(|entries| entries.get(&event_id).cloned()))
    }

    async fn scan(&self, aggregate_type: &str) -> DlqResult<Vec<DlqEntry>> {
        Ok(self
            .active
            .get(aggregate_type)
            .map(|entries| entries.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn remove(&self, aggregate_type: &str, event_id: i64) -> DlqResult<bool> {
        Ok(self
            .active
            .get_mut(aggregate_type)
            .map(|mut entries| entries.remove(&event_id).is_some())
            .unwrap_or(false))
    }

    async fn aggregate_types(&self) -> DlqResult<Vec<String>> {
        let mut types: Vec<String> = self.active.iter().map(|e| e.key().clone()).collect();
        types.sort();
        Ok(types)
    }

    async fn move_to_audit(&self, record: &AuditRecord) -> DlqResult<bool> {
        let Some(mut entries) = self.active.get_mut(&record.entry.aggregate_type) else {
            return Ok(false);
        };
        if entries.remove(&record.entry.event_id).is_none() {
            return Ok(false);
        }
        self.audit
            .lock()
            .entry(record.kind)
            .or_default()
            .push(record.clone());
        Ok(true)
    }

    async fn list_audit(&self, kind: AuditKind) -> DlqResult<Vec<AuditRecord>> {
        Ok(self.audit.lock().get(&kind).cloned().unwrap_or_default())
    }

    async fn purge_audit(&self, kind: AuditKind, older_than: DateTime<Utc>) -> DlqResult<usize> {
        let mut audit = self.audit.lock();
        let Some(records) = audit.get_mut(&kind) else {
            return Ok(0);
        };
        let before = records.len();
        records.retain(|record| record.recorded_at >= older_than);
        Ok(before - records.len())
    }
}
