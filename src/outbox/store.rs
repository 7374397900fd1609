//! Outbox table abstraction and the in-memory backend.

use crate::outbox::error::{OutboxError, OutboxResult};
use crate::outbox::record::{NewOutboxRecord, OutboxRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::BTreeMap;

/// Durable table the producing transactions write events into
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Up to `limit` unprocessed rows, oldest `created_at` first
    async fn fetch_unprocessed(&self, limit: usize) -> OutboxResult<Vec<OutboxRecord>>;

    async fn mark_processed(&self, id: i64, at: DateTime<Utc>) -> OutboxResult<()>;

    /// Atomically add one to `retry_count` and return the new value
    async fn increment_retry(&self, id: i64) -> OutboxResult<u32>;

    /// Put a row back on the delivery path with `retry_count = 0`.
    /// Returns `false` when the row no longer exists.
    async fn reset_for_redelivery(&self, id: i64) -> OutboxResult<bool>;

    async fn insert(&self, record: NewOutboxRecord) -> OutboxResult<OutboxRecord>;

    async fn get(&self, id: i64) -> OutboxResult<Option<OutboxRecord>>;

    /// Number of rows ever written and still retained
    async fn count_total(&self) -> OutboxResult<u64>;

    /// Release held connections
    async fn close(&self) -> OutboxResult<()> {
        Ok(())
    }
}

#[derive(Default)]
struct Table {
    rows: BTreeMap<i64, OutboxRecord>,
    next_id: i64,
}

/// Single-lock outbox table for development and tests
#[derive(Default)]
pub struct InMemoryOutboxStore {
    table: Mutex<Table>,
}

impl InMemoryOutboxStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a fully formed row, keeping its id, timestamps and counters
    pub fn seed(&self, record: OutboxRecord) {
        let mut table = self.table.lock();
        table.next_id = table.next_id.max(record.id);
        table.rows.insert(record.id, record);
    }
}

#[async_trait]
impl OutboxStore for InMemoryOutboxStore {
    async fn fetch_unprocessed(&self, limit: usize) -> OutboxResult<Vec<OutboxRecord>> {
        let table = self.table.lock();
        let mut pending: Vec<OutboxRecord> = table
            .rows
            .values()
            .filter(|row| !row.processed)
            .cloned()
            .collect();
        pending.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        pending.truncate(limit);
        Ok(pending)
    }

    async fn mark_processed(&self, id: i64, at: DateTime<Utc>) -> OutboxResult<()> {
        let mut table = self.table.lock();
        let row = table.rows.get_mut(&id).ok_or(OutboxError::NotFound(id))?;
        row.processed = true;
        row.processed_at = Some(at);
        Ok(())
    }

    async fn increment_retry(&self, id: i64) -> OutboxResult<u32> {
        let mut table = self.table.lock();
        let row = table.rows.get_mut(&id).ok_or(OutboxError::NotFound(id))?;
        row.retry_count += 1;
        Ok(row.retry_count)
    }

    async fn reset_for_redelivery(&self, id: i64) -> OutboxResult<bool> {
        let mut table = self.table.lock();
        let Some(row) = table.rows.get_mut(&id) else {
            return Ok(false);
        };
        row.processed = false;
        row.processed_at = None;
        row.retry_count = 0;
        Ok(true)
    }

    async fn insert(&self, record: NewOutboxRecord) -> OutboxResult<OutboxRecord> {
        let mut table = self.table.lock();
        table.next_id += 1;
        let row = OutboxRecord {
            id: table.next_id,
            aggregate_id: record.aggregate_id,
            aggregate_type: record.aggregate_type,
            event_type: record.event_type,
            payload: record.payload,
            processed: false,
            processed_at: None,
            retry_count: 0,
            created_at: Utc::now(),
        };
        table.rows.insert(row.id, row.clone());
        Ok(row)
    }

    async fn get(&self, id: i64) -> OutboxResult<Option<OutboxRecord>> {
        Ok(self.table.lock().rows.get(&id).cloned())
    }

    async fn count_total(&self) -> OutboxResult<u64> {
        Ok(self.table.lock().rows.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn new_record(n: u32) -> NewOutboxRecord {
        NewOutboxRecord::new("order", format!("ord-{}", n), "order_created", json!({"order_id": n}))
    }

    #[tokio::test]
    async fn test_fetch_returns_empty_when_nothing_pending() {
        let store = InMemoryOutboxStore::new();
        assert!(store.fetch_unprocessed(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fetch_orders_by_created_at_and_skips_processed() {
        let store = InMemoryOutboxStore::new();
        let now = Utc::now();
        for (id, age_secs) in [(1, 10), (2, 30), (3, 20)] {
            store.seed(OutboxRecord {
                id,
                aggregate_id: format!("a-{}", id),
                aggregate_type: "order".to_string(),
                event_type: "order_created".to_string(),
                payload: json!({}),
                processed: false,
                processed_at: None,
                retry_count: 0,
                created_at: now - Duration::seconds(age_secs),
            });
        }
        store.mark_processed(3, now).await.unwrap();

        let ids: Vec<i64> = store
            .fetch_unprocessed(10)
            .await
            .unwrap()
            .iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec![2, 1]);
    }

    #[tokio::test]
    async fn test_increment_and_reset() {
        let store = InMemoryOutboxStore::new();
        let row = store.insert(new_record(1)).await.unwrap();

        assert_eq!(store.increment_retry(row.id).await.unwrap(), 1);
        assert_eq!(store.increment_retry(row.id).await.unwrap(), 2);
        store.mark_processed(row.id, Utc::now()).await.unwrap();

        assert!(store.reset_for_redelivery(row.id).await.unwrap());
        let row = store.get(row.id).await.unwrap().unwrap();
        assert!(!row.processed);
        assert_eq!(row.retry_count, 0);
        assert!(row.processed_at.is_none());
    }

    #[tokio::test]
    async fn test_missing_rows() {
        let store = InMemoryOutboxStore::new();
        assert!(!store.reset_for_redelivery(99).await.unwrap());
        assert!(matches!(
            store.increment_retry(99).await,
            Err(OutboxError::NotFound(99))
        ));
    }

    #[tokio::test]
    async fn test_insert_assigns_monotonic_ids() {
        let store = InMemoryOutboxStore::new();
        let a = store.insert(new_record(1)).await.unwrap();
        let b = store.insert(new_record(2)).await.unwrap();
        assert!(b.id > a.id);
        assert_eq!(store.count_total().await.unwrap(), 2);
    }
}
