//! Redis-backed DLQ storage.
//!
//! Layout, relative to the key prefix:
//! - `dlq:{aggregate_type}`: hash of event id to JSON entry
//! - `dlq:types`: set of aggregate types that have held entries
//! - `dlq:audit:{kind}`: list of JSON audit records, oldest at the head

use crate::dlq::entry::{AuditKind, AuditRecord, DlqEntry};
use crate::dlq::error::{DlqError, DlqResult};
use crate::dlq::store::DlqStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use std::collections::HashMap;
use tracing::{info, warn};

/// DLQ storage in Redis hashes and lists
#[derive(Clone)]
pub struct RedisDlqStore {
    connection: ConnectionManager,
    key_prefix: String,
}

impl RedisDlqStore {
    pub async fn connect(redis_url: &str, key_prefix: &str) -> DlqResult<Self> {
        let client = Client::open(redis_url)
            .map_err(|e| DlqError::Storage(format!("Failed to create Redis client: {}", e)))?;
        let connection = ConnectionManager::new(client)
            .await
            .map_err(|e| DlqError::Storage(format!("Failed to connect to Redis: {}", e)))?;

        Ok(Self::new(connection, key_prefix))
    }

    pub fn new(connection: ConnectionManager, key_prefix: &str) -> Self {
        info!("Initialized Redis DLQ store with prefix '{}'", key_prefix);
        Self {
            connection,
            key_prefix: key_prefix.to_string(),
        }
    }

    fn entries_key(&self, aggregate_type: &str) -> String {
        format!("{}dlq:{}", self.key_prefix, aggregate_type)
    }

    fn types_key(&self) -> String {
        format!("{}dlq:types", self.key_prefix)
    }

    fn audit_key(&self, kind: AuditKind) -> String {
        format!("{}dlq:audit:{}", self.key_prefix, kind.as_str())
    }

    fn decode_entry(aggregate_type: &str, field: &str, json: &str) -> Option<DlqEntry> {
        match serde_json::from_str(json) {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(
                    aggregate_type = %aggregate_type,
                    event_id = %field,
                    error = %e,
                    "Skipping corrupt DLQ entry"
                );
                None
            }
        }
    }

    fn decode_audit(kind: AuditKind, json: &str) -> Option<AuditRecord> {
        match serde_json::from_str(json) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(kind = %kind, error = %e, "Skipping corrupt DLQ audit record");
                None
            }
        }
    }
}

#[async_trait]
impl DlqStore for RedisDlqStore {
    async fn upsert(&self, entry: &DlqEntry) -> DlqResult<()> {
        let json = serde_json::to_string(entry)?;
        let mut conn = self.connection.clone();

        redis::pipe()
            .atomic()
            .hset(self.entries_key(&entry.aggregate_type), entry.event_id, json)
            .ignore()
            .sadd(self.types_key(), &entry.aggregate_type)
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn get(&self, aggregate_type: &str, event_id: i64) -> DlqResult<Option<DlqEntry>> {
        let mut conn = self.connection.clone();
        let json: Option<String> = conn.hget(self.entries_key(aggregate_type), event_id).await?;

        Ok(json.and_then(|json| Self::decode_entry(aggregate_type, &event_id.to_string(), &json)))
    }

    async fn scan(&self, aggregate_type: &str) -> DlqResult<Vec<DlqEntry>> {
        let mut conn = self.connection.clone();
        let raw: HashMap<String, String> = conn.hgetall(self.entries_key(aggregate_type)).await?;

        let mut entries: Vec<DlqEntry> = raw
            .iter()
            .filter_map(|(field, json)| Self::decode_entry(aggregate_type, field, json))
            .collect();
        entries.sort_by_key(|entry| entry.event_id);
        Ok(entries)
    }

    async fn remove(&self, aggregate_type: &str, event_id: i64) -> DlqResult<bool> {
        let mut conn = self.connection.clone();
        let removed: u64 = conn.hdel(self.entries_key(aggregate_type), event_id).await?;
        Ok(removed > 0)
    }

    async fn aggregate_types(&self) -> DlqResult<Vec<String>> {
        let mut conn = self.connection.clone();
        let mut types: Vec<String> = conn.smembers(self.types_key()).await?;
        types.sort();
        Ok(types)
    }

    async fn move_to_audit(&self, record: &AuditRecord) -> DlqResult<bool> {
        let entries_key = self.entries_key(&record.entry.aggregate_type);
        let json = serde_json::to_string(record)?;
        let mut conn = self.connection.clone();

        let exists: bool = conn.hexists(&entries_key, record.entry.event_id).await?;
        if !exists {
            return Ok(false);
        }

        let (removed,): (u64,) = redis::pipe()
            .atomic()
            .hdel(&entries_key, record.entry.event_id)
            .rpush(self.audit_key(record.kind), json)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(removed > 0)
    }

    async fn list_audit(&self, kind: AuditKind) -> DlqResult<Vec<AuditRecord>> {
        let mut conn = self.connection.clone();
        let raw: Vec<String> = conn.lrange(self.audit_key(kind), 0, -1).await?;

        Ok(raw.iter().filter_map(|json| Self::decode_audit(kind, json)).collect())
    }

    async fn purge_audit(&self, kind: AuditKind, older_than: DateTime<Utc>) -> DlqResult<usize> {
        let key = self.audit_key(kind);
        let mut conn = self.connection.clone();
        let raw: Vec<String> = conn.lrange(&key, 0, -1).await?;

        // Records are appended in time order; corrupt ones are purged with their neighbours.
        let stale = raw
            .iter()
            .take_while(|json| {
                Self::decode_audit(kind, json).map_or(true, |record| record.recorded_at < older_than)
            })
            .count();

        if stale > 0 {
            let start = isize::try_from(stale).unwrap_or(isize::MAX);
            let _: () = conn.ltrim(&key, start, -1).await?;
        }
        Ok(stale)
    }
}
