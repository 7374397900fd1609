//! Shared fixtures for integration tests: in-memory relays and stream logs
//! that fail on demand.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use outbox_relay::config::Config;
use outbox_relay::dlq::{
    AuditKind, AuditRecord, DlqEntry, DlqError, DlqResult, DlqStore, InMemoryDlqStore,
};
use outbox_relay::outbox::{
    InMemoryOutboxStore, NewOutboxRecord, OutboxError, OutboxRecord, OutboxResult, OutboxStore,
};
use outbox_relay::stream::{
    InMemoryStreamLog, MessageId, StreamEntry, StreamError, StreamLog, StreamResult,
};
use outbox_relay::AppContext;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Stream log that rejects every append
#[derive(Default)]
pub struct FailingStreamLog {
    pub attempts: AtomicUsize,
}

#[async_trait]
impl StreamLog for FailingStreamLog {
    async fn append(
        &self,
        topic: &str,
        _fields: &[(String, String)],
        _max_len: Option<usize>,
    ) -> StreamResult<MessageId> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(StreamError::PublishFailed(format!("{topic}: connection refused")))
    }

    async fn range(
        &self,
        _topic: &str,
        _start: &str,
        _end: &str,
        _count: Option<usize>,
    ) -> StreamResult<Vec<StreamEntry>> {
        Ok(Vec::new())
    }

    async fn rev_range(
        &self,
        _topic: &str,
        _end: &str,
        _start: &str,
        _count: Option<usize>,
    ) -> StreamResult<Vec<StreamEntry>> {
        Ok(Vec::new())
    }

    async fn len(&self, _topic: &str) -> StreamResult<usize> {
        Ok(0)
    }

    fn backend_name(&self) -> &'static str {
        "failing"
    }
}

/// In-memory outbox whose redelivery resets are slow and which refuses
/// work once closed, like a drained connection pool
#[derive(Default)]
pub struct ClosingOutboxStore {
    pub inner: InMemoryOutboxStore,
    pub closed: AtomicBool,
    pub reset_started: AtomicBool,
}

impl ClosingOutboxStore {
    fn check_open(&self) -> OutboxResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(OutboxError::Database("pool closed".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl OutboxStore for ClosingOutboxStore {
    async fn fetch_unprocessed(&self, limit: usize) -> OutboxResult<Vec<OutboxRecord>> {
        self.check_open()?;
        self.inner.fetch_unprocessed(limit).await
    }

    async fn mark_processed(&self, id: i64, at: chrono::DateTime<Utc>) -> OutboxResult<()> {
        self.check_open()?;
        self.inner.mark_processed(id, at).await
    }

    async fn increment_retry(&self, id: i64) -> OutboxResult<u32> {
        self.check_open()?;
        self.inner.increment_retry(id).await
    }

    async fn reset_for_redelivery(&self, id: i64) -> OutboxResult<bool> {
        self.reset_started.store(true, Ordering::SeqCst);
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        self.check_open()?;
        self.inner.reset_for_redelivery(id).await
    }

    async fn insert(&self, record: NewOutboxRecord) -> OutboxResult<OutboxRecord> {
        self.check_open()?;
        self.inner.insert(record).await
    }

    async fn get(&self, id: i64) -> OutboxResult<Option<OutboxRecord>> {
        self.inner.get(id).await
    }

    async fn count_total(&self) -> OutboxResult<u64> {
        self.inner.count_total().await
    }

    async fn close(&self) -> OutboxResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// In-memory DLQ store that rejects writes of entries whose reprocess
/// counter has moved past zero
#[derive(Default)]
pub struct RetryWriteFailingDlqStore {
    pub inner: InMemoryDlqStore,
}

#[async_trait]
impl DlqStore for RetryWriteFailingDlqStore {
    async fn upsert(&self, entry: &DlqEntry) -> DlqResult<()> {
        if entry.dlq_retry_count > 0 {
            return Err(DlqError::Storage("connection reset".to_string()));
        }
        self.inner.upsert(entry).await
    }

    async fn get(&self, aggregate_type: &str, event_id: i64) -> DlqResult<Option<DlqEntry>> {
        self.inner.get(aggregate_type, event_id).await
    }

    async fn scan(&self, aggregate_type: &str) -> DlqResult<Vec<DlqEntry>> {
        self.inner.scan(aggregate_type).await
    }

    async fn remove(&self, aggregate_type: &str, event_id: i64) -> DlqResult<bool> {
        self.inner.remove(aggregate_type, event_id).await
    }

    async fn aggregate_types(&self) -> DlqResult<Vec<String>> {
        self.inner.aggregate_types().await
    }

    async fn move_to_audit(&self, record: &AuditRecord) -> DlqResult<bool> {
        self.inner.move_to_audit(record).await
    }

    async fn list_audit(&self, kind: AuditKind) -> DlqResult<Vec<AuditRecord>> {
        self.inner.list_audit(kind).await
    }

    async fn purge_audit(&self, kind: AuditKind, older_than: DateTime<Utc>) -> DlqResult<usize> {
        self.inner.purge_audit(kind, older_than).await
    }
}

/// In-memory stream log whose appends fail while `failing` is set
#[derive(Default)]
pub struct FlakyStreamLog {
    pub inner: InMemoryStreamLog,
    pub failing: AtomicBool,
    pub rejected: AtomicUsize,
}

impl FlakyStreamLog {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl StreamLog for FlakyStreamLog {
    async fn append(
        &self,
        topic: &str,
        fields: &[(String, String)],
        max_len: Option<usize>,
    ) -> StreamResult<MessageId> {
        if self.failing.load(Ordering::SeqCst) {
            self.rejected.fetch_add(1, Ordering::SeqCst);
            return Err(StreamError::PublishFailed("stream log unavailable".to_string()));
        }
        self.inner.append(topic, fields, max_len).await
    }

    async fn range(
        &self,
        topic: &str,
        start: &str,
        end: &str,
        count: Option<usize>,
    ) -> StreamResult<Vec<StreamEntry>> {
        self.inner.range(topic, start, end, count).await
    }

    async fn rev_range(
        &self,
        topic: &str,
        end: &str,
        start: &str,
        count: Option<usize>,
    ) -> StreamResult<Vec<StreamEntry>> {
        self.inner.rev_range(topic, end, start, count).await
    }

    async fn len(&self, topic: &str) -> StreamResult<usize> {
        self.inner.len(topic).await
    }

    fn backend_name(&self) -> &'static str {
        "flaky"
    }
}

/// A relay over in-memory stores with handles to the concrete backends
pub struct Harness {
    pub ctx: AppContext,
    pub outbox: Arc<InMemoryOutboxStore>,
    pub dlq_store: Arc<InMemoryDlqStore>,
}

impl Harness {
    pub fn new(log: Arc<dyn StreamLog>) -> Self {
        Self::with_config(log, test_config())
    }

    pub fn with_config(log: Arc<dyn StreamLog>, config: Config) -> Self {
        let outbox = Arc::new(InMemoryOutboxStore::new());
        let dlq_store = Arc::new(InMemoryDlqStore::new());
        let ctx = AppContext::assemble(config, outbox.clone(), log, dlq_store.clone())
            .expect("valid test configuration");
        Self {
            ctx,
            outbox,
            dlq_store,
        }
    }

    pub async fn insert(&self, record: NewOutboxRecord) -> OutboxRecord {
        self.outbox.insert(record).await.expect("insert outbox row")
    }

    /// Run poll cycles until the consumer fetches nothing, at most `max` times
    pub async fn drain(&self, max: usize) {
        for _ in 0..max {
            match self.ctx.consumer.run_once().await {
                Some(Ok(outcome)) if outcome.fetched == 0 => return,
                Some(Ok(_)) => {}
                Some(Err(e)) => panic!("poll cycle failed: {e}"),
                None => panic!("consumer unexpectedly busy or stopped"),
            }
        }
    }

    /// Move a DLQ entry's failure time into the past so its backoff has elapsed
    pub async fn age_dlq_entry(&self, aggregate_type: &str, event_id: i64, by: ChronoDuration) {
        let mut entry: DlqEntry = self
            .dlq_store
            .get(aggregate_type, event_id)
            .await
            .expect("dlq read")
            .expect("dlq entry present");
        entry.failed_at = entry.failed_at - by;
        entry.last_attempt = entry.last_attempt.map(|at| at - by);
        self.dlq_store.upsert(&entry).await.expect("dlq write");
    }
}

/// Defaults with a breaker that will not trip during retry tests
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.outbox.poll_interval_ms = 10;
    config.outbox.batch_size = 10;
    config.circuit_breaker.failure_threshold = 1_000;
    config.observability.prometheus_enabled = false;
    config
}

pub fn order_event(order_id: &str) -> NewOutboxRecord {
    NewOutboxRecord::new(
        "order",
        order_id,
        "OrderCreated",
        json!({ "order_id": order_id, "total": 42.5 }),
    )
}

pub fn user_event(user_id: &str) -> NewOutboxRecord {
    NewOutboxRecord::new(
        "user",
        user_id,
        "UserRegistered",
        json!({ "user_id": user_id, "email": format!("{user_id}@example.com") }),
    )
}

/// Row for an already-failing event, as it would look when dead-lettered
pub fn exhausted_record(id: i64, aggregate_type: &str) -> OutboxRecord {
    OutboxRecord {
        id,
        aggregate_id: format!("{aggregate_type}-{id}"),
        aggregate_type: aggregate_type.to_string(),
        event_type: "Created".to_string(),
        payload: json!({ "id": id }),
        processed: false,
        processed_at: None,
        retry_count: 3,
        created_at: Utc::now(),
    }
}

/// Group exposition lines by metric family, HELP and TYPE lines included
pub fn parse_prometheus_output(output: &str) -> HashMap<String, Vec<String>> {
    let mut metrics: HashMap<String, Vec<String>> = HashMap::new();
    let mut current_metric = String::new();

    for line in output.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if line.starts_with("# HELP") || line.starts_with("# TYPE") {
            if let Some(name) = line.split_whitespace().nth(2) {
                current_metric = name.to_string();
                metrics.entry(current_metric.clone()).or_default().push(line.to_string());
            }
        } else if !line.starts_with('#') && !current_metric.is_empty() {
            metrics.entry(current_metric.clone()).or_default().push(line.to_string());
        }
    }

    metrics
}

/// Value of the sample line carrying every given label pair
pub fn sample_value(lines: &[String], labels: &[(&str, &str)]) -> Option<f64> {
    lines
        .iter()
        .filter(|line| !line.starts_with('#'))
        .find(|line| {
            labels
                .iter()
                .all(|(k, v)| line.contains(&format!("{k}=\"{v}\"")))
        })
        .and_then(|line| line.split_whitespace().last()?.parse().ok())
}
