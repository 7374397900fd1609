//! Dead letter queue manager: backoff-driven reprocessing, expiry,
//! manual escalation and operator resolution.

use crate::dlq::alerts::{evaluate_alerts, failure_rate, AggregateStats, DlqAlert, DlqStats};
use crate::dlq::config::DlqConfig;
use crate::dlq::entry::{AuditKind, AuditRecord, DlqEntry, DlqStatus};
use crate::dlq::error::DlqResult;
use crate::dlq::metrics::DLQ_METRICS;
use crate::dlq::store::DlqStore;
use crate::outbox::{OutboxRecord, OutboxStore};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};

const AUDIT_CLEANUP_INTERVAL: Duration = Duration::from_secs(3600);

/// Result of one reprocess attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReprocessOutcome {
    /// The outbox row was reset and the entry removed
    Redelivered,
    /// The attempt failed; the entry waits for its next backoff window
    Retrying { dlq_retry_count: u32 },
    /// The attempt failed and the entry now needs an operator
    Manual { dlq_retry_count: u32 },
    /// The entry is no longer active
    Missing,
}

/// Counts from a bounded reprocess run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchReprocessResult {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl BatchReprocessResult {
    fn absorb(&mut self, other: BatchReprocessResult) {
        self.attempted += other.attempted;
        self.succeeded += other.succeeded;
        self.failed += other.failed;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolveOutcome {
    Resolved,
    NotFound,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CleanupResult {
    pub expired_purged: usize,
    pub resolved_purged: usize,
}

#[derive(Default)]
struct Counters {
    added: AtomicU64,
    reprocessed: AtomicU64,
    reprocess_failed: AtomicU64,
}

/// Owns every dead letter entry; the outbox consumer only hands events in
pub struct DlqManager {
    store: Arc<dyn DlqStore>,
    outbox: Arc<dyn OutboxStore>,
    config: DlqConfig,
    /// Serializes mutations per aggregate type
    locks: DashMap<String, Arc<Mutex<()>>>,
    counters: Counters,
}

impl DlqManager {
    pub fn new(store: Arc<dyn DlqStore>, outbox: Arc<dyn OutboxStore>, config: DlqConfig) -> Self {
        Self {
            store,
            outbox,
            config,
            locks: DashMap::new(),
            counters: Counters::default(),
        }
    }

    pub fn config(&self) -> &DlqConfig {
        &self.config
    }

    fn lock_for(&self, aggregate_type: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(aggregate_type.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Record an event whose delivery attempts are exhausted
    pub async fn add_event(&self, record: &OutboxRecord, failure_reason: &str) -> DlqResult<DlqEntry> {
        let entry = DlqEntry::from_record(record, failure_reason, Utc::now());

        let lock = self.lock_for(&entry.aggregate_type);
        let _guard = lock.lock().await;
        self.store.upsert(&entry).await?;

        self.counters.added.fetch_add(1, Ordering::Relaxed);
        DLQ_METRICS
            .entries_added
            .with_label_values(&[&entry.aggregate_type])
            .inc();
        info!(
            event_id = entry.event_id,
            aggregate_type = %entry.aggregate_type,
            retry_count = entry.retry_count,
            reason = %failure_reason,
            "Event moved to dead letter queue"
        );
        Ok(entry)
    }

    /// Pending entries whose backoff has elapsed, at most `limit`.
    ///
    /// Entries older than the retention window are moved to the expired
    /// audit list as they are encountered.
    pub async fn get_pending_events(&self, aggregate_type: &str, limit: usize) -> DlqResult<Vec<DlqEntry>> {
        let now = Utc::now();
        let mut eligible = Vec::new();

        for entry in self.store.scan(aggregate_type).await? {
            if entry.is_expired(&self.config, now) {
                self.expire(entry, now).await?;
                continue;
            }
            if eligible.len() < limit && entry.is_eligible(&self.config, now) {
                eligible.push(entry);
            } else if entry.status == DlqStatus::Pending {
                debug!(event_id = entry.event_id, "DLQ entry still within backoff window");
            }
        }

        Ok(eligible)
    }

    async fn expire(&self, mut entry: DlqEntry, now: DateTime<Utc>) -> DlqResult<()> {
        let lock = self.lock_for(&entry.aggregate_type);
        let _guard = lock.lock().await;

        entry.status = DlqStatus::Expired;
        let record = AuditRecord {
            kind: AuditKind::Expired,
            recorded_at: now,
            resolved_by: None,
            entry,
        };
        if self.store.move_to_audit(&record).await? {
            DLQ_METRICS
                .expired
                .with_label_values(&[&record.entry.aggregate_type])
                .inc();
            info!(
                event_id = record.entry.event_id,
                aggregate_type = %record.entry.aggregate_type,
                failed_at = %record.entry.failed_at,
                "DLQ entry expired"
            );
        }
        Ok(())
    }

    /// Hand the entry's event back to the outbox consumer.
    ///
    /// On failure the entry's own retry counter grows; reaching the manual
    /// intervention threshold parks it as `MANUAL`.
    pub async fn reprocess_event(&self, entry: &DlqEntry) -> DlqResult<ReprocessOutcome> {
        let lock = self.lock_for(&entry.aggregate_type);
        let _guard = lock.lock().await;

        let Some(previous) = self.store.get(&entry.aggregate_type, entry.event_id).await? else {
            return Ok(ReprocessOutcome::Missing);
        };

        let mut current = previous.clone();
        current.status = DlqStatus::Processing;
        current.last_attempt = Some(Utc::now());
        self.store.upsert(&current).await?;

        match self.attempt_reprocess(current).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                self.roll_back(previous).await;
                Err(e)
            }
        }
    }

    /// Restore an entry left `PROCESSING` by a failed attempt
    async fn roll_back(&self, mut previous: DlqEntry) {
        if previous.status == DlqStatus::Processing {
            previous.status = DlqStatus::Pending;
        }
        if let Err(e) = self.store.upsert(&previous).await {
            error!(
                event_id = previous.event_id,
                aggregate_type = %previous.aggregate_type,
                error = %e,
                "Failed to roll back DLQ entry after reprocess error"
            );
        }
    }

    async fn attempt_reprocess(&self, mut current: DlqEntry) -> DlqResult<ReprocessOutcome> {
        let failure = match self.outbox.reset_for_redelivery(current.event_id).await {
            Ok(true) => None,
            Ok(false) => Some(format!("outbox record {} no longer exists", current.event_id)),
            Err(e) => Some(e.to_string()),
        };

        let Some(reason) = failure else {
            self.store.remove(&current.aggregate_type, current.event_id).await?;
            self.counters.reprocessed.fetch_add(1, Ordering::Relaxed);
            DLQ_METRICS
                .reprocessed
                .with_label_values(&[&current.aggregate_type])
                .inc();
            info!(
                event_id = current.event_id,
                aggregate_type = %current.aggregate_type,
                "DLQ entry handed back for redelivery"
            );
            return Ok(ReprocessOutcome::Redelivered);
        };

        current.dlq_retry_count += 1;
        current.failure_reason = reason;
        self.counters.reprocess_failed.fetch_add(1, Ordering::Relaxed);
        DLQ_METRICS
            .reprocess_failed
            .with_label_values(&[&current.aggregate_type])
            .inc();

        let outcome = if current.dlq_retry_count >= self.config.manual_intervention_threshold {
            current.status = DlqStatus::Manual;
            DLQ_METRICS
                .escalated_manual
                .with_label_values(&[&current.aggregate_type])
                .inc();
            error!(
                event_id = current.event_id,
                aggregate_type = %current.aggregate_type,
                attempts = current.dlq_retry_count,
                reason = %current.failure_reason,
                "DLQ entry requires manual intervention"
            );
            ReprocessOutcome::Manual {
                dlq_retry_count: current.dlq_retry_count,
            }
        } else {
            current.status = DlqStatus::Pending;
            warn!(
                event_id = current.event_id,
                aggregate_type = %current.aggregate_type,
                attempts = current.dlq_retry_count,
                reason = %current.failure_reason,
                "DLQ reprocess attempt failed"
            );
            ReprocessOutcome::Retrying {
                dlq_retry_count: current.dlq_retry_count,
            }
        };

        self.store.upsert(&current).await?;
        Ok(outcome)
    }

    /// Reprocess up to `limit` eligible entries of one aggregate type
    pub async fn batch_reprocess(&self, aggregate_type: &str, limit: usize) -> DlqResult<BatchReprocessResult> {
        let mut result = BatchReprocessResult::default();

        for entry in self.get_pending_events(aggregate_type, limit).await? {
            match self.reprocess_event(&entry).await? {
                ReprocessOutcome::Missing => {}
                ReprocessOutcome::Redelivered => {
                    result.attempted += 1;
                    result.succeeded += 1;
                }
                ReprocessOutcome::Retrying { .. } | ReprocessOutcome::Manual { .. } => {
                    result.attempted += 1;
                    result.failed += 1;
                }
            }
        }

        Ok(result)
    }

    /// Reprocess up to `limit` entries per aggregate type
    pub async fn reprocess_all(&self, limit: usize) -> DlqResult<BatchReprocessResult> {
        let mut total = BatchReprocessResult::default();
        for aggregate_type in self.store.aggregate_types().await? {
            match self.batch_reprocess(&aggregate_type, limit).await {
                Ok(result) => total.absorb(result),
                Err(e) => error!(
                    aggregate_type = %aggregate_type,
                    error = %e,
                    "Failed to reprocess DLQ entries"
                ),
            }
        }
        Ok(total)
    }

    /// Collect counts across aggregate types.
    ///
    /// `outbox_events_total` is the denominator of the failure rate.
    pub async fn get_dlq_stats(&self, outbox_events_total: u64) -> DlqResult<DlqStats> {
        let now = Utc::now();
        let mut aggregates = BTreeMap::new();

        for aggregate_type in self.store.aggregate_types().await? {
            let mut stats = AggregateStats::default();
            for entry in self.store.scan(&aggregate_type).await? {
                stats.count(entry.status, entry.failed_at);
            }
            DLQ_METRICS
                .active_entries
                .with_label_values(&[&aggregate_type])
                .set(stats.active as f64);
            aggregates.insert(aggregate_type, stats);
        }

        let total_active = aggregates.values().map(|s| s.active).sum();
        let total_manual = aggregates.values().map(|s| s.manual).sum();
        let oldest = aggregates.values().filter_map(|s| s.oldest_failed_at).min();

        Ok(DlqStats {
            collected_at: now,
            total_active,
            total_manual,
            oldest_entry_age_secs: oldest.map(|at| (now - at).num_seconds()),
            expired_audit: self.store.list_audit(AuditKind::Expired).await?.len() as u64,
            resolved_audit: self.store.list_audit(AuditKind::Resolved).await?.len() as u64,
            outbox_events_total,
            failure_rate: failure_rate(total_active, outbox_events_total),
            added_total: self.counters.added.load(Ordering::Relaxed),
            reprocessed_total: self.counters.reprocessed.load(Ordering::Relaxed),
            reprocess_failed_total: self.counters.reprocess_failed.load(Ordering::Relaxed),
            aggregates,
        })
    }

    /// Threshold alerts for `stats`
    pub fn get_alerts(&self, stats: &DlqStats) -> Vec<DlqAlert> {
        evaluate_alerts(stats, &self.config)
    }

    /// Operator action: close an entry and record it in the resolved audit list
    pub async fn mark_event_resolved(
        &self,
        event_id: i64,
        aggregate_type: &str,
        resolved_by: Option<&str>,
    ) -> DlqResult<ResolveOutcome> {
        let lock = self.lock_for(aggregate_type);
        let _guard = lock.lock().await;

        let Some(entry) = self.store.get(aggregate_type, event_id).await? else {
            return Ok(ResolveOutcome::NotFound);
        };

        let record = AuditRecord {
            kind: AuditKind::Resolved,
            recorded_at: Utc::now(),
            resolved_by: resolved_by.map(str::to_string),
            entry,
        };
        if !self.store.move_to_audit(&record).await? {
            return Ok(ResolveOutcome::NotFound);
        }

        DLQ_METRICS.resolved.with_label_values(&[aggregate_type]).inc();
        info!(
            event_id,
            aggregate_type = %aggregate_type,
            resolved_by = resolved_by.unwrap_or("unknown"),
            "DLQ entry resolved"
        );
        Ok(ResolveOutcome::Resolved)
    }

    /// Purge audit records older than `retention_days`; active entries are untouched
    pub async fn cleanup_expired_events(&self, retention_days: u32) -> DlqResult<CleanupResult> {
        let cutoff = Utc::now() - chrono::Duration::days(i64::from(retention_days));
        let result = CleanupResult {
            expired_purged: self.store.purge_audit(AuditKind::Expired, cutoff).await?,
            resolved_purged: self.store.purge_audit(AuditKind::Resolved, cutoff).await?,
        };

        if result.expired_purged + result.resolved_purged > 0 {
            info!(
                expired = result.expired_purged,
                resolved = result.resolved_purged,
                retention_days,
                "Purged DLQ audit records"
            );
        }
        Ok(result)
    }

    pub async fn list_manual_events(&self, aggregate_type: &str) -> DlqResult<Vec<DlqEntry>> {
        Ok(self
            .store
            .scan(aggregate_type)
            .await?
            .into_iter()
            .filter(|entry| entry.status == DlqStatus::Manual)
            .collect())
    }

    pub async fn get_entry(&self, aggregate_type: &str, event_id: i64) -> DlqResult<Option<DlqEntry>> {
        self.store.get(aggregate_type, event_id).await
    }

    pub async fn list_audit(&self, kind: AuditKind) -> DlqResult<Vec<AuditRecord>> {
        self.store.list_audit(kind).await
    }

    pub async fn aggregate_types(&self) -> DlqResult<Vec<String>> {
        self.store.aggregate_types().await
    }

    /// Periodically reprocess eligible entries and purge old audit records
    /// until `shutdown` flips to `true`
    pub async fn run_worker(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.config.reprocess_interval_secs,
            batch_size = self.config.reprocess_batch_size,
            "Starting DLQ worker"
        );

        let mut last_cleanup: Option<Instant> = None;

        while !*shutdown.borrow() {
            match self.reprocess_all(self.config.reprocess_batch_size).await {
                Ok(result) if result.attempted > 0 => info!(
                    attempted = result.attempted,
                    succeeded = result.succeeded,
                    failed = result.failed,
                    "DLQ reprocess cycle finished"
                ),
                Ok(_) => {}
                Err(e) => error!(error = %e, "DLQ reprocess cycle failed"),
            }

            if last_cleanup.map_or(true, |at| at.elapsed() >= AUDIT_CLEANUP_INTERVAL) {
                if let Err(e) = self.cleanup_expired_events(self.config.audit_retention_days).await {
                    error!(error = %e, "DLQ audit cleanup failed");
                }
                last_cleanup = Some(Instant::now());
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.reprocess_interval()) => {}
                _ = shutdown.changed() => {}
            }
        }

        info!("DLQ worker stopped");
    }
}
