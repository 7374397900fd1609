//! Outbox consumer: polls unprocessed rows and publishes them in order.

use crate::dlq::DlqManager;
use crate::outbox::config::OutboxConfig;
use crate::outbox::error::OutboxResult;
use crate::outbox::metrics::{ConsumerSnapshot, ConsumerStats, OUTBOX_METRICS};
use crate::outbox::record::OutboxRecord;
use crate::outbox::schema::{SchemaCheck, SchemaRegistry};
use crate::outbox::store::OutboxStore;
use crate::stream::{StreamError, StreamEvent, StreamProducer};
use chrono::Utc;
use serde::Serialize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};

/// Counts for one poll cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchOutcome {
    pub fetched: usize,
    pub published: usize,
    pub failed: usize,
    pub dead_lettered: usize,
    /// Rows left untouched because the stream log breaker was open
    pub deferred: usize,
}

enum DeliveryError {
    /// The breaker refused the call; not an attempt
    Rejected(String),
    Failed { reason: String, label: &'static str },
}

/// Drains the outbox table into the stream log
pub struct OutboxConsumer {
    store: Arc<dyn OutboxStore>,
    producer: Arc<StreamProducer>,
    schemas: Arc<SchemaRegistry>,
    dlq: Arc<DlqManager>,
    config: OutboxConfig,
    /// Held for the duration of a poll cycle
    cycle: Mutex<()>,
    shutdown: watch::Sender<bool>,
    stats: ConsumerStats,
}

impl OutboxConsumer {
    pub fn new(
        store: Arc<dyn OutboxStore>,
        producer: Arc<StreamProducer>,
        schemas: Arc<SchemaRegistry>,
        dlq: Arc<DlqManager>,
        config: OutboxConfig,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            store,
            producer,
            schemas,
            dlq,
            config,
            cycle: Mutex::new(()),
            shutdown,
            stats: ConsumerStats::default(),
        }
    }

    pub fn config(&self) -> &OutboxConfig {
        &self.config
    }

    fn is_stopping(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Up to `limit` unprocessed rows, oldest first
    pub async fn fetch_batch(&self, limit: usize) -> OutboxResult<Vec<OutboxRecord>> {
        self.store.fetch_unprocessed(limit).await
    }

    /// Deliver rows one at a time in the given order.
    ///
    /// Failures are counted against the row; a row reaching the retry
    /// ceiling moves to the DLQ and is marked processed. An open breaker
    /// stops the batch and leaves the remaining rows for the next cycle.
    pub async fn process_batch(&self, events: Vec<OutboxRecord>) -> BatchOutcome {
        let mut outcome = BatchOutcome {
            fetched: events.len(),
            ..Default::default()
        };

        for (index, record) in events.iter().enumerate() {
            match self.deliver(record).await {
                Ok(()) => {
                    outcome.published += 1;
                    self.on_delivered(record).await;
                }
                Err(DeliveryError::Rejected(breaker)) => {
                    outcome.deferred = events.len() - index;
                    warn!(
                        breaker = %breaker,
                        deferred = outcome.deferred,
                        "Stream log circuit open; deferring rest of batch"
                    );
                    break;
                }
                Err(DeliveryError::Failed { reason, label }) => {
                    outcome.failed += 1;
                    if self.on_failed(record, &reason, label).await {
                        outcome.dead_lettered += 1;
                    }
                }
            }
        }

        outcome
    }

    async fn deliver(&self, record: &OutboxRecord) -> Result<(), DeliveryError> {
        match self.schemas.validate(record) {
            Ok(SchemaCheck::Valid { .. }) => {}
            Ok(SchemaCheck::Unregistered) => warn!(
                event_id = record.id,
                aggregate_type = %record.aggregate_type,
                "No schema registered; publishing unvalidated"
            ),
            Err(e) => {
                return Err(DeliveryError::Failed {
                    reason: e.to_string(),
                    label: "validation",
                })
            }
        }

        let event = StreamEvent::from_outbox_record(record);
        match self.producer.publish(&event).await {
            Ok(_) => Ok(()),
            Err(StreamError::CircuitOpen(name)) => Err(DeliveryError::Rejected(name)),
            Err(e) => Err(DeliveryError::Failed {
                reason: e.to_string(),
                label: "publish",
            }),
        }
    }

    async fn on_delivered(&self, record: &OutboxRecord) {
        self.stats.processed.fetch_add(1, Ordering::Relaxed);
        OUTBOX_METRICS
            .events_processed
            .with_label_values(&[&record.aggregate_type])
            .inc();

        // The row will be published again next cycle; delivery is at-least-once.
        if let Err(e) = self.store.mark_processed(record.id, Utc::now()).await {
            error!(event_id = record.id, error = %e, "Failed to mark published event processed");
        } else {
            debug!(event_id = record.id, aggregate_type = %record.aggregate_type, "Event delivered");
        }
    }

    /// Returns `true` when the row was handed to the DLQ
    async fn on_failed(&self, record: &OutboxRecord, reason: &str, label: &'static str) -> bool {
        self.stats.errors.fetch_add(1, Ordering::Relaxed);
        OUTBOX_METRICS
            .events_failed
            .with_label_values(&[&record.aggregate_type, label])
            .inc();

        let retry_count = match self.store.increment_retry(record.id).await {
            Ok(count) => count,
            Err(e) => {
                error!(event_id = record.id, error = %e, "Failed to record delivery failure");
                return false;
            }
        };

        warn!(
            event_id = record.id,
            aggregate_type = %record.aggregate_type,
            retry_count,
            error = %reason,
            "Event delivery failed"
        );

        if retry_count < self.config.max_retries {
            return false;
        }

        let exhausted = OutboxRecord {
            retry_count,
            ..record.clone()
        };
        if let Err(e) = self.dlq.add_event(&exhausted, reason).await {
            error!(event_id = record.id, error = %e, "Failed to move exhausted event to DLQ");
            return false;
        }
        if let Err(e) = self.store.mark_processed(record.id, Utc::now()).await {
            error!(event_id = record.id, error = %e, "Failed to mark dead-lettered event processed");
        }

        self.stats.dead_lettered.fetch_add(1, Ordering::Relaxed);
        OUTBOX_METRICS
            .events_dead_lettered
            .with_label_values(&[&record.aggregate_type])
            .inc();
        true
    }

    /// Run one guarded poll cycle.
    ///
    /// Returns `None` without doing anything if a cycle is already running
    /// or the consumer is stopping.
    pub async fn run_once(&self) -> Option<OutboxResult<BatchOutcome>> {
        let _cycle = self.cycle.try_lock().ok()?;
        if self.is_stopping() {
            return None;
        }

        let start = Instant::now();
        *self.stats.last_poll_at.lock() = Some(Utc::now());
        self.stats.cycles.fetch_add(1, Ordering::Relaxed);

        let result = match self.fetch_batch(self.config.batch_size).await {
            Ok(events) => {
                OUTBOX_METRICS.batch_size.observe(events.len() as f64);
                Ok(self.process_batch(events).await)
            }
            Err(e) => Err(e),
        };

        let elapsed = start.elapsed();
        *self.stats.last_batch_duration.lock() = Some(elapsed);
        OUTBOX_METRICS.batch_duration.observe(elapsed.as_secs_f64());

        Some(result)
    }

    /// Poll until [`OutboxConsumer::stop`] is called, sleeping the poll
    /// interval after every cycle regardless of its outcome
    pub async fn run(self: Arc<Self>) {
        let mut shutdown = self.shutdown.subscribe();
        info!(
            poll_interval_ms = self.config.poll_interval_ms,
            batch_size = self.config.batch_size,
            max_retries = self.config.max_retries,
            "Starting outbox consumer"
        );

        while !self.is_stopping() {
            match self.run_once().await {
                Some(Ok(outcome)) if outcome.fetched > 0 => debug!(
                    fetched = outcome.fetched,
                    published = outcome.published,
                    failed = outcome.failed,
                    dead_lettered = outcome.dead_lettered,
                    deferred = outcome.deferred,
                    "Outbox poll cycle finished"
                ),
                Some(Err(e)) => error!(error = %e, "Outbox poll cycle failed"),
                _ => {}
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval()) => {}
                _ = shutdown.changed() => {}
            }
        }

        info!("Outbox consumer loop exited");
    }

    /// Stop polling, let an in-flight cycle finish, then release connections
    pub async fn stop(&self) {
        self.shutdown.send_replace(true);
        let _cycle = self.cycle.lock().await;

        if let Err(e) = self.store.close().await {
            error!(error = %e, "Failed to close outbox store");
        }
        info!("Outbox consumer stopped");
    }

    pub fn snapshot(&self) -> ConsumerSnapshot {
        self.stats.snapshot(!self.is_stopping())
    }
}
