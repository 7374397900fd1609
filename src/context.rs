//! Wiring of stores, producer, consumer and DLQ manager from configuration.

use crate::circuit_breaker::{CircuitBreakerRegistry, CircuitBreakerStats};
use crate::config::{Config, StateBackend};
use crate::dlq::{DlqAlert, DlqManager, DlqStats, DlqStore, InMemoryDlqStore, RedisDlqStore};
use crate::error::{AppError, Result};
use crate::metrics::{encode_metrics, init_metrics};
use crate::outbox::{
    ConsumerSnapshot, InMemoryOutboxStore, OutboxConsumer, OutboxStore, PostgresOutboxStore,
    SchemaRegistry,
};
use crate::stream::{InMemoryStreamLog, RedisStreamLog, StreamLog, StreamProducer};
use chrono::{DateTime, Utc};
use prometheus::Registry;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Breaker guarding stream log appends
pub const STREAM_LOG_BREAKER: &str = "stream-log";

/// Everything a running relay needs, built once at startup
pub struct AppContext {
    pub config: Config,
    pub breakers: Arc<CircuitBreakerRegistry>,
    pub outbox_store: Arc<dyn OutboxStore>,
    pub stream_log: Arc<dyn StreamLog>,
    pub producer: Arc<StreamProducer>,
    pub schemas: Arc<SchemaRegistry>,
    pub dlq: Arc<DlqManager>,
    pub consumer: Arc<OutboxConsumer>,
    pub registry: Registry,
}

/// Background tasks started by [`AppContext::spawn`]
pub struct RelayTasks {
    shutdown: watch::Sender<bool>,
    consumer: JoinHandle<()>,
    dlq_worker: JoinHandle<()>,
}

/// Point-in-time view of the relay for operators
#[derive(Debug, Clone, Serialize)]
pub struct RelaySnapshot {
    pub collected_at: DateTime<Utc>,
    pub consumer: ConsumerSnapshot,
    pub breakers: Vec<CircuitBreakerStats>,
    pub dlq: DlqStats,
    pub alerts: Vec<DlqAlert>,
}

impl AppContext {
    /// Build a context on the backend named in `config.state`
    pub async fn build(config: Config) -> Result<Self> {
        match config.state.backend {
            StateBackend::InMemory => {
                tracing::info!("Initializing in-memory outbox, stream log and DLQ");
                Self::in_memory(config)
            }
            StateBackend::External => {
                let database_url = config.state.database_url.clone().ok_or_else(|| {
                    AppError::Configuration(
                        "External backend requires 'state.database_url'".to_string(),
                    )
                })?;
                let redis_url = config.state.redis_url.clone().ok_or_else(|| {
                    AppError::Configuration(
                        "External backend requires 'state.redis_url'".to_string(),
                    )
                })?;

                tracing::info!("Initializing PostgreSQL outbox store");
                let outbox = PostgresOutboxStore::connect(&database_url, config.state.pool_size).await?;
                outbox.ensure_schema().await?;

                tracing::info!("Initializing Redis stream log and DLQ store");
                let log = RedisStreamLog::connect(&redis_url).await?;
                let dlq_store =
                    RedisDlqStore::connect(&redis_url, &config.stream.key_prefix).await?;

                Self::assemble(config, Arc::new(outbox), Arc::new(log), Arc::new(dlq_store))
            }
        }
    }

    /// Process-local context; also used by tests
    pub fn in_memory(config: Config) -> Result<Self> {
        Self::assemble(
            config,
            Arc::new(InMemoryOutboxStore::new()),
            Arc::new(InMemoryStreamLog::new()),
            Arc::new(InMemoryDlqStore::new()),
        )
    }

    /// Assemble a context over caller-supplied stores
    pub fn assemble(
        config: Config,
        outbox_store: Arc<dyn OutboxStore>,
        stream_log: Arc<dyn StreamLog>,
        dlq_store: Arc<dyn DlqStore>,
    ) -> Result<Self> {
        config.validate()?;

        let registry = Registry::new();
        if config.observability.prometheus_enabled {
            init_metrics(&registry)
                .map_err(|e| AppError::Internal(format!("Failed to register metrics: {e}")))?;
        }

        let breakers = Arc::new(CircuitBreakerRegistry::with_default_config(
            config.circuit_breaker.to_breaker_config(),
        ));
        let producer = Arc::new(
            StreamProducer::new(stream_log.clone(), config.stream.clone())
                .with_breaker(breakers.get_or_default(STREAM_LOG_BREAKER)),
        );
        let schemas = Arc::new(SchemaRegistry::with_defaults());
        let dlq = Arc::new(DlqManager::new(
            dlq_store,
            outbox_store.clone(),
            config.dlq.clone(),
        ));
        let consumer = Arc::new(OutboxConsumer::new(
            outbox_store.clone(),
            producer.clone(),
            schemas.clone(),
            dlq.clone(),
            config.outbox.clone(),
        ));

        Ok(Self {
            config,
            breakers,
            outbox_store,
            stream_log,
            producer,
            schemas,
            dlq,
            consumer,
            registry,
        })
    }

    pub async fn snapshot(&self) -> Result<RelaySnapshot> {
        let outbox_total = self.outbox_store.count_total().await?;
        let dlq = self.dlq.get_dlq_stats(outbox_total).await?;
        let alerts = self.dlq.get_alerts(&dlq);

        Ok(RelaySnapshot {
            collected_at: Utc::now(),
            consumer: self.consumer.snapshot(),
            breakers: self.breakers.get_all_stats(),
            dlq,
            alerts,
        })
    }

    /// Start the outbox consumer loop and the DLQ worker
    pub fn spawn(&self) -> RelayTasks {
        let (shutdown, shutdown_rx) = watch::channel(false);
        RelayTasks {
            shutdown,
            consumer: tokio::spawn(self.consumer.clone().run()),
            dlq_worker: tokio::spawn(self.dlq.clone().run_worker(shutdown_rx)),
        }
    }

    /// Stop both tasks. The DLQ worker resets outbox rows, so it drains
    /// before the consumer closes the outbox store.
    pub async fn shutdown(&self, tasks: RelayTasks) {
        tasks.shutdown.send_replace(true);
        if let Err(e) = tasks.dlq_worker.await {
            tracing::error!(error = %e, "DLQ worker task panicked");
        }

        self.consumer.stop().await;
        if let Err(e) = tasks.consumer.await {
            tracing::error!(error = %e, "Outbox consumer task panicked");
        }
    }

    /// Prometheus text exposition of this context's registry
    pub fn metrics_text(&self) -> String {
        encode_metrics(&self.registry)
    }
}
