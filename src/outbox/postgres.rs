//! PostgreSQL-backed outbox table.
//!
//! Rows that cannot be decoded are force-marked processed and logged so
//! they never block the poll loop.

use crate::outbox::error::{OutboxError, OutboxResult};
use crate::outbox::record::{NewOutboxRecord, OutboxRecord};
use crate::outbox::store::OutboxStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::{error, info, instrument};

const CREATE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS outbox_events (
    id BIGSERIAL PRIMARY KEY,
    aggregate_id TEXT NOT NULL,
    aggregate_type TEXT NOT NULL,
    event_type TEXT NOT NULL,
    payload JSONB NOT NULL,
    processed BOOLEAN NOT NULL DEFAULT FALSE,
    processed_at TIMESTAMPTZ,
    retry_count INTEGER NOT NULL DEFAULT 0,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

const CREATE_PENDING_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_outbox_events_pending
    ON outbox_events (created_at, id)
    WHERE processed = FALSE
"#;

const COLUMNS: &str =
    "id, aggregate_id, aggregate_type, event_type, payload, processed, processed_at, retry_count, created_at";

/// Outbox table stored in PostgreSQL
#[derive(Debug, Clone)]
pub struct PostgresOutboxStore {
    pool: PgPool,
}

impl PostgresOutboxStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a connection pool of `pool_size` connections
    pub async fn connect(database_url: &str, pool_size: u32) -> OutboxResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(pool_size)
            .connect(database_url)
            .await?;

        info!(pool_size, "Connected to outbox database");
        Ok(Self::new(pool))
    }

    /// Create the outbox table and its pending-row index if missing
    pub async fn ensure_schema(&self) -> OutboxResult<()> {
        sqlx::query(CREATE_TABLE).execute(&self.pool).await?;
        sqlx::query(CREATE_PENDING_INDEX).execute(&self.pool).await?;
        Ok(())
    }

    fn decode(row: &PgRow) -> Result<OutboxRecord, sqlx::Error> {
        let retry_count: i32 = row.try_get("retry_count")?;
        let retry_count = u32::try_from(retry_count).map_err(|e| sqlx::Error::ColumnDecode {
            index: "retry_count".to_string(),
            source: Box::new(e),
        })?;

        Ok(OutboxRecord {
            id: row.try_get("id")?,
            aggregate_id: row.try_get("aggregate_id")?,
            aggregate_type: row.try_get("aggregate_type")?,
            event_type: row.try_get("event_type")?,
            payload: row.try_get("payload")?,
            processed: row.try_get("processed")?,
            processed_at: row.try_get("processed_at")?,
            retry_count,
            created_at: row.try_get("created_at")?,
        })
    }

    /// Take an undecodable row off the delivery path
    async fn quarantine(&self, row: &PgRow, cause: &sqlx::Error) {
        let id: i64 = match row.try_get("id") {
            Ok(id) => id,
            Err(e) => {
                error!(error = %e, cause = %cause, "Outbox row has no readable id; cannot quarantine");
                return;
            }
        };

        error!(event_id = id, error = %cause, "Outbox row is corrupt; marking processed without delivery");
        if let Err(e) = self.mark_processed(id, Utc::now()).await {
            error!(event_id = id, error = %e, "Failed to mark corrupt outbox row processed");
        }
    }
}

#[async_trait]
impl OutboxStore for PostgresOutboxStore {
    #[instrument(skip(self), err)]
    async fn fetch_unprocessed(&self, limit: usize) -> OutboxResult<Vec<OutboxRecord>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = sqlx::query(&format!(
            "SELECT {} FROM outbox_events WHERE processed = FALSE ORDER BY created_at ASC, id ASC LIMIT $1",
            COLUMNS
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            match Self::decode(row) {
                Ok(record) => records.push(record),
                Err(e) => self.quarantine(row, &e).await,
            }
        }
        Ok(records)
    }

    async fn mark_processed(&self, id: i64, at: DateTime<Utc>) -> OutboxResult<()> {
        let result = sqlx::query(
            "UPDATE outbox_events SET processed = TRUE, processed_at = $2 WHERE id = $1",
        )
        .bind(id)
        .bind(at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(OutboxError::NotFound(id));
        }
        Ok(())
    }

    async fn increment_retry(&self, id: i64) -> OutboxResult<u32> {
        let count: Option<i32> = sqlx::query_scalar(
            "UPDATE outbox_events SET retry_count = retry_count + 1 WHERE id = $1 RETURNING retry_count",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        let count = count.ok_or(OutboxError::NotFound(id))?;
        Ok(u32::try_from(count).unwrap_or(0))
    }

    async fn reset_for_redelivery(&self, id: i64) -> OutboxResult<bool> {
        let result = sqlx::query(
            "UPDATE outbox_events SET processed = FALSE, processed_at = NULL, retry_count = 0 WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn insert(&self, record: NewOutboxRecord) -> OutboxResult<OutboxRecord> {
        let row = sqlx::query(&format!(
            "INSERT INTO outbox_events (aggregate_id, aggregate_type, event_type, payload) \
             VALUES ($1, $2, $3, $4) RETURNING {}",
            COLUMNS
        ))
        .bind(&record.aggregate_id)
        .bind(&record.aggregate_type)
        .bind(&record.event_type)
        .bind(&record.payload)
        .fetch_one(&self.pool)
        .await?;

        Ok(Self::decode(&row)?)
    }

    async fn get(&self, id: i64) -> OutboxResult<Option<OutboxRecord>> {
        let row = sqlx::query(&format!("SELECT {} FROM outbox_events WHERE id = $1", COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::decode).transpose().map_err(OutboxError::from)
    }

    async fn count_total(&self) -> OutboxResult<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM outbox_events")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }

    async fn close(&self) -> OutboxResult<()> {
        self.pool.close().await;
        info!("Closed outbox database pool");
        Ok(())
    }
}
