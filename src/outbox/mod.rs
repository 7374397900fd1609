//! Transactional outbox: the table abstraction, payload schemas and the
//! consumer that drains unprocessed rows into the stream log.
//!
//! ```text
//! outbox_events ──► fetch_batch ──► schema check ──► StreamProducer
//!                                        │                 │
//!                                        ▼                 ▼
//!                              increment retry_count   mark processed
//!                                        │
//!                          retry_count >= max_retries ──► DlqManager
//! ```
//!
//! Rows are delivered at least once: a row marked processed has been
//! published or handed to the dead letter queue.

mod config;
mod consumer;
mod error;
mod metrics;
mod postgres;
mod record;
mod schema;
mod store;

pub use config::OutboxConfig;
pub use consumer::{BatchOutcome, OutboxConsumer};
pub use error::{OutboxError, OutboxResult, SchemaError};
pub use metrics::{init_outbox_metrics, ConsumerSnapshot, OUTBOX_METRICS};
pub use postgres::PostgresOutboxStore;
pub use record::{NewOutboxRecord, OutboxRecord};
pub use schema::{
    NotificationPayload, OrderPayload, PayloadSchema, ProductPayload, SchemaCheck, SchemaRegistry,
    ToolExecutionPayload, TypedSchema, UserPayload,
};
pub use store::{InMemoryOutboxStore, OutboxStore};
