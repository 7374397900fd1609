//! Stream routing and publishing.
//!
//! Domain events are routed to a named topic by aggregate type, flattened
//! into string fields (the payload travels as an embedded JSON document) and
//! appended to an append-only log.
//!
//! ```text
//! OutboxRecord ──► StreamEvent ──► TopicRouter ──► StreamProducer ──► StreamLog
//!                                                                     ├── InMemoryStreamLog
//!                                                                     └── RedisStreamLog
//! ```
//!
//! # Example
//!
//! ```no_run
//! use outbox_relay::stream::{InMemoryStreamLog, StreamConfig, StreamEvent, StreamProducer};
//! use std::sync::Arc;
//!
//! # async fn demo(event: StreamEvent) -> Result<(), Box<dyn std::error::Error>> {
//! let producer = StreamProducer::new(Arc::new(InMemoryStreamLog::new()), StreamConfig::default());
//! let id = producer.publish(&event).await?;
//! println!("appended {}", id);
//! # Ok(())
//! # }
//! ```

mod config;
mod error;
mod event;
mod log;
mod metrics;
mod producer;
mod redis_log;
mod router;

pub use config::StreamConfig;
pub use error::{StreamError, StreamResult};
pub use event::{StreamEvent, RETRY_COUNT_KEY};
pub use log::{InMemoryStreamLog, MessageId, StreamEntry, StreamLog};
pub use metrics::{init_stream_metrics, STREAM_METRICS};
pub use producer::StreamProducer;
pub use redis_log::RedisStreamLog;
pub use router::{normalize_aggregate_type, TopicRouter};
