//! Dead letter queue for events whose delivery attempts are exhausted.
//!
//! Entries live in a per-aggregate-type map keyed by outbox event id.
//! Reprocessing resets the originating outbox row so the consumer delivers
//! it again; backoff grows exponentially with each failed attempt, and an
//! entry that keeps failing is parked as `MANUAL` until an operator
//! resolves it. Entries older than the retention window expire into an
//! audit list.
//!
//! ```text
//! PENDING ──(backoff elapsed)──► PROCESSING ──► removed (row reset)
//!    ▲                               │
//!    └──────── failure ──────────────┤
//!                                    └── failure at ceiling ──► MANUAL ──► resolved
//! any active entry past retention ──► EXPIRED (audit only)
//! ```

mod alerts;
mod config;
mod entry;
mod error;
mod manager;
mod metrics;
mod redis_store;
mod store;

pub use alerts::{evaluate_alerts, failure_rate, AggregateStats, AlertKind, AlertSeverity, DlqAlert, DlqStats};
pub use config::DlqConfig;
pub use entry::{AuditKind, AuditRecord, DlqEntry, DlqStatus};
pub use error::{DlqError, DlqResult};
pub use manager::{BatchReprocessResult, CleanupResult, DlqManager, ReprocessOutcome, ResolveOutcome};
pub use metrics::{init_dlq_metrics, DLQ_METRICS};
pub use redis_store::RedisDlqStore;
pub use store::{DlqStore, InMemoryDlqStore};
