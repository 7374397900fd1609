//! Routes events to topics and appends them to the stream log.

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerError};
use crate::stream::config::StreamConfig;
use crate::stream::error::{StreamError, StreamResult};
use crate::stream::event::StreamEvent;
use crate::stream::log::{MessageId, StreamLog};
use crate::stream::metrics::STREAM_METRICS;
use crate::stream::router::TopicRouter;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Publishes [`StreamEvent`]s to their routed topic
pub struct StreamProducer {
    log: Arc<dyn StreamLog>,
    router: TopicRouter,
    config: StreamConfig,
    breaker: Option<Arc<CircuitBreaker>>,
}

impl StreamProducer {
    pub fn new(log: Arc<dyn StreamLog>, config: StreamConfig) -> Self {
        Self {
            log,
            router: TopicRouter::new(config.default_topic.clone()),
            config,
            breaker: None,
        }
    }

    /// Guard appends with a circuit breaker; rejections surface as
    /// [`StreamError::CircuitOpen`] without touching the log store
    pub fn with_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.breaker = Some(breaker);
        self
    }

    pub fn router(&self) -> &TopicRouter {
        &self.router
    }

    /// Store key for a logical topic
    pub fn stream_key(&self, topic: &str) -> String {
        format!("{}{}", self.config.key_prefix, topic)
    }

    /// Append `event` to its topic and return the new message id.
    ///
    /// Failures are returned to the caller so it can apply its own retry policy.
    pub async fn publish(&self, event: &StreamEvent) -> StreamResult<MessageId> {
        let topic = self
            .router
            .topic_for(&event.aggregate_type, &event.event_type)
            .to_string();
        let key = self.stream_key(&topic);
        let fields = event.to_fields()?;
        let backend = self.log.backend_name();

        if let Some((_, payload)) = fields.iter().find(|(name, _)| name == "payload") {
            STREAM_METRICS
                .payload_size
                .with_label_values(&[&topic])
                .observe(payload.len() as f64);
        }

        let start = Instant::now();
        let result = self.append(key, fields).await;
        STREAM_METRICS
            .publish_latency
            .with_label_values(&[&topic, backend])
            .observe(start.elapsed().as_secs_f64());

        match result {
            Ok(id) => {
                STREAM_METRICS
                    .messages_published
                    .with_label_values(&[&topic, backend])
                    .inc();
                debug!(
                    event_id = %event.event_id,
                    topic = %topic,
                    message_id = %id,
                    "Published event"
                );
                Ok(id)
            }
            Err(err) => {
                let reason = if err.is_circuit_open() { "circuit_open" } else { "append" };
                STREAM_METRICS
                    .publish_failures
                    .with_label_values(&[&topic, backend, reason])
                    .inc();
                Err(err)
            }
        }
    }

    async fn append(&self, key: String, fields: Vec<(String, String)>) -> StreamResult<MessageId> {
        let max_len = self.config.trim_len();

        let Some(breaker) = &self.breaker else {
            return self.log.append(&key, &fields, max_len).await;
        };

        let log = Arc::clone(&self.log);
        breaker
            .call(move || {
                Box::pin(async move { log.append(&key, &fields, max_len).await })
            })
            .await
            .map_err(|err| match err {
                CircuitBreakerError::Open(name)
                | CircuitBreakerError::HalfOpenLimitExceeded(name) => StreamError::CircuitOpen(name),
                other => StreamError::PublishFailed(other.to_string()),
            })
    }

    /// Most recent `count` events on `topic`, newest first.
    ///
    /// Entries that do not decode as events are skipped.
    pub async fn read_latest(
        &self,
        topic: &str,
        count: usize,
    ) -> StreamResult<Vec<(MessageId, StreamEvent)>> {
        let entries = self
            .log
            .rev_range(&self.stream_key(topic), "+", "-", Some(count))
            .await?;

        Ok(entries
            .into_iter()
            .filter_map(|entry| match StreamEvent::from_fields(&entry.fields) {
                Ok(event) => Some((entry.id, event)),
                Err(e) => {
                    warn!(topic = %topic, message_id = %entry.id, error = %e, "Skipping undecodable stream entry");
                    None
                }
            })
            .collect())
    }

    /// Number of entries currently on `topic`
    pub async fn topic_len(&self, topic: &str) -> StreamResult<usize> {
        self.log.len(&self.stream_key(topic)).await
    }
}
