//! Redis Streams backend for the stream log.

use crate::stream::error::{StreamError, StreamResult};
use crate::stream::log::{MessageId, StreamEntry, StreamLog};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::streams::StreamRangeReply;
use redis::{AsyncCommands, Client};
use tracing::{debug, info};

/// Stream log stored in Redis Streams, one stream key per topic
#[derive(Clone)]
pub struct RedisStreamLog {
    connection: ConnectionManager,
}

impl RedisStreamLog {
    /// Connect and verify the server answers PING
    pub async fn connect(redis_url: &str) -> StreamResult<Self> {
        let client = Client::open(redis_url).map_err(|e| {
            StreamError::ConnectionFailed(format!("Failed to create Redis client: {}", e))
        })?;
        let connection = ConnectionManager::new(client).await.map_err(|e| {
            StreamError::ConnectionFailed(format!("Failed to connect to Redis: {}", e))
        })?;

        Self::from_connection(connection).await
    }

    /// Wrap an existing connection manager
    pub async fn from_connection(connection: ConnectionManager) -> StreamResult<Self> {
        let mut test_conn = connection.clone();
        redis::cmd("PING")
            .query_async::<_, String>(&mut test_conn)
            .await
            .map_err(|e| StreamError::ConnectionFailed(format!("Redis connection test failed: {}", e)))?;

        info!("Initialized Redis stream log");
        Ok(Self { connection })
    }

    fn convert(reply: StreamRangeReply) -> StreamResult<Vec<StreamEntry>> {
        reply
            .ids
            .into_iter()
            .map(|stream_id| {
                let id: MessageId = stream_id.id.parse()?;
                let mut fields = stream_id
                    .map
                    .iter()
                    .map(|(key, value)| {
                        redis::from_redis_value::<String>(value)
                            .map(|value| (key.clone(), value))
                            .map_err(|e| StreamError::InvalidMessage(e.to_string()))
                    })
                    .collect::<StreamResult<Vec<_>>>()?;
                fields.sort();
                Ok(StreamEntry { id, fields })
            })
            .collect()
    }
}

#[async_trait]
impl StreamLog for RedisStreamLog {
    async fn append(
        &self,
        topic: &str,
        fields: &[(String, String)],
        max_len: Option<usize>,
    ) -> StreamResult<MessageId> {
        let mut conn = self.connection.clone();

        let mut cmd = redis::cmd("XADD");
        cmd.arg(topic);
        if let Some(max_len) = max_len {
            cmd.arg("MAXLEN").arg("~").arg(max_len);
        }
        cmd.arg("*");
        for (key, value) in fields {
            cmd.arg(key).arg(value);
        }

        let id: String = cmd
            .query_async(&mut conn)
            .await
            .map_err(|e| StreamError::PublishFailed(format!("XADD to '{}' failed: {}", topic, e)))?;

        debug!(topic = %topic, id = %id, "Appended stream entry");
        id.parse()
    }

    async fn range(
        &self,
        topic: &str,
        start: &str,
        end: &str,
        count: Option<usize>,
    ) -> StreamResult<Vec<StreamEntry>> {
        let mut conn = self.connection.clone();
        let reply: StreamRangeReply = match count {
            Some(count) => conn.xrange_count(topic, start, end, count).await?,
            None => conn.xrange(topic, start, end).await?,
        };
        Self::convert(reply)
    }

    async fn rev_range(
        &self,
        topic: &str,
        end: &str,
        start: &str,
        count: Option<usize>,
    ) -> StreamResult<Vec<StreamEntry>> {
        let mut conn = self.connection.clone();
        let reply: StreamRangeReply = match count {
            Some(count) => conn.xrevrange_count(topic, end, start, count).await?,
            None => conn.xrevrange(topic, end, start).await?,
        };
        Self::convert(reply)
    }

    async fn len(&self, topic: &str) -> StreamResult<usize> {
        let mut conn = self.connection.clone();
        let len: usize = conn.xlen(topic).await?;
        Ok(len)
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}
