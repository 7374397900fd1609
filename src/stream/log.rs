//! Append-only stream log abstraction and the in-memory backend.

use crate::stream::error::{StreamError, StreamResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::str::FromStr;

/// Identifier of an appended entry, `<millis>-<seq>`, monotonic per topic
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MessageId {
    pub millis: u64,
    pub seq: u64,
}

impl MessageId {
    pub const MIN: MessageId = MessageId { millis: 0, seq: 0 };
    pub const MAX: MessageId = MessageId {
        millis: u64::MAX,
        seq: u64::MAX,
    };

    pub fn new(millis: u64, seq: u64) -> Self {
        Self { millis, seq }
    }

    /// Parse a range bound: `-`, `+`, `<millis>` or `<millis>-<seq>`.
    /// A bare millisecond value covers the whole millisecond.
    pub fn parse_bound(bound: &str, is_end: bool) -> StreamResult<Self> {
        match bound {
            "-" => Ok(Self::MIN),
            "+" => Ok(Self::MAX),
            _ if !bound.contains('-') => {
                let millis = parse_part(bound)?;
                let seq = if is_end { u64::MAX } else { 0 };
                Ok(Self { millis, seq })
            }
            _ => bound.parse(),
        }
    }
}

fn parse_part(part: &str) -> StreamResult<u64> {
    part.parse::<u64>()
        .map_err(|_| StreamError::InvalidMessage(format!("invalid message id part '{}'", part)))
}

impl FromStr for MessageId {
    type Err = StreamError;

    fn from_str(s: &str) -> StreamResult<Self> {
        let (millis, seq) = s
            .split_once('-')
            .ok_or_else(|| StreamError::InvalidMessage(format!("invalid message id '{}'", s)))?;
        Ok(Self {
            millis: parse_part(millis)?,
            seq: parse_part(seq)?,
        })
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.millis, self.seq)
    }
}

/// An entry read back from the log
#[derive(Debug, Clone, PartialEq)]
pub struct StreamEntry {
    pub id: MessageId,
    pub fields: Vec<(String, String)>,
}

/// Named append-only partitions with range reads by message id
#[async_trait]
pub trait StreamLog: Send + Sync {
    /// Append fields to `topic`, trimming the oldest entries beyond `max_len`
    async fn append(
        &self,
        topic: &str,
        fields: &[(String, String)],
        max_len: Option<usize>,
    ) -> StreamResult<MessageId>;

    /// Entries with `start <= id <= end`, oldest first
    async fn range(
        &self,
        topic: &str,
        start: &str,
        end: &str,
        count: Option<usize>,
    ) -> StreamResult<Vec<StreamEntry>>;

    /// Entries with `start <= id <= end`, newest first
    async fn rev_range(
        &self,
        topic: &str,
        end: &str,
        start: &str,
        count: Option<usize>,
    ) -> StreamResult<Vec<StreamEntry>>;

    /// Number of entries currently held by `topic`
    async fn len(&self, topic: &str) -> StreamResult<usize>;

    /// Backend label used in metrics
    fn backend_name(&self) -> &'static str;
}

#[derive(Default)]
struct Topic {
    entries: VecDeque<StreamEntry>,
    last_id: Option<MessageId>,
}

/// Process-local stream log for development and tests
#[derive(Default)]
pub struct InMemoryStreamLog {
    topics: Mutex<HashMap<String, Topic>>,
}

impl InMemoryStreamLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(last: Option<MessageId>) -> MessageId {
        let now = chrono::Utc::now().timestamp_millis().max(0) as u64;
        match last {
            Some(last) if last.millis >= now => MessageId::new(last.millis, last.seq + 1),
            _ => MessageId::new(now, 0),
        }
    }

    fn select(
        &self,
        topic: &str,
        start: &str,
        end: &str,
        count: Option<usize>,
        reverse: bool,
    ) -> StreamResult<Vec<StreamEntry>> {
        let start = MessageId::parse_bound(start, false)?;
        let end = MessageId::parse_bound(end, true)?;
        let limit = count.unwrap_or(usize::MAX);

        let topics = self.topics.lock();
        let Some(topic) = topics.get(topic) else {
            return Ok(Vec::new());
        };

        let in_range = |entry: &&StreamEntry| entry.id >= start && entry.id <= end;
        let selected = if reverse {
            topic.entries.iter().rev().filter(in_range).take(limit).cloned().collect()
        } else {
            topic.entries.iter().filter(in_range).take(limit).cloned().collect()
        };
        Ok(selected)
    }
}

#[async_trait]
impl StreamLog for InMemoryStreamLog {
    async fn append(
        &self,
        topic: &str,
        fields: &[(String, String)],
        max_len: Option<usize>,
    ) -> StreamResult<MessageId> {
        let mut topics = self.topics.lock();
        let topic = topics.entry(topic.to_string()).or_default();

        let id = Self::next_id(topic.last_id);
        topic.last_id = Some(id);
        topic.entries.push_back(StreamEntry {
            id,
            fields: fields.to_vec(),
        });

        if let Some(max_len) = max_len {
            while topic.entries.len() > max_len {
                topic.entries.pop_front();
            }
        }

        Ok(id)
    }

    async fn range(
        &self,
        topic: &str,
        start: &str,
        end: &str,
        count: Option<usize>,
    ) -> StreamResult<Vec<StreamEntry>> {
        self.select(topic, start, end, count, false)
    }

    async fn rev_range(
        &self,
        topic: &str,
        end: &str,
        start: &str,
        count: Option<usize>,
    ) -> StreamResult<Vec<StreamEntry>> {
        self.select(topic, start, end, count, true)
    }

    async fn len(&self, topic: &str) -> StreamResult<usize> {
        Ok(self
            .topics
            .lock()
            .get(topic)
            .map(|t| t.entries.len())
            .unwrap_or(0))
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
