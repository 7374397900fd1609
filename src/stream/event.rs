//! Wire representation of events appended to the stream log.

use crate::outbox::OutboxRecord;
use crate::stream::error::{StreamError, StreamResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Payload key carrying the outbox retry count of the delivered row
pub const RETRY_COUNT_KEY: &str = "_retry_count";

const FIELD_EVENT_ID: &str = "event_id";
const FIELD_EVENT_TYPE: &str = "event_type";
const FIELD_AGGREGATE_ID: &str = "aggregate_id";
const FIELD_AGGREGATE_TYPE: &str = "aggregate_type";
const FIELD_CREATED_AT: &str = "created_at";
const FIELD_PAYLOAD: &str = "payload";

/// Event metadata plus payload, built per publish call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEvent {
    /// Outbox row id; re-deliveries of the same row share it
    pub event_id: String,
    pub event_type: String,
    pub aggregate_id: String,
    pub aggregate_type: String,
    pub created_at: DateTime<Utc>,
    pub payload: serde_json::Value,
}

impl StreamEvent {
    /// Project an outbox row into a stream event.
    ///
    /// The payload gains the row's retry count under [`RETRY_COUNT_KEY`];
    /// payloads that are not JSON objects are wrapped under `data`.
    pub fn from_outbox_record(record: &OutboxRecord) -> Self {
        let retry = serde_json::Value::from(record.retry_count);
        let payload = match &record.payload {
            serde_json::Value::Object(map) => {
                let mut map = map.clone();
                map.insert(RETRY_COUNT_KEY.to_string(), retry);
                serde_json::Value::Object(map)
            }
            other => serde_json::json!({
                "data": other,
                RETRY_COUNT_KEY: retry,
            }),
        };

        Self {
            event_id: record.id.to_string(),
            event_type: record.event_type.clone(),
            aggregate_id: record.aggregate_id.clone(),
            aggregate_type: record.aggregate_type.clone(),
            created_at: record.created_at,
            payload,
        }
    }

    /// Retry count recorded in the payload, if present
    pub fn retry_count(&self) -> Option<u64> {
        self.payload.get(RETRY_COUNT_KEY).and_then(|v| v.as_u64())
    }

    /// Flatten into string fields; the payload is embedded as a JSON document
    pub fn to_fields(&self) -> StreamResult<Vec<(String, String)>> {
        Ok(vec![
            (FIELD_EVENT_ID.to_string(), self.event_id.clone()),
            (FIELD_EVENT_TYPE.to_string(), self.event_type.clone()),
            (FIELD_AGGREGATE_ID.to_string(), self.aggregate_id.clone()),
            (FIELD_AGGREGATE_TYPE.to_string(), self.aggregate_type.clone()),
            (FIELD_CREATED_AT.to_string(), self.created_at.to_rfc3339()),
            (FIELD_PAYLOAD.to_string(), serde_json::to_string(&self.payload)?),
        ])
    }

    /// Rebuild an event from the fields of a stored entry
    pub fn from_fields(fields: &[(String, String)]) -> StreamResult<Self> {
        let get = |name: &str| -> StreamResult<&str> {
            fields
                .iter()
                .find(|(key, _)| key == name)
                .map(|(_, value)| value.as_str())
                .ok_or_else(|| StreamError::InvalidMessage(format!("missing field '{}'", name)))
        };

        let created_at = DateTime::parse_from_rfc3339(get(FIELD_CREATED_AT)?)
            .map_err(|e| StreamError::InvalidMessage(format!("bad created_at: {}", e)))?
            .with_timezone(&Utc);

        Ok(Self {
            event_id: get(FIELD_EVENT_ID)?.to_string(),
            event_type: get(FIELD_EVENT_TYPE)?.to_string(),
            aggregate_id: get(FIELD_AGGREGATE_ID)?.to_string(),
            aggregate_type: get(FIELD_AGGREGATE_TYPE)?.to_string(),
            created_at,
            payload: serde_json::from_str(get(FIELD_PAYLOAD)?)?,
        })
    }
}
