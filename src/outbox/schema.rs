//! Versioned payload schemas keyed by aggregate type.

use crate::outbox::error::SchemaError;
use crate::outbox::OutboxRecord;
use crate::stream::normalize_aggregate_type;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use validator::Validate;

/// Structural validator for one aggregate type's payloads
pub trait PayloadSchema: Send + Sync {
    fn version(&self) -> u32;

    fn validate(&self, record: &OutboxRecord) -> Result<(), SchemaError>;
}

/// Schema backed by a typed payload: the JSON must deserialize into `T`
/// and pass `T`'s field validation rules.
pub struct TypedSchema<T> {
    version: u32,
    _payload: PhantomData<fn() -> T>,
}

impl<T> TypedSchema<T> {
    pub fn new(version: u32) -> Self {
        Self {
            version,
            _payload: PhantomData,
        }
    }
}

impl<T> PayloadSchema for TypedSchema<T>
where
    T: DeserializeOwned + Validate,
{
    fn version(&self) -> u32 {
        self.version
    }

    fn validate(&self, record: &OutboxRecord) -> Result<(), SchemaError> {
        if !record.payload.is_object() {
            return Err(SchemaError::NotAnObject {
                aggregate_type: record.aggregate_type.clone(),
                event_type: record.event_type.clone(),
            });
        }

        let mismatch = |reason: String| SchemaError::Mismatch {
            aggregate_type: record.aggregate_type.clone(),
            event_type: record.event_type.clone(),
            version: self.version,
            reason,
        };

        let payload: T = T::deserialize(&record.payload).map_err(|e| mismatch(e.to_string()))?;
        payload.validate().map_err(|e| mismatch(e.to_string()))
    }
}

/// Result of checking a record against the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaCheck {
    /// Payload matched the registered schema
    Valid { version: u32 },
    /// No schema is registered for the aggregate type
    Unregistered,
}

/// Mapping from aggregate type to payload schema
#[derive(Default, Clone)]
pub struct SchemaRegistry {
    schemas: HashMap<String, Arc<dyn PayloadSchema>>,
}

impl SchemaRegistry {
    /// Empty registry; every event is published unvalidated
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with schemas for the built-in aggregate types
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("order", TypedSchema::<OrderPayload>::new(1));
        registry.register("user", TypedSchema::<UserPayload>::new(1));
        registry.register("product", TypedSchema::<ProductPayload>::new(1));
        registry.register("notification", TypedSchema::<NotificationPayload>::new(1));
        registry.register("tool_execution", TypedSchema::<ToolExecutionPayload>::new(1));
        registry.register("tool-execution", TypedSchema::<ToolExecutionPayload>::new(1));
        registry
    }

    pub fn register(&mut self, aggregate_type: impl Into<String>, schema: impl PayloadSchema + 'static) {
        let aggregate_type: String = aggregate_type.into();
        self.schemas
            .insert(normalize_aggregate_type(&aggregate_type), Arc::new(schema));
    }

    pub fn is_registered(&self, aggregate_type: &str) -> bool {
        self.schemas
            .contains_key(&normalize_aggregate_type(aggregate_type))
    }

    pub fn validate(&self, record: &OutboxRecord) -> Result<SchemaCheck, SchemaError> {
        match self.schemas.get(&normalize_aggregate_type(&record.aggregate_type)) {
            Some(schema) => {
                schema.validate(record)?;
                Ok(SchemaCheck::Valid {
                    version: schema.version(),
                })
            }
            None => Ok(SchemaCheck::Unregistered),
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct OrderPayload {
    #[validate(length(min = 1))]
    pub order_id: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UserPayload {
    #[validate(length(min = 1))]
    pub user_id: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ProductPayload {
    #[validate(length(min = 1))]
    pub product_id: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct NotificationPayload {
    #[validate(length(min = 1))]
    pub recipient: String,
    #[validate(length(min = 1))]
    pub channel: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ToolExecutionPayload {
    #[validate(length(min = 1))]
    pub tool_name: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn record(aggregate_type: &str, payload: serde_json::Value) -> OutboxRecord {
        OutboxRecord {
            id: 1,
            aggregate_id: "agg-1".to_string(),
            aggregate_type: aggregate_type.to_string(),
            event_type: "created".to_string(),
            payload,
            processed: false,
            processed_at: None,
            retry_count: 0,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_valid_order_payload() {
        let registry = SchemaRegistry::with_defaults();
        let result = registry.validate(&record("order", json!({"order_id": "o-1", "total": 12.5})));
        assert_eq!(result, Ok(SchemaCheck::Valid { version: 1 }));
    }

    #[test]
    fn test_lookup_matches_router_normalization() {
        let registry = SchemaRegistry::with_defaults();
        assert!(registry.is_registered(" Order "));

        let result = registry.validate(&record("Order ", json!({"total": 12.5})));
        assert!(matches!(result, Err(SchemaError::Mismatch { .. })));

        let result = registry.validate(&record("ORDER", json!({"order_id": "o-1"})));
        assert_eq!(result, Ok(SchemaCheck::Valid { version: 1 }));
    }

    #[test]
    fn test_missing_field_is_mismatch() {
        let registry = SchemaRegistry::with_defaults();
        let result = registry.validate(&record("order", json!({"total": 12.5})));
        assert!(matches!(result, Err(SchemaError::Mismatch { .. })));
    }

    #[test]
    fn test_empty_field_fails_validation_rules() {
        let registry = SchemaRegistry::with_defaults();
        let result = registry.validate(&record("user", json!({"user_id": ""})));
        assert!(matches!(result, Err(SchemaError::Mismatch { .. })));
    }

    #[test]
    fn test_non_object_payload() {
        let registry = SchemaRegistry::with_defaults();
        let result = registry.validate(&record("product", json!("just a string")));
        assert!(matches!(result, Err(SchemaError::NotAnObject { .. })));
    }

    #[test]
    fn test_unregistered_type_is_not_an_error() {
        let registry = SchemaRegistry::with_defaults();
        let result = registry.validate(&record("invoice", json!(42)));
        assert_eq!(result, Ok(SchemaCheck::Unregistered));
    }
}
