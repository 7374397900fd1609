//! Topic routing for domain events.

/// Maps aggregate types to stream topics.
///
/// Routing is total: any aggregate type without a dedicated topic goes to
/// the default topic.
#[derive(Debug, Clone)]
pub struct TopicRouter {
    default_topic: String,
}

impl TopicRouter {
    pub fn new(default_topic: impl Into<String>) -> Self {
        Self {
            default_topic: default_topic.into(),
        }
    }

    /// Topic receiving events of `aggregate_type`.
    ///
    /// `event_type` does not currently influence routing; it is accepted so
    /// callers never need to change when finer routes are added.
    pub fn topic_for(&self, aggregate_type: &str, _event_type: &str) -> &str {
        known_topic(aggregate_type).unwrap_or(&self.default_topic)
    }

    pub fn default_topic(&self) -> &str {
        &self.default_topic
    }
}

impl Default for TopicRouter {
    fn default() -> Self {
        Self::new("events")
    }
}

/// Canonical form of an aggregate type used for routing and schema lookup
pub fn normalize_aggregate_type(aggregate_type: &str) -> String {
    aggregate_type.trim().to_ascii_lowercase()
}

fn known_topic(aggregate_type: &str) -> Option<&'static str> {
    let normalized = normalize_aggregate_type(aggregate_type);
    let topic = match normalized.as_str() {
        "order" => "orders",
        "user" => "users",
        "product" => "products",
        "notification" => "notifications",
        "tool_execution" | "tool-execution" => "tool_executions",
        _ => return None,
    };
    Some(topic)
}
