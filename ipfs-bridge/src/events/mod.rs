//! Event sinks for node observability.
//!
//! Nodes report their lifecycle (`node.started`, `node.stopped`) and every
//! operation (`operation.issued`, `operation.resolved`) to an [`EventSink`].

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

#[cfg(test)]
pub(crate) use sink::MockEventSink;

/// Builds the JSON payload attached to node events, stamped with the current time.
pub(crate) fn payload(mut fields: serde_json::Value) -> serde_json::Value {
    if let Some(map) = fields.as_object_mut() {
        map.insert(
            "timestamp".to_string(),
            serde_json::Value::String(chrono::Utc::now().to_rfc3339()),
        );
    }
    fields
}
