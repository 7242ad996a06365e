//! Pluggable log sink.
//!
//! Library components report slow statements, execution failures and
//! transaction lifecycle events through a [`LogSink`]. The default
//! [`TracingSink`] forwards to `tracing`; embedders that route logs elsewhere
//! can supply their own implementation.

use serde_json::Value as JsonValue;
use std::sync::Arc;

/// Receives structured log events. `fields` is always a JSON object.
pub trait LogSink: Send + Sync {
    fn info(&self, message: &str, fields: &JsonValue);
    fn warn(&self, message: &str, fields: &JsonValue);
    fn error(&self, message: &str, fields: &JsonValue);
}

/// Shared sink handle.
pub type SharedSink = Arc<dyn LogSink>;

/// Forwards events to the `tracing` subscriber installed by the application.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn info(&self, message: &str, fields: &JsonValue) {
        tracing::info!(target: "db_query_kit", fields = %fields, "{}", message);
    }

    fn warn(&self, message: &str, fields: &JsonValue) {
        tracing::warn!(target: "db_query_kit", fields = %fields, "{}", message);
    }

    fn error(&self, message: &str, fields: &JsonValue) {
        tracing::error!(target: "db_query_kit", fields = %fields, "{}", message);
    }
}

/// The sink used when none is supplied.
pub fn default_sink() -> SharedSink {
    Arc::new(TracingSink)
}
