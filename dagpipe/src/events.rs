//! Pipeline lifecycle events.
//!
//! The orchestrator reports what it does through an [`EventSink`]. Event
//! types emitted during a run:
//!
//! | type                 | when                                        |
//! |----------------------|---------------------------------------------|
//! | `pipeline.started`   | before checkpoints are cleared or restored  |
//! | `node.restored`      | a checkpoint replaced execution             |
//! | `node.started`       | an attempt begins                           |
//! | `node.attempt_failed`| an attempt returned an error                |
//! | `node.completed`     | a node succeeded and was checkpointed       |
//! | `pipeline.completed` | every node succeeded                        |
//! | `pipeline.failed`    | the run stopped on an error                 |
//!
//! Every payload carries `run_id` and an RFC 3339 `timestamp`.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, info, Level};

/// A run has begun.
pub const PIPELINE_STARTED: &str = "pipeline.started";
/// A node was restored from its checkpoint.
pub const NODE_RESTORED: &str = "node.restored";
/// A node attempt has begun.
pub const NODE_STARTED: &str = "node.started";
/// A node attempt failed.
pub const NODE_ATTEMPT_FAILED: &str = "node.attempt_failed";
/// A node succeeded.
pub const NODE_COMPLETED: &str = "node.completed";
/// A run succeeded.
pub const PIPELINE_COMPLETED: &str = "pipeline.completed";
/// A run failed.
pub const PIPELINE_FAILED: &str = "pipeline.failed";

/// Receives pipeline events.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Emits an event.
    ///
    /// Sinks must not fail the run; errors are theirs to log.
    async fn emit(&self, event_type: &str, data: Option<Value>);
}

/// Discards all events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

#[async_trait]
impl EventSink for NoOpEventSink {
    async fn emit(&self, _event_type: &str, _data: Option<Value>) {}
}

/// Writes events to the `tracing` subscriber.
#[derive(Debug, Clone)]
pub struct LoggingEventSink {
    level: Level,
}

impl Default for LoggingEventSink {
    fn default() -> Self {
        Self { level: Level::INFO }
    }
}

impl LoggingEventSink {
    /// Creates a sink logging at `level`. Levels other than `DEBUG` log at
    /// `INFO`.
    #[must_use]
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    /// Creates a debug-level sink.
    #[must_use]
    pub fn debug() -> Self {
        Self::new(Level::DEBUG)
    }
}

#[async_trait]
impl EventSink for LoggingEventSink {
    async fn emit(&self, event_type: &str, data: Option<Value>) {
        let data = data.map(|d| d.to_string()).unwrap_or_default();
        if self.level == Level::DEBUG {
            debug!(event_type, event_data = %data, "Event: {event_type}");
        } else {
            info!(event_type, event_data = %data, "Event: {event_type}");
        }
    }
}

/// Keeps events in memory for assertions.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: RwLock<Vec<(String, Option<Value>)>>,
}

impl CollectingEventSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all events in emission order.
    #[must_use]
    pub fn events(&self) -> Vec<(String, Option<Value>)> {
        self.events.read().clone()
    }

    /// Returns the event types in emission order.
    #[must_use]
    pub fn event_types(&self) -> Vec<String> {
        self.events.read().iter().map(|(t, _)| t.clone()).collect()
    }

    /// Returns events whose type starts with `prefix`.
    #[must_use]
    pub fn events_of_type(&self, prefix: &str) -> Vec<(String, Option<Value>)> {
        self.events
            .read()
            .iter()
            .filter(|(t, _)| t.starts_with(prefix))
            .cloned()
            .collect()
    }

    /// Returns the number of events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Returns true if nothing was emitted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Forgets all events.
    pub fn clear(&self) {
        self.events.write().clear();
    }
}

#[async_trait]
impl EventSink for CollectingEventSink {
    async fn emit(&self, event_type: &str, data: Option<Value>) {
        self.events.write().push((event_type.to_string(), data));
    }
}
