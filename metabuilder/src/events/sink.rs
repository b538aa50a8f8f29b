//! Event sink trait and implementations.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, Level};
use uuid::Uuid;

/// A lifecycle fact reported by the orchestration core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Event type, e.g. "run.transition".
    pub event_type: String,
    /// Run the event belongs to, if any.
    pub run_id: Option<Uuid>,
    /// Event payload.
    pub data: serde_json::Value,
    /// Emission time.
    pub timestamp: DateTime<Utc>,
}

impl Event {
    /// Creates an event with an empty payload.
    #[must_use]
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            run_id: None,
            data: serde_json::Value::Null,
            timestamp: Utc::now(),
        }
    }

    /// Attaches the owning run.
    #[must_use]
    pub fn with_run(mut self, run_id: Uuid) -> Self {
        self.run_id = Some(run_id);
        self
    }

    /// Sets the payload.
    #[must_use]
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }
}

/// Receives orchestration events.
#[async_trait]
pub trait EventSink: Send + Sync + std::fmt::Debug {
    /// Emits an event asynchronously.
    async fn emit(&self, event: Event);

    /// Emits without awaiting. Never fails; errors are logged and dropped.
    fn try_emit(&self, event: Event);
}

/// Discards all events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

#[async_trait]
impl EventSink for NoOpEventSink {
    async fn emit(&self, _event: Event) {}

    fn try_emit(&self, _event: Event) {}
}

/// Writes events to the tracing subscriber.
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
    /// Creates a sink logging at `level`. Anything below INFO logs at DEBUG.
    #[must_use]
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    /// Creates a debug-level sink.
    #[must_use]
    pub fn debug() -> Self {
        Self::new(Level::DEBUG)
    }

    fn log_event(&self, event: &Event) {
        let run_id = event.run_id.map(|id| id.to_string()).unwrap_or_default();
        if self.level <= Level::INFO {
            info!(
                event_type = %event.event_type,
                run_id = %run_id,
                event_data = %event.data,
                "Event: {}", event.event_type
            );
        } else {
            debug!(
                event_type = %event.event_type,
                run_id = %run_id,
                event_data = %event.data,
                "Event: {}", event.event_type
            );
        }
    }
}

#[async_trait]
impl EventSink for LoggingEventSink {
    async fn emit(&self, event: Event) {
        self.log_event(&event);
    }

    fn try_emit(&self, event: Event) {
        self.log_event(&event);
    }
}

/// Keeps events in memory, for tests and inspection.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: parking_lot::RwLock<Vec<Event>>,
}

impl CollectingEventSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all collected events.
    #[must_use]
    pub fn events(&self) -> Vec<Event> {
        self.events.read().clone()
    }

    /// Returns the number of collected events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Returns true if nothing was collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Returns events whose type starts with `type_prefix`.
    #[must_use]
    pub fn events_of_type(&self, type_prefix: &str) -> Vec<Event> {
        self.events
            .read()
            .iter()
            .filter(|e| e.event_type.starts_with(type_prefix))
            .cloned()
            .collect()
    }

    /// Returns events for one run, in emission order.
    #[must_use]
    pub fn events_for_run(&self, run_id: Uuid) -> Vec<Event> {
        self.events
            .read()
            .iter()
            .filter(|e| e.run_id == Some(run_id))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl EventSink for CollectingEventSink {
    async fn emit(&self, event: Event) {
        self.events.write().push(event);
    }

    fn try_emit(&self, event: Event) {
        self.events.write().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_noop_and_logging_sinks() {
        NoOpEventSink.emit(Event::new("run.submitted")).await;
        let sink = LoggingEventSink::debug();
        sink.emit(Event::new("run.transition").with_data(serde_json::json!({"to": "planning"})))
            .await;
        sink.try_emit(Event::new("task.requeued"));
    }

    #[tokio::test]
    async fn test_collecting_sink_filters() {
        let sink = CollectingEventSink::new();
        let run_id = Uuid::new_v4();
        sink.emit(Event::new("run.submitted").with_run(run_id)).await;
        sink.emit(Event::new("run.transition").with_run(run_id)).await;
        sink.try_emit(Event::new("task.requeued"));

        assert_eq!(sink.len(), 3);
        assert_eq!(sink.events_of_type("run.").len(), 2);
        assert_eq!(sink.events_for_run(run_id).len(), 2);
        assert_eq!(sink.events()[2].event_type, "task.requeued");
    }

    #[test]
    fn test_event_serializes() {
        let event = Event::new("run.completed").with_data(serde_json::json!({"status": "succeeded"}));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event_type"], "run.completed");
        assert_eq!(json["data"]["status"], "succeeded");
        assert!(json["run_id"].is_null());
    }
}
