//! Lifecycle events emitted by the pipeline.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;

/// The kind of a pipeline event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// The pipeline started; payload carries the execution mode.
    PipelineStarted,
    /// The pipeline finished draining; payload carries the duration.
    PipelineCompleted,
    /// The pipeline failed as a whole.
    PipelineError,
    /// A stage worker started.
    StageStarted,
    /// A stage worker finished.
    StageCompleted,
    /// A stage surfaced a per-event error.
    StageError,
    /// A stage produced an output.
    StageOutput,
}

impl EventKind {
    /// The dotted wire name of this event kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PipelineStarted => "pipeline.started",
            Self::PipelineCompleted => "pipeline.completed",
            Self::PipelineError => "pipeline.error",
            Self::StageStarted => "stage.started",
            Self::StageCompleted => "stage.completed",
            Self::StageError => "stage.error",
            Self::StageOutput => "stage.output",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for EventKind {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

/// A pipeline lifecycle event.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    /// What happened.
    #[serde(rename = "type")]
    pub kind: EventKind,
    /// When it happened.
    pub timestamp: DateTime<Utc>,
    /// Kind-specific payload (stage id, event id, output, ...).
    pub data: JsonValue,
}

impl Event {
    /// Create an event stamped with the current time.
    pub fn new(kind: EventKind, data: JsonValue) -> Self {
        Self {
            kind,
            timestamp: Utc::now(),
            data,
        }
    }
}

/// Receives events from the pipeline.
///
/// Listeners are invoked asynchronously, one task per emission per listener;
/// a slow listener never blocks the scheduler. Ordering across listeners is
/// not guaranteed.
pub trait EventListener: Send + Sync {
    /// Handle one event.
    fn on_event(&self, event: Event);
}

impl<F> EventListener for F
where
    F: Fn(Event) + Send + Sync,
{
    fn on_event(&self, event: Event) {
        self(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn wire_names() {
        assert_eq!(EventKind::PipelineStarted.as_str(), "pipeline.started");
        assert_eq!(EventKind::StageOutput.as_str(), "stage.output");
    }

    #[test]
    fn event_serializes_with_dotted_type() {
        let event = Event::new(EventKind::StageError, json!({"stage_id": "fetch"}));
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], json!("stage.error"));
        assert_eq!(value["data"]["stage_id"], json!("fetch"));
    }

    #[test]
    fn closures_are_listeners() {
        let listener = |event: Event| {
            assert_eq!(event.kind, EventKind::PipelineCompleted);
        };
        listener.on_event(Event::new(EventKind::PipelineCompleted, json!({})));
    }
}
