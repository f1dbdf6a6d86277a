//! Shared helpers for integration tests.

use parking_lot::Mutex;
use serde_json::Value as JsonValue;
use stagecraft_core::{Event, EventKind, EventListener};
use std::sync::Arc;

/// Records every event the pipeline emits.
#[derive(Default)]
pub struct EventRecorder {
    events: Mutex<Vec<Event>>,
}

impl EventRecorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    /// All `stage.output` payloads emitted by a given stage.
    pub fn outputs_of(&self, stage_id: &str) -> Vec<JsonValue> {
        self.events()
            .into_iter()
            .filter(|e| e.kind == EventKind::StageOutput && e.data["stage_id"] == stage_id)
            .map(|e| e.data["output"].clone())
            .collect()
    }

    /// Number of `stage.completed` events for a given stage.
    pub fn completed_count(&self, stage_id: &str) -> usize {
        self.events()
            .iter()
            .filter(|e| e.kind == EventKind::StageCompleted && e.data["stage_id"] == stage_id)
            .count()
    }

    /// All `stage.error` messages for a given stage.
    pub fn errors_of(&self, stage_id: &str) -> Vec<String> {
        self.events()
            .into_iter()
            .filter(|e| e.kind == EventKind::StageError && e.data["stage_id"] == stage_id)
            .map(|e| e.data["error"].as_str().unwrap_or_default().to_string())
            .collect()
    }

    /// The mode reported by `pipeline.started`, if the event fired.
    pub fn started_mode(&self) -> Option<String> {
        self.events()
            .iter()
            .find(|e| e.kind == EventKind::PipelineStarted)
            .and_then(|e| e.data["mode"].as_str().map(|s| s.to_string()))
    }
}

impl EventListener for EventRecorder {
    fn on_event(&self, event: Event) {
        self.events.lock().push(event);
    }
}
