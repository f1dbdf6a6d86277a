//! Asynchronous fan-out of lifecycle events to listeners.

use parking_lot::RwLock;
use serde_json::{json, Value as JsonValue};
use stagecraft_core::{Error, Event, EventKind, EventListener, StepOutput};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::task::TaskTracker;

/// Distributes pipeline events to registered listeners.
///
/// Listeners are invoked asynchronously, one short-lived task per emission
/// per listener, so a slow observer never blocks the scheduler. In-flight
/// callbacks are tracked; [`EventBus::drain`] waits for them at pipeline
/// termination.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

struct BusInner {
    listeners: RwLock<Vec<Arc<dyn EventListener>>>,
    pending: TaskTracker,
}

impl Default for BusInner {
    fn default() -> Self {
        Self {
            listeners: RwLock::new(Vec::new()),
            pending: TaskTracker::new(),
        }
    }
}

impl EventBus {
    /// Create a bus with no listeners.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener.
    pub fn add_listener(&self, listener: Arc<dyn EventListener>) {
        self.inner.listeners.write().push(listener);
    }

    /// Remove every registered listener.
    pub fn remove_all_listeners(&self) {
        self.inner.listeners.write().clear();
    }

    /// Emit an event to all listeners.
    ///
    /// Must be called from within a tokio runtime; each listener runs on its
    /// own task. Ordering across listeners is not guaranteed.
    pub fn emit(&self, kind: EventKind, data: JsonValue) {
        let listeners: Vec<Arc<dyn EventListener>> = self.inner.listeners.read().clone();
        if listeners.is_empty() {
            return;
        }

        let event = Event::new(kind, data);
        for listener in listeners {
            let event = event.clone();
            self.inner.pending.spawn(async move {
                listener.on_event(event);
            });
        }
    }

    /// Wait for every in-flight listener callback to finish.
    pub async fn drain(&self) {
        self.inner.pending.close();
        self.inner.pending.wait().await;
    }

    /// Emit `pipeline.started` with the execution mode.
    pub fn emit_pipeline_started(&self, mode: &str) {
        self.emit(EventKind::PipelineStarted, json!({ "mode": mode }));
    }

    /// Emit `pipeline.completed` with the run duration.
    pub fn emit_pipeline_completed(&self, duration: Duration) {
        self.emit(
            EventKind::PipelineCompleted,
            json!({ "duration_ms": duration.as_millis() as u64 }),
        );
    }

    /// Emit `pipeline.error`.
    pub fn emit_pipeline_error(&self, error: &Error) {
        self.emit(EventKind::PipelineError, json!({ "error": error.to_string() }));
    }

    /// Emit `stage.started`.
    pub fn emit_stage_started(&self, stage_id: &str, step_id: &str) {
        self.emit(
            EventKind::StageStarted,
            json!({ "stage_id": stage_id, "step_id": step_id }),
        );
    }

    /// Emit `stage.completed` with the stage worker's lifetime.
    pub fn emit_stage_completed(&self, stage_id: &str, step_id: &str, duration: Duration) {
        self.emit(
            EventKind::StageCompleted,
            json!({
                "stage_id": stage_id,
                "step_id": step_id,
                "duration_ms": duration.as_millis() as u64,
            }),
        );
    }

    /// Emit `stage.error` for a per-event failure.
    pub fn emit_stage_error(&self, stage_id: &str, step_id: &str, event_id: &str, error: &Error) {
        self.emit(
            EventKind::StageError,
            json!({
                "stage_id": stage_id,
                "step_id": step_id,
                "event_id": event_id,
                "error": error.to_string(),
            }),
        );
    }

    /// Emit `stage.output` carrying the full labeled output map.
    pub fn emit_stage_output(&self, stage_id: &str, step_id: &str, output: &StepOutput) {
        let labeled: serde_json::Map<String, JsonValue> = output
            .data
            .iter()
            .map(|(label, datum)| (label.clone(), datum.value().clone()))
            .collect();
        self.emit(
            EventKind::StageOutput,
            json!({
                "stage_id": stage_id,
                "step_id": step_id,
                "event_id": output.event_id.as_str(),
                "output": labeled,
            }),
        );
    }
}
