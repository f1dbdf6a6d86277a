//! Input and output envelopes delivered to and produced by steps.

use crate::datum::NamedOutputs;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// A correlation identifier propagated end-to-end through the pipeline.
///
/// Triggers mint a fresh id per spontaneous emission; every other step copies
/// the id of the input that produced its output.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(String);

impl EventId {
    /// Mint a new random event id.
    pub fn new() -> Self {
        Self(format!("evt_{}", Uuid::new_v4().simple()))
    }

    /// The empty id, used before fan-in has adopted an upstream id.
    pub fn empty() -> Self {
        Self(String::new())
    }

    /// Whether this id is the empty placeholder.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EventId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Process-scoped key/value map shared read-only with every step.
pub type GlobalMap = Arc<HashMap<String, JsonValue>>;

/// The envelope delivered to a step for one logical event.
///
/// Assembled by the scheduler while merging fan-in edges; once emitted it is
/// owned by the step and never mutated again.
#[derive(Debug, Clone)]
pub struct StepInput {
    /// Outputs gathered from upstream stages, keyed by producer stage id.
    pub data: HashMap<String, NamedOutputs>,
    /// Correlation identifier for this logical event.
    pub event_id: EventId,
    /// Wall-clock creation time of the envelope.
    pub timestamp: DateTime<Utc>,
    /// Global pipeline variables (read-only).
    pub variables: GlobalMap,
    /// Global pipeline secrets (read-only).
    pub secrets: GlobalMap,
}

impl StepInput {
    /// Create an envelope with no upstream data and the given event id.
    pub fn new(event_id: EventId) -> Self {
        Self {
            data: HashMap::new(),
            event_id,
            timestamp: Utc::now(),
            variables: Arc::new(HashMap::new()),
            secrets: Arc::new(HashMap::new()),
        }
    }

    /// Create an empty envelope, used for build-time value resolution where
    /// no pipeline context exists yet.
    pub fn empty() -> Self {
        Self::new(EventId::empty())
    }

    /// Attach the pipeline's global variable and secret maps.
    pub fn with_globals(mut self, variables: GlobalMap, secrets: GlobalMap) -> Self {
        self.variables = variables;
        self.secrets = secrets;
        self
    }

    /// Attach upstream data.
    pub fn with_data(mut self, data: HashMap<String, NamedOutputs>) -> Self {
        self.data = data;
        self
    }

    /// The outputs a given upstream stage contributed to this event, if any.
    pub fn stage_outputs(&self, stage_id: &str) -> Option<&NamedOutputs> {
        self.data.get(stage_id)
    }
}

/// The envelope produced by a step for one logical event.
#[derive(Debug, Clone)]
pub struct StepOutput {
    /// The labeled outputs of this emission.
    pub data: NamedOutputs,
    /// Same id as the triggering input, for correlation (fresh for triggers).
    pub event_id: EventId,
    /// Wall-clock creation time of the output.
    pub timestamp: DateTime<Utc>,
}

impl StepOutput {
    /// Create an output stamped with the current time.
    pub fn new(data: NamedOutputs, event_id: EventId) -> Self {
        Self {
            data,
            event_id,
            timestamp: Utc::now(),
        }
    }
}
