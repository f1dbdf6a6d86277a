//! The payload carrier exchanged between stages.
//!
//! A [`Datum`] holds one value of arbitrary shape; a [`NamedOutputs`] maps
//! output labels to data. Steps that do not branch emit a single datum under
//! the reserved [`DEFAULT_OUTPUT`] label.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;

/// The reserved label for the sole output of a non-branching step.
pub const DEFAULT_OUTPUT: &str = "default";

/// An opaque value carrier holding one payload of arbitrary type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Datum(pub JsonValue);

impl Datum {
    /// Create a datum from any JSON-convertible value.
    pub fn new(value: impl Into<JsonValue>) -> Self {
        Self(value.into())
    }

    /// Create a null datum.
    pub fn null() -> Self {
        Self(JsonValue::Null)
    }

    /// Borrow the inner value.
    pub fn value(&self) -> &JsonValue {
        &self.0
    }

    /// Consume the datum and return the inner value.
    pub fn into_value(self) -> JsonValue {
        self.0
    }

    /// Check if the payload is null.
    pub fn is_null(&self) -> bool {
        self.0.is_null()
    }

    /// The payload as a string slice, if it is a string.
    pub fn as_str(&self) -> Option<&str> {
        self.0.as_str()
    }

    /// The payload as a bool, if it is a bool.
    pub fn as_bool(&self) -> Option<bool> {
        self.0.as_bool()
    }

    /// The payload as an f64, if it is a number.
    pub fn as_f64(&self) -> Option<f64> {
        self.0.as_f64()
    }
}

impl From<JsonValue> for Datum {
    fn from(value: JsonValue) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for Datum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.0 {
            JsonValue::String(s) => write!(f, "{}", s),
            other => write!(f, "{}", other),
        }
    }
}

/// The labeled outputs a step produces on one emission.
///
/// Keys are unique per emission; the `default` label denotes the sole output
/// of steps that do not branch. A conditional step emits exactly one of
/// `true` / `false` per event.
pub type NamedOutputs = HashMap<String, Datum>;

/// Build a [`NamedOutputs`] holding one value under the given label.
pub fn single_output(label: impl Into<String>, value: impl Into<JsonValue>) -> NamedOutputs {
    let mut outputs = NamedOutputs::new();
    outputs.insert(label.into(), Datum::new(value));
    outputs
}

/// Build a [`NamedOutputs`] holding one value under the `default` label.
pub fn default_output(value: impl Into<JsonValue>) -> NamedOutputs {
    single_output(DEFAULT_OUTPUT, value)
}
