//! The step contract and its factory.
//!
//! A step is the atomic unit of behavior in a pipeline. Each step receives a
//! finite stream of input envelopes and a cancellation token, and returns two
//! streams: outputs and per-event errors. Continuous steps (triggers) produce
//! outputs spontaneously until cancelled.

use crate::envelope::{StepInput, StepOutput};
use crate::error::{Error, Result};
use crate::value::ValueSpec;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Bounded capacity of the channels a step returns from [`Step::run`].
pub const STEP_CHANNEL_CAPACITY: usize = 10;

/// The pair of streams a step produces: outputs and per-event errors.
pub type StepChannels = (mpsc::Receiver<StepOutput>, mpsc::Receiver<Error>);

/// The contract every step implements.
///
/// # Contract
///
/// - For each received input envelope the step produces zero or one
///   [`StepOutput`], and optionally one error. A step that cannot produce a
///   valid output for an input emits exactly one error and no partial output
///   for the same event id.
/// - When the input stream closes, the step drains, closes both of its output
///   streams, and returns. Continuous steps close on cancellation only.
/// - The event id of each output equals that of the input that produced it,
///   unless the step is a trigger (which mints fresh ids).
/// - Any long wait inside the step must select on the cancellation token.
pub trait Step: Send + Sync {
    /// The step type name, used in events and logs (e.g. "http_client").
    fn kind(&self) -> &str;

    /// `true` iff the step produces outputs spontaneously until cancelled
    /// (continuous webhook, cron). Such steps make the pipeline streaming.
    fn is_continuous(&self) -> bool {
        false
    }

    /// Start the step.
    ///
    /// Implementations spawn their processing task and return the receiving
    /// ends of the output and error channels immediately.
    fn run(&self, cancel: CancellationToken, inputs: mpsc::Receiver<StepInput>) -> StepChannels;
}

/// Create the output/error channel pair a step hands back from [`Step::run`].
pub fn step_channels() -> (
    mpsc::Sender<StepOutput>,
    mpsc::Sender<Error>,
    StepChannels,
) {
    let (out_tx, out_rx) = mpsc::channel(STEP_CHANNEL_CAPACITY);
    let (err_tx, err_rx) = mpsc::channel(1);
    (out_tx, err_tx, (out_rx, err_rx))
}

/// Step-specific configuration, decoded from the `step_config` YAML block.
///
/// Values are stored as JSON; string values may carry sigil prefixes
/// (`$js:`, `$var:`, `$secret:`, `$env:`) which [`StepConfig::value_spec`]
/// turns into the corresponding [`ValueSpec`].
#[derive(Debug, Clone, Default)]
pub struct StepConfig {
    values: HashMap<String, JsonValue>,
}

impl StepConfig {
    /// Create an empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a configuration from a JSON map.
    pub fn from_map(values: HashMap<String, JsonValue>) -> Self {
        Self { values }
    }

    /// Create a configuration from a YAML mapping.
    ///
    /// Non-mapping values (including null for an absent `step_config` block)
    /// produce an empty configuration.
    pub fn from_yaml(value: &serde_yaml::Value) -> Result<Self> {
        if value.is_null() {
            return Ok(Self::new());
        }
        let json: JsonValue = serde_json::to_value(value).map_err(|e| Error::InvalidConfig {
            key: "step_config".to_string(),
            cause: e.to_string(),
        })?;
        match json {
            JsonValue::Object(map) => Ok(Self {
                values: map.into_iter().collect(),
            }),
            other => Err(Error::InvalidConfig {
                key: "step_config".to_string(),
                cause: format!("expected a mapping, got {}", type_name(&other)),
            }),
        }
    }

    /// Get a raw value by key.
    pub fn get(&self, key: &str) -> Option<&JsonValue> {
        self.values.get(key)
    }

    /// Get a raw value by key, or a missing-key error.
    pub fn require(&self, key: &str) -> Result<&JsonValue> {
        self.get(key).ok_or_else(|| Error::MissingConfig {
            key: key.to_string(),
        })
    }

    /// Get a string value by key.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(|v| v.as_str())
    }

    /// Get a boolean value by key.
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(|v| v.as_bool())
    }

    /// Get an integer value by key.
    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(|v| v.as_i64())
    }

    /// Get a value as a [`ValueSpec`], applying sigil-prefix detection.
    pub fn value_spec(&self, key: &str) -> Option<ValueSpec> {
        self.get(key).cloned().map(ValueSpec::parse)
    }

    /// Get a value as a [`ValueSpec`], or a missing-key error.
    pub fn require_spec(&self, key: &str) -> Result<ValueSpec> {
        Ok(ValueSpec::parse(self.require(key)?.clone()))
    }

    /// Iterate over all keys.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(|k| k.as_str())
    }

    /// Iterate over all entries.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &JsonValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }
}

fn type_name(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}

/// A factory that creates step instances from configuration.
pub trait StepFactory: Send + Sync {
    /// Create a new step instance from its configuration block.
    fn create(&self, config: &StepConfig) -> Result<Arc<dyn Step>>;
}

impl<F> StepFactory for F
where
    F: Fn(&StepConfig) -> Result<Arc<dyn Step>> + Send + Sync,
{
    fn create(&self, config: &StepConfig) -> Result<Arc<dyn Step>> {
        self(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config_from(yaml: &str) -> StepConfig {
        let value: serde_yaml::Value = serde_yaml::from_str(yaml).unwrap();
        StepConfig::from_yaml(&value).unwrap()
    }

    #[test]
    fn config_accessors() {
        let config = config_from("path: /tmp/data.txt\nretries: 3\nverbose: true\n");
        assert_eq!(config.get_str("path"), Some("/tmp/data.txt"));
        assert_eq!(config.get_i64("retries"), Some(3));
        assert_eq!(config.get_bool("verbose"), Some(true));
        assert!(config.get("missing").is_none());
    }

    #[test]
    fn require_reports_missing_key() {
        let config = StepConfig::new();
        let err = config.require("code").unwrap_err();
        assert_eq!(err.to_string(), "missing required configuration key: code");
    }

    #[test]
    fn null_yaml_is_empty_config() {
        let config = StepConfig::from_yaml(&serde_yaml::Value::Null).unwrap();
        assert_eq!(config.keys().count(), 0);
    }

    #[test]
    fn scalar_yaml_is_rejected() {
        let value: serde_yaml::Value = serde_yaml::from_str("just a string").unwrap();
        assert!(StepConfig::from_yaml(&value).is_err());
    }

    #[test]
    fn value_spec_applies_sigils() {
        let config = config_from("url: \"$js: ctx.src.url\"\nname: plain\n");
        assert!(!config.value_spec("url").unwrap().is_static());
        assert!(config.value_spec("name").unwrap().is_static());
        assert_eq!(
            config.value_spec("name").unwrap().static_value(),
            Some(&json!("plain"))
        );
    }
}
