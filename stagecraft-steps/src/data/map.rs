//! Field-mapping step.

use serde_json::Value as JsonValue;
use stagecraft_core::step::{step_channels, StepChannels};
use stagecraft_core::{
    default_output, Error, Result, Step, StepConfig, StepInput, StepOutput, ValueSpec,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Builds one object per event from a list of named values.
///
/// # Configuration
///
/// ```yaml
/// step_type: map
/// step_config:
///   fields:
///     - name: order_id
///       value: "$js: ctx.fetch.body.id"
///     - name: source
///       value: webhook
/// ```
pub struct MapStep {
    fields: Vec<(String, ValueSpec)>,
}

/// Create a `map` step from configuration.
pub fn factory(config: &StepConfig) -> Result<Arc<dyn Step>> {
    let raw = config.require("fields")?;
    let JsonValue::Array(entries) = raw else {
        return Err(Error::InvalidConfig {
            key: "fields".to_string(),
            cause: "expected a list of {name, value} entries".to_string(),
        });
    };

    let mut fields = Vec::with_capacity(entries.len());
    for entry in entries {
        let JsonValue::Object(map) = entry else {
            return Err(Error::InvalidConfig {
                key: "fields".to_string(),
                cause: "each field must be a mapping".to_string(),
            });
        };
        let name = map
            .get("name")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::InvalidConfig {
                key: "fields".to_string(),
                cause: "field entry is missing a string 'name'".to_string(),
            })?;
        let value = map.get("value").ok_or_else(|| Error::InvalidConfig {
            key: "fields".to_string(),
            cause: format!("field '{}' is missing a 'value'", name),
        })?;
        fields.push((name.to_string(), ValueSpec::parse(value.clone())));
    }

    Ok(Arc::new(MapStep { fields }))
}

impl Step for MapStep {
    fn kind(&self) -> &str {
        "map"
    }

    fn run(&self, cancel: CancellationToken, mut inputs: mpsc::Receiver<StepInput>) -> StepChannels {
        let fields = self.fields.clone();
        let (out_tx, err_tx, channels) = step_channels();

        tokio::spawn(async move {
            while let Some(input) = inputs.recv().await {
                let mut resolved = serde_json::Map::with_capacity(fields.len());
                let mut failed = false;

                for (name, spec) in &fields {
                    match spec.resolve(&input) {
                        Ok(value) => {
                            resolved.insert(name.clone(), value);
                        }
                        Err(e) => {
                            let _ = err_tx
                                .send(Error::step(format!(
                                    "failed to resolve field {}: {}",
                                    name, e
                                )))
                                .await;
                            failed = true;
                            break;
                        }
                    }
                }
                if failed {
                    continue;
                }

                let output = StepOutput::new(
                    default_output(JsonValue::Object(resolved)),
                    input.event_id,
                );
                tokio::select! {
                    _ = out_tx.send(output) => {}
                    _ = cancel.cancelled() => {
                        let _ = err_tx.send(Error::Cancelled).await;
                        return;
                    }
                }
            }
        });

        channels
    }
}
