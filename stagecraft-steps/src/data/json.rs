//! JSON parsing step.

use serde_json::Value as JsonValue;
use stagecraft_core::step::{step_channels, StepChannels};
use stagecraft_core::{
    default_output, Error, Result, Step, StepConfig, StepInput, StepOutput, ValueSpec,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Parses a JSON string into a structured payload.
///
/// # Configuration
///
/// ```yaml
/// step_type: json
/// step_config:
///   data: '{"value": 10}'          # or "$js: ctx.fetch.body"
/// ```
pub struct JsonStep {
    data: ValueSpec,
}

/// Create a `json` step from configuration.
pub fn factory(config: &StepConfig) -> Result<Arc<dyn Step>> {
    let data = config.require_spec("data")?;
    Ok(Arc::new(JsonStep { data }))
}

impl Step for JsonStep {
    fn kind(&self) -> &str {
        "json"
    }

    fn run(&self, cancel: CancellationToken, mut inputs: mpsc::Receiver<StepInput>) -> StepChannels {
        let data = self.data.clone();
        let (out_tx, err_tx, channels) = step_channels();

        tokio::spawn(async move {
            while let Some(input) = inputs.recv().await {
                let text = match data.resolve(&input) {
                    Ok(JsonValue::String(s)) => s,
                    Ok(other) => other.to_string(),
                    Err(e) => {
                        let _ = err_tx
                            .send(Error::step(format!("failed to resolve data: {}", e)))
                            .await;
                        continue;
                    }
                };

                let parsed: JsonValue = match serde_json::from_str(&text) {
                    Ok(value) => value,
                    Err(e) => {
                        let _ = err_tx
                            .send(Error::step(format!("failed to parse JSON data: {}", e)))
                            .await;
                        continue;
                    }
                };

                let output = StepOutput::new(default_output(parsed), input.event_id);
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
