//! Delay step.

use serde_json::Value as JsonValue;
use stagecraft_core::step::{step_channels, StepChannels};
use stagecraft_core::{
    default_output, Error, Result, Step, StepConfig, StepInput, StepOutput, ValueSpec,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Pauses each event for a configurable number of milliseconds.
///
/// # Configuration
///
/// ```yaml
/// step_type: delay
/// step_config:
///   ms: 1500                       # or "$js: ctx.src.backoff_ms"
/// ```
pub struct DelayStep {
    delay: ValueSpec,
}

/// Create a `delay` step from configuration.
pub fn factory(config: &StepConfig) -> Result<Arc<dyn Step>> {
    let delay = config.require_spec("ms")?;
    Ok(Arc::new(DelayStep { delay }))
}

impl Step for DelayStep {
    fn kind(&self) -> &str {
        "delay"
    }

    fn run(&self, cancel: CancellationToken, mut inputs: mpsc::Receiver<StepInput>) -> StepChannels {
        let delay = self.delay.clone();
        let (out_tx, err_tx, channels) = step_channels();

        tokio::spawn(async move {
            while let Some(input) = inputs.recv().await {
                let resolved = match delay.resolve(&input) {
                    Ok(value) => value,
                    Err(e) => {
                        let _ = err_tx
                            .send(Error::step(format!("failed to resolve delay: {}", e)))
                            .await;
                        continue;
                    }
                };

                let millis = match &resolved {
                    JsonValue::Number(n) => n.as_f64().map(|f| f.max(0.0) as u64),
                    _ => None,
                };
                let Some(millis) = millis else {
                    let _ = err_tx
                        .send(Error::TypeMismatch {
                            context: "delay".to_string(),
                            expected: "number".to_string(),
                            actual: json_type_name(&resolved).to_string(),
                        })
                        .await;
                    continue;
                };

                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_millis(millis)) => {}
                    _ = cancel.cancelled() => {
                        let _ = err_tx.send(Error::Cancelled).await;
                        return;
                    }
                }

                let output = StepOutput::new(
                    default_output("delay completed successfully"),
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

fn json_type_name(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}
