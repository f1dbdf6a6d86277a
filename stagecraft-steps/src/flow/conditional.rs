//! Conditional branching step.

use serde_json::Value as JsonValue;
use stagecraft_core::step::{step_channels, StepChannels};
use stagecraft_core::{
    single_output, Error, Result, Step, StepConfig, StepInput, StepOutput, ValueSpec,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Evaluates a boolean condition per event and emits exactly one of the
/// `true` / `false` output labels, for downstream `stage:true` /
/// `stage:false` subscriptions.
///
/// # Configuration
///
/// ```yaml
/// step_type: if
/// step_config:
///   condition: "$js: ctx.user.is_premium"
/// ```
pub struct ConditionalStep {
    condition: ValueSpec,
}

/// Create an `if` step from configuration.
pub fn factory(config: &StepConfig) -> Result<Arc<dyn Step>> {
    let condition = config.require_spec("condition")?;
    Ok(Arc::new(ConditionalStep { condition }))
}

impl Step for ConditionalStep {
    fn kind(&self) -> &str {
        "if"
    }

    fn run(&self, cancel: CancellationToken, mut inputs: mpsc::Receiver<StepInput>) -> StepChannels {
        let condition = self.condition.clone();
        let (out_tx, err_tx, channels) = step_channels();

        tokio::spawn(async move {
            while let Some(input) = inputs.recv().await {
                let resolved = match condition.resolve(&input) {
                    Ok(value) => value,
                    Err(e) => {
                        let _ = err_tx
                            .send(Error::step(format!("failed to resolve condition: {}", e)))
                            .await;
                        continue;
                    }
                };

                let JsonValue::Bool(value) = resolved else {
                    let _ = err_tx
                        .send(Error::TypeMismatch {
                            context: "condition".to_string(),
                            expected: "boolean".to_string(),
                            actual: json_type_name(&resolved).to_string(),
                        })
                        .await;
                    continue;
                };

                let label = if value { "true" } else { "false" };
                let output =
                    StepOutput::new(single_output(label, JsonValue::Null), input.event_id);
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

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use stagecraft_core::{default_output, EventId};
    use std::collections::HashMap;

    fn if_step(condition: serde_json::Value) -> Arc<dyn Step> {
        let config = StepConfig::from_map([("condition".to_string(), condition)].into());
        factory(&config).unwrap()
    }

    async fn run_once(step: Arc<dyn Step>, input: StepInput) -> (Vec<StepOutput>, Vec<Error>) {
        let (input_tx, input_rx) = mpsc::channel(1);
        let (mut out_rx, mut err_rx) = step.run(CancellationToken::new(), input_rx);
        input_tx.send(input).await.unwrap();
        drop(input_tx);

        let mut outputs = Vec::new();
        while let Some(output) = out_rx.recv().await {
            outputs.push(output);
        }
        let mut errors = Vec::new();
        while let Some(error) = err_rx.recv().await {
            errors.push(error);
        }
        (outputs, errors)
    }

    #[tokio::test]
    async fn emits_exactly_one_branch_label() {
        let step = if_step(json!("$js: ctx.user.is_premium"));
        let mut data = HashMap::new();
        data.insert("user".to_string(), default_output(json!({"is_premium": true})));
        let input = StepInput::new(EventId::new()).with_data(data);

        let (outputs, errors) = run_once(step, input).await;
        assert!(errors.is_empty());
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].data.len(), 1);
        assert!(outputs[0].data.contains_key("true"));
        assert!(!outputs[0].data.contains_key("false"));
    }

    #[tokio::test]
    async fn false_condition_emits_false_label() {
        let step = if_step(json!(false));
        let (outputs, _) = run_once(step, StepInput::new(EventId::new())).await;
        assert!(outputs[0].data.contains_key("false"));
    }

    #[tokio::test]
    async fn non_boolean_condition_is_an_error() {
        let step = if_step(json!("yes"));
        let (outputs, errors) = run_once(step, StepInput::new(EventId::new())).await;
        assert!(outputs.is_empty());
        assert_eq!(errors.len(), 1);
        assert!(errors[0].to_string().contains("expected boolean"));
    }

    #[test]
    fn missing_condition_rejected() {
        assert!(factory(&StepConfig::new()).is_err());
    }
}
