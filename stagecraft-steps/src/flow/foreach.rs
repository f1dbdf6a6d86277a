//! List iteration step.

use serde_json::{json, Value as JsonValue};
use stagecraft_core::step::{step_channels, StepChannels};
use stagecraft_core::{
    Datum, Error, NamedOutputs, Result, Step, StepConfig, StepInput, StepOutput, ValueSpec,
    DEFAULT_OUTPUT,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Iterates a list, exposing one `iteration_<i>` output label per element
/// (carrying `{item, index}`) plus an aggregated `default` output with
/// `{items, count}`.
///
/// Downstream stages can subscribe to a single iteration via
/// `"loop:iteration_0"` or consume the aggregate via `"loop"`.
///
/// # Configuration
///
/// ```yaml
/// step_type: foreach
/// step_config:
///   list: "$js: ctx.fetch.body.items"
/// ```
pub struct ForeachStep {
    list: ValueSpec,
}

/// Create a `foreach` step from configuration.
pub fn factory(config: &StepConfig) -> Result<Arc<dyn Step>> {
    let list = config.require_spec("list")?;
    Ok(Arc::new(ForeachStep { list }))
}

impl Step for ForeachStep {
    fn kind(&self) -> &str {
        "foreach"
    }

    fn run(&self, cancel: CancellationToken, mut inputs: mpsc::Receiver<StepInput>) -> StepChannels {
        let list = self.list.clone();
        let (out_tx, err_tx, channels) = step_channels();

        tokio::spawn(async move {
            while let Some(input) = inputs.recv().await {
                let resolved = match list.resolve(&input) {
                    Ok(value) => value,
                    Err(e) => {
                        let _ = err_tx
                            .send(Error::step(format!("failed to resolve list: {}", e)))
                            .await;
                        continue;
                    }
                };

                let JsonValue::Array(items) = resolved else {
                    let _ = err_tx
                        .send(Error::TypeMismatch {
                            context: "list".to_string(),
                            expected: "array".to_string(),
                            actual: json_type_name(&resolved).to_string(),
                        })
                        .await;
                    continue;
                };

                let mut outputs = NamedOutputs::new();
                let mut all_results = Vec::with_capacity(items.len());

                for (index, item) in items.iter().enumerate() {
                    let iteration = json!({ "item": item, "index": index });
                    outputs.insert(format!("iteration_{}", index), Datum::new(iteration.clone()));
                    all_results.push(iteration);
                }

                outputs.insert(
                    DEFAULT_OUTPUT.to_string(),
                    Datum::new(json!({ "items": all_results, "count": items.len() })),
                );

                let output = StepOutput::new(outputs, input.event_id);
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
    use stagecraft_core::EventId;

    fn foreach_step(list: serde_json::Value) -> Arc<dyn Step> {
        let config = StepConfig::from_map([("list".to_string(), list)].into());
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
    async fn emits_iterations_and_aggregate() {
        let step = foreach_step(json!(["a", "b", "c"]));
        let (outputs, errors) = run_once(step, StepInput::new(EventId::new())).await;

        assert!(errors.is_empty());
        assert_eq!(outputs.len(), 1);
        let data = &outputs[0].data;

        // 3 iterations + default aggregate.
        assert_eq!(data.len(), 4);
        assert_eq!(
            data["iteration_0"].value(),
            &json!({"item": "a", "index": 0})
        );
        assert_eq!(
            data["iteration_2"].value(),
            &json!({"item": "c", "index": 2})
        );
        assert_eq!(data["default"].value()["count"], json!(3));
        assert_eq!(
            data["default"].value()["items"][1],
            json!({"item": "b", "index": 1})
        );
    }

    #[tokio::test]
    async fn empty_list_emits_only_the_aggregate() {
        let step = foreach_step(json!([]));
        let (outputs, _) = run_once(step, StepInput::new(EventId::new())).await;
        let data = &outputs[0].data;
        assert_eq!(data.len(), 1);
        assert_eq!(data["default"].value()["count"], json!(0));
    }

    #[tokio::test]
    async fn non_array_list_is_an_error() {
        let step = foreach_step(json!(42));
        let (outputs, errors) = run_once(step, StepInput::new(EventId::new())).await;
        assert!(outputs.is_empty());
        assert!(errors[0].to_string().contains("expected array"));
    }

    #[test]
    fn missing_list_rejected() {
        assert!(factory(&StepConfig::new()).is_err());
    }
}
