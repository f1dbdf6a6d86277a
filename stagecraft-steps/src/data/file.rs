//! File reader step.

use serde_json::Value as JsonValue;
use stagecraft_core::step::{step_channels, StepChannels};
use stagecraft_core::{
    default_output, Error, Result, Step, StepConfig, StepInput, StepOutput, ValueSpec,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Reads a file per event and emits its contents as a string.
///
/// # Configuration
///
/// ```yaml
/// step_type: file
/// step_config:
///   path: /var/data/orders.json    # or "$js: ctx.src.path"
/// ```
pub struct FileStep {
    path: ValueSpec,
}

/// Create a `file` step from configuration.
pub fn factory(config: &StepConfig) -> Result<Arc<dyn Step>> {
    let path = config.require_spec("path")?;
    Ok(Arc::new(FileStep { path }))
}

impl Step for FileStep {
    fn kind(&self) -> &str {
        "file"
    }

    fn run(&self, cancel: CancellationToken, mut inputs: mpsc::Receiver<StepInput>) -> StepChannels {
        let path = self.path.clone();
        let (out_tx, err_tx, channels) = step_channels();

        tokio::spawn(async move {
            while let Some(input) = inputs.recv().await {
                let file_path = match path.resolve(&input) {
                    Ok(JsonValue::String(s)) => s,
                    Ok(other) => other.to_string(),
                    Err(e) => {
                        let _ = err_tx
                            .send(Error::step(format!("failed to resolve path: {}", e)))
                            .await;
                        continue;
                    }
                };

                let content = match tokio::fs::read_to_string(&file_path).await {
                    Ok(content) => content,
                    Err(e) => {
                        let _ = err_tx.send(Error::io(&file_path, e)).await;
                        continue;
                    }
                };

                let output = StepOutput::new(default_output(content), input.event_id);
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

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use stagecraft_core::EventId;
    use std::io::Write;

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
    async fn reads_file_contents() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        write!(tmp, "hello from disk").unwrap();

        let config = StepConfig::from_map(
            [("path".to_string(), json!(tmp.path().to_str().unwrap()))].into(),
        );
        let step = factory(&config).unwrap();

        let (outputs, errors) = run_once(step, StepInput::new(EventId::new())).await;
        assert!(errors.is_empty());
        assert_eq!(outputs[0].data["default"].value(), &json!("hello from disk"));
    }

    #[tokio::test]
    async fn missing_file_is_a_per_event_error() {
        let config = StepConfig::from_map(
            [("path".to_string(), json!("/nonexistent/stagecraft-test"))].into(),
        );
        let step = factory(&config).unwrap();

        let (outputs, errors) = run_once(step, StepInput::new(EventId::new())).await;
        assert!(outputs.is_empty());
        assert_eq!(errors.len(), 1);
        assert!(errors[0].to_string().contains("/nonexistent/stagecraft-test"));
    }

    #[test]
    fn missing_path_rejected() {
        assert!(factory(&StepConfig::new()).is_err());
    }
}
