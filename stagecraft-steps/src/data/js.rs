//! JavaScript transform step.

use stagecraft_core::step::{step_channels, StepChannels};
use stagecraft_core::value::DynamicExpr;
use stagecraft_core::{
    default_output, Error, Result, Step, StepConfig, StepInput, StepOutput, ValueSpec,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Evaluates a JavaScript expression per event and emits the result.
///
/// The expression sees `ctx` (upstream payloads), `$vars`, and `$secrets`.
/// `code` is a single return-expression; a leading `return` keyword and a
/// trailing semicolon are accepted and stripped.
///
/// # Configuration
///
/// ```yaml
/// step_type: js
/// step_config:
///   code: "return { total: ctx.src.value * 2 }"
/// ```
pub struct JsStep {
    expression: ValueSpec,
}

/// Create a `js` step from configuration.
pub fn factory(config: &StepConfig) -> Result<Arc<dyn Step>> {
    let code = config.get_str("code").ok_or_else(|| Error::MissingConfig {
        key: "code".to_string(),
    })?;

    let mut expression = code.trim();
    // Strip a leading `return` keyword, but not an identifier like `returns`.
    if let Some(rest) = expression.strip_prefix("return") {
        if rest.is_empty() || rest.starts_with([' ', '\t', '\n', '(', '[', '{', '\'', '"']) {
            expression = rest.trim_start();
        }
    }
    expression = expression.trim_end_matches(';').trim_end();
    if expression.is_empty() {
        return Err(Error::InvalidConfig {
            key: "code".to_string(),
            cause: "expression is empty".to_string(),
        });
    }

    Ok(Arc::new(JsStep {
        expression: ValueSpec::Dynamic(DynamicExpr::js(expression)),
    }))
}

impl Step for JsStep {
    fn kind(&self) -> &str {
        "js"
    }

    fn run(&self, cancel: CancellationToken, mut inputs: mpsc::Receiver<StepInput>) -> StepChannels {
        let expression = self.expression.clone();
        let (out_tx, err_tx, channels) = step_channels();

        tokio::spawn(async move {
            while let Some(input) = inputs.recv().await {
                let result = match expression.resolve(&input) {
                    Ok(value) => value,
                    Err(e) => {
                        let _ = err_tx.send(e).await;
                        continue;
                    }
                };

                let output = StepOutput::new(default_output(result), input.event_id);
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
