//! Build a runnable [`Pipeline`] from a parsed configuration.

use crate::pipeline::Pipeline;
use serde_json::Value as JsonValue;
use stagecraft_core::config::{DependencyRef, PipelineConfig};
use stagecraft_core::{Error, Result, StepConfig, StepInput, StepRegistry, ValueSpec};
use std::collections::{HashMap, HashSet};

/// Build a pipeline from a configuration.
///
/// Global variables and secrets are resolved once at build time (so `$env:`
/// references work); stages are instantiated through the registry and wired
/// according to their dependency lists, honoring `stage_id:branch` filters
/// and the legacy `inputs` alias.
pub fn build_from_config(config: &PipelineConfig, registry: &StepRegistry) -> Result<Pipeline> {
    let pipeline = Pipeline::new();

    if let Some(variables) = &config.variables {
        pipeline.set_variables(resolve_global_map(variables)?);
    }

    if let Some(secrets) = &config.secrets {
        pipeline.set_secrets(resolve_global_map(secrets)?);
    }

    // Phase 1: create every stage, without dependencies.
    let mut seen = HashSet::new();
    for stage_config in &config.stages {
        if !seen.insert(stage_config.id.as_str()) {
            return Err(Error::DuplicateStage {
                stage: stage_config.id.clone(),
            });
        }

        let step_config = StepConfig::from_yaml(&stage_config.step_config)?;
        let step = registry.create(&stage_config.step_type, &step_config)?;
        pipeline.add_stage(&stage_config.id, step);
    }

    // Phase 2: wire dependencies now that every stage exists.
    for stage_config in &config.stages {
        let dependencies = stage_config.effective_dependencies();
        if dependencies.is_empty() {
            continue;
        }

        let builder = pipeline
            .stage_builder(&stage_config.id)
            .expect("stage registered in phase 1");

        for dependency in dependencies {
            let dep_ref = DependencyRef::parse(dependency);
            if dep_ref.has_branch() {
                builder.after_with_branch(&dep_ref.stage_id, &dep_ref.branch)?;
            } else {
                builder.after(&dep_ref.stage_id)?;
            }
        }
    }

    Ok(pipeline)
}

/// Resolve a `variables:` / `secrets:` block.
///
/// Each value goes through sigil parsing and is resolved with an empty
/// envelope; only load-time indirections (`$env:`) and literals make sense
/// here.
fn resolve_global_map(
    values: &HashMap<String, serde_yaml::Value>,
) -> Result<HashMap<String, JsonValue>> {
    let empty = StepInput::empty();
    let mut resolved = HashMap::with_capacity(values.len());

    for (key, value) in values {
        let json = serde_json::to_value(value).map_err(|e| Error::InvalidConfig {
            key: key.clone(),
            cause: e.to_string(),
        })?;
        let spec = ValueSpec::parse(json);
        let value = spec.resolve(&empty).map_err(|e| Error::InvalidConfig {
            key: key.clone(),
            cause: e.to_string(),
        })?;
        resolved.insert(key.clone(), value);
    }

    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use stagecraft_core::step::{step_channels, Step, StepChannels};
    use stagecraft_core::{StepInput, StepOutput};
    use std::sync::Arc;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    struct NullStep;

    impl Step for NullStep {
        fn kind(&self) -> &str {
            "null"
        }

        fn run(
            &self,
            _cancel: CancellationToken,
            mut inputs: mpsc::Receiver<StepInput>,
        ) -> StepChannels {
            let (out_tx, _err_tx, channels) = step_channels();
            tokio::spawn(async move {
                while let Some(input) = inputs.recv().await {
                    let _ = out_tx
                        .send(StepOutput::new(
                            stagecraft_core::default_output(json!(null)),
                            input.event_id,
                        ))
                        .await;
                }
            });
            channels
        }
    }

    fn registry() -> StepRegistry {
        let registry = StepRegistry::new();
        registry.register(
            "null",
            Arc::new(|_config: &StepConfig| Ok(Arc::new(NullStep) as Arc<dyn Step>)),
        );
        registry
    }

    #[test]
    fn builds_stages_and_dependencies() {
        let config = PipelineConfig::from_yaml(
            r#"
name: wired
stages:
  - id: a
    step_type: "null"
  - id: b
    step_type: "null"
    dependencies: [a]
  - id: c
    step_type: "null"
    dependencies: ["b:done"]
"#,
        )
        .unwrap();

        let pipeline = build_from_config(&config, &registry()).unwrap();
        assert_eq!(pipeline.stage_ids(), vec!["a", "b", "c"]);
        pipeline.validate().unwrap();
    }

    #[test]
    fn unknown_step_type_fails() {
        let config = PipelineConfig::from_yaml(
            "name: bad\nstages:\n  - id: a\n    step_type: ghost\n",
        )
        .unwrap();
        let err = match build_from_config(&config, &registry()) {
            Err(err) => err,
            Ok(_) => panic!("expected an error"),
        };
        assert_eq!(err.to_string(), "unknown step type: ghost");
    }

    #[test]
    fn unknown_dependency_fails() {
        let config = PipelineConfig::from_yaml(
            r#"
name: bad
stages:
  - id: a
    step_type: "null"
    dependencies: [missing]
"#,
        )
        .unwrap();
        let err = match build_from_config(&config, &registry()) {
            Err(err) => err,
            Ok(_) => panic!("expected an error"),
        };
        assert!(err.to_string().contains("non-existent stage 'missing'"));
    }

    #[test]
    fn duplicate_stage_id_fails() {
        let config = PipelineConfig::from_yaml(
            r#"
name: dup
stages:
  - id: a
    step_type: "null"
  - id: a
    step_type: "null"
"#,
        )
        .unwrap();
        let err = match build_from_config(&config, &registry()) {
            Err(err) => err,
            Ok(_) => panic!("expected an error"),
        };
        assert_eq!(err.to_string(), "duplicate stage id 'a'");
    }

    #[test]
    fn env_references_resolve_at_build_time() {
        std::env::set_var("STAGECRAFT_BUILDER_TEST_TOKEN", "sekrit");
        let config = PipelineConfig::from_yaml(
            r#"
name: globals
secrets:
  token: "$env: STAGECRAFT_BUILDER_TEST_TOKEN"
variables:
  region: eu-central-1
stages:
  - id: a
    step_type: "null"
"#,
        )
        .unwrap();

        let pipeline = build_from_config(&config, &registry()).unwrap();
        // Globals are installed on the pipeline; validated indirectly by a
        // successful build. A missing env var is the failure case below.
        pipeline.validate().unwrap();

        let config = PipelineConfig::from_yaml(
            r#"
name: broken
variables:
  token: "$env: STAGECRAFT_BUILDER_TEST_UNSET"
stages:
  - id: a
    step_type: "null"
"#,
        )
        .unwrap();
        let err = match build_from_config(&config, &registry()) {
            Err(err) => err,
            Ok(_) => panic!("expected an error"),
        };
        assert!(err.to_string().contains("token"));
    }

    #[test]
    fn legacy_inputs_wire_dependencies() {
        let config = PipelineConfig::from_yaml(
            r#"
name: legacy
stages:
  - id: a
    step_type: "null"
  - id: b
    step_type: "null"
    inputs: [a]
"#,
        )
        .unwrap();
        let pipeline = build_from_config(&config, &registry()).unwrap();
        pipeline.validate().unwrap();
    }
}
