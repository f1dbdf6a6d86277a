//! Pipeline definition - the top-level YAML document.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// A complete pipeline definition from YAML.
///
/// # Example
///
/// ```yaml
/// name: fetch_and_transform
/// description: Fetch a document and double its value
///
/// variables:
///   base_url: "https://example.com"
///   api_key: "$env: EXAMPLE_API_KEY"
///
/// stages:
///   - id: src
///     step_type: json
///     step_config:
///       data: '{"value": 10}'
///
///   - id: dbl
///     step_type: js
///     step_config:
///       code: "return ctx.src.value * 2"
///     dependencies: [src]
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Pipeline name.
    pub name: String,

    /// Human-readable description.
    #[serde(default)]
    pub description: String,

    /// Global reusable variables (`$env:` references resolved at load).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variables: Option<HashMap<String, serde_yaml::Value>>,

    /// Sensitive values (API keys, tokens); same resolution rules as
    /// variables, masked in logs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secrets: Option<HashMap<String, serde_yaml::Value>>,

    /// The stages of the pipeline.
    #[serde(default)]
    pub stages: Vec<StageConfig>,
}

impl PipelineConfig {
    /// Parse a pipeline definition from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Parse a pipeline definition from a YAML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        Self::from_yaml(&content)
    }

    /// Get a stage by id.
    pub fn get_stage(&self, id: &str) -> Option<&StageConfig> {
        self.stages.iter().find(|s| s.id == id)
    }
}

/// The configuration of one stage from YAML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageConfig {
    /// Unique stage identifier.
    pub id: String,

    /// Step type to instantiate.
    pub step_type: String,

    /// Step-specific configuration block.
    #[serde(default)]
    pub step_config: serde_yaml::Value,

    /// Ids of stages this stage depends on, each `"stage_id"` or
    /// `"stage_id:branch"`.
    #[serde(default)]
    pub dependencies: Vec<String>,

    /// Deprecated alias for `dependencies`, honored only when
    /// `dependencies` is absent.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inputs: Vec<String>,
}

impl StageConfig {
    /// The effective dependency list, honoring the legacy `inputs` alias.
    pub fn effective_dependencies(&self) -> &[String] {
        if self.dependencies.is_empty() {
            &self.inputs
        } else {
            &self.dependencies
        }
    }
}

/// A parsed dependency reference: an upstream stage id plus an optional
/// branch filter.
///
/// `"stage_id"` accepts every output of the upstream stage;
/// `"stage_id:label"` accepts only outputs whose labels include `label`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyRef {
    /// The upstream stage id.
    pub stage_id: String,
    /// The branch filter; empty means accept-all.
    pub branch: String,
}

impl DependencyRef {
    /// Parse a dependency string, splitting at the last colon.
    ///
    /// A trailing colon yields an empty branch with the colon kept in the id
    /// (`"stage:"` parses as id `"stage:"`), preserving compatibility with
    /// existing configs. Colons left of the split stay in the id.
    pub fn parse(s: &str) -> Self {
        match s.rsplit_once(':') {
            Some((stage_id, branch)) if !branch.is_empty() => Self {
                stage_id: stage_id.to_string(),
                branch: branch.to_string(),
            },
            _ => Self {
                stage_id: s.to_string(),
                branch: String::new(),
            },
        }
    }

    /// Whether this reference filters on a branch label.
    pub fn has_branch(&self) -> bool {
        !self.branch.is_empty()
    }
}

impl std::fmt::Display for DependencyRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.branch.is_empty() {
            f.write_str(&self.stage_id)
        } else {
            write!(f, "{}:{}", self.stage_id, self.branch)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_simple_dependency() {
        let dep = DependencyRef::parse("fetch");
        assert_eq!(dep.stage_id, "fetch");
        assert_eq!(dep.branch, "");
        assert!(!dep.has_branch());
    }

    #[test]
    fn parse_dependency_with_branch() {
        let cases = [
            ("check:true", "check", "true"),
            ("check:false", "check", "false"),
            ("router:premium", "router", "premium"),
        ];
        for (input, stage_id, branch) in cases {
            let dep = DependencyRef::parse(input);
            assert_eq!(dep.stage_id, stage_id, "input {input}");
            assert_eq!(dep.branch, branch, "input {input}");
        }
    }

    #[test]
    fn parse_dependency_trailing_colon() {
        // The trailing colon is not stripped from the id.
        let dep = DependencyRef::parse("stage:");
        assert_eq!(dep.stage_id, "stage:");
        assert_eq!(dep.branch, "");
    }

    #[test]
    fn parse_dependency_multiple_colons() {
        let dep = DependencyRef::parse("stage:with:colons:branch");
        assert_eq!(dep.stage_id, "stage:with:colons");
        assert_eq!(dep.branch, "branch");
    }

    #[test]
    fn dependency_display_round_trip() {
        for s in ["plain", "check:true", "a:b:c"] {
            assert_eq!(DependencyRef::parse(s).to_string(), s);
        }
    }

    #[test]
    fn parse_complete_pipeline() {
        let yaml = r#"
name: orders
description: Order processing

variables:
  region: eu-west-1

secrets:
  token: "$env: ORDERS_TOKEN"

stages:
  - id: trigger
    step_type: cron
    step_config:
      schedule: "@every 5m"

  - id: fetch
    step_type: http_client
    step_config:
      url: "https://example.com/orders"
    dependencies: [trigger]
"#;
        let config = PipelineConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.name, "orders");
        assert_eq!(config.stages.len(), 2);
        assert!(config.variables.as_ref().unwrap().contains_key("region"));
        assert!(config.secrets.as_ref().unwrap().contains_key("token"));

        let fetch = config.get_stage("fetch").unwrap();
        assert_eq!(fetch.step_type, "http_client");
        assert_eq!(fetch.effective_dependencies(), ["trigger"]);
    }

    #[test]
    fn legacy_inputs_alias() {
        let yaml = r#"
name: legacy
stages:
  - id: a
    step_type: json
    step_config:
      data: "{}"
  - id: b
    step_type: js
    step_config:
      code: "return 1"
    inputs: [a]
"#;
        let config = PipelineConfig::from_yaml(yaml).unwrap();
        let b = config.get_stage("b").unwrap();
        assert_eq!(b.effective_dependencies(), ["a"]);
    }

    #[test]
    fn dependencies_win_over_inputs() {
        let yaml = r#"
name: both
stages:
  - id: s
    step_type: json
    dependencies: [x]
    inputs: [y]
"#;
        let config = PipelineConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.stages[0].effective_dependencies(), ["x"]);
    }

    #[test]
    fn minimal_pipeline() {
        let config = PipelineConfig::from_yaml("name: empty\n").unwrap();
        assert_eq!(config.name, "empty");
        assert!(config.stages.is_empty());
        assert!(config.variables.is_none());
    }

    #[test]
    fn from_file_round_trip() {
        use std::io::Write;
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        write!(tmp, "name: on_disk\nstages:\n  - id: a\n    step_type: json\n").unwrap();

        let config = PipelineConfig::from_file(tmp.path()).unwrap();
        assert_eq!(config.name, "on_disk");
        assert_eq!(config.stages.len(), 1);
    }

    #[test]
    fn from_file_missing_path() {
        let err = PipelineConfig::from_file(Path::new("/nonexistent/pipeline.yaml")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/pipeline.yaml"));
    }
}
