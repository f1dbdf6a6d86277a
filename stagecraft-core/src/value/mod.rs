//! The polymorphic value model.
//!
//! A [`ValueSpec`] distinguishes values known at build time (static literals)
//! from values that need pipeline context (dynamic expressions, variable and
//! secret references, structured bodies with dynamic members). Static specs
//! resolve to themselves and never touch the expression evaluator.

pub mod body;
pub mod expr;
pub mod template;

use crate::envelope::StepInput;
use crate::error::{Error, Result};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

/// A dynamic expression evaluated per event in the embedded sandbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DynamicExpr {
    /// Expression language; `js` is the only supported value (others are
    /// reserved).
    pub language: String,
    /// The expression source text.
    pub expression: String,
}

impl DynamicExpr {
    /// Create a JavaScript expression.
    pub fn js(expression: impl Into<String>) -> Self {
        Self {
            language: "js".to_string(),
            expression: expression.into(),
        }
    }
}

/// A composite body holding nested specs, resolved element-wise.
#[derive(Debug, Clone)]
pub enum StructuredBody {
    /// An object with per-field specs.
    Map(BTreeMap<String, ValueSpec>),
    /// An array with per-item specs.
    Array(Vec<ValueSpec>),
}

/// A value that is either known now or computed per event.
#[derive(Debug, Clone)]
pub enum ValueSpec {
    /// A literal payload; resolves to itself.
    Static(JsonValue),
    /// A sandboxed expression evaluated against the pipeline context.
    Dynamic(DynamicExpr),
    /// A lookup in the pipeline's global variables.
    Variable(String),
    /// A lookup in the pipeline's global secrets.
    Secret(String),
    /// A lookup in the process environment, resolved at load time.
    Env(String),
    /// A composite with static and dynamic members.
    Structured(StructuredBody),
}

impl ValueSpec {
    /// Wrap a literal value.
    pub fn literal(value: impl Into<JsonValue>) -> Self {
        Self::Static(value.into())
    }

    /// Convert a raw configuration value into a spec via prefix detection.
    ///
    /// String values starting with `$js:`, `$var:`, `$secret:` or `$env:`
    /// become the corresponding dynamic spec; everything else is static.
    pub fn parse(value: JsonValue) -> Self {
        if let JsonValue::String(s) = &value {
            if let Some(expr) = s.strip_prefix("$js:") {
                return Self::Dynamic(DynamicExpr::js(expr.trim()));
            }
            if let Some(name) = s.strip_prefix("$var:") {
                return Self::Variable(name.trim().to_string());
            }
            if let Some(name) = s.strip_prefix("$secret:") {
                return Self::Secret(name.trim().to_string());
            }
            if let Some(name) = s.strip_prefix("$env:") {
                return Self::Env(name.trim().to_string());
            }
        }
        Self::Static(value)
    }

    /// Whether this spec resolves without pipeline context.
    pub fn is_static(&self) -> bool {
        matches!(self, Self::Static(_))
    }

    /// The literal payload, when static.
    pub fn static_value(&self) -> Option<&JsonValue> {
        match self {
            Self::Static(value) => Some(value),
            _ => None,
        }
    }

    /// The dynamic expression, when this spec is one.
    pub fn dynamic_expr(&self) -> Option<&DynamicExpr> {
        match self {
            Self::Dynamic(expr) => Some(expr),
            _ => None,
        }
    }

    /// Resolve the spec against one input envelope.
    ///
    /// Static values return themselves; dynamic expressions run in a fresh
    /// sandbox populated from the envelope; references look up the global
    /// maps or the process environment; structured bodies resolve
    /// element-wise.
    pub fn resolve(&self, input: &StepInput) -> Result<JsonValue> {
        match self {
            Self::Static(value) => Ok(value.clone()),

            Self::Dynamic(dynamic) => match dynamic.language.as_str() {
                "js" | "javascript" | "" => {
                    let scope = expr::Scope::from_input(input);
                    expr::evaluate(&dynamic.expression, &scope)
                }
                other => Err(Error::UnsupportedLanguage {
                    language: other.to_string(),
                }),
            },

            Self::Variable(name) => input
                .variables
                .get(name)
                .cloned()
                .ok_or_else(|| Error::UnknownVariable { name: name.clone() }),

            Self::Secret(name) => input
                .secrets
                .get(name)
                .cloned()
                .ok_or_else(|| Error::UnknownSecret { name: name.clone() }),

            Self::Env(name) => match std::env::var(name) {
                Ok(value) if !value.is_empty() => Ok(JsonValue::String(value)),
                _ => Err(Error::UnknownEnv { name: name.clone() }),
            },

            Self::Structured(StructuredBody::Map(fields)) => {
                let mut result = serde_json::Map::with_capacity(fields.len());
                for (key, spec) in fields {
                    let resolved = spec.resolve(input).map_err(|e| {
                        Error::step(format!("failed to resolve field '{}': {}", key, e))
                    })?;
                    result.insert(key.clone(), resolved);
                }
                Ok(JsonValue::Object(result))
            }

            Self::Structured(StructuredBody::Array(items)) => {
                let mut result = Vec::with_capacity(items.len());
                for (i, spec) in items.iter().enumerate() {
                    let resolved = spec.resolve(input).map_err(|e| {
                        Error::step(format!("failed to resolve array item {}: {}", i, e))
                    })?;
                    result.push(resolved);
                }
                Ok(JsonValue::Array(result))
            }
        }
    }
}

/// Check whether any spec in a context is dynamic.
pub fn has_dynamic_values(values: &BTreeMap<String, ValueSpec>) -> bool {
    values.values().any(|v| !v.is_static())
}

/// Extract only the static values of a context, for template rendering.
pub fn extract_static_values(values: &BTreeMap<String, ValueSpec>) -> BTreeMap<String, JsonValue> {
    values
        .iter()
        .filter_map(|(k, v)| v.static_value().map(|value| (k.clone(), value.clone())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::StepInput;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn input_with_vars(vars: &[(&str, JsonValue)]) -> StepInput {
        let variables: HashMap<String, JsonValue> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        StepInput::empty().with_globals(Arc::new(variables), Arc::new(HashMap::new()))
    }

    #[test]
    fn static_resolves_to_itself() {
        let spec = ValueSpec::literal(json!({"a": 1}));
        assert!(spec.is_static());
        assert_eq!(spec.resolve(&StepInput::empty()).unwrap(), json!({"a": 1}));
    }

    #[test]
    fn sigil_prefixes() {
        assert!(matches!(
            ValueSpec::parse(json!("$js: ctx.src.value")),
            ValueSpec::Dynamic(_)
        ));
        assert!(matches!(
            ValueSpec::parse(json!("$var: region")),
            ValueSpec::Variable(name) if name == "region"
        ));
        assert!(matches!(
            ValueSpec::parse(json!("$secret: token")),
            ValueSpec::Secret(name) if name == "token"
        ));
        assert!(matches!(
            ValueSpec::parse(json!("$env: HOME")),
            ValueSpec::Env(name) if name == "HOME"
        ));
        assert!(ValueSpec::parse(json!("plain string")).is_static());
        assert!(ValueSpec::parse(json!(42)).is_static());
    }

    #[test]
    fn variable_lookup() {
        let input = input_with_vars(&[("region", json!("eu-west-1"))]);
        let spec = ValueSpec::Variable("region".to_string());
        assert_eq!(spec.resolve(&input).unwrap(), json!("eu-west-1"));

        let missing = ValueSpec::Variable("ghost".to_string());
        let err = missing.resolve(&input).unwrap_err();
        assert!(err.to_string().contains("'ghost'"));
    }

    #[test]
    fn secret_lookup_missing() {
        let spec = ValueSpec::Secret("token".to_string());
        let err = spec.resolve(&StepInput::empty()).unwrap_err();
        assert!(err.to_string().contains("secret 'token' not found"));
    }

    #[test]
    fn env_lookup() {
        std::env::set_var("STAGECRAFT_TEST_ENV_LOOKUP", "present");
        let spec = ValueSpec::Env("STAGECRAFT_TEST_ENV_LOOKUP".to_string());
        assert_eq!(spec.resolve(&StepInput::empty()).unwrap(), json!("present"));

        let missing = ValueSpec::Env("STAGECRAFT_TEST_ENV_MISSING".to_string());
        assert!(missing.resolve(&StepInput::empty()).is_err());
    }

    #[test]
    fn unsupported_language() {
        let spec = ValueSpec::Dynamic(DynamicExpr {
            language: "lua".to_string(),
            expression: "1 + 1".to_string(),
        });
        let err = spec.resolve(&StepInput::empty()).unwrap_err();
        assert_eq!(err.to_string(), "unsupported expression language: lua");
    }

    #[test]
    fn structured_map_resolves_element_wise() {
        let input = input_with_vars(&[("region", json!("eu"))]);
        let mut fields = BTreeMap::new();
        fields.insert("literal".to_string(), ValueSpec::literal(json!(1)));
        fields.insert(
            "variable".to_string(),
            ValueSpec::Variable("region".to_string()),
        );
        let spec = ValueSpec::Structured(StructuredBody::Map(fields));

        assert!(!spec.is_static());
        assert_eq!(
            spec.resolve(&input).unwrap(),
            json!({"literal": 1, "variable": "eu"})
        );
    }

    #[test]
    fn structured_array_resolves_in_order() {
        let spec = ValueSpec::Structured(StructuredBody::Array(vec![
            ValueSpec::literal(json!("a")),
            ValueSpec::literal(json!("b")),
        ]));
        assert_eq!(spec.resolve(&StepInput::empty()).unwrap(), json!(["a", "b"]));
    }

    #[test]
    fn dynamic_detection_helpers() {
        let mut values = BTreeMap::new();
        values.insert("a".to_string(), ValueSpec::literal(json!(1)));
        assert!(!has_dynamic_values(&values));

        values.insert(
            "b".to_string(),
            ValueSpec::Dynamic(DynamicExpr::js("ctx.src.id")),
        );
        assert!(has_dynamic_values(&values));

        let statics = extract_static_values(&values);
        assert_eq!(statics.len(), 1);
        assert_eq!(statics["a"], json!(1));
    }
}
