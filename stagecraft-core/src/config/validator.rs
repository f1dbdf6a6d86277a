//! Deep validation of service definitions.
//!
//! Extends the basic structural checks in `service.rs` with body-shape and
//! parameter-consistency rules that must hold before any step is compiled.

use super::service::{OperationDef, ParameterDef, ServiceDefinition};
use crate::error::{Error, Result};
use serde_json::Value as JsonValue;
use std::collections::HashMap;

const CONDITION_OPERATORS: [&str; 5] =
    ["$exists", "$equals", "$not_equals", "$not_empty", "$is_empty"];

/// Validate an entire service definition.
pub fn validate_service(def: &ServiceDefinition) -> Result<()> {
    def.validate()?;

    for (param_name, param) in &def.global_params {
        if param.is_required() && param.default.is_some() {
            return Err(Error::InvalidService {
                service: def.service.name.clone(),
                cause: format!(
                    "global parameter '{}' is marked as required but has a default value",
                    param_name
                ),
            });
        }
    }

    for (op_name, op) in &def.operations {
        validate_operation(def, op_name, op)?;
    }

    Ok(())
}

fn validate_operation(def: &ServiceDefinition, op_name: &str, op: &OperationDef) -> Result<()> {
    let fail = |cause: String| Error::InvalidService {
        service: def.service.name.clone(),
        cause: format!("operation '{}': {}", op_name, cause),
    };

    // A parameter cannot be both mandatory and pre-filled.
    for (param_name, param) in &op.params {
        if param.is_required() && param.default.is_some() {
            return Err(fail(format!(
                "parameter '{}' is marked as required but has a default value",
                param_name
            )));
        }
    }

    if let Some(body) = &op.body {
        validate_body_references(body, &op.params).map_err(|cause| fail(cause))?;
    }

    Ok(())
}

/// Check that every `$param` inside a body tree names a declared parameter
/// and that reserved structures are well-formed.
fn validate_body_references(
    body: &JsonValue,
    params: &HashMap<String, ParameterDef>,
) -> std::result::Result<(), String> {
    match body {
        JsonValue::Object(map) => {
            if map.contains_key("$if") {
                return validate_conditional(map, params);
            }

            if map.contains_key("$for_each") {
                return validate_array_template(map, params);
            }

            if let Some(param_name) = map.get("$param").and_then(|v| v.as_str()) {
                if !params.contains_key(param_name) && param_name != "$item" {
                    return Err(format!(
                        "parameter '{}' referenced in body but not defined in params",
                        param_name
                    ));
                }
                return Ok(());
            }

            for (key, value) in map {
                validate_body_references(value, params)
                    .map_err(|cause| format!("field '{}': {}", key, cause))?;
            }
            Ok(())
        }
        JsonValue::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                validate_body_references(item, params)
                    .map_err(|cause| format!("array item {}: {}", i, cause))?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

fn validate_conditional(
    cond: &serde_json::Map<String, JsonValue>,
    params: &HashMap<String, ParameterDef>,
) -> std::result::Result<(), String> {
    let if_cond = cond
        .get("$if")
        .and_then(|v| v.as_object())
        .ok_or_else(|| "$if must be a map".to_string())?;

    validate_condition(if_cond, params).map_err(|cause| format!("invalid condition: {}", cause))?;

    if let Some(then_val) = cond.get("$then") {
        validate_body_references(then_val, params)
            .map_err(|cause| format!("invalid then branch: {}", cause))?;
    }

    if let Some(else_val) = cond.get("$else") {
        validate_body_references(else_val, params)
            .map_err(|cause| format!("invalid else branch: {}", cause))?;
    }

    Ok(())
}

fn validate_condition(
    cond: &serde_json::Map<String, JsonValue>,
    params: &HashMap<String, ParameterDef>,
) -> std::result::Result<(), String> {
    if let Some(param_name) = cond.get("$param").and_then(|v| v.as_str()) {
        if !params.contains_key(param_name) && param_name != "$item" {
            return Err(format!(
                "condition references undefined parameter '{}'",
                param_name
            ));
        }
    }

    let operators = CONDITION_OPERATORS
        .iter()
        .filter(|op| cond.contains_key(**op))
        .count();

    if operators == 0 {
        return Err(
            "condition must have at least one operator ($exists, $equals, $not_equals, \
             $not_empty, $is_empty)"
                .to_string(),
        );
    }

    if operators > 1 {
        return Err("condition can only have one operator".to_string());
    }

    Ok(())
}

fn validate_array_template(
    tmpl: &serde_json::Map<String, JsonValue>,
    params: &HashMap<String, ParameterDef>,
) -> std::result::Result<(), String> {
    let for_each = tmpl
        .get("$for_each")
        .and_then(|v| v.as_str())
        .ok_or_else(|| "array template must have $for_each parameter".to_string())?;

    if !params.contains_key(for_each) && for_each != "$item" {
        return Err(format!(
            "array template references undefined parameter '{}'",
            for_each
        ));
    }

    let has_template = tmpl.contains_key("$template");
    let has_array_map = tmpl.contains_key("$array_map");

    if !has_template && !has_array_map {
        return Err("array template must have either $template or $array_map".to_string());
    }

    if has_template && has_array_map {
        return Err("array template cannot have both $template and $array_map".to_string());
    }

    if let Some(template) = tmpl.get("$template") {
        validate_body_references(template, params)
            .map_err(|cause| format!("invalid template: {}", cause))?;
    }

    Ok(())
}
