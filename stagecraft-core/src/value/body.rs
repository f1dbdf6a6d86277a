//! Recursive request-body resolution.
//!
//! Turns an operation's YAML body skeleton plus a parameter environment into
//! a [`ValueSpec`]: a static literal when nothing in it needs pipeline
//! context, a [`StructuredBody`] otherwise. Reserved keys drive the shape:
//! `$param` references, `$if`/`$then`/`$else` conditionals, and
//! `$for_each`/`$template` array templates.

use super::{StructuredBody, ValueSpec};
use crate::config::{OperationDef, ServiceDefinition};
use crate::envelope::StepInput;
use crate::error::{Error, Result};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

/// The parameter environment a body resolves against.
pub type ParamEnv = BTreeMap<String, ValueSpec>;

/// Resolves an operation's body skeleton against user parameters.
pub struct BodyResolver<'a> {
    service: &'a ServiceDefinition,
    operation: &'a OperationDef,
}

impl<'a> BodyResolver<'a> {
    /// Create a resolver for one operation of a service.
    pub fn new(service: &'a ServiceDefinition, operation: &'a OperationDef) -> Self {
        Self { service, operation }
    }

    /// Resolve the operation body.
    ///
    /// Returns `None` when the operation has no body, or when the whole body
    /// resolves to *omitted*.
    pub fn resolve(&self, user_params: &ParamEnv) -> Result<Option<ValueSpec>> {
        let merged = self.merge_params(user_params);
        self.validate_required(&merged)?;

        match &self.operation.body {
            None => Ok(None),
            Some(body) => self.resolve_node(body, &merged),
        }
    }

    /// Merge the parameter environment.
    ///
    /// Precedence, lowest first: service-level global defaults, operation
    /// defaults, user-supplied parameters.
    pub fn merge_params(&self, user_params: &ParamEnv) -> ParamEnv {
        let mut merged = ParamEnv::new();

        for (name, param) in &self.service.global_params {
            if let Some(default) = &param.default {
                merged.insert(name.clone(), ValueSpec::literal(default.clone()));
            }
        }

        for (name, param) in &self.operation.params {
            if let Some(default) = &param.default {
                merged.insert(name.clone(), ValueSpec::literal(default.clone()));
            }
        }

        for (name, spec) in user_params {
            merged.insert(name.clone(), spec.clone());
        }

        merged
    }

    fn validate_required(&self, params: &ParamEnv) -> Result<()> {
        for (name, param) in &self.operation.params {
            if param.is_required() && !params.contains_key(name) {
                return Err(Error::MissingParameter { name: name.clone() });
            }
        }
        Ok(())
    }

    fn resolve_node(&self, node: &JsonValue, params: &ParamEnv) -> Result<Option<ValueSpec>> {
        match node {
            JsonValue::Object(map) => self.resolve_map(map, params),
            JsonValue::Array(items) => self.resolve_array(items, params),
            scalar => Ok(Some(ValueSpec::literal(scalar.clone()))),
        }
    }

    fn resolve_map(
        &self,
        map: &serde_json::Map<String, JsonValue>,
        params: &ParamEnv,
    ) -> Result<Option<ValueSpec>> {
        if map.contains_key("$if") {
            return self.resolve_conditional(map, params);
        }

        if map.contains_key("$for_each") {
            return self.resolve_array_template(map, params);
        }

        if let Some(param_name) = map.get("$param").and_then(|v| v.as_str()) {
            return match params.get(param_name) {
                Some(spec) => Ok(Some(spec.clone())),
                None => {
                    if let Some(param) = self.operation.params.get(param_name) {
                        if param.is_optional() {
                            // Optional and absent: the whole node is omitted.
                            return Ok(None);
                        }
                    }
                    Err(Error::UnknownParameter {
                        name: param_name.to_string(),
                    })
                }
            };
        }

        let mut fields = BTreeMap::new();
        let mut has_dynamic = false;

        for (key, value) in map {
            let resolved = self
                .resolve_node(value, params)
                .map_err(|e| Error::step(format!("field '{}': {}", key, e)))?;

            let Some(spec) = resolved else {
                continue;
            };

            if !spec.is_static() {
                has_dynamic = true;
            }
            fields.insert(key.clone(), spec);
        }

        if !has_dynamic {
            let static_map: serde_json::Map<String, JsonValue> = fields
                .into_iter()
                .filter_map(|(k, v)| v.static_value().cloned().map(|value| (k, value)))
                .collect();
            return Ok(Some(ValueSpec::Static(JsonValue::Object(static_map))));
        }

        Ok(Some(ValueSpec::Structured(StructuredBody::Map(fields))))
    }

    fn resolve_conditional(
        &self,
        cond: &serde_json::Map<String, JsonValue>,
        params: &ParamEnv,
    ) -> Result<Option<ValueSpec>> {
        let if_cond = cond
            .get("$if")
            .and_then(|v| v.as_object())
            .ok_or_else(|| Error::step("invalid conditional structure: $if must be a map"))?;

        let condition_met = self.evaluate_condition(if_cond, params)?;

        if condition_met {
            if let Some(then_val) = cond.get("$then") {
                return self.resolve_node(then_val, params);
            }
        } else if let Some(else_val) = cond.get("$else") {
            return self.resolve_node(else_val, params);
        }

        // The chosen branch is absent: the node is omitted.
        Ok(None)
    }

    fn evaluate_condition(
        &self,
        cond: &serde_json::Map<String, JsonValue>,
        params: &ParamEnv,
    ) -> Result<bool> {
        let param_name = cond
            .get("$param")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::step("condition must have $param"))?;

        // $exists only looks at presence, never at the value.
        if let Some(exists) = cond.get("$exists").and_then(|v| v.as_bool()) {
            let present = params.contains_key(param_name);
            return Ok(if exists { present } else { !present });
        }

        let Some(spec) = params.get(param_name) else {
            // Absent parameter: every value-inspecting condition is false.
            return Ok(false);
        };

        let resolved = spec.resolve(&StepInput::empty()).map_err(|e| {
            Error::step(format!("failed to resolve parameter '{}': {}", param_name, e))
        })?;

        if let Some(expected) = cond.get("$equals") {
            return Ok(json_equal(&resolved, expected));
        }

        if let Some(expected) = cond.get("$not_equals") {
            return Ok(!json_equal(&resolved, expected));
        }

        if let Some(not_empty) = cond.get("$not_empty").and_then(|v| v.as_bool()) {
            let non_empty = !value_is_empty(&resolved);
            return Ok(if not_empty { non_empty } else { !non_empty });
        }

        if let Some(is_empty) = cond.get("$is_empty").and_then(|v| v.as_bool()) {
            let empty = value_is_empty(&resolved);
            return Ok(if is_empty { empty } else { !empty });
        }

        // No operator: implicit non-empty check.
        Ok(!value_is_empty(&resolved))
    }

    fn resolve_array_template(
        &self,
        tmpl: &serde_json::Map<String, JsonValue>,
        params: &ParamEnv,
    ) -> Result<Option<ValueSpec>> {
        let for_each = tmpl
            .get("$for_each")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::step("array template must have $for_each parameter as string"))?;

        if tmpl.contains_key("$array_map") {
            return Err(Error::step("$array_map is reserved and not implemented"));
        }

        let template = tmpl
            .get("$template")
            .ok_or_else(|| Error::step("array template must have $template"))?;

        let array_spec = params.get(for_each).ok_or_else(|| Error::UnknownParameter {
            name: for_each.to_string(),
        })?;

        let resolved = array_spec.resolve(&StepInput::empty()).map_err(|e| {
            Error::step(format!("failed to resolve array parameter '{}': {}", for_each, e))
        })?;

        let JsonValue::Array(items) = resolved else {
            return Err(Error::TypeMismatch {
                context: format!("$for_each parameter '{}'", for_each),
                expected: "array".to_string(),
                actual: json_type_name(&resolved).to_string(),
            });
        };

        let mut resolved_items = Vec::with_capacity(items.len());
        let mut has_dynamic = false;

        for (i, item) in items.into_iter().enumerate() {
            let mut item_params = params.clone();
            item_params.insert("$item".to_string(), ValueSpec::Static(item));

            let resolved = self.resolve_node(template, &item_params).map_err(|e| {
                Error::step(format!("failed to resolve template for array item {}: {}", i, e))
            })?;

            let Some(spec) = resolved else {
                continue;
            };
            if !spec.is_static() {
                has_dynamic = true;
            }
            resolved_items.push(spec);
        }

        if !has_dynamic {
            let static_items: Vec<JsonValue> = resolved_items
                .iter()
                .filter_map(|v| v.static_value().cloned())
                .collect();
            return Ok(Some(ValueSpec::Static(JsonValue::Array(static_items))));
        }

        Ok(Some(ValueSpec::Structured(StructuredBody::Array(
            resolved_items,
        ))))
    }

    fn resolve_array(&self, items: &[JsonValue], params: &ParamEnv) -> Result<Option<ValueSpec>> {
        let mut resolved_items = Vec::with_capacity(items.len());
        let mut has_dynamic = false;

        for (i, item) in items.iter().enumerate() {
            let resolved = self
                .resolve_node(item, params)
                .map_err(|e| Error::step(format!("array item {}: {}", i, e)))?;

            let Some(spec) = resolved else {
                continue;
            };
            if !spec.is_static() {
                has_dynamic = true;
            }
            resolved_items.push(spec);
        }

        if !has_dynamic {
            let static_items: Vec<JsonValue> = resolved_items
                .iter()
                .filter_map(|v| v.static_value().cloned())
                .collect();
            return Ok(Some(ValueSpec::Static(JsonValue::Array(static_items))));
        }

        Ok(Some(ValueSpec::Structured(StructuredBody::Array(
            resolved_items,
        ))))
    }
}

/// A value is empty iff it is null, the empty string, an empty array, or an
/// empty object. Zero and false are non-empty.
fn value_is_empty(value: &JsonValue) -> bool {
    match value {
        JsonValue::Null => true,
        JsonValue::String(s) => s.is_empty(),
        JsonValue::Array(items) => items.is_empty(),
        JsonValue::Object(map) => map.is_empty(),
        _ => false,
    }
}

/// Value equality with numeric tolerance (1 equals 1.0).
fn json_equal(a: &JsonValue, b: &JsonValue) -> bool {
    match (a, b) {
        (JsonValue::Number(x), JsonValue::Number(y)) => x.as_f64() == y.as_f64(),
        (JsonValue::Array(x), JsonValue::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(l, r)| json_equal(l, r))
        }
        (JsonValue::Object(x), JsonValue::Object(y)) => {
            x.len() == y.len()
                && x.iter()
                    .all(|(k, v)| y.get(k).map(|w| json_equal(v, w)).unwrap_or(false))
        }
        _ => a == b,
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
    use crate::config::ServiceDefinition;
    use serde_json::json;

    fn service(op_yaml: &str) -> ServiceDefinition {
        let yaml = format!(
            "service:\n  name: test\noperations:\n  op:\n    method: POST\n    path: /op\n{}",
            op_yaml
        );
        ServiceDefinition::from_yaml(&yaml).unwrap()
    }

    fn resolve_with(
        def: &ServiceDefinition,
        user: &[(&str, JsonValue)],
    ) -> Result<Option<ValueSpec>> {
        let op = def.get_operation("op").unwrap();
        let params: ParamEnv = user
            .iter()
            .map(|(k, v)| (k.to_string(), ValueSpec::literal(v.clone())))
            .collect();
        BodyResolver::new(def, op).resolve(&params)
    }

    #[test]
    fn static_body_collapses() {
        let def = service(
            r#"    body:
      fixed: "value"
      count: 3
"#,
        );
        let body = resolve_with(&def, &[]).unwrap().unwrap();
        assert!(body.is_static());
        assert_eq!(
            body.static_value().unwrap(),
            &json!({"fixed": "value", "count": 3})
        );
    }

    #[test]
    fn param_substitution() {
        let def = service(
            r#"    params:
      title:
        $required: true
    body:
      name:
        $param: title
"#,
        );
        let body = resolve_with(&def, &[("title", json!("Widget"))])
            .unwrap()
            .unwrap();
        assert_eq!(body.static_value().unwrap(), &json!({"name": "Widget"}));
    }

    #[test]
    fn missing_required_parameter() {
        let def = service(
            r#"    params:
      title:
        $required: true
    body:
      name:
        $param: title
"#,
        );
        let err = resolve_with(&def, &[]).unwrap_err();
        assert_eq!(err.to_string(), "required parameter 'title' not provided");
    }

    #[test]
    fn optional_absent_parameter_is_omitted() {
        let def = service(
            r#"    params:
      note:
        $optional: true
    body:
      kept: 1
      note:
        $param: note
"#,
        );
        let body = resolve_with(&def, &[]).unwrap().unwrap();
        // No null placeholder: the field is simply absent.
        assert_eq!(body.static_value().unwrap(), &json!({"kept": 1}));
    }

    #[test]
    fn merge_precedence_user_over_operation_over_global() {
        let yaml = r#"
service:
  name: test
global_params:
  region:
    $optional: true
    $default: "global"
  tier:
    $optional: true
    $default: "basic"
operations:
  op:
    method: POST
    path: /op
    params:
      region:
        $optional: true
        $default: "operation"
    body:
      region:
        $param: region
      tier:
        $param: tier
"#;
        let def = ServiceDefinition::from_yaml(yaml).unwrap();

        // Operation default overrides the global one.
        let body = resolve_with(&def, &[]).unwrap().unwrap();
        assert_eq!(
            body.static_value().unwrap(),
            &json!({"region": "operation", "tier": "basic"})
        );

        // User value overrides both.
        let body = resolve_with(&def, &[("region", json!("user"))])
            .unwrap()
            .unwrap();
        assert_eq!(body.static_value().unwrap()["region"], json!("user"));
    }

    #[test]
    fn conditional_selects_then_branch() {
        let def = service(
            r#"    params:
      parent_type:
        $required: true
      parent_id:
        $required: true
    body:
      parent:
        $if:
          $param: parent_type
          $equals: "database"
        $then:
          type: "database_id"
          database_id:
            $param: parent_id
        $else:
          type: "page_id"
          page_id:
            $param: parent_id
"#,
        );

        let body = resolve_with(
            &def,
            &[("parent_type", json!("database")), ("parent_id", json!("d-9"))],
        )
        .unwrap()
        .unwrap();
        assert_eq!(
            body.static_value().unwrap(),
            &json!({"parent": {"type": "database_id", "database_id": "d-9"}})
        );
    }

    #[test]
    fn conditional_selects_else_branch() {
        let def = service(
            r#"    params:
      parent_type:
        $required: true
      parent_id:
        $required: true
    body:
      parent:
        $if:
          $param: parent_type
          $equals: "database"
        $then:
          type: "database_id"
          database_id:
            $param: parent_id
        $else:
          type: "page_id"
          page_id:
            $param: parent_id
"#,
        );

        let body = resolve_with(
            &def,
            &[("parent_type", json!("page")), ("parent_id", json!("p-1"))],
        )
        .unwrap()
        .unwrap();
        assert_eq!(
            body.static_value().unwrap(),
            &json!({"parent": {"type": "page_id", "page_id": "p-1"}})
        );
    }

    #[test]
    fn conditional_absent_branch_is_omitted() {
        let def = service(
            r#"    params:
      flag:
        $optional: true
    body:
      extra:
        $if:
          $param: flag
          $exists: true
        $then: "present"
"#,
        );
        let body = resolve_with(&def, &[]).unwrap().unwrap();
        assert_eq!(body.static_value().unwrap(), &json!({}));
    }

    #[test]
    fn exists_operator_checks_presence_only() {
        let def = service(
            r#"    params:
      flag:
        $optional: true
    body:
      value:
        $if:
          $param: flag
          $exists: true
        $then: "yes"
        $else: "no"
"#,
        );
        let body = resolve_with(&def, &[("flag", json!(false))]).unwrap().unwrap();
        // Present, even though false.
        assert_eq!(body.static_value().unwrap()["value"], json!("yes"));

        let body = resolve_with(&def, &[]).unwrap().unwrap();
        assert_eq!(body.static_value().unwrap()["value"], json!("no"));
    }

    #[test]
    fn emptiness_rules() {
        assert!(value_is_empty(&json!(null)));
        assert!(value_is_empty(&json!("")));
        assert!(value_is_empty(&json!([])));
        assert!(value_is_empty(&json!({})));
        // Zero and false are non-empty.
        assert!(!value_is_empty(&json!(0)));
        assert!(!value_is_empty(&json!(false)));
    }

    #[test]
    fn not_equals_operator() {
        let def = service(
            r#"    params:
      kind:
        $required: true
    body:
      value:
        $if:
          $param: kind
          $not_equals: "skip"
        $then: "kept"
        $else: "skipped"
"#,
        );
        let body = resolve_with(&def, &[("kind", json!("other"))]).unwrap().unwrap();
        assert_eq!(body.static_value().unwrap()["value"], json!("kept"));

        let body = resolve_with(&def, &[("kind", json!("skip"))]).unwrap().unwrap();
        assert_eq!(body.static_value().unwrap()["value"], json!("skipped"));
    }

    #[test]
    fn array_template_expands_in_order() {
        let def = service(
            r#"    params:
      items:
        $required: true
    body:
      $for_each: items
      $template:
        value:
          $param: "$item"
"#,
        );
        let body = resolve_with(&def, &[("items", json!(["a", "b", "c"]))])
            .unwrap()
            .unwrap();
        assert_eq!(
            body.static_value().unwrap(),
            &json!([{"value": "a"}, {"value": "b"}, {"value": "c"}])
        );
    }

    #[test]
    fn array_template_rejects_non_array() {
        let def = service(
            r#"    params:
      items:
        $required: true
    body:
      $for_each: items
      $template:
        value:
          $param: "$item"
"#,
        );
        let err = resolve_with(&def, &[("items", json!("not-a-list"))]).unwrap_err();
        assert!(err.to_string().contains("expected array"));
    }

    #[test]
    fn array_map_is_reserved() {
        let def = service(
            r#"    params:
      items:
        $required: true
    body:
      $for_each: items
      $array_map:
        $param: items
"#,
        );
        let err = resolve_with(&def, &[("items", json!([]))]).unwrap_err();
        assert!(err.to_string().contains("$array_map"));
    }

    #[test]
    fn dynamic_member_prevents_collapse() {
        let def = service(
            r#"    params:
      title:
        $required: true
    body:
      name:
        $param: title
      fixed: 1
"#,
        );
        let op = def.get_operation("op").unwrap();
        let mut params = ParamEnv::new();
        params.insert(
            "title".to_string(),
            ValueSpec::Dynamic(crate::value::DynamicExpr::js("ctx.src.title")),
        );
        let body = BodyResolver::new(&def, op).resolve(&params).unwrap().unwrap();
        assert!(!body.is_static());

        // Runtime resolution fills the dynamic member from the envelope.
        let mut data = std::collections::HashMap::new();
        data.insert(
            "src".to_string(),
            crate::datum::default_output(json!({"title": "T"})),
        );
        let input = crate::envelope::StepInput::new(crate::envelope::EventId::new()).with_data(data);
        assert_eq!(
            body.resolve(&input).unwrap(),
            json!({"name": "T", "fixed": 1})
        );
    }

    #[test]
    fn no_body_resolves_to_none() {
        let def = service("");
        assert!(resolve_with(&def, &[]).unwrap().is_none());
    }
}
