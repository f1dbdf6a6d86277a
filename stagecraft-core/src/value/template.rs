//! Template rendering for URL, header, and auth value strings.
//!
//! Templates use `{{.name}}` placeholders. When every referenced value is
//! static the template renders to a plain string; when any value is dynamic
//! the template compiles to a JavaScript concatenation expression of the form
//! `'prefix' + <expr> + 'suffix'`, evaluated per event.

use super::expr::to_display_string;
use super::{extract_static_values, has_dynamic_values, DynamicExpr, ValueSpec};
use crate::error::{Error, Result};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

/// One piece of a split template.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    /// Literal text between placeholders.
    Literal(String),
    /// A `{{.name}}` placeholder.
    Placeholder(String),
}

fn split(template: &str) -> Result<Vec<Segment>> {
    let mut segments = Vec::new();
    let mut remaining = template;

    while let Some(start) = remaining.find("{{") {
        if start > 0 {
            segments.push(Segment::Literal(remaining[..start].to_string()));
        }
        let after = &remaining[start + 2..];
        let end = after.find("}}").ok_or_else(|| Error::Template {
            template: template.to_string(),
            cause: "unclosed template marker".to_string(),
        })?;

        let name = after[..end].trim().trim_start_matches('.').to_string();
        if name.is_empty() {
            return Err(Error::Template {
                template: template.to_string(),
                cause: "empty placeholder".to_string(),
            });
        }
        segments.push(Segment::Placeholder(name));
        remaining = &after[end + 2..];
    }

    if !remaining.is_empty() {
        segments.push(Segment::Literal(remaining.to_string()));
    }

    Ok(segments)
}

/// Render a template with static values only.
pub fn render_static(template: &str, context: &BTreeMap<String, JsonValue>) -> Result<String> {
    let mut result = String::with_capacity(template.len());
    for segment in split(template)? {
        match segment {
            Segment::Literal(text) => result.push_str(&text),
            Segment::Placeholder(name) => {
                let value = context.get(&name).ok_or_else(|| Error::Template {
                    template: template.to_string(),
                    cause: format!("template variable '{}' not found in context", name),
                })?;
                result.push_str(&to_display_string(value));
            }
        }
    }
    Ok(result)
}

/// Compile a template into a JavaScript concatenation expression.
///
/// Static values become string literals, dynamic values contribute their
/// expressions, variable and secret references become `$vars.name` /
/// `$secrets.name`. Environment references must have been resolved before
/// this point and are rejected.
pub fn to_js_expression(template: &str, context: &BTreeMap<String, ValueSpec>) -> Result<String> {
    let mut parts: Vec<String> = Vec::new();
    // Adjacent literal text folds into a single string literal.
    let mut pending_literal = String::new();

    let mut flush = |pending: &mut String, parts: &mut Vec<String>| {
        if !pending.is_empty() {
            parts.push(js_string_literal(pending));
            pending.clear();
        }
    };

    for segment in split(template)? {
        match segment {
            Segment::Literal(text) => pending_literal.push_str(&text),
            Segment::Placeholder(name) => {
                let spec = context.get(&name).ok_or_else(|| Error::Template {
                    template: template.to_string(),
                    cause: format!("template variable '{}' not found in context", name),
                })?;
                match spec {
                    ValueSpec::Static(value) => pending_literal.push_str(&to_display_string(value)),
                    ValueSpec::Dynamic(expr) => {
                        flush(&mut pending_literal, &mut parts);
                        parts.push(expr.expression.clone());
                    }
                    ValueSpec::Variable(var) => {
                        flush(&mut pending_literal, &mut parts);
                        parts.push(format!("$vars.{}", var));
                    }
                    ValueSpec::Secret(secret) => {
                        flush(&mut pending_literal, &mut parts);
                        parts.push(format!("$secrets.{}", secret));
                    }
                    ValueSpec::Env(name) => {
                        return Err(Error::Template {
                            template: template.to_string(),
                            cause: format!(
                                "environment reference '{}' must be resolved before compilation",
                                name
                            ),
                        })
                    }
                    ValueSpec::Structured(_) => {
                        return Err(Error::Template {
                            template: template.to_string(),
                            cause: format!("structured value '{}' cannot appear in a template", name),
                        })
                    }
                }
            }
        }
    }
    flush(&mut pending_literal, &mut parts);

    if parts.is_empty() {
        return Ok("''".to_string());
    }
    Ok(parts.join(" + "))
}

/// Render a template into a [`ValueSpec`]: static when the whole context is
/// static, a compiled JS expression otherwise.
pub fn render(template: &str, context: &BTreeMap<String, ValueSpec>) -> Result<ValueSpec> {
    if !template.contains("{{") {
        return Ok(ValueSpec::literal(template));
    }

    if has_dynamic_values(context) {
        let expression = to_js_expression(template, context)?;
        Ok(ValueSpec::Dynamic(DynamicExpr::js(expression)))
    } else {
        let statics = extract_static_values(context);
        Ok(ValueSpec::literal(render_static(template, &statics)?))
    }
}

/// Quote a string as a JavaScript single-quoted literal.
pub fn js_string_literal(s: &str) -> String {
    if s.is_empty() {
        return "''".to_string();
    }
    let escaped = s
        .replace('\\', "\\\\")
        .replace('\'', "\\'")
        .replace('\n', "\\n")
        .replace('\r', "\\r")
        .replace('\t', "\\t");
    format!("'{}'", escaped)
}
