//! Evaluator for parsed expressions.

use super::parser::{BinaryOp, Expr, UnaryOp};
use crate::datum::DEFAULT_OUTPUT;
use crate::envelope::StepInput;
use serde_json::{json, Map, Value as JsonValue};

/// The names visible to an expression.
///
/// Built fresh from one input envelope per evaluation; nothing is shared or
/// mutated across events.
#[derive(Debug, Clone)]
pub struct Scope {
    /// Producer-id → payload map exposed as `ctx`.
    pub ctx: JsonValue,
    /// Global variables exposed as `$vars`.
    pub vars: JsonValue,
    /// Global secrets exposed as `$secrets`.
    pub secrets: JsonValue,
}

impl Scope {
    /// An empty scope with no context.
    pub fn empty() -> Self {
        Self {
            ctx: json!({}),
            vars: json!({}),
            secrets: json!({}),
        }
    }

    /// Build the scope for one input envelope.
    ///
    /// When a producer emitted exactly one output under the `default` label,
    /// its payload is exposed directly under the producer id; otherwise the
    /// full label→payload map is exposed. `ctx._execution.id` carries the
    /// event id when it is non-empty.
    pub fn from_input(input: &StepInput) -> Self {
        let mut ctx = Map::new();

        for (stage_id, outputs) in &input.data {
            if outputs.len() == 1 {
                if let Some(datum) = outputs.get(DEFAULT_OUTPUT) {
                    ctx.insert(stage_id.clone(), datum.value().clone());
                    continue;
                }
            }
            let labeled: Map<String, JsonValue> = outputs
                .iter()
                .map(|(label, datum)| (label.clone(), datum.value().clone()))
                .collect();
            ctx.insert(stage_id.clone(), JsonValue::Object(labeled));
        }

        if !input.event_id.is_empty() {
            ctx.insert(
                "_execution".to_string(),
                json!({"id": input.event_id.as_str()}),
            );
        }

        let vars: Map<String, JsonValue> = input
            .variables
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let secrets: Map<String, JsonValue> = input
            .secrets
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        Self {
            ctx: JsonValue::Object(ctx),
            vars: JsonValue::Object(vars),
            secrets: JsonValue::Object(secrets),
        }
    }
}

/// Evaluate an expression to a value.
pub fn eval(expr: &Expr, scope: &Scope) -> Result<JsonValue, String> {
    match expr {
        Expr::Number(n) => Ok(number_value(*n)),
        Expr::Str(s) => Ok(JsonValue::String(s.clone())),
        Expr::Bool(b) => Ok(JsonValue::Bool(*b)),
        Expr::Null => Ok(JsonValue::Null),

        Expr::Ident(name) => match name.as_str() {
            "ctx" => Ok(scope.ctx.clone()),
            "$vars" => Ok(scope.vars.clone()),
            "$secrets" => Ok(scope.secrets.clone()),
            other => Err(format!("'{}' is not defined", other)),
        },

        Expr::Array(items) => {
            let mut values = Vec::with_capacity(items.len());
            for item in items {
                values.push(eval(item, scope)?);
            }
            Ok(JsonValue::Array(values))
        }

        Expr::Object(fields) => {
            let mut map = Map::with_capacity(fields.len());
            for (key, value) in fields {
                map.insert(key.clone(), eval(value, scope)?);
            }
            Ok(JsonValue::Object(map))
        }

        Expr::Member(object, property) => {
            let value = eval(object, scope)?;
            member(&value, property)
        }

        Expr::Index(object, index) => {
            let value = eval(object, scope)?;
            let key = eval(index, scope)?;
            indexed(&value, &key)
        }

        Expr::Call {
            object,
            method,
            args,
        } => {
            let receiver = eval(object, scope)?;
            let mut evaluated = Vec::with_capacity(args.len());
            for arg in args {
                evaluated.push(eval(arg, scope)?);
            }
            call_method(&receiver, method, &evaluated)
        }

        Expr::Unary(op, operand) => {
            let value = eval(operand, scope)?;
            match op {
                UnaryOp::Not => Ok(JsonValue::Bool(!is_truthy(&value))),
                UnaryOp::Neg => Ok(number_value(-to_number(&value)?)),
            }
        }

        Expr::Binary(op, lhs, rhs) => eval_binary(*op, lhs, rhs, scope),

        Expr::Ternary(cond, then_branch, else_branch) => {
            if is_truthy(&eval(cond, scope)?) {
                eval(then_branch, scope)
            } else {
                eval(else_branch, scope)
            }
        }
    }
}

fn eval_binary(op: BinaryOp, lhs: &Expr, rhs: &Expr, scope: &Scope) -> Result<JsonValue, String> {
    // Logical operators short-circuit and yield the deciding operand.
    match op {
        BinaryOp::And => {
            let left = eval(lhs, scope)?;
            if !is_truthy(&left) {
                return Ok(left);
            }
            return eval(rhs, scope);
        }
        BinaryOp::Or => {
            let left = eval(lhs, scope)?;
            if is_truthy(&left) {
                return Ok(left);
            }
            return eval(rhs, scope);
        }
        _ => {}
    }

    let left = eval(lhs, scope)?;
    let right = eval(rhs, scope)?;

    match op {
        BinaryOp::Add => {
            if left.is_string() || right.is_string() {
                Ok(JsonValue::String(format!(
                    "{}{}",
                    to_display_string(&left),
                    to_display_string(&right)
                )))
            } else {
                Ok(number_value(to_number(&left)? + to_number(&right)?))
            }
        }
        BinaryOp::Sub => Ok(number_value(to_number(&left)? - to_number(&right)?)),
        BinaryOp::Mul => Ok(number_value(to_number(&left)? * to_number(&right)?)),
        BinaryOp::Div => {
            let divisor = to_number(&right)?;
            if divisor == 0.0 {
                return Err("division by zero".to_string());
            }
            Ok(number_value(to_number(&left)? / divisor))
        }
        BinaryOp::Rem => {
            let divisor = to_number(&right)?;
            if divisor == 0.0 {
                return Err("division by zero".to_string());
            }
            Ok(number_value(to_number(&left)? % divisor))
        }
        BinaryOp::Eq => Ok(JsonValue::Bool(loose_eq(&left, &right))),
        BinaryOp::Ne => Ok(JsonValue::Bool(!loose_eq(&left, &right))),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ordering = compare(&left, &right)?;
            Ok(JsonValue::Bool(match op {
                BinaryOp::Lt => ordering == std::cmp::Ordering::Less,
                BinaryOp::Le => ordering != std::cmp::Ordering::Greater,
                BinaryOp::Gt => ordering == std::cmp::Ordering::Greater,
                BinaryOp::Ge => ordering != std::cmp::Ordering::Less,
                _ => unreachable!(),
            }))
        }
        BinaryOp::And | BinaryOp::Or => unreachable!("handled above"),
    }
}

fn member(value: &JsonValue, property: &str) -> Result<JsonValue, String> {
    match value {
        JsonValue::Object(map) => Ok(map.get(property).cloned().unwrap_or(JsonValue::Null)),
        JsonValue::Array(items) => {
            if property == "length" {
                Ok(number_value(items.len() as f64))
            } else {
                Ok(JsonValue::Null)
            }
        }
        JsonValue::String(s) => {
            if property == "length" {
                Ok(number_value(s.chars().count() as f64))
            } else {
                Ok(JsonValue::Null)
            }
        }
        JsonValue::Null => Err(format!("cannot read property '{}' of null", property)),
        _ => Ok(JsonValue::Null),
    }
}

fn indexed(value: &JsonValue, key: &JsonValue) -> Result<JsonValue, String> {
    match (value, key) {
        (JsonValue::Array(items), JsonValue::Number(n)) => {
            let idx = n.as_f64().unwrap_or(-1.0);
            if idx < 0.0 {
                return Ok(JsonValue::Null);
            }
            Ok(items.get(idx as usize).cloned().unwrap_or(JsonValue::Null))
        }
        (JsonValue::Object(map), JsonValue::String(s)) => {
            Ok(map.get(s).cloned().unwrap_or(JsonValue::Null))
        }
        (JsonValue::String(s), JsonValue::Number(n)) => {
            let idx = n.as_f64().unwrap_or(-1.0);
            if idx < 0.0 {
                return Ok(JsonValue::Null);
            }
            Ok(s.chars()
                .nth(idx as usize)
                .map(|c| JsonValue::String(c.to_string()))
                .unwrap_or(JsonValue::Null))
        }
        (JsonValue::Null, _) => Err("cannot index null".to_string()),
        _ => Ok(JsonValue::Null),
    }
}

fn call_method(receiver: &JsonValue, method: &str, args: &[JsonValue]) -> Result<JsonValue, String> {
    let str_arg = |i: usize| -> Result<String, String> {
        args.get(i)
            .map(to_display_string)
            .ok_or_else(|| format!("method '{}' expects an argument", method))
    };

    match receiver {
        JsonValue::String(s) => match method {
            "toUpperCase" => Ok(JsonValue::String(s.to_uppercase())),
            "toLowerCase" => Ok(JsonValue::String(s.to_lowercase())),
            "trim" => Ok(JsonValue::String(s.trim().to_string())),
            "toString" => Ok(JsonValue::String(s.clone())),
            "includes" => Ok(JsonValue::Bool(s.contains(&str_arg(0)?))),
            "startsWith" => Ok(JsonValue::Bool(s.starts_with(&str_arg(0)?))),
            "endsWith" => Ok(JsonValue::Bool(s.ends_with(&str_arg(0)?))),
            other => Err(format!("unknown string method '{}'", other)),
        },
        JsonValue::Array(items) => match method {
            "includes" => {
                let needle = args
                    .first()
                    .ok_or_else(|| "method 'includes' expects an argument".to_string())?;
                Ok(JsonValue::Bool(items.iter().any(|v| loose_eq(v, needle))))
            }
            "join" => {
                let separator = args.first().map(to_display_string).unwrap_or_else(|| ",".to_string());
                let joined: Vec<String> = items.iter().map(to_display_string).collect();
                Ok(JsonValue::String(joined.join(&separator)))
            }
            "toString" => Ok(JsonValue::String(to_display_string(receiver))),
            other => Err(format!("unknown array method '{}'", other)),
        },
        JsonValue::Number(_) | JsonValue::Bool(_) => match method {
            "toString" => Ok(JsonValue::String(to_display_string(receiver))),
            other => Err(format!("unknown method '{}'", other)),
        },
        JsonValue::Null => Err(format!("cannot call '{}' on null", method)),
        JsonValue::Object(_) => Err(format!("unknown object method '{}'", method)),
    }
}

/// JS truthiness: null, false, 0, NaN, and "" are falsy.
pub fn is_truthy(value: &JsonValue) -> bool {
    match value {
        JsonValue::Null => false,
        JsonValue::Bool(b) => *b,
        JsonValue::Number(n) => n.as_f64().map(|f| f != 0.0 && !f.is_nan()).unwrap_or(false),
        JsonValue::String(s) => !s.is_empty(),
        JsonValue::Array(_) | JsonValue::Object(_) => true,
    }
}

fn to_number(value: &JsonValue) -> Result<f64, String> {
    match value {
        JsonValue::Number(n) => n
            .as_f64()
            .ok_or_else(|| "number out of range".to_string()),
        JsonValue::Bool(true) => Ok(1.0),
        JsonValue::Bool(false) => Ok(0.0),
        JsonValue::Null => Ok(0.0),
        JsonValue::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return Ok(0.0);
            }
            trimmed
                .parse()
                .map_err(|_| format!("cannot convert '{}' to a number", s))
        }
        other => Err(format!(
            "cannot convert {} to a number",
            json_type_name(other)
        )),
    }
}

/// Render a value the way JS string coercion does.
pub(crate) fn to_display_string(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        JsonValue::Number(n) => format_number(n.as_f64().unwrap_or(f64::NAN)),
        JsonValue::Bool(b) => b.to_string(),
        JsonValue::Null => "null".to_string(),
        JsonValue::Array(items) => items
            .iter()
            .map(to_display_string)
            .collect::<Vec<_>>()
            .join(","),
        JsonValue::Object(_) => "[object Object]".to_string(),
    }
}

fn format_number(f: f64) -> String {
    if f.fract() == 0.0 && f.abs() < 9e15 {
        format!("{}", f as i64)
    } else {
        format!("{}", f)
    }
}

/// Integer-preserving number construction: whole results stay integers.
fn number_value(f: f64) -> JsonValue {
    if f.fract() == 0.0 && f.abs() < 9e15 {
        JsonValue::Number((f as i64).into())
    } else {
        serde_json::Number::from_f64(f)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null)
    }
}

fn loose_eq(a: &JsonValue, b: &JsonValue) -> bool {
    match (a, b) {
        (JsonValue::Number(x), JsonValue::Number(y)) => {
            x.as_f64().unwrap_or(f64::NAN) == y.as_f64().unwrap_or(f64::NAN)
        }
        (JsonValue::String(x), JsonValue::String(y)) => x == y,
        (JsonValue::Bool(x), JsonValue::Bool(y)) => x == y,
        (JsonValue::Null, JsonValue::Null) => true,
        (JsonValue::Array(x), JsonValue::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(l, r)| loose_eq(l, r))
        }
        (JsonValue::Object(x), JsonValue::Object(y)) => {
            x.len() == y.len()
                && x.iter()
                    .all(|(k, v)| y.get(k).map(|w| loose_eq(v, w)).unwrap_or(false))
        }
        // Cross-type numeric coercion (number vs numeric string, bool).
        (JsonValue::Number(_), JsonValue::String(_))
        | (JsonValue::String(_), JsonValue::Number(_))
        | (JsonValue::Bool(_), _)
        | (_, JsonValue::Bool(_)) => match (to_number(a), to_number(b)) {
            (Ok(x), Ok(y)) => x == y,
            _ => false,
        },
        _ => false,
    }
}

fn compare(a: &JsonValue, b: &JsonValue) -> Result<std::cmp::Ordering, String> {
    if let (JsonValue::String(x), JsonValue::String(y)) = (a, b) {
        return Ok(x.cmp(y));
    }
    let x = to_number(a)?;
    let y = to_number(b)?;
    x.partial_cmp(&y)
        .ok_or_else(|| "values are not comparable".to_string())
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
