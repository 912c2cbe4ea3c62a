//! Condition evaluation against a [`WorkflowContext`].
//!
//! Operands follow loose scripting-language coercions because workflow
//! definitions are authored as JSON by producers that expect them:
//!
//! - `equals` / `not_equals`: strict equality, numbers compared by value;
//!   a missing field equals nothing
//! - `contains`: both sides rendered to strings, case-insensitive substring
//! - `greater_than` / `less_than`: both sides coerced to numbers; anything
//!   that does not coerce (a missing field, `"abc"`, an object) compares false

use serde_json::Value;

use super::context::WorkflowContext;
use crate::models::{ConditionOperator, WorkflowCondition};

/// All conditions hold; an empty list always holds
pub fn all_hold(conditions: &[WorkflowCondition], context: &WorkflowContext) -> bool {
    conditions.iter().all(|condition| evaluate(condition, context))
}

pub fn evaluate(condition: &WorkflowCondition, context: &WorkflowContext) -> bool {
    let actual = context.lookup(&condition.field);
    let expected = &condition.value;

    match condition.operator {
        ConditionOperator::Equals => strict_equals(actual, expected),
        ConditionOperator::NotEquals => !strict_equals(actual, expected),
        ConditionOperator::Contains => to_display_string(actual)
            .to_lowercase()
            .contains(&to_display_string(Some(expected)).to_lowercase()),
        ConditionOperator::GreaterThan => to_number(actual) > to_number(Some(expected)),
        ConditionOperator::LessThan => to_number(actual) < to_number(Some(expected)),
    }
}

fn strict_equals(actual: Option<&Value>, expected: &Value) -> bool {
    match (actual, expected) {
        (None, _) => false,
        (Some(Value::Number(a)), Value::Number(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(a), Some(b)) => a == b,
            _ => a == b,
        },
        (Some(a), b) => a == b,
    }
}

fn number_to_string(number: f64) -> String {
    if number.is_nan() {
        "NaN".to_string()
    } else if number.is_infinite() {
        let sign = if number > 0.0 { "" } else { "-" };
        format!("{sign}Infinity")
    } else if number == 0.0 {
        "0".to_string()
    } else if number.fract() == 0.0 && number.abs() < 1e21 {
        format!("{number:.0}")
    } else {
        number.to_string()
    }
}

/// String rendering of a value; a missing field renders as `"undefined"`
pub fn to_display_string(value: Option<&Value>) -> String {
    match value {
        None => "undefined".to_string(),
        Some(Value::Null) => "null".to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        Some(Value::Number(n)) => match (n.as_i64(), n.as_u64()) {
            (Some(i), _) => i.to_string(),
            (None, Some(u)) => u.to_string(),
            _ => number_to_string(n.as_f64().unwrap_or(f64::NAN)),
        },
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| match item {
                Value::Null => String::new(),
                other => to_display_string(Some(other)),
            })
            .collect::<Vec<_>>()
            .join(","),
        Some(Value::Object(_)) => "[object Object]".to_string(),
    }
}

fn parse_number(text: &str) -> f64 {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return 0.0;
    }
    match trimmed {
        "Infinity" | "+Infinity" => return f64::INFINITY,
        "-Infinity" => return f64::NEG_INFINITY,
        _ => {}
    }
    if let Some(hex) = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        return u64::from_str_radix(hex, 16)
            .map(|n| n as f64)
            .unwrap_or(f64::NAN);
    }
    let lowered = trimmed.to_ascii_lowercase();
    if lowered.contains("inf") || lowered.contains("nan") {
        return f64::NAN;
    }
    trimmed.parse::<f64>().unwrap_or(f64::NAN)
}

/// Numeric coercion; `NaN` when the value has no numeric reading
pub fn to_number(value: Option<&Value>) -> f64 {
    match value {
        None => f64::NAN,
        Some(Value::Null) => 0.0,
        Some(Value::Bool(b)) => f64::from(u8::from(*b)),
        Some(Value::Number(n)) => n.as_f64().unwrap_or(f64::NAN),
        Some(Value::String(s)) => parse_number(s),
        Some(array @ Value::Array(_)) => parse_number(&to_display_string(Some(array))),
        Some(Value::Object(_)) => f64::NAN,
    }
}
