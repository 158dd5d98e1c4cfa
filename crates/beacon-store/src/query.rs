//! Predicate evaluation.
//!
//! A predicate maps field names to either a literal (deep equality) or an
//! operator object such as `{"$gt": 25, "$lte": 40}`. All fields and all
//! operators must hold. A document missing a predicate field never matches.
//!
//! Equality is structural with numbers compared by value, so `30`, `30.0`
//! and `3e1` are the same value, as are `0.0` and `-0.0`.

use crate::document::Document;
use crate::error::{Result, StoreError};
use serde_json::{Map, Number, Value};
use std::cmp::Ordering;

/// Parsed query predicate.
pub type Predicate = Map<String, Value>;

/// Parse a predicate payload. An empty payload matches every document.
///
/// # Errors
///
/// Returns [`StoreError::InvalidQuery`] if the payload is not a JSON object.
pub fn parse_predicate(payload: &str) -> Result<Predicate> {
    if payload.trim().is_empty() {
        return Ok(Predicate::new());
    }
    match serde_json::from_str(payload) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(StoreError::InvalidQuery("expected a JSON object".to_string())),
        Err(e) => Err(StoreError::InvalidQuery(e.to_string())),
    }
}

/// Whether a condition is an operator object rather than a literal.
#[must_use]
pub fn is_operator(condition: &Value) -> bool {
    matches!(condition, Value::Object(map) if map.keys().any(|k| k.starts_with('$')))
}

/// Deep equality with numbers compared as `f64`.
#[must_use]
pub fn json_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(a, b)| json_eq(a, b))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x.iter().all(|(k, v)| y.get(k).is_some_and(|w| json_eq(v, w)))
        }
        _ => a == b,
    }
}

/// Rewrite every number as a non-negative-zero float, so two values are
/// [`json_eq`] exactly when their normalized forms serialize identically.
#[must_use]
pub fn normalize(value: &Value) -> Value {
    match value {
        Value::Number(n) => n
            .as_f64()
            .and_then(|f| Number::from_f64(f + 0.0))
            .map_or_else(|| value.clone(), Value::Number),
        Value::Array(items) => Value::Array(items.iter().map(normalize).collect()),
        Value::Object(map) => {
            Value::Object(map.iter().map(|(k, v)| (k.clone(), normalize(v))).collect())
        }
        other => other.clone(),
    }
}

fn contains(set: &Value, value: &Value) -> Option<bool> {
    Some(set.as_array()?.iter().any(|item| json_eq(item, value)))
}

/// Evaluate `predicate` against `doc`.
#[must_use]
pub fn matches(doc: &Document, predicate: &Predicate) -> bool {
    predicate.iter().all(|(field, condition)| {
        let Some(value) = doc.get(field) else {
            return false;
        };
        match condition {
            Value::Object(ops) if is_operator(condition) => {
                ops.iter().all(|(op, operand)| apply(value, op, operand))
            }
            literal => json_eq(value, literal),
        }
    })
}

fn apply(value: &Value, op: &str, operand: &Value) -> bool {
    match op {
        "$gt" => compare(value, operand) == Some(Ordering::Greater),
        "$gte" => matches!(compare(value, operand), Some(Ordering::Greater | Ordering::Equal)),
        "$lt" => compare(value, operand) == Some(Ordering::Less),
        "$lte" => matches!(compare(value, operand), Some(Ordering::Less | Ordering::Equal)),
        "$ne" => !json_eq(value, operand),
        "$in" => contains(operand, value).unwrap_or(false),
        "$nin" => !contains(operand, value).unwrap_or(false),
        _ => false,
    }
}

/// Numeric comparison; `None` when either side is not a number.
fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    a.as_f64()?.partial_cmp(&b.as_f64()?)
}
