//! JSON boundary conversions.
//!
//! Mappers speak `serde_json::Value` at the transport edge; this module
//! maps those payloads to and from the layer's own `Value`. Live
//! references cannot cross the boundary: serializing a model goes through
//! its attribute converters first (`attrs()`), never through here.

use crate::error::{Error, Result};
use crate::value::Value;

/// Converts a JSON payload into a `Value` tree.
///
/// Objects become `Map`s, arrays become `List`s; integral numbers become
/// `Integer`, the rest `Number`.
pub fn from_json(json: &serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Boolean(*b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Integer(i)
            } else {
                Value::Number(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        serde_json::Value::String(s) => Value::String(s.clone()),
        serde_json::Value::Array(items) => Value::list(items.iter().map(from_json).collect()),
        serde_json::Value::Object(fields) => Value::map_from(
            fields
                .iter()
                .map(|(k, v)| (k.clone(), from_json(v)))
                .collect::<Vec<_>>(),
        ),
    }
}

/// Converts a `Value` tree into a JSON payload.
///
/// `Date`/`DateTime` serialize as their millisecond timestamps; a live
/// reference in the tree is an error.
pub fn to_json(value: &Value) -> Result<serde_json::Value> {
    match value {
        Value::Null => Ok(serde_json::Value::Null),
        Value::Boolean(b) => Ok(serde_json::Value::Bool(*b)),
        Value::Integer(n) => Ok(serde_json::json!(*n)),
        Value::Number(n) => Ok(serde_json::json!(*n)),
        Value::String(s) => Ok(serde_json::Value::String(s.clone())),
        Value::Date(ms) | Value::DateTime(ms) => Ok(serde_json::json!(*ms)),
        Value::List(items) => {
            let out: Result<Vec<_>> = items.borrow().iter().map(to_json).collect();
            Ok(serde_json::Value::Array(out?))
        }
        Value::Map(fields) => {
            let mut out = serde_json::Map::new();
            for (k, v) in fields.borrow().iter() {
                out.insert(k.clone(), to_json(v)?);
            }
            Ok(serde_json::Value::Object(out))
        }
        Value::Ref(r) => Err(Error::invalid_operation(format!(
            "cannot serialize live reference {r:?} to JSON"
        ))),
    }
}
