//! Lenient deserializers for loosely typed remote documents.
//!
//! Remote documents are edited from several clients and fields drift in type
//! (numbers stored as strings, timestamps as objects). These helpers never
//! fail: anything unusable becomes the field's default, which keeps every
//! projection total.

use chrono::DateTime;
use serde::{de::DeserializeOwned, Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::store::Fields;

/// Re-serialize a value through JSON to convert between compatible types.
pub fn reserialize<T: DeserializeOwned>(value: impl Serialize) -> serde_json::Result<T> {
  serde_json::from_value(serde_json::to_value(value)?)
}

/// Project a document body onto `T`, falling back to `T::default()`.
pub fn project<T: DeserializeOwned + Default>(fields: &Fields) -> T {
  reserialize(fields).unwrap_or_default()
}

/// Turn a JSON object literal into document fields.
pub fn fields_of(value: Value) -> Fields {
  match value {
    Value::Object(map) => map,
    _ => Fields::new(),
  }
}

pub fn string<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
  Ok(match Value::deserialize(d)? {
    Value::String(s) => s,
    Value::Number(n) => n.to_string(),
    Value::Bool(b) => b.to_string(),
    _ => String::new(),
  })
}

pub fn integer<'de, D: Deserializer<'de>>(d: D) -> Result<i64, D::Error> {
  Ok(match Value::deserialize(d)? {
    Value::Number(n) => n
      .as_i64()
      .or_else(|| n.as_f64().map(|f| f as i64))
      .unwrap_or_default(),
    Value::String(s) => s.trim().parse().unwrap_or_default(),
    _ => 0,
  })
}

pub fn float<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
  Ok(match Value::deserialize(d)? {
    Value::Number(n) => n.as_f64().unwrap_or_default(),
    Value::String(s) => s.trim().parse().unwrap_or_default(),
    _ => 0.0,
  })
}

pub fn strings<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<String>, D::Error> {
  Ok(match Value::deserialize(d)? {
    Value::Array(items) => items
      .into_iter()
      .filter_map(|v| match v {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
      })
      .collect(),
    // Single values stored where a list is expected
    Value::String(s) if !s.is_empty() => vec![s],
    _ => Vec::new(),
  })
}

/// Epoch milliseconds from a number, an RFC 3339 string, or a
/// `{seconds, nanoseconds}` timestamp object.
pub fn timestamp<'de, D: Deserializer<'de>>(d: D) -> Result<i64, D::Error> {
  Ok(timestamp_millis(&Value::deserialize(d)?).unwrap_or_default())
}

fn timestamp_millis(value: &Value) -> Option<i64> {
  match value {
    Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
    Value::String(s) => DateTime::parse_from_rfc3339(s)
      .ok()
      .map(|dt| dt.timestamp_millis()),
    Value::Object(map) => {
      let seconds = map
        .get("seconds")
        .or_else(|| map.get("_seconds"))
        .and_then(Value::as_i64)?;
      let nanos = map
        .get("nanoseconds")
        .or_else(|| map.get("_nanoseconds"))
        .and_then(Value::as_i64)
        .unwrap_or_default();
      Some(seconds * 1000 + nanos / 1_000_000)
    }
    _ => None,
  }
}
