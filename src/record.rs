//! JSON objects as filter targets.
//!
//! Values map onto [`Value`] by their JSON type. A [`FieldTypes`] table can
//! override that per field, e.g. to read `"1h30m"` as a duration or an epoch
//! number as a time.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};
use time::{Duration, OffsetDateTime};

use crate::dsl::{
    FieldNotFound, LookupError, Target, Value, parse_duration, parse_number, parse_time,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Number,
    Bool,
    Duration,
    Time,
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::String => write!(f, "string"),
            FieldType::Number => write!(f, "number"),
            FieldType::Bool => write!(f, "bool"),
            FieldType::Duration => write!(f, "duration"),
            FieldType::Time => write!(f, "time"),
        }
    }
}

/// Per-field type overrides, keyed by field name.
pub type FieldTypes = HashMap<String, FieldType>;

#[derive(Debug, thiserror::Error)]
#[error("field {field:?}: cannot read {found} as {expected}")]
pub struct CoercionError {
    pub field: String,
    pub expected: FieldType,
    pub found: String,
}

/// A borrowed JSON object plus its field type overrides.
#[derive(Debug, Clone, Copy)]
pub struct JsonRecord<'a> {
    object: &'a Map<String, Json>,
    types: &'a FieldTypes,
}

impl<'a> JsonRecord<'a> {
    pub fn new(object: &'a Map<String, Json>, types: &'a FieldTypes) -> Self {
        Self { object, types }
    }
}

impl Target for JsonRecord<'_> {
    fn get_field(&self, name: &str) -> Result<Value, LookupError> {
        let raw = self
            .object
            .get(name)
            .ok_or_else(|| FieldNotFound(name.to_string()))?;
        match self.types.get(name) {
            Some(ty) => Ok(coerce(name, raw, *ty)?),
            None => Ok(from_json(raw)),
        }
    }
}

/// Natural mapping of a JSON value.
///
/// Integers keep their sign class, other numbers become floats. `null`,
/// arrays and objects are kept as their JSON text.
pub fn from_json(raw: &Json) -> Value {
    match raw {
        Json::String(s) => Value::Str(s.clone()),
        Json::Bool(b) => Value::Bool(*b),
        Json::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Int(i)
            } else if let Some(u) = n.as_u64() {
                Value::Uint(u)
            } else {
                Value::Float(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        other => Value::Other(other.to_string()),
    }
}

/// Read `raw` as `ty`.
pub fn coerce(field: &str, raw: &Json, ty: FieldType) -> Result<Value, CoercionError> {
    let value = match (ty, raw) {
        (FieldType::String, Json::String(s)) => Some(Value::Str(s.clone())),
        (FieldType::String, other) => Some(Value::Str(other.to_string())),

        (FieldType::Number, Json::Number(_)) => Some(from_json(raw)),
        (FieldType::Number, Json::String(s)) => parse_number(s).map(Value::Float),

        (FieldType::Bool, Json::Bool(b)) => Some(Value::Bool(*b)),
        (FieldType::Bool, Json::String(s)) => s.parse::<bool>().ok().map(Value::Bool),

        (FieldType::Duration, Json::String(s)) => parse_duration(s).map(Value::Duration),
        // Plain numbers are seconds.
        (FieldType::Duration, Json::Number(n)) => n
            .as_f64()
            .filter(|secs| secs.is_finite() && secs.abs() < i64::MAX as f64 / 1e9)
            .map(|secs| Value::Duration(Duration::seconds_f64(secs))),

        (FieldType::Time, Json::String(s)) => parse_time(s).map(Value::Time),
        // Plain integers are Unix timestamps.
        (FieldType::Time, Json::Number(n)) => n
            .as_i64()
            .and_then(|secs| OffsetDateTime::from_unix_timestamp(secs).ok())
            .map(Value::Time),

        _ => None,
    };

    value.ok_or_else(|| CoercionError {
        field: field.to_string(),
        expected: ty,
        found: raw.to_string(),
    })
}
