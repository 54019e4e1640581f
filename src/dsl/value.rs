//! Field values and the lookup capability filters are evaluated against.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::hash::BuildHasher;

use time::format_description::well_known::Rfc3339;
use time::{Duration, OffsetDateTime};

use super::error::BoxError;

/// Failure reported by a [`Target`] lookup.
pub type LookupError = BoxError;

/// A dynamically typed field value.
///
/// The variant picks the comparison family: integers and floats compare
/// numerically, durations and times by magnitude, everything else by its
/// string form.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Str(String),
    Int(i64),
    Uint(u64),
    Float(f64),
    Bool(bool),
    Duration(Duration),
    Time(OffsetDateTime),
    /// Any other value, already rendered as text.
    Other(String),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) | Value::Other(s) => f.write_str(s),
            Value::Int(v) => write!(f, "{v}"),
            Value::Uint(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Duration(v) => write!(f, "{v}"),
            Value::Time(v) => match v.format(&Rfc3339) {
                Ok(s) => f.write_str(&s),
                Err(_) => write!(f, "{v}"),
            },
        }
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(f64::from(v))
    }
}

impl From<Duration> for Value {
    fn from(v: Duration) -> Self {
        Value::Duration(v)
    }
}

impl From<std::time::Duration> for Value {
    fn from(v: std::time::Duration) -> Self {
        Value::Duration(Duration::try_from(v).unwrap_or(Duration::MAX))
    }
}

impl From<OffsetDateTime> for Value {
    fn from(v: OffsetDateTime) -> Self {
        Value::Time(v)
    }
}

macro_rules! impl_from_int {
    ($variant:ident: $($ty:ty),*) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant(v.into())
                }
            }
        )*
    };
}

impl_from_int!(Int: i8, i16, i32, i64);
impl_from_int!(Uint: u8, u16, u32, u64);

impl From<isize> for Value {
    fn from(v: isize) -> Self {
        Value::Int(v as i64)
    }
}

impl From<usize> for Value {
    fn from(v: usize) -> Self {
        Value::Uint(v as u64)
    }
}

/// Something a filter can be evaluated against.
///
/// Lookups may fail, e.g. for unknown fields; the failure aborts evaluation
/// and its message is carried in the resulting eval error.
pub trait Target {
    fn get_field(&self, name: &str) -> Result<Value, LookupError>;
}

impl<T: Target + ?Sized> Target for &T {
    fn get_field(&self, name: &str) -> Result<Value, LookupError> {
        (**self).get_field(name)
    }
}

/// Lookup failure for a field the target does not have.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("field not found: {0:?}")]
pub struct FieldNotFound(pub String);

impl<S: BuildHasher> Target for HashMap<String, Value, S> {
    fn get_field(&self, name: &str) -> Result<Value, LookupError> {
        self.get(name)
            .cloned()
            .ok_or_else(|| FieldNotFound(name.to_string()).into())
    }
}

impl Target for BTreeMap<String, Value> {
    fn get_field(&self, name: &str) -> Result<Value, LookupError> {
        self.get(name)
            .cloned()
            .ok_or_else(|| FieldNotFound(name.to_string()).into())
    }
}

/// Adapts a closure into a [`Target`].
pub struct FnTarget<F>(pub F);

impl<F> Target for FnTarget<F>
where
    F: Fn(&str) -> Result<Value, LookupError>,
{
    fn get_field(&self, name: &str) -> Result<Value, LookupError> {
        (self.0)(name)
    }
}
