//! Runtime value model: the type lattice, equality, coercion, display and
//! the `serde_json` host boundary.
//!
//! Scalars are fully inline; `Str`, `Array` and `Map` sit behind `Arc` so
//! cloning a value on and off the operand stack is cheap and a compiled
//! program's constant pool can be shared across threads.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Number;

use crate::vm::RuntimeError;

/// Host callable invokable from expressions.
pub type NativeFn = Arc<dyn Fn(&[Value]) -> Result<Value, RuntimeError> + Send + Sync>;

#[derive(Clone)]
pub enum Value {
    Null,
    Int(i64),
    Float(f64),
    Str(Arc<str>),
    Bool(bool),
    Array(Arc<Vec<Value>>),
    Map(Arc<BTreeMap<String, Value>>),
    Func(NativeFn),
}

impl Value {
    /// Wrap a host closure as a callable value.
    pub fn func<F>(f: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value, RuntimeError> + Send + Sync + 'static,
    {
        Value::Func(Arc::new(f))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Int(_) => "integer",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::Bool(_) => "boolean",
            Value::Array(_) => "array",
            Value::Map(_) => "map",
            Value::Func(_) => "func",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    #[inline]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    #[inline]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(n) => Some(*n as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    #[inline]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s.as_ref()),
            _ => None,
        }
    }

    #[inline]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

/// Value equality. Numeric comparison promotes the integer side to float;
/// callables are never equal, not even to themselves.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Int(a), Value::Float(b)) => (*a as f64) == *b,
            (Value::Float(a), Value::Int(b)) => *a == (*b as f64),
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => Arc::ptr_eq(a, b) || a == b,
            (Value::Map(a), Value::Map(b)) => Arc::ptr_eq(a, b) || a == b,
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("Null"),
            Value::Int(n) => f.debug_tuple("Int").field(n).finish(),
            Value::Float(v) => f.debug_tuple("Float").field(v).finish(),
            Value::Str(s) => f.debug_tuple("Str").field(s).finish(),
            Value::Bool(b) => f.debug_tuple("Bool").field(b).finish(),
            Value::Array(items) => f.debug_tuple("Array").field(items).finish(),
            Value::Map(map) => f.debug_tuple("Map").field(map).finish(),
            Value::Func(_) => f.write_str("Func(..)"),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Int(n) => write!(f, "{n}"),
            Value::Float(v) => f.write_str(&format_float(*v)),
            Value::Str(s) => write!(f, "\"{s}\""),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Array(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Value::Map(map) => {
                f.write_str("{")?;
                for (i, (key, value)) in map.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{key}: {value}")?;
                }
                f.write_str("}")
            }
            Value::Func(_) => f.write_str("func"),
        }
    }
}

/// Shortest decimal form with no trailing zeros.
pub(crate) fn format_float(f: f64) -> String {
    if f.fract() == 0.0 && f.is_finite() {
        format!("{f:.0}")
    } else {
        f.to_string()
    }
}

/// Pairwise coercion applied before every binary operation: a NULL side takes
/// the zero value of the other side's type, and an INTEGER paired with a
/// FLOAT is promoted.
pub(crate) fn coerce(left: Value, right: Value) -> (Value, Value) {
    match (&left, &right) {
        (Value::Null, r) if !r.is_null() => match zero_value(r) {
            Some(zero) => (zero, right),
            None => (left, right),
        },
        (l, Value::Null) if !l.is_null() => match zero_value(l) {
            Some(zero) => (left, zero),
            None => (left, right),
        },
        (Value::Int(a), Value::Float(_)) => (Value::Float(*a as f64), right),
        (Value::Float(_), Value::Int(b)) => (left, Value::Float(*b as f64)),
        _ => (left, right),
    }
}

/// There is no zero value for NULL or FUNC.
fn zero_value(v: &Value) -> Option<Value> {
    Some(match v {
        Value::Int(_) => Value::Int(0),
        Value::Float(_) => Value::Float(0.0),
        Value::Str(_) => Value::Str(Arc::from("")),
        Value::Bool(_) => Value::Bool(false),
        Value::Array(_) => Value::Array(Arc::new(Vec::new())),
        Value::Map(_) => Value::Map(Arc::new(BTreeMap::new())),
        Value::Null | Value::Func(_) => return None,
    })
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(Arc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(Arc::from(s.as_str()))
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(Arc::new(items))
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(map: BTreeMap<String, Value>) -> Self {
        Value::Map(Arc::new(map))
    }
}

/// Host-boundary conversion failure.
#[derive(Debug, Clone, Serialize, Deserialize, thiserror::Error)]
#[error("{message}")]
pub struct ConvertError {
    pub message: String,
}

impl ConvertError {
    pub(crate) fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl TryFrom<&serde_json::Value> for Value {
    type Error = ConvertError;

    fn try_from(v: &serde_json::Value) -> Result<Self, ConvertError> {
        Ok(match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else if let Some(f) = n.as_f64() {
                    Value::Float(f)
                } else {
                    return Err(ConvertError::new(format!("unsupported number: {n}")));
                }
            }
            serde_json::Value::String(s) => Value::Str(Arc::from(s.as_str())),
            serde_json::Value::Array(items) => {
                let converted = items
                    .iter()
                    .map(Value::try_from)
                    .collect::<Result<Vec<_>, _>>()?;
                Value::Array(Arc::new(converted))
            }
            serde_json::Value::Object(map) => {
                let converted = map
                    .iter()
                    .map(|(k, v)| Ok((k.clone(), Value::try_from(v)?)))
                    .collect::<Result<BTreeMap<_, _>, ConvertError>>()?;
                Value::Map(Arc::new(converted))
            }
        })
    }
}

impl TryFrom<&Value> for serde_json::Value {
    type Error = ConvertError;

    fn try_from(v: &Value) -> Result<Self, ConvertError> {
        Ok(match v {
            Value::Null => serde_json::Value::Null,
            Value::Int(n) => serde_json::Value::Number(Number::from(*n)),
            Value::Float(f) => Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .ok_or_else(|| ConvertError::new(format!("non-finite float: {f}")))?,
            Value::Str(s) => serde_json::Value::String(s.to_string()),
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Array(items) => {
                let converted = items
                    .iter()
                    .map(serde_json::Value::try_from)
                    .collect::<Result<Vec<_>, _>>()?;
                serde_json::Value::Array(converted)
            }
            Value::Map(map) => {
                let converted = map
                    .iter()
                    .map(|(k, v)| Ok((k.clone(), serde_json::Value::try_from(v)?)))
                    .collect::<Result<serde_json::Map<_, _>, ConvertError>>()?;
                serde_json::Value::Object(converted)
            }
            Value::Func(_) => {
                return Err(ConvertError::new("func value cannot be converted"));
            }
        })
    }
}
