//! Runtime value types
//!
//! A `Value` is a tagged runtime datum owned by whichever frame slot holds
//! it. Arrays and records are `Arc`-shared so multiple frames can hold the
//! same composite without copying.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::{json, Value as JsonValue};

use crate::errors::EngineError;

/// Runtime value type
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Array(Arc<Vec<Value>>),
    Record(Arc<HashMap<String, Value>>),
}

impl Value {
    /// Check if value is truthy (for conditionals)
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            Value::Null => false,
            Value::Int(n) => *n != 0,
            Value::Float(n) => *n != 0.0,
            Value::Str(s) => !s.is_empty(),
            _ => true,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::Array(_) => "array",
            Value::Record(_) => "record",
        }
    }

    /// Build a shared array of strings (used to pack main() arguments).
    pub fn string_array<I, S>(items: I) -> Value
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Value::Array(Arc::new(
            items.into_iter().map(|s| Value::Str(s.into())).collect(),
        ))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match value_to_json(self) {
            Ok(j) => write!(f, "{}", j),
            Err(_) => write!(f, "<value>"),
        }
    }
}

/// Convert a runtime value to JSON (for CLI output and debug events)
pub fn value_to_json(value: &Value) -> Result<JsonValue, EngineError> {
    Ok(match value {
        Value::Null => JsonValue::Null,
        Value::Bool(b) => json!(b),
        Value::Int(n) => json!(n),
        Value::Float(n) => json!(n),
        Value::Str(s) => json!(s),
        Value::Array(items) => {
            let out: Result<Vec<JsonValue>, EngineError> = items.iter().map(value_to_json).collect();
            JsonValue::Array(out?)
        }
        Value::Record(fields) => {
            let mut out = serde_json::Map::new();
            for (k, v) in fields.iter() {
                out.insert(k.clone(), value_to_json(v)?);
            }
            JsonValue::Object(out)
        }
    })
}

/// Convert JSON into a runtime value (for inbound request payloads)
pub fn json_to_value(json: &JsonValue) -> Result<Value, EngineError> {
    Ok(match json {
        JsonValue::Null => Value::Null,
        JsonValue::Bool(b) => Value::Bool(*b),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Int(i)
            } else if let Some(f) = n.as_f64() {
                Value::Float(f)
            } else {
                return Err(EngineError::execution(format!(
                    "unrepresentable number: {}",
                    n
                )));
            }
        }
        JsonValue::String(s) => Value::Str(s.clone()),
        JsonValue::Array(items) => {
            let out: Result<Vec<Value>, EngineError> = items.iter().map(json_to_value).collect();
            Value::Array(Arc::new(out?))
        }
        JsonValue::Object(fields) => {
            let mut out = HashMap::new();
            for (k, v) in fields {
                out.insert(k.clone(), json_to_value(v)?);
            }
            Value::Record(Arc::new(out))
        }
    })
}
