//! Runtime values and their JSON encoding.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter, Result as FmtResult};

use itertools::Itertools;
use serde_json::Value as JsonValue;

use crate::error::ExprError;
use crate::extensions::{ExtensionFunction, ExtensionValue};

use super::EntityUid;

/// An immutable, structurally comparable value.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Value {
    Bool(bool),
    Long(i64),
    String(String),
    EntityUid(EntityUid),
    Set(BTreeSet<Value>),
    Record(BTreeMap<String, Value>),
    Extension(ExtensionValue),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::Long(_) => "long",
            Value::String(_) => "string",
            Value::EntityUid(_) => "entity",
            Value::Set(_) => "set",
            Value::Record(_) => "record",
            Value::Extension(ext) => ext.type_name(),
        }
    }

    pub fn as_bool(&self) -> Result<bool, ExprError> {
        match self {
            Value::Bool(b) => Ok(*b),
            other => Err(mismatch("bool", other)),
        }
    }

    pub fn as_long(&self) -> Result<i64, ExprError> {
        match self {
            Value::Long(n) => Ok(*n),
            other => Err(mismatch("long", other)),
        }
    }

    pub fn as_str(&self) -> Result<&str, ExprError> {
        match self {
            Value::String(s) => Ok(s),
            other => Err(mismatch("string", other)),
        }
    }

    pub fn as_entity(&self) -> Result<&EntityUid, ExprError> {
        match self {
            Value::EntityUid(uid) => Ok(uid),
            other => Err(mismatch("entity", other)),
        }
    }

    pub fn as_set(&self) -> Result<&BTreeSet<Value>, ExprError> {
        match self {
            Value::Set(set) => Ok(set),
            other => Err(mismatch("set", other)),
        }
    }

    /// Decode the JSON value encoding used for entity attributes and
    /// request context.
    pub fn from_json(json: &JsonValue) -> Result<Value, String> {
        match json {
            JsonValue::Bool(b) => Ok(Value::Bool(*b)),
            JsonValue::Number(n) => n
                .as_i64()
                .map(Value::Long)
                .ok_or_else(|| format!("`{n}` is not a 64-bit integer")),
            JsonValue::String(s) => Ok(Value::String(s.clone())),
            JsonValue::Array(items) => items
                .iter()
                .map(Value::from_json)
                .collect::<Result<BTreeSet<_>, _>>()
                .map(Value::Set),
            JsonValue::Object(map) => {
                if map.contains_key("__entity") {
                    return EntityUid::from_json(json).map(Value::EntityUid);
                }
                if let Some(extn) = map.get("__extn") {
                    return extension_from_json(extn);
                }
                map.iter()
                    .map(|(k, v)| Value::from_json(v).map(|v| (k.clone(), v)))
                    .collect::<Result<BTreeMap<_, _>, _>>()
                    .map(Value::Record)
            }
            JsonValue::Null => Err("null is not a valid value".to_string()),
        }
    }

    /// Encode as JSON, the inverse of [`Value::from_json`].
    pub fn to_json(&self) -> JsonValue {
        match self {
            Value::Bool(b) => JsonValue::Bool(*b),
            Value::Long(n) => JsonValue::from(*n),
            Value::String(s) => JsonValue::String(s.clone()),
            Value::EntityUid(uid) => serde_json::json!({ "__entity": uid.to_json() }),
            Value::Set(items) => JsonValue::Array(items.iter().map(Value::to_json).collect()),
            Value::Record(map) => JsonValue::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
            Value::Extension(ext) => serde_json::json!({
                "__extn": { "fn": ext.constructor().to_string(), "arg": ext.to_string() }
            }),
        }
    }
}

fn mismatch(expected: &'static str, actual: &Value) -> ExprError {
    ExprError::TypeMismatch {
        expected,
        actual: actual.type_name(),
    }
}

fn extension_from_json(extn: &JsonValue) -> Result<Value, String> {
    let name = extn
        .get("fn")
        .and_then(JsonValue::as_str)
        .ok_or_else(|| format!("extension value is missing `fn`: {extn}"))?;
    let arg = extn
        .get("arg")
        .and_then(JsonValue::as_str)
        .ok_or_else(|| format!("extension value is missing a string `arg`: {extn}"))?;
    let function: ExtensionFunction = name
        .parse()
        .map_err(|_| format!("unknown extension function `{name}`"))?;
    function.construct(arg).map(Value::Extension)
}

impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Value::Bool(b) => write!(f, "{b}"),
            Value::Long(n) => write!(f, "{n}"),
            Value::String(s) => write!(f, "\"{}\"", s.escape_debug()),
            Value::EntityUid(uid) => write!(f, "{uid}"),
            Value::Set(items) => write!(f, "[{}]", items.iter().join(", ")),
            Value::Record(map) => write!(
                f,
                "{{{}}}",
                map.iter()
                    .map(|(k, v)| format!("\"{}\": {v}", k.escape_debug()))
                    .join(", ")
            ),
            Value::Extension(ext) => write!(f, "{}(\"{ext}\")", ext.constructor()),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Long(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<EntityUid> for Value {
    fn from(uid: EntityUid) -> Self {
        Value::EntityUid(uid)
    }
}
