//! Authorization requests and their context record.

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter, Result as FmtResult};

use serde::Deserialize;
use serde_json::Value as JsonValue;

use crate::error::EvalError;

use super::{EntityUid, Value};

/// Typed wrapper for request context attributes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext(BTreeMap<String, Value>);

impl RequestContext {
    /// Create an empty request context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one context attribute and return the updated context.
    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Insert one context attribute.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Returns true when there are no context attributes.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of context attributes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Iterate over context attributes.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// The context as a record value, which is what `context` evaluates to.
    pub fn to_value(&self) -> Value {
        Value::Record(self.0.clone())
    }

    /// Decode a context from a JSON object, or from a string holding one.
    pub fn from_json(json: &JsonValue) -> Result<Self, String> {
        match json {
            JsonValue::Null => Ok(Self::new()),
            JsonValue::String(text) if text.trim().is_empty() => Ok(Self::new()),
            JsonValue::String(text) => {
                let inner: JsonValue = serde_json::from_str(text)
                    .map_err(|e| format!("context is not valid JSON: {e}"))?;
                Self::from_json(&inner)
            }
            JsonValue::Object(_) => match Value::from_json(json)? {
                Value::Record(map) => Ok(Self(map)),
                other => Err(format!("context must be a record, got {}", other.type_name())),
            },
            other => Err(format!("context must be a JSON object, got {other}")),
        }
    }
}

impl From<BTreeMap<String, Value>> for RequestContext {
    fn from(value: BTreeMap<String, Value>) -> Self {
        Self(value)
    }
}

/// "May `principal` perform `action` on `resource`, given `context`?"
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub principal: EntityUid,
    pub action: EntityUid,
    pub resource: EntityUid,
    pub context: RequestContext,
}

#[derive(Deserialize)]
struct RequestJson {
    principal: JsonValue,
    action: JsonValue,
    resource: JsonValue,
    #[serde(default)]
    context: JsonValue,
}

impl Request {
    pub fn new(
        principal: EntityUid,
        action: EntityUid,
        resource: EntityUid,
        context: RequestContext,
    ) -> Self {
        Self {
            principal,
            action,
            resource,
            context,
        }
    }

    /// Decode `{"principal", "action", "resource", "context"}`. Entity slots
    /// take either the text form (`User::"alice"`) or an entity JSON object.
    pub fn from_json_str(json: &str) -> Result<Self, EvalError> {
        let raw: RequestJson =
            serde_json::from_str(json).map_err(|e| EvalError::InvalidRequest(e.to_string()))?;
        let slot = |name: &str, value: &JsonValue| -> Result<EntityUid, EvalError> {
            let parsed = match value {
                JsonValue::String(text) => text.parse::<EntityUid>().map_err(|e| e.to_string()),
                other => EntityUid::from_json(other),
            };
            parsed.map_err(|e| EvalError::InvalidRequest(format!("{name}: {e}")))
        };
        Ok(Request {
            principal: slot("principal", &raw.principal)?,
            action: slot("action", &raw.action)?,
            resource: slot("resource", &raw.resource)?,
            context: RequestContext::from_json(&raw.context)
                .map_err(|e| EvalError::InvalidRequest(format!("context: {e}")))?,
        })
    }
}

impl Display for Request {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(
            f,
            "{} -> {} -> {}",
            self.principal, self.action, self.resource
        )
    }
}
