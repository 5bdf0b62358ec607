//! Entity type names and entity identifiers.

use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ParseError;
use crate::parser;

/// A possibly namespaced entity type name, e.g. `User` or `PhotoFlash::Album`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityType(String);

impl EntityType {
    /// Build a type name from already-validated path segments.
    pub(crate) fn from_segments<S: AsRef<str>>(segments: &[S]) -> Self {
        EntityType(
            segments
                .iter()
                .map(|s| s.as_ref())
                .collect::<Vec<_>>()
                .join("::"),
        )
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The last path segment (`Album` for `PhotoFlash::Album`).
    pub fn basename(&self) -> &str {
        self.0.rsplit("::").next().unwrap_or(&self.0)
    }

    /// Everything before the last segment, empty for un-namespaced types.
    pub fn namespace(&self) -> &str {
        match self.0.rfind("::") {
            Some(idx) => &self.0[..idx],
            None => "",
        }
    }

    /// Whether this is the action type of some namespace (`Action`, `NS::Action`).
    pub fn is_action(&self) -> bool {
        self.basename() == "Action"
    }

    /// The action type for a namespace.
    pub(crate) fn action_in(namespace: &str) -> Self {
        if namespace.is_empty() {
            EntityType("Action".to_string())
        } else {
            EntityType(format!("{namespace}::Action"))
        }
    }
}

impl Display for EntityType {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(&self.0)
    }
}

impl FromStr for EntityType {
    type Err = ParseError;

    /// Accepts `Type` and `NS::Type`; every segment must be an identifier.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parser::parse_entity_type(s)
    }
}

impl Serialize for EntityType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for EntityType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// A globally unique entity reference: `(type, id)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityUid {
    #[serde(rename = "type")]
    entity_type: EntityType,
    id: String,
}

impl EntityUid {
    pub fn new(entity_type: EntityType, id: impl Into<String>) -> Self {
        Self {
            entity_type,
            id: id.into(),
        }
    }

    pub fn entity_type(&self) -> &EntityType {
        &self.entity_type
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Decode the JSON forms `{"type": T, "id": I}` and
    /// `{"__entity": {"type": T, "id": I}}`.
    pub fn from_json(value: &serde_json::Value) -> Result<Self, String> {
        let inner = value.get("__entity").unwrap_or(value);
        let ty = inner
            .get("type")
            .and_then(|v| v.as_str())
            .ok_or_else(|| format!("expected an entity reference, got {value}"))?;
        let id = inner
            .get("id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| format!("entity reference is missing a string `id`: {value}"))?;
        let entity_type: EntityType = ty.parse().map_err(|e: ParseError| e.message)?;
        Ok(EntityUid::new(entity_type, id))
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({ "type": self.entity_type.as_str(), "id": self.id })
    }
}

impl Display for EntityUid {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, r#"{}::"{}""#, self.entity_type, self.id.escape_debug())
    }
}

impl FromStr for EntityUid {
    type Err = ParseError;

    /// Accepts `Type::"id"` and `NS::Type::"id"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parser::parse_entity_uid(s)
    }
}
