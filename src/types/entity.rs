//! Entities: a uid, its attributes, and its parents in the hierarchy.

use std::collections::{BTreeMap, HashSet};

use serde_json::Value as JsonValue;

use crate::error::LoadError;

use super::{EntityUid, Value};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entity {
    uid: EntityUid,
    attrs: BTreeMap<String, Value>,
    parents: HashSet<EntityUid>,
}

impl Entity {
    pub fn new(
        uid: EntityUid,
        attrs: BTreeMap<String, Value>,
        parents: HashSet<EntityUid>,
    ) -> Self {
        Self {
            uid,
            attrs,
            parents,
        }
    }

    /// An entity with no attributes and no parents.
    pub fn with_uid(uid: EntityUid) -> Self {
        Self::new(uid, BTreeMap::new(), HashSet::new())
    }

    pub fn with_attr(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attrs.insert(name.into(), value.into());
        self
    }

    pub fn with_parent(mut self, parent: EntityUid) -> Self {
        self.parents.insert(parent);
        self
    }

    pub fn uid(&self) -> &EntityUid {
        &self.uid
    }

    pub fn attr(&self, name: &str) -> Option<&Value> {
        self.attrs.get(name)
    }

    pub fn attrs(&self) -> &BTreeMap<String, Value> {
        &self.attrs
    }

    pub fn parents(&self) -> &HashSet<EntityUid> {
        &self.parents
    }

    /// Decode one `{uid, attrs, parents}` record.
    pub fn from_json(json: &JsonValue) -> Result<Self, LoadError> {
        let uid_json = json
            .get("uid")
            .ok_or_else(|| LoadError::Json(format!("entity is missing `uid`: {json}")))?;
        let uid = EntityUid::from_json(uid_json).map_err(LoadError::Json)?;
        let invalid = |message: String| LoadError::InvalidEntity {
            uid: uid.to_string(),
            message,
        };

        let attrs = match json.get("attrs") {
            None | Some(JsonValue::Null) => BTreeMap::new(),
            Some(JsonValue::Object(map)) => map
                .iter()
                .map(|(name, raw)| {
                    Value::from_json(raw)
                        .map(|v| (name.clone(), v))
                        .map_err(|e| invalid(format!("attribute `{name}`: {e}")))
                })
                .collect::<Result<BTreeMap<_, _>, _>>()?,
            Some(other) => return Err(invalid(format!("`attrs` must be an object, got {other}"))),
        };

        let parents = match json.get("parents") {
            None | Some(JsonValue::Null) => HashSet::new(),
            Some(JsonValue::Array(items)) => items
                .iter()
                .map(|p| EntityUid::from_json(p).map_err(|e| invalid(format!("parent: {e}"))))
                .collect::<Result<HashSet<_>, _>>()?,
            Some(other) => {
                return Err(invalid(format!("`parents` must be an array, got {other}")));
            }
        };

        Ok(Entity::new(uid, attrs, parents))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_entity_from_json() {
        let entity = Entity::from_json(&json!({
            "uid": {"type": "User", "id": "Bob"},
            "attrs": {"department": "photo", "jobLevel": 5},
            "parents": [
                {"type": "Role", "id": "vacationPhotoJudges"},
                {"type": "Role", "id": "juniorPhotographerJudges"}
            ]
        }))
        .unwrap();

        assert_eq!(entity.uid().to_string(), r#"User::"Bob""#);
        assert_eq!(entity.attr("jobLevel"), Some(&Value::Long(5)));
        assert_eq!(entity.parents().len(), 2);
    }

    #[test]
    fn test_entity_from_json_defaults_missing_fields() {
        let entity = Entity::from_json(&json!({"uid": {"type": "User", "id": "a"}})).unwrap();
        assert!(entity.attrs().is_empty());
        assert!(entity.parents().is_empty());
    }

    #[test]
    fn test_entity_from_json_reports_bad_attribute() {
        let err = Entity::from_json(&json!({
            "uid": {"type": "User", "id": "a"},
            "attrs": {"score": 0.5}
        }))
        .unwrap_err();
        assert!(matches!(err, LoadError::InvalidEntity { ref uid, .. } if uid == r#"User::"a""#));
    }

    #[test]
    fn test_entity_from_json_requires_uid() {
        assert!(matches!(
            Entity::from_json(&json!({"attrs": {}})),
            Err(LoadError::Json(_))
        ));
    }
}
