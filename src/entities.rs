//! The entity store: an arena of entities keyed by uid.
//!
//! `parents` edges are plain uid references, so the hierarchy may contain
//! dangling references and cycles. Reachability tracks visited uids and
//! always terminates.

use std::collections::{HashMap, HashSet, VecDeque};

use serde_json::Value as JsonValue;

use crate::error::LoadError;
use crate::types::{Entity, EntityUid};

#[derive(Debug, Clone, Default)]
pub struct EntityStore {
    entities: HashMap<EntityUid, Entity>,
}

impl EntityStore {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a store from a complete list of entities. Fails on the first
    /// uid that appears twice.
    pub fn load(entities: impl IntoIterator<Item = Entity>) -> Result<Self, LoadError> {
        let mut map = HashMap::new();
        for entity in entities {
            let uid = entity.uid().clone();
            if map.insert(uid.clone(), entity).is_some() {
                return Err(LoadError::DuplicateEntity(uid));
            }
        }
        Ok(Self { entities: map })
    }

    /// Parse a JSON array of `{uid, attrs, parents}` records.
    pub fn from_json_str(json: &str) -> Result<Self, LoadError> {
        let raw: JsonValue =
            serde_json::from_str(json).map_err(|e| LoadError::Json(e.to_string()))?;
        let JsonValue::Array(items) = raw else {
            return Err(LoadError::Json(
                "expected a JSON array of entities".to_string(),
            ));
        };
        let entities = items
            .iter()
            .map(Entity::from_json)
            .collect::<Result<Vec<_>, _>>()?;
        Self::load(entities)
    }

    pub fn get(&self, uid: &EntityUid) -> Option<&Entity> {
        self.entities.get(uid)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    /// Whether `ancestor` is reachable from `child` through one or more
    /// `parents` edges. Not reflexive: an entity is only its own descendant
    /// when a parent chain leads back to it.
    pub fn is_descendant(&self, child: &EntityUid, ancestor: &EntityUid) -> bool {
        let Some(start) = self.entities.get(child) else {
            return false;
        };

        let mut visited: HashSet<&EntityUid> = HashSet::new();
        let mut queue: VecDeque<&EntityUid> = start.parents().iter().collect();

        while let Some(uid) = queue.pop_front() {
            if uid == ancestor {
                return true;
            }
            if !visited.insert(uid) {
                continue;
            }
            // A dangling parent ends the chain.
            if let Some(entity) = self.entities.get(uid) {
                queue.extend(entity.parents().iter().filter(|p| !visited.contains(p)));
            }
        }
        false
    }

    /// `uid in target` semantics: equal, or a descendant.
    pub fn is_in(&self, uid: &EntityUid, target: &EntityUid) -> bool {
        uid == target || self.is_descendant(uid, target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use yare::parameterized;

    fn uid(text: &str) -> EntityUid {
        text.parse().unwrap()
    }

    fn store() -> EntityStore {
        EntityStore::load(vec![
            Entity::with_uid(uid(r#"User::"bob""#))
                .with_parent(uid(r#"Role::"judges""#))
                .with_parent(uid(r#"Role::"ghost""#)),
            Entity::with_uid(uid(r#"Role::"judges""#)).with_parent(uid(r#"Org::"photo""#)),
            Entity::with_uid(uid(r#"Org::"photo""#)),
            // a <-> b cycle
            Entity::with_uid(uid(r#"Group::"a""#)).with_parent(uid(r#"Group::"b""#)),
            Entity::with_uid(uid(r#"Group::"b""#)).with_parent(uid(r#"Group::"a""#)),
            Entity::with_uid(uid(r#"Group::"c""#)).with_parent(uid(r#"Group::"a""#)),
        ])
        .unwrap()
    }

    #[parameterized(
        direct_parent = { r#"User::"bob""#, r#"Role::"judges""#, true },
        transitive = { r#"User::"bob""#, r#"Org::"photo""#, true },
        dangling_direct_parent = { r#"User::"bob""#, r#"Role::"ghost""#, true },
        not_related = { r#"Org::"photo""#, r#"User::"bob""#, false },
        not_reflexive = { r#"User::"bob""#, r#"User::"bob""#, false },
        cycle_reaches_self = { r#"Group::"a""#, r#"Group::"a""#, true },
        into_cycle = { r#"Group::"c""#, r#"Group::"b""#, true },
        cycle_terminates_when_absent = { r#"Group::"c""#, r#"Org::"photo""#, false },
        unknown_child = { r#"User::"nobody""#, r#"Org::"photo""#, false },
    )]
    fn test_is_descendant(child: &str, ancestor: &str, expected: bool) {
        assert_eq!(store().is_descendant(&uid(child), &uid(ancestor)), expected);
    }

    #[test]
    fn test_is_in_is_reflexive() {
        let store = store();
        assert!(store.is_in(&uid(r#"User::"bob""#), &uid(r#"User::"bob""#)));
        assert!(store.is_in(&uid(r#"User::"nobody""#), &uid(r#"User::"nobody""#)));
    }

    #[test]
    fn test_duplicate_entity_rejected() {
        let err = EntityStore::load(vec![
            Entity::with_uid(uid(r#"User::"a""#)),
            Entity::with_uid(uid(r#"User::"a""#)),
        ])
        .unwrap_err();
        assert_eq!(err, LoadError::DuplicateEntity(uid(r#"User::"a""#)));
    }

    #[test]
    fn test_from_json_str() {
        let store = EntityStore::from_json_str(
            r#"[
                {"uid": {"type": "User", "id": "Bob"}, "attrs": {},
                 "parents": [{"type": "Role", "id": "vacationPhotoJudges"},
                             {"type": "Role", "id": "juniorPhotographerJudges"}]},
                {"uid": {"type": "Role", "id": "vacationPhotoJudges"}, "attrs": {}, "parents": []},
                {"uid": {"type": "Role", "id": "juniorPhotographerJudges"},
                 "attrs": {}, "parents": []}
            ]"#,
        )
        .unwrap();
        assert_eq!(store.len(), 3);
        assert_eq!(store.iter().count(), 3);
        assert!(store.get(&uid(r#"User::"Bob""#)).is_some());
    }

    #[test]
    fn test_from_json_str_rejects_non_array() {
        assert!(matches!(
            EntityStore::from_json_str(r#"{"uid": {}}"#),
            Err(LoadError::Json(_))
        ));
        assert!(matches!(
            EntityStore::from_json_str("not json"),
            Err(LoadError::Json(_))
        ));
        assert!(EntityStore::from_json_str("[]").unwrap().is_empty());
    }
}
