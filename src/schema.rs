//! Schemas: declared entity types, their attribute shapes, and the actions
//! with the principal/resource types and context each applies to.
//!
//! The JSON document is keyed by namespace (`""` is the global one). Type
//! names inside a namespace resolve to that namespace first and to the
//! global name second.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::str::FromStr;

use serde::Deserialize;

use crate::error::SchemaError;
use crate::extensions::ExtensionType;
use crate::types::{EntityType, EntityUid};

/// An attribute or context type as declared in a schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaType {
    Bool,
    Long,
    String,
    Set(Box<SchemaType>),
    Record(RecordType),
    Entity(EntityType),
    Extension(ExtensionType),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeType {
    pub ty: SchemaType,
    pub required: bool,
}

/// A closed record shape: attributes not listed here do not exist.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordType {
    pub attrs: BTreeMap<String, AttributeType>,
}

impl RecordType {
    pub fn attr(&self, name: &str) -> Option<&AttributeType> {
        self.attrs.get(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityTypeDef {
    pub name: EntityType,
    /// Types an entity of this type may directly be a member of.
    pub member_of: BTreeSet<EntityType>,
    pub shape: RecordType,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliesTo {
    pub principal_types: BTreeSet<EntityType>,
    pub resource_types: BTreeSet<EntityType>,
    /// `None` when the action declares no context shape.
    pub context: Option<RecordType>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionDef {
    pub uid: EntityUid,
    pub member_of: BTreeSet<EntityUid>,
    /// `None` when the action applies to no request at all.
    pub applies_to: Option<AppliesTo>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schema {
    entity_types: BTreeMap<EntityType, EntityTypeDef>,
    actions: BTreeMap<EntityUid, ActionDef>,
}

impl Schema {
    pub fn from_json_str(json: &str) -> Result<Self, SchemaError> {
        let raw: BTreeMap<String, RawNamespace> =
            serde_json::from_str(json).map_err(|e| SchemaError::Json(e.to_string()))?;
        Resolver::new(&raw)?.resolve(&raw)
    }

    pub fn entity_type(&self, name: &EntityType) -> Option<&EntityTypeDef> {
        self.entity_types.get(name)
    }

    pub fn entity_types(&self) -> impl Iterator<Item = &EntityTypeDef> {
        self.entity_types.values()
    }

    pub fn action(&self, uid: &EntityUid) -> Option<&ActionDef> {
        self.actions.get(uid)
    }

    pub fn actions(&self) -> impl Iterator<Item = &ActionDef> {
        self.actions.values()
    }

    /// Declared entity types plus the action type of every namespace that
    /// declares actions.
    pub fn is_known_entity_type(&self, name: &EntityType) -> bool {
        self.entity_types.contains_key(name)
            || self.actions.keys().any(|a| a.entity_type() == name)
    }

    /// Whether an entity of type `child` can be `in` an entity of type
    /// `ancestor`: the same type, or reachable through `memberOfTypes`.
    pub fn can_be_in(&self, child: &EntityType, ancestor: &EntityType) -> bool {
        if child == ancestor {
            return true;
        }
        let mut visited = BTreeSet::new();
        let mut queue = VecDeque::from([child]);
        while let Some(ty) = queue.pop_front() {
            if !visited.insert(ty) {
                continue;
            }
            let Some(def) = self.entity_types.get(ty) else {
                continue;
            };
            if def.member_of.contains(ancestor) {
                return true;
            }
            queue.extend(def.member_of.iter());
        }
        false
    }

    /// Actions equal to `target` or transitively declared members of it.
    pub fn actions_in(&self, target: &EntityUid) -> BTreeSet<&EntityUid> {
        self.actions
            .keys()
            .filter(|uid| self.action_is_in(uid, target))
            .collect()
    }

    fn action_is_in(&self, action: &EntityUid, target: &EntityUid) -> bool {
        let mut visited = BTreeSet::new();
        let mut queue = VecDeque::from([action]);
        while let Some(uid) = queue.pop_front() {
            if uid == target {
                return true;
            }
            if !visited.insert(uid) {
                continue;
            }
            if let Some(def) = self.actions.get(uid) {
                queue.extend(def.member_of.iter());
            }
        }
        false
    }
}

impl FromStr for Schema {
    type Err = SchemaError;

    fn from_str(json: &str) -> Result<Self, Self::Err> {
        Schema::from_json_str(json)
    }
}

// ---- JSON form ----

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawNamespace {
    #[serde(default)]
    entity_types: BTreeMap<String, RawEntityType>,
    #[serde(default)]
    actions: BTreeMap<String, RawAction>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEntityType {
    #[serde(default)]
    member_of_types: Vec<String>,
    shape: Option<RawType>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawAction {
    #[serde(default)]
    member_of: Vec<RawActionRef>,
    applies_to: Option<RawAppliesTo>,
}

#[derive(Debug, Deserialize)]
struct RawActionRef {
    id: String,
    #[serde(rename = "type")]
    ty: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawAppliesTo {
    #[serde(default)]
    principal_types: Vec<String>,
    #[serde(default)]
    resource_types: Vec<String>,
    context: Option<RawType>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum RawType {
    String,
    Long,
    #[serde(alias = "Bool")]
    Boolean,
    Set {
        element: Box<RawType>,
    },
    Record {
        #[serde(default)]
        attributes: BTreeMap<String, RawAttribute>,
    },
    Entity {
        name: String,
    },
    Extension {
        name: String,
    },
}

#[derive(Debug, Deserialize)]
struct RawAttribute {
    #[serde(flatten)]
    ty: RawType,
    #[serde(default = "required_by_default")]
    required: bool,
}

fn required_by_default() -> bool {
    true
}

/// Turns the raw document into a `Schema`, qualifying every name.
struct Resolver {
    declared: BTreeSet<EntityType>,
}

impl Resolver {
    fn new(raw: &BTreeMap<String, RawNamespace>) -> Result<Self, SchemaError> {
        let mut declared = BTreeSet::new();
        for (namespace, ns) in raw {
            if !namespace.is_empty() && namespace.parse::<EntityType>().is_err() {
                return Err(SchemaError::InvalidName(namespace.clone()));
            }
            for name in ns.entity_types.keys() {
                declared.insert(qualify(namespace, name)?);
            }
        }
        Ok(Self { declared })
    }

    fn resolve(&self, raw: &BTreeMap<String, RawNamespace>) -> Result<Schema, SchemaError> {
        let mut schema = Schema::default();

        for (namespace, ns) in raw {
            for (name, def) in &ns.entity_types {
                let ty = qualify(namespace, name)?;
                let member_of = def
                    .member_of_types
                    .iter()
                    .map(|parent| self.entity_type(namespace, parent))
                    .collect::<Result<_, _>>()?;
                let shape = match &def.shape {
                    None => RecordType::default(),
                    Some(shape) => self.record(namespace, shape)?,
                };
                schema.entity_types.insert(
                    ty.clone(),
                    EntityTypeDef {
                        name: ty,
                        member_of,
                        shape,
                    },
                );
            }
        }

        for (namespace, ns) in raw {
            let action_type = EntityType::action_in(namespace);
            for (name, def) in &ns.actions {
                let uid = EntityUid::new(action_type.clone(), name.clone());
                let member_of = def
                    .member_of
                    .iter()
                    .map(|parent| -> Result<EntityUid, SchemaError> {
                        let ty = match &parent.ty {
                            None => action_type.clone(),
                            Some(ty) if ty == "Action" => action_type.clone(),
                            Some(ty) => ty
                                .parse::<EntityType>()
                                .map_err(|_| SchemaError::InvalidName(ty.clone()))?,
                        };
                        Ok(EntityUid::new(ty, parent.id.clone()))
                    })
                    .collect::<Result<_, _>>()?;
                let applies_to = match &def.applies_to {
                    None => None,
                    Some(applies) => Some(AppliesTo {
                        principal_types: self.entity_types(namespace, &applies.principal_types)?,
                        resource_types: self.entity_types(namespace, &applies.resource_types)?,
                        context: match &applies.context {
                            None => None,
                            Some(context) => Some(self.record(namespace, context)?),
                        },
                    }),
                };
                schema.actions.insert(
                    uid.clone(),
                    ActionDef {
                        uid,
                        member_of,
                        applies_to,
                    },
                );
            }
        }

        for action in schema.actions.values() {
            if let Some(parent) = action
                .member_of
                .iter()
                .find(|parent| !schema.actions.contains_key(*parent))
            {
                return Err(SchemaError::UndeclaredAction(parent.to_string()));
            }
        }
        Ok(schema)
    }

    fn entity_type(&self, namespace: &str, name: &str) -> Result<EntityType, SchemaError> {
        let local = qualify(namespace, name)?;
        if self.declared.contains(&local) {
            return Ok(local);
        }
        let global = qualify("", name)?;
        if self.declared.contains(&global) {
            return Ok(global);
        }
        Err(SchemaError::UndeclaredType(name.to_string()))
    }

    fn entity_types(
        &self,
        namespace: &str,
        names: &[String],
    ) -> Result<BTreeSet<EntityType>, SchemaError> {
        names
            .iter()
            .map(|name| self.entity_type(namespace, name))
            .collect()
    }

    fn record(&self, namespace: &str, raw: &RawType) -> Result<RecordType, SchemaError> {
        match self.ty(namespace, raw)? {
            SchemaType::Record(record) => Ok(record),
            _ => Err(SchemaError::InvalidType(
                "shapes and contexts must be records".to_string(),
            )),
        }
    }

    fn ty(&self, namespace: &str, raw: &RawType) -> Result<SchemaType, SchemaError> {
        Ok(match raw {
            RawType::String => SchemaType::String,
            RawType::Long => SchemaType::Long,
            RawType::Boolean => SchemaType::Bool,
            RawType::Set { element } => SchemaType::Set(Box::new(self.ty(namespace, element)?)),
            RawType::Record { attributes } => SchemaType::Record(RecordType {
                attrs: attributes
                    .iter()
                    .map(|(name, attr)| -> Result<(String, AttributeType), SchemaError> {
                        let ty = self.ty(namespace, &attr.ty)?;
                        Ok((
                            name.clone(),
                            AttributeType {
                                ty,
                                required: attr.required,
                            },
                        ))
                    })
                    .collect::<Result<_, _>>()?,
            }),
            RawType::Entity { name } => SchemaType::Entity(self.entity_type(namespace, name)?),
            RawType::Extension { name } => SchemaType::Extension(
                name.parse()
                    .map_err(|_| SchemaError::InvalidType(format!("unknown extension `{name}`")))?,
            ),
        })
    }
}

fn qualify(namespace: &str, name: &str) -> Result<EntityType, SchemaError> {
    let full = if namespace.is_empty() {
        name.to_string()
    } else {
        format!("{namespace}::{name}")
    };
    full.parse()
        .map_err(|_| SchemaError::InvalidName(full.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use yare::parameterized;

    const PHOTO_FLASH: &str = r#"{
        "PhotoFlash": {
            "entityTypes": {
                "User": {
                    "memberOfTypes": ["UserGroup"],
                    "shape": {"type": "Record", "attributes": {
                        "department": {"type": "String"},
                        "jobLevel": {"type": "Long"}
                    }}
                },
                "UserGroup": {},
                "Photo": {
                    "memberOfTypes": ["Album"],
                    "shape": {"type": "Record", "attributes": {
                        "private": {"type": "Boolean"},
                        "account": {"type": "Entity", "name": "Account"}
                    }}
                },
                "Album": {"memberOfTypes": ["Album"]},
                "Account": {
                    "shape": {"type": "Record", "attributes": {
                        "owner": {"type": "Entity", "name": "User"},
                        "admins": {"required": false, "type": "Set",
                                   "element": {"type": "Entity", "name": "User"}}
                    }}
                }
            },
            "actions": {
                "viewPhoto": {
                    "memberOf": [{"id": "read"}],
                    "appliesTo": {
                        "principalTypes": ["User"],
                        "resourceTypes": ["Photo"],
                        "context": {"type": "Record", "attributes": {
                            "authenticated": {"type": "Boolean"}
                        }}
                    }
                },
                "read": {}
            }
        }
    }"#;

    fn ty(name: &str) -> EntityType {
        name.parse().unwrap()
    }

    #[test]
    fn test_parse_namespaced_schema() {
        let schema = Schema::from_json_str(PHOTO_FLASH).unwrap();

        let user = schema.entity_type(&ty("PhotoFlash::User")).unwrap();
        assert!(user.member_of.contains(&ty("PhotoFlash::UserGroup")));
        assert_eq!(user.shape.attr("jobLevel").unwrap().ty, SchemaType::Long);

        let account = schema.entity_type(&ty("PhotoFlash::Account")).unwrap();
        let admins = account.shape.attr("admins").unwrap();
        assert!(!admins.required);
        assert_eq!(
            admins.ty,
            SchemaType::Set(Box::new(SchemaType::Entity(ty("PhotoFlash::User"))))
        );

        let view: EntityUid = r#"PhotoFlash::Action::"viewPhoto""#.parse().unwrap();
        let applies = schema.action(&view).unwrap().applies_to.as_ref().unwrap();
        assert!(applies.principal_types.contains(&ty("PhotoFlash::User")));
        assert!(applies.context.as_ref().unwrap().attr("authenticated").is_some());

        let read: EntityUid = r#"PhotoFlash::Action::"read""#.parse().unwrap();
        assert!(schema.action(&read).unwrap().applies_to.is_none());
        assert_eq!(schema.actions_in(&read).len(), 2);
        assert!(schema.is_known_entity_type(&ty("PhotoFlash::Action")));
    }

    #[parameterized(
        same_type = { "PhotoFlash::User", "PhotoFlash::User", true },
        declared_parent = { "PhotoFlash::User", "PhotoFlash::UserGroup", true },
        transitive_self_loop = { "PhotoFlash::Photo", "PhotoFlash::Album", true },
        unrelated = { "PhotoFlash::Photo", "PhotoFlash::UserGroup", false },
        reverse = { "PhotoFlash::UserGroup", "PhotoFlash::User", false },
    )]
    fn test_can_be_in(child: &str, ancestor: &str, expected: bool) {
        let schema = Schema::from_json_str(PHOTO_FLASH).unwrap();
        assert_eq!(schema.can_be_in(&ty(child), &ty(ancestor)), expected);
    }

    #[test]
    fn test_global_fallback_resolution() {
        let schema = Schema::from_json_str(
            r#"{
                "": {"entityTypes": {"Tenant": {}}},
                "App": {"entityTypes": {"User": {"memberOfTypes": ["Tenant"]}}}
            }"#,
        )
        .unwrap();
        let user = schema.entity_type(&ty("App::User")).unwrap();
        assert!(user.member_of.contains(&ty("Tenant")));
    }

    #[parameterized(
        not_json = { "nope", "Json" },
        unknown_type_tag = { r#"{"": {"entityTypes": {"U": {"shape": {"type": "Float"}}}}}"#, "Json" },
        undeclared_member = { r#"{"": {"entityTypes": {"U": {"memberOfTypes": ["G"]}}}}"#, "UndeclaredType" },
        undeclared_entity_attr = { r#"{"": {"entityTypes": {"U": {"shape": {"type": "Record", "attributes": {"g": {"type": "Entity", "name": "G"}}}}}}}"#, "UndeclaredType" },
        undeclared_action_parent = { r#"{"": {"actions": {"a": {"memberOf": [{"id": "b"}]}}}}"#, "UndeclaredAction" },
        non_record_shape = { r#"{"": {"entityTypes": {"U": {"shape": {"type": "Long"}}}}}"#, "InvalidType" },
        bad_extension = { r#"{"": {"entityTypes": {"U": {"shape": {"type": "Record", "attributes": {"x": {"type": "Extension", "name": "float"}}}}}}}"#, "InvalidType" },
        bad_name = { r#"{"": {"entityTypes": {"not a name": {}}}}"#, "InvalidName" },
    )]
    fn test_schema_errors(json: &str, kind: &str) {
        let err = Schema::from_json_str(json).unwrap_err();
        let actual = match err {
            SchemaError::Json(_) => "Json",
            SchemaError::UndeclaredType(_) => "UndeclaredType",
            SchemaError::UndeclaredAction(_) => "UndeclaredAction",
            SchemaError::InvalidType(_) => "InvalidType",
            SchemaError::InvalidName(_) => "InvalidName",
        };
        assert_eq!(actual, kind);
    }
}
