//! The type lattice used by the policy type checker.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter, Result as FmtResult};

use itertools::Itertools;

use crate::extensions::{ExtensionType, ExtensionValue};
use crate::schema::{RecordType, SchemaType};
use crate::types::{EntityType, Value};

/// The entity types an entity-typed expression may have.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityLub {
    /// Some entity, type not known statically.
    Any,
    Types(BTreeSet<EntityType>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttrType {
    pub ty: Type,
    pub required: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Type {
    Bool,
    Long,
    String,
    Entity(EntityLub),
    Set(Box<Type>),
    Record {
        attrs: BTreeMap<String, AttrType>,
        /// Open records may carry attributes beyond `attrs`.
        open: bool,
    },
    Extension(ExtensionType),
    /// Nothing is known; compatible with everything.
    Unknown,
}

impl Type {
    pub fn entity(ty: EntityType) -> Self {
        Type::Entity(EntityLub::Types(BTreeSet::from([ty])))
    }

    pub fn from_schema(ty: &SchemaType) -> Self {
        match ty {
            SchemaType::Bool => Type::Bool,
            SchemaType::Long => Type::Long,
            SchemaType::String => Type::String,
            SchemaType::Set(element) => Type::Set(Box::new(Type::from_schema(element))),
            SchemaType::Record(record) => Type::from_record(record),
            SchemaType::Entity(name) => Type::entity(name.clone()),
            SchemaType::Extension(ext) => Type::Extension(*ext),
        }
    }

    pub fn from_record(record: &RecordType) -> Self {
        Type::Record {
            attrs: record
                .attrs
                .iter()
                .map(|(name, attr)| {
                    (
                        name.clone(),
                        AttrType {
                            ty: Type::from_schema(&attr.ty),
                            required: attr.required,
                        },
                    )
                })
                .collect(),
            open: false,
        }
    }

    /// Type of a literal value. Sets of mixed element types have no lub and
    /// yield `Set(Unknown)`.
    pub fn of_value(value: &Value) -> Self {
        match value {
            Value::Bool(_) => Type::Bool,
            Value::Long(_) => Type::Long,
            Value::String(_) => Type::String,
            Value::EntityUid(uid) => Type::entity(uid.entity_type().clone()),
            Value::Set(items) => {
                let element = items
                    .iter()
                    .map(Type::of_value)
                    .try_fold(None, |acc: Option<Type>, t| match acc {
                        None => Some(Some(t)),
                        Some(prev) => prev.lub(&t).map(Some),
                    })
                    .flatten()
                    .unwrap_or(Type::Unknown);
                Type::Set(Box::new(element))
            }
            Value::Record(fields) => Type::Record {
                attrs: fields
                    .iter()
                    .map(|(k, v)| {
                        (
                            k.clone(),
                            AttrType {
                                ty: Type::of_value(v),
                                required: true,
                            },
                        )
                    })
                    .collect(),
                open: false,
            },
            Value::Extension(ext) => Type::Extension(match ext {
                ExtensionValue::IpAddr(_) => ExtensionType::IpAddr,
                ExtensionValue::Decimal(_) => ExtensionType::Decimal,
                ExtensionValue::Duration(_) => ExtensionType::Duration,
            }),
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Type::Unknown)
    }

    /// Whether two values of these types could ever be equal.
    pub fn is_compatible(&self, other: &Type) -> bool {
        match (self, other) {
            (Type::Unknown, _) | (_, Type::Unknown) => true,
            (Type::Bool, Type::Bool) | (Type::Long, Type::Long) | (Type::String, Type::String) => {
                true
            }
            (Type::Entity(EntityLub::Any), Type::Entity(_))
            | (Type::Entity(_), Type::Entity(EntityLub::Any)) => true,
            (Type::Entity(EntityLub::Types(a)), Type::Entity(EntityLub::Types(b))) => {
                !a.is_disjoint(b)
            }
            (Type::Set(a), Type::Set(b)) => a.is_compatible(b),
            (Type::Record { .. }, Type::Record { .. }) => true,
            (Type::Extension(a), Type::Extension(b)) => a == b,
            _ => false,
        }
    }

    /// Least upper bound, or `None` when the two types have nothing in common.
    pub fn lub(&self, other: &Type) -> Option<Type> {
        match (self, other) {
            (Type::Unknown, t) | (t, Type::Unknown) => Some(t.clone()),
            (Type::Bool, Type::Bool) => Some(Type::Bool),
            (Type::Long, Type::Long) => Some(Type::Long),
            (Type::String, Type::String) => Some(Type::String),
            (Type::Entity(EntityLub::Types(a)), Type::Entity(EntityLub::Types(b))) => Some(
                Type::Entity(EntityLub::Types(a.union(b).cloned().collect())),
            ),
            (Type::Entity(_), Type::Entity(_)) => Some(Type::Entity(EntityLub::Any)),
            (Type::Set(a), Type::Set(b)) => a.lub(b).map(|t| Type::Set(Box::new(t))),
            (
                Type::Record {
                    attrs: a,
                    open: open_a,
                },
                Type::Record {
                    attrs: b,
                    open: open_b,
                },
            ) => {
                if a == b {
                    return Some(Type::Record {
                        attrs: a.clone(),
                        open: *open_a || *open_b,
                    });
                }
                let shared = a
                    .iter()
                    .filter_map(|(name, attr_a)| {
                        let attr_b = b.get(name)?;
                        let ty = attr_a.ty.lub(&attr_b.ty)?;
                        Some((
                            name.clone(),
                            AttrType {
                                ty,
                                required: attr_a.required && attr_b.required,
                            },
                        ))
                    })
                    .collect();
                Some(Type::Record {
                    attrs: shared,
                    open: true,
                })
            }
            (Type::Extension(a), Type::Extension(b)) if a == b => Some(Type::Extension(*a)),
            _ => None,
        }
    }
}

impl Display for Type {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Type::Bool => f.write_str("bool"),
            Type::Long => f.write_str("long"),
            Type::String => f.write_str("string"),
            Type::Entity(EntityLub::Any) => f.write_str("entity"),
            Type::Entity(EntityLub::Types(types)) => {
                let names = types.iter().map(|t| format!("`{t}`")).join(" | ");
                write!(f, "entity of type {names}")
            }
            Type::Set(element) => write!(f, "set<{element}>"),
            Type::Record { .. } => f.write_str("record"),
            Type::Extension(ext) => write!(f, "{ext}"),
            Type::Unknown => f.write_str("unknown"),
        }
    }
}
