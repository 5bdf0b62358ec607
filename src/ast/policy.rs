//! Policies: effect, scope constraints, condition, annotations.

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter, Result as FmtResult};

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use strum_macros::{Display as StrumDisplay, EnumString};

use crate::types::{EntityType, EntityUid, Value};

use super::Expr;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, StrumDisplay, EnumString,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Effect {
    Permit,
    Forbid,
}

/// The constraint one scope slot places on the request entity in that slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ScopeConstraint {
    Any,
    Eq(EntityUid),
    In(EntityUid),
    InSet(Vec<EntityUid>),
    Is(EntityType),
    IsIn(EntityType, EntityUid),
}

impl ScopeConstraint {
    /// Entity uids mentioned by the constraint.
    pub fn uids(&self) -> Vec<&EntityUid> {
        match self {
            ScopeConstraint::Any | ScopeConstraint::Is(_) => vec![],
            ScopeConstraint::Eq(uid) | ScopeConstraint::In(uid) | ScopeConstraint::IsIn(_, uid) => {
                vec![uid]
            }
            ScopeConstraint::InSet(uids) => uids.iter().collect(),
        }
    }

    /// The constraint as the equivalent expression over `var`.
    pub fn to_expr(&self, var: Expr) -> Expr {
        use super::BinaryOp;
        let is_type = |var: Expr, ty: &EntityType| Expr::Is {
            expr: Box::new(var),
            entity_type: ty.clone(),
        };
        match self {
            ScopeConstraint::Any => Expr::literal(true),
            ScopeConstraint::Eq(uid) => {
                Expr::binary(BinaryOp::Eq, var, Expr::literal(uid.clone()))
            }
            ScopeConstraint::In(uid) => {
                Expr::binary(BinaryOp::In, var, Expr::literal(uid.clone()))
            }
            ScopeConstraint::InSet(uids) => Expr::binary(
                BinaryOp::In,
                var,
                Expr::Set(uids.iter().cloned().map(Expr::literal).collect()),
            ),
            ScopeConstraint::Is(ty) => is_type(var, ty),
            ScopeConstraint::IsIn(ty, uid) => Expr::and(
                is_type(var.clone(), ty),
                Expr::binary(BinaryOp::In, var, Expr::literal(uid.clone())),
            ),
        }
    }

    fn fmt_slot(&self, slot: &str, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            ScopeConstraint::Any => write!(f, "{slot}"),
            ScopeConstraint::Eq(uid) => write!(f, "{slot} == {uid}"),
            ScopeConstraint::In(uid) => write!(f, "{slot} in {uid}"),
            ScopeConstraint::InSet(uids) => write!(f, "{slot} in [{}]", uids.iter().join(", ")),
            ScopeConstraint::Is(ty) => write!(f, "{slot} is {ty}"),
            ScopeConstraint::IsIn(ty, uid) => write!(f, "{slot} is {ty} in {uid}"),
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, StrumDisplay, EnumString,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ClauseKind {
    When,
    Unless,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Clause {
    pub kind: ClauseKind,
    pub body: Expr,
}

/// 1-based position of a policy in its source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SourceLoc {
    pub line: usize,
    pub column: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Policy {
    id: String,
    effect: Effect,
    principal: ScopeConstraint,
    action: ScopeConstraint,
    resource: ScopeConstraint,
    clauses: Vec<Clause>,
    condition: Expr,
    annotations: BTreeMap<String, String>,
    loc: SourceLoc,
}

impl Policy {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: impl Into<String>,
        effect: Effect,
        principal: ScopeConstraint,
        action: ScopeConstraint,
        resource: ScopeConstraint,
        clauses: Vec<Clause>,
        annotations: BTreeMap<String, String>,
        loc: SourceLoc,
    ) -> Self {
        let condition = conjunction(&clauses);
        Self {
            id: id.into(),
            effect,
            principal,
            action,
            resource,
            clauses,
            condition,
            annotations,
            loc,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn effect(&self) -> Effect {
        self.effect
    }

    pub fn principal_constraint(&self) -> &ScopeConstraint {
        &self.principal
    }

    pub fn action_constraint(&self) -> &ScopeConstraint {
        &self.action
    }

    pub fn resource_constraint(&self) -> &ScopeConstraint {
        &self.resource
    }

    pub fn clauses(&self) -> &[Clause] {
        &self.clauses
    }

    /// Conjunction of all `when` bodies and negated `unless` bodies; the
    /// literal `true` when there are no clauses.
    pub fn condition(&self) -> &Expr {
        &self.condition
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations.get(key).map(String::as_str)
    }

    pub fn annotations(&self) -> &BTreeMap<String, String> {
        &self.annotations
    }

    pub fn loc(&self) -> SourceLoc {
        self.loc
    }
}

fn conjunction(clauses: &[Clause]) -> Expr {
    clauses
        .iter()
        .map(|clause| match clause.kind {
            ClauseKind::When => clause.body.clone(),
            ClauseKind::Unless => Expr::not(clause.body.clone()),
        })
        .reduce(Expr::and)
        .unwrap_or(Expr::Literal(Value::Bool(true)))
}

impl Display for Policy {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        for (key, value) in &self.annotations {
            writeln!(f, "@{key}(\"{}\")", value.escape_debug())?;
        }
        write!(f, "{}(", self.effect)?;
        self.principal.fmt_slot("principal", f)?;
        f.write_str(", ")?;
        self.action.fmt_slot("action", f)?;
        f.write_str(", ")?;
        self.resource.fmt_slot("resource", f)?;
        f.write_str(")")?;
        for clause in &self.clauses {
            write!(f, " {} {{ {} }}", clause.kind, clause.body)?;
        }
        f.write_str(";")
    }
}
