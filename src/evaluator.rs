//! Expression evaluation and the authorization decision.
//!
//! A policy applies to a request when its three scope constraints hold and
//! its condition evaluates to `true`. Any applicable `forbid` denies; else
//! any applicable `permit` allows; else the request is denied by default.
//! A condition that fails to evaluate makes only that policy inapplicable,
//! and the failure is reported in the `Response`.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::ast::{BinaryOp, Effect, Expr, Policy, ScopeConstraint, UnaryOp, Var};
use crate::entities::EntityStore;
use crate::error::ExprError;
use crate::extensions::ExtensionValue;
use crate::policy_set::PolicySet;
use crate::types::{Decision, EntityUid, EvaluationError, Request, Response, Value};

/// Evaluates expressions against one request and one entity store.
pub struct Evaluator<'a> {
    request: &'a Request,
    entities: &'a EntityStore,
    context: Value,
}

impl<'a> Evaluator<'a> {
    pub fn new(request: &'a Request, entities: &'a EntityStore) -> Self {
        Self {
            request,
            entities,
            context: request.context.to_value(),
        }
    }

    /// Whether `uid` satisfies a scope constraint.
    pub fn scope_matches(&self, constraint: &ScopeConstraint, uid: &EntityUid) -> bool {
        match constraint {
            ScopeConstraint::Any => true,
            ScopeConstraint::Eq(target) => uid == target,
            ScopeConstraint::In(target) => self.entities.is_in(uid, target),
            ScopeConstraint::InSet(targets) => {
                targets.iter().any(|target| self.entities.is_in(uid, target))
            }
            ScopeConstraint::Is(ty) => uid.entity_type() == ty,
            ScopeConstraint::IsIn(ty, target) => {
                uid.entity_type() == ty && self.entities.is_in(uid, target)
            }
        }
    }

    /// Scopes hold and the condition is `true`.
    pub fn is_satisfied(&self, policy: &Policy) -> Result<bool, ExprError> {
        let in_scope = self.scope_matches(policy.principal_constraint(), &self.request.principal)
            && self.scope_matches(policy.action_constraint(), &self.request.action)
            && self.scope_matches(policy.resource_constraint(), &self.request.resource);
        if !in_scope {
            return Ok(false);
        }
        self.evaluate(policy.condition())?.as_bool()
    }

    pub fn evaluate(&self, expr: &Expr) -> Result<Value, ExprError> {
        match expr {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Var(var) => Ok(match var {
                Var::Principal => Value::EntityUid(self.request.principal.clone()),
                Var::Action => Value::EntityUid(self.request.action.clone()),
                Var::Resource => Value::EntityUid(self.request.resource.clone()),
                Var::Context => self.context.clone(),
            }),
            Expr::If {
                cond,
                then_expr,
                else_expr,
            } => {
                if self.evaluate(cond)?.as_bool()? {
                    self.evaluate(then_expr)
                } else {
                    self.evaluate(else_expr)
                }
            }
            Expr::And(operands) => {
                for operand in operands {
                    if !self.evaluate(operand)?.as_bool()? {
                        return Ok(Value::Bool(false));
                    }
                }
                Ok(Value::Bool(true))
            }
            Expr::Or(operands) => {
                for operand in operands {
                    if self.evaluate(operand)?.as_bool()? {
                        return Ok(Value::Bool(true));
                    }
                }
                Ok(Value::Bool(false))
            }
            Expr::Unary { op, arg } => {
                let arg = self.evaluate(arg)?;
                match op {
                    UnaryOp::Not => Ok(Value::Bool(!arg.as_bool()?)),
                    UnaryOp::Neg => arg
                        .as_long()?
                        .checked_neg()
                        .map(Value::Long)
                        .ok_or(ExprError::Overflow),
                    UnaryOp::IsEmpty => Ok(Value::Bool(arg.as_set()?.is_empty())),
                }
            }
            Expr::Binary { op, left, right } => {
                let left = self.evaluate(left)?;
                let right = self.evaluate(right)?;
                self.binary(*op, &left, &right)
            }
            Expr::GetAttr { expr, attr } => self.get_attr(self.evaluate(expr)?, attr),
            Expr::HasAttr { expr, attr } => match self.evaluate(expr)? {
                Value::Record(fields) => Ok(Value::Bool(fields.contains_key(attr))),
                Value::EntityUid(uid) => Ok(Value::Bool(
                    self.entities
                        .get(&uid)
                        .is_some_and(|entity| entity.attr(attr).is_some()),
                )),
                other => Err(mismatch("entity or record", &other)),
            },
            Expr::Like { expr, pattern } => {
                let value = self.evaluate(expr)?;
                Ok(Value::Bool(pattern.matches(value.as_str()?)))
            }
            Expr::Is { expr, entity_type } => {
                let value = self.evaluate(expr)?;
                Ok(Value::Bool(value.as_entity()?.entity_type() == entity_type))
            }
            Expr::Set(items) => Ok(Value::Set(
                items
                    .iter()
                    .map(|item| self.evaluate(item))
                    .collect::<Result<BTreeSet<_>, _>>()?,
            )),
            Expr::Record(fields) => Ok(Value::Record(
                fields
                    .iter()
                    .map(|(key, value)| -> Result<(String, Value), ExprError> {
                        Ok((key.clone(), self.evaluate(value)?))
                    })
                    .collect::<Result<BTreeMap<_, _>, _>>()?,
            )),
            Expr::ExtensionCall { function, args } => {
                let args = args
                    .iter()
                    .map(|arg| self.evaluate(arg))
                    .collect::<Result<Vec<_>, _>>()?;
                function.call(&args)
            }
        }
    }

    fn binary(&self, op: BinaryOp, left: &Value, right: &Value) -> Result<Value, ExprError> {
        match op {
            BinaryOp::Eq => Ok(Value::Bool(left == right)),
            BinaryOp::NotEq => Ok(Value::Bool(left != right)),
            BinaryOp::Less => compare(left, right).map(|o| Value::Bool(o.is_lt())),
            BinaryOp::LessEq => compare(left, right).map(|o| Value::Bool(o.is_le())),
            BinaryOp::Greater => compare(left, right).map(|o| Value::Bool(o.is_gt())),
            BinaryOp::GreaterEq => compare(left, right).map(|o| Value::Bool(o.is_ge())),
            BinaryOp::Add => arithmetic(left, right, i64::checked_add),
            BinaryOp::Sub => arithmetic(left, right, i64::checked_sub),
            BinaryOp::Mul => arithmetic(left, right, i64::checked_mul),
            BinaryOp::In => {
                let uid = left.as_entity()?;
                match right {
                    Value::EntityUid(target) => Ok(Value::Bool(self.entities.is_in(uid, target))),
                    Value::Set(targets) => {
                        for target in targets {
                            if self.entities.is_in(uid, target.as_entity()?) {
                                return Ok(Value::Bool(true));
                            }
                        }
                        Ok(Value::Bool(false))
                    }
                    other => Err(mismatch("entity or set of entities", other)),
                }
            }
            BinaryOp::Contains => Ok(Value::Bool(left.as_set()?.contains(right))),
            BinaryOp::ContainsAll => Ok(Value::Bool(right.as_set()?.is_subset(left.as_set()?))),
            BinaryOp::ContainsAny => Ok(Value::Bool(!left.as_set()?.is_disjoint(right.as_set()?))),
        }
    }

    fn get_attr(&self, value: Value, attr: &str) -> Result<Value, ExprError> {
        let not_found = |on: String| ExprError::AttributeNotFound {
            attr: attr.to_string(),
            on,
        };
        match value {
            Value::Record(mut fields) => fields
                .remove(attr)
                .ok_or_else(|| not_found("record".to_string())),
            Value::EntityUid(uid) => {
                let entity = self
                    .entities
                    .get(&uid)
                    .ok_or_else(|| ExprError::EntityNotFound(uid.clone()))?;
                entity
                    .attr(attr)
                    .cloned()
                    .ok_or_else(|| not_found(uid.to_string()))
            }
            other => Err(mismatch("entity or record", &other)),
        }
    }
}

fn mismatch(expected: &'static str, actual: &Value) -> ExprError {
    ExprError::TypeMismatch {
        expected,
        actual: actual.type_name(),
    }
}

fn compare(left: &Value, right: &Value) -> Result<Ordering, ExprError> {
    match (left, right) {
        (Value::Long(a), Value::Long(b)) => Ok(a.cmp(b)),
        (
            Value::Extension(ExtensionValue::Duration(a)),
            Value::Extension(ExtensionValue::Duration(b)),
        ) => Ok(a.cmp(b)),
        (Value::Long(_), other) | (Value::Extension(ExtensionValue::Duration(_)), other) => {
            Err(mismatch(left.type_name(), other))
        }
        (other, _) => Err(mismatch("long", other)),
    }
}

fn arithmetic(
    left: &Value,
    right: &Value,
    op: fn(i64, i64) -> Option<i64>,
) -> Result<Value, ExprError> {
    op(left.as_long()?, right.as_long()?)
        .map(Value::Long)
        .ok_or(ExprError::Overflow)
}

/// Runs the decision algorithm over a policy set.
#[derive(Debug, Clone, Copy, Default)]
pub struct Authorizer;

impl Authorizer {
    pub fn new() -> Self {
        Self
    }

    /// Decide a request, with the policies that determined the decision
    /// and any evaluation errors.
    pub fn is_authorized(
        &self,
        request: &Request,
        policies: &PolicySet,
        entities: &EntityStore,
    ) -> Response {
        let evaluator = Evaluator::new(request, entities);
        let mut permits = Vec::new();
        let mut forbids = Vec::new();
        let mut errors = Vec::new();

        for policy in policies.policies() {
            match evaluator.is_satisfied(policy) {
                Ok(true) => match policy.effect() {
                    Effect::Permit => permits.push(policy.id().to_string()),
                    Effect::Forbid => forbids.push(policy.id().to_string()),
                },
                Ok(false) => {}
                Err(err) => {
                    debug!(
                        event = "Request",
                        phase = "PolicyError",
                        policy = policy.id(),
                        error = err.to_string()
                    );
                    errors.push(EvaluationError {
                        policy_id: policy.id().to_string(),
                        message: err.to_string(),
                    });
                }
            }
        }

        let (decision, reasons) = if !forbids.is_empty() {
            (Decision::Deny, forbids)
        } else if !permits.is_empty() {
            (Decision::Allow, permits)
        } else {
            (Decision::Deny, Vec::new())
        };

        Response {
            decision,
            reasons,
            errors,
            version: None,
        }
    }
}

/// Decide a request: `Allow` or `Deny`, nothing else.
pub fn is_authorized(request: &Request, policies: &PolicySet, entities: &EntityStore) -> Decision {
    Authorizer::new()
        .is_authorized(request, policies, entities)
        .decision
}
