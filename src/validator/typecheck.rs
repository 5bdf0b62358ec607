//! Type checking of one policy condition in one request environment.

use std::collections::BTreeSet;

use crate::ast::{BinaryOp, Expr, UnaryOp, Var};
use crate::extensions::{ExtensionReturn, ExtensionType};
use crate::schema::{RecordType, Schema};
use crate::types::{EntityType, EntityUid, Value};

use super::types::{AttrType, EntityLub, Type};

/// How sure the checker is that a finding is a real problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) enum Severity {
    /// The policy can never evaluate without an error, or never applies.
    Definite,
    /// Reported in strict mode only.
    Strict,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct Finding {
    pub severity: Severity,
    pub note: String,
}

impl Finding {
    pub fn definite(note: impl Into<String>) -> Self {
        Self {
            severity: Severity::Definite,
            note: note.into(),
        }
    }

    pub fn strict(note: impl Into<String>) -> Self {
        Self {
            severity: Severity::Strict,
            note: note.into(),
        }
    }
}

/// One concrete combination of request types a policy may be evaluated in.
#[derive(Debug, Clone)]
pub(crate) struct RequestEnv<'a> {
    pub principal: EntityType,
    pub action: &'a EntityUid,
    pub resource: EntityType,
    pub context: Option<&'a RecordType>,
}

/// `(expression, attribute)` pairs known to be present.
type Guards = BTreeSet<(String, String)>;

pub(crate) struct TypeChecker<'a> {
    schema: &'a Schema,
    env: &'a RequestEnv<'a>,
    findings: Vec<Finding>,
}

impl<'a> TypeChecker<'a> {
    pub fn new(schema: &'a Schema, env: &'a RequestEnv<'a>) -> Self {
        Self {
            schema,
            env,
            findings: Vec::new(),
        }
    }

    /// Check a whole condition, which must be a boolean.
    pub fn check_condition(mut self, condition: &Expr) -> Vec<Finding> {
        let ty = self.check(condition, &Guards::new());
        if !matches!(ty, Type::Bool | Type::Unknown) {
            self.findings.push(Finding::definite(format!(
                "policy condition must be a bool, found {ty}"
            )));
        }
        self.findings
    }

    fn check(&mut self, expr: &Expr, guards: &Guards) -> Type {
        match expr {
            Expr::Literal(value) => {
                self.check_literal_names(value);
                Type::of_value(value)
            }
            Expr::Var(var) => self.var_type(*var),
            Expr::If {
                cond,
                then_expr,
                else_expr,
            } => {
                self.expect_bool(cond, guards, "`if` condition");
                let mut then_guards = guards.clone();
                then_guards.extend(collect_guards(cond));
                let then_ty = self.check(then_expr, &then_guards);
                let else_ty = self.check(else_expr, guards);
                then_ty.lub(&else_ty).unwrap_or_else(|| {
                    self.findings.push(Finding::strict(format!(
                        "`if` branches have incompatible types {then_ty} and {else_ty}"
                    )));
                    Type::Unknown
                })
            }
            Expr::And(operands) => {
                // Each operand only runs once the ones before it were true.
                let mut operand_guards = guards.clone();
                for operand in operands {
                    self.expect_bool(operand, &operand_guards, "`&&` operand");
                    operand_guards.extend(collect_guards(operand));
                }
                Type::Bool
            }
            Expr::Or(operands) => {
                for operand in operands {
                    self.expect_bool(operand, guards, "`||` operand");
                }
                Type::Bool
            }
            Expr::Unary { op, arg } => match op {
                UnaryOp::Not => {
                    self.expect_bool(arg, guards, "`!` operand");
                    Type::Bool
                }
                UnaryOp::Neg => {
                    let ty = self.check(arg, guards);
                    self.require(&ty, matches!(ty, Type::Long), "long", "unary `-` operand");
                    Type::Long
                }
                UnaryOp::IsEmpty => {
                    let ty = self.check(arg, guards);
                    self.require(&ty, matches!(ty, Type::Set(_)), "set", "`isEmpty` receiver");
                    Type::Bool
                }
            },
            Expr::Binary { op, left, right } => {
                let left_ty = self.check(left, guards);
                let right_ty = self.check(right, guards);
                self.binary(*op, &left_ty, &right_ty)
            }
            Expr::GetAttr { expr: target, attr } => self.get_attr(target, attr, guards),
            Expr::HasAttr { expr: target, .. } => {
                if matches!(target.as_ref(), Expr::Var(Var::Context)) && self.env.context.is_none()
                {
                    return Type::Bool;
                }
                let ty = self.check(target, guards);
                self.require(
                    &ty,
                    matches!(ty, Type::Entity(_) | Type::Record { .. }),
                    "entity or record",
                    "`has` operand",
                );
                Type::Bool
            }
            Expr::Like { expr: target, .. } => {
                let ty = self.check(target, guards);
                self.require(&ty, matches!(ty, Type::String), "string", "`like` operand");
                Type::Bool
            }
            Expr::Is {
                expr: target,
                entity_type,
            } => {
                let ty = self.check(target, guards);
                self.require(&ty, matches!(ty, Type::Entity(_)), "entity", "`is` operand");
                self.check_type_name(entity_type);
                Type::Bool
            }
            Expr::Set(items) => {
                let types: Vec<Type> = items.iter().map(|item| self.check(item, guards)).collect();
                let Some((first, rest)) = types.split_first() else {
                    self.findings
                        .push(Finding::strict("empty set literal has no element type"));
                    return Type::Set(Box::new(Type::Unknown));
                };
                let element = rest
                    .iter()
                    .try_fold(first.clone(), |acc, t| acc.lub(t))
                    .unwrap_or_else(|| {
                        self.findings.push(Finding::strict(
                            "set literal elements have incompatible types",
                        ));
                        Type::Unknown
                    });
                Type::Set(Box::new(element))
            }
            Expr::Record(fields) => Type::Record {
                attrs: fields
                    .iter()
                    .map(|(name, value)| {
                        let ty = self.check(value, guards);
                        (name.clone(), AttrType { ty, required: true })
                    })
                    .collect(),
                open: false,
            },
            Expr::ExtensionCall { function, args } => {
                let arg_types: Vec<Type> =
                    args.iter().map(|arg| self.check(arg, guards)).collect();
                let expected = match function.operand_type() {
                    Some(ext) => Type::Extension(ext),
                    None => Type::String,
                };
                for ty in &arg_types {
                    if !ty.is_unknown() && *ty != expected {
                        self.findings.push(Finding::definite(format!(
                            "`{function}` expects {expected} arguments, found {ty}"
                        )));
                    }
                }
                match function.return_type() {
                    ExtensionReturn::Extension(ext) => Type::Extension(ext),
                    ExtensionReturn::Bool => Type::Bool,
                    ExtensionReturn::Long => Type::Long,
                }
            }
        }
    }

    fn var_type(&self, var: Var) -> Type {
        match var {
            Var::Principal => Type::entity(self.env.principal.clone()),
            Var::Action => Type::entity(self.env.action.entity_type().clone()),
            Var::Resource => Type::entity(self.env.resource.clone()),
            Var::Context => match self.env.context {
                Some(record) => Type::from_record(record),
                None => Type::Record {
                    attrs: Default::default(),
                    open: false,
                },
            },
        }
    }

    fn expect_bool(&mut self, expr: &Expr, guards: &Guards, what: &str) {
        let ty = self.check(expr, guards);
        self.require(&ty, matches!(ty, Type::Bool), "bool", what);
    }

    /// Record a definite finding unless `ok` holds or the type is unknown.
    fn require(&mut self, ty: &Type, ok: bool, expected: &str, what: &str) {
        if !ok && !ty.is_unknown() {
            self.findings.push(Finding::definite(format!(
                "{what} must be {expected}, found {ty}"
            )));
        }
    }

    fn binary(&mut self, op: BinaryOp, left: &Type, right: &Type) -> Type {
        match op {
            BinaryOp::Eq | BinaryOp::NotEq => {
                if !left.is_compatible(right) {
                    self.findings.push(Finding::strict(format!(
                        "comparing {left} with {right} is always {}",
                        op == BinaryOp::NotEq
                    )));
                }
                Type::Bool
            }
            BinaryOp::Less | BinaryOp::LessEq | BinaryOp::Greater | BinaryOp::GreaterEq => {
                let duration = Type::Extension(ExtensionType::Duration);
                let ok = match (left, right) {
                    (Type::Long | Type::Unknown, Type::Long | Type::Unknown) => true,
                    (Type::Unknown, t) | (t, Type::Unknown) => *t == duration,
                    (a, b) => *a == duration && *b == duration,
                };
                if !ok {
                    self.findings.push(Finding::definite(format!(
                        "comparison operands must be long or duration, found {left} and {right}"
                    )));
                }
                Type::Bool
            }
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul => {
                self.require(left, matches!(left, Type::Long), "long", "arithmetic operand");
                self.require(right, matches!(right, Type::Long), "long", "arithmetic operand");
                Type::Long
            }
            BinaryOp::In => {
                self.require(left, matches!(left, Type::Entity(_)), "entity", "`in` operand");
                let target = match right {
                    Type::Set(element) => element.as_ref(),
                    other => other,
                };
                self.require(
                    right,
                    matches!(target, Type::Entity(_) | Type::Unknown),
                    "entity or set of entities",
                    "`in` target",
                );
                self.check_membership(left, target);
                Type::Bool
            }
            BinaryOp::Contains => {
                self.require(left, matches!(left, Type::Set(_)), "set", "`contains` receiver");
                if let Type::Set(element) = left {
                    if !element.is_compatible(right) {
                        self.findings.push(Finding::strict(format!(
                            "a {left} can never contain a {right}"
                        )));
                    }
                }
                Type::Bool
            }
            BinaryOp::ContainsAll | BinaryOp::ContainsAny => {
                self.require(left, matches!(left, Type::Set(_)), "set", "set method receiver");
                self.require(right, matches!(right, Type::Set(_)), "set", "set method argument");
                Type::Bool
            }
        }
    }

    /// Flag `in` tests that no schema hierarchy can satisfy.
    fn check_membership(&mut self, left: &Type, target: &Type) {
        let (Type::Entity(EntityLub::Types(children)), Type::Entity(EntityLub::Types(ancestors))) =
            (left, target)
        else {
            return;
        };
        let possible = children.iter().any(|child| {
            ancestors
                .iter()
                .any(|ancestor| child == ancestor || self.schema.can_be_in(child, ancestor))
        });
        if !possible {
            self.findings.push(Finding::strict(format!(
                "`in` is always false: an {left} can never be a member of an {target}"
            )));
        }
    }

    fn get_attr(&mut self, target: &Expr, attr: &str, guards: &Guards) -> Type {
        if matches!(target, Expr::Var(Var::Context)) && self.env.context.is_none() {
            self.findings.push(Finding::strict(format!(
                "action {} declares no context, so `context.{attr}` does not exist",
                self.env.action
            )));
            return Type::Unknown;
        }

        let ty = self.check(target, guards);
        // Under a `has` guard for an attribute the type lacks, the access
        // is unreachable.
        let guarded = guards.contains(&(target.to_string(), attr.to_string()));
        let found = match &ty {
            Type::Unknown | Type::Entity(EntityLub::Any) => return Type::Unknown,
            Type::Record { attrs, open } => match attrs.get(attr) {
                Some(attr_ty) => attr_ty.clone(),
                None if *open || guarded => return Type::Unknown,
                None => {
                    self.findings.push(Finding::definite(format!(
                        "attribute `{attr}` not found on {ty}"
                    )));
                    return Type::Unknown;
                }
            },
            Type::Entity(EntityLub::Types(types)) => {
                match self.entity_attr(types, attr) {
                    Ok(Some(attr_ty)) => attr_ty,
                    Ok(None) => return Type::Unknown,
                    Err(_) if guarded => return Type::Unknown,
                    Err(missing_on) => {
                        self.findings.push(Finding::definite(format!(
                            "attribute `{attr}` not found on entity type `{missing_on}`"
                        )));
                        return Type::Unknown;
                    }
                }
            }
            other => {
                self.findings.push(Finding::definite(format!(
                    "attribute access on {other}; expected an entity or record"
                )));
                return Type::Unknown;
            }
        };

        if !found.required && !guarded {
            self.findings.push(Finding::strict(format!(
                "attribute `{attr}` is optional; test it with `has` before accessing it"
            )));
        }
        found.ty
    }

    /// The attribute's type across all candidate entity types. `Ok(None)`
    /// when some type has no declared shape; `Err` names a declared type
    /// that lacks the attribute.
    fn entity_attr(
        &self,
        types: &BTreeSet<EntityType>,
        attr: &str,
    ) -> Result<Option<AttrType>, EntityType> {
        let mut result: Option<AttrType> = None;
        for ty in types {
            let Some(def) = self.schema.entity_type(ty) else {
                return Ok(None);
            };
            let Some(attr_ty) = def.shape.attr(attr) else {
                return Err(ty.clone());
            };
            let attr_ty = AttrType {
                ty: Type::from_schema(&attr_ty.ty),
                required: attr_ty.required,
            };
            result = Some(match result {
                None => attr_ty,
                Some(prev) => AttrType {
                    ty: prev.ty.lub(&attr_ty.ty).unwrap_or(Type::Unknown),
                    required: prev.required && attr_ty.required,
                },
            });
        }
        Ok(result)
    }

    fn check_literal_names(&mut self, value: &Value) {
        match value {
            Value::EntityUid(uid) => self.check_uid(uid),
            Value::Set(items) => items.iter().for_each(|item| self.check_literal_names(item)),
            Value::Record(fields) => fields
                .values()
                .for_each(|field| self.check_literal_names(field)),
            _ => {}
        }
    }

    fn check_uid(&mut self, uid: &EntityUid) {
        if uid.entity_type().is_action() {
            if self.schema.action(uid).is_none() {
                self.findings
                    .push(Finding::strict(format!("undeclared action {uid}")));
            }
        } else {
            self.check_type_name(uid.entity_type());
        }
    }

    fn check_type_name(&mut self, ty: &EntityType) {
        if !self.schema.is_known_entity_type(ty) {
            self.findings
                .push(Finding::strict(format!("undeclared entity type `{ty}`")));
        }
    }
}

/// Attributes that `expr` being true proves present: `has` tests, possibly
/// joined by `&&`.
fn collect_guards(expr: &Expr) -> Guards {
    match expr {
        Expr::HasAttr { expr, attr } => Guards::from([(expr.to_string(), attr.clone())]),
        Expr::And(operands) => operands.iter().flat_map(collect_guards).collect(),
        _ => Guards::new(),
    }
}
