//! The expression tree of policy conditions.
//!
//! `Expr` is a closed set of variants; the evaluator and the type checker
//! both match on it exhaustively.

use std::fmt::{Display, Formatter, Result as FmtResult};

use itertools::Itertools;
use strum_macros::{Display as StrumDisplay, EnumString};

use crate::extensions::ExtensionFunction;
use crate::types::{EntityType, Value};

use super::Pattern;

/// The four request variables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, StrumDisplay, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum Var {
    Principal,
    Action,
    Resource,
    Context,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Not,
    Neg,
    IsEmpty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Eq,
    NotEq,
    Less,
    LessEq,
    Greater,
    GreaterEq,
    Add,
    Sub,
    Mul,
    In,
    Contains,
    ContainsAll,
    ContainsAny,
}

impl BinaryOp {
    fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Eq => "==",
            BinaryOp::NotEq => "!=",
            BinaryOp::Less => "<",
            BinaryOp::LessEq => "<=",
            BinaryOp::Greater => ">",
            BinaryOp::GreaterEq => ">=",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::In => "in",
            BinaryOp::Contains => "contains",
            BinaryOp::ContainsAll => "containsAll",
            BinaryOp::ContainsAny => "containsAny",
        }
    }

    /// Set operators are written as method calls.
    fn is_method(self) -> bool {
        matches!(
            self,
            BinaryOp::Contains | BinaryOp::ContainsAll | BinaryOp::ContainsAny
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Literal(Value),
    Var(Var),
    If {
        cond: Box<Expr>,
        then_expr: Box<Expr>,
        else_expr: Box<Expr>,
    },
    /// Operands of a `&&` chain, in source order. Nested chains are
    /// flattened, so a long conjunction adds one level to the tree.
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Unary {
        op: UnaryOp,
        arg: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    GetAttr {
        expr: Box<Expr>,
        attr: String,
    },
    HasAttr {
        expr: Box<Expr>,
        attr: String,
    },
    Like {
        expr: Box<Expr>,
        pattern: Pattern,
    },
    Is {
        expr: Box<Expr>,
        entity_type: EntityType,
    },
    Set(Vec<Expr>),
    Record(Vec<(String, Expr)>),
    ExtensionCall {
        function: ExtensionFunction,
        args: Vec<Expr>,
    },
}

impl Expr {
    pub fn literal(value: impl Into<Value>) -> Self {
        Expr::Literal(value.into())
    }

    pub fn and(left: Expr, right: Expr) -> Self {
        let mut operands = match left {
            Expr::And(operands) => operands,
            other => vec![other],
        };
        match right {
            Expr::And(rest) => operands.extend(rest),
            other => operands.push(other),
        }
        Expr::And(operands)
    }

    pub fn or(left: Expr, right: Expr) -> Self {
        let mut operands = match left {
            Expr::Or(operands) => operands,
            other => vec![other],
        };
        match right {
            Expr::Or(rest) => operands.extend(rest),
            other => operands.push(other),
        }
        Expr::Or(operands)
    }

    /// Height of the tree; a leaf has depth 1.
    pub fn depth(&self) -> usize {
        let deepest_child = match self {
            Expr::Literal(_) | Expr::Var(_) => 0,
            Expr::If {
                cond,
                then_expr,
                else_expr,
            } => cond.depth().max(then_expr.depth()).max(else_expr.depth()),
            Expr::And(items) | Expr::Or(items) | Expr::Set(items) => {
                items.iter().map(Expr::depth).max().unwrap_or(0)
            }
            Expr::ExtensionCall { args, .. } => args.iter().map(Expr::depth).max().unwrap_or(0),
            Expr::Record(fields) => fields.iter().map(|(_, v)| v.depth()).max().unwrap_or(0),
            Expr::Unary { arg, .. } => arg.depth(),
            Expr::Binary { left, right, .. } => left.depth().max(right.depth()),
            Expr::GetAttr { expr, .. }
            | Expr::HasAttr { expr, .. }
            | Expr::Like { expr, .. }
            | Expr::Is { expr, .. } => expr.depth(),
        };
        deepest_child + 1
    }

    pub fn not(arg: Expr) -> Self {
        Expr::Unary {
            op: UnaryOp::Not,
            arg: Box::new(arg),
        }
    }

    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Self {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }
}

impl Display for Expr {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Expr::Literal(v) => write!(f, "{v}"),
            Expr::Var(v) => write!(f, "{v}"),
            Expr::If {
                cond,
                then_expr,
                else_expr,
            } => write!(f, "(if {cond} then {then_expr} else {else_expr})"),
            Expr::And(operands) => write!(f, "({})", operands.iter().join(" && ")),
            Expr::Or(operands) => write!(f, "({})", operands.iter().join(" || ")),
            Expr::Unary { op, arg } => match op {
                UnaryOp::Not => write!(f, "!{arg}"),
                UnaryOp::Neg => write!(f, "-{arg}"),
                UnaryOp::IsEmpty => write!(f, "{arg}.isEmpty()"),
            },
            Expr::Binary { op, left, right } if op.is_method() => {
                write!(f, "{left}.{}({right})", op.symbol())
            }
            Expr::Binary { op, left, right } => write!(f, "({left} {} {right})", op.symbol()),
            Expr::GetAttr { expr, attr } => write!(f, "{expr}[\"{}\"]", attr.escape_debug()),
            Expr::HasAttr { expr, attr } => write!(f, "({expr} has \"{}\")", attr.escape_debug()),
            Expr::Like { expr, pattern } => write!(f, "({expr} like {pattern})"),
            Expr::Is { expr, entity_type } => write!(f, "({expr} is {entity_type})"),
            Expr::Set(items) => write!(f, "[{}]", items.iter().join(", ")),
            Expr::Record(fields) => write!(
                f,
                "{{{}}}",
                fields
                    .iter()
                    .map(|(k, v)| format!("\"{}\": {v}", k.escape_debug()))
                    .join(", ")
            ),
            Expr::ExtensionCall { function, args } if function.is_constructor() => {
                write!(f, "{function}({})", args.iter().join(", "))
            }
            Expr::ExtensionCall { function, args } => match args.split_first() {
                Some((receiver, rest)) => {
                    write!(f, "{receiver}.{function}({})", rest.iter().join(", "))
                }
                None => write!(f, "{function}()"),
            },
        }
    }
}
