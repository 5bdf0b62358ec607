//! In-memory policy representation.

mod expr;
mod pattern;
mod policy;

pub use expr::{BinaryOp, Expr, UnaryOp, Var};
pub use pattern::{Pattern, PatternElem};
pub use policy::{Clause, ClauseKind, Effect, Policy, ScopeConstraint, SourceLoc};
