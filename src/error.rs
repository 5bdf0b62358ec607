use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::EntityUid;

/// A policy source error, located at the token where parsing stopped.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
#[error("{}line {line}, column {column}: {message}", policy_prefix(.policy_id))]
pub struct ParseError {
    /// Id of the policy being parsed, when the parser got far enough to know it.
    pub policy_id: Option<String>,
    pub line: usize,
    pub column: usize,
    pub message: String,
}

fn policy_prefix(policy_id: &Option<String>) -> String {
    match policy_id {
        Some(id) => format!("policy `{id}`, "),
        None => String::new(),
    }
}

impl ParseError {
    pub(crate) fn new(line: usize, column: usize, message: impl Into<String>) -> Self {
        Self {
            policy_id: None,
            line,
            column,
            message: message.into(),
        }
    }

    pub(crate) fn in_policy(mut self, policy_id: Option<&str>) -> Self {
        if self.policy_id.is_none() {
            self.policy_id = policy_id.map(str::to_string);
        }
        self
    }
}

/// Errors raised while building an entity store.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum LoadError {
    #[error("duplicate entity: {0}")]
    DuplicateEntity(EntityUid),

    #[error("invalid entity JSON: {0}")]
    Json(String),

    #[error("invalid entity {uid}: {message}")]
    InvalidEntity { uid: String, message: String },
}

/// Errors raised for a malformed schema document. Policy-level type
/// problems are never reported here; they end up in a `ValidationResult`.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum SchemaError {
    #[error("invalid schema JSON: {0}")]
    Json(String),

    #[error("undeclared entity type `{0}` referenced in schema")]
    UndeclaredType(String),

    #[error("undeclared action `{0}` referenced in schema")]
    UndeclaredAction(String),

    #[error("invalid type in schema: {0}")]
    InvalidType(String),

    #[error("invalid name in schema: `{0}`")]
    InvalidName(String),
}

/// Structural failures of the engine itself. A `Deny` is never an `EvalError`.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum EvalError {
    #[error("policy engine is closed")]
    Closed,

    #[error("failed to lock engine state: {0}")]
    LockPoisoned(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

/// Failure while evaluating one expression. Only ever observed as a
/// per-policy diagnostic; the policy is treated as not satisfied.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExprError {
    #[error("type error: expected {expected}, got {actual}")]
    TypeMismatch {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("attribute `{attr}` does not exist on {on}")]
    AttributeNotFound { attr: String, on: String },

    #[error("entity {0} does not exist")]
    EntityNotFound(EntityUid),

    #[error("integer overflow")]
    Overflow,

    #[error("extension error: {0}")]
    Extension(String),
}

#[derive(Debug, Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum PolicyError {
    #[error("failed to parse policy: {0}")]
    Parse(#[from] ParseError),

    #[error("failed to load entities: {0}")]
    Load(#[from] LoadError),

    #[error("invalid schema: {0}")]
    Schema(#[from] SchemaError),

    #[error("evaluation error: {0}")]
    Eval(#[from] EvalError),
}

impl<T> From<std::sync::PoisonError<T>> for PolicyError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        PolicyError::Eval(EvalError::LockPoisoned(err.to_string()))
    }
}
