// src/lib.rs
pub use engine::{EngineSnapshot, PolicyEngine, PolicyEngineBuilder, PolicySnapshot};
pub use entities::EntityStore;
pub use error::{EvalError, LoadError, ParseError, PolicyError, SchemaError};
pub use evaluator::{Authorizer, is_authorized};
pub use loader::{compile_entities, compile_policy};
pub use policy_set::PolicySet;
pub use schema::Schema;
pub use types::{
    Decision, Entity, EntityType, EntityUid, EvaluationError, PolicyVersion, Request,
    RequestContext, Response, ValidationError, ValidationMode, ValidationResult, Value,
};
pub use validator::validate;

pub mod ast;
pub mod extensions;
pub mod parser;
pub mod schema;
pub mod types;
pub mod validator;

#[cfg(feature = "observability")]
pub mod metrics;

mod engine;
mod entities;
mod error;
mod evaluator;
mod loader;
mod policy_set;
mod timers;
