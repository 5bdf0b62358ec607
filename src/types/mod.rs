//! Data model types: entity identifiers, values, entities, requests, and
//! the decision / validation results handed back to callers.
//!
//! Canonical string forms:
//! - Entity type: `User` or `NS::User`
//! - Entity uid: `User::"alice"` or `NS::User::"alice"` (the id is always quoted)
//! - Action: `Action::"view"` or `NS::Action::"view"`

mod decision;
mod entity;
mod entity_uid;
mod request;
mod validation;
mod value;

pub use decision::{Decision, EvaluationError, PolicyVersion, Response};
pub use entity::Entity;
pub use entity_uid::{EntityType, EntityUid};
pub use request::{Request, RequestContext};
pub use validation::{ValidationError, ValidationMode, ValidationResult};
pub use value::Value;
