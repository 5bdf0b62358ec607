//! Schema-based validation of policy sets.
//!
//! For every policy the validator derives the request environments it could
//! apply to (principal type, action, resource type, context) from its scope
//! and the schema's `appliesTo` declarations, then type checks the condition
//! once per environment. Findings are either definite errors or strict-only
//! warnings; `ValidationMode::Permissive` reports only the former.

mod typecheck;
mod types;

use std::collections::BTreeSet;

use itertools::Itertools;
use tracing::debug;

use crate::ast::{Policy, ScopeConstraint};
use crate::policy_set::PolicySet;
use crate::schema::{ActionDef, Schema};
use crate::types::{EntityType, EntityUid, ValidationError, ValidationMode, ValidationResult};

use typecheck::{Finding, RequestEnv, Severity, TypeChecker};

pub use types::{AttrType, EntityLub, Type};

/// Validate every policy in `policies` against `schema`.
pub fn validate(policies: &PolicySet, schema: &Schema, mode: ValidationMode) -> ValidationResult {
    let errors: Vec<ValidationError> = policies
        .policies()
        .flat_map(|policy| {
            validate_policy(policy, schema)
                .into_iter()
                .filter(|finding| {
                    mode == ValidationMode::Strict || finding.severity == Severity::Definite
                })
                .map(|finding| ValidationError {
                    policy_id: policy.id().to_string(),
                    note: finding.note,
                })
        })
        .collect();

    debug!(
        event = "Validate",
        mode = %mode,
        policies = policies.len(),
        errors = errors.len()
    );
    ValidationResult::from_errors(errors)
}

fn validate_policy(policy: &Policy, schema: &Schema) -> Vec<Finding> {
    let mut findings = scope_names(policy, schema);
    let all_declared = findings.is_empty();

    let envs = request_envs(policy, schema);
    if envs.is_empty() {
        let constrained = [
            policy.principal_constraint(),
            policy.action_constraint(),
            policy.resource_constraint(),
        ]
        .iter()
        .any(|c| !matches!(c, ScopeConstraint::Any));
        let note = "unable to find an applicable action given the policy scope constraints";
        findings.push(if all_declared && constrained {
            Finding::definite(note)
        } else {
            Finding::strict(note)
        });
    }

    for env in &envs {
        findings.extend(TypeChecker::new(schema, env).check_condition(policy.condition()));
    }
    findings.into_iter().unique().collect()
}

/// Undeclared entity types and actions named in the scope.
fn scope_names(policy: &Policy, schema: &Schema) -> Vec<Finding> {
    let mut findings = Vec::new();
    for constraint in [policy.principal_constraint(), policy.resource_constraint()] {
        let named_types = constraint
            .uids()
            .into_iter()
            .map(EntityUid::entity_type)
            .chain(match constraint {
                ScopeConstraint::Is(ty) | ScopeConstraint::IsIn(ty, _) => Some(ty),
                _ => None,
            });
        for ty in named_types {
            if !schema.is_known_entity_type(ty) {
                findings.push(Finding::strict(format!("undeclared entity type `{ty}`")));
            }
        }
    }
    for uid in policy.action_constraint().uids() {
        if schema.action(uid).is_none() {
            findings.push(Finding::strict(format!("undeclared action {uid}")));
        }
    }
    findings
}

fn request_envs<'a>(policy: &Policy, schema: &'a Schema) -> Vec<RequestEnv<'a>> {
    candidate_actions(policy.action_constraint(), schema)
        .into_iter()
        .filter_map(|action| Some((action, action.applies_to.as_ref()?)))
        .flat_map(|(action, applies)| {
            let principals = candidate_types(
                policy.principal_constraint(),
                &applies.principal_types,
                schema,
            );
            let resources =
                candidate_types(policy.resource_constraint(), &applies.resource_types, schema);
            principals
                .into_iter()
                .cartesian_product(resources)
                .map(move |(principal, resource)| RequestEnv {
                    principal: principal.clone(),
                    action: &action.uid,
                    resource: resource.clone(),
                    context: applies.context.as_ref(),
                })
        })
        .collect()
}

fn candidate_actions<'a>(constraint: &ScopeConstraint, schema: &'a Schema) -> Vec<&'a ActionDef> {
    let uids: BTreeSet<&EntityUid> = match constraint {
        ScopeConstraint::Any => return schema.actions().collect(),
        ScopeConstraint::Eq(uid) => BTreeSet::from([uid]),
        ScopeConstraint::In(uid) => schema.actions_in(uid),
        ScopeConstraint::InSet(uids) => {
            uids.iter().flat_map(|uid| schema.actions_in(uid)).collect()
        }
        // `is` is rejected in the action slot by the parser.
        ScopeConstraint::Is(_) | ScopeConstraint::IsIn(..) => return Vec::new(),
    };
    uids.into_iter().filter_map(|uid| schema.action(uid)).collect()
}

/// Types from `allowed` that a principal or resource satisfying
/// `constraint` could have.
fn candidate_types<'a>(
    constraint: &ScopeConstraint,
    allowed: &'a BTreeSet<EntityType>,
    schema: &Schema,
) -> Vec<&'a EntityType> {
    allowed
        .iter()
        .filter(|ty| match constraint {
            ScopeConstraint::Any => true,
            ScopeConstraint::Eq(uid) => uid.entity_type() == *ty,
            ScopeConstraint::In(uid) => schema.can_be_in(ty, uid.entity_type()),
            ScopeConstraint::InSet(uids) => {
                uids.iter().any(|uid| schema.can_be_in(ty, uid.entity_type()))
            }
            ScopeConstraint::Is(is_ty) => is_ty == *ty,
            ScopeConstraint::IsIn(is_ty, uid) => {
                is_ty == *ty && schema.can_be_in(ty, uid.entity_type())
            }
        })
        .collect()
}
