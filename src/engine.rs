use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use chrono::Utc;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::ast::Policy;
use crate::entities::EntityStore;
use crate::error::{EvalError, PolicyError};
use crate::evaluator::Authorizer;
use crate::loader;
use crate::policy_set::PolicySet;
use crate::schema::Schema;
use crate::timers::{PhaseTimer, as_millis_f64};
use crate::types::{Decision, PolicyVersion, Request, Response, ValidationMode, ValidationResult};
use crate::validator;

#[cfg(feature = "observability")]
use crate::metrics::{self, EvaluationPhases, EvaluationStats, ReloadKind};

/// A compiled policy set together with the version of the text it came from.
#[derive(Debug)]
pub struct PolicySnapshot {
    policy_set: PolicySet,
    version: PolicyVersion,
}

impl PolicySnapshot {
    fn new(policy_set: PolicySet, text: &str) -> Self {
        Self {
            policy_set,
            version: PolicyVersion {
                hash: format!("{:x}", Sha256::digest(text.as_bytes())),
                loaded_at: Utc::now().to_rfc3339(),
            },
        }
    }

    pub fn policy_set(&self) -> &PolicySet {
        &self.policy_set
    }

    pub fn version(&self) -> &PolicyVersion {
        &self.version
    }
}

/// The immutable state every call works against. Reloads publish a new
/// snapshot; snapshots already handed out never change.
#[derive(Debug, Clone)]
pub struct EngineSnapshot {
    policies: Arc<PolicySnapshot>,
    entities: Arc<EntityStore>,
}

impl EngineSnapshot {
    pub fn policies(&self) -> &PolicySnapshot {
        &self.policies
    }

    pub fn policy_set(&self) -> &PolicySet {
        &self.policies.policy_set
    }

    pub fn entities(&self) -> &EntityStore {
        &self.entities
    }

    pub fn version(&self) -> &PolicyVersion {
        &self.policies.version
    }
}

/// The main engine handle. Cloneable and thread-safe; clones share state.
///
/// `None` in the slot means the engine has been closed.
#[derive(Debug, Clone)]
pub struct PolicyEngine {
    inner: Arc<RwLock<Option<Arc<EngineSnapshot>>>>,
}

impl Default for PolicyEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PolicyEngine {
    /// An engine with no policies and no entities. Every request is denied.
    pub fn new() -> Self {
        let snapshot = EngineSnapshot {
            policies: Arc::new(PolicySnapshot::new(PolicySet::new(), "")),
            entities: Arc::new(EntityStore::empty()),
        };
        PolicyEngine {
            inner: Arc::new(RwLock::new(Some(Arc::new(snapshot)))),
        }
    }

    pub fn builder() -> PolicyEngineBuilder {
        PolicyEngineBuilder::default()
    }

    /// Replace the policy set. The text is compiled before anything is
    /// swapped, so on error the previous policies stay in force.
    pub fn set_policies(&self, policy_text: &str) -> Result<(), PolicyError> {
        let policy_set = loader::compile_policy(policy_text).inspect_err(|e| {
            warn!(event = "Reload", phase = "Policies", error = e.to_string());
        })?;
        let count = policy_set.len();
        let policies = Arc::new(PolicySnapshot::new(policy_set, policy_text));
        let version = policies.version.clone();

        self.publish(|current| EngineSnapshot {
            policies,
            entities: Arc::clone(&current.entities),
        })?;

        info!(
            event = "Reload",
            phase = "Policies",
            policies = count,
            hash = %version.hash,
            loaded_at = %version.loaded_at
        );
        #[cfg(feature = "observability")]
        metrics::record_reload(ReloadKind::Policies, count);
        Ok(())
    }

    /// Replace the entity store from its JSON list form. On error the
    /// previous entities stay in force.
    pub fn load_entities(&self, entities_json: &str) -> Result<(), PolicyError> {
        let store = loader::compile_entities(entities_json).inspect_err(|e| {
            warn!(event = "Reload", phase = "Entities", error = e.to_string());
        })?;
        let count = store.len();
        let entities = Arc::new(store);

        self.publish(|current| EngineSnapshot {
            policies: Arc::clone(&current.policies),
            entities,
        })?;

        info!(event = "Reload", phase = "Entities", entities = count);
        #[cfg(feature = "observability")]
        metrics::record_reload(ReloadKind::Entities, count);
        Ok(())
    }

    pub fn is_authorized(&self, request: &Request) -> Result<Decision, PolicyError> {
        Ok(self.authorize(request)?.decision)
    }

    /// Decide `request` against the current snapshot, returning the
    /// determining policies, per-policy errors and the policy version.
    pub fn authorize(&self, request: &Request) -> Result<Response, PolicyError> {
        let start = Instant::now();
        let mut snapshot_time = Duration::ZERO;
        let mut authorize_time = Duration::ZERO;

        debug!(
            event = "Request",
            phase = "Evaluation",
            principal = request.principal.to_string(),
            action = request.action.to_string(),
            resource = request.resource.to_string(),
            context = request.context.len()
        );

        let snapshot = {
            let _timer = PhaseTimer::new(&mut snapshot_time);
            self.current_snapshot()?
        };

        let mut response = {
            let _timer = PhaseTimer::new(&mut authorize_time);
            Authorizer::new().is_authorized(request, snapshot.policy_set(), snapshot.entities())
        };
        response.version = Some(snapshot.version().clone());

        let total = start.elapsed();
        debug!(
            event = "Request",
            phase = "Result",
            decision = %response.decision,
            reasons = ?response.reasons,
            errors = response.errors.len(),
            authorize_ms = as_millis_f64(authorize_time),
            total_ms = as_millis_f64(total)
        );

        #[cfg(feature = "observability")]
        metrics::record_evaluation(
            EvaluationStats {
                duration: total,
                allowed: response.decision.is_allow(),
                policy_errors: response.errors.len(),
                principal_id: request.principal.to_string(),
                action_id: request.action.to_string(),
            },
            Some(EvaluationPhases {
                snapshot_ms: as_millis_f64(snapshot_time),
                authorize_ms: as_millis_f64(authorize_time),
                total_ms: as_millis_f64(total),
            }),
        );

        Ok(response)
    }

    /// Decode a JSON request and decide it. Only malformed requests and a
    /// closed engine are errors; a deny is `Ok(false)`.
    pub fn is_authorized_json(&self, request_json: &str) -> Result<bool, PolicyError> {
        let request = Request::from_json_str(request_json).inspect_err(|e| {
            warn!(event = "Request", phase = "Decode", error = e.to_string());
        })?;
        Ok(self.is_authorized(&request)?.is_allow())
    }

    /// Validate the installed policies against a JSON schema.
    pub fn validate(
        &self,
        schema_json: &str,
        mode: ValidationMode,
    ) -> Result<ValidationResult, PolicyError> {
        let schema = Schema::from_json_str(schema_json).inspect_err(|e| {
            warn!(event = "Validate", phase = "Schema", error = e.to_string());
        })?;
        self.validate_with_schema(&schema, mode)
    }

    pub fn validate_with_schema(
        &self,
        schema: &Schema,
        mode: ValidationMode,
    ) -> Result<ValidationResult, PolicyError> {
        let snapshot = self.current_snapshot()?;
        let result = validator::validate(snapshot.policy_set(), schema, mode);
        if !result.passed {
            info!(
                event = "Validate",
                phase = "Result",
                mode = %mode,
                errors = result.errors.len(),
                hash = %snapshot.version().hash
            );
        }
        Ok(result)
    }

    pub fn policies(&self) -> Result<Vec<Policy>, PolicyError> {
        let snapshot = self.current_snapshot()?;
        Ok(snapshot.policy_set().policies().cloned().collect())
    }

    pub fn current_version(&self) -> Result<PolicyVersion, PolicyError> {
        Ok(self.current_snapshot()?.version().clone())
    }

    /// The snapshot in force right now. Holding it keeps that state alive
    /// across later reloads.
    pub fn current_snapshot(&self) -> Result<Arc<EngineSnapshot>, PolicyError> {
        let guard = self.inner.read()?;
        Ok(guard.as_ref().cloned().ok_or(EvalError::Closed)?)
    }

    pub fn is_closed(&self) -> bool {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    /// Release the engine's state. Idempotent; every later call except
    /// `close` and `is_closed` fails with `EvalError::Closed`.
    pub fn close(&self) -> Result<(), PolicyError> {
        let mut guard = self.inner.write()?;
        if guard.take().is_some() {
            info!(event = "Lifecycle", phase = "Closed");
        }
        Ok(())
    }

    /// Swap in the snapshot built by `next` from the current one.
    fn publish(
        &self,
        next: impl FnOnce(&EngineSnapshot) -> EngineSnapshot,
    ) -> Result<(), PolicyError> {
        let mut guard = self.inner.write()?;
        let current = guard.as_ref().ok_or(EvalError::Closed)?;
        let snapshot = next(current);
        *guard = Some(Arc::new(snapshot));
        Ok(())
    }
}

/// Programmatic configuration for a [`PolicyEngine`].
///
/// ```rust
/// use arbiter_core::PolicyEngine;
///
/// let engine = PolicyEngine::builder()
///     .with_policies(r#"permit (principal == User::"alice", action, resource);"#)
///     .with_entities_json(r#"[{"uid": {"type": "User", "id": "alice"}}]"#)
///     .build()
///     .unwrap();
/// assert_eq!(engine.policies().unwrap().len(), 1);
/// ```
#[derive(Debug, Clone, Default)]
pub struct PolicyEngineBuilder {
    policies: Option<String>,
    entities_json: Option<String>,
}

impl PolicyEngineBuilder {
    pub fn with_policies(mut self, policy_text: impl Into<String>) -> Self {
        self.policies = Some(policy_text.into());
        self
    }

    pub fn with_entities_json(mut self, entities_json: impl Into<String>) -> Self {
        self.entities_json = Some(entities_json.into());
        self
    }

    pub fn build(self) -> Result<PolicyEngine, PolicyError> {
        let engine = PolicyEngine::new();
        if let Some(text) = &self.policies {
            engine.set_policies(text)?;
        }
        if let Some(json) = &self.entities_json {
            engine.load_entities(json)?;
        }
        Ok(engine)
    }
}

#[cfg(test)]
mod tests;
