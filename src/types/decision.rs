//! Authorization decisions and the diagnostics that explain them.

use std::fmt::{Display, Formatter, Result as FmtResult};

use serde::{Deserialize, Serialize};
use strum_macros::{Display as StrumDisplay, EnumString};
use utoipa::ToSchema;

/// Allow or deny.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    ToSchema,
    StrumDisplay,
    EnumString,
)]
pub enum Decision {
    Allow,
    Deny,
}

impl Decision {
    pub fn is_allow(&self) -> bool {
        matches!(self, Decision::Allow)
    }
}

/// A policy whose condition failed to evaluate. The policy was treated as
/// not satisfied.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationError {
    pub policy_id: String,
    pub message: String,
}

/// The full outcome of one authorization call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct Response {
    pub decision: Decision,
    /// Policies that determined the decision: the matching forbids on a
    /// forbid-deny, the matching permits on an allow, nothing on default-deny.
    pub reasons: Vec<String>,
    pub errors: Vec<EvaluationError>,
    /// Version of the policy set the decision was made against, when it
    /// came from an engine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<PolicyVersion>,
}

impl Response {
    pub fn decision(&self) -> Decision {
        self.decision
    }
}

impl Display for Response {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        if self.reasons.is_empty() {
            write!(f, "{}", self.decision)
        } else {
            write!(f, "{}({})", self.decision, self.reasons.join(", "))
        }
    }
}

/// Version metadata for an installed policy set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
pub struct PolicyVersion {
    /// SHA-256 of the policy source text.
    pub hash: String,
    /// When this policy set was installed, RFC 3339.
    pub loaded_at: String,
}

impl Display for PolicyVersion {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{} @ {}", self.hash, self.loaded_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decision_string_forms() {
        assert_eq!(Decision::Allow.to_string(), "Allow");
        assert_eq!("Deny".parse::<Decision>().unwrap(), Decision::Deny);
        assert!(Decision::Allow.is_allow());
        assert!(!Decision::Deny.is_allow());
    }

    #[test]
    fn test_response_display() {
        let response = Response {
            decision: Decision::Deny,
            reasons: vec!["policy1".to_string()],
            errors: vec![],
            version: None,
        };
        assert_eq!(response.to_string(), "Deny(policy1)");

        let default_deny = Response {
            decision: Decision::Deny,
            reasons: vec![],
            errors: vec![],
            version: None,
        };
        assert_eq!(default_deny.to_string(), "Deny");
    }

    #[test]
    fn test_evaluation_error_serializes_camel_case() {
        let err = EvaluationError {
            policy_id: "policy0".to_string(),
            message: "boom".to_string(),
        };
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json, serde_json::json!({"policyId": "policy0", "message": "boom"}));
    }

    #[test]
    fn test_policy_version_display() {
        let version = PolicyVersion {
            hash: "abc123".to_string(),
            loaded_at: "2023-01-01T00:00:00Z".to_string(),
        };
        assert_eq!(version.to_string(), "abc123 @ 2023-01-01T00:00:00Z");
    }
}
