//! Validation modes and results.

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};
use utoipa::ToSchema;

/// How strictly the validator treats findings that are not definite type errors.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema, Display, EnumString,
)]
pub enum ValidationMode {
    Strict,
    Permissive,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ValidationError {
    pub policy_id: String,
    pub note: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct ValidationResult {
    pub passed: bool,
    pub errors: Vec<ValidationError>,
}

impl ValidationResult {
    pub fn from_errors(errors: Vec<ValidationError>) -> Self {
        Self {
            passed: errors.is_empty(),
            errors,
        }
    }

    /// Errors belonging to one policy.
    pub fn errors_for<'a>(
        &'a self,
        policy_id: &'a str,
    ) -> impl Iterator<Item = &'a ValidationError> {
        self.errors.iter().filter(move |e| e.policy_id == policy_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_mode_from_str() {
        assert_eq!("Strict".parse::<ValidationMode>().unwrap(), ValidationMode::Strict);
        assert_eq!(
            "Permissive".parse::<ValidationMode>().unwrap(),
            ValidationMode::Permissive
        );
        assert!("Lenient".parse::<ValidationMode>().is_err());
    }

    #[test]
    fn test_validation_result_serializes_like_the_wire_format() {
        let result = ValidationResult::from_errors(vec![]);
        assert_eq!(
            serde_json::to_string(&result).unwrap(),
            r#"{"passed":true,"errors":[]}"#
        );

        let failed = ValidationResult::from_errors(vec![ValidationError {
            policy_id: "policy0".to_string(),
            note: "unrecognized entity type `Banana`".to_string(),
        }]);
        assert!(!failed.passed);
        assert_eq!(failed.errors_for("policy0").count(), 1);
        assert_eq!(failed.errors_for("policy1").count(), 0);
    }
}
