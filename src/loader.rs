use crate::entities::EntityStore;
use crate::error::PolicyError;
use crate::policy_set::PolicySet;

/// Compile policy text into a `PolicySet`.
///
/// Any parse error rejects the whole text and is mapped into
/// `PolicyError::Parse`.
///
/// Example:
/// ```rust
/// use arbiter_core::compile_policy;
/// let policy_text = r#"
///     permit (principal, action, resource);
///     forbid  (principal == User::"evil", action, resource);
/// "#;
/// let set = compile_policy(policy_text).unwrap();
/// assert_eq!(set.len(), 2);
/// ```
pub fn compile_policy(text: &str) -> Result<PolicySet, PolicyError> {
    Ok(text.parse::<PolicySet>()?)
}

/// Build an entity store from its JSON list form.
pub fn compile_entities(json: &str) -> Result<EntityStore, PolicyError> {
    Ok(EntityStore::from_json_str(json)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_policy() {
        let policy_text = r#"
            permit (principal == User::"alice", action == Action::"read", resource == Document::"doc1");
            permit (principal == User::"bob", action == Action::"write", resource == Document::"doc2");
        "#;
        let policy_set = compile_policy(policy_text);
        assert!(policy_set.is_ok());
        let policy_set = policy_set.unwrap();
        assert_eq!(policy_set.len(), 2);
    }

    #[test]
    fn test_compile_policy_rejects_whole_text() {
        let policy_text = r#"
            permit (principal, action, resource);
            permit (principal, action, resource) when { principal.
        "#;
        assert!(matches!(
            compile_policy(policy_text),
            Err(PolicyError::Parse(_))
        ));
    }

    #[test]
    fn test_compile_entities() {
        let store = compile_entities(r#"[{"uid": {"type": "User", "id": "a"}}]"#).unwrap();
        assert_eq!(store.len(), 1);
        assert!(matches!(
            compile_entities("[1]"),
            Err(PolicyError::Load(_))
        ));
    }
}
