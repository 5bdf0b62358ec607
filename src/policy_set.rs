use std::collections::HashMap;
use std::str::FromStr;

use crate::ast::Policy;
use crate::error::ParseError;
use crate::parser;

/// An ordered collection of policies, addressable by id.
#[derive(Debug, Clone, Default)]
pub struct PolicySet {
    policies: Vec<Policy>,
    index: HashMap<String, usize>,
}

impl PolicySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a policy. A policy whose id is already present is rejected.
    pub fn add(&mut self, policy: Policy) -> Result<(), ParseError> {
        if self.index.contains_key(policy.id()) {
            let loc = policy.loc();
            return Err(ParseError::new(
                loc.line,
                loc.column,
                format!("duplicate policy id `{}`", policy.id()),
            )
            .in_policy(Some(policy.id())));
        }
        self.index.insert(policy.id().to_string(), self.policies.len());
        self.policies.push(policy);
        Ok(())
    }

    pub fn policy(&self, id: &str) -> Option<&Policy> {
        self.index.get(id).map(|&idx| &self.policies[idx])
    }

    /// Policies in source order.
    pub fn policies(&self) -> impl Iterator<Item = &Policy> {
        self.policies.iter()
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}

impl FromStr for PolicySet {
    type Err = ParseError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let mut set = PolicySet::new();
        for policy in parser::parse_policies(text)? {
            set.add(policy)?;
        }
        Ok(set)
    }
}
