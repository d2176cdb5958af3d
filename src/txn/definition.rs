//! Transaction definitions.
//!
//! Propagation, isolation and timeout are carried for callers that implement
//! those policies; the manager itself only acts on `read_only`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Propagation {
    #[default]
    Required,
    Supports,
    Mandatory,
    RequiresNew,
    NotSupported,
    Never,
    Nested,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionDefinition {
    pub name: Option<String>,
    pub read_only: bool,
    pub propagation: Propagation,
    pub isolation: Option<IsolationLevel>,
    pub timeout_secs: Option<u32>,
}

impl TransactionDefinition {
    pub fn new() -> Self {
        Self::default()
    }

    /// A read-only definition with default propagation.
    pub fn read_only() -> Self {
        Self {
            read_only: true,
            ..Self::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    pub fn with_propagation(mut self, propagation: Propagation) -> Self {
        self.propagation = propagation;
        self
    }

    pub fn with_isolation(mut self, isolation: IsolationLevel) -> Self {
        self.isolation = Some(isolation);
        self
    }

    pub fn with_timeout(mut self, timeout_secs: u32) -> Self {
        self.timeout_secs = Some(timeout_secs);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_definition() {
        let def = TransactionDefinition::new();
        assert!(!def.read_only);
        assert_eq!(def.propagation, Propagation::Required);
        assert!(def.isolation.is_none());
    }

    #[test]
    fn test_builder() {
        let def = TransactionDefinition::read_only()
            .with_name("report")
            .with_propagation(Propagation::RequiresNew)
            .with_isolation(IsolationLevel::Serializable)
            .with_timeout(5);
        assert!(def.read_only);
        assert_eq!(def.name.as_deref(), Some("report"));
        assert_eq!(def.propagation, Propagation::RequiresNew);
        assert_eq!(def.isolation, Some(IsolationLevel::Serializable));
        assert_eq!(def.timeout_secs, Some(5));
    }
}
