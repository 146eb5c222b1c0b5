//! Extra-rule loading seam
//!
//! Resolving a rule reference (a dotted path, a plugin name) into a rule
//! value is the job of a [`RuleLoader`] supplied by the driver. The registry
//! only accepts already-instantiated rules.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::rule::Rule;

/// A rule reference that could not be turned into a rule
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Failed to load rule '{reference}': {reason}")]
pub struct RuleLoadError {
    /// Reference as written in configuration
    pub reference: String,

    pub reason: String,
}

impl RuleLoadError {
    pub fn new(reference: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            reference: reference.into(),
            reason: reason.into(),
        }
    }
}

/// Resolves configured rule references into rule values
pub trait RuleLoader {
    fn load(&self, reference: &str) -> Result<Arc<dyn Rule>, RuleLoadError>;
}

/// Loader backed by rules registered in code under a reference name
#[derive(Default)]
pub struct StaticRuleLoader {
    rules: BTreeMap<String, Arc<dyn Rule>>,
}

impl StaticRuleLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `rule` available under `reference`
    pub fn with_rule(mut self, reference: impl Into<String>, rule: Arc<dyn Rule>) -> Self {
        self.rules.insert(reference.into(), rule);
        self
    }
}

impl RuleLoader for StaticRuleLoader {
    fn load(&self, reference: &str) -> Result<Arc<dyn Rule>, RuleLoadError> {
        self.rules
            .get(reference)
            .cloned()
            .ok_or_else(|| RuleLoadError::new(reference, "no rule is registered under this reference"))
    }
}
