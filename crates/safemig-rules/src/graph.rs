//! SM027: divergent migration history
//!
//! This rule is evaluated over the migration graph, not per operation. It is
//! registered like any other rule so it can be disabled or have its severity
//! overridden; the graph pass builds the issue with [`divergent_leaves_issue`].

use safemig_core::{Issue, Operation, OperationKind, Severity};

use crate::rule::{Category, Finding, MigrationContext, Rule};

pub const RULE_ID: &str = "SM027";

/// SM027: more than one leaf migration in an app
pub struct MissingMergeMigration;

impl Rule for MissingMergeMigration {
    fn id(&self) -> &str {
        RULE_ID
    }

    fn default_severity(&self) -> Severity {
        Severity::Error
    }

    fn description(&self) -> &str {
        "Multiple leaf migrations need a merge migration"
    }

    fn categories(&self) -> &[Category] {
        &[Category::HighRisk]
    }

    fn applies_to(&self, _kind: &OperationKind) -> bool {
        false
    }

    fn check(&self, _op: &Operation, _ctx: &MigrationContext<'_>) -> Option<Finding> {
        None
    }

    fn suggestion(&self, _op: &Operation) -> Option<String> {
        Some(merge_suggestion())
    }
}

fn merge_suggestion() -> String {
    "Create a merge migration with `makemigrations --merge` and check the merged operations for conflicts."
        .to_string()
}

/// App-level issue naming every leaf of a divergent app
///
/// `leaves` must be sorted; the joined list is the issue's stable key.
pub fn divergent_leaves_issue(app: &str, leaves: &[String], severity: Severity) -> Issue {
    let joined = leaves.join(", ");
    Issue::new(
        RULE_ID,
        severity,
        app,
        format!("App '{}' has {} leaf migrations: {}", app, leaves.len(), joined),
    )
    .with_suggestion(Some(merge_suggestion()))
    .structural(leaves.join(","))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_matches_operations() {
        assert!(!MissingMergeMigration.applies_to(&OperationKind::AddField));
    }

    #[test]
    fn structural_issue() {
        let leaves = vec!["0002a".to_string(), "0002b".to_string()];
        let issue = divergent_leaves_issue("blog", &leaves, Severity::Error);

        assert_eq!(issue.rule_id, "SM027");
        assert_eq!(issue.migration, None);
        assert!(issue.operation.is_none());
        assert!(issue.message.contains("0002a, 0002b"));
        assert_eq!(issue.stable_key(), "graph:0002a,0002b");
    }
}
