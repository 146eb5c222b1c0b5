//! Rules for destructive operations (dropping columns and tables)

use safemig_core::{Operation, OperationKind, Severity};

use crate::fields::field_name;
use crate::rule::{Category, Finding, MigrationContext, Rule};

/// SM002: column dropped
pub struct DropColumn;

impl Rule for DropColumn {
    fn id(&self) -> &str {
        "SM002"
    }

    fn default_severity(&self) -> Severity {
        Severity::Warning
    }

    fn description(&self) -> &str {
        "Dropping column breaks code still reading it"
    }

    fn categories(&self) -> &[Category] {
        &[Category::SchemaChanges, Category::Destructive]
    }

    fn applies_to(&self, kind: &OperationKind) -> bool {
        *kind == OperationKind::RemoveField
    }

    fn check(&self, op: &Operation, _ctx: &MigrationContext<'_>) -> Option<Finding> {
        Some(Finding::new(format!(
            "Removing field '{}' from '{}' drops the column while running code may still read it",
            field_name(op),
            op.target.model
        )))
    }

    fn suggestion(&self, _op: &Operation) -> Option<String> {
        Some(
            "Safe pattern for removing a column:\n\
             1. Stop reading and writing the field in code and deploy.\n\
             2. Remove the field from the model with SeparateDatabaseAndState if needed.\n\
             3. Drop the column in a later release."
                .to_string(),
        )
    }
}

/// SM003: table dropped
pub struct DropTable;

impl Rule for DropTable {
    fn id(&self) -> &str {
        "SM003"
    }

    fn default_severity(&self) -> Severity {
        Severity::Warning
    }

    fn description(&self) -> &str {
        "Dropping table breaks code still using it"
    }

    fn categories(&self) -> &[Category] {
        &[Category::SchemaChanges, Category::Destructive, Category::HighRisk]
    }

    fn applies_to(&self, kind: &OperationKind) -> bool {
        *kind == OperationKind::DeleteModel
    }

    fn check(&self, op: &Operation, _ctx: &MigrationContext<'_>) -> Option<Finding> {
        Some(Finding::new(format!(
            "Deleting model '{}' drops its table and all of its data",
            op.target.model
        )))
    }

    fn suggestion(&self, _op: &Operation) -> Option<String> {
        Some("Remove all references to the model and deploy before dropping the table in a later release.".to_string())
    }
}
