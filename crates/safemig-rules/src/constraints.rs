//! Rules for constraint operations

use safemig_core::{Dialect, Operation, OperationKind, Severity};

use crate::fields::field_name;
use crate::rule::{Category, Dialects, Finding, MigrationContext, Rule};

fn constraint_type(op: &Operation) -> Option<&str> {
    op.attr_str("constraint_type")
}

fn constraint_name(op: &Operation) -> &str {
    op.attr_str("name").unwrap_or("unnamed")
}

/// SM009: unique constraint on engines without online index builds
pub struct AddUniqueConstraint;

impl Rule for AddUniqueConstraint {
    fn id(&self) -> &str {
        "SM009"
    }

    fn default_severity(&self) -> Severity {
        Severity::Error
    }

    fn description(&self) -> &str {
        "Adding unique constraint locks the table while the index is built"
    }

    fn categories(&self) -> &[Category] {
        &[Category::Constraints, Category::Indexes, Category::Locking]
    }

    // PostgreSQL is covered by SM011
    fn dialects(&self) -> Dialects {
        Dialects::Only(&[Dialect::Mysql, Dialect::Sqlite, Dialect::Oracle])
    }

    fn applies_to(&self, kind: &OperationKind) -> bool {
        matches!(kind, OperationKind::AddConstraint | OperationKind::AddField)
    }

    fn check(&self, op: &Operation, ctx: &MigrationContext<'_>) -> Option<Finding> {
        match op.kind {
            OperationKind::AddConstraint if constraint_type(op) == Some("unique") => {
                Some(Finding::new(format!(
                    "Adding unique constraint '{}' on '{}' builds an index while locking the table",
                    constraint_name(op),
                    op.target.model
                )))
            }
            OperationKind::AddField if op.attr_bool("unique") == Some(true) => {
                if ctx.model_created_earlier(&op.target.model) {
                    return None;
                }
                Some(Finding::new(format!(
                    "Adding unique field '{}' to '{}' builds an index while locking the table",
                    field_name(op),
                    op.target.model
                )))
            }
            _ => None,
        }
    }

    fn suggestion(&self, _op: &Operation) -> Option<String> {
        Some("Build the unique index in a maintenance window or with an online schema change tool.".to_string())
    }
}

/// SM011: unique constraint on PostgreSQL without a prebuilt index
pub struct UnsafeUniqueConstraint;

impl Rule for UnsafeUniqueConstraint {
    fn id(&self) -> &str {
        "SM011"
    }

    fn default_severity(&self) -> Severity {
        Severity::Error
    }

    fn description(&self) -> &str {
        "Adding unique constraint without concurrent index blocks writes"
    }

    fn categories(&self) -> &[Category] {
        &[Category::Constraints, Category::Indexes, Category::Locking, Category::Postgresql]
    }

    fn dialects(&self) -> Dialects {
        Dialects::Only(&[Dialect::Postgresql])
    }

    fn applies_to(&self, kind: &OperationKind) -> bool {
        *kind == OperationKind::AddConstraint
    }

    fn check(&self, op: &Operation, _ctx: &MigrationContext<'_>) -> Option<Finding> {
        if constraint_type(op) != Some("unique") {
            return None;
        }

        Some(Finding::new(format!(
            "Adding unique constraint '{}' on '{}' builds its index while blocking writes",
            constraint_name(op),
            op.target.model
        )))
    }

    fn suggestion(&self, _op: &Operation) -> Option<String> {
        Some(
            "Safe pattern for a unique constraint:\n\
             1. CREATE UNIQUE INDEX CONCURRENTLY ... in a migration with atomic = False.\n\
             2. ALTER TABLE ... ADD CONSTRAINT ... UNIQUE USING INDEX ... in a following migration."
                .to_string(),
        )
    }
}

/// SM015: unique_together change
pub struct AlterUniqueTogether;

impl Rule for AlterUniqueTogether {
    fn id(&self) -> &str {
        "SM015"
    }

    fn default_severity(&self) -> Severity {
        Severity::Warning
    }

    fn description(&self) -> &str {
        "Changing unique_together builds a unique index with a lock"
    }

    fn categories(&self) -> &[Category] {
        &[Category::Constraints, Category::Indexes, Category::Locking]
    }

    fn applies_to(&self, kind: &OperationKind) -> bool {
        *kind == OperationKind::AlterUniqueTogether
    }

    fn check(&self, op: &Operation, ctx: &MigrationContext<'_>) -> Option<Finding> {
        if ctx.model_created_earlier(&op.target.model) {
            return None;
        }

        Some(Finding::new(format!(
            "Changing unique_together on '{}' builds a unique index while locking the table",
            op.target.model
        )))
    }

    fn suggestion(&self, _op: &Operation) -> Option<String> {
        Some("Prefer Meta.constraints with UniqueConstraint, backed by an index built concurrently.".to_string())
    }
}

/// SM017: CHECK constraint
pub struct AddCheckConstraint;

impl Rule for AddCheckConstraint {
    fn id(&self) -> &str {
        "SM017"
    }

    fn default_severity(&self) -> Severity {
        Severity::Warning
    }

    fn description(&self) -> &str {
        "Adding check constraint validates all existing rows"
    }

    fn categories(&self) -> &[Category] {
        &[Category::Constraints, Category::Locking]
    }

    fn applies_to(&self, kind: &OperationKind) -> bool {
        *kind == OperationKind::AddConstraint
    }

    fn check(&self, op: &Operation, _ctx: &MigrationContext<'_>) -> Option<Finding> {
        if constraint_type(op) != Some("check") {
            return None;
        }

        Some(Finding::new(format!(
            "Adding check constraint '{}' on '{}' scans every row while holding a lock",
            constraint_name(op),
            op.target.model
        )))
    }

    fn suggestion(&self, _op: &Operation) -> Option<String> {
        Some(
            "Add the constraint with NOT VALID via RunSQL, then run VALIDATE CONSTRAINT in a separate migration."
                .to_string(),
        )
    }
}
