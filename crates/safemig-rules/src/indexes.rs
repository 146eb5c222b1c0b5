//! Rules for index operations

use safemig_core::{Dialect, Operation, OperationKind, Severity};

use crate::rule::{Category, Dialects, Finding, MigrationContext, Rule};
use crate::run_sql::{mentions_concurrently, sql_text};

fn index_name(op: &Operation) -> &str {
    op.attr_str("name").unwrap_or("unnamed")
}

fn is_concurrent(op: &Operation) -> bool {
    op.attr_bool("concurrently").unwrap_or(false)
}

/// SM010: index built without CONCURRENTLY
pub struct UnsafeIndexCreation;

impl Rule for UnsafeIndexCreation {
    fn id(&self) -> &str {
        "SM010"
    }

    fn default_severity(&self) -> Severity {
        Severity::Error
    }

    fn description(&self) -> &str {
        "Creating index without CONCURRENTLY blocks writes"
    }

    fn categories(&self) -> &[Category] {
        &[Category::Indexes, Category::Locking, Category::Postgresql]
    }

    fn dialects(&self) -> Dialects {
        Dialects::Only(&[Dialect::Postgresql])
    }

    fn applies_to(&self, kind: &OperationKind) -> bool {
        *kind == OperationKind::AddIndex
    }

    fn check(&self, op: &Operation, ctx: &MigrationContext<'_>) -> Option<Finding> {
        if is_concurrent(op) || ctx.model_created_earlier(&op.target.model) {
            return None;
        }

        Some(Finding::new(format!(
            "Creating index '{}' on '{}' without CONCURRENTLY blocks writes for the whole build",
            index_name(op),
            op.target.model
        )))
    }

    fn suggestion(&self, _op: &Operation) -> Option<String> {
        Some(
            "Use AddIndexConcurrently from django.contrib.postgres.operations in a migration \
             with atomic = False."
                .to_string(),
        )
    }
}

/// SM018: concurrent operation inside a transaction
pub struct ConcurrentInAtomic;

impl ConcurrentInAtomic {
    fn is_concurrent_op(op: &Operation) -> bool {
        match op.kind {
            OperationKind::AddIndexConcurrently | OperationKind::RemoveIndexConcurrently => true,
            OperationKind::AddIndex | OperationKind::RemoveIndex => is_concurrent(op),
            OperationKind::RunSql => sql_text(op).map_or(false, |sql| mentions_concurrently(&sql)),
            _ => false,
        }
    }
}

impl Rule for ConcurrentInAtomic {
    fn id(&self) -> &str {
        "SM018"
    }

    fn default_severity(&self) -> Severity {
        Severity::Error
    }

    fn description(&self) -> &str {
        "Concurrent index operation cannot run inside a transaction"
    }

    fn categories(&self) -> &[Category] {
        &[Category::Indexes, Category::Postgresql, Category::HighRisk]
    }

    fn dialects(&self) -> Dialects {
        Dialects::Only(&[Dialect::Postgresql])
    }

    fn applies_to(&self, kind: &OperationKind) -> bool {
        matches!(
            kind,
            OperationKind::AddIndexConcurrently
                | OperationKind::RemoveIndexConcurrently
                | OperationKind::AddIndex
                | OperationKind::RemoveIndex
                | OperationKind::RunSql
        )
    }

    fn check(&self, op: &Operation, ctx: &MigrationContext<'_>) -> Option<Finding> {
        if !ctx.is_atomic() || !Self::is_concurrent_op(op) {
            return None;
        }

        Some(Finding::new(format!(
            "{} runs CONCURRENTLY but migration '{}' is atomic; PostgreSQL rejects it inside a transaction",
            op.describe(),
            ctx.migration.name
        )))
    }

    fn suggestion(&self, _op: &Operation) -> Option<String> {
        Some("Set atomic = False on the Migration class and keep only the concurrent operation in it.".to_string())
    }
}

/// SM030: index dropped without CONCURRENTLY
pub struct UnsafeIndexRemoval;

impl Rule for UnsafeIndexRemoval {
    fn id(&self) -> &str {
        "SM030"
    }

    fn default_severity(&self) -> Severity {
        Severity::Error
    }

    fn description(&self) -> &str {
        "Dropping index without CONCURRENTLY blocks reads and writes"
    }

    fn categories(&self) -> &[Category] {
        &[Category::Indexes, Category::Locking, Category::Postgresql]
    }

    fn dialects(&self) -> Dialects {
        Dialects::Only(&[Dialect::Postgresql])
    }

    fn applies_to(&self, kind: &OperationKind) -> bool {
        *kind == OperationKind::RemoveIndex
    }

    fn check(&self, op: &Operation, _ctx: &MigrationContext<'_>) -> Option<Finding> {
        if is_concurrent(op) {
            return None;
        }

        Some(Finding::new(format!(
            "Dropping index '{}' on '{}' without CONCURRENTLY takes an exclusive lock on the table",
            index_name(op),
            op.target.model
        )))
    }

    fn suggestion(&self, _op: &Operation) -> Option<String> {
        Some("Use RemoveIndexConcurrently in a migration with atomic = False.".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{run, run_in};
    use safemig_core::Migration;

    #[test]
    fn add_index_requires_concurrently() {
        let op = Operation::new("AddIndex", "order", None).with_attr("name", "order_created_idx");
        assert!(run(&UnsafeIndexCreation, op.clone()).is_some());
        assert!(run(&UnsafeIndexCreation, op.with_attr("concurrently", true)).is_none());
    }

    #[test]
    fn add_index_on_new_table_is_fine() {
        let migration = Migration::new("shop", "0001_initial")
            .with_operation(Operation::new("CreateModel", "Order", None))
            .with_operation(Operation::new("AddIndex", "order", None));
        assert!(run_in(&UnsafeIndexCreation, &migration, 1, Some(Dialect::Postgresql)).is_none());
    }

    #[test]
    fn concurrent_index_in_atomic_migration() {
        let op = Operation::new("AddIndexConcurrently", "order", None);

        let atomic = Migration::new("shop", "0005").with_operation(op.clone());
        assert!(run_in(&ConcurrentInAtomic, &atomic, 0, Some(Dialect::Postgresql)).is_some());

        let non_atomic = Migration::new("shop", "0005").with_atomic(false).with_operation(op);
        assert!(run_in(&ConcurrentInAtomic, &non_atomic, 0, Some(Dialect::Postgresql)).is_none());
    }

    #[test]
    fn concurrent_run_sql_in_atomic_migration() {
        let op = Operation::new("RunSQL", "", None)
            .with_attr("sql", "CREATE INDEX CONCURRENTLY idx ON shop_order (created);");
        assert!(run(&ConcurrentInAtomic, op).is_some());

        let op = Operation::new("RunSQL", "", None).with_attr("sql", "CREATE INDEX idx ON shop_order (created);");
        assert!(run(&ConcurrentInAtomic, op).is_none());
    }

    #[test]
    fn remove_index() {
        let op = Operation::new("RemoveIndex", "order", None).with_attr("name", "order_created_idx");
        assert!(run(&UnsafeIndexRemoval, op).is_some());
        assert!(run(&UnsafeIndexRemoval, Operation::new("RemoveIndexConcurrently", "order", None)).is_none());
    }
}
