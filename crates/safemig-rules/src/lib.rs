//! Deployment-safety rules for schema migrations
//!
//! This crate handles:
//! - The `Rule` trait and the context rules see
//! - The rule registry, per-run rule resolution and extra-rule loading
//! - The built-in rules SM001-SM036
//!
//! IMPORTANT: rule ids and default severities are part of the public
//! contract (suppression directives and baselines refer to them).

pub mod add_field;
pub mod alter_field;
pub mod constraints;
mod fields;
pub mod graph;
pub mod indexes;
pub mod loader;
pub mod models;
pub mod registry;
pub mod remove_field;
pub mod rule;
pub mod run_python;
pub mod run_sql;

use std::sync::Arc;

pub use loader::{RuleLoadError, RuleLoader, StaticRuleLoader};
pub use registry::{ActiveRule, ActiveRuleSet, RegistryError, RuleInfo, RuleRegistry};
pub use rule::{Category, Dialects, Finding, MigrationContext, Rule, RuleSettings};

/// The built-in rules, in id order
pub fn builtin_rules() -> Vec<Arc<dyn Rule>> {
    vec![
        Arc::new(add_field::NotNullWithoutDefault),
        Arc::new(remove_field::DropColumn),
        Arc::new(remove_field::DropTable),
        Arc::new(alter_field::AlterColumnType),
        Arc::new(add_field::AddForeignKeyValidates),
        Arc::new(alter_field::RenameColumn),
        Arc::new(run_sql::RunSqlWithoutReverse),
        Arc::new(run_python::LargeDataMigration),
        Arc::new(constraints::AddUniqueConstraint),
        Arc::new(indexes::UnsafeIndexCreation),
        Arc::new(constraints::UnsafeUniqueConstraint),
        Arc::new(run_sql::EnumAddValueInTransaction),
        Arc::new(alter_field::AlterVarcharLength),
        Arc::new(alter_field::RenameModel),
        Arc::new(constraints::AlterUniqueTogether),
        Arc::new(run_python::RunPythonWithoutReverse),
        Arc::new(constraints::AddCheckConstraint),
        Arc::new(indexes::ConcurrentInAtomic),
        Arc::new(models::ReservedKeywordColumn),
        Arc::new(alter_field::AlterToNotNull),
        Arc::new(alter_field::AlterToUnique),
        Arc::new(add_field::SlowCallableDefault),
        Arc::new(add_field::ManyToManyJoinTable),
        Arc::new(run_sql::SqlInterpolation),
        Arc::new(add_field::ForeignKeyWithoutIndex),
        Arc::new(run_python::UnbatchedDataMigration),
        Arc::new(graph::MissingMergeMigration),
        Arc::new(models::SmallAutoPrimaryKey),
        Arc::new(alter_field::DropNotNull),
        Arc::new(indexes::UnsafeIndexRemoval),
        Arc::new(add_field::PreferTextField),
        Arc::new(add_field::NaiveDateTimeField),
        Arc::new(add_field::NotNullWithDefault),
        Arc::new(models::SerialAutoField),
        Arc::new(run_sql::DdlWithoutLockTimeout),
        Arc::new(run_sql::CreateTableWithoutIfNotExists),
    ]
}


#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeSet;

    #[test]
    fn builtin_ids_are_unique_and_ordered() {
        let ids: Vec<String> = builtin_rules().iter().map(|r| r.id().to_string()).collect();
        let unique: BTreeSet<&String> = ids.iter().collect();
        assert_eq!(unique.len(), ids.len());

        let expected: Vec<String> = (1..=36).map(|n| format!("SM{:03}", n)).collect();
        assert_eq!(ids, expected);
    }
}
