//! Rules for AlterField and rename operations
//!
//! When the loader supplies a `previous` object (the field's prior
//! definition), before/after rules compare against it. Without it they fall
//! back to conservative checks on the new definition alone.

use serde_json::Value;

use safemig_core::{Dialect, Operation, OperationKind, Severity};

use crate::fields::{field_name, field_type, is_nullable, previous};
use crate::rule::{Category, Dialects, Finding, MigrationContext, Rule};

/// Types whose ALTER never needs a rewrite when unchanged in kind
const CHEAP_TYPES: [&str; 3] = ["TextField", "BooleanField", "NullBooleanField"];

fn previous_bool(op: &Operation, key: &str) -> Option<bool> {
    previous(op, key).and_then(Value::as_bool)
}

/// SM004: column type may change
pub struct AlterColumnType;

impl Rule for AlterColumnType {
    fn id(&self) -> &str {
        "SM004"
    }

    fn default_severity(&self) -> Severity {
        Severity::Warning
    }

    fn description(&self) -> &str {
        "Changing column type may rewrite table and lock it"
    }

    fn categories(&self) -> &[Category] {
        &[Category::SchemaChanges, Category::Locking]
    }

    fn applies_to(&self, kind: &OperationKind) -> bool {
        *kind == OperationKind::AlterField
    }

    fn check(&self, op: &Operation, _ctx: &MigrationContext<'_>) -> Option<Finding> {
        let new_type = field_type(op);

        match previous(op, "field_type").and_then(Value::as_str) {
            // same type: metadata-only or a length change (SM013)
            Some(old_type) if old_type == new_type => return None,
            Some(_) => {}
            None => {
                if is_nullable(op) || CHEAP_TYPES.contains(&new_type) {
                    return None;
                }
            }
        }

        let type_label = if new_type.is_empty() { "unknown" } else { new_type };
        Some(Finding::new(format!(
            "Altering field '{}' on '{}' to type '{}' may require a table rewrite and lock",
            field_name(op),
            op.target.model,
            type_label
        )))
    }

    fn suggestion(&self, op: &Operation) -> Option<String> {
        let field = field_name(op);
        Some(format!(
            "Safe pattern for changing column type (expand/contract):\n\
             1. Add '{field}_new' with the desired type, nullable.\n\
             2. Copy and transform data in batches.\n\
             3. Read from both columns and write to both in application code.\n\
             4. Drop '{field}' and rename '{field}_new' in a later release."
        ))
    }
}

/// SM006: column rename
pub struct RenameColumn;

impl Rule for RenameColumn {
    fn id(&self) -> &str {
        "SM006"
    }

    fn default_severity(&self) -> Severity {
        Severity::Info
    }

    fn description(&self) -> &str {
        "Renaming column breaks code that uses the old name"
    }

    fn categories(&self) -> &[Category] {
        &[Category::SchemaChanges]
    }

    fn applies_to(&self, kind: &OperationKind) -> bool {
        *kind == OperationKind::RenameField
    }

    fn check(&self, op: &Operation, _ctx: &MigrationContext<'_>) -> Option<Finding> {
        let old_name = op.attr_str("old_name").unwrap_or_else(|| field_name(op));
        let new_name = op.attr_str("new_name").unwrap_or("unknown");

        Some(Finding::new(format!(
            "Renaming '{}' to '{}' on '{}' breaks running code that still uses the old column name",
            old_name, new_name, op.target.model
        )))
    }

    fn suggestion(&self, _op: &Operation) -> Option<String> {
        Some(
            "Add the new column, write to both, backfill, switch reads, then drop the old column. \
             Alternatively keep the column name with db_column and rename only the model field."
                .to_string(),
        )
    }
}

/// SM013: varchar length change on PostgreSQL
pub struct AlterVarcharLength;

impl Rule for AlterVarcharLength {
    fn id(&self) -> &str {
        "SM013"
    }

    fn default_severity(&self) -> Severity {
        Severity::Warning
    }

    fn description(&self) -> &str {
        "Decreasing varchar length rewrites the table"
    }

    fn categories(&self) -> &[Category] {
        &[Category::SchemaChanges, Category::Locking, Category::Postgresql]
    }

    fn dialects(&self) -> Dialects {
        Dialects::Only(&[Dialect::Postgresql])
    }

    fn applies_to(&self, kind: &OperationKind) -> bool {
        *kind == OperationKind::AlterField
    }

    fn check(&self, op: &Operation, _ctx: &MigrationContext<'_>) -> Option<Finding> {
        if field_type(op) != "CharField" {
            return None;
        }
        let new_length = op.attr_u64("max_length")?;

        if op.attr_object("previous").is_some() {
            if previous(op, "field_type").and_then(Value::as_str) != Some("CharField") {
                return None;
            }
            let old_length = previous(op, "max_length").and_then(Value::as_u64)?;
            if new_length >= old_length {
                return None;
            }

            return Some(Finding::new(format!(
                "Decreasing max_length of '{}' on '{}' from {} to {} rewrites the table and may truncate data",
                field_name(op),
                op.target.model,
                old_length,
                new_length
            )));
        }

        Some(Finding::new(format!(
            "Changing max_length of '{}' on '{}' to {} rewrites the table if the length decreases",
            field_name(op),
            op.target.model,
            new_length
        )))
    }
}

/// SM014: table rename
pub struct RenameModel;

impl Rule for RenameModel {
    fn id(&self) -> &str {
        "SM014"
    }

    fn default_severity(&self) -> Severity {
        Severity::Warning
    }

    fn description(&self) -> &str {
        "Renaming model renames its table"
    }

    fn categories(&self) -> &[Category] {
        &[Category::SchemaChanges]
    }

    fn applies_to(&self, kind: &OperationKind) -> bool {
        *kind == OperationKind::RenameModel
    }

    fn check(&self, op: &Operation, _ctx: &MigrationContext<'_>) -> Option<Finding> {
        let old_name = op.attr_str("old_name").unwrap_or(op.target.model.as_str());
        let new_name = op.attr_str("new_name").unwrap_or("unknown");

        Some(Finding::new(format!(
            "Renaming model '{}' to '{}' renames the table and breaks code using the old name",
            old_name, new_name
        )))
    }

    fn suggestion(&self, _op: &Operation) -> Option<String> {
        Some("Keep the old table with Meta.db_table, or create a view under the old name during rollout.".to_string())
    }
}

/// SM020: column made NOT NULL
pub struct AlterToNotNull;

impl Rule for AlterToNotNull {
    fn id(&self) -> &str {
        "SM020"
    }

    fn default_severity(&self) -> Severity {
        Severity::Warning
    }

    fn description(&self) -> &str {
        "Making column NOT NULL scans the table under lock"
    }

    fn categories(&self) -> &[Category] {
        &[Category::SchemaChanges, Category::Locking]
    }

    fn applies_to(&self, kind: &OperationKind) -> bool {
        *kind == OperationKind::AlterField
    }

    fn check(&self, op: &Operation, _ctx: &MigrationContext<'_>) -> Option<Finding> {
        match previous_bool(op, "nullable") {
            Some(true) if !is_nullable(op) => {}
            Some(_) => return None,
            // without history only an explicit nullable=false is flagged
            None if op.attr_bool("nullable") == Some(false) && op.attr_object("previous").is_none() => {}
            None => return None,
        }

        Some(Finding::new(format!(
            "Making '{}' on '{}' NOT NULL scans the whole table while holding an exclusive lock",
            field_name(op),
            op.target.model
        )))
    }

    fn suggestion(&self, _op: &Operation) -> Option<String> {
        Some(
            "Add a CHECK (column IS NOT NULL) NOT VALID constraint, validate it separately, \
             then set NOT NULL and drop the check."
                .to_string(),
        )
    }
}

/// SM021: unique added to an existing column
pub struct AlterToUnique;

impl Rule for AlterToUnique {
    fn id(&self) -> &str {
        "SM021"
    }

    fn default_severity(&self) -> Severity {
        Severity::Error
    }

    fn description(&self) -> &str {
        "Adding unique to existing column builds index under lock"
    }

    fn categories(&self) -> &[Category] {
        &[Category::Constraints, Category::Indexes, Category::Locking, Category::Postgresql]
    }

    fn dialects(&self) -> Dialects {
        Dialects::Only(&[Dialect::Postgresql])
    }

    fn applies_to(&self, kind: &OperationKind) -> bool {
        *kind == OperationKind::AlterField
    }

    fn check(&self, op: &Operation, _ctx: &MigrationContext<'_>) -> Option<Finding> {
        if op.attr_bool("unique") != Some(true) || previous_bool(op, "unique") == Some(true) {
            return None;
        }

        Some(Finding::new(format!(
            "Adding unique=True to '{}' on '{}' builds a unique index while blocking writes",
            field_name(op),
            op.target.model
        )))
    }

    fn suggestion(&self, _op: &Operation) -> Option<String> {
        Some(
            "Create the unique index with CREATE UNIQUE INDEX CONCURRENTLY in a non-atomic migration, \
             then ADD CONSTRAINT ... UNIQUE USING INDEX."
                .to_string(),
        )
    }
}

/// SM029: NOT NULL dropped
pub struct DropNotNull;

impl Rule for DropNotNull {
    fn id(&self) -> &str {
        "SM029"
    }

    fn default_severity(&self) -> Severity {
        Severity::Warning
    }

    fn description(&self) -> &str {
        "Dropping NOT NULL breaks code and rollbacks that assume values"
    }

    fn categories(&self) -> &[Category] {
        &[Category::SchemaChanges, Category::Reversibility]
    }

    fn applies_to(&self, kind: &OperationKind) -> bool {
        *kind == OperationKind::AlterField
    }

    fn check(&self, op: &Operation, _ctx: &MigrationContext<'_>) -> Option<Finding> {
        op.attr_object("previous")?;

        let was_nullable = previous_bool(op, "nullable").unwrap_or(false);
        if was_nullable || !is_nullable(op) {
            return None;
        }

        Some(Finding::new(format!(
            "Making '{}' on '{}' nullable lets NULLs in; code that assumes a value and the reverse migration can fail",
            field_name(op),
            op.target.model
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::run;
    use serde_json::json;

    fn alter(field_type: &str) -> Operation {
        Operation::new("AlterField", "user", Some("name")).with_attr("field_type", field_type)
    }

    #[test]
    fn type_change_without_history() {
        assert!(run(&AlterColumnType, alter("IntegerField")).is_some());
        assert!(run(&AlterColumnType, alter("TextField")).is_none());
        assert!(run(&AlterColumnType, alter("IntegerField").with_attr("nullable", true)).is_none());
    }

    #[test]
    fn type_change_with_history() {
        let same = alter("CharField").with_attr("previous", json!({"field_type": "CharField"}));
        assert!(run(&AlterColumnType, same).is_none());

        let changed = alter("BigIntegerField").with_attr("previous", json!({"field_type": "IntegerField"}));
        let finding = run(&AlterColumnType, changed).unwrap();
        assert!(finding.message.contains("BigIntegerField"));
    }

    #[test]
    fn rename_field_uses_attribute_names() {
        let op = Operation::new("RenameField", "user", Some("name"))
            .with_attr("old_name", "name")
            .with_attr("new_name", "full_name");
        let finding = run(&RenameColumn, op).unwrap();
        assert!(finding.message.contains("'name' to 'full_name'"));
    }

    #[test]
    fn varchar_length() {
        let shrink = alter("CharField")
            .with_attr("max_length", 50)
            .with_attr("previous", json!({"field_type": "CharField", "max_length": 100}));
        assert!(run(&AlterVarcharLength, shrink).is_some());

        let widen = alter("CharField")
            .with_attr("max_length", 200)
            .with_attr("previous", json!({"field_type": "CharField", "max_length": 100}));
        assert!(run(&AlterVarcharLength, widen).is_none());

        let unknown = alter("CharField").with_attr("max_length", 200);
        assert!(run(&AlterVarcharLength, unknown).is_some());
    }

    #[test]
    fn rename_model() {
        let op = Operation::new("RenameModel", "author", None)
            .with_attr("old_name", "Author")
            .with_attr("new_name", "Writer");
        assert!(run(&RenameModel, op).unwrap().message.contains("'Author' to 'Writer'"));
    }

    #[test]
    fn not_null_alter() {
        let tightened = alter("CharField").with_attr("previous", json!({"nullable": true}));
        assert!(run(&AlterToNotNull, tightened).is_some());

        let unchanged = alter("CharField").with_attr("previous", json!({"nullable": false}));
        assert!(run(&AlterToNotNull, unchanged).is_none());

        assert!(run(&AlterToNotNull, alter("CharField").with_attr("nullable", false)).is_some());
        assert!(run(&AlterToNotNull, alter("CharField")).is_none());
    }

    #[test]
    fn unique_alter() {
        assert!(run(&AlterToUnique, alter("CharField").with_attr("unique", true)).is_some());
        let already = alter("CharField")
            .with_attr("unique", true)
            .with_attr("previous", json!({"unique": true}));
        assert!(run(&AlterToUnique, already).is_none());
    }

    #[test]
    fn drop_not_null_requires_history() {
        assert!(run(&DropNotNull, alter("CharField").with_attr("nullable", true)).is_none());

        let loosened = alter("CharField")
            .with_attr("nullable", true)
            .with_attr("previous", json!({"nullable": false}));
        assert!(run(&DropNotNull, loosened).is_some());

        let already_nullable = alter("CharField")
            .with_attr("nullable", true)
            .with_attr("previous", json!({"nullable": true}));
        assert!(run(&DropNotNull, already_nullable).is_none());
    }
}
