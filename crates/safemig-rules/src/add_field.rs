//! Rules for AddField operations

use safemig_core::{Dialect, Operation, OperationKind, Severity};

use crate::fields::{
    field_name, field_type, has_default, is_nullable, is_relation, without_db_constraint, AUTO_FIELDS,
};
use crate::rule::{Category, Dialects, Finding, MigrationContext, Rule};

/// SM001: NOT NULL column added without a default
pub struct NotNullWithoutDefault;

impl Rule for NotNullWithoutDefault {
    fn id(&self) -> &str {
        "SM001"
    }

    fn default_severity(&self) -> Severity {
        Severity::Error
    }

    fn description(&self) -> &str {
        "Adding NOT NULL column without default will lock table"
    }

    fn categories(&self) -> &[Category] {
        &[Category::SchemaChanges, Category::Locking, Category::HighRisk]
    }

    fn applies_to(&self, kind: &OperationKind) -> bool {
        *kind == OperationKind::AddField
    }

    fn check(&self, op: &Operation, ctx: &MigrationContext<'_>) -> Option<Finding> {
        if is_nullable(op) || has_default(op) {
            return None;
        }

        let kind = field_type(op);
        let is_auto = op.attr_bool("primary_key").unwrap_or(false)
            || AUTO_FIELDS.contains(&kind)
            || kind == "UUIDField";

        if is_auto || kind == "ManyToManyField" || without_db_constraint(op) {
            return None;
        }

        // table created in this migration is still empty
        if ctx.model_created_earlier(&op.target.model) {
            return None;
        }

        Some(Finding::new(format!(
            "Adding NOT NULL field '{}' to '{}' without a default value will lock the table",
            field_name(op),
            op.target.model
        )))
    }

    fn suggestion(&self, op: &Operation) -> Option<String> {
        let field = field_name(op);
        let model = &op.target.model;
        Some(format!(
            "Safe pattern for adding a NOT NULL field:\n\
             1. Add '{field}' to '{model}' as nullable (null=True).\n\
             2. Backfill existing rows in batches in a data migration.\n\
             3. Make '{field}' NOT NULL in a later migration."
        ))
    }
}

/// SM005: foreign key added with a database constraint
pub struct AddForeignKeyValidates;

impl Rule for AddForeignKeyValidates {
    fn id(&self) -> &str {
        "SM005"
    }

    fn default_severity(&self) -> Severity {
        Severity::Warning
    }

    fn description(&self) -> &str {
        "Adding foreign key validates all existing rows"
    }

    fn categories(&self) -> &[Category] {
        &[Category::Locking, Category::Constraints, Category::Postgresql]
    }

    fn dialects(&self) -> Dialects {
        Dialects::Only(&[Dialect::Postgresql])
    }

    fn applies_to(&self, kind: &OperationKind) -> bool {
        *kind == OperationKind::AddField
    }

    fn check(&self, op: &Operation, _ctx: &MigrationContext<'_>) -> Option<Finding> {
        if !is_relation(op) || without_db_constraint(op) {
            return None;
        }

        Some(Finding::new(format!(
            "Adding foreign key '{}' to '{}' validates every existing row while holding a lock",
            field_name(op),
            op.target.model
        )))
    }

    fn suggestion(&self, op: &Operation) -> Option<String> {
        let field = field_name(op);
        Some(format!(
            "Add the column with db_constraint=False, then create the constraint with\n\
             ALTER TABLE ... ADD CONSTRAINT ... FOREIGN KEY ({field}_id) ... NOT VALID;\n\
             and run ALTER TABLE ... VALIDATE CONSTRAINT ... in a separate migration."
        ))
    }
}

/// Callables known to be evaluated once per row on backfill
const SLOW_CALLABLES: [&str; 10] = [
    "uuid.uuid4",
    "uuid4",
    "django.utils.timezone.now",
    "timezone.now",
    "datetime.now",
    "datetime.datetime.now",
    "datetime.utcnow",
    "datetime.datetime.utcnow",
    "secrets.token_hex",
    "secrets.token_urlsafe",
];

/// SM022: callable default that has to be computed for every row
pub struct SlowCallableDefault;

impl Rule for SlowCallableDefault {
    fn id(&self) -> &str {
        "SM022"
    }

    fn default_severity(&self) -> Severity {
        Severity::Warning
    }

    fn description(&self) -> &str {
        "Callable default is evaluated for every existing row"
    }

    fn categories(&self) -> &[Category] {
        &[Category::DataMigrations, Category::Locking]
    }

    fn applies_to(&self, kind: &OperationKind) -> bool {
        *kind == OperationKind::AddField
    }

    fn check(&self, op: &Operation, _ctx: &MigrationContext<'_>) -> Option<Finding> {
        if op.attr_str("default_kind") != Some("callable") {
            return None;
        }

        let callable = op.attr_str("default_callable")?;
        if !SLOW_CALLABLES.contains(&callable) {
            return None;
        }

        Some(Finding::new(format!(
            "Default '{}' on '{}.{}' is computed per row while the table is rewritten",
            callable,
            op.target.model,
            field_name(op)
        )))
    }

    fn suggestion(&self, _op: &Operation) -> Option<String> {
        Some(
            "Add the field as nullable without a default, backfill values in batches, \
             then set the default and NOT NULL in a later migration."
                .to_string(),
        )
    }
}

/// SM023: many-to-many adds a join table
pub struct ManyToManyJoinTable;

impl Rule for ManyToManyJoinTable {
    fn id(&self) -> &str {
        "SM023"
    }

    fn default_severity(&self) -> Severity {
        Severity::Info
    }

    fn description(&self) -> &str {
        "ManyToManyField creates a join table"
    }

    fn categories(&self) -> &[Category] {
        &[Category::SchemaChanges, Category::Informational]
    }

    fn applies_to(&self, kind: &OperationKind) -> bool {
        *kind == OperationKind::AddField
    }

    fn check(&self, op: &Operation, _ctx: &MigrationContext<'_>) -> Option<Finding> {
        if field_type(op) != "ManyToManyField" {
            return None;
        }

        Some(Finding::new(format!(
            "ManyToManyField '{}' on '{}' creates a new join table",
            field_name(op),
            op.target.model
        )))
    }
}

/// SM025: foreign key without an index
pub struct ForeignKeyWithoutIndex;

impl Rule for ForeignKeyWithoutIndex {
    fn id(&self) -> &str {
        "SM025"
    }

    fn default_severity(&self) -> Severity {
        Severity::Warning
    }

    fn description(&self) -> &str {
        "Foreign key without index makes joins and cascades slow"
    }

    fn categories(&self) -> &[Category] {
        &[Category::Indexes]
    }

    fn applies_to(&self, kind: &OperationKind) -> bool {
        *kind == OperationKind::AddField
    }

    fn check(&self, op: &Operation, _ctx: &MigrationContext<'_>) -> Option<Finding> {
        if !is_relation(op) || op.attr_bool("db_index") != Some(false) {
            return None;
        }

        Some(Finding::new(format!(
            "Foreign key '{}' on '{}' has db_index=False; lookups and cascading deletes will scan the table",
            field_name(op),
            op.target.model
        )))
    }
}

/// Longest varchar the PostgreSQL check accepts silently
const CHAR_LENGTH_NOTICE: u64 = 32;

/// SM031: long CharField on PostgreSQL
pub struct PreferTextField;

impl Rule for PreferTextField {
    fn id(&self) -> &str {
        "SM031"
    }

    fn default_severity(&self) -> Severity {
        Severity::Info
    }

    fn description(&self) -> &str {
        "Long CharField on PostgreSQL; changing max_length later needs a migration"
    }

    fn categories(&self) -> &[Category] {
        &[Category::Postgresql, Category::Informational]
    }

    fn dialects(&self) -> Dialects {
        Dialects::Only(&[Dialect::Postgresql])
    }

    fn applies_to(&self, kind: &OperationKind) -> bool {
        *kind == OperationKind::AddField
    }

    fn check(&self, op: &Operation, _ctx: &MigrationContext<'_>) -> Option<Finding> {
        if field_type(op) != "CharField" {
            return None;
        }

        let max_length = op.attr_u64("max_length")?;
        if max_length <= CHAR_LENGTH_NOTICE {
            return None;
        }

        Some(Finding::new(format!(
            "CharField '{}' has max_length={}; PostgreSQL stores text the same way and shrinking it later rewrites the table",
            field_name(op),
            max_length
        )))
    }

    fn suggestion(&self, _op: &Operation) -> Option<String> {
        Some("Consider TextField with a validator or a CHECK constraint on length.".to_string())
    }
}

/// SM032: naive DateTimeField
pub struct NaiveDateTimeField;

impl Rule for NaiveDateTimeField {
    fn id(&self) -> &str {
        "SM032"
    }

    fn default_severity(&self) -> Severity {
        Severity::Warning
    }

    fn description(&self) -> &str {
        "DateTimeField added while timezone support is disabled"
    }

    fn categories(&self) -> &[Category] {
        &[Category::SchemaChanges]
    }

    fn applies_to(&self, kind: &OperationKind) -> bool {
        *kind == OperationKind::AddField
    }

    fn check(&self, op: &Operation, ctx: &MigrationContext<'_>) -> Option<Finding> {
        if ctx.settings.timezone_aware || field_type(op) != "DateTimeField" {
            return None;
        }

        Some(Finding::new(format!(
            "DateTimeField '{}' on '{}' stores naive datetimes because timezone support is disabled",
            field_name(op),
            op.target.model
        )))
    }
}

/// SM033: NOT NULL column with a default
pub struct NotNullWithDefault;

impl Rule for NotNullWithDefault {
    fn id(&self) -> &str {
        "SM033"
    }

    fn default_severity(&self) -> Severity {
        Severity::Warning
    }

    fn description(&self) -> &str {
        "Adding NOT NULL column with default rewrites existing rows"
    }

    fn categories(&self) -> &[Category] {
        &[Category::SchemaChanges, Category::Locking]
    }

    fn applies_to(&self, kind: &OperationKind) -> bool {
        *kind == OperationKind::AddField
    }

    fn check(&self, op: &Operation, ctx: &MigrationContext<'_>) -> Option<Finding> {
        if is_nullable(op) {
            return None;
        }

        // database-level defaults are applied without touching rows
        match op.attr_str("default_kind") {
            Some("value") | Some("callable") => {}
            _ => return None,
        }

        if ctx.model_created_earlier(&op.target.model) {
            return None;
        }

        Some(Finding::new(format!(
            "Adding NOT NULL field '{}' to '{}' with a default writes the default into every existing row",
            field_name(op),
            op.target.model
        )))
    }

    fn suggestion(&self, _op: &Operation) -> Option<String> {
        Some("Use a database default (db_default) or add the column nullable and backfill in batches.".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{run, run_in};
    use safemig_core::Migration;

    fn add_field(field_type: &str) -> Operation {
        Operation::new("AddField", "user", Some("email")).with_attr("field_type", field_type)
    }

    #[test]
    fn not_null_without_default() {
        let finding = run(&NotNullWithoutDefault, add_field("CharField")).unwrap();
        assert!(finding.message.contains("'email'"));
        assert!(finding.message.contains("'user'"));
    }

    #[test]
    fn not_null_exemptions() {
        let rule = NotNullWithoutDefault;
        assert!(run(&rule, add_field("CharField").with_attr("nullable", true)).is_none());
        assert!(run(&rule, add_field("CharField").with_attr("default_kind", "value")).is_none());
        assert!(run(&rule, add_field("BigAutoField")).is_none());
        assert!(run(&rule, add_field("IntegerField").with_attr("primary_key", true)).is_none());
        assert!(run(&rule, add_field("ManyToManyField")).is_none());
        assert!(run(&rule, add_field("ForeignKey").with_attr("db_constraint", false)).is_none());
        // explicit "none" is the same as absent
        assert!(run(&rule, add_field("CharField").with_attr("default_kind", "none")).is_some());
    }

    #[test]
    fn not_null_on_table_created_in_same_migration() {
        let migration = Migration::new("accounts", "0001_initial")
            .with_operation(Operation::new("CreateModel", "User", None))
            .with_operation(add_field("CharField"));

        assert!(run_in(&NotNullWithoutDefault, &migration, 1, Some(Dialect::Postgresql)).is_none());
    }

    #[test]
    fn foreign_key_validation() {
        assert!(run(&AddForeignKeyValidates, add_field("ForeignKey").with_attr("nullable", true)).is_some());
        assert!(run(&AddForeignKeyValidates, add_field("ForeignKey").with_attr("db_constraint", false)).is_none());
        assert!(run(&AddForeignKeyValidates, add_field("CharField")).is_none());
    }

    #[test]
    fn slow_callable_matches_exact_name() {
        let op = add_field("UUIDField")
            .with_attr("default_kind", "callable")
            .with_attr("default_callable", "uuid.uuid4");
        assert!(run(&SlowCallableDefault, op).is_some());

        let op = add_field("UUIDField")
            .with_attr("default_kind", "callable")
            .with_attr("default_callable", "myapp.uuid.uuid4_cached");
        assert!(run(&SlowCallableDefault, op).is_none());
    }

    #[test]
    fn many_to_many_and_unindexed_fk() {
        assert!(run(&ManyToManyJoinTable, add_field("ManyToManyField")).is_some());
        assert!(run(&ManyToManyJoinTable, add_field("ForeignKey")).is_none());

        assert!(run(&ForeignKeyWithoutIndex, add_field("ForeignKey").with_attr("db_index", false)).is_some());
        assert!(run(&ForeignKeyWithoutIndex, add_field("ForeignKey")).is_none());
    }

    #[test]
    fn long_char_field() {
        assert!(run(&PreferTextField, add_field("CharField").with_attr("max_length", 255)).is_some());
        assert!(run(&PreferTextField, add_field("CharField").with_attr("max_length", 32)).is_none());
        assert!(run(&PreferTextField, add_field("CharField")).is_none());
    }

    #[test]
    fn naive_datetime_depends_on_settings() {
        let migration = Migration::new("blog", "0002").with_operation(add_field("DateTimeField"));
        assert!(run_in(&NaiveDateTimeField, &migration, 0, None).is_none());

        let settings = crate::rule::RuleSettings {
            timezone_aware: false,
            framework_version: None,
        };
        let ctx = MigrationContext::new(&migration, 0, None, &settings);
        assert!(NaiveDateTimeField.check(&migration.operations[0], &ctx).is_some());
    }

    #[test]
    fn not_null_with_default() {
        assert!(run(&NotNullWithDefault, add_field("IntegerField").with_attr("default_kind", "value")).is_some());
        assert!(run(&NotNullWithDefault, add_field("IntegerField").with_attr("default_kind", "database")).is_none());
        assert!(run(&NotNullWithDefault, add_field("IntegerField")).is_none());
    }
}
