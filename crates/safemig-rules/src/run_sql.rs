//! Rules for RunSQL operations
//!
//! These scan raw SQL text with regular expressions. This is heuristic text
//! matching, not SQL parsing: statements built at runtime, comments and
//! string literals can cause both false positives and false negatives.

use regex::Regex;
use std::sync::OnceLock;

use safemig_core::{Dialect, Operation, OperationKind, Severity};

use crate::rule::{Category, Dialects, Finding, MigrationContext, Rule};

static ENUM_ADD_VALUE: OnceLock<Option<Regex>> = OnceLock::new();
static CONCURRENTLY: OnceLock<Option<Regex>> = OnceLock::new();
static NAMED_PLACEHOLDER: OnceLock<Option<Regex>> = OnceLock::new();
static POSITIONAL_PLACEHOLDER: OnceLock<Option<Regex>> = OnceLock::new();
static CONCATENATION: OnceLock<Option<Regex>> = OnceLock::new();
static DDL: OnceLock<Option<Regex>> = OnceLock::new();
static LOCK_TIMEOUT: OnceLock<Option<Regex>> = OnceLock::new();
static CREATE_TABLE: OnceLock<Option<Regex>> = OnceLock::new();

/// Compile a pattern once; an invalid pattern never matches
fn pattern(cell: &'static OnceLock<Option<Regex>>, source: &str) -> Option<&'static Regex> {
    cell.get_or_init(|| Regex::new(source).ok()).as_ref()
}

fn is_match(cell: &'static OnceLock<Option<Regex>>, source: &str, text: &str) -> bool {
    pattern(cell, source).map_or(false, |re| re.is_match(text))
}

/// Forward SQL of a RunSQL operation (statement lists joined)
pub(crate) fn sql_text(op: &Operation) -> Option<String> {
    op.attr_text("sql")
}

pub(crate) fn mentions_concurrently(sql: &str) -> bool {
    is_match(&CONCURRENTLY, r"(?i)\bCONCURRENTLY\b", sql)
}

/// Absent or `null` (an empty string is the explicit no-op reverse)
fn missing(op: &Operation, key: &str) -> bool {
    op.attr(key).map_or(true, serde_json::Value::is_null)
}

/// SM007: RunSQL that cannot be rolled back
pub struct RunSqlWithoutReverse;

impl Rule for RunSqlWithoutReverse {
    fn id(&self) -> &str {
        "SM007"
    }

    fn default_severity(&self) -> Severity {
        Severity::Warning
    }

    fn description(&self) -> &str {
        "RunSQL without reverse_sql cannot be rolled back"
    }

    fn categories(&self) -> &[Category] {
        &[Category::Reversibility]
    }

    fn applies_to(&self, kind: &OperationKind) -> bool {
        *kind == OperationKind::RunSql
    }

    fn check(&self, op: &Operation, _ctx: &MigrationContext<'_>) -> Option<Finding> {
        if !missing(op, "reverse_sql") {
            return None;
        }

        Some(Finding::new("RunSQL operation has no reverse_sql - cannot be rolled back"))
    }

    fn suggestion(&self, _op: &Operation) -> Option<String> {
        Some(
            "Always provide reverse_sql for RunSQL operations. \
             Use reverse_sql=migrations.RunSQL.noop when nothing needs undoing."
                .to_string(),
        )
    }
}

/// SM012: enum value added inside a transaction
pub struct EnumAddValueInTransaction;

impl Rule for EnumAddValueInTransaction {
    fn id(&self) -> &str {
        "SM012"
    }

    fn default_severity(&self) -> Severity {
        Severity::Error
    }

    fn description(&self) -> &str {
        "Adding enum value in transaction will fail in PostgreSQL"
    }

    fn categories(&self) -> &[Category] {
        &[Category::Postgresql, Category::HighRisk]
    }

    fn dialects(&self) -> Dialects {
        Dialects::Only(&[Dialect::Postgresql])
    }

    fn applies_to(&self, kind: &OperationKind) -> bool {
        *kind == OperationKind::RunSql
    }

    fn check(&self, op: &Operation, ctx: &MigrationContext<'_>) -> Option<Finding> {
        if !ctx.is_atomic() {
            return None;
        }

        let sql = sql_text(op)?;
        if !is_match(&ENUM_ADD_VALUE, r"(?i)ALTER\s+TYPE\s+\S+\s+ADD\s+VALUE", &sql) {
            return None;
        }

        Some(Finding::new(
            "ALTER TYPE ... ADD VALUE cannot run inside a transaction. Set atomic = False on the Migration class.",
        ))
    }

    fn suggestion(&self, _op: &Operation) -> Option<String> {
        Some("Move the ALTER TYPE statement into its own migration with atomic = False.".to_string())
    }
}

/// SM024: SQL assembled by string formatting
pub struct SqlInterpolation;

impl Rule for SqlInterpolation {
    fn id(&self) -> &str {
        "SM024"
    }

    fn default_severity(&self) -> Severity {
        Severity::Warning
    }

    fn description(&self) -> &str {
        "RunSQL text looks assembled by string formatting"
    }

    fn categories(&self) -> &[Category] {
        &[Category::Security]
    }

    fn applies_to(&self, kind: &OperationKind) -> bool {
        *kind == OperationKind::RunSql
    }

    fn check(&self, op: &Operation, _ctx: &MigrationContext<'_>) -> Option<Finding> {
        let sql = sql_text(op)?;

        let named = is_match(&NAMED_PLACEHOLDER, r"%\(\w+\)s|\{\w+\}|\$\{\w+\}", &sql);
        // %s is the driver's own placeholder when params are passed
        let positional = missing(op, "params") && is_match(&POSITIONAL_PLACEHOLDER, r"%[sd]", &sql);
        let concatenated = is_match(&CONCATENATION, r#"['"]\s*\+|\+\s*['"]"#, &sql);

        if !(named || positional || concatenated) {
            return None;
        }

        Some(Finding::new(
            "RunSQL text contains string-formatting patterns; values may be interpolated into SQL",
        ))
    }

    fn suggestion(&self, _op: &Operation) -> Option<String> {
        Some("Pass values through RunSQL params instead of formatting them into the statement.".to_string())
    }
}

/// SM035: DDL without lock_timeout
pub struct DdlWithoutLockTimeout;

impl Rule for DdlWithoutLockTimeout {
    fn id(&self) -> &str {
        "SM035"
    }

    fn default_severity(&self) -> Severity {
        Severity::Info
    }

    fn description(&self) -> &str {
        "Raw DDL without lock_timeout can queue behind long transactions"
    }

    fn categories(&self) -> &[Category] {
        &[Category::Locking, Category::Postgresql]
    }

    fn dialects(&self) -> Dialects {
        Dialects::Only(&[Dialect::Postgresql])
    }

    fn applies_to(&self, kind: &OperationKind) -> bool {
        *kind == OperationKind::RunSql
    }

    fn check(&self, op: &Operation, _ctx: &MigrationContext<'_>) -> Option<Finding> {
        let sql = sql_text(op)?;

        let is_ddl = is_match(
            &DDL,
            r"(?i)\b(ALTER\s+TABLE|ALTER\s+TYPE|DROP\s+TABLE|DROP\s+INDEX|CREATE\s+(UNIQUE\s+)?INDEX)\b",
            &sql,
        );
        if !is_ddl || is_match(&LOCK_TIMEOUT, r"(?i)\block_timeout\b", &sql) {
            return None;
        }

        Some(Finding::new(
            "RunSQL executes DDL without SET lock_timeout; a blocked lock request stalls every query behind it",
        ))
    }

    fn suggestion(&self, _op: &Operation) -> Option<String> {
        Some("Prefix the statement with SET lock_timeout = '5s'; and retry the migration on timeout.".to_string())
    }
}

/// SM036: CREATE TABLE that is not idempotent
pub struct CreateTableWithoutIfNotExists;

impl Rule for CreateTableWithoutIfNotExists {
    fn id(&self) -> &str {
        "SM036"
    }

    fn default_severity(&self) -> Severity {
        Severity::Info
    }

    fn description(&self) -> &str {
        "CREATE TABLE without IF NOT EXISTS fails on re-run"
    }

    fn categories(&self) -> &[Category] {
        &[Category::Informational]
    }

    fn applies_to(&self, kind: &OperationKind) -> bool {
        *kind == OperationKind::RunSql
    }

    fn check(&self, op: &Operation, _ctx: &MigrationContext<'_>) -> Option<Finding> {
        let sql = sql_text(op)?;
        let re = pattern(
            &CREATE_TABLE,
            r"(?i)\bCREATE\s+(?:(?:GLOBAL|LOCAL)\s+)?(?:TEMP(?:ORARY)?\s+|UNLOGGED\s+)?TABLE\s+(IF\s+NOT\s+EXISTS\b)?",
        )?;

        let unguarded = re.captures_iter(&sql).any(|caps| caps.get(1).is_none());
        if !unguarded {
            return None;
        }

        Some(Finding::new("RunSQL creates a table without IF NOT EXISTS; re-running the migration fails"))
    }
}
