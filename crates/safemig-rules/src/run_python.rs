//! Rules for RunPython data migrations

use regex::Regex;
use std::sync::OnceLock;

use safemig_core::{Operation, OperationKind, Severity};

use crate::rule::{Category, Finding, MigrationContext, Rule};

static BULK_ACCESS: OnceLock<Option<Regex>> = OnceLock::new();
static BATCHING: OnceLock<Option<Regex>> = OnceLock::new();

fn matches(cell: &'static OnceLock<Option<Regex>>, source: &str, text: &str) -> bool {
    cell.get_or_init(|| Regex::new(source).ok())
        .as_ref()
        .map_or(false, |re| re.is_match(text))
}

/// SM008: any data migration
pub struct LargeDataMigration;

impl Rule for LargeDataMigration {
    fn id(&self) -> &str {
        "SM008"
    }

    fn default_severity(&self) -> Severity {
        Severity::Info
    }

    fn description(&self) -> &str {
        "Data migration may be slow on large tables"
    }

    fn categories(&self) -> &[Category] {
        &[Category::DataMigrations]
    }

    fn applies_to(&self, kind: &OperationKind) -> bool {
        *kind == OperationKind::RunPython
    }

    fn check(&self, _op: &Operation, _ctx: &MigrationContext<'_>) -> Option<Finding> {
        Some(Finding::new(
            "RunPython data migration may be slow on large tables. Consider batching and using iterator().",
        ))
    }

    fn suggestion(&self, _op: &Operation) -> Option<String> {
        Some(
            "Best practices for data migrations:\n\
             1. Process rows in batches and save with bulk_update.\n\
             2. Use iterator(chunk_size=...) to avoid loading all rows into memory.\n\
             3. Run very large backfills outside the deployment, e.g. as a background job."
                .to_string(),
        )
    }
}

/// SM016: RunPython that cannot be rolled back
pub struct RunPythonWithoutReverse;

impl Rule for RunPythonWithoutReverse {
    fn id(&self) -> &str {
        "SM016"
    }

    fn default_severity(&self) -> Severity {
        Severity::Info
    }

    fn description(&self) -> &str {
        "RunPython without reverse_code cannot be rolled back"
    }

    fn categories(&self) -> &[Category] {
        &[Category::Reversibility, Category::DataMigrations]
    }

    fn applies_to(&self, kind: &OperationKind) -> bool {
        *kind == OperationKind::RunPython
    }

    fn check(&self, op: &Operation, _ctx: &MigrationContext<'_>) -> Option<Finding> {
        if op.attr("reverse_code").map_or(false, |v| !v.is_null()) {
            return None;
        }

        Some(Finding::new("RunPython operation has no reverse_code - cannot be rolled back"))
    }

    fn suggestion(&self, _op: &Operation) -> Option<String> {
        Some("Pass reverse_code, or reverse_code=migrations.RunPython.noop when nothing needs undoing.".to_string())
    }
}

/// SM026: data migration touching every row at once
///
/// Heuristic scan of the forward code text.
pub struct UnbatchedDataMigration;

impl Rule for UnbatchedDataMigration {
    fn id(&self) -> &str {
        "SM026"
    }

    fn default_severity(&self) -> Severity {
        Severity::Warning
    }

    fn description(&self) -> &str {
        "RunPython loads or updates whole tables without batching"
    }

    fn categories(&self) -> &[Category] {
        &[Category::DataMigrations]
    }

    fn applies_to(&self, kind: &OperationKind) -> bool {
        *kind == OperationKind::RunPython
    }

    fn check(&self, op: &Operation, _ctx: &MigrationContext<'_>) -> Option<Finding> {
        let code = op.attr_text("code")?;

        let bulk = matches(
            &BULK_ACCESS,
            r"\.objects\.(all|filter|exclude)\(|\.update\(|\.delete\(\)",
            &code,
        );
        if !bulk {
            return None;
        }

        let batched = matches(
            &BATCHING,
            r"\.iterator\(|bulk_update|bulk_create|batch_size|chunk_size|\[\s*\w*\s*:\s*\w+\s*\]|\.in_bulk\(",
            &code,
        );
        if batched {
            return None;
        }

        Some(Finding::new(
            "RunPython code queries or updates whole tables without batching; long transactions hold locks",
        ))
    }

    fn suggestion(&self, _op: &Operation) -> Option<String> {
        Some("Iterate with .iterator(chunk_size=1000) or slice the queryset, and write with bulk_update.".to_string())
    }
}
