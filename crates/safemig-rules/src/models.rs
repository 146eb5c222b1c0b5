//! Rules over field definitions in AddField and CreateModel

use safemig_core::{Dialect, Operation, OperationKind, Severity};

use crate::fields::{field_type, model_fields, str_of, AUTO_FIELDS};
use crate::rule::{Category, Dialects, Finding, MigrationContext, Rule};

/// Common SQL reserved words that need quoting as column names
const RESERVED_WORDS: &[&str] = &[
    "all", "analyse", "analyze", "and", "any", "array", "as", "asc", "authorization", "between",
    "both", "case", "cast", "check", "collate", "column", "constraint", "create", "cross",
    "current_date", "current_time", "current_timestamp", "current_user", "default", "deferrable",
    "desc", "distinct", "do", "else", "end", "except", "false", "fetch", "for", "foreign", "from",
    "grant", "group", "having", "in", "initially", "inner", "intersect", "into", "is", "join",
    "leading", "left", "like", "limit", "natural", "not", "null", "offset", "on", "only", "or",
    "order", "outer", "primary", "references", "right", "select", "session_user", "some", "table",
    "then", "to", "trailing", "true", "union", "unique", "user", "using", "when", "where", "window",
    "with",
];

fn is_reserved(name: &str) -> bool {
    RESERVED_WORDS.contains(&name.to_ascii_lowercase().as_str())
}

/// `(name, field_type)` of every field an operation defines
fn defined_fields(op: &Operation) -> Vec<(&str, &str)> {
    match op.kind {
        OperationKind::AddField => vec![(op.target.field.as_deref().unwrap_or(""), field_type(op))],
        OperationKind::CreateModel => model_fields(op)
            .into_iter()
            .map(|field| {
                (
                    str_of(field, "name").unwrap_or(""),
                    str_of(field, "field_type").unwrap_or(""),
                )
            })
            .collect(),
        _ => Vec::new(),
    }
}

/// SM019: reserved keyword used as a column name
pub struct ReservedKeywordColumn;

impl Rule for ReservedKeywordColumn {
    fn id(&self) -> &str {
        "SM019"
    }

    fn default_severity(&self) -> Severity {
        Severity::Info
    }

    fn description(&self) -> &str {
        "Column name is a reserved SQL keyword"
    }

    fn categories(&self) -> &[Category] {
        &[Category::Naming, Category::Informational]
    }

    fn applies_to(&self, kind: &OperationKind) -> bool {
        matches!(
            kind,
            OperationKind::AddField | OperationKind::RenameField | OperationKind::CreateModel
        )
    }

    fn check(&self, op: &Operation, _ctx: &MigrationContext<'_>) -> Option<Finding> {
        let names: Vec<&str> = match op.kind {
            OperationKind::RenameField => op.attr_str("new_name").into_iter().collect(),
            _ => defined_fields(op).into_iter().map(|(name, _)| name).collect(),
        };

        let reserved: Vec<&str> = names.into_iter().filter(|name| is_reserved(name)).collect();
        if reserved.is_empty() {
            return None;
        }

        Some(Finding::new(format!(
            "Column name(s) {} on '{}' are reserved SQL keywords and must be quoted in raw SQL",
            reserved.iter().map(|n| format!("'{}'", n)).collect::<Vec<_>>().join(", "),
            op.target.model
        )))
    }
}

/// SM028: 32-bit auto primary key
pub struct SmallAutoPrimaryKey;

impl Rule for SmallAutoPrimaryKey {
    fn id(&self) -> &str {
        "SM028"
    }

    fn default_severity(&self) -> Severity {
        Severity::Warning
    }

    fn description(&self) -> &str {
        "32-bit auto primary key can run out of ids"
    }

    fn categories(&self) -> &[Category] {
        &[Category::SchemaChanges]
    }

    fn applies_to(&self, kind: &OperationKind) -> bool {
        matches!(kind, OperationKind::AddField | OperationKind::CreateModel)
    }

    fn check(&self, op: &Operation, _ctx: &MigrationContext<'_>) -> Option<Finding> {
        let (name, kind) = defined_fields(op)
            .into_iter()
            .find(|(_, kind)| *kind == "AutoField" || *kind == "SmallAutoField")?;

        Some(Finding::new(format!(
            "'{}' on '{}' is a {} (32-bit or smaller); the id sequence can be exhausted",
            name, op.target.model, kind
        )))
    }

    fn suggestion(&self, _op: &Operation) -> Option<String> {
        Some("Use BigAutoField (set DEFAULT_AUTO_FIELD) for new tables.".to_string())
    }
}

/// SM034: serial-backed auto field on old framework versions
pub struct SerialAutoField;

impl Rule for SerialAutoField {
    fn id(&self) -> &str {
        "SM034"
    }

    fn default_severity(&self) -> Severity {
        Severity::Info
    }

    fn description(&self) -> &str {
        "Auto field uses a serial sequence before framework 4.0"
    }

    fn categories(&self) -> &[Category] {
        &[Category::Postgresql, Category::Informational]
    }

    fn dialects(&self) -> Dialects {
        Dialects::Only(&[Dialect::Postgresql])
    }

    fn applies_to(&self, kind: &OperationKind) -> bool {
        matches!(kind, OperationKind::AddField | OperationKind::CreateModel)
    }

    fn check(&self, op: &Operation, ctx: &MigrationContext<'_>) -> Option<Finding> {
        let version = ctx.settings.framework_version?;
        if version >= (4, 0) {
            return None;
        }

        let (name, kind) = defined_fields(op)
            .into_iter()
            .find(|(_, kind)| AUTO_FIELDS.contains(kind))?;

        Some(Finding::new(format!(
            "{} '{}' on '{}' is backed by a serial sequence on framework {}.{}; sequence ownership is lost on table copies",
            kind, name, op.target.model, version.0, version.1
        )))
    }

    fn suggestion(&self, _op: &Operation) -> Option<String> {
        Some("Upgrade to a framework version that uses identity columns.".to_string())
    }
}
