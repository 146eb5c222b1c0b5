//! Migration and operation records
//!
//! These are the immutable shapes produced by a loader. Nothing in the
//! analysis pipeline mutates them; findings live on [`crate::Issue`].

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;

use crate::issue::Location;

/// Identity of a migration: `(app, name)`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MigrationKey {
    /// Application (app label) owning the migration
    pub app: String,

    /// Migration name, e.g. `0002_add_email`
    pub name: String,
}

impl MigrationKey {
    pub fn new(app: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            app: app.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for MigrationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.app, self.name)
    }
}

/// Kind of schema or data operation
///
/// Known kinds get their own variant; anything else a loader emits is kept
/// as [`OperationKind::Other`] so new kinds are additive data.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum OperationKind {
    AddField,
    RemoveField,
    AlterField,
    RenameField,
    CreateModel,
    DeleteModel,
    RenameModel,
    AddIndex,
    AddIndexConcurrently,
    RemoveIndex,
    RemoveIndexConcurrently,
    AddConstraint,
    RemoveConstraint,
    AlterUniqueTogether,
    RunSql,
    RunPython,
    Other(String),
}

impl OperationKind {
    /// Stable name, as written in migration files
    pub fn as_str(&self) -> &str {
        match self {
            Self::AddField => "AddField",
            Self::RemoveField => "RemoveField",
            Self::AlterField => "AlterField",
            Self::RenameField => "RenameField",
            Self::CreateModel => "CreateModel",
            Self::DeleteModel => "DeleteModel",
            Self::RenameModel => "RenameModel",
            Self::AddIndex => "AddIndex",
            Self::AddIndexConcurrently => "AddIndexConcurrently",
            Self::RemoveIndex => "RemoveIndex",
            Self::RemoveIndexConcurrently => "RemoveIndexConcurrently",
            Self::AddConstraint => "AddConstraint",
            Self::RemoveConstraint => "RemoveConstraint",
            Self::AlterUniqueTogether => "AlterUniqueTogether",
            Self::RunSql => "RunSQL",
            Self::RunPython => "RunPython",
            Self::Other(name) => name,
        }
    }
}

impl From<String> for OperationKind {
    fn from(name: String) -> Self {
        match name.as_str() {
            "AddField" => Self::AddField,
            "RemoveField" => Self::RemoveField,
            "AlterField" => Self::AlterField,
            "RenameField" => Self::RenameField,
            "CreateModel" => Self::CreateModel,
            "DeleteModel" => Self::DeleteModel,
            "RenameModel" => Self::RenameModel,
            "AddIndex" => Self::AddIndex,
            "AddIndexConcurrently" => Self::AddIndexConcurrently,
            "RemoveIndex" => Self::RemoveIndex,
            "RemoveIndexConcurrently" => Self::RemoveIndexConcurrently,
            "AddConstraint" => Self::AddConstraint,
            "RemoveConstraint" => Self::RemoveConstraint,
            "AlterUniqueTogether" => Self::AlterUniqueTogether,
            "RunSQL" | "RunSql" => Self::RunSql,
            "RunPython" => Self::RunPython,
            _ => Self::Other(name),
        }
    }
}

impl From<&str> for OperationKind {
    fn from(name: &str) -> Self {
        Self::from(name.to_string())
    }
}

impl From<OperationKind> for String {
    fn from(kind: OperationKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What an operation acts on
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    /// Model (table) name
    pub model: String,

    /// Field (column) name, when the operation targets one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.field {
            Some(field) => write!(f, "{}.{}", self.model, field),
            None => f.write_str(&self.model),
        }
    }
}

/// Attribute bag carried by an operation
pub type Attributes = BTreeMap<String, serde_json::Value>;

/// One schema or data action within a migration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    /// Operation kind tag
    pub kind: OperationKind,

    /// Model/field the operation acts on
    #[serde(default)]
    pub target: Target,

    /// Free-form attributes (nullable, default_kind, sql, ...)
    #[serde(default)]
    pub attributes: Attributes,

    /// Line of the operation in its source file (1-indexed, best-effort)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
}

impl Operation {
    /// Create an operation with no attributes
    pub fn new(kind: impl Into<OperationKind>, model: impl Into<String>, field: Option<&str>) -> Self {
        Self {
            kind: kind.into(),
            target: Target {
                model: model.into(),
                field: field.map(str::to_string),
            },
            attributes: Attributes::new(),
            line: None,
        }
    }

    /// Set an attribute
    pub fn with_attr(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.attributes.insert(key.to_string(), value.into());
        self
    }

    /// Set the source line
    pub fn at_line(mut self, line: usize) -> Self {
        self.line = Some(line);
        self
    }

    /// Raw attribute value
    pub fn attr(&self, key: &str) -> Option<&serde_json::Value> {
        self.attributes.get(key)
    }

    /// Boolean attribute; `None` if absent or not a boolean
    pub fn attr_bool(&self, key: &str) -> Option<bool> {
        self.attr(key).and_then(serde_json::Value::as_bool)
    }

    /// String attribute; `None` if absent or not a string
    pub fn attr_str(&self, key: &str) -> Option<&str> {
        self.attr(key).and_then(serde_json::Value::as_str)
    }

    /// Non-negative integer attribute
    pub fn attr_u64(&self, key: &str) -> Option<u64> {
        self.attr(key).and_then(serde_json::Value::as_u64)
    }

    /// Text attribute that may be a single string or a list of strings
    /// (statement lists are joined with a space)
    pub fn attr_text(&self, key: &str) -> Option<String> {
        match self.attr(key)? {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Array(items) => {
                let parts: Vec<&str> = items.iter().filter_map(serde_json::Value::as_str).collect();
                if parts.is_empty() {
                    None
                } else {
                    Some(parts.join(" "))
                }
            }
            _ => None,
        }
    }

    /// Nested attribute object (e.g. `previous` on AlterField)
    pub fn attr_object(&self, key: &str) -> Option<&serde_json::Map<String, serde_json::Value>> {
        self.attr(key).and_then(serde_json::Value::as_object)
    }

    /// Short human label, e.g. `AddField(user.email)`
    pub fn describe(&self) -> String {
        format!("{}({})", self.kind, self.target)
    }
}

/// An inline "ignore this rule here" directive extracted from a comment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuppressionDirective {
    /// Line the comment sits on (1-indexed)
    pub line: usize,

    /// Rule ids named by the directive
    pub rules: BTreeSet<String>,

    /// Free-text justification, preserved verbatim
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl SuppressionDirective {
    /// Marker that introduces a directive inside a comment
    pub const MARKER: &'static str = "safe-migrations: ignore";

    /// Parse a directive from one source line
    ///
    /// Accepts `# safe-migrations: ignore SM001, SM002 -- reason`. Returns
    /// `None` if the line carries no directive or names no rule.
    pub fn parse(line: usize, text: &str) -> Option<Self> {
        let start = text.find(Self::MARKER)? + Self::MARKER.len();
        let rest = &text[start..];

        let (ids, reason) = match rest.split_once("--") {
            Some((ids, reason)) => (ids, Some(reason.trim().to_string())),
            None => (rest, None),
        };

        let rules: BTreeSet<String> = ids
            .split(|c: char| c == ',' || c.is_whitespace())
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .collect();

        if rules.is_empty() {
            return None;
        }

        Some(Self {
            line,
            rules,
            reason: reason.filter(|r| !r.is_empty()),
        })
    }
}

fn default_atomic() -> bool {
    true
}

/// One versioned unit of schema/data change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Migration {
    /// Owning application
    pub app: String,

    /// Migration name
    pub name: String,

    /// Declared dependencies (may point into other apps)
    #[serde(default)]
    pub dependencies: BTreeSet<MigrationKey>,

    /// Migrations this one squashes
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub replaces: Vec<MigrationKey>,

    /// Ordered operations
    #[serde(default)]
    pub operations: Vec<Operation>,

    /// Whether the migration runs inside a single transaction
    #[serde(default = "default_atomic")]
    pub atomic: bool,

    /// Source file of the migration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,

    /// Inline suppression directives found in the source file
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suppressions: Vec<SuppressionDirective>,
}

impl Migration {
    /// Create an empty atomic migration
    pub fn new(app: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            app: app.into(),
            name: name.into(),
            dependencies: BTreeSet::new(),
            replaces: Vec::new(),
            operations: Vec::new(),
            atomic: true,
            location: None,
            suppressions: Vec::new(),
        }
    }

    pub fn key(&self) -> MigrationKey {
        MigrationKey::new(self.app.clone(), self.name.clone())
    }

    pub fn depends_on(mut self, app: &str, name: &str) -> Self {
        self.dependencies.insert(MigrationKey::new(app, name));
        self
    }

    pub fn with_operation(mut self, operation: Operation) -> Self {
        self.operations.push(operation);
        self
    }

    pub fn with_atomic(mut self, atomic: bool) -> Self {
        self.atomic = atomic;
        self
    }

    pub fn with_location(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }

    pub fn with_suppression(mut self, directive: SuppressionDirective) -> Self {
        self.suppressions.push(directive);
        self
    }

    pub fn replacing(mut self, app: &str, name: &str) -> Self {
        self.replaces.push(MigrationKey::new(app, name));
        self
    }

    /// Source file path, if known
    pub fn file(&self) -> Option<&str> {
        self.location.as_ref().map(|loc| loc.file.as_str())
    }
}

/// A loader-produced set of migrations (migrations.json)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MigrationSet {
    /// Dialect detected by the loader, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dialect: Option<String>,

    /// All migrations, in loader order
    #[serde(default)]
    pub migrations: Vec<Migration>,
}

impl MigrationSet {
    /// Load a migration set from a JSON file
    pub fn from_file(path: &Path) -> Result<Self, MigrationSetError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| MigrationSetError::IoError(path.display().to_string(), e.to_string()))?;

        Self::from_json(&contents)
            .map_err(|e| MigrationSetError::ParseError(format!("{}: {}", path.display(), e)))
    }

    /// Parse a migration set from a JSON string
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Append another set (dialect of the first set wins)
    pub fn extend(&mut self, other: MigrationSet) {
        if self.dialect.is_none() {
            self.dialect = other.dialect;
        }
        self.migrations.extend(other.migrations);
    }
}

/// Errors loading a migration set
#[derive(Debug, thiserror::Error)]
pub enum MigrationSetError {
    #[error("Failed to read migration set {0}: {1}")]
    IoError(String, String),

    #[error("Failed to parse migration set: {0}")]
    ParseError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_names_round_trip() {
        assert_eq!(OperationKind::from("RunSQL"), OperationKind::RunSql);
        assert_eq!(OperationKind::RunSql.as_str(), "RunSQL");
        assert_eq!(
            OperationKind::from("SeparateDatabaseAndState"),
            OperationKind::Other("SeparateDatabaseAndState".to_string())
        );
    }

    #[test]
    fn migration_defaults_to_atomic() {
        let json = r#"{"app": "blog", "name": "0001_initial"}"#;
        let migration: Migration = serde_json::from_str(json).unwrap();
        assert!(migration.atomic);
        assert!(migration.operations.is_empty());
    }

    #[test]
    fn operation_attribute_accessors() {
        let op = Operation::new("AddField", "user", Some("email"))
            .with_attr("nullable", false)
            .with_attr("max_length", 255)
            .with_attr("sql", serde_json::json!(["SELECT 1;", "SELECT 2;"]));

        assert_eq!(op.attr_bool("nullable"), Some(false));
        assert_eq!(op.attr_u64("max_length"), Some(255));
        assert_eq!(op.attr_text("sql").as_deref(), Some("SELECT 1; SELECT 2;"));
        assert_eq!(op.attr_str("nullable"), None);
        assert_eq!(op.describe(), "AddField(user.email)");
    }

    #[test]
    fn parse_directive_with_reason() {
        let directive = SuppressionDirective::parse(
            12,
            "    # safe-migrations: ignore SM001, SM010 -- table is empty in prod",
        )
        .unwrap();

        assert_eq!(directive.line, 12);
        assert!(directive.rules.contains("SM001"));
        assert!(directive.rules.contains("SM010"));
        assert_eq!(directive.reason.as_deref(), Some("table is empty in prod"));
    }

    #[test]
    fn parse_directive_without_rules() {
        assert!(SuppressionDirective::parse(1, "# safe-migrations: ignore").is_none());
        assert!(SuppressionDirective::parse(1, "# unrelated comment").is_none());
    }

    #[test]
    fn migration_set_from_json() {
        let json = r#"{
            "dialect": "postgresql",
            "migrations": [
                {"app": "blog", "name": "0001_initial", "operations": [
                    {"kind": "AddField", "target": {"model": "post", "field": "title"}, "line": 14}
                ]}
            ]
        }"#;

        let set = MigrationSet::from_json(json).unwrap();
        assert_eq!(set.dialect.as_deref(), Some("postgresql"));
        assert_eq!(set.migrations[0].operations[0].kind, OperationKind::AddField);
        assert_eq!(set.migrations[0].operations[0].line, Some(14));
    }
}
