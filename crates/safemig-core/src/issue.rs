//! Issues (diagnostic findings) and severities
//!
//! IMPORTANT: rule ids referenced by issues are part of the public contract.
//! They appear in suppression directives and baselines, so an id is never
//! renamed or reused once released.

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

use crate::migration::OperationKind;

/// Issue severity level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational message
    Info,

    /// Warning - should be reviewed but not blocking
    Warning,

    /// Error - blocking issue that should fail CI
    Error,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }

    /// Parse a severity name, case-insensitively (`warn` is accepted)
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "info" => Some(Self::Info),
            "warning" | "warn" => Some(Self::Warning),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

impl<'de> Deserialize<'de> for Severity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Self::parse(&name).ok_or_else(|| {
            serde::de::Error::custom(format!("unknown severity '{}' (expected error, warning or info)", name))
        })
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Source location in a file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    /// File path relative to project root (empty when only the line is known)
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub file: String,

    /// Optional line number (1-indexed)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
}

impl Location {
    /// Create a new location with just a file path
    pub fn new(file: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            line: None,
        }
    }

    /// Create a location with file and line number
    pub fn with_line(file: impl Into<String>, line: usize) -> Self {
        Self {
            file: file.into(),
            line: Some(line),
        }
    }
}

/// Reference to the operation an issue is attached to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationRef {
    /// Ordinal position within the migration (0-indexed)
    pub index: usize,

    /// Operation kind
    pub kind: OperationKind,

    /// Human label of the target, e.g. `user.email`
    pub target: String,
}

impl OperationRef {
    /// Positional stable key used for fingerprinting
    pub fn stable_key(&self) -> String {
        format!("{}:{}", self.index, self.kind)
    }
}

/// A diagnostic finding produced by a rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    /// Rule id, e.g. `SM001`
    pub rule_id: String,

    /// Effective severity (after overrides)
    pub severity: Severity,

    /// Application the issue belongs to
    pub app: String,

    /// Migration name; `None` for app-level structural issues
    pub migration: Option<String>,

    /// Operation; `None` for app-level structural issues
    pub operation: Option<OperationRef>,

    /// Best-effort source location
    pub location: Option<Location>,

    /// Human-readable message
    pub message: String,

    /// Suggested safe pattern
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,

    /// Stable identity, assigned after analysis
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,

    /// Key used in place of an operation key for structural issues
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structural_key: Option<String>,
}

impl Issue {
    /// Create an issue with minimal fields
    pub fn new(
        rule_id: impl Into<String>,
        severity: Severity,
        app: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            rule_id: rule_id.into(),
            severity,
            app: app.into(),
            migration: None,
            operation: None,
            location: None,
            message: message.into(),
            suggestion: None,
            fingerprint: None,
            structural_key: None,
        }
    }

    /// Attach the migration and operation
    pub fn at_operation(mut self, migration: impl Into<String>, operation: OperationRef) -> Self {
        self.migration = Some(migration.into());
        self.operation = Some(operation);
        self
    }

    /// Set the location
    pub fn with_location(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }

    /// Set the suggestion
    pub fn with_suggestion(mut self, suggestion: Option<String>) -> Self {
        self.suggestion = suggestion;
        self
    }

    /// Mark as an app-level structural issue keyed by `key`
    pub fn structural(mut self, key: impl Into<String>) -> Self {
        self.structural_key = Some(key.into());
        self
    }

    /// Source line, if known
    pub fn line(&self) -> Option<usize> {
        self.location.as_ref().and_then(|loc| loc.line)
    }

    /// Stable operation key: positional for operation issues, the
    /// structural key for app-level issues
    pub fn stable_key(&self) -> String {
        match (&self.operation, &self.structural_key) {
            (Some(op), _) => op.stable_key(),
            (None, Some(key)) => format!("graph:{}", key),
            (None, None) => String::new(),
        }
    }
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {} {}", self.rule_id, self.severity, self.app)?;
        if let Some(migration) = &self.migration {
            write!(f, ".{}", migration)?;
        }
        if let Some(line) = self.line() {
            write!(f, ":{}", line)?;
        }
        write!(f, " {}", self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_only_location_omits_file() {
        let json = serde_json::to_value(Location::with_line("", 12)).unwrap();
        assert_eq!(json, serde_json::json!({"line": 12}));

        let back: Location = serde_json::from_value(json).unwrap();
        assert_eq!(back, Location::with_line("", 12));
    }

    #[test]
    fn severity_parsing() {
        assert_eq!(Severity::parse("ERROR"), Some(Severity::Error));
        assert_eq!(Severity::parse("warn"), Some(Severity::Warning));
        assert_eq!(Severity::parse("Warning"), Some(Severity::Warning));
        assert_eq!(Severity::parse("info"), Some(Severity::Info));
        assert_eq!(Severity::parse("fatal"), None);
    }

    #[test]
    fn severity_ordering() {
        assert!(Severity::Error > Severity::Warning);
        assert!(Severity::Warning > Severity::Info);
    }

    #[test]
    fn issue_serialization() {
        let issue = Issue::new("SM001", Severity::Error, "blog", "Column 'title' is NOT NULL")
            .at_operation(
                "0002_add_title",
                OperationRef {
                    index: 0,
                    kind: OperationKind::AddField,
                    target: "post.title".to_string(),
                },
            )
            .with_location(Location::with_line("blog/migrations/0002_add_title.py", 14));

        let json = serde_json::to_string(&issue).unwrap();
        assert!(json.contains("SM001"));
        assert!(json.contains("\"error\""));
        assert!(json.contains("AddField"));
        assert_eq!(issue.line(), Some(14));
        assert_eq!(issue.stable_key(), "0:AddField");
    }

    #[test]
    fn structural_stable_key() {
        let issue = Issue::new("SM027", Severity::Error, "blog", "two leaves")
            .structural("0002a,0002b");
        assert_eq!(issue.stable_key(), "graph:0002a,0002b");
        assert_eq!(issue.line(), None);
    }
}
