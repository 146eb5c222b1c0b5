//! Report schema (stable v1)
//!
//! This schema is STABLE and VERSIONED.
//! Breaking changes require a new version.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::issue::{Issue, Severity};

/// Report schema version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportVersion {
    /// Major version (breaking changes)
    pub major: u32,

    /// Minor version (backward-compatible additions)
    pub minor: u32,
}

impl ReportVersion {
    /// Current report schema version
    pub const CURRENT: ReportVersion = ReportVersion { major: 1, minor: 0 };
}

impl std::fmt::Display for ReportVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Run summary handed to reporters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    /// Total number of issues
    pub total: usize,

    /// Number of errors
    pub errors: usize,

    /// Number of warnings
    pub warnings: usize,

    /// Number of info messages
    pub info: usize,

    /// Issue count per rule id
    pub by_rule: BTreeMap<String, usize>,

    /// Issue count per app
    pub by_app: BTreeMap<String, usize>,

    /// Number of migrations analyzed
    pub migrations_checked: usize,
}

impl Summary {
    /// Summarize a list of issues
    pub fn from_issues(issues: &[Issue], migrations_checked: usize) -> Self {
        let mut summary = Self {
            migrations_checked,
            ..Default::default()
        };

        for issue in issues {
            summary.record(issue);
        }

        summary
    }

    fn record(&mut self, issue: &Issue) {
        match issue.severity {
            Severity::Error => self.errors += 1,
            Severity::Warning => self.warnings += 1,
            Severity::Info => self.info += 1,
        }

        self.total += 1;
        *self.by_rule.entry(issue.rule_id.clone()).or_insert(0) += 1;
        *self.by_app.entry(issue.app.clone()).or_insert(0) += 1;
    }

    /// Check if there are any errors
    pub fn has_errors(&self) -> bool {
        self.errors > 0
    }

    /// Process exit code: 1 on any error (or warning when `fail_on_warning`)
    pub fn exit_code(&self, fail_on_warning: bool) -> i32 {
        if self.errors > 0 || (fail_on_warning && self.warnings > 0) {
            1
        } else {
            0
        }
    }
}

/// Check report (report.json v1)
///
/// This is the stable output format.
/// All fields are versioned and backward-compatible.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    /// Schema version
    pub version: ReportVersion,

    /// Timestamp (ISO 8601)
    pub timestamp: String,

    /// Summary statistics
    pub summary: Summary,

    /// All issues, in deterministic order
    pub issues: Vec<Issue>,

    /// Migration graph state (leaves, partial apps, cycles)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub graph: Option<serde_json::Value>,
}

impl Report {
    /// Create a report from issues
    pub fn from_issues(issues: Vec<Issue>, migrations_checked: usize) -> Self {
        Self {
            version: ReportVersion::CURRENT,
            timestamp: chrono::Utc::now().to_rfc3339(),
            summary: Summary::from_issues(&issues, migrations_checked),
            issues,
            graph: None,
        }
    }

    /// Attach a graph snapshot
    pub fn with_graph(mut self, graph: serde_json::Value) -> Self {
        self.graph = Some(graph);
        self
    }

    /// Check if the report has any errors
    pub fn has_errors(&self) -> bool {
        self.summary.has_errors()
    }

    /// Serialize to JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Save to file
    pub fn save_to_file(&self, path: &std::path::Path) -> Result<(), std::io::Error> {
        let json = self.to_json()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        std::fs::write(path, json)
    }
}
