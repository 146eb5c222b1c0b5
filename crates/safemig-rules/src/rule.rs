//! The `Rule` trait and the context rules are evaluated in

use serde::{Deserialize, Serialize};
use std::fmt;

use safemig_core::{Configuration, Dialect, Migration, Operation, OperationKind, Severity};

/// Rule grouping used for bulk enable/disable
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    SchemaChanges,
    Destructive,
    Locking,
    Indexes,
    Constraints,
    Reversibility,
    DataMigrations,
    Postgresql,
    Naming,
    Informational,
    HighRisk,
    Security,
}

impl Category {
    pub const ALL: [Category; 12] = [
        Self::SchemaChanges,
        Self::Destructive,
        Self::Locking,
        Self::Indexes,
        Self::Constraints,
        Self::Reversibility,
        Self::DataMigrations,
        Self::Postgresql,
        Self::Naming,
        Self::Informational,
        Self::HighRisk,
        Self::Security,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SchemaChanges => "schema-changes",
            Self::Destructive => "destructive",
            Self::Locking => "locking",
            Self::Indexes => "indexes",
            Self::Constraints => "constraints",
            Self::Reversibility => "reversibility",
            Self::DataMigrations => "data-migrations",
            Self::Postgresql => "postgresql",
            Self::Naming => "naming",
            Self::Informational => "informational",
            Self::HighRisk => "high-risk",
            Self::Security => "security",
        }
    }

    /// Look up a category by name (`_` and `-` are interchangeable)
    pub fn from_name(name: &str) -> Option<Self> {
        let normalized = name.trim().to_ascii_lowercase().replace('_', "-");
        Self::ALL.into_iter().find(|c| c.as_str() == normalized)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Dialects a rule applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialects {
    /// Every dialect
    All,

    /// Only the listed dialects
    Only(&'static [Dialect]),
}

impl Dialects {
    /// Whether the rule runs under `active` (`None` = every dialect)
    pub fn includes(&self, active: Option<Dialect>) -> bool {
        match (self, active) {
            (Self::All, _) => true,
            (Self::Only(_), None) => true,
            (Self::Only(list), Some(dialect)) => list.contains(&dialect),
        }
    }

    /// Dialect names for listings (`["all"]` for every dialect)
    pub fn names(&self) -> Vec<String> {
        match self {
            Self::All => vec!["all".to_string()],
            Self::Only(list) => list.iter().map(|d| d.as_str().to_string()).collect(),
        }
    }
}

/// What a rule reports about one operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finding {
    pub message: String,
    pub suggestion: Option<String>,
}

impl Finding {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            suggestion: None,
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }
}

/// Run-wide settings some rules consult
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleSettings {
    /// Project stores timezone-aware datetimes
    pub timezone_aware: bool,

    /// Framework version as `(major, minor)`, if known
    pub framework_version: Option<(u32, u32)>,
}

impl Default for RuleSettings {
    fn default() -> Self {
        Self {
            timezone_aware: true,
            framework_version: None,
        }
    }
}

impl RuleSettings {
    pub fn from_config(config: &Configuration) -> Self {
        Self {
            timezone_aware: config.timezone_aware,
            framework_version: config.framework_version(),
        }
    }
}

/// Read-only view of the migration an operation belongs to
#[derive(Debug, Clone, Copy)]
pub struct MigrationContext<'a> {
    /// Owning migration
    pub migration: &'a Migration,

    /// Position of the operation being checked
    pub index: usize,

    /// Active dialect (`None` = every dialect)
    pub dialect: Option<Dialect>,

    /// Run-wide settings
    pub settings: &'a RuleSettings,
}

impl<'a> MigrationContext<'a> {
    pub fn new(migration: &'a Migration, index: usize, dialect: Option<Dialect>, settings: &'a RuleSettings) -> Self {
        Self {
            migration,
            index,
            dialect,
            settings,
        }
    }

    /// Operations before the current one in the same migration
    pub fn preceding(&self) -> &'a [Operation] {
        let end = self.index.min(self.migration.operations.len());
        &self.migration.operations[..end]
    }

    /// Whether the migration runs in a single transaction
    pub fn is_atomic(&self) -> bool {
        self.migration.atomic
    }

    /// Whether `model` was created earlier in this migration
    pub fn model_created_earlier(&self, model: &str) -> bool {
        self.preceding().iter().any(|op| {
            op.kind == OperationKind::CreateModel && op.target.model.eq_ignore_ascii_case(model)
        })
    }
}

/// A deployment-safety check over one operation
///
/// Rules are stateless; `check` must never panic on unexpected attribute
/// combinations and returns `None` for "no match".
pub trait Rule: Send + Sync {
    /// Stable id, `SM` followed by three digits
    fn id(&self) -> &str;

    fn default_severity(&self) -> Severity;

    /// One-line description
    fn description(&self) -> &str;

    fn categories(&self) -> &[Category];

    fn dialects(&self) -> Dialects {
        Dialects::All
    }

    /// Whether the rule inspects operations of this kind
    fn applies_to(&self, kind: &OperationKind) -> bool;

    fn check(&self, operation: &Operation, ctx: &MigrationContext<'_>) -> Option<Finding>;

    /// Safe pattern shown with every finding
    fn suggestion(&self, _operation: &Operation) -> Option<String> {
        None
    }
}

impl fmt::Debug for dyn Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rule").field("id", &self.id()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_names() {
        assert_eq!(Category::from_name("data_migrations"), Some(Category::DataMigrations));
        assert_eq!(Category::from_name("High-Risk"), Some(Category::HighRisk));
        assert_eq!(Category::from_name("nope"), None);
        for category in Category::ALL {
            assert_eq!(Category::from_name(category.as_str()), Some(category));
        }
    }

    #[test]
    fn dialect_inclusion() {
        let pg_only = Dialects::Only(&[Dialect::Postgresql]);
        assert!(pg_only.includes(Some(Dialect::Postgresql)));
        assert!(!pg_only.includes(Some(Dialect::Mysql)));
        assert!(pg_only.includes(None));
        assert!(Dialects::All.includes(Some(Dialect::Oracle)));
    }

    #[test]
    fn context_preceding_operations() {
        let migration = Migration::new("blog", "0002")
            .with_operation(Operation::new("CreateModel", "Post", None))
            .with_operation(Operation::new("AddField", "post", Some("title")));
        let settings = RuleSettings::default();

        let ctx = MigrationContext::new(&migration, 1, None, &settings);
        assert_eq!(ctx.preceding().len(), 1);
        assert!(ctx.model_created_earlier("post"));

        let first = MigrationContext::new(&migration, 0, None, &settings);
        assert!(!first.model_created_earlier("post"));
    }
}
