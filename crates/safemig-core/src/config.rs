//! Configuration schema (safemig.toml)
//!
//! Layering: [`Configuration::default`] < settings file < CLI flags.
//! Each layer is a [`PartialConfiguration`]; a later layer replaces a field
//! only when it sets it.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::issue::Severity;

/// Target database engine family
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// PostgreSQL (supports concurrent index builds)
    Postgresql,

    /// MySQL / MariaDB
    Mysql,

    /// SQLite
    Sqlite,

    /// Oracle
    Oracle,
}

impl Dialect {
    pub const ALL: [Dialect; 4] = [Self::Postgresql, Self::Mysql, Self::Sqlite, Self::Oracle];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Postgresql => "postgresql",
            Self::Mysql => "mysql",
            Self::Sqlite => "sqlite",
            Self::Oracle => "oracle",
        }
    }

    /// Resolve a dialect name (common aliases accepted)
    pub fn from_name(name: &str) -> Result<Self, UnknownDialect> {
        match name.trim().to_ascii_lowercase().as_str() {
            "postgresql" | "postgres" | "pg" | "postgis" => Ok(Self::Postgresql),
            "mysql" | "mariadb" => Ok(Self::Mysql),
            "sqlite" | "sqlite3" => Ok(Self::Sqlite),
            "oracle" => Ok(Self::Oracle),
            _ => Err(UnknownDialect(name.to_string())),
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A dialect name that matches no known engine
///
/// Not fatal: analysis falls back to running rules for every dialect.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown dialect '{0}', applying rules for all dialects")]
pub struct UnknownDialect(pub String);

/// Rule policy for a single application
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppRules {
    /// Rules disabled for this app only
    #[serde(default)]
    pub disabled_rules: BTreeSet<String>,

    /// Categories disabled for this app only
    #[serde(default)]
    pub disabled_categories: BTreeSet<String>,

    /// Category whitelist for this app (empty = no whitelist)
    #[serde(default)]
    pub enabled_categories: BTreeSet<String>,
}

fn default_dialect() -> String {
    Dialect::Postgresql.as_str().to_string()
}

fn default_excluded_apps() -> Vec<String> {
    ["admin", "auth", "contenttypes", "sessions", "messages", "staticfiles"]
        .iter()
        .map(|app| app.to_string())
        .collect()
}

fn default_true() -> bool {
    true
}

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    /// Target dialect name
    #[serde(default = "default_dialect")]
    pub dialect: String,

    /// Rules disabled everywhere
    #[serde(default)]
    pub disabled_rules: BTreeSet<String>,

    /// Rule id -> severity, applied to every issue of that rule
    #[serde(default)]
    pub severity_overrides: BTreeMap<String, Severity>,

    /// Apps skipped entirely (glob patterns allowed)
    #[serde(default = "default_excluded_apps")]
    pub excluded_apps: Vec<String>,

    /// Extra rule references, resolved by a rule loader
    #[serde(default)]
    pub extra_rules: Vec<String>,

    /// Fail the run on warnings as well as errors
    #[serde(default)]
    pub fail_on_warning: bool,

    /// Categories disabled everywhere
    #[serde(default)]
    pub disabled_categories: BTreeSet<String>,

    /// Category whitelist (empty = every category)
    #[serde(default)]
    pub enabled_categories: BTreeSet<String>,

    /// Per-app rule policy
    #[serde(default)]
    pub app_rules: BTreeMap<String, AppRules>,

    /// Whether the project stores timezone-aware datetimes
    #[serde(default = "default_true")]
    pub timezone_aware: bool,

    /// Migration framework version, "major.minor"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub framework_version: Option<String>,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            dialect: default_dialect(),
            disabled_rules: BTreeSet::new(),
            severity_overrides: BTreeMap::new(),
            excluded_apps: default_excluded_apps(),
            extra_rules: Vec::new(),
            fail_on_warning: false,
            disabled_categories: BTreeSet::new(),
            enabled_categories: BTreeSet::new(),
            app_rules: BTreeMap::new(),
            timezone_aware: true,
            framework_version: None,
        }
    }
}

impl Configuration {
    /// Load config from TOML file
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let partial = PartialConfiguration::from_file(path)?;
        Ok(Self::default().layered(partial))
    }

    /// Load config from TOML string
    pub fn from_toml(toml: &str) -> Result<Self, ConfigError> {
        let partial = PartialConfiguration::from_toml(toml)?;
        Ok(Self::default().layered(partial))
    }

    /// Save config to TOML file
    pub fn save_to_file(&self, path: &std::path::Path) -> Result<(), ConfigError> {
        let toml = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, toml)
            .map_err(|e| ConfigError::IoError(path.display().to_string(), e.to_string()))?;

        Ok(())
    }

    /// Apply a higher-precedence layer on top of this configuration
    pub fn layered(mut self, layer: PartialConfiguration) -> Self {
        if let Some(dialect) = layer.dialect {
            self.dialect = dialect;
        }
        if let Some(rules) = layer.disabled_rules {
            self.disabled_rules = rules;
        }
        if let Some(overrides) = layer.severity_overrides {
            self.severity_overrides = overrides;
        }
        if let Some(apps) = layer.excluded_apps {
            self.excluded_apps = apps;
        }
        if let Some(extra) = layer.extra_rules {
            self.extra_rules = extra;
        }
        if let Some(fail) = layer.fail_on_warning {
            self.fail_on_warning = fail;
        }
        if let Some(categories) = layer.disabled_categories {
            self.disabled_categories = categories;
        }
        if let Some(categories) = layer.enabled_categories {
            self.enabled_categories = categories;
        }
        if let Some(app_rules) = layer.app_rules {
            self.app_rules = app_rules;
        }
        if let Some(aware) = layer.timezone_aware {
            self.timezone_aware = aware;
        }
        if let Some(version) = layer.framework_version {
            self.framework_version = Some(version);
        }
        self
    }

    /// Resolved dialect; `None` means "every dialect"
    pub fn active_dialect(&self) -> Option<Dialect> {
        match Dialect::from_name(&self.dialect) {
            Ok(dialect) => Some(dialect),
            Err(err) => {
                tracing::warn!("{}", err);
                None
            }
        }
    }

    /// Severity for a rule, or its default when not overridden
    pub fn severity_for(&self, rule_id: &str, default: Severity) -> Severity {
        self.severity_overrides.get(rule_id).copied().unwrap_or(default)
    }

    /// Check if an app should be skipped
    pub fn is_app_excluded(&self, app: &str) -> bool {
        self.excluded_apps.iter().any(|pattern| {
            if pattern.contains('*') {
                glob_match(pattern, app)
            } else {
                pattern == app
            }
        })
    }

    /// Parsed framework version as `(major, minor)`
    pub fn framework_version(&self) -> Option<(u32, u32)> {
        let raw = self.framework_version.as_deref()?;
        let mut parts = raw.trim().split('.');
        let major = parts.next()?.parse().ok()?;
        let minor = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
        Some((major, minor))
    }
}

/// One configuration layer; unset fields leave lower layers untouched
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PartialConfiguration {
    pub dialect: Option<String>,
    pub disabled_rules: Option<BTreeSet<String>>,
    pub severity_overrides: Option<BTreeMap<String, Severity>>,
    pub excluded_apps: Option<Vec<String>>,
    pub extra_rules: Option<Vec<String>>,
    pub fail_on_warning: Option<bool>,
    pub disabled_categories: Option<BTreeSet<String>>,
    pub enabled_categories: Option<BTreeSet<String>>,
    pub app_rules: Option<BTreeMap<String, AppRules>>,
    pub timezone_aware: Option<bool>,
    pub framework_version: Option<String>,
}

impl PartialConfiguration {
    /// Load a layer from TOML file
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.display().to_string(), e.to_string()))?;

        toml::from_str(&contents)
            .map_err(|e| ConfigError::ParseError(format!("{}: {}", path.display(), e)))
    }

    /// Load a layer from TOML string
    pub fn from_toml(toml: &str) -> Result<Self, ConfigError> {
        toml::from_str(toml)
            .map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

/// Glob matching where `*` matches any run of characters
fn glob_match(pattern: &str, text: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    let (first, last) = match parts.as_slice() {
        [only] => return *only == text,
        [first, .., last] => (*first, *last),
        [] => return text.is_empty(),
    };

    if text.len() < first.len() + last.len() || !text.starts_with(first) || !text.ends_with(last) {
        return false;
    }

    let mut rest = &text[first.len()..text.len() - last.len()];
    for part in &parts[1..parts.len() - 1] {
        match rest.find(part) {
            Some(pos) => rest = &rest[pos + part.len()..],
            None => return false,
        }
    }

    true
}

/// Config error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config {0}: {1}")]
    IoError(String, String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Serialize error: {0}")]
    SerializeError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Configuration::default();
        assert_eq!(config.active_dialect(), Some(Dialect::Postgresql));
        assert!(config.is_app_excluded("contenttypes"));
        assert!(!config.is_app_excluded("blog"));
        assert!(config.timezone_aware);
    }

    #[test]
    fn severity_override() {
        let config = Configuration::from_toml(
            r#"
            [severity_overrides]
            SM002 = "INFO"
            SM006 = "warn"
            "#,
        )
        .unwrap();

        assert_eq!(config.severity_for("SM002", Severity::Warning), Severity::Info);
        assert_eq!(config.severity_for("SM006", Severity::Info), Severity::Warning);
        assert_eq!(config.severity_for("SM001", Severity::Error), Severity::Error);
    }

    #[test]
    fn invalid_severity_is_a_parse_error() {
        let result = Configuration::from_toml("[severity_overrides]\nSM002 = \"fatal\"\n");
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn layers_apply_in_precedence_order() {
        let file = PartialConfiguration::from_toml(
            r#"
            dialect = "mysql"
            disabled_rules = ["SM006"]
            fail_on_warning = true
            "#,
        )
        .unwrap();

        let cli = PartialConfiguration {
            dialect: Some("sqlite".to_string()),
            ..Default::default()
        };

        let config = Configuration::default().layered(file).layered(cli);

        assert_eq!(config.active_dialect(), Some(Dialect::Sqlite));
        assert!(config.disabled_rules.contains("SM006"));
        assert!(config.fail_on_warning);
        // untouched by either layer
        assert!(config.is_app_excluded("auth"));
    }

    #[test]
    fn unknown_dialect_falls_back_to_all() {
        let config = Configuration {
            dialect: "cockroach".to_string(),
            ..Default::default()
        };
        assert_eq!(config.active_dialect(), None);
        assert_eq!(
            Dialect::from_name("cockroach"),
            Err(UnknownDialect("cockroach".to_string()))
        );
    }

    #[test]
    fn dialect_aliases() {
        assert_eq!(Dialect::from_name("Postgres"), Ok(Dialect::Postgresql));
        assert_eq!(Dialect::from_name("mariadb"), Ok(Dialect::Mysql));
        assert_eq!(Dialect::from_name("sqlite3"), Ok(Dialect::Sqlite));
    }

    #[test]
    fn framework_version_parsing() {
        let mut config = Configuration::default();
        assert_eq!(config.framework_version(), None);

        config.framework_version = Some("3.2".to_string());
        assert_eq!(config.framework_version(), Some((3, 2)));

        config.framework_version = Some("5".to_string());
        assert_eq!(config.framework_version(), Some((5, 0)));
    }

    #[test]
    fn config_toml_roundtrip() {
        let config = Configuration::default();
        let toml = toml::to_string(&config).unwrap();
        let parsed = Configuration::from_toml(&toml).unwrap();
        assert_eq!(config, parsed);
    }

    #[test]
    fn save_and_reload_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("safemig.toml");

        let mut config = Configuration::default();
        config.dialect = "mysql".to_string();
        config.disabled_rules.insert("SM008".to_string());
        config.save_to_file(&path).unwrap();

        let loaded = Configuration::from_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn missing_file_is_io_error() {
        let result = Configuration::from_file(std::path::Path::new("/nonexistent/safemig.toml"));
        assert!(matches!(result, Err(ConfigError::IoError(_, _))));
    }

    #[test]
    fn app_rules_from_toml() {
        let config = Configuration::from_toml(
            r#"
            [app_rules.legacy]
            disabled_rules = ["SM001"]
            disabled_categories = ["indexes"]
            "#,
        )
        .unwrap();

        let legacy = config.app_rules.get("legacy").unwrap();
        assert!(legacy.disabled_rules.contains("SM001"));
        assert!(legacy.disabled_categories.contains("indexes"));
    }

    #[test]
    fn glob_matching() {
        assert!(glob_match("*", "anything"));
        assert!(glob_match("django_*", "django_celery_beat"));
        assert!(!glob_match("django_*", "blog"));
        assert!(!glob_match("ab*ba", "aba"));

        assert!(glob_match("*celery*", "django_celery_beat"));
        assert!(glob_match("*celery*", "celery"));
        assert!(glob_match("django_*_log*", "django_admin_logentries"));
        assert!(!glob_match("django_*_log*", "django_admin"));
        assert!(!glob_match("a*b*c", "acb"));
        assert!(glob_match("**", ""));
    }

    #[test]
    fn excluded_apps_with_several_stars() {
        let config = Configuration {
            excluded_apps: vec!["*celery*".to_string()],
            ..Default::default()
        };
        assert!(config.is_app_excluded("django_celery_beat"));
        assert!(!config.is_app_excluded("blog"));
    }
}
