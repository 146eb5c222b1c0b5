//! Rule registry and the per-run active rule set

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, OnceLock};

use safemig_core::{AppRules, Configuration, Dialect, OperationKind, Severity};

use crate::loader::{RuleLoadError, RuleLoader};
use crate::rule::{Category, Rule, RuleSettings};

static RULE_ID: OnceLock<Option<Regex>> = OnceLock::new();

fn is_valid_rule_id(id: &str) -> bool {
    RULE_ID
        .get_or_init(|| Regex::new(r"^SM[0-9]{3}$").ok())
        .as_ref()
        .map_or(false, |re| re.is_match(id))
}

/// Configuration-level registry faults (abort the run)
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("Duplicate rule id '{0}'")]
    DuplicateRuleId(String),

    #[error("Invalid rule id '{0}' (expected SM followed by three digits)")]
    InvalidRuleId(String),
}

/// Rule metadata for listings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleInfo {
    pub rule_id: String,
    pub severity: Severity,
    pub description: String,
    pub categories: Vec<String>,
    pub dialects: Vec<String>,
}

/// Every known rule, keyed by id
#[derive(Default)]
pub struct RuleRegistry {
    rules: BTreeMap<String, Arc<dyn Rule>>,
}

impl RuleRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in rules
    pub fn with_builtin_rules() -> Self {
        let mut registry = Self::new();
        for rule in crate::builtin_rules() {
            registry.rules.insert(rule.id().to_string(), rule);
        }
        registry
    }

    /// Add a rule; ids must be well-formed and unique
    pub fn register(&mut self, rule: Arc<dyn Rule>) -> Result<(), RegistryError> {
        let id = rule.id().to_string();

        if !is_valid_rule_id(&id) {
            return Err(RegistryError::InvalidRuleId(id));
        }
        if self.rules.contains_key(&id) {
            return Err(RegistryError::DuplicateRuleId(id));
        }

        tracing::debug!("Registered rule {}", id);
        self.rules.insert(id, rule);
        Ok(())
    }

    /// Load and register extra rules
    ///
    /// A reference that fails to load is skipped and returned; a loaded rule
    /// with a duplicate or invalid id aborts.
    pub fn load_extra(
        &mut self,
        references: &[String],
        loader: &dyn RuleLoader,
    ) -> Result<Vec<RuleLoadError>, RegistryError> {
        let mut failures = Vec::new();

        for reference in references {
            match loader.load(reference) {
                Ok(rule) => self.register(rule)?,
                Err(err) => {
                    tracing::warn!("{}", err);
                    failures.push(err);
                }
            }
        }

        Ok(failures)
    }

    pub fn get(&self, id: &str) -> Option<&Arc<dyn Rule>> {
        self.rules.get(id)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Rule ids, sorted
    pub fn ids(&self) -> Vec<&str> {
        self.rules.keys().map(String::as_str).collect()
    }

    /// Metadata of every rule, sorted by id
    pub fn catalogue(&self) -> Vec<RuleInfo> {
        self.rules
            .values()
            .map(|rule| RuleInfo {
                rule_id: rule.id().to_string(),
                severity: rule.default_severity(),
                description: rule.description().to_string(),
                categories: rule.categories().iter().map(|c| c.as_str().to_string()).collect(),
                dialects: rule.dialects().names(),
            })
            .collect()
    }

    /// Rules active for a run under `config`
    ///
    /// Disabled rules and categories are dropped, severity overrides applied
    /// and rules whose dialects exclude the active dialect skipped.
    pub fn resolve(&self, config: &Configuration) -> ActiveRuleSet {
        let dialect = config.active_dialect();
        let global = Policy {
            disabled_rules: &config.disabled_rules,
            disabled_categories: &config.disabled_categories,
            enabled_categories: &config.enabled_categories,
        };

        let mut rules = Vec::new();
        for rule in self.rules.values() {
            if !global.allows(rule.as_ref()) {
                continue;
            }

            if !rule.dialects().includes(dialect) {
                tracing::debug!("Skipping {}: not applicable to {:?}", rule.id(), dialect);
                continue;
            }

            rules.push(ActiveRule {
                severity: config.severity_for(rule.id(), rule.default_severity()),
                rule: Arc::clone(rule),
            });
        }

        tracing::debug!("{} of {} rules active", rules.len(), self.rules.len());

        ActiveRuleSet {
            rules,
            dialect,
            settings: RuleSettings::from_config(config),
            app_rules: config.app_rules.clone(),
        }
    }
}

/// Rule/category filter shared by global and per-app policy
struct Policy<'a> {
    disabled_rules: &'a BTreeSet<String>,
    disabled_categories: &'a BTreeSet<String>,
    enabled_categories: &'a BTreeSet<String>,
}

impl<'a> Policy<'a> {
    fn from_app(rules: &'a AppRules) -> Self {
        Self {
            disabled_rules: &rules.disabled_rules,
            disabled_categories: &rules.disabled_categories,
            enabled_categories: &rules.enabled_categories,
        }
    }

    fn allows(&self, rule: &dyn Rule) -> bool {
        if self.disabled_rules.contains(rule.id()) {
            return false;
        }

        let listed = |names: &BTreeSet<String>, category: &Category| {
            names
                .iter()
                .any(|name| Category::from_name(name).as_ref() == Some(category))
        };

        if rule.categories().iter().any(|c| listed(self.disabled_categories, c)) {
            return false;
        }

        self.enabled_categories.is_empty()
            || rule.categories().iter().any(|c| listed(self.enabled_categories, c))
    }
}

/// A rule with its run-wide effective severity
#[derive(Clone)]
pub struct ActiveRule {
    pub rule: Arc<dyn Rule>,
    pub severity: Severity,
}

impl ActiveRule {
    pub fn id(&self) -> &str {
        self.rule.id()
    }
}

/// The resolved rule set for one run
pub struct ActiveRuleSet {
    rules: Vec<ActiveRule>,
    dialect: Option<Dialect>,
    settings: RuleSettings,
    app_rules: BTreeMap<String, AppRules>,
}

impl ActiveRuleSet {
    /// All active rules, sorted by id
    pub fn rules(&self) -> &[ActiveRule] {
        &self.rules
    }

    pub fn get(&self, id: &str) -> Option<&ActiveRule> {
        self.rules.iter().find(|active| active.id() == id)
    }

    /// Active dialect (`None` = every dialect)
    pub fn dialect(&self) -> Option<Dialect> {
        self.dialect
    }

    pub fn settings(&self) -> &RuleSettings {
        &self.settings
    }

    /// Whether per-app policy leaves `rule_id` enabled for `app`
    pub fn is_enabled_for(&self, rule_id: &str, app: &str) -> bool {
        let Some(active) = self.get(rule_id) else {
            return false;
        };

        match self.app_rules.get(app) {
            Some(policy) => Policy::from_app(policy).allows(active.rule.as_ref()),
            None => true,
        }
    }

    /// Rules that inspect `kind` in `app`
    pub fn for_operation<'a>(&'a self, app: &'a str, kind: &'a OperationKind) -> impl Iterator<Item = &'a ActiveRule> + 'a {
        let policy = self.app_rules.get(app).map(Policy::from_app);

        self.rules.iter().filter(move |active| {
            active.rule.applies_to(kind)
                && policy.as_ref().map_or(true, |p| p.allows(active.rule.as_ref()))
        })
    }
}
