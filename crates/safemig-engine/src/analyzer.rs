//! Analysis engine
//!
//! Evaluates the active rules against every operation of every migration,
//! runs the migration graph pass, then applies inline suppressions and
//! assigns fingerprints. Output order is a total sort and never depends on
//! input order or thread scheduling.

use std::cmp::Ordering;

use rayon::prelude::*;
use safemig_core::fingerprint;
use safemig_core::{Configuration, Issue, Location, Migration, Operation, OperationRef, Report, Summary};
use safemig_graph::{GraphReport, MigrationGraph};
use safemig_rules::graph::{divergent_leaves_issue, RULE_ID as DIVERGENT_LEAVES};
use safemig_rules::{ActiveRule, ActiveRuleSet, Finding, MigrationContext, RuleRegistry};

use crate::baseline::Baseline;
use crate::suppression::SuppressionResolver;

/// Result of one analysis run
#[derive(Debug, Clone, Default)]
pub struct Analysis {
    /// Reported issues, sorted
    pub issues: Vec<Issue>,

    /// Issues removed by inline directives
    pub suppressed: Vec<Issue>,

    /// Per-app graph state (leaves, partial apps, cycles)
    pub graph: GraphReport,

    /// Migrations evaluated (excluded apps not counted)
    pub migrations_checked: usize,
}

impl Analysis {
    pub fn summary(&self) -> Summary {
        Summary::from_issues(&self.issues, self.migrations_checked)
    }

    pub fn has_errors(&self) -> bool {
        self.summary().has_errors()
    }

    /// Drop issues accepted by `baseline`
    pub fn apply_baseline(mut self, baseline: &Baseline) -> Self {
        self.issues = baseline.apply(self.issues);
        self
    }

    /// Versioned report with the graph state attached
    pub fn into_report(self) -> Report {
        let graph = serde_json::to_value(&self.graph);
        let report = Report::from_issues(self.issues, self.migrations_checked);

        match graph {
            Ok(graph) => report.with_graph(graph),
            Err(e) => {
                tracing::warn!("Graph state left out of the report: {}", e);
                report
            }
        }
    }
}

/// Runs the resolved rule set over migration sets
pub struct Analyzer {
    rules: ActiveRuleSet,
    config: Configuration,

    /// Input is a selected subset (new-only / diff)
    partial: bool,
}

impl Analyzer {
    /// Resolve `registry` against `config`
    pub fn new(registry: &RuleRegistry, config: &Configuration) -> Self {
        Self {
            rules: registry.resolve(config),
            config: config.clone(),
            partial: false,
        }
    }

    /// Mark the input as a partial selection; leaf detection is then skipped
    pub fn partial_selection(mut self, partial: bool) -> Self {
        self.partial = partial;
        self
    }

    pub fn rules(&self) -> &ActiveRuleSet {
        &self.rules
    }

    pub fn analyze(&self, migrations: &[Migration]) -> Analysis {
        let included: Vec<Migration> = migrations
            .iter()
            .filter(|m| !self.config.is_app_excluded(&m.app))
            .cloned()
            .collect();

        let skipped = migrations.len() - included.len();
        if skipped > 0 {
            tracing::debug!("Skipping {} migration(s) in excluded apps", skipped);
        }

        let mut issues: Vec<Issue> = included
            .par_iter()
            .map(|migration| self.check_migration(migration))
            .collect::<Vec<_>>()
            .into_iter()
            .flatten()
            .collect();

        let graph = MigrationGraph::build(&included).assume_partial(self.partial).report();
        issues.extend(self.graph_issues(&graph));

        let (mut issues, suppressed) = SuppressionResolver::from_migrations(&included).apply(issues);

        fingerprint::assign(&mut issues);
        issues.sort_by(compare_issues);

        let analysis = Analysis {
            issues,
            suppressed,
            graph,
            migrations_checked: included.len(),
        };

        let summary = analysis.summary();
        tracing::info!(
            "Checked {} migration(s): {} error(s), {} warning(s), {} info, {} suppressed",
            summary.migrations_checked,
            summary.errors,
            summary.warnings,
            summary.info,
            analysis.suppressed.len()
        );

        analysis
    }

    /// Evaluate every applicable rule against each operation of one migration
    ///
    /// Only `migration` itself is consulted, so verdicts do not depend on
    /// which other migrations are in the input.
    pub fn check_migration(&self, migration: &Migration) -> Vec<Issue> {
        let mut issues = Vec::new();

        for (index, op) in migration.operations.iter().enumerate() {
            let ctx = MigrationContext::new(migration, index, self.rules.dialect(), self.rules.settings());

            for active in self.rules.for_operation(&migration.app, &op.kind) {
                if let Some(finding) = active.rule.check(op, &ctx) {
                    issues.push(build_issue(migration, index, op, active, finding));
                }
            }
        }

        tracing::debug!(
            "Checked {}.{}: {} operation(s), {} issue(s)",
            migration.app,
            migration.name,
            migration.operations.len(),
            issues.len()
        );

        issues
    }

    fn graph_issues(&self, graph: &GraphReport) -> Vec<Issue> {
        let Some(active) = self.rules.get(DIVERGENT_LEAVES) else {
            return Vec::new();
        };

        graph
            .divergent_apps()
            .filter(|(app, _)| self.rules.is_enabled_for(DIVERGENT_LEAVES, app))
            .map(|(app, leaves)| divergent_leaves_issue(app, leaves, active.severity))
            .collect()
    }
}

/// Analyze with the built-in rules
pub fn analyze(migrations: &[Migration], config: &Configuration) -> Analysis {
    Analyzer::new(&RuleRegistry::with_builtin_rules(), config).analyze(migrations)
}

fn build_issue(migration: &Migration, index: usize, op: &Operation, active: &ActiveRule, finding: Finding) -> Issue {
    let operation = OperationRef {
        index,
        kind: op.kind.clone(),
        target: op.target.to_string(),
    };

    let suggestion = finding.suggestion.or_else(|| active.rule.suggestion(op));
    let issue = Issue::new(active.id(), active.severity, &migration.app, finding.message)
        .at_operation(&migration.name, operation)
        .with_suggestion(suggestion);

    let location = match (migration.file(), op.line) {
        (Some(file), Some(line)) => Some(Location::with_line(file, line)),
        (Some(file), None) => Some(Location::new(file)),
        // no file: the line is still kept for inline suppression
        (None, Some(line)) => Some(Location::with_line("", line)),
        (None, None) => None,
    };

    match location {
        Some(location) => issue.with_location(location),
        None => issue,
    }
}

/// Total order: app, migration, line, rule id, operation index, message
fn compare_issues(a: &Issue, b: &Issue) -> Ordering {
    a.app
        .cmp(&b.app)
        .then_with(|| a.migration.cmp(&b.migration))
        .then_with(|| a.line().cmp(&b.line()))
        .then_with(|| a.rule_id.cmp(&b.rule_id))
        .then_with(|| {
            let index = |issue: &Issue| issue.operation.as_ref().map(|op| op.index);
            index(a).cmp(&index(b))
        })
        .then_with(|| a.message.cmp(&b.message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use safemig_core::{OperationKind, SuppressionDirective};

    fn add_title(line: usize) -> Operation {
        Operation::new(OperationKind::AddField, "post", Some("title"))
            .with_attr("field_type", "CharField")
            .with_attr("nullable", false)
            .with_attr("max_length", 200)
            .at_line(line)
    }

    fn blog() -> Migration {
        Migration::new("blog", "0002_add_title")
            .depends_on("blog", "0001_initial")
            .with_location(Location::new("blog/migrations/0002_add_title.py"))
            .with_operation(add_title(12))
    }

    fn initial() -> Migration {
        Migration::new("blog", "0001_initial")
    }

    #[test]
    fn issue_carries_operation_and_location() {
        let analysis = analyze(&[initial(), blog()], &Configuration::default());
        let issue = analysis.issues.iter().find(|i| i.rule_id == "SM001").unwrap();

        assert_eq!(issue.migration.as_deref(), Some("0002_add_title"));
        assert_eq!(issue.line(), Some(12));
        assert_eq!(issue.operation.as_ref().map(|op| op.index), Some(0));
        assert!(issue.fingerprint.is_some());
        assert!(issue.suggestion.is_some());
    }

    #[test]
    fn excluded_apps_are_skipped() {
        let mut config = Configuration::default();
        config.excluded_apps.push("blog".to_string());

        let analysis = analyze(&[initial(), blog()], &config);
        assert!(analysis.issues.is_empty());
        assert_eq!(analysis.migrations_checked, 0);
    }

    #[test]
    fn suppressed_issues_are_reported_separately() {
        let directive = SuppressionDirective::parse(11, "# safe-migrations: ignore SM001 -- backfilled").unwrap();
        let migration = blog().with_suppression(directive);

        let analysis = analyze(&[initial(), migration], &Configuration::default());
        assert!(analysis.issues.iter().all(|i| i.rule_id != "SM001"));
        assert!(analysis.suppressed.iter().any(|i| i.rule_id == "SM001"));
    }

    #[test]
    fn divergent_app_gets_one_structural_issue() {
        let migrations = vec![
            initial(),
            Migration::new("blog", "0002a").depends_on("blog", "0001_initial"),
            Migration::new("blog", "0002b").depends_on("blog", "0001_initial"),
        ];

        let analysis = analyze(&migrations, &Configuration::default());
        let structural: Vec<&Issue> = analysis.issues.iter().filter(|i| i.rule_id == "SM027").collect();

        assert_eq!(structural.len(), 1);
        assert!(structural[0].migration.is_none());
    }

    #[test]
    fn partial_selection_skips_leaf_detection() {
        let migrations = vec![
            Migration::new("blog", "0002a").depends_on("blog", "0001_initial"),
            Migration::new("blog", "0002b").depends_on("blog", "0001_initial"),
        ];

        let analyzer = Analyzer::new(&RuleRegistry::with_builtin_rules(), &Configuration::default())
            .partial_selection(true);
        let analysis = analyzer.analyze(&migrations);

        assert!(analysis.issues.is_empty());
        assert!(analysis.graph.partial_apps.contains("blog"));
    }

    #[test]
    fn per_app_policy_disables_graph_rule() {
        let mut config = Configuration::default();
        config
            .app_rules
            .entry("blog".to_string())
            .or_default()
            .disabled_rules
            .insert("SM027".to_string());

        let migrations = vec![
            initial(),
            Migration::new("blog", "0002a").depends_on("blog", "0001_initial"),
            Migration::new("blog", "0002b").depends_on("blog", "0001_initial"),
        ];

        let analysis = analyze(&migrations, &config);
        assert!(analysis.issues.is_empty());
        assert_eq!(analysis.graph.leaves["blog"].len(), 2);
    }

    #[test]
    fn report_includes_graph() {
        let report = analyze(&[initial(), blog()], &Configuration::default()).into_report();
        assert!(report.graph.is_some());
        assert_eq!(report.summary.migrations_checked, 2);
    }

    #[test]
    fn line_without_file_keeps_line_only() {
        let migration = Migration::new("blog", "0002_add_title")
            .depends_on("blog", "0001_initial")
            .with_operation(add_title(7));

        let analysis = analyze(&[initial(), migration], &Configuration::default());
        let issue = analysis.issues.iter().find(|i| i.rule_id == "SM001").unwrap();
        assert_eq!(issue.line(), Some(7));

        let json = serde_json::to_value(issue).unwrap();
        assert_eq!(json["location"], serde_json::json!({"line": 7}));
    }
}
