//! Inline suppression resolution
//!
//! A directive covers issues of the named rules on its own line and on the
//! line immediately after it (a comment above the operation). Unknown rule
//! ids simply match nothing.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use safemig_core::{Issue, Migration, SuppressionDirective};

/// Source line -> rule ids ignored there, for one file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SuppressionMap {
    lines: BTreeMap<usize, BTreeSet<String>>,
}

impl SuppressionMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from the directives of one migration file
    pub fn from_directives(directives: &[SuppressionDirective]) -> Self {
        let mut map = Self::new();
        for directive in directives {
            map.insert(directive.line, directive.rules.iter().cloned());
        }
        map
    }

    pub fn insert(&mut self, line: usize, rules: impl IntoIterator<Item = String>) {
        self.lines.entry(line).or_default().extend(rules);
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    fn ignores(&self, line: usize, rule_id: &str) -> bool {
        self.lines.get(&line).map_or(false, |rules| rules.contains(rule_id))
    }

    /// Whether `rule_id` is ignored at `line` (same line or the line before)
    pub fn covers(&self, line: usize, rule_id: &str) -> bool {
        self.ignores(line, rule_id) || (line > 1 && self.ignores(line - 1, rule_id))
    }
}

/// Removes issues covered by inline directives
#[derive(Debug, Default)]
pub struct SuppressionResolver {
    maps: HashMap<(String, String), SuppressionMap>,
}

impl SuppressionResolver {
    /// Collect the directives of every migration
    pub fn from_migrations(migrations: &[Migration]) -> Self {
        let maps = migrations
            .iter()
            .filter(|m| !m.suppressions.is_empty())
            .map(|m| {
                (
                    (m.app.clone(), m.name.clone()),
                    SuppressionMap::from_directives(&m.suppressions),
                )
            })
            .collect();

        Self { maps }
    }

    /// Whether an issue is covered; issues without a line never are
    pub fn is_suppressed(&self, issue: &Issue) -> bool {
        let (Some(migration), Some(line)) = (&issue.migration, issue.line()) else {
            return false;
        };

        self.maps
            .get(&(issue.app.clone(), migration.clone()))
            .map_or(false, |map| map.covers(line, &issue.rule_id))
    }

    /// Split issues into `(kept, suppressed)`
    pub fn apply(&self, issues: Vec<Issue>) -> (Vec<Issue>, Vec<Issue>) {
        if self.maps.is_empty() {
            return (issues, Vec::new());
        }

        let (suppressed, kept): (Vec<Issue>, Vec<Issue>) =
            issues.into_iter().partition(|issue| self.is_suppressed(issue));

        if !suppressed.is_empty() {
            tracing::debug!("{} issue(s) suppressed by inline directives", suppressed.len());
        }

        (kept, suppressed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use safemig_core::{Location, OperationKind, OperationRef, Severity};

    fn issue_at(rule: &str, line: Option<usize>) -> Issue {
        let issue = Issue::new(rule, Severity::Error, "blog", "m").at_operation(
            "0002_add_title",
            OperationRef {
                index: 0,
                kind: OperationKind::AddField,
                target: "post.title".to_string(),
            },
        );
        match line {
            Some(line) => issue.with_location(Location::with_line("blog/migrations/0002_add_title.py", line)),
            None => issue,
        }
    }

    fn migration_with(directive: &str, line: usize) -> Migration {
        let directive = SuppressionDirective::parse(line, directive).unwrap();
        Migration::new("blog", "0002_add_title").with_suppression(directive)
    }

    #[test]
    fn same_line_and_preceding_line() {
        let resolver = SuppressionResolver::from_migrations(&[migration_with("# safe-migrations: ignore SM001", 10)]);

        assert!(resolver.is_suppressed(&issue_at("SM001", Some(10))));
        assert!(resolver.is_suppressed(&issue_at("SM001", Some(11))));
        assert!(!resolver.is_suppressed(&issue_at("SM001", Some(12))));
        assert!(!resolver.is_suppressed(&issue_at("SM002", Some(10))));
    }

    #[test]
    fn issues_without_line_are_kept() {
        let resolver = SuppressionResolver::from_migrations(&[migration_with("# safe-migrations: ignore SM001", 10)]);
        assert!(!resolver.is_suppressed(&issue_at("SM001", None)));
    }

    #[test]
    fn unknown_rule_ids_match_nothing() {
        let resolver = SuppressionResolver::from_migrations(&[migration_with("# safe-migrations: ignore SM999", 10)]);
        let (kept, suppressed) = resolver.apply(vec![issue_at("SM001", Some(10))]);
        assert_eq!(kept.len(), 1);
        assert!(suppressed.is_empty());
    }

    #[test]
    fn directives_are_scoped_to_their_migration() {
        let other = SuppressionDirective::parse(10, "# safe-migrations: ignore SM001").unwrap();
        let resolver = SuppressionResolver::from_migrations(&[
            Migration::new("blog", "0003_other").with_suppression(other),
        ]);
        assert!(!resolver.is_suppressed(&issue_at("SM001", Some(10))));
    }

    #[test]
    fn map_covers_first_line() {
        let mut map = SuppressionMap::new();
        map.insert(1, vec!["SM001".to_string()]);
        assert!(map.covers(1, "SM001"));
        assert!(map.covers(2, "SM001"));
        assert!(!map.covers(3, "SM001"));
    }
}
