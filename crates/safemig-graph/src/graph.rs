//! Per-app migration dependency graph
//!
//! Edges point from a migration to the migrations it depends on. Leaf status
//! is always computed per app; cross-app edges are kept for inspection only.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

use safemig_core::{Migration, MigrationKey};

/// Node identifier (migration name within its app)
pub type NodeId = String;

/// Dependency names that refer to "some migration of that app" rather than a
/// concrete node
const PSEUDO_DEPENDENCIES: [&str; 2] = ["__first__", "__latest__"];

/// A dependency cycle inside one app
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("Dependency cycle in app '{app}' between migrations: {}", .migrations.join(", "))]
pub struct GraphCycleError {
    /// App whose graph is cyclic
    pub app: String,

    /// Migrations that could not be ordered, sorted by name
    pub migrations: Vec<NodeId>,
}

/// Dependency graph of a single app
#[derive(Debug, Clone, Default)]
pub struct AppGraph {
    /// App label
    app: String,

    /// Forward edges: migration -> same-app migrations it depends on
    parents: BTreeMap<NodeId, BTreeSet<NodeId>>,

    /// Reverse edges: migration -> same-app migrations that depend on it
    children: BTreeMap<NodeId, BTreeSet<NodeId>>,

    /// Dependencies on other apps (tracked, never used for leaves)
    external: BTreeMap<NodeId, BTreeSet<MigrationKey>>,

    /// Same-app dependencies that are not in the input
    missing: BTreeSet<NodeId>,
}

impl AppGraph {
    fn new(app: &str) -> Self {
        Self {
            app: app.to_string(),
            ..Default::default()
        }
    }

    fn add_node(&mut self, name: &str) {
        self.parents.entry(name.to_string()).or_default();
        self.children.entry(name.to_string()).or_default();
    }

    /// App label
    pub fn app(&self) -> &str {
        &self.app
    }

    /// All migrations in the graph, sorted
    pub fn nodes(&self) -> Vec<&NodeId> {
        self.parents.keys().collect()
    }

    /// Get immediate same-app dependencies of a migration
    pub fn parents(&self, name: &str) -> Vec<&NodeId> {
        self.parents
            .get(name)
            .map(|deps| deps.iter().collect())
            .unwrap_or_default()
    }

    /// Get immediate same-app dependents of a migration
    pub fn children(&self, name: &str) -> Vec<&NodeId> {
        self.children
            .get(name)
            .map(|deps| deps.iter().collect())
            .unwrap_or_default()
    }

    /// Dependencies of a migration that point into other apps
    pub fn external_dependencies(&self, name: &str) -> Vec<&MigrationKey> {
        self.external
            .get(name)
            .map(|deps| deps.iter().collect())
            .unwrap_or_default()
    }

    /// Same-app dependencies that are absent from the input
    pub fn missing(&self) -> &BTreeSet<NodeId> {
        &self.missing
    }

    /// Whether the input holds only part of this app's history
    pub fn is_partial(&self) -> bool {
        !self.missing.is_empty()
    }

    /// Migrations no other migration of this app depends on, sorted
    pub fn leaves(&self) -> Vec<NodeId> {
        self.children
            .iter()
            .filter(|(_, dependents)| dependents.is_empty())
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Dependencies-first order of the app's migrations
    pub fn topological_sort(&self) -> Result<Vec<NodeId>, GraphCycleError> {
        let mut in_degree: BTreeMap<&NodeId, usize> = self
            .parents
            .iter()
            .map(|(node, parents)| (node, parents.len()))
            .collect();

        let mut queue: VecDeque<&NodeId> = in_degree
            .iter()
            .filter(|(_, &degree)| degree == 0)
            .map(|(node, _)| *node)
            .collect();

        let mut result = Vec::new();

        // Kahn's algorithm
        while let Some(node) = queue.pop_front() {
            result.push(node.clone());

            if let Some(children) = self.children.get(node) {
                for child in children {
                    if let Some(degree) = in_degree.get_mut(child) {
                        *degree -= 1;
                        if *degree == 0 {
                            queue.push_back(child);
                        }
                    }
                }
            }
        }

        if result.len() == self.parents.len() {
            Ok(result)
        } else {
            let migrations = in_degree
                .into_iter()
                .filter(|(_, degree)| *degree > 0)
                .map(|(node, _)| node.clone())
                .collect();

            Err(GraphCycleError {
                app: self.app.clone(),
                migrations,
            })
        }
    }
}

/// Graph state handed to reporters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphReport {
    /// App -> sorted leaf migrations (complete, acyclic apps only)
    pub leaves: BTreeMap<String, Vec<NodeId>>,

    /// Apps whose leaf detection was skipped because the input is partial
    pub partial_apps: BTreeSet<String>,

    /// Apps whose graph is cyclic
    pub cycles: Vec<GraphCycleError>,
}

impl GraphReport {
    /// Apps with more than one leaf migration
    pub fn divergent_apps(&self) -> impl Iterator<Item = (&String, &Vec<NodeId>)> {
        self.leaves.iter().filter(|(_, leaves)| leaves.len() > 1)
    }
}

/// Migration graph of every app in a migration set
#[derive(Debug, Clone, Default)]
pub struct MigrationGraph {
    apps: BTreeMap<String, AppGraph>,

    /// Treat every app as partial (input is a selected subset)
    assume_partial: bool,
}

impl MigrationGraph {
    /// Build per-app graphs from a migration set
    ///
    /// Migrations replaced by a squashed migration present in the input are
    /// collapsed into it; dependencies on them are redirected.
    pub fn build(migrations: &[Migration]) -> Self {
        let present: BTreeSet<MigrationKey> = migrations.iter().map(Migration::key).collect();

        let mut replaced_by: BTreeMap<MigrationKey, MigrationKey> = BTreeMap::new();
        for migration in migrations {
            for replaced in &migration.replaces {
                replaced_by.insert(replaced.clone(), migration.key());
            }
        }

        let resolve = |key: &MigrationKey| -> MigrationKey {
            replaced_by.get(key).cloned().unwrap_or_else(|| key.clone())
        };

        let mut apps: BTreeMap<String, AppGraph> = BTreeMap::new();

        for migration in migrations {
            let key = migration.key();
            if replaced_by.contains_key(&key) {
                tracing::debug!("Collapsing {} into its squashed replacement", key);
                continue;
            }

            let graph = apps
                .entry(migration.app.clone())
                .or_insert_with(|| AppGraph::new(&migration.app));
            graph.add_node(&migration.name);

            for dependency in &migration.dependencies {
                let dependency = resolve(dependency);
                if dependency == key {
                    continue;
                }

                if dependency.app != migration.app {
                    graph
                        .external
                        .entry(migration.name.clone())
                        .or_default()
                        .insert(dependency);
                    continue;
                }

                if PSEUDO_DEPENDENCIES.contains(&dependency.name.as_str()) {
                    continue;
                }

                if !present.contains(&dependency) {
                    graph.missing.insert(dependency.name.clone());
                    continue;
                }

                graph
                    .parents
                    .entry(migration.name.clone())
                    .or_default()
                    .insert(dependency.name.clone());
                graph
                    .children
                    .entry(dependency.name.clone())
                    .or_default()
                    .insert(migration.name.clone());
            }
        }

        Self {
            apps,
            assume_partial: false,
        }
    }

    /// Mark the input as a selected subset: leaf detection is skipped
    pub fn assume_partial(mut self, partial: bool) -> Self {
        self.assume_partial = partial;
        self
    }

    /// Get the graph of one app
    pub fn app(&self, app: &str) -> Option<&AppGraph> {
        self.apps.get(app)
    }

    /// All app labels, sorted
    pub fn apps(&self) -> Vec<&String> {
        self.apps.keys().collect()
    }

    /// Compute leaves, partial apps and cycles
    ///
    /// A cycle aborts the pass for its app only.
    pub fn report(&self) -> GraphReport {
        let mut report = GraphReport::default();

        for (app, graph) in &self.apps {
            if let Err(cycle) = graph.topological_sort() {
                tracing::warn!("{}", cycle);
                report.cycles.push(cycle);
                continue;
            }

            if self.assume_partial || graph.is_partial() {
                tracing::warn!(
                    "Skipping leaf detection for '{}': migration history is incomplete",
                    app
                );
                report.partial_apps.insert(app.clone());
                continue;
            }

            report.leaves.insert(app.clone(), graph.leaves());
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn blog_diverged() -> Vec<Migration> {
        vec![
            Migration::new("blog", "0001"),
            Migration::new("blog", "0002a").depends_on("blog", "0001"),
            Migration::new("blog", "0002b").depends_on("blog", "0001"),
        ]
    }

    #[test]
    fn detects_two_leaves() {
        let graph = MigrationGraph::build(&blog_diverged());
        let report = graph.report();

        assert_eq!(report.leaves.get("blog"), Some(&vec!["0002a".to_string(), "0002b".to_string()]));
        assert_eq!(report.divergent_apps().count(), 1);
    }

    #[test]
    fn merge_migration_resolves_divergence() {
        let mut migrations = blog_diverged();
        migrations.push(
            Migration::new("blog", "0003_merge")
                .depends_on("blog", "0002a")
                .depends_on("blog", "0002b"),
        );

        let report = MigrationGraph::build(&migrations).report();
        assert_eq!(report.leaves.get("blog"), Some(&vec!["0003_merge".to_string()]));
        assert_eq!(report.divergent_apps().count(), 0);
    }

    #[test]
    fn cross_app_edges_do_not_affect_leaves() {
        let migrations = vec![
            Migration::new("blog", "0001"),
            Migration::new("shop", "0001"),
            Migration::new("shop", "0002").depends_on("shop", "0001").depends_on("blog", "0001"),
        ];

        let graph = MigrationGraph::build(&migrations);
        let report = graph.report();

        assert_eq!(report.leaves.get("blog"), Some(&vec!["0001".to_string()]));
        assert_eq!(report.leaves.get("shop"), Some(&vec!["0002".to_string()]));

        let shop = graph.app("shop").unwrap();
        assert_eq!(shop.external_dependencies("0002"), vec![&MigrationKey::new("blog", "0001")]);
        assert_eq!(shop.parents("0002"), vec![&"0001".to_string()]);
    }

    #[test]
    fn cycle_aborts_only_its_app() {
        let migrations = vec![
            Migration::new("blog", "0001").depends_on("blog", "0002"),
            Migration::new("blog", "0002").depends_on("blog", "0001"),
            Migration::new("shop", "0001"),
        ];

        let report = MigrationGraph::build(&migrations).report();

        assert_eq!(report.cycles.len(), 1);
        assert_eq!(report.cycles[0].app, "blog");
        assert_eq!(report.cycles[0].migrations, vec!["0001".to_string(), "0002".to_string()]);
        assert!(!report.leaves.contains_key("blog"));
        assert!(report.leaves.contains_key("shop"));
    }

    #[test]
    fn missing_dependency_marks_app_partial() {
        let migrations = vec![
            Migration::new("blog", "0005").depends_on("blog", "0004"),
            Migration::new("blog", "0006").depends_on("blog", "0004"),
        ];

        let report = MigrationGraph::build(&migrations).report();
        assert!(report.partial_apps.contains("blog"));
        assert!(!report.leaves.contains_key("blog"));
    }

    #[test]
    fn assume_partial_skips_leaf_detection() {
        let report = MigrationGraph::build(&blog_diverged())
            .assume_partial(true)
            .report();

        assert!(report.leaves.is_empty());
        assert!(report.partial_apps.contains("blog"));
    }

    #[test]
    fn squashed_migration_replaces_its_members() {
        let migrations = vec![
            Migration::new("blog", "0001"),
            Migration::new("blog", "0002").depends_on("blog", "0001"),
            Migration::new("blog", "0003").depends_on("blog", "0002"),
            Migration::new("blog", "0001_squashed_0003")
                .replacing("blog", "0001")
                .replacing("blog", "0002")
                .replacing("blog", "0003"),
            Migration::new("blog", "0004").depends_on("blog", "0003"),
        ];

        let graph = MigrationGraph::build(&migrations);
        let blog = graph.app("blog").unwrap();

        assert_eq!(blog.nodes().len(), 2);
        assert_eq!(blog.parents("0004"), vec![&"0001_squashed_0003".to_string()]);
        assert!(!blog.is_partial());
        assert_eq!(graph.report().leaves.get("blog"), Some(&vec!["0004".to_string()]));
    }

    #[test]
    fn topological_order_puts_dependencies_first() {
        let migrations = vec![
            Migration::new("blog", "0002").depends_on("blog", "0001"),
            Migration::new("blog", "0001"),
            Migration::new("blog", "0003").depends_on("blog", "0002"),
        ];

        let graph = MigrationGraph::build(&migrations);
        let order = graph.app("blog").unwrap().topological_sort().unwrap();
        assert_eq!(order, vec!["0001", "0002", "0003"]);
    }
}
