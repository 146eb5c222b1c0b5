//! Migration dependency graph
//!
//! This crate handles:
//! - Building per-app dependency graphs from a migration set
//! - Collapsing squashed migrations into their replacement
//! - Leaf detection (divergent histories that need a merge migration)
//! - Cycle and partial-input detection

pub mod graph;

pub use graph::{AppGraph, GraphCycleError, GraphReport, MigrationGraph, NodeId};
