//! safemig engine - analysis orchestration
//!
//! This crate implements the run-level logic for safemig:
//! - Parallel rule evaluation over a migration set
//! - Migration graph pass (divergent leaf detection)
//! - Inline suppression resolution
//! - Baseline generation and reconciliation

pub mod analyzer;
pub mod baseline;
pub mod suppression;

pub use analyzer::{analyze, Analysis, Analyzer};
pub use baseline::{Baseline, BaselineError, BASELINE_VERSION};
pub use suppression::{SuppressionMap, SuppressionResolver};
