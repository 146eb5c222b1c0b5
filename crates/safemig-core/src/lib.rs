//! safemig core
//!
//! Core domain model with stable, versioned types.
//! Never rename rule ids - they are part of the public API.

pub mod config;
pub mod fingerprint;
pub mod issue;
pub mod migration;
pub mod report;

pub use config::{AppRules, ConfigError, Configuration, Dialect, PartialConfiguration, UnknownDialect};
pub use issue::{Issue, Location, OperationRef, Severity};
pub use migration::{
    Attributes, Migration, MigrationKey, MigrationSet, MigrationSetError, Operation, OperationKind,
    SuppressionDirective, Target,
};
pub use report::{Report, ReportVersion, Summary};
