//! Baseline reconciler
//!
//! A baseline is a persisted set of issue fingerprints accepted as
//! pre-existing. Issues whose fingerprint is in the baseline are dropped
//! from the output entirely, never downgraded.

use std::collections::BTreeSet;
use std::path::Path;

use safemig_core::fingerprint;
use safemig_core::Issue;
use serde::{Deserialize, Serialize};

/// Baseline file format version written by this build
pub const BASELINE_VERSION: u32 = 1;

/// Persisted set of accepted issue fingerprints
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Baseline {
    #[serde(default = "default_version")]
    pub version: u32,

    /// RFC 3339 creation time
    #[serde(default)]
    pub created_at: String,

    /// Number of fingerprints (informational)
    #[serde(default)]
    pub count: usize,

    pub fingerprints: BTreeSet<String>,
}

fn default_version() -> u32 {
    BASELINE_VERSION
}

impl Default for Baseline {
    fn default() -> Self {
        Self::empty()
    }
}

impl Baseline {
    pub fn empty() -> Self {
        Self {
            version: BASELINE_VERSION,
            created_at: chrono::Utc::now().to_rfc3339(),
            count: 0,
            fingerprints: BTreeSet::new(),
        }
    }

    /// Capture the fingerprints of every issue
    pub fn generate(issues: &[Issue]) -> Self {
        let fingerprints: BTreeSet<String> = issues.iter().map(issue_fingerprint).collect();

        Self {
            count: fingerprints.len(),
            fingerprints,
            ..Self::empty()
        }
    }

    pub fn len(&self) -> usize {
        self.fingerprints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fingerprints.is_empty()
    }

    pub fn contains(&self, issue: &Issue) -> bool {
        self.fingerprints.contains(&issue_fingerprint(issue))
    }

    /// Keep only issues whose fingerprint is not in the baseline
    pub fn apply(&self, issues: Vec<Issue>) -> Vec<Issue> {
        if self.is_empty() {
            return issues;
        }

        let before = issues.len();
        let kept: Vec<Issue> = issues.into_iter().filter(|issue| !self.contains(issue)).collect();

        tracing::info!("Baseline suppressed {} of {} issue(s)", before - kept.len(), before);
        kept
    }

    /// Parse a baseline from JSON; `source` names it in errors
    pub fn from_json(json: &str, source: &str) -> Result<Self, BaselineError> {
        let mut baseline: Baseline = serde_json::from_str(json)
            .map_err(|e| BaselineError::Format(source.to_string(), e.to_string()))?;

        if baseline.version > BASELINE_VERSION {
            tracing::warn!(
                "Baseline {} has version {}, newer than supported version {}",
                source,
                baseline.version,
                BASELINE_VERSION
            );
        }

        baseline.count = baseline.fingerprints.len();
        Ok(baseline)
    }

    /// Load a baseline that must exist
    pub fn load(path: &Path) -> Result<Self, BaselineError> {
        if !path.exists() {
            return Err(BaselineError::Missing(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)
            .map_err(|e| BaselineError::Io(path.display().to_string(), e.to_string()))?;

        Self::from_json(&contents, &path.display().to_string())
    }

    /// Load a baseline, or start empty when the file does not exist yet
    pub fn load_or_empty(path: &Path) -> Result<Self, BaselineError> {
        match Self::load(path) {
            Err(BaselineError::Missing(_)) => Ok(Self::empty()),
            other => other,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn save(&self, path: &Path) -> Result<(), BaselineError> {
        let json = self
            .to_json()
            .map_err(|e| BaselineError::Format(path.display().to_string(), e.to_string()))?;

        std::fs::write(path, json).map_err(|e| BaselineError::Io(path.display().to_string(), e.to_string()))?;

        tracing::info!("Wrote baseline with {} fingerprint(s) to {}", self.len(), path.display());
        Ok(())
    }
}

fn issue_fingerprint(issue: &Issue) -> String {
    issue
        .fingerprint
        .clone()
        .unwrap_or_else(|| fingerprint::fingerprint(issue))
}

/// Baseline store errors
#[derive(Debug, thiserror::Error)]
pub enum BaselineError {
    #[error("Baseline file not found: {0}")]
    Missing(String),

    #[error("Malformed baseline {0}: {1}")]
    Format(String, String),

    #[error("Failed to access baseline {0}: {1}")]
    Io(String, String),
}
