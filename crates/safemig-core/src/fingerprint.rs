//! Stable issue identity
//!
//! A fingerprint depends only on `(app, migration, operation key, rule id)`.
//! Message and suggestion text are deliberately excluded so rewording a
//! message never invalidates a baseline.

use sha2::{Digest, Sha256};

use crate::issue::Issue;

/// Number of hex characters kept from the digest
const FINGERPRINT_LEN: usize = 32;

/// Compute the fingerprint of an issue
pub fn fingerprint(issue: &Issue) -> String {
    compute(
        &issue.app,
        issue.migration.as_deref().unwrap_or(""),
        &issue.stable_key(),
        &issue.rule_id,
    )
}

/// Compute a fingerprint from its raw parts
pub fn compute(app: &str, migration: &str, operation_key: &str, rule_id: &str) -> String {
    let mut hasher = Sha256::new();
    for part in [app, migration, operation_key, rule_id] {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }

    let mut encoded = hex::encode(hasher.finalize());
    encoded.truncate(FINGERPRINT_LEN);
    encoded
}

/// Assign fingerprints to every issue in place
pub fn assign(issues: &mut [Issue]) {
    for issue in issues.iter_mut() {
        issue.fingerprint = Some(fingerprint(issue));
    }
}
