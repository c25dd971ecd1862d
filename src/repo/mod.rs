//! Repository lifecycle: clone, checkout, patch, build, test, diff, cleanup.
//!
//! One [`RepositoryManager`] owns a working-directory root and a registry of
//! active checkouts keyed by isolation key. Checkouts are never shared
//! between concurrent evaluations; the engine derives a fresh key per
//! evaluation via [`isolation_key`].

mod framework;
mod manager;
mod parser;

pub use framework::{detect_framework, is_test_file, TestFramework};
pub use manager::{RepoConfig, RepositoryManager};
pub use parser::{parse_test_output, TestFailure, TestResult};

use rand::RngExt;

/// Builds a globally unique isolation key for one evaluation of `instance_id`.
///
/// Key shape: sanitized instance id + millisecond timestamp + random suffix.
/// Two concurrent evaluations of the same instance therefore never collide
/// on a working directory path.
pub fn isolation_key(instance_id: &str) -> String {
    let sanitized: String = instance_id
        .chars()
        .map(|ch| {
            if ch.is_alphanumeric() || ch == '-' || ch == '_' || ch == '.' {
                ch
            } else {
                '-'
            }
        })
        .collect();
    let millis = chrono::Utc::now().timestamp_millis();
    let suffix: u32 = rand::rng().random();
    format!("{}-{}-{:08x}", sanitized, millis, suffix)
}

/// Validates a clone URL: https/http/git/ssh/file schemes or a local path,
/// and no characters that could break out of an argv slot downstream.
pub fn validate_repo_url(url: &str) -> Result<(), crate::error::RepositoryError> {
    use crate::error::RepositoryError;

    if url.is_empty() {
        return Err(RepositoryError::InvalidInput(
            "repository URL must not be empty".to_string(),
        ));
    }
    for ch in url.chars() {
        if ch.is_whitespace() || ch == ';' || ch == '|' || ch == '&' || ch == '`' || ch == '$' {
            return Err(RepositoryError::InvalidInput(format!(
                "repository URL contains disallowed character '{}': '{}'",
                ch, url
            )));
        }
    }
    Ok(())
}

/// Validates a git ref (commit SHA, branch, tag).
///
/// Allowlist approach: alphanumeric plus the limited set `-`, `_`, `.`,
/// `/`, `~`, `^` valid in git ref specifications.
pub fn validate_git_ref(git_ref: &str) -> Result<(), crate::error::RepositoryError> {
    use crate::error::RepositoryError;

    if git_ref.is_empty() {
        return Err(RepositoryError::InvalidInput(
            "git ref must not be empty".to_string(),
        ));
    }
    for ch in git_ref.chars() {
        if !ch.is_alphanumeric() && !"-_.~/^".contains(ch) {
            return Err(RepositoryError::InvalidInput(format!(
                "git ref contains invalid character '{}': '{}'",
                ch, git_ref
            )));
        }
    }
    Ok(())
}
