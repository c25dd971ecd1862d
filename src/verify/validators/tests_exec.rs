//! Test execution stage.
//!
//! With a checkout path in the context, the repository's own test suite is
//! executed and its pass rate becomes the stage score. Without one (pure
//! snapshot verification) the stage degrades to a presence check.

use std::time::Instant;

use async_trait::async_trait;

use crate::repo::{RepoConfig, RepositoryManager};
use crate::verify::types::{
    CodeSnapshot, Severity, ValidationContext, VerificationFinding, VerificationStageResult,
};

use super::{stage_result, Validator};

/// Failing tests reported individually up to this cap.
const MAX_FAILURE_FINDINGS: usize = 10;

pub struct TestExecutionValidator {
    repo_config: RepoConfig,
}

impl TestExecutionValidator {
    pub fn new() -> Self {
        Self {
            repo_config: RepoConfig::default(),
        }
    }

    pub fn with_repo_config(mut self, config: RepoConfig) -> Self {
        self.repo_config = config;
        self
    }
}

impl Default for TestExecutionValidator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Validator for TestExecutionValidator {
    fn name(&self) -> &'static str {
        "tests"
    }

    async fn validate(
        &self,
        snapshot: &CodeSnapshot,
        ctx: &ValidationContext,
    ) -> VerificationStageResult {
        let start = Instant::now();

        let Some(repo_path) = ctx.repo_path.as_ref() else {
            return presence_check(snapshot, start);
        };

        let mut config = self.repo_config.clone();
        if let Some(timeout) = ctx.test_timeout {
            config = config.with_test_timeout(timeout);
        }
        let manager = RepositoryManager::new(config);
        let result = manager.run_tests(repo_path, None).await;

        let mut findings = Vec::new();
        if result.no_tests_found {
            findings.push(VerificationFinding::warning(
                Severity::Medium,
                "no tests found in the repository",
            ));
        }
        if !result.execution_reliable {
            findings.push(VerificationFinding::error(
                Severity::High,
                "test execution timed out or crashed",
            ));
        }
        if !result.parsing_successful {
            findings.push(VerificationFinding::warning(
                Severity::Medium,
                "test output could not be parsed",
            ));
        }
        for failure in result.failures.iter().take(MAX_FAILURE_FINDINGS) {
            findings.push(VerificationFinding::error(
                Severity::High,
                format!("failing test: {} — {}", failure.name, oneline(&failure.message)),
            ));
        }
        if result.failures.len() > MAX_FAILURE_FINDINGS {
            findings.push(VerificationFinding::warning(
                Severity::Low,
                format!(
                    "{} further failing tests omitted",
                    result.failures.len() - MAX_FAILURE_FINDINGS
                ),
            ));
        }

        let score = if result.no_tests_found {
            30.0
        } else {
            result.pass_rate() * 100.0
        };
        stage_result("tests", findings, score, start)
    }
}

fn presence_check(snapshot: &CodeSnapshot, start: Instant) -> VerificationStageResult {
    let test_files = snapshot.test_files().count();
    if test_files == 0 {
        let findings = vec![VerificationFinding::warning(
            Severity::Medium,
            "no test files in the snapshot; tests not executed",
        )];
        stage_result("tests", findings, 30.0, start)
    } else {
        // Presence only: content cannot be executed without a checkout.
        stage_result("tests", Vec::new(), 70.0, start)
    }
}

fn oneline(message: &str) -> String {
    let first = message.lines().next().unwrap_or("");
    if first.len() > 200 {
        let mut end = 200;
        while !first.is_char_boundary(end) && end > 0 {
            end -= 1;
        }
        format!("{}...", &first[..end])
    } else {
        first.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verify::types::SourceFile;

    #[tokio::test]
    async fn snapshot_without_tests_scores_low() {
        let snapshot = CodeSnapshot::new(vec![SourceFile {
            path: "src/app.js".to_string(),
            content: "const x = 1;".to_string(),
        }]);
        let result = TestExecutionValidator::new()
            .validate(&snapshot, &ValidationContext::default())
            .await;
        assert_eq!(result.score, 30.0);
        assert_eq!(result.findings.len(), 1);
    }

    #[tokio::test]
    async fn snapshot_with_tests_passes_presence_check() {
        let snapshot = CodeSnapshot::new(vec![
            SourceFile {
                path: "src/app.js".to_string(),
                content: "const x = 1;".to_string(),
            },
            SourceFile {
                path: "src/app.test.js".to_string(),
                content: "test('x', () => {});".to_string(),
            },
        ]);
        let result = TestExecutionValidator::new()
            .validate(&snapshot, &ValidationContext::default())
            .await;
        assert_eq!(result.score, 70.0);
        assert!(result.passed);
    }

    #[tokio::test]
    async fn empty_repo_checkout_reports_no_tests() {
        let tmp = tempfile::TempDir::new().unwrap();
        let snapshot = CodeSnapshot::default();
        let result = TestExecutionValidator::new()
            .validate(&snapshot, &ValidationContext::for_repo(tmp.path()))
            .await;
        assert_eq!(result.score, 30.0);
        assert!(result
            .findings
            .iter()
            .any(|f| f.message.contains("no tests found")));
    }

    #[test]
    fn oneline_truncates_long_messages() {
        let long = "x".repeat(500);
        assert!(oneline(&long).len() <= 203);
        assert_eq!(oneline("first\nsecond"), "first");
    }
}
