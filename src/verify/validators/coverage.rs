//! Coverage estimation without instrumentation.
//!
//! Ratio of test cases to exported/declared functions, plus test-file
//! presence, scaled into a 0-100 estimate. Deliberately coarse: the point
//! is to notice "patch added code, nobody tests it", not to replace a
//! coverage tool.

use std::sync::OnceLock;
use std::time::Instant;

use async_trait::async_trait;
use regex::Regex;

use crate::verify::types::{
    CodeSnapshot, Severity, ValidationContext, VerificationFinding, VerificationStageResult,
};

use super::{stage_result, Validator};

/// Estimated coverage below this draws a warning.
const LOW_COVERAGE_THRESHOLD: f64 = 50.0;

fn test_case_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"\b(it|test)\s*\(\s*['"`]"#).expect("static regex"))
}

fn function_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\bfunction\b|=>\s*[\{(]").expect("static regex"))
}

pub struct CoverageValidator;

impl CoverageValidator {
    pub fn new() -> Self {
        Self
    }
}

impl Default for CoverageValidator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Validator for CoverageValidator {
    fn name(&self) -> &'static str {
        "coverage"
    }

    async fn validate(
        &self,
        snapshot: &CodeSnapshot,
        _ctx: &ValidationContext,
    ) -> VerificationStageResult {
        let start = Instant::now();
        let mut findings = Vec::new();

        let code_functions: usize = snapshot
            .code_files()
            .map(|f| function_regex().find_iter(&f.content).count())
            .sum();
        let test_cases: usize = snapshot
            .test_files()
            .map(|f| test_case_regex().find_iter(&f.content).count())
            .sum();
        let test_file_count = snapshot.test_files().count();

        let estimate = if code_functions == 0 {
            // Nothing to cover.
            if test_cases > 0 {
                100.0
            } else {
                0.0
            }
        } else {
            (test_cases as f64 / code_functions as f64 * 100.0).min(100.0)
        };

        if test_file_count == 0 {
            findings.push(VerificationFinding::warning(
                Severity::High,
                "no test files in the snapshot",
            ));
        } else if estimate < LOW_COVERAGE_THRESHOLD {
            findings.push(VerificationFinding::warning(
                Severity::Medium,
                format!(
                    "estimated coverage {:.0}% ({} test case(s) for {} function(s))",
                    estimate, test_cases, code_functions
                ),
            ));
        }

        stage_result("coverage", findings, estimate, start)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verify::types::SourceFile;

    fn snapshot_of(files: Vec<(&str, &str)>) -> CodeSnapshot {
        CodeSnapshot::new(
            files
                .into_iter()
                .map(|(path, content)| SourceFile {
                    path: path.to_string(),
                    content: content.to_string(),
                })
                .collect(),
        )
    }

    #[tokio::test]
    async fn no_tests_is_a_high_warning_with_zero_score() {
        let snapshot = snapshot_of(vec![("src/app.js", "function a() {}\nfunction b() {}\n")]);
        let result = CoverageValidator::new()
            .validate(&snapshot, &ValidationContext::default())
            .await;
        assert_eq!(result.score, 0.0);
        assert!(result
            .findings
            .iter()
            .any(|f| f.message.contains("no test files")));
    }

    #[tokio::test]
    async fn well_tested_code_scores_high() {
        let snapshot = snapshot_of(vec![
            ("src/math.js", "function add() {}\nfunction sub() {}\n"),
            (
                "src/math.test.js",
                "test('add', () => {});\ntest('sub', () => {});\nit('edge', () => {});\n",
            ),
        ]);
        let result = CoverageValidator::new()
            .validate(&snapshot, &ValidationContext::default())
            .await;
        assert_eq!(result.score, 100.0);
        assert!(result.findings.is_empty());
    }

    #[tokio::test]
    async fn sparse_tests_draw_a_warning() {
        let functions: String = (0..10).map(|i| format!("function f{i}() {{}}\n")).collect();
        let snapshot = snapshot_of(vec![
            ("src/lib.js", functions.as_str()),
            ("src/lib.test.js", "test('one', () => {});\n"),
        ]);
        let result = CoverageValidator::new()
            .validate(&snapshot, &ValidationContext::default())
            .await;
        assert!(result.score < LOW_COVERAGE_THRESHOLD);
        assert!(result
            .findings
            .iter()
            .any(|f| f.message.contains("estimated coverage")));
    }

    #[tokio::test]
    async fn score_is_always_within_bounds() {
        // More test cases than functions must clamp at 100.
        let snapshot = snapshot_of(vec![
            ("src/a.js", "function one() {}\n"),
            (
                "src/a.test.js",
                "it('a', () => {});\nit('b', () => {});\nit('c', () => {});\n",
            ),
        ]);
        let result = CoverageValidator::new()
            .validate(&snapshot, &ValidationContext::default())
            .await;
        assert!(result.score <= 100.0);
        assert!(result.score >= 0.0);
    }
}
