//! Checkpoint records and scoring.

use serde::{Deserialize, Serialize};

use crate::repo::TestResult;

/// Session lifecycle states. Terminal states are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Active,
    Completed,
    Failed,
    Aborted,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Active)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Aborted => write!(f, "aborted"),
        }
    }
}

/// One scored verification snapshot within a session. Append-only: a
/// checkpoint never changes after it is recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationCheckpoint {
    pub phase: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iteration: Option<u32>,
    /// 0-100.
    pub score: f64,
    /// 0-1, derived from execution/parsing reliability.
    pub confidence: f64,
    pub passed: bool,
    pub timestamp: String,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_result: Option<TestResult>,
    /// Set when checkpoint execution itself blew up.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ValidationCheckpoint {
    /// Zero-score, zero-confidence checkpoint recording an execution
    /// failure instead of propagating it.
    pub fn from_error(phase: &str, iteration: Option<u32>, error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            phase: phase.to_string(),
            iteration,
            score: 0.0,
            confidence: 0.0,
            passed: false,
            timestamp: chrono::Utc::now().to_rfc3339(),
            warnings: Vec::new(),
            errors: vec![error.clone()],
            test_result: None,
            error: Some(error),
        }
    }
}

/// Checkpoint score: 60% test pass rate, +20 reliable execution, +15
/// successful parsing, −30 when no tests were found and that is not
/// acceptable. Always within [0, 100].
pub fn checkpoint_score(result: &TestResult, allow_no_tests: bool) -> f64 {
    let mut score = result.pass_rate() * 60.0;
    if result.execution_reliable {
        score += 20.0;
    }
    if result.parsing_successful {
        score += 15.0;
    }
    if result.no_tests_found && !allow_no_tests {
        score -= 30.0;
    }
    score.clamp(0.0, 100.0)
}

/// Checkpoint confidence: base 0.5, +0.3 reliable execution, +0.2
/// successful parsing, −0.4 no tests found, +0.1 framework identified.
/// Always within [0, 1].
pub fn checkpoint_confidence(result: &TestResult) -> f64 {
    let mut confidence: f64 = 0.5;
    if result.execution_reliable {
        confidence += 0.3;
    }
    if result.parsing_successful {
        confidence += 0.2;
    }
    if result.no_tests_found {
        confidence -= 0.4;
    }
    if result.framework_detected {
        confidence += 0.1;
    }
    confidence.clamp(0.0, 1.0)
}

/// Pass rule: minimum score, reliable execution, failure rate within
/// bounds, and no-tests only acceptable when configured so.
pub fn checkpoint_passes(
    result: &TestResult,
    score: f64,
    min_score: f64,
    max_failure_rate: f64,
    allow_no_tests: bool,
) -> bool {
    score >= min_score
        && result.execution_reliable
        && result.failure_rate() <= max_failure_rate
        && (!result.no_tests_found || allow_no_tests)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo::{parse_test_output, TestFramework};

    fn result_with(total: u32, passed: u32) -> TestResult {
        let raw = format!(
            r#"{{"numTotalTests": {total}, "numPassedTests": {passed}, "numFailedTests": {}, "numPendingTests": 0, "testResults": []}}"#,
            total - passed
        );
        parse_test_output(&raw, TestFramework::Jest, true, 100)
    }

    #[test]
    fn full_pass_scores_at_ceiling() {
        let result = result_with(5, 5);
        let score = checkpoint_score(&result, false);
        assert!((score - 95.0).abs() < 1e-9);
        assert!(checkpoint_passes(&result, score, 70.0, 0.2, false));
    }

    #[test]
    fn no_tests_penalty_applies_unless_allowed() {
        let result = TestResult::no_tests(0);
        let penalized = checkpoint_score(&result, false);
        let allowed = checkpoint_score(&result, true);
        assert!((penalized - 5.0).abs() < 1e-9); // 0 + 20 + 15 - 30
        assert!((allowed - 35.0).abs() < 1e-9);
        assert!(allowed > penalized);
    }

    #[test]
    fn score_bounds_hold_for_all_flag_combinations() {
        for reliable in [true, false] {
            for parsed_raw in ["not json at all", r#"{"numTotalTests": 0, "numPassedTests": 0, "numFailedTests": 0, "numPendingTests": 0, "testResults": []}"#] {
                for framework in [TestFramework::Jest, TestFramework::Unknown] {
                    for allow in [true, false] {
                        let result = parse_test_output(parsed_raw, framework, reliable, 0);
                        let score = checkpoint_score(&result, allow);
                        let confidence = checkpoint_confidence(&result);
                        assert!((0.0..=100.0).contains(&score));
                        assert!((0.0..=1.0).contains(&confidence));
                    }
                }
            }
        }
    }

    #[test]
    fn confidence_rewards_reliability() {
        let good = result_with(4, 4);
        let confidence = checkpoint_confidence(&good);
        assert!((confidence - 1.0).abs() < 1e-9); // 0.5+0.3+0.2+0.1 clamped

        let none = TestResult::no_tests(0);
        // 0.5 + 0.3 + 0.2 - 0.4 + 0.0 (no framework)
        assert!((checkpoint_confidence(&none) - 0.6).abs() < 1e-9);
    }

    #[test]
    fn failure_rate_gate_blocks_pass() {
        let result = result_with(10, 7);
        let score = checkpoint_score(&result, false);
        assert!(!checkpoint_passes(&result, score, 50.0, 0.2, false));
        assert!(checkpoint_passes(&result, score, 50.0, 0.5, false));
    }

    #[test]
    fn error_checkpoint_is_zeroed() {
        let checkpoint = ValidationCheckpoint::from_error("iteration-1", Some(1), "executor died");
        assert_eq!(checkpoint.score, 0.0);
        assert_eq!(checkpoint.confidence, 0.0);
        assert!(!checkpoint.passed);
        assert_eq!(checkpoint.errors.len(), 1);
        assert_eq!(checkpoint.error.as_deref(), Some("executor died"));
    }

    #[test]
    fn terminal_states() {
        assert!(!SessionState::Active.is_terminal());
        assert!(SessionState::Completed.is_terminal());
        assert!(SessionState::Failed.is_terminal());
        assert!(SessionState::Aborted.is_terminal());
    }
}
