//! Evaluation records: instances, submissions, per-patch verdicts, aggregates.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::repo::TestResult;

/// A target repository pinned to a commit, with an optional test-setup
/// patch. Immutable once an evaluation starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoInstance {
    pub instance_id: String,
    pub repo_url: String,
    pub base_commit: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_patch: Option<String>,
}

/// One candidate patch for one instance. Consumed, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatchSubmission {
    pub instance_id: String,
    pub patch: String,
    /// Label of the proposer that produced the diff (model name, tool, ...).
    pub proposer: String,
}

/// Coarse classification of what went wrong with one evaluation, derived by
/// substring matching over the recorded error text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Timeout,
    Compilation,
    TestFailure,
    PatchApply,
    Dependency,
    Repository,
    Import,
    Other,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout => write!(f, "timeout"),
            Self::Compilation => write!(f, "compilation"),
            Self::TestFailure => write!(f, "test_failure"),
            Self::PatchApply => write!(f, "patch_apply"),
            Self::Dependency => write!(f, "dependency"),
            Self::Repository => write!(f, "repository"),
            Self::Import => write!(f, "import"),
            Self::Other => write!(f, "other"),
        }
    }
}

impl ErrorKind {
    /// Classifies free-form error text. First match in priority order wins.
    pub fn classify(text: &str) -> Self {
        let lowered = text.to_lowercase();
        if lowered.contains("timed out") || lowered.contains("timeout") {
            Self::Timeout
        } else if lowered.contains("empty patch")
            || (lowered.contains("patch") && (lowered.contains("apply") || lowered.contains("failed")))
        {
            Self::PatchApply
        } else if lowered.contains("clone") || lowered.contains("checkout") || lowered.contains("commit") {
            Self::Repository
        } else if lowered.contains("cannot find module") || lowered.contains("import") {
            Self::Import
        } else if lowered.contains("npm install") || lowered.contains("dependency") {
            Self::Dependency
        } else if lowered.contains("compil")
            || lowered.contains("syntax")
            || lowered.contains("type error")
            || lowered.contains("build")
        {
            Self::Compilation
        } else if lowered.contains("test") && lowered.contains("fail") {
            Self::TestFailure
        } else {
            Self::Other
        }
    }
}

/// Patch size buckets used in aggregate reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchComplexity {
    Low,
    Medium,
    High,
}

impl std::fmt::Display for PatchComplexity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
        }
    }
}

impl PatchComplexity {
    /// Buckets a diff by the number of added/removed lines.
    pub fn of_diff(diff: &str) -> Self {
        let changed = diff
            .lines()
            .filter(|line| {
                (line.starts_with('+') && !line.starts_with("+++"))
                    || (line.starts_with('-') && !line.starts_with("---"))
            })
            .count();
        if changed < 10 {
            Self::Low
        } else if changed < 50 {
            Self::Medium
        } else {
            Self::High
        }
    }
}

/// Final verdict for one evaluated patch.
///
/// Always produced, even under total failure: worst case carries an `error`
/// and zero counts so callers can render a complete table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceResult {
    pub instance_id: String,
    pub proposer: String,
    pub resolved: bool,
    pub patch_applied: bool,
    pub compilation_success: bool,
    pub complexity: PatchComplexity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_result: Option<TestResult>,
    pub execution_time_secs: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    pub timestamp: String,
}

impl InstanceResult {
    /// A failed verdict carrying only an error explanation.
    pub fn failure(submission: &PatchSubmission, error: impl Into<String>, elapsed_secs: f64) -> Self {
        let error = error.into();
        Self {
            instance_id: submission.instance_id.clone(),
            proposer: submission.proposer.clone(),
            resolved: false,
            patch_applied: false,
            compilation_success: false,
            complexity: PatchComplexity::of_diff(&submission.patch),
            test_result: None,
            execution_time_secs: elapsed_secs,
            error_kind: Some(ErrorKind::classify(&error)),
            error: Some(error),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn tests_passed(&self) -> u32 {
        self.test_result.as_ref().map_or(0, |t| t.passed)
    }

    pub fn tests_failed(&self) -> u32 {
        self.test_result.as_ref().map_or(0, |t| t.failed)
    }
}

/// Aggregate statistics over one evaluation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationResults {
    pub run_id: String,
    pub total: usize,
    pub resolved: usize,
    pub resolution_rate: f64,
    pub compilation_rate: f64,
    pub test_pass_rate: f64,
    /// Error-kind name -> occurrence count.
    pub error_histogram: HashMap<String, usize>,
    /// Complexity bucket -> (evaluated, resolved).
    pub complexity_buckets: HashMap<String, (usize, usize)>,
    pub avg_execution_secs: f64,
    pub min_execution_secs: f64,
    pub max_execution_secs: f64,
    pub started_at: String,
    pub finished_at: String,
    pub results: Vec<InstanceResult>,
}

impl EvaluationResults {
    /// Builds the aggregate view over per-patch results.
    pub fn aggregate(run_id: String, started_at: String, results: Vec<InstanceResult>) -> Self {
        let total = results.len();
        let resolved = results.iter().filter(|r| r.resolved).count();
        let compiled = results.iter().filter(|r| r.compilation_success).count();

        let (tests_passed, tests_total) = results.iter().fold((0u64, 0u64), |(p, t), r| {
            match &r.test_result {
                Some(tr) => (p + u64::from(tr.passed), t + u64::from(tr.total)),
                None => (p, t),
            }
        });

        let mut error_histogram: HashMap<String, usize> = HashMap::new();
        for result in results.iter().filter(|r| r.error.is_some()) {
            let kind = result.error_kind.unwrap_or(ErrorKind::Other);
            *error_histogram.entry(kind.to_string()).or_insert(0) += 1;
        }

        let mut complexity_buckets: HashMap<String, (usize, usize)> = HashMap::new();
        for result in &results {
            let bucket = complexity_buckets
                .entry(result.complexity.to_string())
                .or_insert((0, 0));
            bucket.0 += 1;
            if result.resolved {
                bucket.1 += 1;
            }
        }

        let times: Vec<f64> = results.iter().map(|r| r.execution_time_secs).collect();
        let (avg, min, max) = if times.is_empty() {
            (0.0, 0.0, 0.0)
        } else {
            let sum: f64 = times.iter().sum();
            (
                sum / times.len() as f64,
                times.iter().cloned().fold(f64::INFINITY, f64::min),
                times.iter().cloned().fold(0.0, f64::max),
            )
        };

        Self {
            run_id,
            total,
            resolved,
            resolution_rate: ratio(resolved, total),
            compilation_rate: ratio(compiled, total),
            test_pass_rate: if tests_total == 0 {
                0.0
            } else {
                tests_passed as f64 / tests_total as f64
            },
            error_histogram,
            complexity_buckets,
            avg_execution_secs: avg,
            min_execution_secs: min,
            max_execution_secs: max,
            started_at,
            finished_at: chrono::Utc::now().to_rfc3339(),
            results,
        }
    }
}

fn ratio(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn submission(id: &str, patch: &str) -> PatchSubmission {
        PatchSubmission {
            instance_id: id.to_string(),
            patch: patch.to_string(),
            proposer: "test-model".to_string(),
        }
    }

    #[test]
    fn error_classification_priority() {
        assert_eq!(ErrorKind::classify("command timed out after 300s"), ErrorKind::Timeout);
        assert_eq!(ErrorKind::classify("Patch application failed"), ErrorKind::PatchApply);
        assert_eq!(ErrorKind::classify("Clone of repo failed"), ErrorKind::Repository);
        assert_eq!(
            ErrorKind::classify("Error: Cannot find module 'lodash'"),
            ErrorKind::Import
        );
        assert_eq!(ErrorKind::classify("npm install exited 1"), ErrorKind::Dependency);
        assert_eq!(ErrorKind::classify("TypeScript compilation error"), ErrorKind::Compilation);
        assert_eq!(ErrorKind::classify("3 tests failed"), ErrorKind::TestFailure);
        assert_eq!(ErrorKind::classify("something else entirely"), ErrorKind::Other);
    }

    #[test]
    fn complexity_buckets_by_changed_lines() {
        let small = "--- a/x\n+++ b/x\n@@\n+one line\n";
        assert_eq!(PatchComplexity::of_diff(small), PatchComplexity::Low);

        let medium: String = (0..20).map(|i| format!("+line {i}\n")).collect();
        assert_eq!(PatchComplexity::of_diff(&medium), PatchComplexity::Medium);

        let large: String = (0..80).map(|i| format!("-line {i}\n")).collect();
        assert_eq!(PatchComplexity::of_diff(&large), PatchComplexity::High);
    }

    #[test]
    fn file_headers_do_not_count_as_changes() {
        let diff = "--- a/file.js\n+++ b/file.js\n";
        assert_eq!(PatchComplexity::of_diff(diff), PatchComplexity::Low);
    }

    #[test]
    fn failure_result_classifies_error() {
        let result = InstanceResult::failure(&submission("i-1", "+x\n"), "Patch application failed", 1.5);
        assert!(!result.resolved);
        assert!(!result.patch_applied);
        assert_eq!(result.error_kind, Some(ErrorKind::PatchApply));
        assert_eq!(result.execution_time_secs, 1.5);
    }

    #[test]
    fn aggregate_computes_rates_and_histogram() {
        let ok = InstanceResult {
            resolved: true,
            patch_applied: true,
            compilation_success: true,
            error: None,
            error_kind: None,
            ..InstanceResult::failure(&submission("i-1", ""), "x", 2.0)
        };
        let timeout = InstanceResult::failure(&submission("i-2", ""), "timed out after 10s", 10.0);
        let apply_fail = InstanceResult::failure(&submission("i-3", ""), "Patch application failed", 1.0);

        let agg = EvaluationResults::aggregate(
            "run-1".to_string(),
            chrono::Utc::now().to_rfc3339(),
            vec![ok, timeout, apply_fail],
        );

        assert_eq!(agg.total, 3);
        assert_eq!(agg.resolved, 1);
        assert!((agg.resolution_rate - 1.0 / 3.0).abs() < 1e-9);
        assert!((agg.compilation_rate - 1.0 / 3.0).abs() < 1e-9);
        assert_eq!(agg.error_histogram.get("timeout"), Some(&1));
        assert_eq!(agg.error_histogram.get("patch_apply"), Some(&1));
        assert!((agg.avg_execution_secs - 13.0 / 3.0).abs() < 1e-9);
        assert_eq!(agg.max_execution_secs, 10.0);
    }

    #[test]
    fn aggregate_of_empty_run_is_all_zero() {
        let agg = EvaluationResults::aggregate(
            "run-0".to_string(),
            chrono::Utc::now().to_rfc3339(),
            Vec::new(),
        );
        assert_eq!(agg.total, 0);
        assert_eq!(agg.resolution_rate, 0.0);
        assert_eq!(agg.avg_execution_secs, 0.0);
    }

    #[test]
    fn instance_result_serializes_stably() {
        let result = InstanceResult::failure(&submission("i-9", "+a\n"), "Empty patch", 0.0);
        let json = serde_json::to_string(&result).unwrap();
        assert!(json.contains("\"instance_id\":\"i-9\""));
        assert!(json.contains("\"resolved\":false"));
        assert!(json.contains("\"error_kind\":\"patch_apply\""));
    }
}
