//! Verification records: findings, stage results, metrics, code snapshots.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::error::VerificationError;

/// Files larger than this are skipped when loading a snapshot; generated
/// bundles and lockfiles would otherwise dominate every scan.
const MAX_SNAPSHOT_FILE_BYTES: u64 = 512 * 1024;

/// What a finding is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingKind {
    Error,
    Warning,
    Suggestion,
    Info,
}

/// How bad a finding is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// Descriptor for a fix a validator can apply on its own.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoFix {
    pub automatic: bool,
    pub description: String,
}

/// A single immutable observation from one validator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationFinding {
    pub kind: FindingKind,
    pub severity: Severity,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fix: Option<AutoFix>,
}

impl VerificationFinding {
    pub fn new(kind: FindingKind, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity,
            message: message.into(),
            file: None,
            line: None,
            fix: None,
        }
    }

    pub fn error(severity: Severity, message: impl Into<String>) -> Self {
        Self::new(FindingKind::Error, severity, message)
    }

    pub fn warning(severity: Severity, message: impl Into<String>) -> Self {
        Self::new(FindingKind::Warning, severity, message)
    }

    pub fn suggestion(message: impl Into<String>) -> Self {
        Self::new(FindingKind::Suggestion, Severity::Low, message)
    }

    pub fn at(mut self, file: impl Into<String>, line: usize) -> Self {
        self.file = Some(file.into());
        self.line = Some(line);
        self
    }

    pub fn in_file(mut self, file: impl Into<String>) -> Self {
        self.file = Some(file.into());
        self
    }

    pub fn with_fix(mut self, automatic: bool, description: impl Into<String>) -> Self {
        self.fix = Some(AutoFix {
            automatic,
            description: description.into(),
        });
        self
    }

    pub fn is_critical(&self) -> bool {
        self.severity == Severity::Critical
    }
}

/// One validator's outcome for one snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationStageResult {
    pub stage: String,
    pub passed: bool,
    /// 0-100.
    pub score: f64,
    pub duration_ms: u64,
    pub findings: Vec<VerificationFinding>,
}

impl VerificationStageResult {
    pub fn critical_count(&self) -> usize {
        self.findings.iter().filter(|f| f.is_critical()).count()
    }

    pub fn high_count(&self) -> usize {
        self.findings
            .iter()
            .filter(|f| f.severity == Severity::High)
            .count()
    }
}

/// Metric scores extracted from stage results, all 0-100 (coverage is a
/// percentage estimate).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct MetricsSummary {
    pub coverage_percent: f64,
    pub complexity_score: f64,
    pub security_score: f64,
    pub performance_score: f64,
    pub maintainability_score: f64,
}

/// Current-minus-previous deltas between two metrics snapshots.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct MetricsTrend {
    pub coverage_delta: f64,
    pub complexity_delta: f64,
    pub security_delta: f64,
    pub performance_delta: f64,
}

/// Aggregate verdict over all stages for one snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationResult {
    pub passed: bool,
    /// Mean of stage scores, 0-100.
    pub score: f64,
    pub stages: Vec<VerificationStageResult>,
    pub critical_errors: Vec<VerificationFinding>,
    pub warnings: Vec<VerificationFinding>,
    pub suggestions: Vec<VerificationFinding>,
    pub metrics: MetricsSummary,
    /// Auto-fix rounds consumed before this result was produced.
    pub fix_attempts: u32,
}

impl VerificationResult {
    pub fn critical_count(&self) -> usize {
        self.critical_errors.len()
    }

    pub fn stage(&self, name: &str) -> Option<&VerificationStageResult> {
        self.stages.iter().find(|s| s.stage == name)
    }
}

/// One source file inside a snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceFile {
    /// Path relative to the snapshot root.
    pub path: String,
    pub content: String,
}

impl SourceFile {
    pub fn is_test(&self) -> bool {
        crate::repo::is_test_file(&self.path)
            || self.path.contains("__tests__/")
            || self.path.starts_with("test/")
            || self.path.starts_with("tests/")
    }

    pub fn is_code(&self) -> bool {
        const CODE_EXTENSIONS: [&str; 6] = [".js", ".jsx", ".ts", ".tsx", ".mjs", ".cjs"];
        CODE_EXTENSIONS.iter().any(|ext| self.path.ends_with(ext))
    }
}

/// In-memory view of the code under verification.
///
/// Validators only read snapshots; auto-fixes produce new snapshots rather
/// than mutating in place.
#[derive(Debug, Clone, Default)]
pub struct CodeSnapshot {
    pub files: Vec<SourceFile>,
}

impl CodeSnapshot {
    pub fn new(files: Vec<SourceFile>) -> Self {
        Self { files }
    }

    /// Loads all text files under `root`, skipping VCS/dependency/build
    /// directories and oversized files.
    pub fn from_dir(root: &Path) -> Result<Self, VerificationError> {
        if !root.is_dir() {
            return Err(VerificationError::SnapshotRootMissing(
                root.display().to_string(),
            ));
        }

        let mut files = Vec::new();
        for entry in WalkDir::new(root)
            .into_iter()
            .filter_entry(|e| {
                let name = e.file_name().to_string_lossy();
                !matches!(
                    name.as_ref(),
                    "node_modules" | ".git" | "dist" | "build" | "coverage" | ".next"
                )
            })
            .filter_map(Result::ok)
        {
            if !entry.file_type().is_file() {
                continue;
            }
            if entry
                .metadata()
                .map(|m| m.len() > MAX_SNAPSHOT_FILE_BYTES)
                .unwrap_or(true)
            {
                continue;
            }
            let Ok(content) = std::fs::read_to_string(entry.path()) else {
                continue; // binary or unreadable
            };
            let path = entry
                .path()
                .strip_prefix(root)
                .unwrap_or(entry.path())
                .to_string_lossy()
                .replace('\\', "/");
            files.push(SourceFile { path, content });
        }

        if files.is_empty() {
            return Err(VerificationError::EmptySnapshot(root.display().to_string()));
        }
        files.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(Self { files })
    }

    pub fn get(&self, path: &str) -> Option<&SourceFile> {
        self.files.iter().find(|f| f.path == path)
    }

    /// Non-test code files, the unit most validators scan.
    pub fn code_files(&self) -> impl Iterator<Item = &SourceFile> {
        self.files.iter().filter(|f| f.is_code() && !f.is_test())
    }

    pub fn test_files(&self) -> impl Iterator<Item = &SourceFile> {
        self.files.iter().filter(|f| f.is_code() && f.is_test())
    }

    /// Replaces one file's content, returning a new snapshot.
    pub fn with_file(&self, path: &str, content: String) -> Self {
        let mut files = self.files.clone();
        match files.iter_mut().find(|f| f.path == path) {
            Some(file) => file.content = content,
            None => files.push(SourceFile {
                path: path.to_string(),
                content,
            }),
        }
        Self { files }
    }
}

/// Shared context handed to every validator.
#[derive(Debug, Clone, Default)]
pub struct ValidationContext {
    /// Checkout path for validators that execute tooling (tests, tsc).
    /// Pattern-only validators work without it.
    pub repo_path: Option<PathBuf>,
    pub test_timeout: Option<Duration>,
}

impl ValidationContext {
    pub fn for_repo(path: impl Into<PathBuf>) -> Self {
        Self {
            repo_path: Some(path.into()),
            test_timeout: None,
        }
    }
}
