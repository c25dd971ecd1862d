//! Session registry, state machine, and summary computation.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::SessionError;
use crate::repo::{RepoConfig, RepositoryManager};

use super::checkpoint::{
    checkpoint_confidence, checkpoint_passes, checkpoint_score, SessionState, ValidationCheckpoint,
};

/// Exponential weight base for the final score: checkpoint `i` weighs
/// `1.2^i`, so later iterations dominate.
const FINAL_SCORE_WEIGHT_BASE: f64 = 1.2;

/// Trend classification over the last three checkpoint scores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Increasing,
    Decreasing,
    Volatile,
    Stable,
}

impl std::fmt::Display for Trend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Increasing => write!(f, "increasing"),
            Self::Decreasing => write!(f, "decreasing"),
            Self::Volatile => write!(f, "volatile"),
            Self::Stable => write!(f, "stable"),
        }
    }
}

/// Aggregated view of a finished session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub checkpoint_count: usize,
    pub passed_count: usize,
    pub failed_count: usize,
    pub average_score: f64,
    pub average_confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub most_reliable_phase: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub least_reliable_phase: Option<String>,
    pub trend: Trend,
    pub recommendations: Vec<String>,
}

/// One instance's repair attempt: an ordered, append-only list of
/// checkpoints plus terminal outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationSession {
    pub session_id: String,
    pub instance_id: String,
    pub state: SessionState,
    pub checkpoints: Vec<ValidationCheckpoint>,
    pub started_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_passed: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<SessionSummary>,
}

/// Configuration for checkpoint execution and session verdicts.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Minimum score for an individual checkpoint to pass.
    pub min_checkpoint_score: f64,
    /// Minimum exponentially weighted final score.
    pub min_final_score: f64,
    /// Maximum tolerated test failure rate per checkpoint.
    pub max_failure_rate: f64,
    /// Whether a checkpoint with no tests found may still pass.
    pub allow_no_tests: bool,
    /// Root for per-session JSON persistence; `None` disables persistence.
    pub checkpoint_root: Option<PathBuf>,
    pub repo: RepoConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            min_checkpoint_score: 70.0,
            min_final_score: 70.0,
            max_failure_rate: 0.2,
            allow_no_tests: false,
            checkpoint_root: None,
            repo: RepoConfig::default(),
        }
    }
}

impl SessionConfig {
    pub fn with_checkpoint_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.checkpoint_root = Some(root.into());
        self
    }

    pub fn with_allow_no_tests(mut self, allow: bool) -> Self {
        self.allow_no_tests = allow;
        self
    }

    pub fn with_min_scores(mut self, checkpoint: f64, final_score: f64) -> Self {
        self.min_checkpoint_score = checkpoint;
        self.min_final_score = final_score;
        self
    }
}

/// Tracks validation sessions across iterative repair attempts.
///
/// The registry is an append-only map keyed by session id; concurrent
/// sessions never touch each other's entries. Checkpoints within one
/// session are strictly sequential — the caller drives iterations one at a
/// time and each call sees the previous checkpoint recorded.
pub struct CheckpointManager {
    config: SessionConfig,
    sessions: Mutex<HashMap<String, ValidationSession>>,
    executor: std::sync::Arc<RepositoryManager>,
}

impl CheckpointManager {
    pub fn new(config: SessionConfig) -> Self {
        let executor = std::sync::Arc::new(RepositoryManager::new(config.repo.clone()));
        Self {
            config,
            sessions: Mutex::new(HashMap::new()),
            executor,
        }
    }

    /// Opens a new active session and returns its id.
    pub async fn start_session(&self, instance_id: &str) -> String {
        let session_id = format!("session-{}", Uuid::new_v4());
        let session = ValidationSession {
            session_id: session_id.clone(),
            instance_id: instance_id.to_string(),
            state: SessionState::Active,
            checkpoints: Vec::new(),
            started_at: chrono::Utc::now().to_rfc3339(),
            completed_at: None,
            final_score: None,
            final_passed: None,
            summary: None,
        };

        if let Some(root) = &self.config.checkpoint_root {
            let dir = root.join(&session_id);
            if let Err(e) = std::fs::create_dir_all(&dir) {
                warn!(error = %e, "Failed to create session directory");
            }
        }

        let mut sessions = self.sessions.lock().await;
        sessions.insert(session_id.clone(), session);
        info!(session_id, instance_id, "Session started");
        session_id
    }

    /// Runs one checkpoint: executes the repository's tests and records a
    /// scored snapshot. An execution blow-up becomes a zero checkpoint
    /// rather than an error; only an unknown/terminal session errors.
    pub async fn execute_checkpoint(
        &self,
        session_id: &str,
        phase: &str,
        repo_path: &Path,
        test_patch: Option<&str>,
        iteration: Option<u32>,
    ) -> Result<ValidationCheckpoint, SessionError> {
        self.ensure_active(session_id).await?;

        let checkpoint = match self.run_checkpoint(phase, repo_path, test_patch, iteration).await {
            Ok(checkpoint) => checkpoint,
            Err(error) => {
                warn!(session_id, phase, error, "Checkpoint execution failed");
                ValidationCheckpoint::from_error(phase, iteration, error)
            }
        };

        let index = {
            let mut sessions = self.sessions.lock().await;
            let session = sessions
                .get_mut(session_id)
                .ok_or_else(|| SessionError::UnknownSession(session_id.to_string()))?;
            session.checkpoints.push(checkpoint.clone());
            session.checkpoints.len() - 1
        };
        self.persist_checkpoint(session_id, index, &checkpoint);

        info!(
            session_id,
            phase,
            score = checkpoint.score,
            confidence = checkpoint.confidence,
            passed = checkpoint.passed,
            "Checkpoint recorded"
        );
        Ok(checkpoint)
    }

    async fn run_checkpoint(
        &self,
        phase: &str,
        repo_path: &Path,
        test_patch: Option<&str>,
        iteration: Option<u32>,
    ) -> Result<ValidationCheckpoint, String> {
        // Contain panics from the executor so a crashing test run can only
        // zero this checkpoint.
        let path = repo_path.to_path_buf();
        let patch = test_patch.map(str::to_string);
        let executor = std::sync::Arc::clone(&self.executor);
        let handle = tokio::spawn(async move {
            executor.run_tests(&path, patch.as_deref()).await
        });
        let result = handle.await.map_err(|e| format!("test executor failed: {e}"))?;

        let score = checkpoint_score(&result, self.config.allow_no_tests);
        let confidence = checkpoint_confidence(&result);
        let passed = checkpoint_passes(
            &result,
            score,
            self.config.min_checkpoint_score,
            self.config.max_failure_rate,
            self.config.allow_no_tests,
        );

        let mut warnings = Vec::new();
        if result.no_tests_found {
            warnings.push("no tests found".to_string());
        }
        if !result.execution_reliable {
            warnings.push("test execution unreliable".to_string());
        }
        if !result.parsing_successful {
            warnings.push("test output not parseable".to_string());
        }
        let errors: Vec<String> = result
            .failures
            .iter()
            .map(|f| format!("{}: {}", f.name, f.message.lines().next().unwrap_or("")))
            .collect();

        Ok(ValidationCheckpoint {
            phase: phase.to_string(),
            iteration,
            score,
            confidence,
            passed,
            timestamp: chrono::Utc::now().to_rfc3339(),
            warnings,
            errors,
            test_result: Some(result),
            error: None,
        })
    }

    /// Completes a session: computes the weighted final verdict and
    /// summary, then moves to `completed` (passed) or `failed`.
    pub async fn complete_session(
        &self,
        session_id: &str,
    ) -> Result<ValidationSession, SessionError> {
        self.ensure_active(session_id).await?;

        let session = {
            let mut sessions = self.sessions.lock().await;
            let session = sessions
                .get_mut(session_id)
                .ok_or_else(|| SessionError::UnknownSession(session_id.to_string()))?;

            let final_score = weighted_final_score(&session.checkpoints);
            let any_passed = session.checkpoints.iter().any(|c| c.passed);
            let latest_passed = session.checkpoints.last().map(|c| c.passed).unwrap_or(false);
            let final_passed =
                final_score >= self.config.min_final_score && any_passed && latest_passed;

            session.final_score = Some(final_score);
            session.final_passed = Some(final_passed);
            session.summary = Some(self.build_summary(&session.checkpoints));
            session.completed_at = Some(chrono::Utc::now().to_rfc3339());
            session.state = if final_passed {
                SessionState::Completed
            } else {
                SessionState::Failed
            };
            session.clone()
        };

        self.persist_session(&session);
        info!(
            session_id,
            final_score = session.final_score,
            final_passed = session.final_passed,
            state = %session.state,
            "Session completed"
        );
        Ok(session)
    }

    /// Aborts an active session. Terminal and final, like completion.
    pub async fn abort_session(
        &self,
        session_id: &str,
        reason: &str,
    ) -> Result<ValidationSession, SessionError> {
        self.ensure_active(session_id).await?;

        let session = {
            let mut sessions = self.sessions.lock().await;
            let session = sessions
                .get_mut(session_id)
                .ok_or_else(|| SessionError::UnknownSession(session_id.to_string()))?;
            session.state = SessionState::Aborted;
            session.completed_at = Some(chrono::Utc::now().to_rfc3339());
            session.clone()
        };

        self.persist_session(&session);
        info!(session_id, reason, "Session aborted");
        Ok(session)
    }

    pub async fn get_session(&self, session_id: &str) -> Option<ValidationSession> {
        self.sessions.lock().await.get(session_id).cloned()
    }

    async fn ensure_active(&self, session_id: &str) -> Result<(), SessionError> {
        let sessions = self.sessions.lock().await;
        let session = sessions
            .get(session_id)
            .ok_or_else(|| SessionError::UnknownSession(session_id.to_string()))?;
        if session.state.is_terminal() {
            return Err(SessionError::AlreadyTerminal {
                id: session_id.to_string(),
                state: session.state.to_string(),
            });
        }
        Ok(())
    }

    fn build_summary(&self, checkpoints: &[ValidationCheckpoint]) -> SessionSummary {
        let count = checkpoints.len();
        let passed_count = checkpoints.iter().filter(|c| c.passed).count();
        let average_score = mean(checkpoints.iter().map(|c| c.score));
        let average_confidence = mean(checkpoints.iter().map(|c| c.confidence));

        // Per-phase average score decides reliability ranking.
        let mut phase_scores: HashMap<&str, Vec<f64>> = HashMap::new();
        for checkpoint in checkpoints {
            phase_scores
                .entry(checkpoint.phase.as_str())
                .or_default()
                .push(checkpoint.score);
        }
        let mut phase_averages: Vec<(String, f64)> = phase_scores
            .into_iter()
            .map(|(phase, scores)| (phase.to_string(), mean(scores.iter().copied())))
            .collect();
        phase_averages.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        let least_reliable_phase = phase_averages.first().map(|(phase, _)| phase.clone());
        let most_reliable_phase = phase_averages.last().map(|(phase, _)| phase.clone());

        let scores: Vec<f64> = checkpoints.iter().map(|c| c.score).collect();
        let trend = classify_trend(&scores);

        let recommendations = self.build_recommendations(
            checkpoints,
            average_score,
            average_confidence,
            trend,
        );

        SessionSummary {
            checkpoint_count: count,
            passed_count,
            failed_count: count - passed_count,
            average_score,
            average_confidence,
            most_reliable_phase,
            least_reliable_phase,
            trend,
            recommendations,
        }
    }

    fn build_recommendations(
        &self,
        checkpoints: &[ValidationCheckpoint],
        average_score: f64,
        average_confidence: f64,
        trend: Trend,
    ) -> Vec<String> {
        let mut recommendations = Vec::new();
        if average_score < self.config.min_checkpoint_score {
            recommendations.push(format!(
                "Average checkpoint score {:.1} is below the {:.0} threshold; the fix likely does not address the failing behavior",
                average_score, self.config.min_checkpoint_score
            ));
        }
        if average_confidence < 0.5 {
            recommendations.push(
                "Low validation confidence; results may not reflect actual code quality".to_string(),
            );
        }
        if checkpoints
            .iter()
            .any(|c| c.test_result.as_ref().is_some_and(|t| t.no_tests_found))
        {
            recommendations
                .push("Some checkpoints found no tests; add tests covering the fix".to_string());
        }
        if checkpoints
            .iter()
            .any(|c| c.test_result.as_ref().is_some_and(|t| !t.execution_reliable))
        {
            recommendations.push(
                "Test execution was unreliable in some checkpoints; investigate timeouts or crashes"
                    .to_string(),
            );
        }
        match trend {
            Trend::Decreasing => recommendations
                .push("Scores are decreasing across iterations; later changes regress earlier progress".to_string()),
            Trend::Volatile => recommendations
                .push("Scores are volatile across iterations; stabilize the test environment".to_string()),
            _ => {}
        }
        if recommendations.is_empty() {
            recommendations.push("Validation is healthy; no action needed".to_string());
        }
        recommendations
    }

    fn persist_checkpoint(&self, session_id: &str, index: usize, checkpoint: &ValidationCheckpoint) {
        let Some(root) = &self.config.checkpoint_root else {
            return;
        };
        let path = root
            .join(session_id)
            .join(format!("checkpoint-{index}.json"));
        match serde_json::to_string_pretty(checkpoint) {
            Ok(json) => {
                if let Err(e) = std::fs::write(&path, json) {
                    warn!(path = %path.display(), error = %e, "Failed to persist checkpoint");
                }
            }
            Err(e) => warn!(error = %e, "Failed to serialize checkpoint"),
        }
    }

    fn persist_session(&self, session: &ValidationSession) {
        let Some(root) = &self.config.checkpoint_root else {
            return;
        };
        let dir = root.join(&session.session_id);
        if let Err(e) = std::fs::create_dir_all(&dir) {
            warn!(error = %e, "Failed to create session directory");
            return;
        }
        let path = dir.join("session.json");
        match serde_json::to_string_pretty(session) {
            Ok(json) => {
                if let Err(e) = std::fs::write(&path, json) {
                    warn!(path = %path.display(), error = %e, "Failed to persist session");
                }
            }
            Err(e) => warn!(error = %e, "Failed to serialize session"),
        }
    }

    /// Test executor shared by checkpoints (exposed for integration tests).
    pub fn executor(&self) -> &RepositoryManager {
        self.executor.as_ref()
    }
}

/// Exponentially weighted mean: checkpoint `i` weighs `1.2^i`, so the most
/// recent checkpoint counts most.
pub fn weighted_final_score(checkpoints: &[ValidationCheckpoint]) -> f64 {
    if checkpoints.is_empty() {
        return 0.0;
    }
    let mut weighted_sum = 0.0;
    let mut weight_total = 0.0;
    for (idx, checkpoint) in checkpoints.iter().enumerate() {
        let weight = FINAL_SCORE_WEIGHT_BASE.powi(idx as i32);
        weighted_sum += checkpoint.score * weight;
        weight_total += weight;
    }
    weighted_sum / weight_total
}

/// Trend over the last three scores: mean diff > +5 increasing, < −5
/// decreasing, score variance > 100 volatile, else stable.
pub fn classify_trend(scores: &[f64]) -> Trend {
    let window: Vec<f64> = scores.iter().rev().take(3).rev().copied().collect();
    if window.len() < 2 {
        return Trend::Stable;
    }

    let diffs: Vec<f64> = window.windows(2).map(|pair| pair[1] - pair[0]).collect();
    let mean_diff = mean(diffs.iter().copied());
    if mean_diff > 5.0 {
        return Trend::Increasing;
    }
    if mean_diff < -5.0 {
        return Trend::Decreasing;
    }

    let window_mean = mean(window.iter().copied());
    let variance = mean(window.iter().map(|score| (score - window_mean).powi(2)));
    if variance > 100.0 {
        return Trend::Volatile;
    }
    Trend::Stable
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let collected: Vec<f64> = values.collect();
    if collected.is_empty() {
        0.0
    } else {
        collected.iter().sum::<f64>() / collected.len() as f64
    }
}
