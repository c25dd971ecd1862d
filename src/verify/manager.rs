//! Verification pipeline manager.
//!
//! Runs validator levels in order (validators within a level concurrently),
//! applies fail-fast on critical findings, aggregates stage scores into a
//! single verdict, optionally runs bounded auto-fix/re-verify rounds, and
//! keeps a rolling metrics history for trend reporting.

use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::types::{
    CodeSnapshot, FindingKind, MetricsSummary, MetricsTrend, Severity, ValidationContext,
    VerificationFinding, VerificationResult, VerificationStageResult,
};
use super::validators::{default_levels, Validator, CRITICAL_STAGES};

/// Configuration for the verification pipeline.
#[derive(Debug, Clone)]
pub struct VerifyConfig {
    /// Stop after a level once cumulative critical findings exceed
    /// `max_critical`.
    pub fail_fast: bool,
    pub max_critical: usize,
    pub max_high: usize,
    /// Minimum overall score for a passing verdict.
    pub min_score: f64,
    pub auto_fix: bool,
    /// Hard bound on fix/re-verify rounds.
    pub max_auto_fix_attempts: u32,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            fail_fast: true,
            max_critical: 0,
            max_high: 3,
            min_score: 70.0,
            auto_fix: false,
            max_auto_fix_attempts: 3,
        }
    }
}

impl VerifyConfig {
    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    pub fn with_min_score(mut self, min_score: f64) -> Self {
        self.min_score = min_score;
        self
    }

    pub fn with_auto_fix(mut self, auto_fix: bool) -> Self {
        self.auto_fix = auto_fix;
        self
    }

    pub fn with_max_critical(mut self, max_critical: usize) -> Self {
        self.max_critical = max_critical;
        self
    }
}

/// Owns the validator registry and drives verification runs.
pub struct VerificationManager {
    config: VerifyConfig,
    levels: Vec<Vec<Arc<dyn Validator>>>,
    metrics_history: Mutex<Vec<MetricsSummary>>,
}

impl VerificationManager {
    pub fn new(config: VerifyConfig) -> Self {
        Self {
            config,
            levels: default_levels(),
            metrics_history: Mutex::new(Vec::new()),
        }
    }

    /// Replaces the validator registry (tests and special-purpose pipelines).
    pub fn with_levels(mut self, levels: Vec<Vec<Arc<dyn Validator>>>) -> Self {
        self.levels = levels;
        self
    }

    /// Verifies a snapshot, honoring auto-fix when enabled.
    pub async fn verify(
        &self,
        snapshot: CodeSnapshot,
        ctx: ValidationContext,
    ) -> VerificationResult {
        let snapshot = Arc::new(snapshot);
        let ctx = Arc::new(ctx);
        let mut attempt = 0u32;
        let mut current = Arc::clone(&snapshot);

        loop {
            let mut result = self.verify_once(&current, &ctx).await;
            result.fix_attempts = attempt;

            if result.passed || !self.config.auto_fix || attempt >= self.config.max_auto_fix_attempts
            {
                self.record_metrics(result.metrics).await;
                return result;
            }

            match self.apply_auto_fixes(&current, &result) {
                Some(fixed) => {
                    attempt += 1;
                    info!(attempt, "Auto-fix applied, re-verifying");
                    current = Arc::new(fixed);
                }
                None => {
                    self.record_metrics(result.metrics).await;
                    return result;
                }
            }
        }
    }

    /// One pass over all levels, no fixing.
    async fn verify_once(
        &self,
        snapshot: &Arc<CodeSnapshot>,
        ctx: &Arc<ValidationContext>,
    ) -> VerificationResult {
        let mut stages: Vec<VerificationStageResult> = Vec::new();
        let mut critical_total = 0usize;

        for (level_idx, level) in self.levels.iter().enumerate() {
            let runs = level.iter().map(|validator| {
                let validator = Arc::clone(validator);
                let snapshot = Arc::clone(snapshot);
                let ctx = Arc::clone(ctx);
                // Spawned so a panicking validator is contained to its stage.
                tokio::spawn(async move {
                    let name = validator.name();
                    (name, validator.validate(&snapshot, &ctx).await)
                })
            });

            for (validator, joined) in level.iter().zip(join_all(runs).await) {
                let stage = match joined {
                    Ok((_, stage)) => stage,
                    Err(e) => {
                        warn!(stage = validator.name(), error = %e, "Validator crashed");
                        crashed_stage(validator.name(), &e.to_string())
                    }
                };
                critical_total += stage.critical_count();
                stages.push(stage);
            }

            if self.config.fail_fast && critical_total > self.config.max_critical {
                info!(
                    level = level_idx + 1,
                    critical = critical_total,
                    "Fail-fast: skipping remaining levels"
                );
                break;
            }
        }

        self.assemble(stages)
    }

    fn assemble(&self, stages: Vec<VerificationStageResult>) -> VerificationResult {
        let score = if stages.is_empty() {
            0.0
        } else {
            stages.iter().map(|s| s.score).sum::<f64>() / stages.len() as f64
        };

        let mut critical_errors = Vec::new();
        let mut warnings = Vec::new();
        let mut suggestions = Vec::new();
        let mut high_count = 0usize;
        for stage in &stages {
            for finding in &stage.findings {
                if finding.is_critical() {
                    critical_errors.push(finding.clone());
                } else if finding.severity == Severity::High {
                    high_count += 1;
                    warnings.push(finding.clone());
                } else {
                    match finding.kind {
                        FindingKind::Suggestion | FindingKind::Info => {
                            suggestions.push(finding.clone())
                        }
                        _ => warnings.push(finding.clone()),
                    }
                }
            }
        }

        let critical_stages_passed = CRITICAL_STAGES.iter().all(|name| {
            stages
                .iter()
                .find(|s| s.stage == *name)
                .map(|s| s.passed)
                // A critical stage skipped by fail-fast cannot vouch for
                // the snapshot.
                .unwrap_or(false)
        });

        let passed = critical_errors.len() <= self.config.max_critical
            && high_count <= self.config.max_high
            && score >= self.config.min_score
            && critical_stages_passed;

        let metrics = extract_metrics(&stages);

        VerificationResult {
            passed,
            score,
            stages,
            critical_errors,
            warnings,
            suggestions,
            metrics,
            fix_attempts: 0,
        }
    }

    /// Groups automatic-fix findings by stage and lets each capable
    /// validator rewrite the snapshot. Returns `None` when no validator
    /// changed anything.
    fn apply_auto_fixes(
        &self,
        snapshot: &CodeSnapshot,
        result: &VerificationResult,
    ) -> Option<CodeSnapshot> {
        let mut current = snapshot.clone();
        let mut changed = false;

        for stage in &result.stages {
            let fixable: Vec<VerificationFinding> = stage
                .findings
                .iter()
                .filter(|f| f.fix.as_ref().is_some_and(|fix| fix.automatic))
                .cloned()
                .collect();
            if fixable.is_empty() {
                continue;
            }
            let Some(validator) = self
                .levels
                .iter()
                .flatten()
                .find(|v| v.name() == stage.stage && v.can_auto_fix())
            else {
                continue;
            };
            if let Some(fixed) = validator.auto_fix(&current, &fixable) {
                current = fixed;
                changed = true;
            }
        }

        changed.then_some(current)
    }

    async fn record_metrics(&self, metrics: MetricsSummary) {
        let mut history = self.metrics_history.lock().await;
        history.push(metrics);
    }

    /// Current-minus-previous metric deltas, zero when fewer than two runs
    /// have been recorded.
    pub async fn metrics_trend(&self) -> MetricsTrend {
        let history = self.metrics_history.lock().await;
        let len = history.len();
        if len < 2 {
            return MetricsTrend::default();
        }
        let current = history[len - 1];
        let previous = history[len - 2];
        MetricsTrend {
            coverage_delta: current.coverage_percent - previous.coverage_percent,
            complexity_delta: current.complexity_score - previous.complexity_score,
            security_delta: current.security_score - previous.security_score,
            performance_delta: current.performance_score - previous.performance_score,
        }
    }

    pub async fn metrics_history_len(&self) -> usize {
        self.metrics_history.lock().await.len()
    }
}

/// Stage result standing in for a validator that panicked: a single
/// critical finding, zero score, pipeline continues.
fn crashed_stage(name: &str, error: &str) -> VerificationStageResult {
    VerificationStageResult {
        stage: name.to_string(),
        passed: false,
        score: 0.0,
        duration_ms: 0,
        findings: vec![VerificationFinding::error(
            Severity::Critical,
            format!("validator crashed: {error}"),
        )],
    }
}

fn extract_metrics(stages: &[VerificationStageResult]) -> MetricsSummary {
    let stage_score = |name: &str| {
        stages
            .iter()
            .find(|s| s.stage == name)
            .map(|s| s.score)
            .unwrap_or(0.0)
    };
    let lint = stage_score("lint");
    let production = stage_score("production");
    MetricsSummary {
        coverage_percent: stage_score("coverage"),
        complexity_score: stage_score("complexity"),
        security_score: stage_score("security"),
        performance_score: stage_score("performance"),
        maintainability_score: (lint + production) / 2.0,
    }
}
