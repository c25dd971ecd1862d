//! Independent validators, organized into ordered levels.
//!
//! Each validator inspects a [`CodeSnapshot`] and returns a
//! [`VerificationStageResult`]. Validators within one level have no
//! interdependencies and run concurrently; levels run in order so cheap
//! gating checks (syntax, types) can fail the pipeline before expensive
//! ones (test execution) start.

mod complexity;
mod coverage;
mod lint;
mod performance;
mod production;
mod security;
mod syntax;
mod tests_exec;
mod typecheck;

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;

pub use complexity::ComplexityValidator;
pub use coverage::CoverageValidator;
pub use lint::LintValidator;
pub use performance::PerformanceValidator;
pub use production::ProductionReadinessValidator;
pub use security::SecurityValidator;
pub use syntax::SyntaxValidator;
pub use tests_exec::TestExecutionValidator;
pub use typecheck::TypeCheckValidator;

use super::types::{
    CodeSnapshot, Severity, ValidationContext, VerificationFinding, VerificationStageResult,
};

/// An independent verification check.
#[async_trait]
pub trait Validator: Send + Sync {
    fn name(&self) -> &'static str;

    async fn validate(
        &self,
        snapshot: &CodeSnapshot,
        ctx: &ValidationContext,
    ) -> VerificationStageResult;

    /// Whether this validator can rewrite code to address its own findings.
    fn can_auto_fix(&self) -> bool {
        false
    }

    /// Applies automatic fixes for `findings`, returning the rewritten
    /// snapshot, or `None` when nothing could be fixed.
    fn auto_fix(
        &self,
        _snapshot: &CodeSnapshot,
        _findings: &[VerificationFinding],
    ) -> Option<CodeSnapshot> {
        None
    }
}

/// Stage names whose individual failure fails the whole pipeline.
pub const CRITICAL_STAGES: [&str; 2] = ["syntax", "typecheck"];

/// Builds the standard four-level validator registry.
pub fn default_levels() -> Vec<Vec<Arc<dyn Validator>>> {
    vec![
        vec![
            Arc::new(SyntaxValidator::new()) as Arc<dyn Validator>,
            Arc::new(TypeCheckValidator::new()),
        ],
        vec![
            Arc::new(LintValidator::new()) as Arc<dyn Validator>,
            Arc::new(SecurityValidator::new()),
            Arc::new(ComplexityValidator::new()),
        ],
        vec![
            Arc::new(TestExecutionValidator::new()) as Arc<dyn Validator>,
            Arc::new(CoverageValidator::new()),
            Arc::new(PerformanceValidator::new()),
        ],
        vec![Arc::new(ProductionReadinessValidator::new()) as Arc<dyn Validator>],
    ]
}

/// Standard deduction-based stage score: each finding subtracts by
/// severity, floor at zero.
pub(crate) fn score_from_findings(findings: &[VerificationFinding]) -> f64 {
    let penalty: f64 = findings
        .iter()
        .map(|f| match f.severity {
            Severity::Critical => 25.0,
            Severity::High => 10.0,
            Severity::Medium => 5.0,
            Severity::Low => 2.0,
        })
        .sum();
    (100.0 - penalty).max(0.0)
}

/// Assembles a stage result with the standard pass rule: no error-kind
/// findings of high or critical severity.
pub(crate) fn stage_result(
    stage: &str,
    findings: Vec<VerificationFinding>,
    score: f64,
    start: Instant,
) -> VerificationStageResult {
    let passed = !findings.iter().any(|f| {
        matches!(f.kind, super::types::FindingKind::Error)
            && matches!(f.severity, Severity::Critical | Severity::High)
    });
    VerificationStageResult {
        stage: stage.to_string(),
        passed,
        score: score.clamp(0.0, 100.0),
        duration_ms: start.elapsed().as_millis() as u64,
        findings,
    }
}

#[cfg(test)]
mod registry_tests {
    use super::*;

    #[test]
    fn default_levels_have_expected_shape() {
        let levels = default_levels();
        assert_eq!(levels.len(), 4);
        assert_eq!(levels[0].len(), 2);
        assert_eq!(levels[1].len(), 3);
        assert_eq!(levels[2].len(), 3);
        assert_eq!(levels[3].len(), 1);

        let level1: Vec<&str> = levels[0].iter().map(|v| v.name()).collect();
        assert!(level1.contains(&"syntax"));
        assert!(level1.contains(&"typecheck"));
    }

    #[test]
    fn critical_stages_exist_in_level_one() {
        let levels = default_levels();
        for stage in CRITICAL_STAGES {
            assert!(levels[0].iter().any(|v| v.name() == stage));
        }
    }

    #[test]
    fn score_deductions_floor_at_zero() {
        let findings: Vec<VerificationFinding> = (0..10)
            .map(|_| VerificationFinding::error(Severity::Critical, "x"))
            .collect();
        assert_eq!(score_from_findings(&findings), 0.0);
        assert_eq!(score_from_findings(&[]), 100.0);
    }
}
