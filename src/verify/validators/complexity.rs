//! Cyclomatic complexity approximation.
//!
//! Counts decision-point tokens per file and normalizes by an estimated
//! function count. No AST: the estimate only needs to rank hotspots and
//! catch pathological files, not match a real analyzer digit for digit.

use std::sync::OnceLock;
use std::time::Instant;

use async_trait::async_trait;
use regex::Regex;

use crate::verify::types::{
    CodeSnapshot, Severity, ValidationContext, VerificationFinding, VerificationStageResult,
};

use super::{stage_result, Validator};

/// Average per-function complexity above this draws a warning.
const WARN_THRESHOLD: f64 = 10.0;
/// Above this, the file is reported as an error-level hotspot.
const ERROR_THRESHOLD: f64 = 20.0;

fn decision_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\bif\s*\(|\bfor\s*\(|\bwhile\s*\(|\bcase\s|\bcatch\s*\(|\?\?|&&|\|\||\?[^.:]")
            .expect("static regex")
    })
}

fn function_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\bfunction\b|=>\s*[\{(]|^\s*(async\s+)?\w+\s*\([^)]*\)\s*\{")
            .expect("static regex")
    })
}

pub struct ComplexityValidator;

impl ComplexityValidator {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ComplexityValidator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Validator for ComplexityValidator {
    fn name(&self) -> &'static str {
        "complexity"
    }

    async fn validate(
        &self,
        snapshot: &CodeSnapshot,
        _ctx: &ValidationContext,
    ) -> VerificationStageResult {
        let start = Instant::now();
        let mut findings = Vec::new();
        let mut worst: f64 = 0.0;
        let mut total_weighted = 0.0;
        let mut total_functions = 0usize;

        for file in snapshot.code_files() {
            let estimate = estimate_file(&file.content);
            worst = worst.max(estimate.per_function);
            total_weighted += estimate.per_function * estimate.functions as f64;
            total_functions += estimate.functions;

            if estimate.per_function > ERROR_THRESHOLD {
                findings.push(
                    VerificationFinding::error(
                        Severity::High,
                        format!(
                            "average cyclomatic complexity {:.1} across {} function(s)",
                            estimate.per_function, estimate.functions
                        ),
                    )
                    .in_file(&file.path),
                );
            } else if estimate.per_function > WARN_THRESHOLD {
                findings.push(
                    VerificationFinding::warning(
                        Severity::Medium,
                        format!(
                            "average cyclomatic complexity {:.1} across {} function(s)",
                            estimate.per_function, estimate.functions
                        ),
                    )
                    .in_file(&file.path),
                );
            }
        }

        // Score decays linearly from 100 at the warn threshold to 0 at
        // threefold the error threshold.
        let average = if total_functions == 0 {
            0.0
        } else {
            total_weighted / total_functions as f64
        };
        let score = if average <= WARN_THRESHOLD {
            100.0
        } else {
            (100.0 * (1.0 - (average - WARN_THRESHOLD) / (ERROR_THRESHOLD * 3.0 - WARN_THRESHOLD)))
                .max(0.0)
        };

        stage_result("complexity", findings, score, start)
    }
}

#[derive(Debug, Clone, Copy)]
struct FileEstimate {
    functions: usize,
    per_function: f64,
}

fn estimate_file(content: &str) -> FileEstimate {
    let decisions = decision_regex().find_iter(content).count();
    let functions = function_regex().find_iter(content).count().max(1);
    FileEstimate {
        functions,
        // Each function starts at complexity 1; decisions distribute on top.
        per_function: 1.0 + decisions as f64 / functions as f64,
    }
}
