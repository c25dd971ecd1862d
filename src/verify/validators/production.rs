//! Production-readiness checklist.
//!
//! Eight weighted sub-checks, each itself a small weighted checklist.
//! Missing items surface as suggestions; the stage score is the weighted
//! composite.

use std::time::Instant;

use async_trait::async_trait;

use crate::verify::types::{
    CodeSnapshot, Severity, ValidationContext, VerificationFinding, VerificationStageResult,
};

use super::{stage_result, Validator};

/// Composite passes at or above this score.
const PASS_THRESHOLD: f64 = 60.0;

pub struct ProductionReadinessValidator;

impl ProductionReadinessValidator {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ProductionReadinessValidator {
    fn default() -> Self {
        Self::new()
    }
}

struct SubCheck {
    name: &'static str,
    weight: f64,
    score: f64,
    missing: Vec<&'static str>,
}

#[async_trait]
impl Validator for ProductionReadinessValidator {
    fn name(&self) -> &'static str {
        "production"
    }

    async fn validate(
        &self,
        snapshot: &CodeSnapshot,
        _ctx: &ValidationContext,
    ) -> VerificationStageResult {
        let start = Instant::now();

        let checks = [
            check_documentation(snapshot),
            check_error_handling(snapshot),
            check_logging(snapshot),
            check_monitoring(snapshot),
            check_security(snapshot),
            check_performance(snapshot),
            check_deployment(snapshot),
            check_testing(snapshot),
        ];

        let score: f64 = checks.iter().map(|c| c.score * c.weight).sum();
        let mut findings = Vec::new();
        for check in &checks {
            for item in &check.missing {
                findings.push(
                    VerificationFinding::suggestion(format!("{}: {}", check.name, item)),
                );
            }
            if check.score < 50.0 {
                findings.push(VerificationFinding::warning(
                    Severity::Medium,
                    format!("{} readiness is weak ({:.0}/100)", check.name, check.score),
                ));
            }
        }

        let mut result = stage_result("production", findings, score, start);
        result.passed = score >= PASS_THRESHOLD;
        result
    }
}

/// Whether any file in the snapshot satisfies the predicate.
fn any_file(snapshot: &CodeSnapshot, pred: impl Fn(&str, &str) -> bool) -> bool {
    snapshot.files.iter().any(|f| pred(&f.path, &f.content))
}

fn any_code(snapshot: &CodeSnapshot, pred: impl Fn(&str) -> bool) -> bool {
    snapshot.code_files().any(|f| pred(&f.content))
}

fn check_documentation(snapshot: &CodeSnapshot) -> SubCheck {
    let mut score = 0.0;
    let mut missing = Vec::new();

    if any_file(snapshot, |path, _| path.eq_ignore_ascii_case("readme.md")) {
        score += 40.0;
    } else {
        missing.push("add a README");
    }
    if any_code(snapshot, |content| content.contains("/**")) {
        score += 30.0;
    } else {
        missing.push("add doc comments to public functions");
    }
    if any_file(snapshot, |path, _| {
        path.starts_with("docs/") || path.eq_ignore_ascii_case("changelog.md")
    }) {
        score += 30.0;
    } else {
        missing.push("add docs/ or a changelog");
    }

    SubCheck {
        name: "documentation",
        weight: 0.15,
        score,
        missing,
    }
}

fn check_error_handling(snapshot: &CodeSnapshot) -> SubCheck {
    let mut score = 0.0;
    let mut missing = Vec::new();

    if any_code(snapshot, |c| c.contains("try {") || c.contains(".catch(")) {
        score += 25.0;
    } else {
        missing.push("no try/catch or promise rejection handling");
    }
    if any_code(snapshot, |c| {
        c.contains("extends Error") || c.contains("ErrorBoundary")
    }) {
        score += 25.0;
    } else {
        missing.push("no custom error types or error boundary");
    }
    if any_code(snapshot, |c| {
        c.contains("?? ") || c.contains("|| default") || c.contains("fallback")
    }) {
        score += 25.0;
    } else {
        missing.push("no fallback/default handling");
    }
    if any_code(snapshot, |c| c.contains("retry") || c.contains("backoff")) {
        score += 25.0;
    } else {
        missing.push("no retry/backoff for transient failures");
    }

    SubCheck {
        name: "error-handling",
        weight: 0.20,
        score,
        missing,
    }
}

fn check_logging(snapshot: &CodeSnapshot) -> SubCheck {
    let mut score = 0.0;
    let mut missing = Vec::new();

    let has_logger = any_code(snapshot, |c| {
        ["winston", "pino", "bunyan", "log4js"]
            .iter()
            .any(|lib| c.contains(lib))
    });
    if has_logger {
        score += 50.0;
    } else {
        missing.push("no structured logging library");
    }
    if any_code(snapshot, |c| c.contains("logger.") || c.contains("log.info")) {
        score += 30.0;
    } else {
        missing.push("no logger usage in code paths");
    }
    if !any_code(snapshot, |c| c.contains("console.log(")) {
        score += 20.0;
    } else {
        missing.push("console.log used instead of a logger");
    }

    SubCheck {
        name: "logging",
        weight: 0.10,
        score,
        missing,
    }
}

fn check_monitoring(snapshot: &CodeSnapshot) -> SubCheck {
    let mut score = 0.0;
    let mut missing = Vec::new();

    if any_code(snapshot, |c| c.contains("/health") || c.contains("healthcheck")) {
        score += 40.0;
    } else {
        missing.push("no health check endpoint");
    }
    if any_code(snapshot, |c| {
        c.contains("prometheus") || c.contains("statsd") || c.contains("metrics")
    }) {
        score += 30.0;
    } else {
        missing.push("no metrics emission");
    }
    if any_code(snapshot, |c| c.contains("sentry") || c.contains("Sentry")) {
        score += 30.0;
    } else {
        missing.push("no error reporting integration");
    }

    SubCheck {
        name: "monitoring",
        weight: 0.10,
        score,
        missing,
    }
}

fn check_security(snapshot: &CodeSnapshot) -> SubCheck {
    let mut score = 0.0;
    let mut missing = Vec::new();

    if any_code(snapshot, |c| c.contains("helmet") || c.contains("cors")) {
        score += 30.0;
    } else {
        missing.push("no HTTP hardening middleware (helmet/cors)");
    }
    if any_code(snapshot, |c| {
        ["joi", "zod", "validator", "ajv"].iter().any(|lib| c.contains(lib))
    }) {
        score += 30.0;
    } else {
        missing.push("no input validation library");
    }
    if any_code(snapshot, |c| c.contains("process.env.")) {
        score += 40.0;
    } else {
        missing.push("secrets/config not read from the environment");
    }

    SubCheck {
        name: "security",
        weight: 0.20,
        score,
        missing,
    }
}

fn check_performance(snapshot: &CodeSnapshot) -> SubCheck {
    let mut score = 0.0;
    let mut missing = Vec::new();

    if any_code(snapshot, |c| {
        c.contains("cache") || c.contains("redis") || c.contains("memoize")
    }) {
        score += 40.0;
    } else {
        missing.push("no caching layer");
    }
    if any_code(snapshot, |c| {
        c.contains("limit") && c.contains("offset") || c.contains("cursor")
    }) {
        score += 30.0;
    } else {
        missing.push("no pagination for list endpoints");
    }
    if any_code(snapshot, |c| c.contains("compression") || c.contains("gzip")) {
        score += 30.0;
    } else {
        missing.push("no response compression");
    }

    SubCheck {
        name: "performance",
        weight: 0.10,
        score,
        missing,
    }
}

fn check_deployment(snapshot: &CodeSnapshot) -> SubCheck {
    let mut score = 0.0;
    let mut missing = Vec::new();

    if any_file(snapshot, |path, _| {
        path == "Dockerfile" || path.ends_with("/Dockerfile")
    }) {
        score += 40.0;
    } else {
        missing.push("no Dockerfile");
    }
    if any_file(snapshot, |path, _| {
        path.starts_with(".github/workflows/") || path == ".gitlab-ci.yml"
    }) {
        score += 30.0;
    } else {
        missing.push("no CI pipeline configuration");
    }
    if any_file(snapshot, |path, _| {
        path == ".env.example" || path.starts_with("config/")
    }) {
        score += 30.0;
    } else {
        missing.push("no environment configuration template");
    }

    SubCheck {
        name: "deployment",
        weight: 0.10,
        score,
        missing,
    }
}

fn check_testing(snapshot: &CodeSnapshot) -> SubCheck {
    let mut score = 0.0;
    let mut missing = Vec::new();

    if snapshot.test_files().count() > 0 {
        score += 50.0;
    } else {
        missing.push("no test files");
    }
    let has_test_script = snapshot
        .get("package.json")
        .and_then(|f| serde_json::from_str::<serde_json::Value>(&f.content).ok())
        .and_then(|pkg| {
            pkg.get("scripts")
                .and_then(|s| s.get("test"))
                .and_then(|t| t.as_str())
                .map(|script| !script.trim().is_empty())
        })
        .unwrap_or(false);
    if has_test_script {
        score += 30.0;
    } else {
        missing.push("no test script in package.json");
    }
    if any_file(snapshot, |path, content| {
        path.starts_with(".github/workflows/") && content.contains("test")
    }) {
        score += 20.0;
    } else {
        missing.push("CI does not run tests");
    }

    SubCheck {
        name: "testing",
        weight: 0.15,
        score,
        missing,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verify::types::SourceFile;

    fn file(path: &str, content: &str) -> SourceFile {
        SourceFile {
            path: path.to_string(),
            content: content.to_string(),
        }
    }

    #[tokio::test]
    async fn bare_snapshot_fails_with_suggestions() {
        let snapshot = CodeSnapshot::new(vec![file("src/app.js", "const x = 1;\n")]);
        let result = ProductionReadinessValidator::new()
            .validate(&snapshot, &ValidationContext::default())
            .await;
        assert!(!result.passed);
        assert!(result.score < PASS_THRESHOLD);
        assert!(result
            .findings
            .iter()
            .any(|f| f.message.contains("documentation")));
        assert!(result
            .findings
            .iter()
            .any(|f| f.message.contains("no test files")));
    }

    #[tokio::test]
    async fn equipped_project_passes() {
        let snapshot = CodeSnapshot::new(vec![
            file("README.md", "# Service\n"),
            file("docs/guide.md", "guide\n"),
            file("Dockerfile", "FROM node:20\n"),
            file(".github/workflows/ci.yml", "run: npm test\n"),
            file(".env.example", "API_TOKEN=\n"),
            file(
                "package.json",
                r#"{"scripts": {"test": "jest"}, "dependencies": {"pino": "^8"}}"#,
            ),
            file(
                "src/server.js",
                "/** Entry point. */\nconst pino = require('pino');\nconst logger = pino();\nconst helmet = require('helmet');\nconst { z } = require('zod');\napp.get('/health', (req, res) => res.send('ok'));\nconst cache = new Map();\nconst limit = 50; const offset = 0;\nconst compression = require('compression');\ntry {\n  run({ retry: 3 });\n} catch (err) {\n  logger.error({ err }, 'failed');\n  const value = input ?? fallbackValue;\n}\nclass ServiceError extends Error {}\nconst token = process.env.API_TOKEN;\nconst metrics = require('prom-client');\nconst Sentry = require('@sentry/node');\n",
            ),
            file("src/server.test.js", "test('health', () => {});\n"),
        ]);
        let result = ProductionReadinessValidator::new()
            .validate(&snapshot, &ValidationContext::default())
            .await;
        assert!(result.passed, "score was {:.1}", result.score);
        assert!(result.score > 90.0);
    }

    #[tokio::test]
    async fn weights_sum_to_one() {
        let snapshot = CodeSnapshot::new(vec![file("src/app.js", "")]);
        let checks = [
            check_documentation(&snapshot),
            check_error_handling(&snapshot),
            check_logging(&snapshot),
            check_monitoring(&snapshot),
            check_security(&snapshot),
            check_performance(&snapshot),
            check_deployment(&snapshot),
            check_testing(&snapshot),
        ];
        let total: f64 = checks.iter().map(|c| c.weight).sum();
        assert!((total - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn score_stays_within_bounds() {
        let snapshot = CodeSnapshot::new(vec![file("src/app.js", "const x = 1;")]);
        let result = ProductionReadinessValidator::new()
            .validate(&snapshot, &ValidationContext::default())
            .await;
        assert!(result.score >= 0.0 && result.score <= 100.0);
    }
}
