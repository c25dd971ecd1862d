//! Performance anti-pattern scan.

use std::sync::OnceLock;
use std::time::Instant;

use async_trait::async_trait;
use regex::Regex;

use crate::verify::types::{
    CodeSnapshot, Severity, ValidationContext, VerificationFinding, VerificationStageResult,
};

use super::{score_from_findings, stage_result, Validator};

struct AntiPattern {
    regex: Regex,
    severity: Severity,
    message: &'static str,
}

fn anti_patterns() -> &'static Vec<AntiPattern> {
    static PATTERNS: OnceLock<Vec<AntiPattern>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        vec![
            AntiPattern {
                regex: Regex::new(r"(?s)for\s*\([^)]*\)\s*\{[^{}]*\bawait\b").expect("static regex"),
                severity: Severity::High,
                message: "await inside a for loop serializes async work",
            },
            AntiPattern {
                regex: Regex::new(r"\.forEach\s*\(\s*async").expect("static regex"),
                severity: Severity::High,
                message: "async callback in forEach is never awaited",
            },
            AntiPattern {
                regex: Regex::new(r"JSON\.parse\s*\(\s*JSON\.stringify\s*\(").expect("static regex"),
                severity: Severity::Medium,
                message: "deep clone via JSON round-trip",
            },
            AntiPattern {
                regex: Regex::new(r"\b(readFileSync|writeFileSync|execSync)\s*\(")
                    .expect("static regex"),
                severity: Severity::Medium,
                message: "synchronous I/O blocks the event loop",
            },
            AntiPattern {
                regex: Regex::new(r"(?s)for\s*\([^)]*\)\s*\{[^{}]*for\s*\([^)]*\)\s*\{[^{}]*for\s*\(")
                    .expect("static regex"),
                severity: Severity::Medium,
                message: "triple-nested loop",
            },
        ]
    })
}

pub struct PerformanceValidator;

impl PerformanceValidator {
    pub fn new() -> Self {
        Self
    }
}

impl Default for PerformanceValidator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Validator for PerformanceValidator {
    fn name(&self) -> &'static str {
        "performance"
    }

    async fn validate(
        &self,
        snapshot: &CodeSnapshot,
        _ctx: &ValidationContext,
    ) -> VerificationStageResult {
        let start = Instant::now();
        let mut findings = Vec::new();

        for file in snapshot.code_files() {
            for pattern in anti_patterns() {
                for found in pattern.regex.find_iter(&file.content) {
                    let line = file.content[..found.start()].lines().count().max(1);
                    findings.push(
                        VerificationFinding::warning(pattern.severity, pattern.message)
                            .at(&file.path, line),
                    );
                }
            }
        }

        let score = score_from_findings(&findings);
        stage_result("performance", findings, score, start)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verify::types::SourceFile;

    async fn run(content: &str) -> VerificationStageResult {
        let snapshot = CodeSnapshot::new(vec![SourceFile {
            path: "src/app.js".to_string(),
            content: content.to_string(),
        }]);
        PerformanceValidator::new()
            .validate(&snapshot, &ValidationContext::default())
            .await
    }

    #[tokio::test]
    async fn await_in_loop_is_high() {
        let result = run("for (const id of ids) {\n  const user = await fetchUser(id);\n}\n").await;
        assert!(result
            .findings
            .iter()
            .any(|f| f.message.contains("await inside a for loop")));
        assert_eq!(result.findings[0].severity, Severity::High);
    }

    #[tokio::test]
    async fn async_foreach_is_flagged() {
        let result = run("items.forEach(async (item) => { await save(item); });\n").await;
        assert!(result
            .findings
            .iter()
            .any(|f| f.message.contains("forEach")));
    }

    #[tokio::test]
    async fn json_round_trip_clone_is_flagged() {
        let result = run("const copy = JSON.parse(JSON.stringify(config));\n").await;
        assert!(result
            .findings
            .iter()
            .any(|f| f.message.contains("JSON round-trip")));
    }

    #[tokio::test]
    async fn sync_io_is_flagged_with_line() {
        let result = run("const a = 1;\nconst data = readFileSync('x.json');\n").await;
        let finding = result
            .findings
            .iter()
            .find(|f| f.message.contains("synchronous I/O"))
            .unwrap();
        assert_eq!(finding.line, Some(2));
    }

    #[tokio::test]
    async fn clean_async_code_scores_full() {
        let result = run(
            "const users = await Promise.all(ids.map((id) => fetchUser(id)));\nconst data = await fs.readFile('x.json');\n",
        )
        .await;
        assert!(result.findings.is_empty());
        assert_eq!(result.score, 100.0);
        assert!(result.passed);
    }

    #[tokio::test]
    async fn warnings_do_not_fail_the_stage() {
        let result = run("for (const x of xs) {\n  await step(x);\n}\n").await;
        assert!(result.passed);
        assert!(result.score < 100.0);
    }
}
