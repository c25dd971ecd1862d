//! Type checking: real `tsc --noEmit` when a checkout with a tsconfig is
//! available, pattern heuristics over the snapshot otherwise.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use regex::Regex;
use tracing::debug;

use crate::exec::{normalized_env, run_command};
use crate::verify::types::{
    CodeSnapshot, Severity, ValidationContext, VerificationFinding, VerificationStageResult,
};

use super::{score_from_findings, stage_result, Validator};

const DEFAULT_TSC_TIMEOUT: Duration = Duration::from_secs(180);

/// Cap on findings extracted from a tsc run; a broken base type brings
/// thousands of cascading errors that add nothing past the first page.
const MAX_TSC_FINDINGS: usize = 25;

pub struct TypeCheckValidator;

impl TypeCheckValidator {
    pub fn new() -> Self {
        Self
    }
}

impl Default for TypeCheckValidator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Validator for TypeCheckValidator {
    fn name(&self) -> &'static str {
        "typecheck"
    }

    async fn validate(
        &self,
        snapshot: &CodeSnapshot,
        ctx: &ValidationContext,
    ) -> VerificationStageResult {
        let start = Instant::now();

        if let Some(repo_path) = ctx
            .repo_path
            .as_ref()
            .filter(|path| path.join("tsconfig.json").exists())
        {
            let timeout = ctx.test_timeout.unwrap_or(DEFAULT_TSC_TIMEOUT);
            let output = run_command(
                "npx",
                &["--yes", "tsc", "--noEmit", "--pretty", "false"],
                repo_path,
                &normalized_env(),
                timeout,
            )
            .await;
            if output.success() {
                return stage_result("typecheck", Vec::new(), 100.0, start);
            }
            let findings = parse_tsc_output(&output.combined());
            let score = score_from_findings(&findings);
            return stage_result("typecheck", findings, score, start);
        }

        // No type configuration to run against: heuristic scan for type
        // hygiene issues. These are advisory, never gating.
        let findings = heuristic_findings(snapshot);
        let score = score_from_findings(&findings);
        stage_result("typecheck", findings, score, start)
    }
}

/// Extracts `path(line,col): error TSxxxx: message` diagnostics.
fn parse_tsc_output(raw: &str) -> Vec<VerificationFinding> {
    let diagnostic =
        Regex::new(r"(?m)^(.+?)\((\d+),\d+\):\s+error\s+(TS\d+):\s+(.+)$").expect("static regex");
    let mut findings: Vec<VerificationFinding> = diagnostic
        .captures_iter(raw)
        .take(MAX_TSC_FINDINGS)
        .map(|caps| {
            let line = caps[2].parse().unwrap_or(0);
            VerificationFinding::error(
                Severity::Critical,
                format!("{}: {}", &caps[3], &caps[4]),
            )
            .at(caps[1].to_string(), line)
        })
        .collect();

    if findings.is_empty() {
        // tsc failed but emitted nothing we recognize (config error, OOM).
        debug!("tsc exited non-zero without parseable diagnostics");
        findings.push(VerificationFinding::error(
            Severity::Critical,
            "type check failed without parseable diagnostics",
        ));
    }
    findings
}

fn heuristic_findings(snapshot: &CodeSnapshot) -> Vec<VerificationFinding> {
    let mut findings = Vec::new();
    for file in snapshot.code_files() {
        if !file.path.ends_with(".ts") && !file.path.ends_with(".tsx") {
            continue;
        }
        for (idx, line) in file.content.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.starts_with("//") || trimmed.starts_with('*') {
                if trimmed.contains("@ts-ignore") || trimmed.contains("@ts-expect-error") {
                    findings.push(
                        VerificationFinding::warning(
                            Severity::High,
                            "type error suppressed with @ts-ignore",
                        )
                        .at(&file.path, idx + 1),
                    );
                }
                continue;
            }
            if trimmed.contains(": any") || trimmed.contains("<any>") {
                findings.push(
                    VerificationFinding::warning(Severity::Medium, "explicit 'any' type")
                        .at(&file.path, idx + 1),
                );
            }
            if trimmed.contains("as unknown as") {
                findings.push(
                    VerificationFinding::warning(
                        Severity::Medium,
                        "double assertion 'as unknown as' bypasses the type checker",
                    )
                    .at(&file.path, idx + 1),
                );
            }
        }
    }
    findings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verify::types::SourceFile;

    fn snapshot_of(path: &str, content: &str) -> CodeSnapshot {
        CodeSnapshot::new(vec![SourceFile {
            path: path.to_string(),
            content: content.to_string(),
        }])
    }

    #[test]
    fn parses_tsc_diagnostics() {
        let raw = "src/app.ts(14,5): error TS2322: Type 'string' is not assignable to type 'number'.\nsrc/app.ts(20,1): error TS2304: Cannot find name 'foo'.\n";
        let findings = parse_tsc_output(raw);
        assert_eq!(findings.len(), 2);
        assert!(findings[0].is_critical());
        assert_eq!(findings[0].file.as_deref(), Some("src/app.ts"));
        assert_eq!(findings[0].line, Some(14));
        assert!(findings[0].message.contains("TS2322"));
    }

    #[test]
    fn unparseable_tsc_failure_still_yields_a_critical() {
        let findings = parse_tsc_output("error TS5083: Cannot read file 'tsconfig.json'");
        assert_eq!(findings.len(), 1);
        assert!(findings[0].is_critical());
    }

    #[tokio::test]
    async fn heuristics_flag_any_and_suppressions() {
        let snapshot = snapshot_of(
            "src/app.ts",
            "const x: any = load();\n// @ts-ignore\nconst y = x.field;\nconst z = a as unknown as B;\n",
        );
        let result = TypeCheckValidator::new()
            .validate(&snapshot, &ValidationContext::default())
            .await;
        assert_eq!(result.findings.len(), 3);
        // Heuristic warnings never fail the gating stage.
        assert!(result.passed);
        assert!(result.score < 100.0);
    }

    #[tokio::test]
    async fn javascript_files_are_exempt_from_type_heuristics() {
        let snapshot = snapshot_of("src/app.js", "const x: any = 1; // not real js anyway\n");
        let result = TypeCheckValidator::new()
            .validate(&snapshot, &ValidationContext::default())
            .await;
        assert!(result.findings.is_empty());
        assert_eq!(result.score, 100.0);
    }
}
