//! Style and hygiene lint over the snapshot.
//!
//! Flags leftover debug statements, `var` declarations, loose equality, and
//! task-marker comments. Debug-statement findings carry an automatic fix:
//! the offending lines are simply dropped.

use std::time::Instant;

use async_trait::async_trait;

use crate::verify::types::{
    CodeSnapshot, FindingKind, Severity, ValidationContext, VerificationFinding,
    VerificationStageResult,
};

use super::{score_from_findings, stage_result, Validator};

const MAX_LINE_LENGTH: usize = 140;

pub struct LintValidator;

impl LintValidator {
    pub fn new() -> Self {
        Self
    }
}

impl Default for LintValidator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Validator for LintValidator {
    fn name(&self) -> &'static str {
        "lint"
    }

    async fn validate(
        &self,
        snapshot: &CodeSnapshot,
        _ctx: &ValidationContext,
    ) -> VerificationStageResult {
        let start = Instant::now();
        let mut findings = Vec::new();

        for file in snapshot.code_files() {
            for (idx, line) in file.content.lines().enumerate() {
                let trimmed = line.trim();
                if trimmed.starts_with("//") || trimmed.starts_with('*') {
                    if trimmed.contains("TODO") || trimmed.contains("FIXME") {
                        findings.push(
                            VerificationFinding::new(
                                FindingKind::Info,
                                Severity::Low,
                                "unresolved task marker comment",
                            )
                            .at(&file.path, idx + 1),
                        );
                    }
                    continue;
                }

                if trimmed.contains("console.log(") || trimmed.contains("console.debug(") {
                    findings.push(
                        VerificationFinding::warning(Severity::Low, "leftover console statement")
                            .at(&file.path, idx + 1)
                            .with_fix(true, "remove the console statement"),
                    );
                }
                if trimmed == "debugger;" || trimmed.starts_with("debugger ") {
                    findings.push(
                        VerificationFinding::error(Severity::High, "debugger statement")
                            .at(&file.path, idx + 1)
                            .with_fix(true, "remove the debugger statement"),
                    );
                }
                if trimmed.starts_with("var ") {
                    findings.push(
                        VerificationFinding::warning(
                            Severity::Medium,
                            "'var' declaration; use let/const",
                        )
                        .at(&file.path, idx + 1),
                    );
                }
                if has_loose_equality(trimmed) {
                    findings.push(
                        VerificationFinding::warning(
                            Severity::Low,
                            "loose equality (== / !=); use === / !==",
                        )
                        .at(&file.path, idx + 1),
                    );
                }
                if line.len() > MAX_LINE_LENGTH {
                    findings.push(
                        VerificationFinding::new(
                            FindingKind::Info,
                            Severity::Low,
                            format!("line exceeds {MAX_LINE_LENGTH} characters"),
                        )
                        .at(&file.path, idx + 1),
                    );
                }
            }
        }

        let score = score_from_findings(&findings);
        stage_result("lint", findings, score, start)
    }

    fn can_auto_fix(&self) -> bool {
        true
    }

    /// Deletes lines flagged with an automatic fix (console/debugger).
    fn auto_fix(
        &self,
        snapshot: &CodeSnapshot,
        findings: &[VerificationFinding],
    ) -> Option<CodeSnapshot> {
        let mut fixed = snapshot.clone();
        let mut changed = false;

        for file in snapshot.files.iter() {
            let doomed: Vec<usize> = findings
                .iter()
                .filter(|f| {
                    f.fix.as_ref().is_some_and(|fix| fix.automatic)
                        && f.file.as_deref() == Some(file.path.as_str())
                })
                .filter_map(|f| f.line)
                .collect();
            if doomed.is_empty() {
                continue;
            }
            let kept: Vec<&str> = file
                .content
                .lines()
                .enumerate()
                .filter(|(idx, _)| !doomed.contains(&(idx + 1)))
                .map(|(_, line)| line)
                .collect();
            fixed = fixed.with_file(&file.path, format!("{}\n", kept.join("\n")));
            changed = true;
        }

        changed.then_some(fixed)
    }
}

/// Loose equality check that tolerates `===`/`!==` on the same line.
fn has_loose_equality(line: &str) -> bool {
    let stripped = line.replace("===", "").replace("!==", "");
    let bytes = stripped.as_bytes();
    for (idx, window) in bytes.windows(2).enumerate() {
        if window == b"==" || window == b"!=" {
            // Skip >= <= and arrow-adjacent noise by requiring no '=' after.
            let next = bytes.get(idx + 2);
            let prev = if idx == 0 { None } else { bytes.get(idx - 1) };
            if next != Some(&b'=') && prev != Some(&b'=') && prev != Some(&b'<') && prev != Some(&b'>') {
                return true;
            }
        }
    }
    false
}
