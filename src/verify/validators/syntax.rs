//! Syntactic sanity scan: bracket balance and unterminated literals.
//!
//! Not a real parser — a linear scan that tracks string/comment/regex state
//! and bracket depth. It catches the truncated-file and mangled-patch cases
//! a patch pipeline actually produces, which is what a gating stage needs.

use std::time::Instant;

use async_trait::async_trait;

use crate::verify::types::{
    CodeSnapshot, Severity, ValidationContext, VerificationFinding, VerificationStageResult,
};

use super::{score_from_findings, stage_result, Validator};

pub struct SyntaxValidator;

impl SyntaxValidator {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SyntaxValidator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Validator for SyntaxValidator {
    fn name(&self) -> &'static str {
        "syntax"
    }

    async fn validate(
        &self,
        snapshot: &CodeSnapshot,
        _ctx: &ValidationContext,
    ) -> VerificationStageResult {
        let start = Instant::now();
        let mut findings = Vec::new();

        for file in snapshot.code_files() {
            findings.extend(scan_file(&file.path, &file.content));
        }

        let score = score_from_findings(&findings);
        stage_result("syntax", findings, score, start)
    }
}

/// True when a `/` after `last_significant` starts a regex literal rather
/// than a division.
fn regex_position(last_significant: Option<char>) -> bool {
    match last_significant {
        None => true,
        Some(ch) => "=([{,;:!&|?+-*%<>~".contains(ch),
    }
}

fn scan_file(path: &str, content: &str) -> Vec<VerificationFinding> {
    let mut findings = Vec::new();
    let mut stack: Vec<(char, usize)> = Vec::new();
    let mut line = 1usize;
    let mut last_significant: Option<char> = None;
    let mut chars = content.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '\n' {
            line += 1;
            continue;
        }
        match ch {
            '/' => match chars.peek() {
                Some('/') => {
                    // Line comment: consume to end of line.
                    for skipped in chars.by_ref() {
                        if skipped == '\n' {
                            line += 1;
                            break;
                        }
                    }
                }
                Some('*') => {
                    chars.next();
                    let mut closed = false;
                    let mut prev = '\0';
                    for skipped in chars.by_ref() {
                        if skipped == '\n' {
                            line += 1;
                        } else if skipped == '/' && prev == '*' {
                            closed = true;
                            break;
                        }
                        prev = skipped;
                    }
                    if !closed {
                        findings.push(
                            VerificationFinding::error(
                                Severity::High,
                                "unterminated block comment",
                            )
                            .in_file(path),
                        );
                    }
                }
                _ if regex_position(last_significant) => {
                    // Regex literal: skip to the closing slash, honoring
                    // escapes and character classes. Regexes never span lines.
                    let mut in_class = false;
                    loop {
                        match chars.next() {
                            None => break,
                            Some('\\') => {
                                chars.next();
                            }
                            Some('\n') => {
                                line += 1;
                                break;
                            }
                            Some('[') => in_class = true,
                            Some(']') => in_class = false,
                            Some('/') if !in_class => break,
                            Some(_) => {}
                        }
                    }
                    last_significant = Some('/');
                }
                _ => last_significant = Some('/'),
            },
            '\'' | '"' => {
                let quote = ch;
                let mut terminated = false;
                loop {
                    match chars.next() {
                        None => break,
                        Some('\\') => {
                            chars.next();
                        }
                        Some('\n') => {
                            line += 1;
                            break;
                        }
                        Some(c) if c == quote => {
                            terminated = true;
                            break;
                        }
                        Some(_) => {}
                    }
                }
                if !terminated {
                    findings.push(
                        VerificationFinding::error(
                            Severity::Critical,
                            "unterminated string literal",
                        )
                        .at(path, line.saturating_sub(1).max(1)),
                    );
                }
                last_significant = Some(quote);
            }
            '`' => {
                // Template literals may span lines; require a closing tick
                // somewhere before EOF.
                let mut terminated = false;
                loop {
                    match chars.next() {
                        None => break,
                        Some('\\') => {
                            chars.next();
                        }
                        Some('\n') => line += 1,
                        Some('`') => {
                            terminated = true;
                            break;
                        }
                        Some(_) => {}
                    }
                }
                if !terminated {
                    findings.push(
                        VerificationFinding::error(
                            Severity::Critical,
                            "unterminated template literal",
                        )
                        .in_file(path),
                    );
                }
                last_significant = Some('`');
            }
            '(' | '[' | '{' => {
                stack.push((ch, line));
                last_significant = Some(ch);
            }
            ')' | ']' | '}' => {
                let expected = match ch {
                    ')' => '(',
                    ']' => '[',
                    _ => '{',
                };
                match stack.pop() {
                    Some((open, _)) if open == expected => {}
                    Some((open, open_line)) => findings.push(
                        VerificationFinding::error(
                            Severity::Critical,
                            format!(
                                "mismatched bracket: '{}' opened at line {} closed by '{}'",
                                open, open_line, ch
                            ),
                        )
                        .at(path, line),
                    ),
                    None => findings.push(
                        VerificationFinding::error(
                            Severity::Critical,
                            format!("unmatched closing '{}'", ch),
                        )
                        .at(path, line),
                    ),
                }
                last_significant = Some(ch);
            }
            _ => {
                if !ch.is_whitespace() {
                    last_significant = Some(ch);
                }
            }
        }
    }

    for (open, open_line) in stack {
        findings.push(
            VerificationFinding::error(
                Severity::Critical,
                format!("unclosed '{}' opened at line {}", open, open_line),
            )
            .at(path, open_line),
        );
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

    async fn run(content: &str) -> VerificationStageResult {
        SyntaxValidator::new()
            .validate(
                &snapshot_of("src/app.js", content),
                &ValidationContext::default(),
            )
            .await
    }

    #[tokio::test]
    async fn clean_file_passes_with_full_score() {
        let result = run("function add(a, b) {\n  return a + b;\n}\n").await;
        assert!(result.passed);
        assert_eq!(result.score, 100.0);
        assert!(result.findings.is_empty());
    }

    #[tokio::test]
    async fn unclosed_brace_is_critical() {
        let result = run("function broken() {\n  if (x) {\n    return 1;\n  }\n").await;
        assert!(!result.passed);
        assert!(result.findings.iter().any(|f| f.is_critical()));
        assert!(result.score < 100.0);
    }

    #[tokio::test]
    async fn mismatched_bracket_reports_open_line() {
        let result = run("const a = [1, 2};\n").await;
        assert!(!result.passed);
        assert!(result.findings[0].message.contains("mismatched"));
        assert_eq!(result.findings[0].line, Some(1));
    }

    #[tokio::test]
    async fn brackets_inside_strings_are_ignored() {
        let result = run("const s = \"not a { real ( bracket\";\nconst t = 'also ] fine';\n").await;
        assert!(result.passed);
    }

    #[tokio::test]
    async fn brackets_inside_comments_are_ignored() {
        let result = run("// opening { here\n/* and ( here */\nconst x = 1;\n").await;
        assert!(result.passed);
    }

    #[tokio::test]
    async fn brackets_inside_regex_literals_are_ignored() {
        let result = run("const re = /[({]/g;\nconst cleaned = s.replace(/[)}]/g, '');\n").await;
        assert!(result.passed, "findings: {:?}", result.findings);
    }

    #[tokio::test]
    async fn division_is_not_a_regex() {
        let result = run("const half = total / 2;\nconst ratio = (a + b) / c;\n").await;
        assert!(result.passed);
    }

    #[tokio::test]
    async fn unterminated_string_is_flagged() {
        let result = run("const s = \"never closed\nconst x = 1;\n").await;
        assert!(!result.passed);
        assert!(result
            .findings
            .iter()
            .any(|f| f.message.contains("unterminated string")));
    }

    #[tokio::test]
    async fn template_literals_may_span_lines() {
        let result = run("const s = `line one\nline two\nline three`;\n").await;
        assert!(result.passed);
    }

    #[tokio::test]
    async fn escaped_quotes_do_not_terminate() {
        let result = run("const s = 'it\\'s fine';\n").await;
        assert!(result.passed);
    }

    #[tokio::test]
    async fn test_files_are_not_scanned() {
        let snapshot = snapshot_of("src/app.test.js", "function broken() {\n");
        let result = SyntaxValidator::new()
            .validate(&snapshot, &ValidationContext::default())
            .await;
        assert!(result.passed);
    }
}
