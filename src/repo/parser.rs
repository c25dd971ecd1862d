//! Test output parsing into canonical results.
//!
//! Runner output arrives either as a JSON report (jest/vitest/mocha) or as
//! free text. Parsing failure is data, not an error: the result is tagged
//! `parsing_successful = false` and scored accordingly, so downstream
//! consumers always receive a [`TestResult`].

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::framework::TestFramework;

/// One failing test with its error message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TestFailure {
    pub name: String,
    pub message: String,
}

/// Canonical result of one test run, with reliability metadata.
///
/// Immutable once produced; consumers read, never patch it up.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    pub total: u32,
    pub passed: u32,
    pub failed: u32,
    pub skipped: u32,
    pub duration_ms: u64,
    pub failures: Vec<TestFailure>,
    /// True when a known framework produced this output.
    pub framework_detected: bool,
    /// True when the repository had no tests to run at all.
    pub no_tests_found: bool,
    /// False when the runner timed out, failed to spawn, or crashed.
    pub execution_reliable: bool,
    /// False when the raw output could not be interpreted.
    pub parsing_successful: bool,
    /// 0-100 aggregate of how trustworthy this result is.
    pub validation_score: u8,
}

impl TestResult {
    /// A zero result for repositories without any test setup.
    pub fn no_tests(duration_ms: u64) -> Self {
        let mut result = Self {
            total: 0,
            passed: 0,
            failed: 0,
            skipped: 0,
            duration_ms,
            failures: Vec::new(),
            framework_detected: false,
            no_tests_found: true,
            execution_reliable: true,
            parsing_successful: true,
            validation_score: 0,
        };
        result.validation_score = result.compute_validation_score();
        result
    }

    pub fn pass_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            f64::from(self.passed) / f64::from(self.total)
        }
    }

    pub fn failure_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            f64::from(self.failed) / f64::from(self.total)
        }
    }

    pub fn all_passed(&self) -> bool {
        self.total > 0 && self.failed == 0
    }

    /// Reliability score: starts at 100, deducts for every weakness in how
    /// this result was obtained. Always within 0-100.
    fn compute_validation_score(&self) -> u8 {
        let mut score: i32 = 100;
        if !self.execution_reliable {
            score -= 40;
        }
        if !self.parsing_successful {
            score -= 30;
        }
        if self.no_tests_found {
            score -= 20;
        }
        if !self.framework_detected {
            score -= 10;
        }
        score.clamp(0, 100) as u8
    }
}

/// Parses raw runner output into a [`TestResult`].
///
/// `execution_reliable` is the executor's verdict (false on timeout/crash);
/// the parser records it and folds it into the validation score.
pub fn parse_test_output(
    raw: &str,
    framework: TestFramework,
    execution_reliable: bool,
    duration_ms: u64,
) -> TestResult {
    let framework_detected = framework != TestFramework::Unknown;

    let parsed = match framework {
        TestFramework::Jest | TestFramework::Vitest => parse_jest_json(raw),
        TestFramework::Mocha => parse_mocha_json(raw),
        TestFramework::Ava | TestFramework::Tap => parse_tap(raw),
        TestFramework::Unknown => None,
    }
    .or_else(|| parse_free_text(raw));

    let (counts, failures, parsing_successful) = match parsed {
        Some((counts, failures)) => (counts, failures, true),
        None => (Counts::default(), Vec::new(), false),
    };

    let mut result = TestResult {
        total: counts.total,
        passed: counts.passed,
        failed: counts.failed,
        skipped: counts.skipped,
        duration_ms,
        failures,
        framework_detected,
        no_tests_found: parsing_successful && counts.total == 0,
        execution_reliable,
        parsing_successful,
        validation_score: 0,
    };
    result.validation_score = result.compute_validation_score();
    result
}

#[derive(Debug, Default, Clone, Copy)]
struct Counts {
    total: u32,
    passed: u32,
    failed: u32,
    skipped: u32,
}

/// Extracts the first JSON object embedded in mixed output. Runners often
/// interleave the report with npm banner lines.
fn extract_json(raw: &str) -> Option<serde_json::Value> {
    let start = raw.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, ch) in raw[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    let candidate = &raw[start..=start + offset];
                    return serde_json::from_str(candidate).ok();
                }
            }
            _ => {}
        }
    }
    None
}

/// Jest-style report (`numTotalTests`, `testResults[].assertionResults`).
/// Vitest's JSON reporter emits the same shape.
fn parse_jest_json(raw: &str) -> Option<(Counts, Vec<TestFailure>)> {
    let report = extract_json(raw)?;
    let total = report.get("numTotalTests")?.as_u64()? as u32;
    let passed = report.get("numPassedTests").and_then(|v| v.as_u64()).unwrap_or(0) as u32;
    let failed = report.get("numFailedTests").and_then(|v| v.as_u64()).unwrap_or(0) as u32;
    let skipped = report.get("numPendingTests").and_then(|v| v.as_u64()).unwrap_or(0) as u32;

    let mut failures = Vec::new();
    if let Some(suites) = report.get("testResults").and_then(|v| v.as_array()) {
        for suite in suites {
            let Some(assertions) = suite.get("assertionResults").and_then(|v| v.as_array()) else {
                continue;
            };
            for assertion in assertions {
                if assertion.get("status").and_then(|s| s.as_str()) != Some("failed") {
                    continue;
                }
                let name = assertion
                    .get("fullName")
                    .or_else(|| assertion.get("title"))
                    .and_then(|v| v.as_str())
                    .unwrap_or("unnamed test")
                    .to_string();
                let message = assertion
                    .get("failureMessages")
                    .and_then(|v| v.as_array())
                    .and_then(|msgs| msgs.first())
                    .and_then(|m| m.as_str())
                    .unwrap_or("")
                    .to_string();
                failures.push(TestFailure { name, message });
            }
        }
    }

    Some((
        Counts {
            total,
            passed,
            failed,
            skipped,
        },
        failures,
    ))
}

/// Mocha JSON reporter (`stats` block plus `failures` list).
fn parse_mocha_json(raw: &str) -> Option<(Counts, Vec<TestFailure>)> {
    let report = extract_json(raw)?;
    let stats = report.get("stats")?;
    let total = stats.get("tests")?.as_u64()? as u32;
    let passed = stats.get("passes").and_then(|v| v.as_u64()).unwrap_or(0) as u32;
    let failed = stats.get("failures").and_then(|v| v.as_u64()).unwrap_or(0) as u32;
    let skipped = stats.get("pending").and_then(|v| v.as_u64()).unwrap_or(0) as u32;

    let mut failures = Vec::new();
    if let Some(list) = report.get("failures").and_then(|v| v.as_array()) {
        for item in list {
            let name = item
                .get("fullTitle")
                .or_else(|| item.get("title"))
                .and_then(|v| v.as_str())
                .unwrap_or("unnamed test")
                .to_string();
            let message = item
                .get("err")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
                .unwrap_or("")
                .to_string();
            failures.push(TestFailure { name, message });
        }
    }

    Some((
        Counts {
            total,
            passed,
            failed,
            skipped,
        },
        failures,
    ))
}

/// TAP streams: `ok N - name` / `not ok N - name`, `# skip` directives.
fn parse_tap(raw: &str) -> Option<(Counts, Vec<TestFailure>)> {
    let mut counts = Counts::default();
    let mut failures = Vec::new();
    let mut saw_tap = false;

    for line in raw.lines() {
        let line = line.trim();
        if line.starts_with("TAP version") || line.starts_with("1..") {
            saw_tap = true;
            continue;
        }
        let (ok, rest) = if let Some(rest) = line.strip_prefix("not ok") {
            (false, rest)
        } else if let Some(rest) = line.strip_prefix("ok") {
            (true, rest)
        } else {
            continue;
        };
        // Require `ok <number>` so prose lines starting with "ok" don't count.
        let rest = rest.trim_start();
        if !rest.chars().next().is_some_and(|c| c.is_ascii_digit()) {
            continue;
        }
        saw_tap = true;
        counts.total += 1;
        let lowered = rest.to_lowercase();
        if lowered.contains("# skip") || lowered.contains("# todo") {
            counts.skipped += 1;
        } else if ok {
            counts.passed += 1;
        } else {
            counts.failed += 1;
            let name = rest
                .split_once('-')
                .map(|(_, name)| name.trim())
                .unwrap_or(rest)
                .to_string();
            failures.push(TestFailure {
                name,
                message: String::new(),
            });
        }
    }

    if saw_tap {
        Some((counts, failures))
    } else {
        None
    }
}

/// Last-resort text parsing for unrecognized runner output.
fn parse_free_text(raw: &str) -> Option<(Counts, Vec<TestFailure>)> {
    // Jest/vitest summary: "Tests: 1 failed, 2 skipped, 4 passed, 7 total"
    let summary =
        Regex::new(r"Tests:\s+(?:(\d+) failed, )?(?:(\d+) skipped, )?(?:(\d+) passed, )?(\d+) total")
            .expect("static regex");
    if let Some(caps) = summary.captures(raw) {
        let get = |idx: usize| {
            caps.get(idx)
                .and_then(|m| m.as_str().parse::<u32>().ok())
                .unwrap_or(0)
        };
        return Some((
            Counts {
                failed: get(1),
                skipped: get(2),
                passed: get(3),
                total: get(4),
            },
            Vec::new(),
        ));
    }

    // Mocha text: "12 passing (34ms)" / "3 failing" / "1 pending"
    let passing = Regex::new(r"(\d+) passing").expect("static regex");
    let failing = Regex::new(r"(\d+) failing").expect("static regex");
    let pending = Regex::new(r"(\d+) pending").expect("static regex");
    if let Some(caps) = passing.captures(raw) {
        let passed: u32 = caps[1].parse().unwrap_or(0);
        let failed: u32 = failing
            .captures(raw)
            .and_then(|c| c[1].parse().ok())
            .unwrap_or(0);
        let skipped: u32 = pending
            .captures(raw)
            .and_then(|c| c[1].parse().ok())
            .unwrap_or(0);
        return Some((
            Counts {
                total: passed + failed + skipped,
                passed,
                failed,
                skipped,
            },
            Vec::new(),
        ));
    }

    // "No tests found" style messages parse as an explicit zero result.
    let lowered = raw.to_lowercase();
    if lowered.contains("no tests found") || lowered.contains("no test files found") {
        return Some((Counts::default(), Vec::new()));
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_jest_json_report() {
        let raw = r#"{"numTotalTests": 5, "numPassedTests": 4, "numFailedTests": 1,
            "numPendingTests": 0, "testResults": [{"assertionResults": [
            {"status": "failed", "fullName": "adds numbers", "failureMessages": ["expected 2, got 3"]},
            {"status": "passed", "fullName": "subtracts"}]}]}"#;
        let result = parse_test_output(raw, TestFramework::Jest, true, 100);
        assert_eq!(result.total, 5);
        assert_eq!(result.passed, 4);
        assert_eq!(result.failed, 1);
        assert!(result.parsing_successful);
        assert!(!result.no_tests_found);
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].name, "adds numbers");
        assert!(result.failures[0].message.contains("expected 2"));
    }

    #[test]
    fn parses_jest_json_with_npm_banner_noise() {
        let raw = "\n> mypkg@1.0.0 test\n> jest --json\n\n{\"numTotalTests\": 2, \"numPassedTests\": 2, \"numFailedTests\": 0, \"numPendingTests\": 0, \"testResults\": []}";
        let result = parse_test_output(raw, TestFramework::Jest, true, 50);
        assert_eq!(result.total, 2);
        assert_eq!(result.passed, 2);
        assert!(result.parsing_successful);
    }

    #[test]
    fn parses_mocha_json_report() {
        let raw = r#"{"stats": {"tests": 3, "passes": 2, "failures": 1, "pending": 0},
            "failures": [{"fullTitle": "api returns 404", "err": {"message": "expected 404"}}]}"#;
        let result = parse_test_output(raw, TestFramework::Mocha, true, 80);
        assert_eq!(result.total, 3);
        assert_eq!(result.failed, 1);
        assert_eq!(result.failures[0].name, "api returns 404");
    }

    #[test]
    fn parses_tap_stream() {
        let raw = "TAP version 13\n1..4\nok 1 - first\nnot ok 2 - second\nok 3 - third # SKIP slow\nok 4 - fourth\n";
        let result = parse_test_output(raw, TestFramework::Tap, true, 30);
        assert_eq!(result.total, 4);
        assert_eq!(result.passed, 2);
        assert_eq!(result.failed, 1);
        assert_eq!(result.skipped, 1);
        assert_eq!(result.failures[0].name, "second");
    }

    #[test]
    fn falls_back_to_jest_text_summary() {
        let raw = "Tests: 1 failed, 4 passed, 5 total\nSnapshots: 0 total\n";
        let result = parse_test_output(raw, TestFramework::Unknown, true, 10);
        assert_eq!(result.total, 5);
        assert_eq!(result.passed, 4);
        assert_eq!(result.failed, 1);
        assert!(result.parsing_successful);
        assert!(!result.framework_detected);
    }

    #[test]
    fn falls_back_to_mocha_text_summary() {
        let raw = "  12 passing (340ms)\n  2 failing\n";
        let result = parse_test_output(raw, TestFramework::Unknown, true, 10);
        assert_eq!(result.total, 14);
        assert_eq!(result.passed, 12);
        assert_eq!(result.failed, 2);
    }

    #[test]
    fn unparseable_output_is_flagged_not_fatal() {
        let result = parse_test_output("segfault (core dumped)", TestFramework::Jest, true, 10);
        assert!(!result.parsing_successful);
        assert_eq!(result.total, 0);
        // Unparsed zero is not the same as an observed empty test suite.
        assert!(!result.no_tests_found);
        assert!(result.validation_score <= 70);
    }

    #[test]
    fn unreliable_execution_lowers_score() {
        let raw = r#"{"numTotalTests": 1, "numPassedTests": 1, "numFailedTests": 0, "numPendingTests": 0, "testResults": []}"#;
        let reliable = parse_test_output(raw, TestFramework::Jest, true, 10);
        let unreliable = parse_test_output(raw, TestFramework::Jest, false, 10);
        assert!(unreliable.validation_score < reliable.validation_score);
    }

    #[test]
    fn validation_score_bounds_hold_in_worst_case() {
        let result = parse_test_output("", TestFramework::Unknown, false, 0);
        assert!(result.validation_score <= 100);
        let no_tests = TestResult::no_tests(0);
        assert!(no_tests.no_tests_found);
        assert!(no_tests.validation_score <= 100);
    }

    #[test]
    fn rates_handle_zero_totals() {
        let result = TestResult::no_tests(0);
        assert_eq!(result.pass_rate(), 0.0);
        assert_eq!(result.failure_rate(), 0.0);
        assert!(!result.all_passed());
    }

    #[test]
    fn no_tests_found_message_parses_as_zero() {
        let result = parse_test_output(
            "No tests found, exiting with code 1",
            TestFramework::Jest,
            true,
            5,
        );
        assert!(result.parsing_successful);
        assert!(result.no_tests_found);
        assert_eq!(result.total, 0);
    }

    #[test]
    fn extract_json_handles_braces_in_strings() {
        let raw = r#"prefix {"a": "value with } brace", "b": 2} suffix"#;
        let value = extract_json(raw).unwrap();
        assert_eq!(value.get("b").and_then(|v| v.as_u64()), Some(2));
    }
}
