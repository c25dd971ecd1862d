//! Test framework detection for JavaScript/TypeScript repositories.
//!
//! Detection cascade, first hit wins:
//! 1. explicit dependency in `dependencies`/`devDependencies`
//! 2. substring of the `scripts.test` entry
//! 3. content heuristics over discovered test files
//! 4. `Unknown`

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;
use walkdir::WalkDir;

/// Maximum number of test files sampled for content heuristics.
const MAX_HEURISTIC_FILES: usize = 10;

/// Test frameworks the harness knows how to invoke and parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestFramework {
    Jest,
    Vitest,
    Mocha,
    Ava,
    Tap,
    Unknown,
}

impl std::fmt::Display for TestFramework {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Jest => write!(f, "jest"),
            Self::Vitest => write!(f, "vitest"),
            Self::Mocha => write!(f, "mocha"),
            Self::Ava => write!(f, "ava"),
            Self::Tap => write!(f, "tap"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

impl TestFramework {
    /// All frameworks the detector can identify, in dependency-priority order.
    pub fn known() -> [TestFramework; 5] {
        [Self::Jest, Self::Vitest, Self::Mocha, Self::Ava, Self::Tap]
    }

    /// Package name to look for in the dependency manifest.
    pub fn package_name(&self) -> &'static str {
        match self {
            Self::Jest => "jest",
            Self::Vitest => "vitest",
            Self::Mocha => "mocha",
            Self::Ava => "ava",
            Self::Tap => "tap",
            Self::Unknown => "",
        }
    }

    /// Whether the runner can emit a machine-readable JSON report.
    pub fn has_json_report(&self) -> bool {
        matches!(self, Self::Jest | Self::Vitest | Self::Mocha)
    }

    /// Direct runner invocation (via npx) with reliable output flags.
    ///
    /// Used when the manifest has no test script, or when a JSON report is
    /// preferred over the script's free-text output.
    pub fn runner_args(&self) -> Option<Vec<&'static str>> {
        match self {
            Self::Jest => Some(vec!["jest", "--json", "--silent", "--ci"]),
            Self::Vitest => Some(vec!["vitest", "run", "--reporter=json"]),
            Self::Mocha => Some(vec!["mocha", "--reporter", "json"]),
            Self::Ava => Some(vec!["ava", "--tap"]),
            Self::Tap => Some(vec!["tap", "--reporter=tap"]),
            Self::Unknown => None,
        }
    }
}

/// Detects the test framework used by the repository at `repo_path`.
///
/// Returns `Unknown` rather than erroring: a repository without a
/// recognizable framework is a legitimate evaluation outcome, not a fault.
pub fn detect_framework(repo_path: &Path) -> TestFramework {
    let manifest = repo_path.join("package.json");
    if let Ok(content) = fs::read_to_string(&manifest) {
        if let Ok(pkg) = serde_json::from_str::<serde_json::Value>(&content) {
            if let Some(framework) = detect_from_dependencies(&pkg) {
                debug!(%framework, "Framework detected from manifest dependencies");
                return framework;
            }
            if let Some(framework) = detect_from_test_script(&pkg) {
                debug!(%framework, "Framework detected from test script");
                return framework;
            }
        }
    }

    if let Some(framework) = detect_from_test_files(repo_path) {
        debug!(%framework, "Framework detected from test file contents");
        return framework;
    }

    TestFramework::Unknown
}

fn detect_from_dependencies(pkg: &serde_json::Value) -> Option<TestFramework> {
    for section in ["devDependencies", "dependencies"] {
        if let Some(deps) = pkg.get(section).and_then(|v| v.as_object()) {
            for framework in TestFramework::known() {
                if deps.contains_key(framework.package_name()) {
                    return Some(framework);
                }
            }
        }
    }
    None
}

fn detect_from_test_script(pkg: &serde_json::Value) -> Option<TestFramework> {
    let script = pkg
        .get("scripts")
        .and_then(|s| s.get("test"))
        .and_then(|t| t.as_str())?;
    TestFramework::known()
        .into_iter()
        .find(|framework| script.contains(framework.package_name()))
}

fn detect_from_test_files(repo_path: &Path) -> Option<TestFramework> {
    let mut sampled = 0usize;
    for entry in WalkDir::new(repo_path)
        .max_depth(5)
        .into_iter()
        .filter_entry(|e| {
            let name = e.file_name().to_string_lossy();
            name != "node_modules" && name != ".git"
        })
        .filter_map(Result::ok)
    {
        if sampled >= MAX_HEURISTIC_FILES {
            break;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        if !is_test_file(&name) {
            continue;
        }
        sampled += 1;
        let Ok(content) = fs::read_to_string(entry.path()) else {
            continue;
        };
        if let Some(framework) = classify_test_content(&content) {
            return Some(framework);
        }
    }
    None
}

/// Matches the conventional `*.test.*` / `*.spec.*` naming.
pub fn is_test_file(name: &str) -> bool {
    const SUFFIXES: [&str; 8] = [
        ".test.js", ".test.ts", ".test.jsx", ".test.tsx", ".spec.js", ".spec.ts", ".spec.jsx",
        ".spec.tsx",
    ];
    SUFFIXES.iter().any(|suffix| name.ends_with(suffix))
}

/// Best-effort classification of a test file body by assertion style.
fn classify_test_content(content: &str) -> Option<TestFramework> {
    // Explicit imports beat structural hints.
    if content.contains("from 'vitest'") || content.contains("from \"vitest\"") {
        return Some(TestFramework::Vitest);
    }
    if content.contains("require('tap')") || content.contains("from 'tap'") {
        return Some(TestFramework::Tap);
    }
    if content.contains("require('ava')") || content.contains("from 'ava'") {
        return Some(TestFramework::Ava);
    }
    if content.contains("@jest/globals") {
        return Some(TestFramework::Jest);
    }

    let has_bdd = content.contains("describe(") && content.contains("it(");
    let has_expect = content.contains("expect(");
    let has_assert = content.contains("assert.") || content.contains("chai");

    if has_bdd && has_assert {
        return Some(TestFramework::Mocha);
    }
    if has_expect && (has_bdd || content.contains("test(")) {
        // Bare describe/it/test + expect is the jest default style.
        return Some(TestFramework::Jest);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_manifest(dir: &Path, body: &str) {
        fs::write(dir.join("package.json"), body).unwrap();
    }

    #[test]
    fn detects_jest_from_dev_dependencies() {
        let tmp = TempDir::new().unwrap();
        write_manifest(
            tmp.path(),
            r#"{"devDependencies": {"jest": "^29.0.0", "typescript": "^5.0.0"}}"#,
        );
        assert_eq!(detect_framework(tmp.path()), TestFramework::Jest);
    }

    #[test]
    fn detects_vitest_from_dependencies() {
        let tmp = TempDir::new().unwrap();
        write_manifest(tmp.path(), r#"{"dependencies": {"vitest": "^1.0.0"}}"#);
        assert_eq!(detect_framework(tmp.path()), TestFramework::Vitest);
    }

    #[test]
    fn dependency_beats_test_script() {
        let tmp = TempDir::new().unwrap();
        write_manifest(
            tmp.path(),
            r#"{"devDependencies": {"mocha": "^10.0.0"}, "scripts": {"test": "jest"}}"#,
        );
        assert_eq!(detect_framework(tmp.path()), TestFramework::Mocha);
    }

    #[test]
    fn detects_from_test_script_substring() {
        let tmp = TempDir::new().unwrap();
        write_manifest(
            tmp.path(),
            r#"{"scripts": {"test": "mocha --recursive test/"}}"#,
        );
        assert_eq!(detect_framework(tmp.path()), TestFramework::Mocha);
    }

    #[test]
    fn detects_mocha_from_file_content() {
        let tmp = TempDir::new().unwrap();
        fs::write(
            tmp.path().join("math.spec.js"),
            "const assert = require('assert');\ndescribe('add', () => { it('works', () => { assert.equal(1+1, 2); }); });",
        )
        .unwrap();
        assert_eq!(detect_framework(tmp.path()), TestFramework::Mocha);
    }

    #[test]
    fn detects_jest_style_from_file_content() {
        let tmp = TempDir::new().unwrap();
        fs::write(
            tmp.path().join("math.test.ts"),
            "test('adds', () => { expect(1 + 1).toBe(2); });",
        )
        .unwrap();
        assert_eq!(detect_framework(tmp.path()), TestFramework::Jest);
    }

    #[test]
    fn empty_repo_is_unknown() {
        let tmp = TempDir::new().unwrap();
        assert_eq!(detect_framework(tmp.path()), TestFramework::Unknown);
    }

    #[test]
    fn node_modules_is_not_scanned() {
        let tmp = TempDir::new().unwrap();
        let nm = tmp.path().join("node_modules").join("leftpad");
        fs::create_dir_all(&nm).unwrap();
        fs::write(
            nm.join("index.test.js"),
            "test('x', () => { expect(1).toBe(1); });",
        )
        .unwrap();
        assert_eq!(detect_framework(tmp.path()), TestFramework::Unknown);
    }

    #[test]
    fn test_file_naming() {
        assert!(is_test_file("foo.test.ts"));
        assert!(is_test_file("foo.spec.jsx"));
        assert!(!is_test_file("foo.ts"));
        assert!(!is_test_file("testfoo.js"));
    }

    #[test]
    fn framework_display_names() {
        assert_eq!(TestFramework::Jest.to_string(), "jest");
        assert_eq!(TestFramework::Unknown.to_string(), "unknown");
    }

    #[test]
    fn runner_args_exist_for_known_frameworks() {
        for framework in TestFramework::known() {
            assert!(framework.runner_args().is_some());
        }
        assert!(TestFramework::Unknown.runner_args().is_none());
    }
}
