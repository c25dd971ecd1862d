//! Checkout lifecycle management.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::RepositoryError;
use crate::exec::{normalized_env, run_command, run_git, CommandOutput, KILLED_EXIT_CODE};

use super::framework::{detect_framework, is_test_file, TestFramework};
use super::parser::{parse_test_output, TestResult};
use super::{validate_git_ref, validate_repo_url};

/// Configuration for repository operations.
#[derive(Debug, Clone)]
pub struct RepoConfig {
    /// Root under which per-evaluation checkouts are created.
    pub workdir_root: PathBuf,
    /// Depth used for the initial shallow clone.
    pub clone_depth: u32,
    pub clone_timeout: Duration,
    pub install_timeout: Duration,
    pub test_timeout: Duration,
    pub build_timeout: Duration,
}

impl Default for RepoConfig {
    fn default() -> Self {
        Self {
            workdir_root: std::env::temp_dir().join("swe-verify"),
            clone_depth: 50,
            clone_timeout: Duration::from_secs(600),
            install_timeout: Duration::from_secs(120),
            test_timeout: Duration::from_secs(300),
            build_timeout: Duration::from_secs(300),
        }
    }
}

impl RepoConfig {
    pub fn with_workdir_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.workdir_root = root.into();
        self
    }

    pub fn with_test_timeout(mut self, timeout: Duration) -> Self {
        self.test_timeout = timeout;
        self
    }

    pub fn with_install_timeout(mut self, timeout: Duration) -> Self {
        self.install_timeout = timeout;
        self
    }
}

/// Owns the full lifecycle of working checkouts.
///
/// The clone registry is scoped to this manager instance and keyed by
/// isolation key, so re-cloning within one evaluation is cached while
/// parallel evaluations of the same instance stay fully isolated.
pub struct RepositoryManager {
    config: RepoConfig,
    checkouts: Mutex<HashMap<String, PathBuf>>,
}

impl RepositoryManager {
    pub fn new(config: RepoConfig) -> Self {
        Self {
            config,
            checkouts: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &RepoConfig {
        &self.config
    }

    /// Clones `repo_url` at `base_commit` into a directory derived from the
    /// isolation key. Idempotent per key: a second call returns the cached
    /// path without touching the filesystem.
    ///
    /// A commit missing from the shallow history triggers exactly one full
    /// ref fetch before the clone is declared failed.
    pub async fn clone_at(
        &self,
        repo_url: &str,
        base_commit: &str,
        isolation_key: &str,
    ) -> Result<PathBuf, RepositoryError> {
        validate_repo_url(repo_url)?;
        if !base_commit.is_empty() {
            validate_git_ref(base_commit)?;
        }

        {
            let checkouts = self.checkouts.lock().await;
            if let Some(path) = checkouts.get(isolation_key) {
                debug!(isolation_key, "Reusing cached checkout");
                return Ok(path.clone());
            }
        }

        let dest = self.config.workdir_root.join(isolation_key);
        std::fs::create_dir_all(&self.config.workdir_root)?;

        info!(url = repo_url, commit = base_commit, "Cloning repository");
        let depth = self.config.clone_depth.to_string();
        let dest_str = dest.to_string_lossy().to_string();
        let output = run_git(
            &["clone", "--depth", depth.as_str(), repo_url, dest_str.as_str()],
            &self.config.workdir_root,
            self.config.clone_timeout,
        )
        .await;
        if !output.success() {
            self.cleanup(&dest).await;
            return Err(RepositoryError::CloneFailed {
                url: repo_url.to_string(),
                reason: truncate(&output.combined(), 500),
            });
        }
        // Explicit post-condition, not a success fallback: a zero exit with
        // no .git directory means git misbehaved and the clone is unusable.
        if !dest.join(".git").exists() {
            self.cleanup(&dest).await;
            return Err(RepositoryError::CloneFailed {
                url: repo_url.to_string(),
                reason: "clone reported success but no .git directory exists".to_string(),
            });
        }

        if !base_commit.is_empty() {
            if let Err(e) = self.checkout_commit(&dest, repo_url, base_commit).await {
                // Not yet registered under the key; remove the dead clone
                // here or it leaks.
                self.cleanup(&dest).await;
                return Err(e);
            }
        }

        let mut checkouts = self.checkouts.lock().await;
        checkouts.insert(isolation_key.to_string(), dest.clone());
        Ok(dest)
    }

    /// Checks out `commit`, fetching full history once if the shallow clone
    /// is missing it.
    async fn checkout_commit(
        &self,
        path: &Path,
        repo_url: &str,
        commit: &str,
    ) -> Result<(), RepositoryError> {
        let first = run_git(
            &["checkout", commit, "--force"],
            path,
            self.config.clone_timeout,
        )
        .await;
        if first.success() {
            return Ok(());
        }

        info!(commit, "Commit missing from shallow history, fetching all refs");
        let fetch = run_git(
            &["fetch", "--unshallow", "--tags", "origin"],
            path,
            self.config.clone_timeout,
        )
        .await;
        if !fetch.success() {
            // Already-complete repositories reject --unshallow; retry plain.
            let _ = run_git(
                &["fetch", "--tags", "origin"],
                path,
                self.config.clone_timeout,
            )
            .await;
        }

        let commit_spec = format!("{commit}^{{commit}}");
        let exists = run_git(
            &["cat-file", "-e", commit_spec.as_str()],
            path,
            Duration::from_secs(30),
        )
        .await;
        if !exists.success() {
            return Err(RepositoryError::CommitNotFound {
                url: repo_url.to_string(),
                commit: commit.to_string(),
            });
        }

        let second = run_git(
            &["checkout", commit, "--force"],
            path,
            self.config.clone_timeout,
        )
        .await;
        if second.success() {
            Ok(())
        } else {
            Err(RepositoryError::CheckoutFailed {
                commit: commit.to_string(),
                reason: truncate(&second.combined(), 500),
            })
        }
    }

    /// Applies a unified diff to the checkout.
    ///
    /// Strict `git apply` first, then a looser `patch -p1` fallback. Returns
    /// false on failure rather than erroring: "patch did not apply" is an
    /// evaluation outcome the caller records, not a crash.
    pub async fn apply_patch(&self, path: &Path, diff_text: &str) -> bool {
        let Some(patch_file) = write_patch_file(diff_text) else {
            return false;
        };
        let patch_path = patch_file.path().to_string_lossy().to_string();

        let strict = run_git(
            &[
                "apply",
                "--ignore-whitespace",
                "--ignore-space-change",
                patch_path.as_str(),
            ],
            path,
            Duration::from_secs(60),
        )
        .await;
        if strict.success() {
            return true;
        }
        debug!(
            stderr = %truncate(&strict.stderr, 300),
            "git apply failed, trying patch fallback"
        );

        let fallback = run_command(
            "patch",
            &[
                "-p1",
                "--ignore-whitespace",
                "--no-backup-if-mismatch",
                "-i",
                patch_path.as_str(),
            ],
            path,
            &HashMap::new(),
            Duration::from_secs(60),
        )
        .await;
        if !fallback.success() {
            warn!(
                stderr = %truncate(&fallback.combined(), 300),
                "Patch failed to apply with both git apply and patch"
            );
        }
        fallback.success()
    }

    /// Reverses a previously applied diff (`git apply -R`). Returns false
    /// on failure, mirroring [`Self::apply_patch`].
    pub async fn revert_patch(&self, path: &Path, diff_text: &str) -> bool {
        let Some(patch_file) = write_patch_file(diff_text) else {
            return false;
        };
        let patch_path = patch_file.path().to_string_lossy().to_string();
        let output = run_git(
            &["apply", "-R", "--ignore-whitespace", patch_path.as_str()],
            path,
            Duration::from_secs(60),
        )
        .await;
        output.success()
    }

    /// Detects the repository's test framework.
    pub fn detect_framework(&self, path: &Path) -> TestFramework {
        detect_framework(path)
    }

    /// Best-effort dependency install. Failure is logged and ignored: many
    /// repositories have partially broken install scripts yet runnable tests.
    pub async fn install_dependencies(&self, path: &Path) {
        if !path.join("package.json").exists() {
            return;
        }
        info!("Installing dependencies");
        let output = run_command(
            "npm",
            &["install", "--no-audit", "--no-fund", "--loglevel=error"],
            path,
            &normalized_env(),
            self.config.install_timeout,
        )
        .await;
        if !output.success() {
            warn!(
                exit_code = output.exit_code,
                timed_out = output.timed_out,
                "Dependency install failed (continuing): {}",
                truncate(&output.combined(), 300)
            );
        }
    }

    /// Runs the repository's tests and parses the output.
    ///
    /// `test_patch` (typically the instance's test-setup diff) is applied
    /// first when present; its failure is non-fatal. A repository with no
    /// manifest and no test files yields a zero result with
    /// `no_tests_found = true`.
    pub async fn run_tests(&self, path: &Path, test_patch: Option<&str>) -> TestResult {
        if let Some(diff) = test_patch {
            if !self.apply_patch(path, diff).await {
                warn!("Test patch failed to apply (continuing without it)");
            }
        }

        let has_manifest = path.join("package.json").exists();
        if !has_manifest && !has_any_test_file(path) {
            info!("No package.json and no test files; reporting empty test run");
            return TestResult::no_tests(0);
        }

        self.install_dependencies(path).await;

        let framework = detect_framework(path);
        let output = self.run_test_command(path, framework).await;
        let reliable = !output.timed_out && output.exit_code != KILLED_EXIT_CODE;
        let result = parse_test_output(
            &output.combined(),
            framework,
            reliable,
            output.duration.as_millis() as u64,
        );
        info!(
            %framework,
            total = result.total,
            passed = result.passed,
            failed = result.failed,
            reliable = result.execution_reliable,
            parsed = result.parsing_successful,
            "Test run finished"
        );
        result
    }

    async fn run_test_command(&self, path: &Path, framework: TestFramework) -> CommandOutput {
        // A known framework is invoked directly for machine-readable output;
        // otherwise fall back to the manifest's test script.
        if let Some(runner_args) = framework.runner_args() {
            let mut args = vec!["--yes"];
            args.extend(runner_args);
            return run_command(
                "npx",
                &args,
                path,
                &normalized_env(),
                self.config.test_timeout,
            )
            .await;
        }

        if has_script(path, "test") {
            return run_command(
                "npm",
                &["test", "--silent"],
                path,
                &normalized_env(),
                self.config.test_timeout,
            )
            .await;
        }

        CommandOutput {
            exit_code: 0,
            stdout: "No tests found".to_string(),
            stderr: String::new(),
            duration: Duration::ZERO,
            timed_out: false,
        }
    }

    /// Runs the build script (when present) and a type-check (when a
    /// tsconfig exists). Absence of build tooling counts as success.
    pub async fn check_build(&self, path: &Path) -> bool {
        if has_script(path, "build") {
            let output = run_command(
                "npm",
                &["run", "build", "--silent"],
                path,
                &normalized_env(),
                self.config.build_timeout,
            )
            .await;
            if !output.success() {
                info!(
                    exit_code = output.exit_code,
                    "Build script failed: {}",
                    truncate(&output.combined(), 300)
                );
                return false;
            }
        }

        if path.join("tsconfig.json").exists() {
            let output = run_command(
                "npx",
                &["--yes", "tsc", "--noEmit"],
                path,
                &normalized_env(),
                self.config.build_timeout,
            )
            .await;
            if !output.success() {
                info!(
                    exit_code = output.exit_code,
                    "Type check failed: {}",
                    truncate(&output.combined(), 300)
                );
                return false;
            }
        }

        true
    }

    /// Captures the working tree's changes (including untracked files) as a
    /// unified diff. Stages everything, reads `diff --cached`, unstages.
    ///
    /// The stage/read/reset sequence assumes exclusive ownership of the
    /// checkout; the engine never lets two tasks touch one path.
    pub async fn diff(&self, path: &Path) -> Result<String, RepositoryError> {
        let add = run_git(&["add", "-A"], path, Duration::from_secs(60)).await;
        if !add.success() {
            return Err(RepositoryError::GitFailed(format!(
                "git add -A: {}",
                truncate(&add.combined(), 300)
            )));
        }

        let diff = run_git(&["diff", "--cached"], path, Duration::from_secs(60)).await;
        let reset = run_git(&["reset"], path, Duration::from_secs(60)).await;
        if !reset.success() {
            warn!(
                "git reset after diff capture failed: {}",
                truncate(&reset.combined(), 200)
            );
        }
        if !diff.success() {
            return Err(RepositoryError::GitFailed(format!(
                "git diff --cached: {}",
                truncate(&diff.combined(), 300)
            )));
        }
        Ok(diff.stdout)
    }

    /// Removes a checkout. Idempotent and best-effort: a missing path is a
    /// no-op, a permission failure triggers one chmod-and-retry pass, and a
    /// final failure is logged rather than propagated so a leaked directory
    /// can never abort the evaluation pipeline.
    pub async fn cleanup(&self, path: &Path) {
        if !path.exists() {
            return;
        }
        if let Err(first) = std::fs::remove_dir_all(path) {
            debug!(error = %first, "Initial removal failed, fixing permissions");
            make_writable(path);
            if let Err(second) = std::fs::remove_dir_all(path) {
                warn!(
                    path = %path.display(),
                    error = %second,
                    "Failed to remove checkout, leaking directory"
                );
            }
        }
    }

    /// Drops the registry entry for `isolation_key` and removes its checkout.
    pub async fn release(&self, isolation_key: &str) {
        let path = {
            let mut checkouts = self.checkouts.lock().await;
            checkouts.remove(isolation_key)
        };
        if let Some(path) = path {
            self.cleanup(&path).await;
        }
    }

    /// Number of live checkouts (test hook).
    pub async fn active_checkouts(&self) -> usize {
        self.checkouts.lock().await.len()
    }
}

/// Writes a diff to a temp file for path-based application. Returns `None`
/// for empty diffs or temp-file failures; the caller reports "did not
/// apply" either way.
fn write_patch_file(diff_text: &str) -> Option<tempfile::NamedTempFile> {
    if diff_text.trim().is_empty() {
        return None;
    }
    let mut patch_file = match tempfile::NamedTempFile::new() {
        Ok(file) => file,
        Err(e) => {
            warn!(error = %e, "Failed to create patch temp file");
            return None;
        }
    };
    // Unified diffs must end with a newline or git rejects the last hunk.
    let body = if diff_text.ends_with('\n') {
        diff_text.to_string()
    } else {
        format!("{diff_text}\n")
    };
    if let Err(e) = patch_file.write_all(body.as_bytes()) {
        warn!(error = %e, "Failed to write patch temp file");
        return None;
    }
    Some(patch_file)
}

/// Recursively clears read-only bits so `remove_dir_all` can succeed on
/// checkouts where git marked objects read-only.
fn make_writable(path: &Path) {
    for entry in walkdir::WalkDir::new(path).into_iter().filter_map(Result::ok) {
        if let Ok(metadata) = entry.metadata() {
            let mut perms = metadata.permissions();
            if perms.readonly() {
                #[allow(clippy::permissions_set_readonly_false)]
                perms.set_readonly(false);
                let _ = std::fs::set_permissions(entry.path(), perms);
            }
        }
    }
}

fn has_script(path: &Path, name: &str) -> bool {
    let Ok(content) = std::fs::read_to_string(path.join("package.json")) else {
        return false;
    };
    let Ok(pkg) = serde_json::from_str::<serde_json::Value>(&content) else {
        return false;
    };
    pkg.get("scripts")
        .and_then(|s| s.get(name))
        .and_then(|v| v.as_str())
        .is_some_and(|script| !script.trim().is_empty())
}

fn has_any_test_file(path: &Path) -> bool {
    walkdir::WalkDir::new(path)
        .max_depth(5)
        .into_iter()
        .filter_entry(|e| {
            let name = e.file_name().to_string_lossy();
            name != "node_modules" && name != ".git"
        })
        .filter_map(Result::ok)
        .any(|entry| is_test_file(&entry.file_name().to_string_lossy()))
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        let mut end = max;
        while !s.is_char_boundary(end) && end > 0 {
            end -= 1;
        }
        format!("{}... [truncated]", &s[..end])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn manager_in(tmp: &TempDir) -> RepositoryManager {
        RepositoryManager::new(RepoConfig::default().with_workdir_root(tmp.path()))
    }

    #[tokio::test]
    async fn cleanup_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let manager = manager_in(&tmp);
        let target = tmp.path().join("checkout");
        std::fs::create_dir_all(target.join("nested")).unwrap();
        std::fs::write(target.join("nested/file.txt"), "x").unwrap();

        manager.cleanup(&target).await;
        assert!(!target.exists());
        // Second pass on the removed path must be a silent no-op.
        manager.cleanup(&target).await;
        manager.cleanup(&target).await;
    }

    #[tokio::test]
    async fn cleanup_fixes_readonly_entries() {
        let tmp = TempDir::new().unwrap();
        let manager = manager_in(&tmp);
        let target = tmp.path().join("checkout");
        std::fs::create_dir_all(&target).unwrap();
        let file = target.join("locked.txt");
        std::fs::write(&file, "x").unwrap();
        let mut perms = std::fs::metadata(&file).unwrap().permissions();
        perms.set_readonly(true);
        std::fs::set_permissions(&file, perms).unwrap();

        manager.cleanup(&target).await;
        assert!(!target.exists());
    }

    #[tokio::test]
    async fn run_tests_without_manifest_reports_no_tests() {
        let tmp = TempDir::new().unwrap();
        let manager = manager_in(&tmp);
        let repo = tmp.path().join("repo");
        std::fs::create_dir_all(&repo).unwrap();
        std::fs::write(repo.join("index.js"), "module.exports = 1;").unwrap();

        let result = manager.run_tests(&repo, None).await;
        assert!(result.no_tests_found);
        assert_eq!(result.total, 0);
        assert_eq!(result.passed, 0);
        assert_eq!(result.failed, 0);
        assert!(result.execution_reliable);
    }

    #[tokio::test]
    async fn check_build_without_tooling_is_success() {
        let tmp = TempDir::new().unwrap();
        let manager = manager_in(&tmp);
        let repo = tmp.path().join("repo");
        std::fs::create_dir_all(&repo).unwrap();

        assert!(manager.check_build(&repo).await);
    }

    #[tokio::test]
    async fn apply_patch_rejects_empty_diff() {
        let tmp = TempDir::new().unwrap();
        let manager = manager_in(&tmp);
        assert!(!manager.apply_patch(tmp.path(), "").await);
        assert!(!manager.apply_patch(tmp.path(), "   \n  ").await);
    }

    #[tokio::test]
    async fn clone_rejects_unsafe_inputs() {
        let tmp = TempDir::new().unwrap();
        let manager = manager_in(&tmp);
        let err = manager
            .clone_at("https://x.com/a;rm -rf", "abc", "key-1")
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::InvalidInput(_)));

        let err = manager
            .clone_at("https://github.com/o/r.git", "ref;cmd", "key-2")
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::InvalidInput(_)));
    }

    #[test]
    fn has_script_reads_manifest() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(
            tmp.path().join("package.json"),
            r#"{"scripts": {"test": "jest", "build": ""}}"#,
        )
        .unwrap();
        assert!(has_script(tmp.path(), "test"));
        // Empty script bodies do not count as build tooling.
        assert!(!has_script(tmp.path(), "build"));
        assert!(!has_script(tmp.path(), "lint"));
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("short", 10), "short");
        let out = truncate("héllo wörld wide", 6);
        assert!(out.ends_with("... [truncated]"));
    }
}
