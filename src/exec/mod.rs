//! External process execution with hard timeouts.
//!
//! Every git/npm/test-runner invocation in the harness goes through
//! [`run_command`], which spawns an argv-array process (never a shell
//! string), captures stdout/stderr, and kills the child if the timeout
//! expires. The returned [`CommandOutput`] always carries a concrete exit
//! code: a killed or unspawnable process reports `-1`, never an unknown
//! status.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{debug, warn};

/// Exit code reported when a process was killed or could not be inspected.
pub const KILLED_EXIT_CODE: i32 = -1;

/// Captured outcome of one external process invocation.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
    /// True when the process was forcibly killed on timeout.
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0 && !self.timed_out
    }

    /// Combined stdout + stderr, in that order.
    pub fn combined(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

/// Environment overlay applied to every test/build invocation so output is
/// stable across machines: CI mode, no colors, test NODE_ENV.
pub fn normalized_env() -> HashMap<String, String> {
    let mut env = HashMap::new();
    env.insert("CI".to_string(), "true".to_string());
    env.insert("NO_COLOR".to_string(), "1".to_string());
    env.insert("FORCE_COLOR".to_string(), "0".to_string());
    env.insert("NODE_ENV".to_string(), "test".to_string());
    env
}

/// Runs `program` with `args` in `cwd`, enforcing `timeout`.
///
/// The child inherits the parent environment plus the `env` overlay. On
/// timeout the process is killed and the output reports `timed_out = true`
/// with exit code [`KILLED_EXIT_CODE`]. A spawn failure is folded into the
/// same shape (exit -1, stderr carries the error) so callers can treat all
/// outcomes uniformly as data.
pub async fn run_command(
    program: &str,
    args: &[&str],
    cwd: &Path,
    env: &HashMap<String, String>,
    timeout: Duration,
) -> CommandOutput {
    let start = Instant::now();

    let mut cmd = Command::new(program);
    cmd.args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    for (key, value) in env {
        cmd.env(key, value);
    }

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            warn!(program, error = %e, "Failed to spawn process");
            return CommandOutput {
                exit_code: KILLED_EXIT_CODE,
                stdout: String::new(),
                stderr: format!("failed to spawn '{}': {}", program, e),
                duration: start.elapsed(),
                timed_out: false,
            };
        }
    };

    // Both pipes drain concurrently with waiting, so a chatty child can't
    // fill one pipe buffer and deadlock against wait() or the other read.
    let mut stdout_pipe = child.stdout.take();
    let mut stderr_pipe = child.stderr.take();
    let drain = async {
        let read_out = async {
            let mut buf = Vec::new();
            if let Some(ref mut pipe) = stdout_pipe {
                let _ = pipe.read_to_end(&mut buf).await;
            }
            buf
        };
        let read_err = async {
            let mut buf = Vec::new();
            if let Some(ref mut pipe) = stderr_pipe {
                let _ = pipe.read_to_end(&mut buf).await;
            }
            buf
        };
        tokio::join!(read_out, read_err)
    };

    let waited = tokio::time::timeout(timeout, async {
        let (pipes, status) = tokio::join!(drain, child.wait());
        (pipes, status)
    })
    .await;

    match waited {
        Ok(((out, err), Ok(status))) => {
            let exit_code = status.code().unwrap_or(KILLED_EXIT_CODE);
            debug!(
                program,
                exit_code,
                duration_ms = start.elapsed().as_millis() as u64,
                "Process finished"
            );
            CommandOutput {
                exit_code,
                stdout: String::from_utf8_lossy(&out).to_string(),
                stderr: String::from_utf8_lossy(&err).to_string(),
                duration: start.elapsed(),
                timed_out: false,
            }
        }
        Ok((_, Err(e))) => CommandOutput {
            exit_code: KILLED_EXIT_CODE,
            stdout: String::new(),
            stderr: format!("wait failed for '{}': {}", program, e),
            duration: start.elapsed(),
            timed_out: false,
        },
        Err(_) => {
            warn!(
                program,
                timeout_secs = timeout.as_secs(),
                "Process timed out, killing"
            );
            let _ = child.start_kill();
            let _ = child.wait().await;
            CommandOutput {
                exit_code: KILLED_EXIT_CODE,
                stdout: String::new(),
                stderr: format!("timed out after {}s", timeout.as_secs()),
                duration: start.elapsed(),
                timed_out: true,
            }
        }
    }
}

/// Convenience wrapper for git subcommands in a checkout.
pub async fn run_git(args: &[&str], cwd: &Path, timeout: Duration) -> CommandOutput {
    run_command("git", args, cwd, &HashMap::new(), timeout).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn run_command_captures_stdout() {
        let out = run_command(
            "echo",
            &["hello"],
            Path::new("."),
            &HashMap::new(),
            Duration::from_secs(5),
        )
        .await;
        assert_eq!(out.exit_code, 0);
        assert!(out.success());
        assert_eq!(out.stdout.trim(), "hello");
        assert!(!out.timed_out);
    }

    #[tokio::test]
    async fn run_command_nonzero_exit() {
        let out = run_command(
            "sh",
            &["-c", "echo oops >&2; exit 3"],
            Path::new("."),
            &HashMap::new(),
            Duration::from_secs(5),
        )
        .await;
        assert_eq!(out.exit_code, 3);
        assert!(!out.success());
        assert!(out.stderr.contains("oops"));
    }

    #[tokio::test]
    async fn run_command_timeout_kills_process() {
        let out = run_command(
            "sleep",
            &["30"],
            Path::new("."),
            &HashMap::new(),
            Duration::from_millis(200),
        )
        .await;
        assert!(out.timed_out);
        assert_eq!(out.exit_code, KILLED_EXIT_CODE);
        assert!(out.duration < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn run_command_spawn_failure_is_data() {
        let out = run_command(
            "definitely-not-a-real-binary-xyz",
            &[],
            Path::new("."),
            &HashMap::new(),
            Duration::from_secs(1),
        )
        .await;
        assert_eq!(out.exit_code, KILLED_EXIT_CODE);
        assert!(out.stderr.contains("failed to spawn"));
        assert!(!out.timed_out);
    }

    #[tokio::test]
    async fn run_command_env_overlay() {
        let mut env = HashMap::new();
        env.insert("SWE_VERIFY_TEST_VAR".to_string(), "42".to_string());
        let out = run_command(
            "sh",
            &["-c", "echo $SWE_VERIFY_TEST_VAR"],
            Path::new("."),
            &env,
            Duration::from_secs(5),
        )
        .await;
        assert_eq!(out.stdout.trim(), "42");
    }

    #[test]
    fn normalized_env_forces_ci_mode() {
        let env = normalized_env();
        assert_eq!(env.get("CI").map(String::as_str), Some("true"));
        assert_eq!(env.get("NO_COLOR").map(String::as_str), Some("1"));
        assert_eq!(env.get("NODE_ENV").map(String::as_str), Some("test"));
    }

    #[test]
    fn combined_joins_streams() {
        let out = CommandOutput {
            exit_code: 0,
            stdout: "a".to_string(),
            stderr: "b".to_string(),
            duration: Duration::ZERO,
            timed_out: false,
        };
        assert_eq!(out.combined(), "a\nb");
    }
}
