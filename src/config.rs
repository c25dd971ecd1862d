//! Harness configuration.
//!
//! One YAML-loadable struct aggregating the filesystem roots, parallelism,
//! timeouts, and threshold settings of the whole harness. Every field has a
//! default, so a partial (or absent) config file is valid.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::eval::EngineConfig;
use crate::repo::RepoConfig;
use crate::session::SessionConfig;
use crate::verify::VerifyConfig;

/// Errors that can occur while loading the harness configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration file '{0}' not found")]
    NotFound(String),

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Top-level harness configuration, as read from `swe-verify.yaml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HarnessConfig {
    /// Root under which per-evaluation checkouts are created.
    pub workdir_root: PathBuf,
    /// Directory for evaluation/session reports.
    pub reports_dir: PathBuf,
    /// Root for per-session checkpoint persistence.
    pub checkpoint_root: PathBuf,

    /// Maximum patches evaluated concurrently.
    pub max_parallel: usize,
    pub clone_timeout_secs: u64,
    pub install_timeout_secs: u64,
    pub test_timeout_secs: u64,
    pub build_timeout_secs: u64,

    /// Verification thresholds.
    pub fail_fast: bool,
    pub max_critical_errors: usize,
    pub max_high_findings: usize,
    pub min_verification_score: f64,
    pub auto_fix: bool,

    /// Session thresholds.
    pub min_checkpoint_score: f64,
    pub min_final_score: f64,
    pub max_failure_rate: f64,
    pub allow_no_tests: bool,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            workdir_root: std::env::temp_dir().join("swe-verify"),
            reports_dir: PathBuf::from("./reports"),
            checkpoint_root: PathBuf::from("./checkpoints"),

            max_parallel: 2,
            clone_timeout_secs: 600,
            install_timeout_secs: 120,
            test_timeout_secs: 300,
            build_timeout_secs: 300,

            fail_fast: true,
            max_critical_errors: 0,
            max_high_findings: 3,
            min_verification_score: 70.0,
            auto_fix: false,

            min_checkpoint_score: 70.0,
            min_final_score: 70.0,
            max_failure_rate: 0.2,
            allow_no_tests: false,
        }
    }
}

impl HarnessConfig {
    /// Loads the config from a YAML file; missing fields take defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads from `path` when given, defaults otherwise.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_parallel == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_parallel must be at least 1".to_string(),
            ));
        }
        if !(0.0..=100.0).contains(&self.min_verification_score) {
            return Err(ConfigError::ValidationFailed(
                "min_verification_score must be within 0-100".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.max_failure_rate) {
            return Err(ConfigError::ValidationFailed(
                "max_failure_rate must be within 0-1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn repo_config(&self) -> RepoConfig {
        RepoConfig {
            workdir_root: self.workdir_root.clone(),
            clone_depth: 50,
            clone_timeout: Duration::from_secs(self.clone_timeout_secs),
            install_timeout: Duration::from_secs(self.install_timeout_secs),
            test_timeout: Duration::from_secs(self.test_timeout_secs),
            build_timeout: Duration::from_secs(self.build_timeout_secs),
        }
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig::default()
            .with_max_parallel(self.max_parallel)
            .with_repo(self.repo_config())
    }

    pub fn verify_config(&self) -> VerifyConfig {
        VerifyConfig {
            fail_fast: self.fail_fast,
            max_critical: self.max_critical_errors,
            max_high: self.max_high_findings,
            min_score: self.min_verification_score,
            auto_fix: self.auto_fix,
            max_auto_fix_attempts: 3,
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            min_checkpoint_score: self.min_checkpoint_score,
            min_final_score: self.min_final_score,
            max_failure_rate: self.max_failure_rate,
            allow_no_tests: self.allow_no_tests,
            checkpoint_root: Some(self.checkpoint_root.clone()),
            repo: self.repo_config(),
        }
    }
}
