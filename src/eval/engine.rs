//! Isolated, bounded-parallel patch evaluation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tracing::{info, warn};
use uuid::Uuid;

use crate::repo::{isolation_key, RepoConfig, RepositoryManager};

use super::types::{
    EvaluationResults, InstanceResult, PatchComplexity, PatchSubmission, RepoInstance,
};

/// Configuration for the evaluation engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum number of patches evaluated concurrently per batch.
    pub max_parallel: usize,
    pub repo: RepoConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_parallel: 2,
            repo: RepoConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = max_parallel.max(1);
        self
    }

    pub fn with_repo(mut self, repo: RepoConfig) -> Self {
        self.repo = repo;
        self
    }
}

/// Drives one-or-many patch evaluations against isolated checkouts.
///
/// Instances are registered up front; submissions reference them by id.
/// Every submission yields exactly one [`InstanceResult`] — a panic, clone
/// failure, or timeout inside one evaluation is captured into that patch's
/// result and never disturbs the rest of the batch.
pub struct EvaluationEngine {
    config: EngineConfig,
    instances: HashMap<String, RepoInstance>,
    repo_manager: Arc<RepositoryManager>,
}

impl EvaluationEngine {
    pub fn new(config: EngineConfig, instances: Vec<RepoInstance>) -> Self {
        let repo_manager = Arc::new(RepositoryManager::new(config.repo.clone()));
        let instances = instances
            .into_iter()
            .map(|instance| (instance.instance_id.clone(), instance))
            .collect();
        Self {
            config,
            instances,
            repo_manager,
        }
    }

    /// Evaluates all submissions in batches of `max_parallel`.
    pub async fn evaluate(&self, patches: Vec<PatchSubmission>) -> EvaluationResults {
        let run_id = format!("run-{}", Uuid::new_v4());
        let started_at = chrono::Utc::now().to_rfc3339();
        info!(
            run_id,
            patches = patches.len(),
            parallel = self.config.max_parallel,
            "Starting evaluation run"
        );

        let mut results = Vec::with_capacity(patches.len());
        for batch in patches.chunks(self.config.max_parallel) {
            let mut handles = Vec::with_capacity(batch.len());
            for submission in batch {
                let submission = submission.clone();
                let instance = self.instances.get(&submission.instance_id).cloned();
                let repo_manager = Arc::clone(&self.repo_manager);
                handles.push((
                    submission.clone(),
                    tokio::spawn(async move {
                        evaluate_one(repo_manager, instance, submission).await
                    }),
                ));
            }
            // Settled semantics: a panicking task is folded into a failed
            // result for that submission only.
            for (submission, handle) in handles {
                match handle.await {
                    Ok(result) => results.push(result),
                    Err(e) => {
                        warn!(instance_id = %submission.instance_id, error = %e, "Evaluation task panicked");
                        results.push(InstanceResult::failure(
                            &submission,
                            format!("evaluation task panicked: {e}"),
                            0.0,
                        ));
                    }
                }
            }
        }

        let aggregate = EvaluationResults::aggregate(run_id, started_at, results);
        info!(
            resolved = aggregate.resolved,
            total = aggregate.total,
            resolution_rate = aggregate.resolution_rate,
            "Evaluation run finished"
        );
        aggregate
    }
}

/// Evaluates a single submission inside its own checkout.
///
/// Cleanup of the checkout is unconditional: the isolation key is released
/// whether the evaluation succeeded, short-circuited, or errored.
async fn evaluate_one(
    repo_manager: Arc<RepositoryManager>,
    instance: Option<RepoInstance>,
    submission: PatchSubmission,
) -> InstanceResult {
    let start = Instant::now();

    let Some(instance) = instance else {
        return InstanceResult::failure(
            &submission,
            format!("unknown instance '{}'", submission.instance_id),
            start.elapsed().as_secs_f64(),
        );
    };

    if submission.patch.trim().is_empty() {
        return InstanceResult::failure(&submission, "Empty patch", 0.0);
    }

    let key = isolation_key(&instance.instance_id);
    let result = run_evaluation(&repo_manager, &instance, &submission, &key, start).await;
    repo_manager.release(&key).await;
    result
}

async fn run_evaluation(
    repo_manager: &RepositoryManager,
    instance: &RepoInstance,
    submission: &PatchSubmission,
    key: &str,
    start: Instant,
) -> InstanceResult {
    let path = match repo_manager
        .clone_at(&instance.repo_url, &instance.base_commit, key)
        .await
    {
        Ok(path) => path,
        Err(e) => {
            return InstanceResult::failure(submission, e.to_string(), start.elapsed().as_secs_f64());
        }
    };

    if let Some(test_patch) = instance.test_patch.as_deref() {
        if !repo_manager.apply_patch(&path, test_patch).await {
            warn!(
                instance_id = %instance.instance_id,
                "Instance test patch failed to apply (continuing)"
            );
        }
    }

    if !repo_manager.apply_patch(&path, &submission.patch).await {
        info!(instance_id = %instance.instance_id, "Candidate patch did not apply");
        return InstanceResult::failure(
            submission,
            "Patch application failed",
            start.elapsed().as_secs_f64(),
        );
    }

    let compilation_success = repo_manager.check_build(&path).await;
    let test_result = repo_manager.run_tests(&path, None).await;
    let resolved = compilation_success && test_result.all_passed();

    let error = if resolved {
        None
    } else if !compilation_success {
        Some("Build or type check failed".to_string())
    } else if test_result.no_tests_found {
        Some("No tests found to verify the patch".to_string())
    } else if !test_result.execution_reliable {
        Some("Test execution timed out or crashed".to_string())
    } else {
        Some(format!(
            "{} of {} tests failed",
            test_result.failed, test_result.total
        ))
    };

    InstanceResult {
        instance_id: instance.instance_id.clone(),
        proposer: submission.proposer.clone(),
        resolved,
        patch_applied: true,
        compilation_success,
        complexity: PatchComplexity::of_diff(&submission.patch),
        test_result: Some(test_result),
        execution_time_secs: start.elapsed().as_secs_f64(),
        error_kind: error.as_deref().map(super::types::ErrorKind::classify),
        error,
        timestamp: chrono::Utc::now().to_rfc3339(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn engine_with(instances: Vec<RepoInstance>, tmp: &TempDir) -> EvaluationEngine {
        let config = EngineConfig::default()
            .with_repo(RepoConfig::default().with_workdir_root(tmp.path()))
            .with_max_parallel(2);
        EvaluationEngine::new(config, instances)
    }

    fn submission(id: &str, patch: &str) -> PatchSubmission {
        PatchSubmission {
            instance_id: id.to_string(),
            patch: patch.to_string(),
            proposer: "m".to_string(),
        }
    }

    #[tokio::test]
    async fn empty_patch_short_circuits_without_cloning() {
        let tmp = TempDir::new().unwrap();
        let engine = engine_with(
            vec![RepoInstance {
                instance_id: "i-1".to_string(),
                repo_url: "https://example.invalid/repo.git".to_string(),
                base_commit: "abc".to_string(),
                test_patch: None,
            }],
            &tmp,
        );

        let results = engine.evaluate(vec![submission("i-1", "   ")]).await;
        assert_eq!(results.total, 1);
        let result = &results.results[0];
        assert!(!result.resolved);
        assert!(!result.patch_applied);
        assert_eq!(result.error.as_deref(), Some("Empty patch"));
        // Nothing was cloned for the short-circuited patch.
        assert_eq!(engine.repo_manager.active_checkouts().await, 0);
    }

    #[tokio::test]
    async fn unknown_instance_is_a_per_patch_failure() {
        let tmp = TempDir::new().unwrap();
        let engine = engine_with(Vec::new(), &tmp);

        let results = engine.evaluate(vec![submission("ghost", "+x\n")]).await;
        assert_eq!(results.total, 1);
        assert!(results.results[0]
            .error
            .as_deref()
            .unwrap()
            .contains("unknown instance"));
    }

    #[tokio::test]
    async fn one_bad_instance_never_fails_the_batch() {
        let tmp = TempDir::new().unwrap();
        let engine = engine_with(
            vec![RepoInstance {
                instance_id: "bad-url".to_string(),
                repo_url: "url;injected".to_string(),
                base_commit: "abc".to_string(),
                test_patch: None,
            }],
            &tmp,
        );

        let results = engine
            .evaluate(vec![
                submission("bad-url", "+x\n"),
                submission("missing", "+y\n"),
            ])
            .await;

        assert_eq!(results.total, 2);
        assert!(results.results.iter().all(|r| !r.resolved));
        assert!(results.results.iter().all(|r| r.error.is_some()));
    }

    #[tokio::test]
    async fn every_submission_yields_exactly_one_result() {
        let tmp = TempDir::new().unwrap();
        let engine = engine_with(Vec::new(), &tmp);
        let patches: Vec<PatchSubmission> = (0..5)
            .map(|i| submission(&format!("i-{i}"), "+line\n"))
            .collect();

        let results = engine.evaluate(patches).await;
        assert_eq!(results.total, 5);
        assert_eq!(results.results.len(), 5);
    }

    #[test]
    fn max_parallel_floor_is_one() {
        let config = EngineConfig::default().with_max_parallel(0);
        assert_eq!(config.max_parallel, 1);
    }
}
