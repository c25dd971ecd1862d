//! Proposer boundary.
//!
//! The verification core consumes candidate patches through this trait and
//! never learns how they were produced. Concrete clients (model-backed,
//! tool-backed) live outside the core; [`StaticProposer`] serves tests and
//! offline replay of previously generated patches.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::eval::RepoInstance;

/// Everything a proposer may look at when producing a patch.
#[derive(Debug, Clone)]
pub struct ProposerRequest {
    pub instance: RepoInstance,
    /// Free-form analysis of the failure (issue text, stack traces, ...).
    pub analysis_context: String,
    /// Feedback from prior rejected attempts, oldest first.
    pub prior_feedback: Vec<String>,
}

/// Token accounting reported by a proposer, when available.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProposerUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// A candidate patch with its rationale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposedPatch {
    /// Unified diff text.
    pub diff: String,
    pub rationale: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<ProposerUsage>,
}

/// A source of candidate patches. Injected into orchestration code; the
/// core only checks whether the diff applies and what effect it has.
#[async_trait]
pub trait ProposerClient: Send + Sync {
    async fn propose(&self, request: &ProposerRequest) -> anyhow::Result<ProposedPatch>;
}

/// Deterministic proposer backed by a fixed map of instance id -> diff.
pub struct StaticProposer {
    patches: HashMap<String, String>,
}

impl StaticProposer {
    pub fn new(patches: HashMap<String, String>) -> Self {
        Self { patches }
    }
}

#[async_trait]
impl ProposerClient for StaticProposer {
    async fn propose(&self, request: &ProposerRequest) -> anyhow::Result<ProposedPatch> {
        let diff = self
            .patches
            .get(&request.instance.instance_id)
            .cloned()
            .ok_or_else(|| {
                anyhow::anyhow!("no prepared patch for '{}'", request.instance.instance_id)
            })?;
        Ok(ProposedPatch {
            diff,
            rationale: "prepared patch".to_string(),
            usage: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance(id: &str) -> RepoInstance {
        RepoInstance {
            instance_id: id.to_string(),
            repo_url: "u".to_string(),
            base_commit: "c".to_string(),
            test_patch: None,
        }
    }

    #[tokio::test]
    async fn static_proposer_returns_prepared_diff() {
        let mut patches = HashMap::new();
        patches.insert("i-1".to_string(), "+fixed\n".to_string());
        let proposer = StaticProposer::new(patches);

        let request = ProposerRequest {
            instance: instance("i-1"),
            analysis_context: String::new(),
            prior_feedback: Vec::new(),
        };
        let proposed = proposer.propose(&request).await.unwrap();
        assert_eq!(proposed.diff, "+fixed\n");
    }

    #[tokio::test]
    async fn static_proposer_errors_on_unknown_instance() {
        let proposer = StaticProposer::new(HashMap::new());
        let request = ProposerRequest {
            instance: instance("ghost"),
            analysis_context: String::new(),
            prior_feedback: Vec::new(),
        };
        assert!(proposer.propose(&request).await.is_err());
    }
}
