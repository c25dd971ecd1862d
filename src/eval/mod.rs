//! Evaluation engine: bounded-parallel patch verification with per-patch
//! isolation and settled-result semantics.

mod engine;
mod types;

pub use engine::{EngineConfig, EvaluationEngine};
pub use types::{
    ErrorKind, EvaluationResults, InstanceResult, PatchComplexity, PatchSubmission, RepoInstance,
};
