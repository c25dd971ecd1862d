//! Error types for swe-verify operations.
//!
//! Defines error types for all major subsystems:
//! - Repository lifecycle (clone, checkout, patch, test)
//! - Patch evaluation
//! - Verification pipeline
//! - Validation sessions and checkpoints
//! - Dataset loading
//!
//! Process-level failures (timeouts, spawn errors) are deliberately absent:
//! the command runner folds them into its output record so they can be
//! recorded as evaluation outcomes instead of thrown.

use thiserror::Error;

/// Errors that can occur during repository operations.
///
/// Clone and checkout failures are fatal for the evaluation that owns the
/// checkout; patch/build/test outcomes are data and never surface here.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("Clone of '{url}' failed: {reason}")]
    CloneFailed { url: String, reason: String },

    #[error("Commit '{commit}' not found in '{url}' even after full fetch")]
    CommitNotFound { url: String, commit: String },

    #[error("Checkout of '{commit}' failed: {reason}")]
    CheckoutFailed { commit: String, reason: String },

    #[error("Invalid repository input: {0}")]
    InvalidInput(String),

    #[error("No checkout registered for isolation key '{0}'")]
    UnknownCheckout(String),

    #[error("Git command failed: {0}")]
    GitFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur inside the evaluation engine.
///
/// Per-patch failures are converted into `InstanceResult` records and never
/// propagate past the engine; this enum covers engine-level misuse only.
#[derive(Debug, Error)]
pub enum EvaluationError {
    #[error("No patches to evaluate")]
    NoPatches,

    #[error("Working directory root '{0}' could not be created: {1}")]
    WorkdirUnavailable(String, String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors that can occur in the verification pipeline.
///
/// A crashing validator is caught by the manager and converted into a
/// critical finding for that stage; this enum covers pipeline setup issues.
#[derive(Debug, Error)]
pub enum VerificationError {
    #[error("Snapshot root '{0}' does not exist or is not a directory")]
    SnapshotRootMissing(String),

    #[error("Snapshot is empty: no source files under '{0}'")]
    EmptySnapshot(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur in the checkpoint/session manager.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Unknown session '{0}'")]
    UnknownSession(String),

    #[error("Session '{id}' is already terminal ({state}); no further transitions allowed")]
    AlreadyTerminal { id: String, state: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors that can occur while loading instance datasets or predictions.
#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("Dataset file '{0}' not found")]
    NotFound(String),

    #[error("Malformed record at line {line}: {reason}")]
    MalformedRecord { line: usize, reason: String },

    #[error("Prediction '{0}' references no known instance")]
    UnknownInstance(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
}
