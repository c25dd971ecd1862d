//! Checkpoint/session layer: scored validation snapshots across iterative
//! repair attempts, with a terminal-state session lifecycle.

mod checkpoint;
mod manager;

pub use checkpoint::{
    checkpoint_confidence, checkpoint_passes, checkpoint_score, SessionState, ValidationCheckpoint,
};
pub use manager::{
    classify_trend, weighted_final_score, CheckpointManager, SessionConfig, SessionSummary, Trend,
    ValidationSession,
};
