//! Command-line interface for swe-verify.
//!
//! Provides commands for patch evaluation, snapshot verification, and
//! iterative validation sessions.

mod commands;

pub use commands::{
    parse_cli, run_with_cli, Cli, Commands, EvaluateArgs, SessionArgs, VerifyArgs,
};
