//! CLI command definitions and handlers.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use crate::config::HarnessConfig;
use crate::dataset;
use crate::eval::EvaluationEngine;
use crate::report;
use crate::session::{CheckpointManager, SessionConfig};
use crate::verify::{CodeSnapshot, ValidationContext, VerificationManager};

/// Patch verification harness: clone, patch, test and score candidate
/// fixes against real repositories.
#[derive(Parser, Debug)]
#[command(name = "swe-verify", version, about)]
pub struct Cli {
    /// Log level when RUST_LOG is not set (error, warn, info, debug, trace).
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(clap::Subcommand, Debug)]
pub enum Commands {
    /// Evaluate candidate patches against their instances.
    ///
    /// Pairs a predictions JSONL file with an instance dataset, evaluates
    /// each patch in an isolated checkout, and writes JSON + Markdown
    /// reports.
    #[command(alias = "eval")]
    Evaluate(EvaluateArgs),

    /// Run the verification pipeline over a local directory.
    Verify(VerifyArgs),

    /// Drive an iterative validation session over a local checkout.
    Session(SessionArgs),
}

/// Arguments for `swe-verify evaluate`.
#[derive(Parser, Debug)]
pub struct EvaluateArgs {
    /// Instance dataset (JSON array or JSONL of instance records).
    #[arg(long)]
    pub dataset: PathBuf,

    /// Predictions JSONL ({instance_id, model_patch, model_name} records).
    #[arg(long)]
    pub predictions: PathBuf,

    /// Harness configuration file (YAML); defaults apply when omitted.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Override the configured evaluation parallelism.
    #[arg(long)]
    pub max_parallel: Option<usize>,
}

/// Arguments for `swe-verify verify`.
#[derive(Parser, Debug)]
pub struct VerifyArgs {
    /// Directory to verify.
    #[arg(long, default_value = ".")]
    pub path: PathBuf,

    /// Harness configuration file (YAML).
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Apply automatic fixes and re-verify (bounded).
    #[arg(long, default_value = "false")]
    pub auto_fix: bool,

    /// Run every level even past the critical-finding threshold.
    #[arg(long, default_value = "false")]
    pub no_fail_fast: bool,
}

/// Arguments for `swe-verify session`.
#[derive(Parser, Debug)]
pub struct SessionArgs {
    /// Instance identifier the session belongs to.
    #[arg(long)]
    pub instance_id: String,

    /// Checkout to run checkpoints against.
    #[arg(long, default_value = ".")]
    pub path: PathBuf,

    /// Comma-separated phase names, one checkpoint each, in order.
    #[arg(long, default_value = "initial")]
    pub phases: String,

    /// Harness configuration file (YAML).
    #[arg(long)]
    pub config: Option<PathBuf>,
}

/// Parses CLI arguments from the process environment.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Dispatches a parsed CLI invocation.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Evaluate(args) => run_evaluate(args).await,
        Commands::Verify(args) => run_verify(args).await,
        Commands::Session(args) => run_session(args).await,
    }
}

async fn run_evaluate(args: EvaluateArgs) -> anyhow::Result<()> {
    let config = HarnessConfig::load_or_default(args.config.as_deref())?;

    let instances = dataset::load_instances(&args.dataset)
        .with_context(|| format!("loading dataset {}", args.dataset.display()))?;
    let predictions = dataset::load_predictions(&args.predictions)
        .with_context(|| format!("loading predictions {}", args.predictions.display()))?;
    let submissions = dataset::pair_predictions(&instances, predictions);
    info!(
        instances = instances.len(),
        submissions = submissions.len(),
        "Loaded evaluation inputs"
    );

    let mut engine_config = config.engine_config();
    if let Some(max_parallel) = args.max_parallel {
        engine_config = engine_config.with_max_parallel(max_parallel);
    }
    let engine = EvaluationEngine::new(engine_config, instances);
    let results = engine.evaluate(submissions).await;

    let path = report::write_evaluation_report(&config.reports_dir, &results)?;
    println!(
        "{} of {} resolved ({:.1}%) — report at {}",
        results.resolved,
        results.total,
        results.resolution_rate * 100.0,
        path.display()
    );
    Ok(())
}

async fn run_verify(args: VerifyArgs) -> anyhow::Result<()> {
    let config = HarnessConfig::load_or_default(args.config.as_deref())?;
    let mut verify_config = config.verify_config();
    verify_config.auto_fix = args.auto_fix || verify_config.auto_fix;
    if args.no_fail_fast {
        verify_config.fail_fast = false;
    }

    let snapshot = CodeSnapshot::from_dir(&args.path)?;
    let ctx = ValidationContext::for_repo(&args.path);
    let manager = VerificationManager::new(verify_config);
    let result = manager.verify(snapshot, ctx).await;

    println!("{}", serde_json::to_string_pretty(&result_summary(&result))?);
    if !result.passed {
        std::process::exit(1);
    }
    Ok(())
}

async fn run_session(args: SessionArgs) -> anyhow::Result<()> {
    let config = HarnessConfig::load_or_default(args.config.as_deref())?;
    let session_config: SessionConfig = config.session_config();
    let manager = CheckpointManager::new(session_config);

    let session_id = manager.start_session(&args.instance_id).await;
    for (iteration, phase) in args.phases.split(',').map(str::trim).enumerate() {
        if phase.is_empty() {
            continue;
        }
        let checkpoint = manager
            .execute_checkpoint(&session_id, phase, &args.path, None, Some(iteration as u32 + 1))
            .await?;
        println!(
            "checkpoint {phase}: score {:.1}, confidence {:.2}, passed {}",
            checkpoint.score, checkpoint.confidence, checkpoint.passed
        );
    }

    let session = manager.complete_session(&session_id).await?;
    let path = report::write_session_report(&config.reports_dir, &session)?;
    println!(
        "session {}: final score {:.1}, passed {} — report at {}",
        session.session_id,
        session.final_score.unwrap_or(0.0),
        session.final_passed.unwrap_or(false),
        path.display()
    );
    Ok(())
}

fn result_summary(result: &crate::verify::VerificationResult) -> serde_json::Value {
    serde_json::json!({
        "passed": result.passed,
        "score": result.score,
        "critical_errors": result.critical_errors.len(),
        "warnings": result.warnings.len(),
        "suggestions": result.suggestions.len(),
        "stages": result
            .stages
            .iter()
            .map(|s| serde_json::json!({
                "stage": s.stage,
                "passed": s.passed,
                "score": s.score,
                "findings": s.findings.len(),
            }))
            .collect::<Vec<_>>(),
        "metrics": result.metrics,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_evaluate() {
        let cli = Cli::try_parse_from([
            "swe-verify",
            "evaluate",
            "--dataset",
            "instances.json",
            "--predictions",
            "preds.jsonl",
            "--max-parallel",
            "4",
        ])
        .unwrap();
        match cli.command {
            Commands::Evaluate(args) => {
                assert_eq!(args.dataset, PathBuf::from("instances.json"));
                assert_eq!(args.max_parallel, Some(4));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn cli_accepts_eval_alias() {
        let cli = Cli::try_parse_from([
            "swe-verify",
            "eval",
            "--dataset",
            "d.json",
            "--predictions",
            "p.jsonl",
        ])
        .unwrap();
        assert!(matches!(cli.command, Commands::Evaluate(_)));
    }

    #[test]
    fn cli_parses_verify_defaults() {
        let cli = Cli::try_parse_from(["swe-verify", "verify"]).unwrap();
        match cli.command {
            Commands::Verify(args) => {
                assert_eq!(args.path, PathBuf::from("."));
                assert!(!args.auto_fix);
                assert!(!args.no_fail_fast);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn cli_parses_session_phases() {
        let cli = Cli::try_parse_from([
            "swe-verify",
            "session",
            "--instance-id",
            "o__r-1",
            "--phases",
            "initial,after-fix,final",
        ])
        .unwrap();
        match cli.command {
            Commands::Session(args) => {
                assert_eq!(args.phases.split(',').count(), 3);
                assert_eq!(args.instance_id, "o__r-1");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn cli_requires_a_subcommand() {
        assert!(Cli::try_parse_from(["swe-verify"]).is_err());
    }
}
