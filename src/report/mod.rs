//! Report emission: JSON records plus a derived Markdown summary.

use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::EvaluationError;
use crate::eval::EvaluationResults;
use crate::session::ValidationSession;

/// Writes `report-<run_id>.json` and `report-<run_id>.md` under
/// `reports_dir`, returning the JSON path.
pub fn write_evaluation_report(
    reports_dir: &Path,
    results: &EvaluationResults,
) -> Result<PathBuf, EvaluationError> {
    std::fs::create_dir_all(reports_dir)?;

    let json_path = reports_dir.join(format!("report-{}.json", results.run_id));
    std::fs::write(&json_path, serde_json::to_string_pretty(results)?)?;

    let md_path = reports_dir.join(format!("report-{}.md", results.run_id));
    std::fs::write(&md_path, render_markdown(results))?;

    info!(path = %json_path.display(), "Evaluation report written");
    Ok(json_path)
}

/// Writes a session record as pretty JSON, returning the path.
pub fn write_session_report(
    reports_dir: &Path,
    session: &ValidationSession,
) -> Result<PathBuf, EvaluationError> {
    std::fs::create_dir_all(reports_dir)?;
    let path = reports_dir.join(format!("{}.json", session.session_id));
    std::fs::write(&path, serde_json::to_string_pretty(session)?)?;
    info!(path = %path.display(), "Session report written");
    Ok(path)
}

/// Renders the evaluation summary as Markdown.
pub fn render_markdown(results: &EvaluationResults) -> String {
    let mut out = String::new();
    out.push_str(&format!("# Evaluation Report `{}`\n\n", results.run_id));
    out.push_str(&format!(
        "- Started: {}\n- Finished: {}\n\n",
        results.started_at, results.finished_at
    ));

    out.push_str("## Summary\n\n");
    out.push_str("| Metric | Value |\n|---|---|\n");
    out.push_str(&format!("| Instances | {} |\n", results.total));
    out.push_str(&format!("| Resolved | {} |\n", results.resolved));
    out.push_str(&format!(
        "| Resolution rate | {:.1}% |\n",
        results.resolution_rate * 100.0
    ));
    out.push_str(&format!(
        "| Compilation rate | {:.1}% |\n",
        results.compilation_rate * 100.0
    ));
    out.push_str(&format!(
        "| Test pass rate | {:.1}% |\n",
        results.test_pass_rate * 100.0
    ));
    out.push_str(&format!(
        "| Avg execution | {:.1}s |\n\n",
        results.avg_execution_secs
    ));

    if !results.error_histogram.is_empty() {
        out.push_str("## Errors\n\n| Kind | Count |\n|---|---|\n");
        let mut kinds: Vec<_> = results.error_histogram.iter().collect();
        kinds.sort_by(|a, b| b.1.cmp(a.1).then(a.0.cmp(b.0)));
        for (kind, count) in kinds {
            out.push_str(&format!("| {kind} | {count} |\n"));
        }
        out.push('\n');
    }

    out.push_str("## Instances\n\n");
    out.push_str("| Instance | Resolved | Applied | Compiled | Tests | Time | Error |\n");
    out.push_str("|---|---|---|---|---|---|---|\n");
    for result in &results.results {
        let tests = match &result.test_result {
            Some(t) => format!("{}/{}", t.passed, t.total),
            None => "-".to_string(),
        };
        out.push_str(&format!(
            "| {} | {} | {} | {} | {} | {:.1}s | {} |\n",
            result.instance_id,
            check(result.resolved),
            check(result.patch_applied),
            check(result.compilation_success),
            tests,
            result.execution_time_secs,
            result.error.as_deref().unwrap_or("-"),
        ));
    }
    out
}

fn check(flag: bool) -> &'static str {
    if flag {
        "yes"
    } else {
        "no"
    }
}
