//! Local instance-dataset and prediction loading.
//!
//! Instances arrive as a JSON array or JSONL file of [`RepoInstance`]
//! records; predictions as JSONL of `{instance_id, model_patch,
//! model_name}`. Remote acquisition is out of scope — files are produced by
//! an upstream collector.

use std::path::Path;

use serde::Deserialize;
use tracing::warn;

use crate::error::DatasetError;
use crate::eval::{PatchSubmission, RepoInstance};

/// One prediction record as emitted by a proposer run.
#[derive(Debug, Clone, Deserialize)]
pub struct PredictionRecord {
    pub instance_id: String,
    #[serde(default)]
    pub model_patch: String,
    #[serde(default = "default_model_name")]
    pub model_name: String,
}

fn default_model_name() -> String {
    "unknown".to_string()
}

impl From<PredictionRecord> for PatchSubmission {
    fn from(record: PredictionRecord) -> Self {
        Self {
            instance_id: record.instance_id,
            patch: record.model_patch,
            proposer: record.model_name,
        }
    }
}

/// Loads instances from a JSON array file or a JSONL file (sniffed from the
/// first non-whitespace character).
pub fn load_instances(path: &Path) -> Result<Vec<RepoInstance>, DatasetError> {
    let content = read(path)?;
    let trimmed = content.trim_start();
    if trimmed.starts_with('[') {
        Ok(serde_json::from_str(trimmed)?)
    } else {
        parse_jsonl(&content)
    }
}

/// Loads predictions from a JSONL file, skipping blank lines.
pub fn load_predictions(path: &Path) -> Result<Vec<PatchSubmission>, DatasetError> {
    let content = read(path)?;
    let records: Vec<PredictionRecord> = parse_jsonl(&content)?;
    Ok(records.into_iter().map(PatchSubmission::from).collect())
}

/// Drops predictions that reference no loaded instance, logging each one.
pub fn pair_predictions(
    instances: &[RepoInstance],
    predictions: Vec<PatchSubmission>,
) -> Vec<PatchSubmission> {
    let known: std::collections::HashSet<&str> = instances
        .iter()
        .map(|instance| instance.instance_id.as_str())
        .collect();
    predictions
        .into_iter()
        .filter(|prediction| {
            let found = known.contains(prediction.instance_id.as_str());
            if !found {
                warn!(
                    instance_id = %prediction.instance_id,
                    "Prediction references unknown instance, skipping"
                );
            }
            found
        })
        .collect()
}

fn read(path: &Path) -> Result<String, DatasetError> {
    if !path.exists() {
        return Err(DatasetError::NotFound(path.display().to_string()));
    }
    Ok(std::fs::read_to_string(path)?)
}

fn parse_jsonl<T: serde::de::DeserializeOwned>(content: &str) -> Result<Vec<T>, DatasetError> {
    let mut records = Vec::new();
    for (idx, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let record = serde_json::from_str(line).map_err(|e| DatasetError::MalformedRecord {
            line: idx + 1,
            reason: e.to_string(),
        })?;
        records.push(record);
    }
    Ok(records)
}
