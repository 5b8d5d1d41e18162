//! Result files: per-basin evaluation tables and robustness reports (JSON).

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::info;

use crate::core::model::ModelVariant;
use crate::error::{HydroError, Result};
use crate::evaluation::evaluator::BasinEvaluation;
use crate::evaluation::robustness::RobustnessReport;

/// basin → evaluation table
pub type EvaluationResults = BTreeMap<String, BasinEvaluation>;

/// `ealstm_seed{S}.json`, `lstm_seed{S}.json` or `lstm_no_static_seed{S}.json`.
pub fn evaluation_file_name(variant: ModelVariant, seed: u64) -> String {
    format!("{}_seed{}.json", variant.result_prefix(), seed)
}

/// `{run_name}_model_robustness.json`
pub fn robustness_file_name(run_name: &str) -> String {
    format!("{}_model_robustness.json", run_name)
}

pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| HydroError::io(parent, e))?;
    }
    let json = serde_json::to_string_pretty(value)?;
    fs::write(path, json).map_err(|e| HydroError::io(path, e))?;
    info!(path = %path.display(), "results stored");
    Ok(())
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let json = fs::read_to_string(path).map_err(|e| HydroError::io(path, e))?;
    Ok(serde_json::from_str(&json)?)
}

pub fn store_evaluation(
    run_dir: &Path,
    variant: ModelVariant,
    seed: u64,
    results: &EvaluationResults,
) -> Result<PathBuf> {
    let path = run_dir.join(evaluation_file_name(variant, seed));
    write_json(&path, results)?;
    Ok(path)
}

pub fn store_robustness(out_dir: &Path, run_name: &str, report: &RobustnessReport) -> Result<PathBuf> {
    let path = out_dir.join(robustness_file_name(run_name));
    write_json(&path, report)?;
    Ok(path)
}
