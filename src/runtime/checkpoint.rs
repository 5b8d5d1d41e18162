//! Per-epoch checkpoints in a run directory.
//!
//! Layout:
//!   model_epoch{N}.bin       bincode of the full model
//!   optimizer_epoch{N}.bin   bincode of the Adam state (optional)

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::core::model::DischargeModel;
use crate::error::{HydroError, Result};
use crate::training::optimizer::Adam;

const MODEL_PREFIX: &str = "model_epoch";
const OPTIMIZER_PREFIX: &str = "optimizer_epoch";
const EXTENSION: &str = ".bin";

#[derive(Clone, Debug)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn model_path(&self, epoch: usize) -> PathBuf {
        self.dir.join(format!("{}{}{}", MODEL_PREFIX, epoch, EXTENSION))
    }

    pub fn optimizer_path(&self, epoch: usize) -> PathBuf {
        self.dir.join(format!("{}{}{}", OPTIMIZER_PREFIX, epoch, EXTENSION))
    }

    /// Write to a temporary sibling, then rename over the target.
    fn write_atomic(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        fs::create_dir_all(&self.dir).map_err(|e| HydroError::io(&self.dir, e))?;
        let tmp = path.with_extension("bin.tmp");
        fs::write(&tmp, bytes).map_err(|e| HydroError::io(&tmp, e))?;
        fs::rename(&tmp, path).map_err(|e| HydroError::io(path, e))?;
        debug!(path = %path.display(), bytes = bytes.len(), "checkpoint written");
        Ok(())
    }

    pub fn save_model(&self, epoch: usize, model: &DischargeModel) -> Result<PathBuf> {
        let path = self.model_path(epoch);
        self.write_atomic(&path, &model.to_bytes()?)?;
        Ok(path)
    }

    pub fn save_optimizer(&self, epoch: usize, optimizer: &Adam) -> Result<PathBuf> {
        let path = self.optimizer_path(epoch);
        self.write_atomic(&path, &optimizer.to_bytes()?)?;
        Ok(path)
    }

    pub fn load_model(&self, epoch: usize) -> Result<DischargeModel> {
        let path = self.model_path(epoch);
        if !path.exists() {
            return Err(HydroError::MissingCheckpoint {
                epoch,
                dir: self.dir.clone(),
            });
        }
        let bytes = fs::read(&path).map_err(|e| HydroError::io(&path, e))?;
        DischargeModel::from_bytes(&bytes)
    }

    /// Optimizer state of `epoch`, if it was saved.
    pub fn load_optimizer(&self, epoch: usize) -> Result<Option<Adam>> {
        let path = self.optimizer_path(epoch);
        if !path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(&path).map_err(|e| HydroError::io(&path, e))?;
        Adam::from_bytes(&bytes).map(Some)
    }

    /// Epochs with a saved model, ascending.
    pub fn epochs(&self) -> Result<Vec<usize>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut epochs = Vec::new();
        for entry in fs::read_dir(&self.dir).map_err(|e| HydroError::io(&self.dir, e))? {
            let entry = entry.map_err(|e| HydroError::io(&self.dir, e))?;
            if let Some(epoch) = entry.file_name().to_str().and_then(parse_model_filename) {
                epochs.push(epoch);
            }
        }
        epochs.sort_unstable();
        Ok(epochs)
    }

    pub fn latest_epoch(&self) -> Result<Option<usize>> {
        Ok(self.epochs()?.last().copied())
    }
}

/// `model_epoch{N}.bin` → N
fn parse_model_filename(name: &str) -> Option<usize> {
    name.strip_prefix(MODEL_PREFIX)?
        .strip_suffix(EXTENSION)?
        .parse()
        .ok()
}
