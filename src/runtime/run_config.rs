//! Run configuration, written once to `cfg.json` at the start of a run and
//! read by every later stage to rebuild the exact model shape.

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{
    BATCH_SIZE, CLIP_NORM, CLIP_VALUE, DROPOUT, EPOCHS, HIDDEN_SIZE, INITIAL_FORGET_BIAS, LEARNING_RATE,
    LOG_INTERVAL, LR_DROPS, NUM_WORKERS, N_DYNAMIC, N_STATIC, SEQ_LENGTH, TRAIN_END, TRAIN_START, VAL_END,
    VAL_START,
};
use crate::core::model::{ModelSpec, ModelVariant};
use crate::error::{HydroError, Result};
use crate::training::scheduler::StepSchedule;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    pub run_name: String,
    pub seed: u64,
    pub region: String,
    pub basins: Vec<String>,

    pub variant: ModelVariant,
    pub dynamic_size: usize,
    pub static_size: usize,
    pub hidden_size: usize,
    pub dropout: f32,
    pub initial_forget_bias: f32,

    pub learning_rate: f32,
    /// epoch → learning rate from that epoch on
    pub lr_drops: BTreeMap<usize, f32>,
    pub epochs: usize,
    pub batch_size: usize,
    pub seq_length: usize,
    pub clip_norm: bool,
    pub clip_value: f32,
    pub use_mse: bool,

    pub train_start: NaiveDate,
    pub train_end: NaiveDate,
    pub val_start: NaiveDate,
    pub val_end: NaiveDate,

    pub num_workers: usize,
    pub log_interval: usize,
    pub created_at: DateTime<Utc>,
}

fn date((y, m, d): (i32, u32, u32)) -> Result<NaiveDate> {
    NaiveDate::from_ymd_opt(y, m, d).ok_or_else(|| HydroError::Config(format!("invalid date {}-{}-{}", y, m, d)))
}

impl RunConfig {
    pub const FILE_NAME: &'static str = "cfg.json";

    /// A configuration with every hyperparameter at its default.
    pub fn new(
        run_name: impl Into<String>,
        seed: u64,
        region: impl Into<String>,
        basins: Vec<String>,
        variant: ModelVariant,
    ) -> Result<Self> {
        Ok(Self {
            run_name: run_name.into(),
            seed,
            region: region.into(),
            basins,
            variant,
            dynamic_size: N_DYNAMIC,
            static_size: if variant.uses_static() { N_STATIC } else { 0 },
            hidden_size: HIDDEN_SIZE,
            dropout: DROPOUT,
            initial_forget_bias: INITIAL_FORGET_BIAS,
            learning_rate: LEARNING_RATE,
            lr_drops: LR_DROPS.into_iter().collect(),
            epochs: EPOCHS,
            batch_size: BATCH_SIZE,
            seq_length: SEQ_LENGTH,
            clip_norm: CLIP_NORM,
            clip_value: CLIP_VALUE,
            use_mse: false,
            train_start: date(TRAIN_START)?,
            train_end: date(TRAIN_END)?,
            val_start: date(VAL_START)?,
            val_end: date(VAL_END)?,
            num_workers: NUM_WORKERS,
            log_interval: LOG_INTERVAL,
            created_at: Utc::now(),
        })
    }

    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(HydroError::Config(msg));
        if self.basins.is_empty() {
            return fail("run has no basins".into());
        }
        if self.epochs == 0 || self.batch_size == 0 || self.seq_length == 0 {
            return fail(format!(
                "epochs ({}), batch size ({}) and sequence length ({}) must be positive",
                self.epochs, self.batch_size, self.seq_length
            ));
        }
        if !(self.learning_rate > 0.0) || self.lr_drops.values().any(|lr| !(*lr > 0.0)) {
            return fail("learning rates must be positive".into());
        }
        if self.clip_norm && !(self.clip_value > 0.0) {
            return fail(format!("clip value must be positive, got {}", self.clip_value));
        }
        if self.train_start > self.train_end || self.val_start > self.val_end {
            return fail("period start lies after its end".into());
        }
        self.model_spec().validate()
    }

    pub fn model_spec(&self) -> ModelSpec {
        ModelSpec {
            variant: self.variant,
            dynamic_size: self.dynamic_size,
            static_size: self.static_size,
            hidden_size: self.hidden_size,
            dropout: self.dropout,
            initial_forget_bias: self.initial_forget_bias,
        }
    }

    pub fn schedule(&self) -> StepSchedule {
        StepSchedule::new(self.learning_rate, self.lr_drops.iter().map(|(&e, &lr)| (e, lr)))
    }

    /// Write `cfg.json` into `dir`, creating the directory. Refuses to
    /// overwrite an existing configuration.
    pub fn write_once(&self, dir: &Path) -> Result<PathBuf> {
        self.validate()?;
        fs::create_dir_all(dir).map_err(|e| HydroError::io(dir, e))?;
        let path = dir.join(Self::FILE_NAME);

        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(HydroError::Config(format!(
                    "{} already exists; pick a new run name",
                    path.display()
                )))
            }
            Err(e) => return Err(HydroError::io(&path, e)),
        };
        let json = serde_json::to_string_pretty(self)?;
        file.write_all(json.as_bytes()).map_err(|e| HydroError::io(&path, e))?;
        Ok(path)
    }

    /// Read `cfg.json` from `dir`. Missing or malformed files are
    /// configuration errors.
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(Self::FILE_NAME);
        let json = fs::read_to_string(&path)
            .map_err(|e| HydroError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        let cfg: Self = serde_json::from_str(&json)
            .map_err(|e| HydroError::Config(format!("malformed {}: {}", path.display(), e)))?;
        cfg.validate()?;
        Ok(cfg)
    }
}
