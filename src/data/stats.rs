//! Per-feature statistics for input normalization and output rescaling.
//!
//! Computed once from the training basins, then persisted next to the run
//! configuration and treated as read-only.

use std::fs;
use std::path::Path;

use ndarray::{Array1, Array2, ArrayView1};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::data::basin::{is_valid_discharge, BasinSeries};
use crate::error::{HydroError, Result};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FeatureStats {
    pub dynamic_mean: Array1<f32>,
    pub dynamic_std: Array1<f32>,
    pub static_mean: Array1<f32>,
    pub static_std: Array1<f32>,
    pub discharge_mean: f32,
    pub discharge_std: f32,
}

/// Running mean/variance (Welford), accumulated in f64.
#[derive(Clone, Copy, Debug, Default)]
struct Moments {
    n: u64,
    mean: f64,
    m2: f64,
}

impl Moments {
    fn push(&mut self, x: f64) {
        self.n += 1;
        let delta = x - self.mean;
        self.mean += delta / self.n as f64;
        self.m2 += delta * (x - self.mean);
    }

    fn mean(&self) -> f32 {
        self.mean as f32
    }

    /// Sample std; degenerate spreads become 1 so normalization stays finite.
    fn std(&self) -> f32 {
        if self.n < 2 {
            return 1.0;
        }
        let std = (self.m2 / (self.n - 1) as f64).sqrt() as f32;
        if std.is_finite() && std > 0.0 {
            std
        } else {
            1.0
        }
    }
}

impl FeatureStats {
    pub const FILE_NAME: &'static str = "feature_stats.json";

    /// Statistics that leave every value unchanged.
    pub fn identity(n_dynamic: usize, n_static: usize) -> Self {
        Self {
            dynamic_mean: Array1::zeros(n_dynamic),
            dynamic_std: Array1::ones(n_dynamic),
            static_mean: Array1::zeros(n_static),
            static_std: Array1::ones(n_static),
            discharge_mean: 0.0,
            discharge_std: 1.0,
        }
    }

    /// Compute statistics over the given (training-period) basins.
    ///
    /// Dynamic features and discharge are pooled over all days of all
    /// basins; static attributes over basins.
    pub fn from_basins(basins: &[BasinSeries]) -> Result<Self> {
        let first = basins
            .first()
            .ok_or_else(|| HydroError::Config("no basins to compute feature statistics from".into()))?;
        let n_dyn = first.forcings.ncols();
        let n_static = first.attributes.len();

        let mut dynamic = vec![Moments::default(); n_dyn];
        let mut statics = vec![Moments::default(); n_static];
        let mut discharge = Moments::default();

        for basin in basins {
            if basin.forcings.ncols() != n_dyn || basin.attributes.len() != n_static {
                return Err(HydroError::Shape(format!(
                    "basin {} has {} forcings / {} attributes, expected {} / {}",
                    basin.basin_id,
                    basin.forcings.ncols(),
                    basin.attributes.len(),
                    n_dyn,
                    n_static
                )));
            }
            for row in basin.forcings.rows() {
                for (m, &x) in dynamic.iter_mut().zip(row.iter()) {
                    if x.is_finite() {
                        m.push(x as f64);
                    }
                }
            }
            for (m, &x) in statics.iter_mut().zip(basin.attributes.iter()) {
                m.push(x as f64);
            }
            for &q in basin.discharge.iter().filter(|&&q| is_valid_discharge(q)) {
                discharge.push(q as f64);
            }
        }

        if discharge.n == 0 {
            warn!("no valid discharge observations; discharge statistics default to identity");
        }

        Ok(Self {
            dynamic_mean: dynamic.iter().map(Moments::mean).collect(),
            dynamic_std: dynamic.iter().map(Moments::std).collect(),
            static_mean: statics.iter().map(Moments::mean).collect(),
            static_std: statics.iter().map(Moments::std).collect(),
            discharge_mean: discharge.mean(),
            discharge_std: discharge.std(),
        })
    }

    pub fn n_dynamic(&self) -> usize {
        self.dynamic_mean.len()
    }

    pub fn n_static(&self) -> usize {
        self.static_mean.len()
    }

    pub fn normalize_dynamic(&self, forcings: &Array2<f32>) -> Result<Array2<f32>> {
        if forcings.ncols() != self.n_dynamic() {
            return Err(HydroError::Shape(format!(
                "{} forcing columns, statistics cover {}",
                forcings.ncols(),
                self.n_dynamic()
            )));
        }
        Ok((forcings - &self.dynamic_mean) / &self.dynamic_std)
    }

    pub fn normalize_static(&self, attributes: &Array1<f32>) -> Result<Array1<f32>> {
        if attributes.len() != self.n_static() {
            return Err(HydroError::Shape(format!(
                "{} static attributes, statistics cover {}",
                attributes.len(),
                self.n_static()
            )));
        }
        Ok((attributes - &self.static_mean) / &self.static_std)
    }

    pub fn normalize_discharge(&self, q: f32) -> f32 {
        (q - self.discharge_mean) / self.discharge_std
    }

    /// Map normalized model outputs back to discharge units.
    pub fn rescale_discharge(&self, pred: ArrayView1<f32>) -> Array1<f32> {
        pred.mapv(|p| p * self.discharge_std + self.discharge_mean)
    }

    pub fn save(&self, dir: &Path) -> Result<()> {
        let path = dir.join(Self::FILE_NAME);
        let json = serde_json::to_string_pretty(self)?;
        fs::write(&path, json).map_err(|e| HydroError::io(&path, e))
    }

    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(Self::FILE_NAME);
        let json = fs::read_to_string(&path).map_err(|e| HydroError::io(&path, e))?;
        Ok(serde_json::from_str(&json)?)
    }
}
