//! Daily time series of one basin and its windowing into sequences.

use chrono::{Duration, NaiveDate};
use ndarray::{s, Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::data::batch::Sample;
use crate::data::stats::FeatureStats;
use crate::error::{HydroError, Result};

/// Whether an observed discharge value is usable (non-negative, not NaN).
pub fn is_valid_discharge(q: f32) -> bool {
    q >= 0.0
}

/// Forcings, discharge and raw static attributes of one basin.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BasinSeries {
    pub basin_id: String,

    /// Date of the first row.
    pub start: NaiveDate,

    /// Raw dynamic forcings: [days, n_dyn]
    pub forcings: Array2<f32>,

    /// Raw discharge: [days]. Negative or NaN marks a missing observation.
    pub discharge: Array1<f32>,

    /// Raw static attributes: [n_static]
    pub attributes: Array1<f32>,
}

/// How [`BasinSeries::windows`] treats targets.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WindowMode {
    /// Normalized targets, windows with a missing target dropped, basin
    /// discharge std attached.
    Train,
    /// Raw targets, every window kept in temporal order.
    Eval,
}

impl BasinSeries {
    pub fn new(
        basin_id: impl Into<String>,
        start: NaiveDate,
        forcings: Array2<f32>,
        discharge: Array1<f32>,
        attributes: Array1<f32>,
    ) -> Result<Self> {
        let basin_id = basin_id.into();
        if forcings.nrows() != discharge.len() {
            return Err(HydroError::Shape(format!(
                "basin {}: {} forcing rows but {} discharge values",
                basin_id,
                forcings.nrows(),
                discharge.len()
            )));
        }
        Ok(Self {
            basin_id,
            start,
            forcings,
            discharge,
            attributes,
        })
    }

    pub fn days(&self) -> usize {
        self.discharge.len()
    }

    pub fn date_at(&self, index: usize) -> NaiveDate {
        self.start + Duration::days(index as i64)
    }

    /// Last date covered by the series.
    pub fn end(&self) -> Option<NaiveDate> {
        self.days().checked_sub(1).map(|last| self.date_at(last))
    }

    /// Sub-series covering `[from, to]` (inclusive), clipped to the data
    /// actually present.
    pub fn slice(&self, from: NaiveDate, to: NaiveDate) -> Result<Self> {
        let days = self.days() as i64;
        let first = (from - self.start).num_days().max(0);
        let last = (to - self.start).num_days().min(days - 1);
        if first > last {
            return Err(HydroError::Config(format!(
                "basin {} has no data between {} and {}",
                self.basin_id, from, to
            )));
        }
        let (first, last) = (first as usize, last as usize);

        Ok(Self {
            basin_id: self.basin_id.clone(),
            start: self.date_at(first),
            forcings: self.forcings.slice(s![first..=last, ..]).to_owned(),
            discharge: self.discharge.slice(s![first..=last]).to_owned(),
            attributes: self.attributes.clone(),
        })
    }

    /// Sample std (ddof = 1) of the valid discharge observations.
    pub fn discharge_std(&self) -> f32 {
        let valid: Vec<f64> = self
            .discharge
            .iter()
            .filter(|&&q| is_valid_discharge(q))
            .map(|&q| q as f64)
            .collect();
        if valid.len() < 2 {
            return 0.0;
        }
        let n = valid.len() as f64;
        let mean = valid.iter().sum::<f64>() / n;
        let var = valid.iter().map(|q| (q - mean).powi(2)).sum::<f64>() / (n - 1.0);
        var.sqrt() as f32
    }

    /// Number of length-`seq_len` windows the series holds.
    pub fn window_count(&self, seq_len: usize) -> usize {
        if seq_len == 0 {
            return 0;
        }
        (self.days() + 1).saturating_sub(seq_len)
    }

    /// Date of the target of the first window.
    pub fn first_target_date(&self, seq_len: usize) -> NaiveDate {
        self.date_at(seq_len.saturating_sub(1))
    }

    /// Cut the series into sequences of `seq_len` days, each labelled with
    /// the discharge of its last day.
    pub fn windows(&self, seq_len: usize, stats: &FeatureStats, mode: WindowMode) -> Result<Vec<Sample>> {
        if seq_len == 0 {
            return Err(HydroError::Config("sequence length must be positive".into()));
        }
        let forcings = stats.normalize_dynamic(&self.forcings)?;
        let x_static = stats.normalize_static(&self.attributes)?;
        let q_std = self.discharge_std();

        let mut samples = Vec::with_capacity(self.window_count(seq_len));
        for end in (seq_len - 1)..self.days() {
            let raw = self.discharge[end];
            let (target, q_std) = match mode {
                WindowMode::Train => {
                    if !is_valid_discharge(raw) {
                        continue;
                    }
                    (stats.normalize_discharge(raw), Some(q_std))
                }
                WindowMode::Eval => (raw, None),
            };
            samples.push(Sample {
                x_dyn: forcings.slice(s![end + 1 - seq_len..=end, ..]).to_owned(),
                x_static: x_static.clone(),
                target,
                q_std,
            });
        }
        Ok(samples)
    }
}
