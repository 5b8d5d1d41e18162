//! Inference over one basin: predict, rescale, clamp, score.

use chrono::{Duration, NaiveDate};
use ndarray::{Array1, ArrayView1};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::core::model::DischargeModel;
use crate::data::basin::{BasinSeries, WindowMode};
use crate::data::batch::Batch;
use crate::data::provider::sequential_batches;
use crate::data::stats::FeatureStats;
use crate::error::{HydroError, Result};
use crate::evaluation::metrics::nse;

/// All evaluation batches of one basin, in temporal order.
#[derive(Clone, Debug)]
pub struct EvaluationStream {
    pub basin_id: String,

    /// Date of the first target.
    pub first_date: NaiveDate,

    pub batches: Vec<Batch>,
}

impl EvaluationStream {
    /// Window `series` for evaluation. The first target falls on
    /// `series.start + seq_len − 1` days.
    pub fn from_series(
        series: &BasinSeries,
        seq_len: usize,
        stats: &FeatureStats,
        batch_size: usize,
    ) -> Result<Self> {
        let samples = series.windows(seq_len, stats, WindowMode::Eval)?;
        if samples.is_empty() {
            return Err(HydroError::Config(format!(
                "basin {} has fewer than {} days in the evaluation period",
                series.basin_id, seq_len
            )));
        }
        Ok(Self {
            basin_id: series.basin_id.clone(),
            first_date: series.first_target_date(seq_len),
            batches: sequential_batches(&samples, batch_size)?,
        })
    }

    pub fn len(&self) -> usize {
        self.batches.iter().map(Batch::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One row of the evaluation table.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct DischargeRecord {
    pub date: NaiveDate,
    pub observed: f32,
    pub simulated: f32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BasinEvaluation {
    pub basin_id: String,
    pub records: Vec<DischargeRecord>,
    pub nse: Option<f64>,
}

/// Negative discharge is physically meaningless; clamp it to zero.
pub fn clamp_non_negative(mut pred: Array1<f32>) -> Array1<f32> {
    pred.mapv_inplace(|q| if q < 0.0 { 0.0 } else { q });
    pred
}

/// Read-only inference with a trained model.
pub struct Evaluator<'a> {
    model: &'a DischargeModel,
    stats: &'a FeatureStats,
}

impl<'a> Evaluator<'a> {
    pub fn new(model: &'a DischargeModel, stats: &'a FeatureStats) -> Self {
        Self { model, stats }
    }

    pub fn model(&self) -> &DischargeModel {
        self.model
    }

    /// Observed and simulated discharge (physical units, clamped) of every
    /// sample of `batches`, in order. `noise` is added to each batch's
    /// static attributes first.
    pub fn simulate(&self, batches: &[Batch], noise: Option<ArrayView1<f32>>) -> Result<(Vec<f32>, Vec<f32>)> {
        let mut observed = Vec::new();
        let mut simulated = Vec::new();

        for batch in batches {
            let noisy;
            let batch = match noise {
                Some(n) => {
                    noisy = batch.with_static_noise(n)?;
                    &noisy
                }
                None => batch,
            };
            let pred = self
                .model
                .predict(batch.x_dyn.view(), batch.x_static.as_ref().map(|s| s.view()))?;
            let rescaled = clamp_non_negative(self.stats.rescale_discharge(pred.view()));

            observed.extend(batch.targets.iter().copied());
            simulated.extend(rescaled.iter().copied());
        }

        Ok((observed, simulated))
    }

    /// Full evaluation table and NSE of one basin.
    pub fn evaluate_basin(&self, stream: &EvaluationStream) -> Result<BasinEvaluation> {
        let (observed, simulated) = self.simulate(&stream.batches, None)?;
        let nse = nse(&observed, &simulated);
        match nse {
            Some(value) => debug!(basin = %stream.basin_id, nse = value, "basin evaluated"),
            None => warn!(basin = %stream.basin_id, "NSE undefined: no valid observations with variance"),
        }

        let records = observed
            .iter()
            .zip(&simulated)
            .enumerate()
            .map(|(i, (&o, &s))| DischargeRecord {
                date: stream.first_date + Duration::days(i as i64),
                observed: o,
                simulated: s,
            })
            .collect();

        Ok(BasinEvaluation {
            basin_id: stream.basin_id.clone(),
            records,
            nse,
        })
    }

    /// NSE of one basin with `noise` added to its static attributes.
    pub fn nse_with_static_noise(&self, batches: &[Batch], noise: ArrayView1<f32>) -> Result<Option<f64>> {
        let (observed, simulated) = self.simulate(batches, Some(noise))?;
        Ok(nse(&observed, &simulated))
    }
}
