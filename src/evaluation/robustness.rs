//! Sensitivity of basin NSE to Gaussian noise on the static attributes.
//!
//! For each noise scale σ, draw `ε ~ N(0, σ²·I)` of the static width, add it
//! to every sequence of the basin, and record the NSE. Scale 0 is evaluated
//! once since noise of zero width changes nothing.

use std::collections::BTreeMap;

use ndarray::Array1;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::info;

use crate::config::{robustness_scales, ROBUSTNESS_REPETITIONS};
use crate::core::model::{DischargeModel, ModelVariant};
use crate::data::stats::FeatureStats;
use crate::error::{HydroError, Result};
use crate::evaluation::evaluator::{EvaluationStream, Evaluator};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RobustnessConfig {
    /// Noise standard deviations, ascending.
    pub scales: Vec<f32>,

    /// Repetitions per nonzero scale.
    pub repetitions: usize,

    pub seed: u64,
}

impl Default for RobustnessConfig {
    fn default() -> Self {
        Self {
            scales: robustness_scales(),
            repetitions: ROBUSTNESS_REPETITIONS,
            seed: 0,
        }
    }
}

impl RobustnessConfig {
    /// Repetitions actually run at `scale`.
    pub fn repetitions_at(&self, scale: f32) -> usize {
        if scale == 0.0 {
            1
        } else {
            self.repetitions
        }
    }
}

/// NSE samples of one noise scale. Undefined NSE values are stored as NaN.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScaleSamples {
    pub scale: f32,
    /// JSON writes NaN as `null`; read it back as NaN.
    #[serde(deserialize_with = "nan_from_null")]
    pub nse: Vec<f64>,
}

fn nan_from_null<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Vec<f64>, D::Error> {
    let values = Vec::<Option<f64>>::deserialize(deserializer)?;
    Ok(values.into_iter().map(|v| v.unwrap_or(f64::NAN)).collect())
}

/// basin → samples per scale, in scale order.
pub type RobustnessReport = BTreeMap<String, Vec<ScaleSamples>>;

/// Fails unless the variant has a dedicated static-attribute pathway.
pub fn check_capability(variant: ModelVariant) -> Result<()> {
    if variant.is_entity_aware() {
        Ok(())
    } else {
        Err(HydroError::Capability(format!(
            "robustness analysis needs an entity-aware model, checkpoint is {:?}",
            variant
        )))
    }
}

pub struct RobustnessAnalyzer<'a> {
    evaluator: Evaluator<'a>,
    config: RobustnessConfig,
    rng: StdRng,
}

impl<'a> RobustnessAnalyzer<'a> {
    /// Checks the model's capability before any evaluation work.
    pub fn new(model: &'a DischargeModel, stats: &'a FeatureStats, config: RobustnessConfig) -> Result<Self> {
        check_capability(model.variant())?;
        if let Some(bad) = config.scales.iter().find(|s| !s.is_finite() || **s < 0.0) {
            return Err(HydroError::Config(format!("invalid noise scale {}", bad)));
        }
        Ok(Self {
            evaluator: Evaluator::new(model, stats),
            rng: StdRng::seed_from_u64(config.seed),
            config,
        })
    }

    fn noise(&mut self, scale: f32, width: usize) -> Result<Array1<f32>> {
        if scale == 0.0 {
            return Ok(Array1::zeros(width));
        }
        let dist = Normal::new(0.0f32, scale).map_err(|e| HydroError::Config(e.to_string()))?;
        Ok(Array1::from_shape_fn(width, |_| dist.sample(&mut self.rng)))
    }

    pub fn analyze_basin(&mut self, stream: &EvaluationStream) -> Result<Vec<ScaleSamples>> {
        let width = self.evaluator.model().static_size();
        let scales = self.config.scales.clone();
        let mut out = Vec::with_capacity(scales.len());

        for scale in scales {
            let reps = self.config.repetitions_at(scale);
            let mut nse = Vec::with_capacity(reps);
            for _ in 0..reps {
                let noise = self.noise(scale, width)?;
                let value = self.evaluator.nse_with_static_noise(&stream.batches, noise.view())?;
                nse.push(value.unwrap_or(f64::NAN));
            }
            out.push(ScaleSamples { scale, nse });
        }
        Ok(out)
    }

    pub fn analyze(&mut self, streams: &[EvaluationStream]) -> Result<RobustnessReport> {
        let mut report = RobustnessReport::new();
        for (i, stream) in streams.iter().enumerate() {
            let samples = self.analyze_basin(stream)?;
            info!(
                basin = %stream.basin_id,
                done = i + 1,
                total = streams.len(),
                "robustness analysis"
            );
            report.insert(stream.basin_id.clone(), samples);
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::ModelSpec;
    use crate::data::basin::BasinSeries;
    use chrono::NaiveDate;
    use ndarray::{array, Array2};

    fn model(variant: ModelVariant) -> DischargeModel {
        DischargeModel::new(
            ModelSpec {
                variant,
                dynamic_size: 1,
                static_size: 3,
                hidden_size: 4,
                dropout: 0.0,
                initial_forget_bias: 5.0,
            },
            5,
        )
        .unwrap()
    }

    /// Identity scaling around the observed discharge level, so untrained
    /// predictions stay clear of the zero clamp.
    fn level_stats() -> FeatureStats {
        FeatureStats {
            discharge_mean: 2.0,
            ..FeatureStats::identity(1, 3)
        }
    }

    fn stream(stats: &FeatureStats) -> EvaluationStream {
        let days = 30;
        let series = BasinSeries::new(
            "02011400",
            NaiveDate::from_ymd_opt(1990, 1, 1).unwrap(),
            Array2::from_shape_fn((days, 1), |(t, _)| (t as f32 * 0.5).cos()),
            Array1::from_shape_fn(days, |t| 2.0 + (t as f32 * 0.5).cos()),
            array![0.1, -0.4, 0.9],
        )
        .unwrap();
        EvaluationStream::from_series(&series, 6, stats, 10).unwrap()
    }

    fn small_config() -> RobustnessConfig {
        RobustnessConfig {
            scales: vec![0.0, 0.5, 1.0],
            repetitions: 4,
            seed: 3,
        }
    }

    #[test]
    fn test_default_grid() {
        let cfg = RobustnessConfig::default();
        assert_eq!(cfg.scales.len(), 11);
        assert!((cfg.scales[10] - 1.0).abs() < 1e-6);
        assert_eq!(cfg.repetitions_at(0.0), 1);
        assert_eq!(cfg.repetitions_at(0.3), 50);
    }

    #[test]
    fn test_rejects_standard_cells_before_any_work() {
        let stats = FeatureStats::identity(1, 3);
        for variant in [ModelVariant::LstmConcatStatic, ModelVariant::LstmNoStatic] {
            let m = model(variant);
            assert!(matches!(
                RobustnessAnalyzer::new(&m, &stats, small_config()),
                Err(HydroError::Capability(_))
            ));
        }
    }

    #[test]
    fn test_sample_counts_per_scale() {
        let stats = level_stats();
        let m = model(ModelVariant::EaLstm);
        let mut analyzer = RobustnessAnalyzer::new(&m, &stats, small_config()).unwrap();
        let report = analyzer.analyze(&[stream(&stats)]).unwrap();

        let samples = &report["02011400"];
        let counts: Vec<usize> = samples.iter().map(|s| s.nse.len()).collect();
        assert_eq!(counts, vec![1, 4, 4]);
        assert_eq!(samples[1].scale, 0.5);
    }

    #[test]
    fn test_scale_zero_reproduces_evaluator() {
        let stats = level_stats();
        let m = model(ModelVariant::EaLstm);
        let s = stream(&stats);
        let clean = Evaluator::new(&m, &stats).evaluate_basin(&s).unwrap();
        assert!(clean.records.iter().all(|r| r.simulated > 0.0));
        let baseline = clean.nse.unwrap();

        let mut analyzer = RobustnessAnalyzer::new(&m, &stats, small_config()).unwrap();
        let samples = analyzer.analyze_basin(&s).unwrap();
        assert!((samples[0].nse[0] - baseline).abs() < 1e-6);
    }

    #[test]
    fn test_noise_changes_predictions() {
        let stats = level_stats();
        let m = model(ModelVariant::EaLstm);
        let mut analyzer = RobustnessAnalyzer::new(&m, &stats, small_config()).unwrap();
        let samples = analyzer.analyze_basin(&stream(&stats)).unwrap();
        let clean = samples[0].nse[0];
        assert!(samples[2].nse.iter().all(|v| v.is_finite()));
        assert!(samples[2].nse.iter().all(|v| (v - clean).abs() > 1e-9));
        assert!(samples[2].nse.windows(2).any(|w| (w[0] - w[1]).abs() > 1e-9));
    }

    #[test]
    fn test_same_seed_same_report() {
        let stats = level_stats();
        let m = model(ModelVariant::EaLstm);
        let s = [stream(&stats)];
        let a = RobustnessAnalyzer::new(&m, &stats, small_config()).unwrap().analyze(&s).unwrap();
        let b = RobustnessAnalyzer::new(&m, &stats, small_config()).unwrap().analyze(&s).unwrap();
        assert_eq!(a, b);
    }
}
