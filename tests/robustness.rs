use catchment::core::{DischargeModel, ModelSpec, ModelVariant};
use catchment::data::{BasinSeries, FeatureStats};
use catchment::evaluation::{EvaluationStream, Evaluator, RobustnessAnalyzer, RobustnessConfig};
use catchment::HydroError;
use chrono::NaiveDate;
use ndarray::{array, Array1, Array2};

fn basins() -> Vec<BasinSeries> {
    ["01022500", "08013000"]
        .iter()
        .enumerate()
        .map(|(k, id)| {
            let phase = k as f32;
            BasinSeries::new(
                *id,
                NaiveDate::from_ymd_opt(1989, 10, 1).unwrap(),
                Array2::from_shape_fn((120, 3), |(t, f)| ((t + f) as f32 * 0.2 + phase).sin()),
                Array1::from_shape_fn(120, |t| 2.0 + (t as f32 * 0.2 + phase).sin()),
                array![0.2 + phase, 1.0, -0.5, 3.0],
            )
            .unwrap()
        })
        .collect()
}

fn model(variant: ModelVariant) -> DischargeModel {
    DischargeModel::new(
        ModelSpec {
            variant,
            dynamic_size: 3,
            static_size: 4,
            hidden_size: 8,
            dropout: 0.4,
            initial_forget_bias: 5.0,
        },
        21,
    )
    .unwrap()
}

#[test]
fn test_scale_zero_matches_unperturbed_evaluation() {
    let basins = basins();
    let stats = FeatureStats::from_basins(&basins).unwrap();
    let streams: Vec<EvaluationStream> = basins
        .iter()
        .map(|b| EvaluationStream::from_series(b, 10, &stats, 32).unwrap())
        .collect();
    let m = model(ModelVariant::EaLstm);

    let config = RobustnessConfig {
        repetitions: 3,
        seed: 4,
        ..RobustnessConfig::default()
    };
    let report = RobustnessAnalyzer::new(&m, &stats, config)
        .unwrap()
        .analyze(&streams)
        .unwrap();
    assert_eq!(report.len(), 2);

    let evaluator = Evaluator::new(&m, &stats);
    for stream in &streams {
        let samples = &report[&stream.basin_id];
        assert_eq!(samples.len(), 11);
        assert_eq!(samples[0].scale, 0.0);
        assert_eq!(samples[0].nse.len(), 1);
        assert!(samples[1..].iter().all(|s| s.nse.len() == 3));

        let clean = evaluator.evaluate_basin(stream).unwrap().nse.unwrap();
        assert!((samples[0].nse[0] - clean).abs() < 1e-6);
    }
}

#[test]
fn test_standard_cells_are_rejected() {
    let stats = FeatureStats::from_basins(&basins()).unwrap();
    for variant in [ModelVariant::LstmConcatStatic, ModelVariant::LstmNoStatic] {
        let m = model(variant);
        let err = RobustnessAnalyzer::new(&m, &stats, RobustnessConfig::default()).err();
        assert!(matches!(err, Some(HydroError::Capability(_))), "{:?} accepted", variant);
    }
}
