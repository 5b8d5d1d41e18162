use catchment::core::{DischargeModel, ModelSpec, ModelVariant};
use catchment::data::{BasinSeries, BatchLoader, FeatureStats, LoaderConfig, WindowMode};
use catchment::evaluation::{EvaluationStream, Evaluator};
use catchment::training::{NseLoss, StepSchedule, Trainer, TrainerConfig};
use chrono::NaiveDate;
use ndarray::{array, Array1, Array2};

const SEQ_LEN: usize = 8;

/// Discharge is a linear function of the same day's first forcing.
fn linear_basin(id: &str, days: usize, attributes: Array1<f32>) -> BasinSeries {
    let forcing = |t: usize| (t as f32 * 0.37).sin() + 0.5 * (t as f32 * 1.3).cos();
    BasinSeries::new(
        id,
        NaiveDate::from_ymd_opt(1995, 1, 1).unwrap(),
        Array2::from_shape_fn((days, 2), |(t, f)| if f == 0 { forcing(t) } else { (t as f32 * 0.05).cos() }),
        Array1::from_shape_fn(days, |t| 3.0 + forcing(t)),
        attributes,
    )
    .unwrap()
}

#[test]
fn test_ealstm_learns_linear_basin() {
    let full = linear_basin("01022500", 1500, array![0.3, 1.2]);
    let split = full.date_at(1200);
    let train = full.slice(full.start, split).unwrap();
    let held_out = full
        .slice(split - chrono::Duration::days(SEQ_LEN as i64 - 1), full.end().unwrap())
        .unwrap();

    let stats = FeatureStats::from_basins(std::slice::from_ref(&train)).unwrap();
    let samples = train.windows(SEQ_LEN, &stats, WindowMode::Train).unwrap();
    let loader = BatchLoader::new(
        samples,
        LoaderConfig {
            batch_size: 32,
            num_workers: 2,
            seed: 11,
            ..LoaderConfig::default()
        },
    )
    .unwrap();

    let model = DischargeModel::new(
        ModelSpec {
            variant: ModelVariant::EaLstm,
            dynamic_size: 2,
            static_size: 2,
            hidden_size: 16,
            dropout: 0.0,
            // Target depends on the current day only; start without long memory.
            initial_forget_bias: 0.0,
        },
        7,
    )
    .unwrap();
    let mut trainer = Trainer::new(
        model,
        Box::new(NseLoss::default()),
        TrainerConfig {
            epochs: 30,
            schedule: StepSchedule::constant(0.01),
            seed: 7,
            ..TrainerConfig::default()
        },
    );
    let summaries = trainer.fit(&loader).unwrap();
    assert!(summaries.iter().all(|s| s.mean_loss.is_finite()));

    let model = trainer.into_model();
    let stream = EvaluationStream::from_series(&held_out, SEQ_LEN, &stats, 64).unwrap();
    let evaluation = Evaluator::new(&model, &stats).evaluate_basin(&stream).unwrap();

    assert_eq!(evaluation.records.len(), 300);
    assert_eq!(evaluation.records[0].date, split);
    let nse = evaluation.nse.unwrap();
    assert!(nse > 0.9, "held-out NSE {}", nse);
}

#[test]
fn test_simulated_discharge_is_never_negative() {
    let basin = linear_basin("01022500", 60, array![0.3, 1.2]);
    // Shift the scale so that untrained predictions straddle zero.
    let mut stats = FeatureStats::from_basins(std::slice::from_ref(&basin)).unwrap();
    stats.discharge_mean = 0.0;

    let model = DischargeModel::new(
        ModelSpec {
            variant: ModelVariant::LstmConcatStatic,
            dynamic_size: 2,
            static_size: 2,
            hidden_size: 8,
            dropout: 0.0,
            initial_forget_bias: 5.0,
        },
        1,
    )
    .unwrap();
    let stream = EvaluationStream::from_series(&basin, SEQ_LEN, &stats, 16).unwrap();
    let evaluation = Evaluator::new(&model, &stats).evaluate_basin(&stream).unwrap();
    assert_eq!(evaluation.records.len(), 60 - SEQ_LEN + 1);
    assert!(evaluation.records.iter().all(|r| r.simulated >= 0.0));
}
