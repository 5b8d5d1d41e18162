use std::fs;
use std::path::Path;

use catchment::core::ModelVariant;
use catchment::data::{BasinDataset, BasinSeries, FeatureStats};
use catchment::evaluation::RobustnessReport;
use catchment::runtime::{
    eval_robustness, evaluate, results, train, CheckpointStore, EvaluateArgs, RobustnessArgs, RunConfig,
    TrainArgs,
};
use catchment::HydroError;
use chrono::NaiveDate;
use ndarray::{array, Array1, Array2};

/// Two basins covering both the validation (1989–1999) and training
/// (1999–2008) periods.
fn write_dataset(path: &Path) {
    let start = NaiveDate::from_ymd_opt(1989, 9, 1).unwrap();
    let days = (NaiveDate::from_ymd_opt(2008, 9, 30).unwrap() - start).num_days() as usize + 1;
    let basins = ["01022500", "02011400"]
        .iter()
        .enumerate()
        .map(|(k, id)| {
            BasinSeries::new(
                *id,
                start,
                Array2::from_shape_fn((days, 2), |(t, f)| ((t * (f + 1)) as f32 * 0.017 + k as f32).sin()),
                Array1::from_shape_fn(days, |t| if t % 97 == 0 { -999.0 } else { 1.5 + (t as f32 * 0.017).sin() }),
                array![k as f32, 0.5, 2.0],
            )
            .unwrap()
        })
        .collect();
    BasinDataset::new(basins).save(path).unwrap();
}

fn train_args(dataset: &Path, run_dir: &Path, variant: ModelVariant) -> TrainArgs {
    let regions = dataset.with_file_name("regions.json");
    fs::write(&regions, r#"{ "TEST": ["01022500", "02011400"] }"#).unwrap();
    TrainArgs {
        dataset: dataset.to_path_buf(),
        run_dir: run_dir.to_path_buf(),
        seed: Some(17),
        region: "TEST".into(),
        region_file: Some(regions),
        variant,
        use_mse: false,
        epochs: Some(2),
        batch_size: Some(256),
        hidden_size: Some(4),
        dropout: None,
        learning_rate: None,
        seq_length: Some(10),
        num_workers: Some(2),
        resume_from: None,
    }
}

#[test]
fn test_train_evaluate_and_robustness_round_trip() {
    let tmp = tempfile::tempdir().unwrap();
    let dataset = tmp.path().join("basins.bin");
    write_dataset(&dataset);
    let run_dir = tmp.path().join("runs").join("run_ea");

    let outcome = train(&train_args(&dataset, &run_dir, ModelVariant::EaLstm)).unwrap();
    assert_eq!(outcome.epochs.len(), 2);
    assert_eq!(outcome.config.run_name, "run_ea");

    let cfg = RunConfig::load(&run_dir).unwrap();
    assert_eq!(cfg, outcome.config);
    assert_eq!((cfg.dynamic_size, cfg.static_size), (2, 3));
    assert_eq!(CheckpointStore::new(&run_dir).epochs().unwrap(), vec![1, 2]);
    assert_eq!(FeatureStats::load(&run_dir).unwrap().n_static(), 3);

    // A second fresh run into the same directory must not overwrite cfg.json.
    assert!(train(&train_args(&dataset, &run_dir, ModelVariant::EaLstm)).is_err());

    let (path, evaluation) = evaluate(&EvaluateArgs {
        dataset: dataset.clone(),
        run_dir: run_dir.clone(),
        epoch: None,
    })
    .unwrap();
    assert_eq!(path, run_dir.join("ealstm_seed17.json"));
    let first = &evaluation["01022500"];
    assert_eq!(first.records[0].date, cfg.val_start);
    assert_eq!(first.records.last().unwrap().date, cfg.val_end);
    assert!(first.records.iter().all(|r| r.simulated >= 0.0));

    let (path, report) = eval_robustness(&RobustnessArgs {
        dataset,
        run_dir: run_dir.clone(),
        epoch: Some(1),
        seed: None,
        repetitions: Some(2),
    })
    .unwrap();
    assert_eq!(path, run_dir.join("results").join("run_ea_model_robustness.json"));
    assert_eq!(report.len(), 2);
    let back: RobustnessReport = results::read_json(&path).unwrap();
    assert_eq!(back.len(), 2);
    assert_eq!(back["02011400"][3].nse.len(), 2);
}

#[test]
fn test_resume_continues_from_checkpoint() {
    let tmp = tempfile::tempdir().unwrap();
    let dataset = tmp.path().join("basins.bin");
    write_dataset(&dataset);
    let run_dir = tmp.path().join("run_resume");

    let mut args = train_args(&dataset, &run_dir, ModelVariant::LstmConcatStatic);
    train(&args).unwrap();
    let stats_before = FeatureStats::load(&run_dir).unwrap();

    // Overrides are ignored on resume; the stored configuration governs.
    args.resume_from = Some(1);
    args.hidden_size = Some(64);
    let outcome = train(&args).unwrap();
    assert_eq!(outcome.epochs.len(), 1);
    assert_eq!(outcome.epochs[0].epoch, 2);
    assert_eq!(outcome.config.hidden_size, 4);
    assert_eq!(FeatureStats::load(&run_dir).unwrap(), stats_before);
    assert_eq!(CheckpointStore::new(&run_dir).latest_epoch().unwrap(), Some(2));
}

#[test]
fn test_robustness_rejects_standard_lstm_run() {
    let tmp = tempfile::tempdir().unwrap();
    let dataset = tmp.path().join("basins.bin");
    write_dataset(&dataset);
    let run_dir = tmp.path().join("run_lstm");

    let mut args = train_args(&dataset, &run_dir, ModelVariant::LstmNoStatic);
    args.epochs = Some(1);
    train(&args).unwrap();

    let (path, _) = evaluate(&EvaluateArgs {
        dataset: dataset.clone(),
        run_dir: run_dir.clone(),
        epoch: Some(1),
    })
    .unwrap();
    assert_eq!(path, run_dir.join("lstm_no_static_seed17.json"));

    let err = eval_robustness(&RobustnessArgs {
        dataset,
        run_dir,
        epoch: Some(1),
        seed: None,
        repetitions: Some(1),
    })
    .unwrap_err();
    assert!(matches!(err.downcast_ref::<HydroError>(), Some(HydroError::Capability(_))));
}

#[test]
fn test_evaluate_without_config_fails() {
    let tmp = tempfile::tempdir().unwrap();
    let err = evaluate(&EvaluateArgs {
        dataset: tmp.path().join("missing.bin"),
        run_dir: tmp.path().to_path_buf(),
        epoch: None,
    })
    .unwrap_err();
    assert!(matches!(err.downcast_ref::<HydroError>(), Some(HydroError::Config(_))));
}
