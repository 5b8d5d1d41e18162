//! The three run modes: train, evaluate, eval-robustness.
//!
//! Each mode reads its inputs from the run directory (`cfg.json`,
//! `feature_stats.json`, `model_epoch{N}.bin`) and the basin dataset, and
//! writes its outputs back into the run directory.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::{Duration, NaiveDate};
use rand::Rng;
use rayon::prelude::*;
use tracing::{info, warn};

use crate::config::{EVAL_BATCH_SIZE, PREFETCH_DEPTH, ROBUSTNESS_REPETITIONS};
use crate::core::model::{DischargeModel, ModelVariant};
use crate::data::basin::{BasinSeries, WindowMode};
use crate::data::batch::Sample;
use crate::data::dataset::BasinDataset;
use crate::data::provider::{BatchLoader, LoaderConfig};
use crate::data::stats::FeatureStats;
use crate::evaluation::evaluator::{EvaluationStream, Evaluator};
use crate::evaluation::robustness::{RobustnessAnalyzer, RobustnessConfig, RobustnessReport};
use crate::runtime::checkpoint::CheckpointStore;
use crate::runtime::regions::RegionCatalog;
use crate::runtime::results::{store_evaluation, store_robustness, EvaluationResults};
use crate::runtime::run_config::RunConfig;
use crate::training::loss::loss_for;
use crate::training::trainer::{EpochSummary, Trainer, TrainerConfig};

/// Directory (inside the run directory) holding robustness reports.
pub const RESULTS_DIR: &str = "results";

#[derive(Clone, Debug)]
pub struct TrainArgs {
    pub dataset: PathBuf,
    pub run_dir: PathBuf,
    /// Drawn at random when absent.
    pub seed: Option<u64>,
    pub region: String,
    /// Region catalog file replacing the built-in catalog.
    pub region_file: Option<PathBuf>,
    pub variant: ModelVariant,
    pub use_mse: bool,
    pub epochs: Option<usize>,
    pub batch_size: Option<usize>,
    pub hidden_size: Option<usize>,
    pub dropout: Option<f32>,
    pub learning_rate: Option<f32>,
    pub seq_length: Option<usize>,
    pub num_workers: Option<usize>,
    /// Continue from the checkpoint of this epoch, reusing the stored
    /// configuration and feature statistics.
    pub resume_from: Option<usize>,
}

#[derive(Clone, Debug)]
pub struct EvaluateArgs {
    pub dataset: PathBuf,
    pub run_dir: PathBuf,
    /// Checkpoint to evaluate; the run's last epoch when absent.
    pub epoch: Option<usize>,
}

#[derive(Clone, Debug)]
pub struct RobustnessArgs {
    pub dataset: PathBuf,
    pub run_dir: PathBuf,
    pub epoch: Option<usize>,
    /// Noise seed; the run's seed when absent.
    pub seed: Option<u64>,
    pub repetitions: Option<usize>,
}

/// Outcome of [`train`].
#[derive(Clone, Debug)]
pub struct TrainOutcome {
    pub config: RunConfig,
    pub epochs: Vec<EpochSummary>,
}

pub fn train(args: &TrainArgs) -> Result<TrainOutcome> {
    let dataset = BasinDataset::load(&args.dataset).context("loading basin dataset")?;

    let cfg = match args.resume_from {
        Some(epoch) => {
            let cfg = RunConfig::load(&args.run_dir).context("resuming needs the stored run configuration")?;
            let ignored = ignored_overrides(args, &cfg);
            if !ignored.is_empty() {
                warn!(
                    epoch,
                    ignored = %ignored.join(", "),
                    "resuming with the stored cfg.json; command-line settings ignored"
                );
            }
            cfg
        }
        None => {
            let cfg = fresh_config(args, &dataset)?;
            cfg.write_once(&args.run_dir)?;
            cfg
        }
    };
    info!(
        run = %cfg.run_name,
        seed = cfg.seed,
        variant = ?cfg.variant,
        basins = cfg.basins.len(),
        "run configuration ready"
    );

    let train_basins = period_slices(&dataset, &cfg, cfg.train_start, cfg.train_end)?;
    let stats = if args.resume_from.is_some() {
        FeatureStats::load(&args.run_dir)?
    } else {
        let stats = FeatureStats::from_basins(&train_basins)?;
        stats.save(&args.run_dir)?;
        stats
    };

    let per_basin: Vec<Vec<Sample>> = train_basins
        .par_iter()
        .map(|b| b.windows(cfg.seq_length, &stats, WindowMode::Train))
        .collect::<crate::Result<_>>()?;
    let samples: Vec<Sample> = per_basin.into_iter().flatten().collect();
    info!(samples = samples.len(), "training windows built");

    let loader = BatchLoader::new(
        samples,
        LoaderConfig {
            batch_size: cfg.batch_size,
            num_workers: cfg.num_workers,
            prefetch_depth: PREFETCH_DEPTH,
            shuffle: true,
            seed: cfg.seed,
        },
    )?;

    let model = DischargeModel::new(cfg.model_spec(), cfg.seed)?;
    let mut trainer = Trainer::new(model, loss_for(cfg.use_mse), TrainerConfig::from_run_config(&cfg))
        .with_checkpoints(CheckpointStore::new(&args.run_dir));
    if let Some(epoch) = args.resume_from {
        trainer = trainer.resume_from(epoch)?;
    }

    let epochs = trainer.fit(&loader)?;
    Ok(TrainOutcome { config: cfg, epochs })
}

pub fn evaluate(args: &EvaluateArgs) -> Result<(PathBuf, EvaluationResults)> {
    let run = TrainedRun::open(&args.run_dir, args.epoch)?;
    let dataset = BasinDataset::load(&args.dataset).context("loading basin dataset")?;
    let streams = evaluation_streams(&dataset, &run.cfg, &run.stats)?;

    let evaluator = Evaluator::new(&run.model, &run.stats);
    let mut results = EvaluationResults::new();
    for stream in &streams {
        let evaluation = evaluator.evaluate_basin(stream)?;
        results.insert(stream.basin_id.clone(), evaluation);
    }

    let mut scores: Vec<f64> = results.values().filter_map(|e| e.nse).collect();
    if scores.is_empty() {
        warn!("no basin has a defined NSE");
    } else {
        scores.sort_by(f64::total_cmp);
        info!(
            basins = results.len(),
            scored = scores.len(),
            median_nse = scores[scores.len() / 2],
            "evaluation finished"
        );
    }

    let path = store_evaluation(&args.run_dir, run.cfg.variant, run.cfg.seed, &results)?;
    Ok((path, results))
}

pub fn eval_robustness(args: &RobustnessArgs) -> Result<(PathBuf, RobustnessReport)> {
    let run = TrainedRun::open(&args.run_dir, args.epoch)?;
    let config = RobustnessConfig {
        repetitions: args.repetitions.unwrap_or(ROBUSTNESS_REPETITIONS),
        seed: args.seed.unwrap_or(run.cfg.seed),
        ..RobustnessConfig::default()
    };
    // Rejects models without a static pathway before any data is touched.
    let mut analyzer = RobustnessAnalyzer::new(&run.model, &run.stats, config)?;

    let dataset = BasinDataset::load(&args.dataset).context("loading basin dataset")?;
    let streams = evaluation_streams(&dataset, &run.cfg, &run.stats)?;
    let report = analyzer.analyze(&streams)?;

    let path = store_robustness(&args.run_dir.join(RESULTS_DIR), &run.cfg.run_name, &report)?;
    Ok((path, report))
}

/// Configuration, statistics and one checkpoint of a finished run.
struct TrainedRun {
    cfg: RunConfig,
    stats: FeatureStats,
    model: DischargeModel,
}

impl TrainedRun {
    fn open(run_dir: &Path, epoch: Option<usize>) -> Result<Self> {
        let cfg = RunConfig::load(run_dir)?;
        let stats = FeatureStats::load(run_dir)?;
        let epoch = epoch.unwrap_or(cfg.epochs);
        let model = CheckpointStore::new(run_dir).load_model(epoch)?;
        if model.spec() != &cfg.model_spec() {
            bail!(
                "checkpoint of epoch {} in {} does not match cfg.json",
                epoch,
                run_dir.display()
            );
        }
        info!(run = %cfg.run_name, epoch, variant = ?cfg.variant, "checkpoint loaded");
        Ok(Self { cfg, stats, model })
    }
}

fn fresh_config(args: &TrainArgs, dataset: &BasinDataset) -> Result<RunConfig> {
    let catalog = match &args.region_file {
        Some(path) => RegionCatalog::from_json_file(path)?,
        None => RegionCatalog::builtin().clone(),
    };
    let basins = catalog.basins(&args.region)?;

    let seed = args.seed.unwrap_or_else(|| rand::thread_rng().gen_range(0..1_000_000));
    let run_name = args
        .run_dir
        .file_name()
        .and_then(|n| n.to_str())
        .map(str::to_owned)
        .with_context(|| format!("run directory {} has no name", args.run_dir.display()))?;

    // Input widths follow the dataset.
    let first_id = basins
        .first()
        .with_context(|| format!("region {} has no basins", args.region))?;
    let first = dataset
        .get(first_id)
        .with_context(|| format!("basin {} is not in the dataset", first_id))?;
    let mut cfg = RunConfig::new(run_name, seed, args.region.clone(), basins.to_vec(), args.variant)?;
    cfg.dynamic_size = first.forcings.ncols();
    cfg.static_size = if cfg.variant.uses_static() { first.attributes.len() } else { 0 };

    cfg.use_mse = args.use_mse;
    if let Some(v) = args.epochs {
        cfg.epochs = v;
    }
    if let Some(v) = args.batch_size {
        cfg.batch_size = v;
    }
    if let Some(v) = args.hidden_size {
        cfg.hidden_size = v;
    }
    if let Some(v) = args.dropout {
        cfg.dropout = v;
    }
    if let Some(v) = args.learning_rate {
        cfg.learning_rate = v;
    }
    if let Some(v) = args.seq_length {
        cfg.seq_length = v;
    }
    if let Some(v) = args.num_workers {
        cfg.num_workers = v;
    }
    cfg.validate()?;
    Ok(cfg)
}

/// Settings given on the command line that a resumed run does not apply.
fn ignored_overrides(args: &TrainArgs, cfg: &RunConfig) -> Vec<&'static str> {
    let flags = [
        ("seed", args.seed.is_some_and(|v| v != cfg.seed)),
        ("region", args.region != cfg.region),
        ("region-file", args.region_file.is_some()),
        ("model variant", args.variant != cfg.variant),
        ("use-mse", args.use_mse != cfg.use_mse),
        ("epochs", args.epochs.is_some_and(|v| v != cfg.epochs)),
        ("batch-size", args.batch_size.is_some_and(|v| v != cfg.batch_size)),
        ("hidden-size", args.hidden_size.is_some_and(|v| v != cfg.hidden_size)),
        ("dropout", args.dropout.is_some_and(|v| v != cfg.dropout)),
        ("learning-rate", args.learning_rate.is_some_and(|v| v != cfg.learning_rate)),
        ("seq-length", args.seq_length.is_some_and(|v| v != cfg.seq_length)),
        ("num-workers", args.num_workers.is_some_and(|v| v != cfg.num_workers)),
    ];
    flags.into_iter().filter(|(_, set)| *set).map(|(name, _)| name).collect()
}

/// The run's basins cut to `[from, to]`.
fn period_slices(dataset: &BasinDataset, cfg: &RunConfig, from: NaiveDate, to: NaiveDate) -> Result<Vec<BasinSeries>> {
    dataset
        .select(&cfg.basins)?
        .into_iter()
        .map(|b| b.slice(from, to).map_err(Into::into))
        .collect()
}

/// Validation streams of every run basin. Each slice begins `seq_length − 1`
/// days before the validation start so the first target is the start date.
fn evaluation_streams(dataset: &BasinDataset, cfg: &RunConfig, stats: &FeatureStats) -> Result<Vec<EvaluationStream>> {
    let warmup = Duration::days(cfg.seq_length as i64 - 1);
    let slices = period_slices(dataset, cfg, cfg.val_start - warmup, cfg.val_end)?;
    slices
        .par_iter()
        .map(|s| EvaluationStream::from_series(s, cfg.seq_length, stats, EVAL_BATCH_SIZE))
        .collect::<crate::Result<Vec<_>>>()
        .map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array1, Array2};

    fn dataset(ids: &[&str], start: NaiveDate, days: usize) -> BasinDataset {
        BasinDataset::new(
            ids.iter()
                .map(|id| {
                    BasinSeries::new(
                        *id,
                        start,
                        Array2::from_shape_fn((days, 2), |(t, f)| ((t + f) as f32 * 0.1).sin()),
                        Array1::from_shape_fn(days, |t| 1.0 + (t as f32 * 0.1).sin()),
                        Array1::from(vec![1.0, 2.0, 3.0]),
                    )
                    .unwrap()
                })
                .collect(),
        )
    }

    #[test]
    fn test_fresh_config_takes_widths_from_dataset() {
        let ds = dataset(&["a"], NaiveDate::from_ymd_opt(2000, 1, 1).unwrap(), 10);
        let dir = tempfile::tempdir().unwrap();
        let region_file = dir.path().join("regions.json");
        std::fs::write(&region_file, r#"{ "T": ["a"] }"#).unwrap();

        let args = TrainArgs {
            dataset: PathBuf::new(),
            run_dir: dir.path().join("run_t"),
            seed: Some(5),
            region: "T".into(),
            region_file: Some(region_file),
            variant: ModelVariant::EaLstm,
            use_mse: false,
            epochs: Some(2),
            batch_size: None,
            hidden_size: Some(4),
            dropout: None,
            learning_rate: None,
            seq_length: None,
            num_workers: None,
            resume_from: None,
        };
        let cfg = fresh_config(&args, &ds).unwrap();
        assert_eq!(cfg.run_name, "run_t");
        assert_eq!((cfg.dynamic_size, cfg.static_size), (2, 3));
        assert_eq!((cfg.epochs, cfg.hidden_size, cfg.seed), (2, 4, 5));

        let no_static = fresh_config(
            &TrainArgs {
                variant: ModelVariant::LstmNoStatic,
                seed: None,
                ..args
            },
            &ds,
        )
        .unwrap();
        assert_eq!(no_static.static_size, 0);
        assert!(no_static.seed < 1_000_000);
    }

    #[test]
    fn test_resume_reports_differing_overrides() {
        let ds = dataset(&["a"], NaiveDate::from_ymd_opt(2000, 1, 1).unwrap(), 10);
        let dir = tempfile::tempdir().unwrap();
        let region_file = dir.path().join("regions.json");
        std::fs::write(&region_file, r#"{ "T": ["a"] }"#).unwrap();
        let args = TrainArgs {
            dataset: PathBuf::new(),
            run_dir: dir.path().join("run_r"),
            seed: Some(5),
            region: "T".into(),
            region_file: Some(region_file),
            variant: ModelVariant::EaLstm,
            use_mse: false,
            epochs: Some(2),
            batch_size: None,
            hidden_size: None,
            dropout: None,
            learning_rate: None,
            seq_length: None,
            num_workers: None,
            resume_from: None,
        };
        let cfg = fresh_config(&args, &ds).unwrap();

        let same = TrainArgs {
            region_file: None,
            resume_from: Some(1),
            ..args.clone()
        };
        assert!(ignored_overrides(&same, &cfg).is_empty());

        let changed = TrainArgs {
            epochs: Some(40),
            hidden_size: Some(cfg.hidden_size + 1),
            use_mse: true,
            ..same
        };
        assert_eq!(ignored_overrides(&changed, &cfg), vec!["use-mse", "epochs", "hidden-size"]);
    }

    #[test]
    fn test_evaluation_slice_includes_warmup() {
        let start = NaiveDate::from_ymd_opt(1989, 1, 1).unwrap();
        let ds = dataset(&["a"], start, 400);
        let mut cfg = RunConfig::new("r", 1, "T", vec!["a".into()], ModelVariant::EaLstm).unwrap();
        cfg.seq_length = 10;
        cfg.val_start = NaiveDate::from_ymd_opt(1989, 6, 1).unwrap();
        cfg.val_end = NaiveDate::from_ymd_opt(1989, 6, 30).unwrap();

        let stats = FeatureStats::identity(2, 3);
        let streams = evaluation_streams(&ds, &cfg, &stats).unwrap();
        assert_eq!(streams.len(), 1);
        assert_eq!(streams[0].first_date, cfg.val_start);
        assert_eq!(streams[0].len(), 30);
    }
}
