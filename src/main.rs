//! CATCHMENT — entity-aware LSTM for regional rainfall-runoff modelling.
//!
//! This is the CLI binary entry point.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};

use catchment::config::REGION;
use catchment::core::ModelVariant;
use catchment::runtime::{self, EvaluateArgs, RobustnessArgs, TrainArgs};

/// CATCHMENT training and evaluation CLI.
#[derive(Parser, Debug)]
#[command(
    name = "catchment",
    about = "CATCHMENT — entity-aware LSTM discharge model",
    version
)]
struct Cli {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand, Debug)]
enum Mode {
    /// Train a model and checkpoint it every epoch.
    Train(TrainCmd),
    /// Evaluate a trained model on the validation period.
    Evaluate(EvaluateCmd),
    /// Measure NSE under Gaussian noise on the static attributes.
    EvalRobustness(RobustnessCmd),
}

#[derive(Args, Debug)]
struct RunLocation {
    /// Basin dataset file (bincode).
    #[arg(long)]
    dataset: PathBuf,

    /// Run directory holding cfg.json, statistics and checkpoints.
    #[arg(long)]
    run_dir: PathBuf,
}

#[derive(Args, Debug)]
struct TrainCmd {
    #[command(flatten)]
    location: RunLocation,

    /// Random seed; drawn at random when omitted.
    #[arg(long)]
    seed: Option<u64>,

    /// Region whose basins are trained on.
    #[arg(long, default_value = REGION)]
    region: String,

    /// JSON region catalog replacing the built-in one.
    #[arg(long)]
    region_file: Option<PathBuf>,

    /// Standard LSTM without static attributes.
    #[arg(long)]
    no_static: bool,

    /// Standard LSTM with static attributes appended to every timestep.
    #[arg(long)]
    concat_static: bool,

    /// Train with MSE instead of the NSE loss.
    #[arg(long)]
    use_mse: bool,

    #[arg(long)]
    epochs: Option<usize>,

    #[arg(long)]
    batch_size: Option<usize>,

    #[arg(long)]
    hidden_size: Option<usize>,

    #[arg(long)]
    dropout: Option<f32>,

    #[arg(long)]
    learning_rate: Option<f32>,

    /// Days of forcing per sample.
    #[arg(long)]
    seq_length: Option<usize>,

    /// Batch assembly workers.
    #[arg(long)]
    num_workers: Option<usize>,

    /// Continue the run from the checkpoint of this epoch.
    #[arg(long)]
    resume_from: Option<usize>,
}

#[derive(Args, Debug)]
struct EvaluateCmd {
    #[command(flatten)]
    location: RunLocation,

    /// Checkpoint epoch; the run's last epoch when omitted.
    #[arg(long)]
    epoch: Option<usize>,
}

#[derive(Args, Debug)]
struct RobustnessCmd {
    #[command(flatten)]
    location: RunLocation,

    #[arg(long)]
    epoch: Option<usize>,

    /// Noise seed; the run's seed when omitted.
    #[arg(long)]
    seed: Option<u64>,

    /// Repetitions per nonzero noise scale.
    #[arg(long)]
    repetitions: Option<usize>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    tracing::info!("CATCHMENT v{}", env!("CARGO_PKG_VERSION"));

    match cli.mode {
        Mode::Train(cmd) => {
            let outcome = runtime::train(&TrainArgs {
                dataset: cmd.location.dataset,
                run_dir: cmd.location.run_dir,
                seed: cmd.seed,
                region: cmd.region,
                region_file: cmd.region_file,
                variant: ModelVariant::from_flags(cmd.no_static, cmd.concat_static),
                use_mse: cmd.use_mse,
                epochs: cmd.epochs,
                batch_size: cmd.batch_size,
                hidden_size: cmd.hidden_size,
                dropout: cmd.dropout,
                learning_rate: cmd.learning_rate,
                seq_length: cmd.seq_length,
                num_workers: cmd.num_workers,
                resume_from: cmd.resume_from,
            })?;
            if let Some(last) = outcome.epochs.last() {
                tracing::info!(
                    "Run {} (seed {}) finished: epoch {}, mean loss {:.5}",
                    outcome.config.run_name,
                    outcome.config.seed,
                    last.epoch,
                    last.mean_loss,
                );
            }
        }
        Mode::Evaluate(cmd) => {
            let (path, results) = runtime::evaluate(&EvaluateArgs {
                dataset: cmd.location.dataset,
                run_dir: cmd.location.run_dir,
                epoch: cmd.epoch,
            })?;
            tracing::info!("Evaluated {} basins → {}", results.len(), path.display());
        }
        Mode::EvalRobustness(cmd) => {
            let (path, report) = runtime::eval_robustness(&RobustnessArgs {
                dataset: cmd.location.dataset,
                run_dir: cmd.location.run_dir,
                epoch: cmd.epoch,
                seed: cmd.seed,
                repetitions: cmd.repetitions,
            })?;
            tracing::info!("Robustness of {} basins → {}", report.len(), path.display());
        }
    }

    tracing::info!("Done.");
    Ok(())
}
