//! Runtime: run configuration, region catalog, checkpoints, result files,
//! and the train / evaluate / eval-robustness sessions driven by the CLI.

pub mod checkpoint;
pub mod regions;
pub mod results;
pub mod run_config;
pub mod session;

pub use checkpoint::CheckpointStore;
pub use regions::RegionCatalog;
pub use results::{evaluation_file_name, robustness_file_name, EvaluationResults};
pub use run_config::RunConfig;
pub use session::{eval_robustness, evaluate, train, EvaluateArgs, RobustnessArgs, TrainArgs, TrainOutcome};
