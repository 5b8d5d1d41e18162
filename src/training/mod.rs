//! Training — losses, Adam, gradient clipping, step schedule, phase
//! instrumentation, and the epoch loop.

pub mod clip;
pub mod loss;
pub mod optimizer;
pub mod phases;
pub mod scheduler;
pub mod trainer;

pub use loss::{loss_for, LossFunction, MseLoss, NseLoss};
pub use optimizer::Adam;
pub use phases::{NoopCollector, PhaseCollector, PhaseTimings, TimingCollector};
pub use scheduler::{Scheduler, StepSchedule};
pub use trainer::{EpochSummary, StepReport, Trainer, TrainerConfig};
