//! # catchment
//!
//! **Entity-aware LSTM for regional hydrology** — trains a recurrent
//! regression model that predicts daily river discharge from meteorological
//! forcings and static catchment attributes.
//!
//! ## Components
//!
//! 1. **Recurrent cells** — standard LSTM and the entity-aware LSTM whose
//!    input gate is driven by static attributes only
//! 2. **Regression head** — dropout + affine projection to discharge
//! 3. **Losses** — plain MSE and the basin-variance-normalized NSE loss
//! 4. **Trainer** — epoch loop with Adam, global-norm clipping, step LR schedule
//! 5. **Evaluator** — inference, rescaling, non-negativity clamp, NSE
//! 6. **Robustness analyzer** — Gaussian noise on static attributes vs. NSE
//!
//! ## Data flow
//!
//! ```text
//! DataProvider → Batch → DischargeModel (cell + head) → prediction
//!             → LossFunction → gradients → clip → Adam → checkpoint
//! ```

pub mod core;
pub mod data;
pub mod error;
pub mod evaluation;
pub mod runtime;
pub mod training;

pub use error::{HydroError, Result};

/// Run-wide defaults.
pub mod config {
    /// Sequence length (days of forcing per sample).
    pub const SEQ_LENGTH: usize = 270;

    /// Initial value of the forget-gate bias.
    pub const INITIAL_FORGET_BIAS: f32 = 5.0;

    /// Global gradient-norm clipping threshold.
    pub const CLIP_VALUE: f32 = 1.0;

    /// Whether gradient clipping is enabled by default.
    pub const CLIP_NORM: bool = true;

    /// Epsilon added to the basin discharge std in the NSE loss.
    pub const NSE_LOSS_EPS: f32 = 0.1;

    /// Default number of training epochs.
    pub const EPOCHS: usize = 30;

    /// Default batch size.
    pub const BATCH_SIZE: usize = 256;

    /// Default hidden size of the recurrent cell.
    pub const HIDDEN_SIZE: usize = 256;

    /// Default dropout rate of the regression head.
    pub const DROPOUT: f32 = 0.4;

    /// Default initial learning rate.
    pub const LEARNING_RATE: f32 = 1e-3;

    /// Learning-rate drops: (epoch, new learning rate).
    pub const LR_DROPS: [(usize, f32); 2] = [(11, 5e-4), (21, 1e-4)];

    /// Number of batches between training progress log lines.
    pub const LOG_INTERVAL: usize = 50;

    /// Number of dynamic forcing features.
    pub const N_DYNAMIC: usize = 5;

    /// Number of static catchment attributes.
    pub const N_STATIC: usize = 27;

    /// Default number of data loading workers.
    pub const NUM_WORKERS: usize = 12;

    /// Default prefetch queue depth (batches buffered ahead of compute).
    pub const PREFETCH_DEPTH: usize = 4;

    /// Batch size used for inference.
    pub const EVAL_BATCH_SIZE: usize = 1024;

    /// Training period (year, month, day), inclusive.
    pub const TRAIN_START: (i32, u32, u32) = (1999, 10, 1);
    pub const TRAIN_END: (i32, u32, u32) = (2008, 9, 30);

    /// Validation period (year, month, day), inclusive.
    pub const VAL_START: (i32, u32, u32) = (1989, 10, 1);
    pub const VAL_END: (i32, u32, u32) = (1999, 9, 30);

    /// Default region code.
    pub const REGION: &str = "US";

    /// Robustness analysis: repetitions per nonzero noise scale.
    pub const ROBUSTNESS_REPETITIONS: usize = 50;

    /// Robustness analysis: number of noise scale steps above zero.
    pub const ROBUSTNESS_SCALE_STEPS: usize = 10;

    /// Robustness analysis: increment between noise scales.
    pub const ROBUSTNESS_SCALE_STEP: f32 = 0.1;

    /// Noise scales used by the robustness analysis (0.0, 0.1, ..., 1.0).
    pub fn robustness_scales() -> Vec<f32> {
        (0..=ROBUSTNESS_SCALE_STEPS)
            .map(|i| i as f32 * ROBUSTNESS_SCALE_STEP)
            .collect()
    }
}
