//! Evaluation — NSE, per-basin inference, and static-attribute robustness.

pub mod evaluator;
pub mod metrics;
pub mod robustness;

pub use evaluator::{clamp_non_negative, BasinEvaluation, DischargeRecord, EvaluationStream, Evaluator};
pub use metrics::{nse, valid_pairs};
pub use robustness::{check_capability, RobustnessAnalyzer, RobustnessConfig, RobustnessReport, ScaleSamples};
