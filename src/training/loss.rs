//! Loss strategies.
//!
//! - [`MseLoss`]: `mean((pred − obs)²)`
//! - [`NseLoss`]: `mean((pred − obs)² / (std_b + ε)²)`, which weights every
//!   basin by its own discharge variability.

use ndarray::{Array1, ArrayView1};

use crate::config::NSE_LOSS_EPS;
use crate::error::{HydroError, Result};

/// A loss over one batch, returning the scalar loss and `∂L/∂pred`.
pub trait LossFunction: Send + Sync {
    fn name(&self) -> &'static str;

    fn loss_and_grad(
        &self,
        pred: ArrayView1<f32>,
        obs: ArrayView1<f32>,
        q_std: Option<ArrayView1<f32>>,
    ) -> Result<(f32, Array1<f32>)>;
}

/// Plain mean squared error.
#[derive(Clone, Copy, Debug, Default)]
pub struct MseLoss;

/// Basin-variance-normalized squared error.
#[derive(Clone, Copy, Debug)]
pub struct NseLoss {
    pub eps: f32,
}

impl Default for NseLoss {
    fn default() -> Self {
        Self { eps: NSE_LOSS_EPS }
    }
}

fn check_lengths(pred: &ArrayView1<f32>, obs: &ArrayView1<f32>) -> Result<usize> {
    if pred.len() != obs.len() {
        return Err(HydroError::Shape(format!(
            "{} predictions for {} observations",
            pred.len(),
            obs.len()
        )));
    }
    if pred.is_empty() {
        return Err(HydroError::Shape("loss over an empty batch".into()));
    }
    Ok(pred.len())
}

impl LossFunction for MseLoss {
    fn name(&self) -> &'static str {
        "mse"
    }

    fn loss_and_grad(
        &self,
        pred: ArrayView1<f32>,
        obs: ArrayView1<f32>,
        _q_std: Option<ArrayView1<f32>>,
    ) -> Result<(f32, Array1<f32>)> {
        let n = check_lengths(&pred, &obs)? as f32;
        let diff = &pred - &obs;
        let loss = diff.mapv(|d| d * d).sum() / n;
        let grad = diff * (2.0 / n);
        Ok((loss, grad))
    }
}

impl LossFunction for NseLoss {
    fn name(&self) -> &'static str {
        "nse"
    }

    fn loss_and_grad(
        &self,
        pred: ArrayView1<f32>,
        obs: ArrayView1<f32>,
        q_std: Option<ArrayView1<f32>>,
    ) -> Result<(f32, Array1<f32>)> {
        let n = check_lengths(&pred, &obs)?;
        let q_std = q_std.ok_or(HydroError::MissingTargetStd)?;
        if q_std.len() != n {
            return Err(HydroError::Shape(format!(
                "{} discharge stds for a batch of {}",
                q_std.len(),
                n
            )));
        }

        let weights = q_std.mapv(|s| {
            let denom = s + self.eps;
            1.0 / (denom * denom)
        });
        let diff = &pred - &obs;
        let loss = (&diff * &diff * &weights).sum() / n as f32;
        let grad = diff * &weights * (2.0 / n as f32);
        Ok((loss, grad))
    }
}

/// The loss strategy selected by a run's `use_mse` flag.
pub fn loss_for(use_mse: bool) -> Box<dyn LossFunction> {
    if use_mse {
        Box::new(MseLoss)
    } else {
        Box::new(NseLoss::default())
    }
}
