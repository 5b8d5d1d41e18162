//! Adam with bias-corrected moment estimates.
//!
//! ```text
//! m ← β₁·m + (1−β₁)·g
//! v ← β₂·v + (1−β₂)·g²
//! θ ← θ − lr · m̂ / (√v̂ + ε),   m̂ = m/(1−β₁ᵗ), v̂ = v/(1−β₂ᵗ)
//! ```

use ndarray::{ArrayD, ArrayViewD, ArrayViewMutD, Zip};
use serde::{Deserialize, Serialize};

use crate::error::{HydroError, Result};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Adam {
    pub lr: f32,
    pub beta1: f32,
    pub beta2: f32,
    pub eps: f32,

    /// Number of steps taken.
    step: u64,

    /// First moments, one per parameter array. Empty until the first step.
    m: Vec<ArrayD<f32>>,

    /// Second moments.
    v: Vec<ArrayD<f32>>,
}

impl Adam {
    pub fn new(lr: f32) -> Self {
        Self {
            lr,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
            step: 0,
            m: Vec::new(),
            v: Vec::new(),
        }
    }

    pub fn set_lr(&mut self, lr: f32) {
        self.lr = lr;
    }

    pub fn steps(&self) -> u64 {
        self.step
    }

    fn ensure_moments(&mut self, params: &[ArrayViewMutD<f32>]) -> Result<()> {
        if self.m.is_empty() {
            self.m = params.iter().map(|p| ArrayD::zeros(p.raw_dim())).collect();
            self.v = params.iter().map(|p| ArrayD::zeros(p.raw_dim())).collect();
            return Ok(());
        }
        if self.m.len() != params.len()
            || self.m.iter().zip(params).any(|(m, p)| m.shape() != p.shape())
        {
            return Err(HydroError::Shape(
                "parameter list does not match the optimizer's moment buffers".into(),
            ));
        }
        Ok(())
    }

    /// Apply one update. `params` and `grads` must be parallel lists.
    pub fn step(&mut self, mut params: Vec<ArrayViewMutD<f32>>, grads: &[ArrayViewD<f32>]) -> Result<()> {
        if params.len() != grads.len() {
            return Err(HydroError::Shape(format!(
                "{} parameter arrays but {} gradient arrays",
                params.len(),
                grads.len()
            )));
        }
        if let Some((i, _)) = params
            .iter()
            .zip(grads)
            .enumerate()
            .find(|(_, (p, g))| p.shape() != g.shape())
        {
            return Err(HydroError::Shape(format!(
                "gradient {} has shape {:?}, parameter has {:?}",
                i,
                grads[i].shape(),
                params[i].shape()
            )));
        }
        self.ensure_moments(&params)?;

        self.step += 1;
        let (lr, b1, b2, eps) = (self.lr, self.beta1, self.beta2, self.eps);
        let bc1 = 1.0 - b1.powi(self.step as i32);
        let bc2 = 1.0 - b2.powi(self.step as i32);

        for ((param, grad), (m, v)) in params
            .iter_mut()
            .zip(grads)
            .zip(self.m.iter_mut().zip(self.v.iter_mut()))
        {
            Zip::from(param)
                .and(grad)
                .and(m)
                .and(v)
                .for_each(|p, &g, m, v| {
                    *m = b1 * *m + (1.0 - b1) * g;
                    *v = b2 * *v + (1.0 - b2) * g * g;
                    let m_hat = *m / bc1;
                    let v_hat = *v / bc2;
                    *p -= lr * m_hat / (v_hat.sqrt() + eps);
                });
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}
