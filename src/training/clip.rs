//! Global-norm gradient clipping.

use ndarray::{ArrayViewD, ArrayViewMutD};

/// `sqrt(Σ g²)` over every gradient array, accumulated in f64.
pub fn global_norm(grads: &[ArrayViewD<f32>]) -> f32 {
    let sum_sq: f64 = grads
        .iter()
        .flat_map(|g| g.iter())
        .map(|&g| (g as f64) * (g as f64))
        .sum();
    sum_sq.sqrt() as f32
}

/// Scale all gradients by `max_norm / norm` when their global norm exceeds
/// `max_norm`. Returns the norm before clipping.
pub fn clip_grad_norm(mut grads: Vec<ArrayViewMutD<f32>>, max_norm: f32) -> f32 {
    let views: Vec<ArrayViewD<f32>> = grads.iter().map(|g| g.view()).collect();
    let norm = global_norm(&views);

    if norm > max_norm {
        let coef = max_norm / norm;
        for g in grads.iter_mut() {
            g.mapv_inplace(|v| v * coef);
        }
    }

    norm
}
