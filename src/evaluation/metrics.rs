//! Nash–Sutcliffe efficiency.
//!
//! `NSE = 1 − Σ(obs − sim)² / Σ(obs − mean(obs))²`, computed over the
//! timesteps whose observation is valid (non-negative, not NaN).

use crate::data::basin::is_valid_discharge;

/// Observation/simulation pairs with a valid observation, widened to f64.
pub fn valid_pairs(obs: &[f32], sim: &[f32]) -> Vec<(f64, f64)> {
    obs.iter()
        .zip(sim)
        .filter(|(&o, _)| is_valid_discharge(o))
        .map(|(&o, &s)| (o as f64, s as f64))
        .collect()
}

/// NSE over the valid pairs. `None` when no valid observation remains or the
/// observations have zero variance.
pub fn nse(obs: &[f32], sim: &[f32]) -> Option<f64> {
    let pairs = valid_pairs(obs, sim);
    if pairs.is_empty() {
        return None;
    }
    let mean = pairs.iter().map(|(o, _)| o).sum::<f64>() / pairs.len() as f64;
    let denominator: f64 = pairs.iter().map(|(o, _)| (o - mean).powi(2)).sum();
    if denominator <= 0.0 {
        return None;
    }
    let numerator: f64 = pairs.iter().map(|(o, s)| (o - s).powi(2)).sum();
    Some(1.0 - numerator / denominator)
}
