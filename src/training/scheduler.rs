//! Step learning-rate schedule keyed by epoch number.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::{LEARNING_RATE, LR_DROPS};

/// Learning rate for a given epoch (1-indexed).
pub trait Scheduler {
    fn lr(&self, epoch: usize) -> f32;
}

/// Initial learning rate plus a table of `epoch → new rate`.
///
/// `lr(e)` is the rate of the last drop at or below `e`, or the initial rate
/// when no drop has happened yet.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StepSchedule {
    pub initial_lr: f32,
    pub drops: BTreeMap<usize, f32>,
}

impl StepSchedule {
    pub fn new(initial_lr: f32, drops: impl IntoIterator<Item = (usize, f32)>) -> Self {
        Self {
            initial_lr,
            drops: drops.into_iter().collect(),
        }
    }

    /// A constant rate.
    pub fn constant(lr: f32) -> Self {
        Self::new(lr, [])
    }
}

impl Default for StepSchedule {
    fn default() -> Self {
        Self::new(LEARNING_RATE, LR_DROPS)
    }
}

impl Scheduler for StepSchedule {
    fn lr(&self, epoch: usize) -> f32 {
        self.drops
            .range(..=epoch)
            .next_back()
            .map(|(_, &lr)| lr)
            .unwrap_or(self.initial_lr)
    }
}
