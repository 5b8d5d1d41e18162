//! Recurrent hidden/cell state for a batch of sequences.
//!
//! Every sequence starts from `h₀ = c₀ = 0`; the state is advanced once per
//! timestep and never shared across sequences or basins.

use ndarray::Array2;

/// Hidden and cell state for `batch` sequences of width `hidden`.
#[derive(Clone, Debug)]
pub struct CellState {
    /// Hidden state h ∈ R^{batch × hidden}
    pub h: Array2<f32>,

    /// Cell state c ∈ R^{batch × hidden}
    pub c: Array2<f32>,
}

impl CellState {
    /// Zero-initialised state.
    pub fn zeros(batch: usize, hidden: usize) -> Self {
        Self {
            h: Array2::zeros((batch, hidden)),
            c: Array2::zeros((batch, hidden)),
        }
    }

    /// Replace the state with the values of the next timestep.
    pub fn advance(&mut self, h: Array2<f32>, c: Array2<f32>) {
        self.h = h;
        self.c = c;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_init() {
        let state = CellState::zeros(4, 8);
        assert_eq!(state.h.dim(), (4, 8));
        assert!(state.c.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_advance() {
        let mut state = CellState::zeros(2, 3);
        state.advance(Array2::ones((2, 3)), Array2::ones((2, 3)) * 2.0);
        assert_eq!(state.h[[0, 0]], 1.0);
        assert_eq!(state.c[[1, 2]], 2.0);
    }
}
