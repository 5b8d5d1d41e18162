//! Regression head: dropout on the last hidden state, then `H → 1`.

use ndarray::{Array1, Array2, ArrayView2, ArrayViewD, ArrayViewMutD, Axis};
use rand::Rng;
use rand_distr::{Distribution, Uniform};
use serde::{Deserialize, Serialize};

use crate::error::{HydroError, Result};

/// Affine projection of the final hidden state to one discharge value.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RegressionHead {
    /// w ∈ R^{H}
    pub weight: Array1<f32>,

    /// b ∈ R^{1}
    pub bias: Array1<f32>,

    /// Dropout rate applied to the hidden state during training.
    pub dropout: f32,
}

/// What the head keeps from a training forward pass.
#[derive(Clone, Debug)]
pub struct HeadCache {
    /// Hidden state after dropout: [batch, H]
    dropped: Array2<f32>,

    /// Inverted-dropout mask (0 or 1/keep), absent when dropout is off.
    mask: Option<Array2<f32>>,
}

#[derive(Clone, Debug)]
pub struct HeadGrads {
    pub weight: Array1<f32>,
    pub bias: Array1<f32>,
}

impl RegressionHead {
    /// Uniform init in ±1/√H for both weight and bias.
    pub fn new(hidden_size: usize, dropout: f32, rng: &mut impl Rng) -> Self {
        let bound = 1.0 / (hidden_size.max(1) as f32).sqrt();
        let dist = Uniform::new_inclusive(-bound, bound);
        Self {
            weight: Array1::from_shape_fn(hidden_size, |_| dist.sample(&mut *rng)),
            bias: Array1::from_elem(1, dist.sample(&mut *rng)),
            dropout,
        }
    }

    fn project(&self, h: &Array2<f32>) -> Array1<f32> {
        h.dot(&self.weight) + self.bias[0]
    }

    fn check_width(&self, h: &ArrayView2<f32>) -> Result<()> {
        if h.ncols() != self.weight.len() {
            return Err(HydroError::Shape(format!(
                "head expects hidden width {}, got {}",
                self.weight.len(),
                h.ncols()
            )));
        }
        Ok(())
    }

    /// Training-mode forward pass: dropout is active.
    pub fn forward_train(
        &self,
        h_last: ArrayView2<f32>,
        rng: &mut impl Rng,
    ) -> Result<(Array1<f32>, HeadCache)> {
        self.check_width(&h_last)?;

        let (dropped, mask) = if self.dropout > 0.0 {
            let keep = 1.0 - self.dropout;
            let mask = Array2::from_shape_fn(h_last.raw_dim(), |_| {
                if rng.gen::<f32>() < keep {
                    1.0 / keep
                } else {
                    0.0
                }
            });
            (&h_last * &mask, Some(mask))
        } else {
            (h_last.to_owned(), None)
        };

        let pred = self.project(&dropped);
        Ok((pred, HeadCache { dropped, mask }))
    }

    /// Inference-mode forward pass: dropout is the identity.
    pub fn predict(&self, h_last: ArrayView2<f32>) -> Result<Array1<f32>> {
        self.check_width(&h_last)?;
        Ok(self.project(&h_last.to_owned()))
    }

    /// Gradients of the head parameters and of the (pre-dropout) hidden state.
    pub fn backward(&self, cache: &HeadCache, d_pred: &Array1<f32>) -> Result<(HeadGrads, Array2<f32>)> {
        if d_pred.len() != cache.dropped.nrows() {
            return Err(HydroError::Shape(format!(
                "prediction gradient has {} rows, batch has {}",
                d_pred.len(),
                cache.dropped.nrows()
            )));
        }

        let grads = HeadGrads {
            weight: cache.dropped.t().dot(d_pred),
            bias: Array1::from_elem(1, d_pred.sum()),
        };

        let d_col = d_pred.view().insert_axis(Axis(1));
        let w_row = self.weight.view().insert_axis(Axis(0));
        let mut d_h = d_col.dot(&w_row);
        if let Some(mask) = &cache.mask {
            d_h *= mask;
        }
        Ok((grads, d_h))
    }

    pub fn params_mut(&mut self) -> Vec<ArrayViewMutD<'_, f32>> {
        vec![self.weight.view_mut().into_dyn(), self.bias.view_mut().into_dyn()]
    }

    pub fn param_count(&self) -> usize {
        self.weight.len() + self.bias.len()
    }
}

impl HeadGrads {
    pub fn views(&self) -> Vec<ArrayViewD<'_, f32>> {
        vec![self.weight.view().into_dyn(), self.bias.view().into_dyn()]
    }

    pub fn views_mut(&mut self) -> Vec<ArrayViewMutD<'_, f32>> {
        vec![self.weight.view_mut().into_dyn(), self.bias.view_mut().into_dyn()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_predict_is_affine() {
        let mut rng = StdRng::seed_from_u64(0);
        let mut head = RegressionHead::new(3, 0.4, &mut rng);
        head.weight = Array1::from_vec(vec![1.0, -2.0, 0.5]);
        head.bias = Array1::from_elem(1, 0.25);

        let h = Array2::from_shape_vec((2, 3), vec![1.0, 1.0, 2.0, 0.0, -1.0, 4.0]).unwrap();
        let pred = head.predict(h.view()).unwrap();
        assert!((pred[0] - 0.25).abs() < 1e-6);
        assert!((pred[1] - 4.25).abs() < 1e-6);
    }

    #[test]
    fn test_dropout_only_in_training() {
        let mut rng = StdRng::seed_from_u64(1);
        let head = RegressionHead::new(64, 0.5, &mut rng);
        let h = Array2::ones((4, 64));

        let a = head.predict(h.view()).unwrap();
        let b = head.predict(h.view()).unwrap();
        assert_eq!(a, b);

        let (_, cache) = head.forward_train(h.view(), &mut rng).unwrap();
        let mask = cache.mask.as_ref().unwrap();
        let zeros = mask.iter().filter(|&&m| m == 0.0).count();
        assert!(zeros > 0 && zeros < mask.len());
        assert!(mask.iter().all(|&m| m == 0.0 || (m - 2.0).abs() < 1e-6));
    }

    #[test]
    fn test_zero_dropout_training_matches_predict() {
        let mut rng = StdRng::seed_from_u64(2);
        let head = RegressionHead::new(5, 0.0, &mut rng);
        let h = Array2::from_shape_fn((3, 5), |(i, j)| (i * 5 + j) as f32 * 0.1);
        let (train, _) = head.forward_train(h.view(), &mut rng).unwrap();
        assert_eq!(train, head.predict(h.view()).unwrap());
    }

    #[test]
    fn test_backward_without_dropout() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut head = RegressionHead::new(2, 0.0, &mut rng);
        head.weight = Array1::from_vec(vec![3.0, -1.0]);

        let h = Array2::from_shape_vec((2, 2), vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let (_, cache) = head.forward_train(h.view(), &mut rng).unwrap();
        let d_pred = Array1::from_vec(vec![1.0, 0.5]);
        let (grads, d_h) = head.backward(&cache, &d_pred).unwrap();

        assert!((grads.weight[0] - 2.5).abs() < 1e-6);
        assert!((grads.weight[1] - 4.0).abs() < 1e-6);
        assert!((grads.bias[0] - 1.5).abs() < 1e-6);
        assert!((d_h[[1, 0]] - 1.5).abs() < 1e-6);
        assert!((d_h[[1, 1]] + 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_rejects_wrong_width() {
        let mut rng = StdRng::seed_from_u64(4);
        let head = RegressionHead::new(4, 0.0, &mut rng);
        assert!(head.predict(Array2::zeros((1, 3)).view()).is_err());
    }
}
