//! Samples and dense batches.

use ndarray::{stack, Array1, Array2, Array3, ArrayView1, Axis};

use crate::error::{HydroError, Result};

/// One training or evaluation sequence.
#[derive(Clone, Debug)]
pub struct Sample {
    /// Normalized dynamic inputs: [seq_len, n_dyn]
    pub x_dyn: Array2<f32>,

    /// Normalized static attributes: [n_static]
    pub x_static: Array1<f32>,

    /// Target aligned with the last timestep (may be the missing sentinel).
    pub target: f32,

    /// Discharge std of the sample's basin.
    pub q_std: Option<f32>,
}

/// A dense batch of equally shaped samples.
#[derive(Clone, Debug)]
pub struct Batch {
    /// [batch, seq_len, n_dyn]
    pub x_dyn: Array3<f32>,

    /// [batch, n_static]
    pub x_static: Option<Array2<f32>>,

    /// [batch]
    pub targets: Array1<f32>,

    /// [batch]
    pub q_std: Option<Array1<f32>>,
}

impl Batch {
    /// Stack samples into one batch. All samples must share the same shape
    /// and either all or none of them must carry a discharge std.
    pub fn from_samples(samples: &[Sample]) -> Result<Self> {
        let first = samples
            .first()
            .ok_or_else(|| HydroError::Shape("cannot build a batch from zero samples".into()))?;

        for (i, s) in samples.iter().enumerate() {
            if s.x_dyn.dim() != first.x_dyn.dim() || s.x_static.len() != first.x_static.len() {
                return Err(HydroError::Shape(format!(
                    "sample {} has shape {:?}/{} but the batch expects {:?}/{}",
                    i,
                    s.x_dyn.dim(),
                    s.x_static.len(),
                    first.x_dyn.dim(),
                    first.x_static.len()
                )));
            }
        }

        let dyn_views: Vec<_> = samples.iter().map(|s| s.x_dyn.view()).collect();
        let x_dyn = stack(Axis(0), &dyn_views).map_err(|e| HydroError::Shape(e.to_string()))?;

        let x_static = if first.x_static.is_empty() {
            None
        } else {
            let views: Vec<_> = samples.iter().map(|s| s.x_static.view()).collect();
            Some(stack(Axis(0), &views).map_err(|e| HydroError::Shape(e.to_string()))?)
        };

        let targets = samples.iter().map(|s| s.target).collect();
        let q_std = samples
            .iter()
            .map(|s| s.q_std)
            .collect::<Option<Array1<f32>>>();
        if q_std.is_none() && samples.iter().any(|s| s.q_std.is_some()) {
            return Err(HydroError::Shape(
                "some samples carry a discharge std and some do not".into(),
            ));
        }

        Ok(Self {
            x_dyn,
            x_static,
            targets,
            q_std,
        })
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn seq_len(&self) -> usize {
        self.x_dyn.len_of(Axis(1))
    }

    /// A copy with `noise` added to every row of the static attributes.
    pub fn with_static_noise(&self, noise: ArrayView1<f32>) -> Result<Self> {
        let x_static = self
            .x_static
            .as_ref()
            .ok_or_else(|| HydroError::Shape("batch carries no static attributes".into()))?;
        if x_static.ncols() != noise.len() {
            return Err(HydroError::Shape(format!(
                "noise of width {} for {} static attributes",
                noise.len(),
                x_static.ncols()
            )));
        }

        let mut noisy = self.clone();
        noisy.x_static = Some(x_static + &noise);
        Ok(noisy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn sample(value: f32, q_std: Option<f32>) -> Sample {
        Sample {
            x_dyn: Array2::from_elem((4, 2), value),
            x_static: array![value, -value, 0.5],
            target: value * 10.0,
            q_std,
        }
    }

    #[test]
    fn test_stack_samples() {
        let batch = Batch::from_samples(&[sample(1.0, Some(2.0)), sample(2.0, Some(3.0))]).unwrap();
        assert_eq!(batch.x_dyn.dim(), (2, 4, 2));
        assert_eq!(batch.x_static.as_ref().unwrap().dim(), (2, 3));
        assert_eq!(batch.targets, array![10.0, 20.0]);
        assert_eq!(batch.q_std, Some(array![2.0, 3.0]));
        assert_eq!(batch.seq_len(), 4);
    }

    #[test]
    fn test_mixed_std_rejected() {
        assert!(Batch::from_samples(&[sample(1.0, Some(2.0)), sample(2.0, None)]).is_err());
    }

    #[test]
    fn test_mismatched_shapes_rejected() {
        let mut short = sample(2.0, None);
        short.x_dyn = Array2::zeros((3, 2));
        assert!(Batch::from_samples(&[sample(1.0, None), short]).is_err());
        assert!(Batch::from_samples(&[]).is_err());
    }

    #[test]
    fn test_static_noise_added_to_every_row() {
        let batch = Batch::from_samples(&[sample(1.0, None), sample(2.0, None)]).unwrap();
        let noise = array![0.1f32, 0.2, 0.3];
        let noisy = batch.with_static_noise(noise.view()).unwrap();

        let diff = noisy.x_static.unwrap() - batch.x_static.as_ref().unwrap();
        for row in diff.rows() {
            for (d, n) in row.iter().zip(noise.iter()) {
                assert!((d - n).abs() < 1e-6);
            }
        }
        assert_eq!(noisy.x_dyn, batch.x_dyn);
    }
}
