//! Crate-wide error type.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by training, evaluation and robustness analysis.
#[derive(Debug, Error)]
pub enum HydroError {
    /// Missing or malformed run configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// The loaded model lacks a capability the operation requires.
    #[error("capability error: {0}")]
    Capability(String),

    /// Array shapes do not line up.
    #[error("shape mismatch: {0}")]
    Shape(String),

    /// The NSE loss was asked to run without per-sample discharge stds.
    #[error("NSE loss requires per-sample discharge stds but the batch carries none")]
    MissingTargetStd,

    /// Training produced a NaN or infinite loss.
    #[error("non-finite loss {loss} at epoch {epoch}, batch {batch}")]
    NonFiniteLoss { epoch: usize, batch: usize, loss: f32 },

    /// The background batch loader died before finishing the epoch.
    #[error("batch loader failed: {0}")]
    Loader(String),

    /// No checkpoint exists for the requested epoch.
    #[error("no checkpoint for epoch {epoch} in {}", dir.display())]
    MissingCheckpoint { epoch: usize, dir: PathBuf },

    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl HydroError {
    /// Wrap an I/O error with the path it concerns.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<bincode::Error> for HydroError {
    fn from(err: bincode::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for HydroError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result alias for library operations.
pub type Result<T> = std::result::Result<T, HydroError>;
