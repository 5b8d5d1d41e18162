//! Discharge model: one recurrent cell variant plus the regression head.
//!
//! The cell variant is fixed at construction from [`ModelVariant`]; every
//! call site goes through the same forward/backward contract.

use ndarray::{Array1, ArrayView2, ArrayView3, ArrayViewD, ArrayViewMutD};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::core::cell::{CellGrads, CellTrace, EaLstmCell, LstmCell, RecurrentCell, StaticInput};
use crate::core::head::{HeadCache, HeadGrads, RegressionHead};
use crate::error::{HydroError, Result};

/// Which recurrent architecture a run trains.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelVariant {
    /// Entity-aware LSTM: static attributes drive the input gate only.
    EaLstm,
    /// Standard LSTM with static attributes appended to every timestep.
    LstmConcatStatic,
    /// Standard LSTM on dynamic inputs alone.
    LstmNoStatic,
}

impl ModelVariant {
    /// Resolve the command-line flags. `no_static` wins over `concat_static`.
    pub fn from_flags(no_static: bool, concat_static: bool) -> Self {
        if no_static {
            Self::LstmNoStatic
        } else if concat_static {
            Self::LstmConcatStatic
        } else {
            Self::EaLstm
        }
    }

    pub fn is_entity_aware(self) -> bool {
        self == Self::EaLstm
    }

    /// Whether the variant reads static attributes at all.
    pub fn uses_static(self) -> bool {
        self != Self::LstmNoStatic
    }

    /// Prefix of result file names (`ealstm_seed42.json`, ...).
    pub fn result_prefix(self) -> &'static str {
        match self {
            Self::EaLstm => "ealstm",
            Self::LstmConcatStatic => "lstm",
            Self::LstmNoStatic => "lstm_no_static",
        }
    }
}

/// Shape of a model, enough to rebuild it from a run configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub variant: ModelVariant,
    pub dynamic_size: usize,
    pub static_size: usize,
    pub hidden_size: usize,
    pub dropout: f32,
    pub initial_forget_bias: f32,
}

impl ModelSpec {
    pub fn validate(&self) -> Result<()> {
        if self.dynamic_size == 0 {
            return Err(HydroError::Config("model needs at least one dynamic feature".into()));
        }
        if self.hidden_size == 0 {
            return Err(HydroError::Config("hidden size must be positive".into()));
        }
        if self.variant.uses_static() && self.static_size == 0 {
            return Err(HydroError::Config(format!(
                "{:?} needs at least one static attribute",
                self.variant
            )));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(HydroError::Config(format!(
                "dropout must be in [0, 1), got {}",
                self.dropout
            )));
        }
        Ok(())
    }
}

/// Cached state of a training forward pass.
#[derive(Clone, Debug)]
pub struct ForwardCache {
    trace: CellTrace,
    head: HeadCache,
}

/// Gradients for every model parameter.
#[derive(Clone, Debug)]
pub struct ModelGrads {
    pub cell: CellGrads,
    pub head: HeadGrads,
}

impl ModelGrads {
    /// Gradient views, in the order of [`DischargeModel::params_mut`].
    pub fn views(&self) -> Vec<ArrayViewD<'_, f32>> {
        let mut views = self.cell.views();
        views.extend(self.head.views());
        views
    }

    pub fn views_mut(&mut self) -> Vec<ArrayViewMutD<'_, f32>> {
        let mut views = self.cell.views_mut();
        views.extend(self.head.views_mut());
        views
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DischargeModel {
    spec: ModelSpec,
    cell: RecurrentCell,
    head: RegressionHead,
}

impl DischargeModel {
    /// Build a freshly initialised model; weights are drawn from `seed`.
    pub fn new(spec: ModelSpec, seed: u64) -> Result<Self> {
        spec.validate()?;
        let mut rng = StdRng::seed_from_u64(seed);

        let cell = match spec.variant {
            ModelVariant::EaLstm => RecurrentCell::EntityAware(EaLstmCell::new(
                spec.dynamic_size,
                spec.static_size,
                spec.hidden_size,
                spec.initial_forget_bias,
                &mut rng,
            )),
            ModelVariant::LstmConcatStatic => RecurrentCell::Standard(LstmCell::new(
                spec.dynamic_size,
                spec.static_size,
                StaticInput::Concatenated,
                spec.hidden_size,
                spec.initial_forget_bias,
                &mut rng,
            )),
            ModelVariant::LstmNoStatic => RecurrentCell::Standard(LstmCell::new(
                spec.dynamic_size,
                0,
                StaticInput::None,
                spec.hidden_size,
                spec.initial_forget_bias,
                &mut rng,
            )),
        };
        let head = RegressionHead::new(spec.hidden_size, spec.dropout, &mut rng);

        Ok(Self { spec, cell, head })
    }

    pub fn spec(&self) -> &ModelSpec {
        &self.spec
    }

    pub fn variant(&self) -> ModelVariant {
        self.spec.variant
    }

    pub fn cell(&self) -> &RecurrentCell {
        &self.cell
    }

    /// True when static attributes have their own pathway (entity-aware cell).
    pub fn has_static_pathway(&self) -> bool {
        self.cell.is_entity_aware()
    }

    /// Width of the static attribute vector the model consumes (0 if none).
    pub fn static_size(&self) -> usize {
        if self.spec.variant.uses_static() {
            self.spec.static_size
        } else {
            0
        }
    }

    fn static_view<'a>(&self, x_static: Option<ArrayView2<'a, f32>>) -> Option<ArrayView2<'a, f32>> {
        if self.spec.variant.uses_static() {
            x_static
        } else {
            None
        }
    }

    /// Training forward pass with dropout. Returns predictions `[batch]`.
    pub fn forward_train(
        &self,
        x_dyn: ArrayView3<f32>,
        x_static: Option<ArrayView2<f32>>,
        rng: &mut impl Rng,
    ) -> Result<(Array1<f32>, ForwardCache)> {
        let trace = self.cell.forward(x_dyn, self.static_view(x_static))?;
        let h_last = trace.last_hidden()?;
        let (pred, head) = self.head.forward_train(h_last.view(), rng)?;
        Ok((pred, ForwardCache { trace, head }))
    }

    /// Inference forward pass, dropout disabled.
    pub fn predict(&self, x_dyn: ArrayView3<f32>, x_static: Option<ArrayView2<f32>>) -> Result<Array1<f32>> {
        let trace = self.cell.forward(x_dyn, self.static_view(x_static))?;
        self.head.predict(trace.last_hidden()?.view())
    }

    /// Gradients of every parameter given `∂L/∂pred`.
    pub fn backward(&self, cache: &ForwardCache, d_pred: &Array1<f32>) -> Result<ModelGrads> {
        let (head, d_h) = self.head.backward(&cache.head, d_pred)?;
        let cell = self.cell.backward(&cache.trace, &d_h)?;
        Ok(ModelGrads { cell, head })
    }

    /// Mutable parameter views: cell parameters first, then the head.
    pub fn params_mut(&mut self) -> Vec<ArrayViewMutD<'_, f32>> {
        let mut params = self.cell.params_mut();
        params.extend(self.head.params_mut());
        params
    }

    pub fn param_count(&self) -> usize {
        self.cell.param_count() + self.head.param_count()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}
