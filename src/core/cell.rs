//! Recurrent cells: the standard LSTM and the entity-aware LSTM (EA-LSTM).
//!
//! Standard cell, all gates driven by the (possibly concatenated) input and
//! the previous hidden state:
//!
//! ```text
//! f_t = σ(W_f · x_t + U_f · h_{t-1} + b_f)
//! i_t = σ(W_i · x_t + U_i · h_{t-1} + b_i)
//! o_t = σ(W_o · x_t + U_o · h_{t-1} + b_o)
//! g_t = tanh(W_g · x_t + U_g · h_{t-1} + b_g)
//! c_t = f_t ⊙ c_{t-1} + i_t ⊙ g_t
//! h_t = o_t ⊙ tanh(c_t)
//! ```
//!
//! Entity-aware cell: the input gate sees only the static attributes,
//! `i = σ(W_s · x_static + b_s)`, and is therefore constant over the sequence.
//! It is computed once per sequence; recomputing it per step is numerically
//! identical (see [`EaLstmCell::forward_recomputing_input_gate`]).
//!
//! Both cells keep a [trace](LstmTrace) of the forward pass so the backward
//! pass can run backpropagation through time from the gradient of the final
//! hidden state.

use ndarray::{concatenate, s, Array1, Array2, Array3, ArrayView2, ArrayView3, ArrayViewD, ArrayViewMutD, Axis};
use rand::Rng;
use rand_distr::{Distribution, Uniform};
use serde::{Deserialize, Serialize};

use crate::error::{HydroError, Result};

use super::state::CellState;

/// How a standard cell consumes static catchment attributes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StaticInput {
    /// Static attributes are ignored.
    None,
    /// Static attributes are appended to the dynamic input at every timestep.
    Concatenated,
}

// ──────────────────────────────────────────────────────────────
// Standard LSTM
// ──────────────────────────────────────────────────────────────

/// Standard LSTM cell. Gate column order is `f, i, o, g`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LstmCell {
    /// Input-to-gate weights: W ∈ R^{n_in × 4H}
    pub w_ih: Array2<f32>,

    /// Hidden-to-gate weights: U ∈ R^{H × 4H}
    pub w_hh: Array2<f32>,

    /// Gate bias ∈ R^{4H}
    pub bias: Array1<f32>,

    /// How static attributes enter the cell.
    pub static_input: StaticInput,

    /// Width of the dynamic part of the input.
    pub dynamic_size: usize,

    /// Width of the concatenated static part (0 unless `Concatenated`).
    pub static_size: usize,

    pub hidden_size: usize,
}

/// Forward trace of a standard cell.
#[derive(Clone, Debug)]
pub struct LstmTrace {
    /// Inputs actually fed to the cell (after concatenation): [batch, T, n_in]
    inputs: Array3<f32>,

    /// Post-activation gates per timestep: [batch, 4H]
    gates: Vec<Array2<f32>>,

    /// Hidden states: [batch, T, H]
    h_n: Array3<f32>,

    /// Cell states: [batch, T, H]
    c_n: Array3<f32>,
}

/// Parameter gradients of a standard cell.
#[derive(Clone, Debug)]
pub struct LstmGrads {
    pub w_ih: Array2<f32>,
    pub w_hh: Array2<f32>,
    pub bias: Array1<f32>,
}

impl LstmCell {
    /// Create a cell with Glorot-uniform input weights, identity recurrent
    /// weights and the forget-gate bias set to `forget_bias`.
    pub fn new(
        dynamic_size: usize,
        static_size: usize,
        static_input: StaticInput,
        hidden_size: usize,
        forget_bias: f32,
        rng: &mut impl Rng,
    ) -> Self {
        let static_size = match static_input {
            StaticInput::None => 0,
            StaticInput::Concatenated => static_size,
        };
        let input_size = dynamic_size + static_size;
        let mut bias = Array1::zeros(4 * hidden_size);
        bias.slice_mut(s![..hidden_size]).fill(forget_bias);

        Self {
            w_ih: glorot_uniform(input_size, 4 * hidden_size, rng),
            w_hh: repeated_identity(hidden_size, 4),
            bias,
            static_input,
            dynamic_size,
            static_size,
            hidden_size,
        }
    }

    /// Total input width seen by the gates.
    pub fn input_size(&self) -> usize {
        self.dynamic_size + self.static_size
    }

    fn assemble_inputs(
        &self,
        x_dyn: ArrayView3<f32>,
        x_static: Option<ArrayView2<f32>>,
    ) -> Result<Array3<f32>> {
        let (batch, seq_len, n_dyn) = x_dyn.dim();
        if n_dyn != self.dynamic_size {
            return Err(HydroError::Shape(format!(
                "LSTM expects {} dynamic features, got {}",
                self.dynamic_size, n_dyn
            )));
        }

        match self.static_input {
            StaticInput::None => Ok(x_dyn.to_owned()),
            StaticInput::Concatenated => {
                let x_s = x_static.ok_or_else(|| {
                    HydroError::Shape("concatenated-static LSTM requires static attributes".into())
                })?;
                if x_s.dim() != (batch, self.static_size) {
                    return Err(HydroError::Shape(format!(
                        "static input {:?} does not match [{}, {}]",
                        x_s.dim(),
                        batch,
                        self.static_size
                    )));
                }
                let repeated = x_s
                    .insert_axis(Axis(1))
                    .broadcast((batch, seq_len, self.static_size))
                    .ok_or_else(|| HydroError::Shape("cannot broadcast static input".into()))?
                    .to_owned();
                let views = [x_dyn.view(), repeated.view()];
                let joined = concatenate(Axis(2), &views).map_err(|e| HydroError::Shape(e.to_string()));
                joined
            }
        }
    }

    /// Run the cell over full sequences.
    pub fn forward(
        &self,
        x_dyn: ArrayView3<f32>,
        x_static: Option<ArrayView2<f32>>,
    ) -> Result<LstmTrace> {
        let inputs = self.assemble_inputs(x_dyn, x_static)?;
        let (batch, seq_len, _) = inputs.dim();
        let hs = self.hidden_size;

        let mut state = CellState::zeros(batch, hs);
        let mut gates = Vec::with_capacity(seq_len);
        let mut h_n = Array3::zeros((batch, seq_len, hs));
        let mut c_n = Array3::zeros((batch, seq_len, hs));

        for t in 0..seq_len {
            let x_t = inputs.index_axis(Axis(1), t);
            let pre = x_t.dot(&self.w_ih) + state.h.dot(&self.w_hh) + &self.bias;
            let act = activate_gates(pre, 3 * hs);

            let f = act.slice(s![.., ..hs]);
            let i = act.slice(s![.., hs..2 * hs]);
            let o = act.slice(s![.., 2 * hs..3 * hs]);
            let g = act.slice(s![.., 3 * hs..]);

            let c = &f * &state.c + &i * &g;
            let h = &o * &c.mapv(f32::tanh);

            h_n.index_axis_mut(Axis(1), t).assign(&h);
            c_n.index_axis_mut(Axis(1), t).assign(&c);
            state.advance(h, c);
            gates.push(act);
        }

        Ok(LstmTrace {
            inputs,
            gates,
            h_n,
            c_n,
        })
    }

    /// Backpropagation through time from `d_h_last = ∂L/∂h_T`.
    pub fn backward(&self, trace: &LstmTrace, d_h_last: &Array2<f32>) -> Result<LstmGrads> {
        let (batch, seq_len, _) = trace.inputs.dim();
        let hs = self.hidden_size;
        check_last_grad(d_h_last, batch, hs)?;

        let mut grads = LstmGrads {
            w_ih: Array2::zeros(self.w_ih.dim()),
            w_hh: Array2::zeros(self.w_hh.dim()),
            bias: Array1::zeros(self.bias.len()),
        };
        let mut dh = d_h_last.clone();
        let mut dc = Array2::<f32>::zeros((batch, hs));

        for t in (0..seq_len).rev() {
            let act = &trace.gates[t];
            let f = act.slice(s![.., ..hs]);
            let i = act.slice(s![.., hs..2 * hs]);
            let o = act.slice(s![.., 2 * hs..3 * hs]);
            let g = act.slice(s![.., 3 * hs..]);

            let tanh_c = trace.c_n.index_axis(Axis(1), t).mapv(f32::tanh);
            let c_prev = previous_step(&trace.c_n, t);
            let h_prev = previous_step(&trace.h_n, t);

            let d_o = &dh * &tanh_c;
            dc = dc + &dh * &o * &tanh_c.mapv(|v| 1.0 - v * v);
            let d_f = &dc * &c_prev;
            let d_i = &dc * &g;
            let d_g = &dc * &i;

            let mut d_pre = Array2::zeros((batch, 4 * hs));
            d_pre.slice_mut(s![.., ..hs]).assign(&(&d_f * &f.mapv(sigmoid_grad)));
            d_pre.slice_mut(s![.., hs..2 * hs]).assign(&(&d_i * &i.mapv(sigmoid_grad)));
            d_pre.slice_mut(s![.., 2 * hs..3 * hs]).assign(&(&d_o * &o.mapv(sigmoid_grad)));
            d_pre.slice_mut(s![.., 3 * hs..]).assign(&(&d_g * &g.mapv(tanh_grad)));

            let x_t = trace.inputs.index_axis(Axis(1), t);
            grads.w_ih += &x_t.t().dot(&d_pre);
            grads.w_hh += &h_prev.t().dot(&d_pre);
            grads.bias += &d_pre.sum_axis(Axis(0));

            dh = d_pre.dot(&self.w_hh.t());
            dc = &dc * &f;
        }

        Ok(grads)
    }

    pub fn param_count(&self) -> usize {
        self.w_ih.len() + self.w_hh.len() + self.bias.len()
    }
}

// ──────────────────────────────────────────────────────────────
// Entity-aware LSTM
// ──────────────────────────────────────────────────────────────

/// Entity-aware LSTM cell. Dynamic gate column order is `f, o, g`; the input
/// gate has its own static projection.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EaLstmCell {
    /// Dynamic input-to-gate weights: W ∈ R^{n_dyn × 3H}
    pub w_ih: Array2<f32>,

    /// Hidden-to-gate weights: U ∈ R^{H × 3H}
    pub w_hh: Array2<f32>,

    /// Static-to-input-gate weights: W_s ∈ R^{n_static × H}
    pub w_sh: Array2<f32>,

    /// Dynamic gate bias ∈ R^{3H}
    pub bias: Array1<f32>,

    /// Input gate bias ∈ R^{H}
    pub bias_s: Array1<f32>,

    pub dynamic_size: usize,
    pub static_size: usize,
    pub hidden_size: usize,
}

/// Forward trace of an entity-aware cell.
#[derive(Clone, Debug)]
pub struct EaLstmTrace {
    /// Dynamic inputs: [batch, T, n_dyn]
    x_dyn: Array3<f32>,

    /// Static inputs: [batch, n_static]
    x_static: Array2<f32>,

    /// Input gate activation: [batch, H]
    input_gate: Array2<f32>,

    /// Post-activation dynamic gates per timestep: [batch, 3H]
    gates: Vec<Array2<f32>>,

    h_n: Array3<f32>,
    c_n: Array3<f32>,
}

/// Parameter gradients of an entity-aware cell.
#[derive(Clone, Debug)]
pub struct EaLstmGrads {
    pub w_ih: Array2<f32>,
    pub w_hh: Array2<f32>,
    pub w_sh: Array2<f32>,
    pub bias: Array1<f32>,
    pub bias_s: Array1<f32>,
}

impl EaLstmCell {
    pub fn new(
        dynamic_size: usize,
        static_size: usize,
        hidden_size: usize,
        forget_bias: f32,
        rng: &mut impl Rng,
    ) -> Self {
        let mut bias = Array1::zeros(3 * hidden_size);
        bias.slice_mut(s![..hidden_size]).fill(forget_bias);

        Self {
            w_ih: glorot_uniform(dynamic_size, 3 * hidden_size, rng),
            w_hh: repeated_identity(hidden_size, 3),
            w_sh: glorot_uniform(static_size, hidden_size, rng),
            bias,
            bias_s: Array1::zeros(hidden_size),
            dynamic_size,
            static_size,
            hidden_size,
        }
    }

    /// Input gate `σ(W_s · x_static + b_s)`, one row per sequence.
    pub fn input_gate(&self, x_static: ArrayView2<f32>) -> Array2<f32> {
        (x_static.dot(&self.w_sh) + &self.bias_s).mapv(sigmoid)
    }

    fn check_inputs(&self, x_dyn: &ArrayView3<f32>, x_static: Option<&ArrayView2<f32>>) -> Result<()> {
        let (batch, _, n_dyn) = x_dyn.dim();
        if n_dyn != self.dynamic_size {
            return Err(HydroError::Shape(format!(
                "EA-LSTM expects {} dynamic features, got {}",
                self.dynamic_size, n_dyn
            )));
        }
        match x_static {
            Some(x_s) if x_s.dim() == (batch, self.static_size) => Ok(()),
            Some(x_s) => Err(HydroError::Shape(format!(
                "static input {:?} does not match [{}, {}]",
                x_s.dim(),
                batch,
                self.static_size
            ))),
            None => Err(HydroError::Shape(
                "EA-LSTM requires static attributes for every sequence".into(),
            )),
        }
    }

    /// Run the cell over full sequences, computing the input gate once.
    pub fn forward(
        &self,
        x_dyn: ArrayView3<f32>,
        x_static: Option<ArrayView2<f32>>,
    ) -> Result<EaLstmTrace> {
        self.run(x_dyn, x_static, false)
    }

    /// Same as [`forward`](Self::forward) but re-evaluates the input gate at
    /// every timestep. Produces bit-identical results.
    pub fn forward_recomputing_input_gate(
        &self,
        x_dyn: ArrayView3<f32>,
        x_static: Option<ArrayView2<f32>>,
    ) -> Result<EaLstmTrace> {
        self.run(x_dyn, x_static, true)
    }

    fn run(
        &self,
        x_dyn: ArrayView3<f32>,
        x_static: Option<ArrayView2<f32>>,
        recompute_input_gate: bool,
    ) -> Result<EaLstmTrace> {
        self.check_inputs(&x_dyn, x_static.as_ref())?;
        let x_s = x_static.ok_or_else(|| HydroError::Shape("missing static input".into()))?;
        let (batch, seq_len, _) = x_dyn.dim();
        let hs = self.hidden_size;

        let mut input_gate = self.input_gate(x_s);
        let mut state = CellState::zeros(batch, hs);
        let mut gates = Vec::with_capacity(seq_len);
        let mut h_n = Array3::zeros((batch, seq_len, hs));
        let mut c_n = Array3::zeros((batch, seq_len, hs));

        for t in 0..seq_len {
            if recompute_input_gate {
                input_gate = self.input_gate(x_s);
            }
            let x_t = x_dyn.index_axis(Axis(1), t);
            let pre = x_t.dot(&self.w_ih) + state.h.dot(&self.w_hh) + &self.bias;
            let act = activate_gates(pre, 2 * hs);

            let f = act.slice(s![.., ..hs]);
            let o = act.slice(s![.., hs..2 * hs]);
            let g = act.slice(s![.., 2 * hs..]);

            let c = &f * &state.c + &input_gate * &g;
            let h = &o * &c.mapv(f32::tanh);

            h_n.index_axis_mut(Axis(1), t).assign(&h);
            c_n.index_axis_mut(Axis(1), t).assign(&c);
            state.advance(h, c);
            gates.push(act);
        }

        Ok(EaLstmTrace {
            x_dyn: x_dyn.to_owned(),
            x_static: x_s.to_owned(),
            input_gate,
            gates,
            h_n,
            c_n,
        })
    }

    /// Backpropagation through time from `d_h_last = ∂L/∂h_T`.
    ///
    /// The input gate is shared by all timesteps, so its gradient is summed
    /// over the sequence before being projected onto `W_s` and `b_s`.
    pub fn backward(&self, trace: &EaLstmTrace, d_h_last: &Array2<f32>) -> Result<EaLstmGrads> {
        let (batch, seq_len, _) = trace.x_dyn.dim();
        let hs = self.hidden_size;
        check_last_grad(d_h_last, batch, hs)?;

        let mut grads = EaLstmGrads {
            w_ih: Array2::zeros(self.w_ih.dim()),
            w_hh: Array2::zeros(self.w_hh.dim()),
            w_sh: Array2::zeros(self.w_sh.dim()),
            bias: Array1::zeros(self.bias.len()),
            bias_s: Array1::zeros(self.bias_s.len()),
        };
        let i = &trace.input_gate;
        let mut d_input_gate = Array2::<f32>::zeros((batch, hs));
        let mut dh = d_h_last.clone();
        let mut dc = Array2::<f32>::zeros((batch, hs));

        for t in (0..seq_len).rev() {
            let act = &trace.gates[t];
            let f = act.slice(s![.., ..hs]);
            let o = act.slice(s![.., hs..2 * hs]);
            let g = act.slice(s![.., 2 * hs..]);

            let tanh_c = trace.c_n.index_axis(Axis(1), t).mapv(f32::tanh);
            let c_prev = previous_step(&trace.c_n, t);
            let h_prev = previous_step(&trace.h_n, t);

            let d_o = &dh * &tanh_c;
            dc = dc + &dh * &o * &tanh_c.mapv(|v| 1.0 - v * v);
            let d_f = &dc * &c_prev;
            let d_g = &dc * i;
            d_input_gate += &(&dc * &g);

            let mut d_pre = Array2::zeros((batch, 3 * hs));
            d_pre.slice_mut(s![.., ..hs]).assign(&(&d_f * &f.mapv(sigmoid_grad)));
            d_pre.slice_mut(s![.., hs..2 * hs]).assign(&(&d_o * &o.mapv(sigmoid_grad)));
            d_pre.slice_mut(s![.., 2 * hs..]).assign(&(&d_g * &g.mapv(tanh_grad)));

            let x_t = trace.x_dyn.index_axis(Axis(1), t);
            grads.w_ih += &x_t.t().dot(&d_pre);
            grads.w_hh += &h_prev.t().dot(&d_pre);
            grads.bias += &d_pre.sum_axis(Axis(0));

            dh = d_pre.dot(&self.w_hh.t());
            dc = &dc * &f;
        }

        let d_pre_i = d_input_gate * &i.mapv(sigmoid_grad);
        grads.w_sh = trace.x_static.t().dot(&d_pre_i);
        grads.bias_s = d_pre_i.sum_axis(Axis(0));

        Ok(grads)
    }

    pub fn param_count(&self) -> usize {
        self.w_ih.len() + self.w_hh.len() + self.w_sh.len() + self.bias.len() + self.bias_s.len()
    }
}

impl EaLstmTrace {
    /// The input gate used for every timestep of the traced sequences.
    pub fn input_gate(&self) -> &Array2<f32> {
        &self.input_gate
    }
}

// ──────────────────────────────────────────────────────────────
// Tagged cell variant
// ──────────────────────────────────────────────────────────────

/// The recurrent cell of a model, chosen once at construction time.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum RecurrentCell {
    Standard(LstmCell),
    EntityAware(EaLstmCell),
}

/// Forward trace of either cell variant.
#[derive(Clone, Debug)]
pub enum CellTrace {
    Standard(LstmTrace),
    EntityAware(EaLstmTrace),
}

/// Parameter gradients of either cell variant.
#[derive(Clone, Debug)]
pub enum CellGrads {
    Standard(LstmGrads),
    EntityAware(EaLstmGrads),
}

impl RecurrentCell {
    pub fn forward(
        &self,
        x_dyn: ArrayView3<f32>,
        x_static: Option<ArrayView2<f32>>,
    ) -> Result<CellTrace> {
        match self {
            Self::Standard(cell) => cell.forward(x_dyn, x_static).map(CellTrace::Standard),
            Self::EntityAware(cell) => cell.forward(x_dyn, x_static).map(CellTrace::EntityAware),
        }
    }

    pub fn backward(&self, trace: &CellTrace, d_h_last: &Array2<f32>) -> Result<CellGrads> {
        match (self, trace) {
            (Self::Standard(cell), CellTrace::Standard(tr)) => {
                cell.backward(tr, d_h_last).map(CellGrads::Standard)
            }
            (Self::EntityAware(cell), CellTrace::EntityAware(tr)) => {
                cell.backward(tr, d_h_last).map(CellGrads::EntityAware)
            }
            _ => Err(HydroError::Shape(
                "cell trace does not belong to this cell variant".into(),
            )),
        }
    }

    pub fn hidden_size(&self) -> usize {
        match self {
            Self::Standard(cell) => cell.hidden_size,
            Self::EntityAware(cell) => cell.hidden_size,
        }
    }

    /// Whether the cell has a dedicated static-attribute pathway.
    pub fn is_entity_aware(&self) -> bool {
        matches!(self, Self::EntityAware(_))
    }

    pub fn param_count(&self) -> usize {
        match self {
            Self::Standard(cell) => cell.param_count(),
            Self::EntityAware(cell) => cell.param_count(),
        }
    }

    /// Mutable views of all parameters, in the order of [`CellGrads::views`].
    pub fn params_mut(&mut self) -> Vec<ArrayViewMutD<'_, f32>> {
        match self {
            Self::Standard(c) => vec![
                c.w_ih.view_mut().into_dyn(),
                c.w_hh.view_mut().into_dyn(),
                c.bias.view_mut().into_dyn(),
            ],
            Self::EntityAware(c) => vec![
                c.w_ih.view_mut().into_dyn(),
                c.w_hh.view_mut().into_dyn(),
                c.w_sh.view_mut().into_dyn(),
                c.bias.view_mut().into_dyn(),
                c.bias_s.view_mut().into_dyn(),
            ],
        }
    }
}

impl CellTrace {
    /// Hidden states of every timestep: [batch, T, H]
    pub fn hidden_states(&self) -> &Array3<f32> {
        match self {
            Self::Standard(tr) => &tr.h_n,
            Self::EntityAware(tr) => &tr.h_n,
        }
    }

    /// Cell states of every timestep: [batch, T, H]
    pub fn cell_states(&self) -> &Array3<f32> {
        match self {
            Self::Standard(tr) => &tr.c_n,
            Self::EntityAware(tr) => &tr.c_n,
        }
    }

    /// Hidden state of the final timestep: [batch, H]
    pub fn last_hidden(&self) -> Result<Array2<f32>> {
        let h_n = self.hidden_states();
        let seq_len = h_n.len_of(Axis(1));
        if seq_len == 0 {
            return Err(HydroError::Shape("cannot take the last step of an empty sequence".into()));
        }
        Ok(h_n.index_axis(Axis(1), seq_len - 1).to_owned())
    }
}

impl CellGrads {
    /// Gradient views, in the order of [`RecurrentCell::params_mut`].
    pub fn views(&self) -> Vec<ArrayViewD<'_, f32>> {
        match self {
            Self::Standard(g) => vec![
                g.w_ih.view().into_dyn(),
                g.w_hh.view().into_dyn(),
                g.bias.view().into_dyn(),
            ],
            Self::EntityAware(g) => vec![
                g.w_ih.view().into_dyn(),
                g.w_hh.view().into_dyn(),
                g.w_sh.view().into_dyn(),
                g.bias.view().into_dyn(),
                g.bias_s.view().into_dyn(),
            ],
        }
    }

    pub fn views_mut(&mut self) -> Vec<ArrayViewMutD<'_, f32>> {
        match self {
            Self::Standard(g) => vec![
                g.w_ih.view_mut().into_dyn(),
                g.w_hh.view_mut().into_dyn(),
                g.bias.view_mut().into_dyn(),
            ],
            Self::EntityAware(g) => vec![
                g.w_ih.view_mut().into_dyn(),
                g.w_hh.view_mut().into_dyn(),
                g.w_sh.view_mut().into_dyn(),
                g.bias.view_mut().into_dyn(),
                g.bias_s.view_mut().into_dyn(),
            ],
        }
    }
}

// ──────────────────────────────────────────────────────────────
// Helpers
// ──────────────────────────────────────────────────────────────

/// Scalar sigmoid: 1 / (1 + exp(-x))
pub(crate) fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// σ'(z) expressed through the activation s = σ(z).
fn sigmoid_grad(s: f32) -> f32 {
    s * (1.0 - s)
}

/// tanh'(z) expressed through the activation a = tanh(z).
fn tanh_grad(a: f32) -> f32 {
    1.0 - a * a
}

/// Sigmoid on the first `sigmoid_cols` columns, tanh on the rest.
fn activate_gates(mut pre: Array2<f32>, sigmoid_cols: usize) -> Array2<f32> {
    pre.slice_mut(s![.., ..sigmoid_cols]).mapv_inplace(sigmoid);
    pre.slice_mut(s![.., sigmoid_cols..]).mapv_inplace(f32::tanh);
    pre
}

/// State of step `t - 1`, or zeros for the first step.
fn previous_step(states: &Array3<f32>, t: usize) -> Array2<f32> {
    if t == 0 {
        let (batch, _, width) = states.dim();
        Array2::zeros((batch, width))
    } else {
        states.index_axis(Axis(1), t - 1).to_owned()
    }
}

fn check_last_grad(d_h_last: &Array2<f32>, batch: usize, hidden: usize) -> Result<()> {
    if d_h_last.dim() != (batch, hidden) {
        return Err(HydroError::Shape(format!(
            "gradient of last hidden state {:?} does not match [{}, {}]",
            d_h_last.dim(),
            batch,
            hidden
        )));
    }
    Ok(())
}

/// Glorot/Xavier uniform: U(-√(6/(fan_in+fan_out)), √(6/(fan_in+fan_out))).
fn glorot_uniform(rows: usize, cols: usize, rng: &mut impl Rng) -> Array2<f32> {
    let limit = (6.0 / (rows + cols).max(1) as f32).sqrt();
    let dist = Uniform::new_inclusive(-limit, limit);
    Array2::from_shape_fn((rows, cols), |_| dist.sample(&mut *rng))
}

/// Identity matrix repeated `gates` times along the columns: [H, gates·H].
fn repeated_identity(hidden: usize, gates: usize) -> Array2<f32> {
    let mut w = Array2::zeros((hidden, gates * hidden));
    for gate in 0..gates {
        for j in 0..hidden {
            w[[j, gate * hidden + j]] = 1.0;
        }
    }
    w
}
