//! Core module — recurrent cells, regression head, and the discharge model.

pub mod cell;
pub mod head;
pub mod model;
pub mod state;

pub use cell::{EaLstmCell, LstmCell, RecurrentCell, StaticInput};
pub use head::RegressionHead;
pub use model::{DischargeModel, ForwardCache, ModelGrads, ModelSpec, ModelVariant};
