pub mod activations;
pub mod layers;
mod model;
mod sequential;

pub use model::{Mode, Model, StateDict, StateEntry};
pub use sequential::Sequential;
