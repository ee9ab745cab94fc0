pub mod arch;
pub mod dataset;
pub mod device;
pub mod error;
pub mod loss;
pub mod optimization;
pub mod param_gen;
pub mod tensor;
mod test;
pub mod training;

pub use error::{MlErr, Result};
