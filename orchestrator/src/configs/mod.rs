mod adapter;
mod model;
mod training;

pub use adapter::{Adapter, FoldSeeds};
pub use model::{ActFnConfig, LayerConfig, ModelConfig, ParamGenConfig};
pub use training::{LossFnConfig, OptimizerConfig, SettingsConfig};
