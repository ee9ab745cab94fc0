//! Loss functions and the adapters that give all of them the calling convention the
//! training engine expects: `(predicted outputs, labels, weights) -> loss`.

mod adapters;
mod loss_fn;
mod mae;
mod mse;
mod weighted_mse;

pub use adapters::{Loss, LossEval, LossKind, SingleOutput, Unweighted};
pub use loss_fn::{LossFn, WeightedLossFn};
pub use mae::Mae;
pub use mse::Mse;
pub use weighted_mse::WeightedMse;
