use ndarray::{ArrayD, ArrayViewD};

use super::{WeightedLossFn, loss_fn::check_same_shape};
use crate::{MlErr, Result};

/// Mean squared error with per-example weights.
///
/// The squared differences are scaled by the weights broadcast to the labels' shape and
/// only then averaged.
#[derive(Debug, Default, Clone, Copy)]
pub struct WeightedMse;

impl WeightedMse {
    fn broadcast_weights<'a>(
        w: &'a ArrayViewD<'a, f32>,
        y: &ArrayViewD<f32>,
    ) -> Result<ArrayViewD<'a, f32>> {
        w.broadcast(y.raw_dim()).ok_or_else(|| MlErr::ShapeMismatch {
            what: "weights and labels",
            got: w.shape().to_vec(),
            expected: y.shape().to_vec(),
        })
    }
}

impl WeightedLossFn for WeightedMse {
    fn loss(
        &self,
        y_pred: ArrayViewD<f32>,
        y: ArrayViewD<f32>,
        w: ArrayViewD<f32>,
    ) -> Result<f32> {
        check_same_shape(&y_pred, &y)?;
        let w = Self::broadcast_weights(&w, &y)?;

        let diff_squares = (&y_pred - &y).mapv(|x| x.powi(2));
        Ok((diff_squares * &w).mean().unwrap_or_default())
    }

    fn loss_prime(
        &self,
        y_pred: ArrayViewD<f32>,
        y: ArrayViewD<f32>,
        w: ArrayViewD<f32>,
    ) -> Result<ArrayD<f32>> {
        check_same_shape(&y_pred, &y)?;
        let w = Self::broadcast_weights(&w, &y)?;

        let n = y_pred.len().max(1) as f32;
        Ok((&y_pred - &y) * &w * (2.0 / n))
    }
}
