use ndarray::{ArrayD, ArrayViewD};

use crate::{MlErr, Result};

/// A loss function that doesn't support per-example weights.
pub trait LossFn {
    fn loss(&self, y_pred: ArrayViewD<f32>, y: ArrayViewD<f32>) -> Result<f32>;

    /// The derivative of `loss` with respect to `y_pred`.
    fn loss_prime(&self, y_pred: ArrayViewD<f32>, y: ArrayViewD<f32>) -> Result<ArrayD<f32>>;
}

/// A loss function that scales each example's contribution by a weight.
pub trait WeightedLossFn {
    fn loss(&self, y_pred: ArrayViewD<f32>, y: ArrayViewD<f32>, w: ArrayViewD<f32>)
    -> Result<f32>;

    /// The derivative of `loss` with respect to `y_pred`.
    fn loss_prime(
        &self,
        y_pred: ArrayViewD<f32>,
        y: ArrayViewD<f32>,
        w: ArrayViewD<f32>,
    ) -> Result<ArrayD<f32>>;
}

/// Fails with a shape mismatch unless the predictions and the labels have the same shape.
pub(super) fn check_same_shape(y_pred: &ArrayViewD<f32>, y: &ArrayViewD<f32>) -> Result<()> {
    if y_pred.shape() != y.shape() {
        return Err(MlErr::ShapeMismatch {
            what: "predictions and labels",
            got: y_pred.shape().to_vec(),
            expected: y.shape().to_vec(),
        });
    }

    Ok(())
}
