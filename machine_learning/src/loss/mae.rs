use ndarray::{ArrayD, ArrayViewD};

use super::{LossFn, loss_fn::check_same_shape};
use crate::Result;

/// Mean absolute error loss function.
#[derive(Debug, Default, Clone, Copy)]
pub struct Mae;

impl LossFn for Mae {
    fn loss(&self, y_pred: ArrayViewD<f32>, y: ArrayViewD<f32>) -> Result<f32> {
        check_same_shape(&y_pred, &y)?;
        Ok((&y_pred - &y).mapv(f32::abs).mean().unwrap_or_default())
    }

    fn loss_prime(&self, y_pred: ArrayViewD<f32>, y: ArrayViewD<f32>) -> Result<ArrayD<f32>> {
        check_same_shape(&y_pred, &y)?;

        let n = y_pred.len().max(1) as f32;
        Ok((&y_pred - &y).mapv(|d| {
            if d == 0.0 { 0.0 } else { d.signum() / n }
        }))
    }
}
