use std::fmt::{self, Display};

use ndarray::ArrayD;

use super::{LossFn, Mae, Mse, WeightedLossFn, WeightedMse};
use crate::{MlErr, Result, tensor::Tensor};

/// The value of a loss and its derivative with respect to every predicted output.
#[derive(Debug, Clone)]
pub struct LossEval {
    pub value: f32,
    pub d_outputs: Vec<ArrayD<f32>>,
}

/// A loss with the engine's uniform calling convention.
pub trait Loss {
    /// Computes the scalar loss only, used when no backward pass follows.
    fn loss(&self, predicted: &[Tensor], labels: &[Tensor], weights: &Tensor) -> Result<f32>;

    /// Computes the scalar loss and its derivative with respect to `predicted`.
    fn evaluate(
        &self,
        predicted: &[Tensor],
        labels: &[Tensor],
        weights: &Tensor,
    ) -> Result<LossEval>;
}

/// Unwraps the common case of models with a single output and a single label, forwarding the
/// per-example weights to the base loss.
#[derive(Debug, Default, Clone, Copy)]
pub struct SingleOutput<L> {
    base: L,
}

impl<L: WeightedLossFn> SingleOutput<L> {
    pub fn new(base: L) -> Self {
        Self { base }
    }

    fn unwrap_single<'a>(
        predicted: &'a [Tensor],
        labels: &'a [Tensor],
    ) -> Result<(&'a Tensor, &'a Tensor)> {
        match (predicted, labels) {
            ([y_pred], [y]) => Ok((y_pred, y)),
            _ => Err(MlErr::ShapeMismatch {
                what: "single output loss arity (predicted, labels)",
                got: vec![predicted.len(), labels.len()],
                expected: vec![1, 1],
            }),
        }
    }
}

impl<L: WeightedLossFn> Loss for SingleOutput<L> {
    fn loss(&self, predicted: &[Tensor], labels: &[Tensor], weights: &Tensor) -> Result<f32> {
        let (y_pred, y) = Self::unwrap_single(predicted, labels)?;
        self.base.loss(y_pred.view(), y.view(), weights.view())
    }

    fn evaluate(
        &self,
        predicted: &[Tensor],
        labels: &[Tensor],
        weights: &Tensor,
    ) -> Result<LossEval> {
        let (y_pred, y) = Self::unwrap_single(predicted, labels)?;
        let value = self.base.loss(y_pred.view(), y.view(), weights.view())?;
        let d = self.base.loss_prime(y_pred.view(), y.view(), weights.view())?;

        Ok(LossEval {
            value,
            d_outputs: vec![d],
        })
    }
}

/// Wraps a loss that doesn't support example weights, the weights are dropped.
///
/// Each output is paired with the label at the same position and the losses are summed.
#[derive(Debug, Default, Clone, Copy)]
pub struct Unweighted<L> {
    base: L,
}

impl<L: LossFn> Unweighted<L> {
    pub fn new(base: L) -> Self {
        Self { base }
    }

    fn check_arity(predicted: &[Tensor], labels: &[Tensor]) -> Result<()> {
        if predicted.len() != labels.len() || predicted.is_empty() {
            return Err(MlErr::ShapeMismatch {
                what: "unweighted loss arity (predicted, labels)",
                got: vec![predicted.len(), labels.len()],
                expected: vec![labels.len().max(1), labels.len().max(1)],
            });
        }

        Ok(())
    }
}

impl<L: LossFn> Loss for Unweighted<L> {
    fn loss(&self, predicted: &[Tensor], labels: &[Tensor], _weights: &Tensor) -> Result<f32> {
        Self::check_arity(predicted, labels)?;

        predicted
            .iter()
            .zip(labels)
            .map(|(y_pred, y)| self.base.loss(y_pred.view(), y.view()))
            .sum()
    }

    fn evaluate(
        &self,
        predicted: &[Tensor],
        labels: &[Tensor],
        _weights: &Tensor,
    ) -> Result<LossEval> {
        Self::check_arity(predicted, labels)?;

        let mut value = 0.0;
        let mut d_outputs = Vec::with_capacity(predicted.len());

        for (y_pred, y) in predicted.iter().zip(labels) {
            value += self.base.loss(y_pred.view(), y.view())?;
            d_outputs.push(self.base.loss_prime(y_pred.view(), y.view())?);
        }

        Ok(LossEval { value, d_outputs })
    }
}

/// The closed set of losses a training run can be configured with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LossKind {
    /// Single output mean squared error, weighted per example.
    WeightedMse,
    /// Mean squared error ignoring the example weights.
    Mse,
    /// Mean absolute error ignoring the example weights.
    Mae,
}

impl LossKind {
    /// Builds the adapted loss for this kind.
    pub fn build(self) -> Box<dyn Loss> {
        match self {
            LossKind::WeightedMse => Box::new(SingleOutput::new(WeightedMse)),
            LossKind::Mse => Box::new(Unweighted::new(Mse)),
            LossKind::Mae => Box::new(Unweighted::new(Mae)),
        }
    }
}

impl Display for LossKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LossKind::WeightedMse => "weighted_mse",
            LossKind::Mse => "mse",
            LossKind::Mae => "mae",
        };

        write!(f, "{name}")
    }
}
