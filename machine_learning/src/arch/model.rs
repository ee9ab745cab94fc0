use ndarray::ArrayD;

use crate::{Result, device::Device, tensor::Tensor};

/// Whether stochastic regularization (e.g. dropout) is active.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    #[default]
    Train,
    Eval,
}

/// A named parameter tensor of a model's learnable state.
#[derive(Debug, Clone, PartialEq)]
pub struct StateEntry {
    pub name: String,
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

/// A model's learnable state, in a stable order.
pub type StateDict = Vec<StateEntry>;

/// A learnable model trained by the ensemble engine.
///
/// The model owns its parameters and its gradient buffer, gradients are accumulated by
/// `backward` until `zero_grad` is called.
pub trait Model {
    /// The names of the batch elements fed as inputs, in order.
    fn input_names(&self) -> &[String];

    /// The names of the batch elements used as labels, in order.
    fn label_names(&self) -> &[String];

    /// Returns the amount of parameters in the model.
    fn size(&self) -> usize;

    /// Computes the model's outputs for the given inputs.
    ///
    /// # Arguments
    /// * `inputs` - One tensor per input name, resident on the model's device.
    ///
    /// # Returns
    /// The output tensors or an error if shapes or devices don't match.
    fn forward(&mut self, inputs: &[Tensor]) -> Result<Vec<Tensor>>;

    /// Backpropagates the derivative of the loss with respect to the outputs of the last
    /// `forward` call, **adding** to the gradient buffer.
    fn backward(&mut self, d_outputs: &[ArrayD<f32>]) -> Result<()>;

    fn zero_grad(&mut self);

    /// Returns the parameters alongside the accumulated gradient, for the optimizer to step.
    fn params_and_grad(&mut self) -> (&mut [f32], &[f32]);

    fn mode(&self) -> Mode;

    fn set_mode(&mut self, mode: Mode);

    /// The device the model's parameters currently reside on.
    fn device(&self) -> &Device;

    /// Moves the model's parameters to `device`. On failure the model stays where it was.
    fn to_device(&mut self, device: &Device) -> Result<()>;

    fn state_dict(&self) -> StateDict;

    fn load_state_dict(&mut self, state: &StateDict) -> Result<()>;
}
