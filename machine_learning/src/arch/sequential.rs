use std::mem;

use ndarray::{Array2, ArrayD, ArrayView2, Axis, Ix2, concatenate};

use super::{Mode, Model, StateDict, StateEntry, layers::Layer};
use crate::{
    MlErr, Result,
    device::{Device, Lease},
    tensor::Tensor,
};

/// A sequential model: information flows forward when computing an output and backward when
/// computing the *deltas* of its layers.
///
/// Every input tensor is seen as a `(batch, features)` matrix, the inputs are concatenated
/// along the feature axis and a single output tensor is produced.
#[derive(Debug)]
pub struct Sequential {
    layers: Vec<Layer>,
    input_names: Vec<String>,
    label_names: Vec<String>,
    params: Vec<f32>,
    grad: Vec<f32>,
    mode: Mode,
    device: Device,
    residency: Option<Lease>,
}

impl Sequential {
    /// Creates a new `Sequential` on the host, with all its parameters set to zero.
    ///
    /// # Arguments
    /// * `layers` - The layers the sequential is composed of.
    /// * `input_names` - The names of the batch elements it consumes.
    /// * `label_names` - The names of the batch elements it's trained against.
    ///
    /// # Returns
    /// A new `Sequential` instance.
    pub fn new<I>(layers: I, input_names: Vec<String>, label_names: Vec<String>) -> Self
    where
        I: IntoIterator<Item = Layer>,
    {
        let layers: Vec<Layer> = layers.into_iter().collect();
        let size = layers.iter().map(Layer::size).sum();

        Self {
            layers,
            input_names,
            label_names,
            params: vec![0.0; size],
            grad: vec![0.0; size],
            mode: Mode::Train,
            device: Device::host(),
            residency: None,
        }
    }

    pub fn params(&self) -> &[f32] {
        &self.params
    }

    /// Overwrites every parameter of the model.
    ///
    /// # Returns
    /// A shape mismatch error if `params` doesn't have exactly `size()` elements.
    pub fn set_params(&mut self, params: Vec<f32>) -> Result<()> {
        if params.len() != self.params.len() {
            return Err(MlErr::ShapeMismatch {
                what: "parameters",
                got: vec![params.len()],
                expected: vec![self.params.len()],
            });
        }

        self.params = params;
        Ok(())
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    fn as_matrix<'a>(&self, tensor: &'a Tensor) -> Result<ArrayView2<'a, f32>> {
        if tensor.device() != &self.device {
            return Err(MlErr::DeviceMismatch {
                expected: self.device.to_string(),
                got: tensor.device().to_string(),
            });
        }

        let view = tensor.view();
        let view = if view.ndim() == 1 {
            view.insert_axis(Axis(1))
        } else {
            view
        };

        view.into_dimensionality::<Ix2>()
            .map_err(|_| MlErr::ShapeMismatch {
                what: "model input rank",
                got: tensor.shape().to_vec(),
                expected: vec![tensor.nrows(), 0],
            })
    }
}

impl Model for Sequential {
    fn input_names(&self) -> &[String] {
        &self.input_names
    }

    fn label_names(&self) -> &[String] {
        &self.label_names
    }

    fn size(&self) -> usize {
        self.params.len()
    }

    fn forward(&mut self, inputs: &[Tensor]) -> Result<Vec<Tensor>> {
        if inputs.len() != self.input_names.len() {
            return Err(MlErr::ShapeMismatch {
                what: "model inputs",
                got: vec![inputs.len()],
                expected: vec![self.input_names.len()],
            });
        }

        let views = inputs
            .iter()
            .map(|input| self.as_matrix(input))
            .collect::<Result<Vec<_>>>()?;

        let mut x: Array2<f32> =
            concatenate(Axis(1), &views).map_err(|_| MlErr::ShapeMismatch {
                what: "model inputs leading dimension",
                got: views.iter().map(|v| v.nrows()).collect(),
                expected: vec![views.first().map_or(0, |v| v.nrows()); views.len()],
            })?;

        let Self {
            layers,
            params,
            mode,
            ..
        } = self;

        let mut offset = 0;
        for layer in layers.iter_mut() {
            let size = layer.size();
            x = layer.forward(&params[offset..offset + size], x.view(), *mode)?;
            offset += size;
        }

        Ok(vec![Tensor::from_array(x.into_dyn(), &self.device)?])
    }

    fn backward(&mut self, d_outputs: &[ArrayD<f32>]) -> Result<()> {
        let [d] = d_outputs else {
            return Err(MlErr::ShapeMismatch {
                what: "output gradients",
                got: vec![d_outputs.len()],
                expected: vec![1],
            });
        };

        let shape = d.shape().to_vec();
        let d = if d.ndim() == 1 {
            d.view().insert_axis(Axis(1))
        } else {
            d.view()
        };

        let mut d = d
            .into_dimensionality::<Ix2>()
            .map_err(|_| MlErr::ShapeMismatch {
                what: "output gradient rank",
                expected: vec![shape.first().copied().unwrap_or(0), 0],
                got: shape,
            })?
            .to_owned();

        let Self {
            layers,
            params,
            grad,
            ..
        } = self;

        let mut end = params.len();
        for layer in layers.iter_mut().rev() {
            let start = end - layer.size();
            d = layer.backward(&params[start..end], &mut grad[start..end], d)?;
            end = start;
        }

        Ok(())
    }

    fn zero_grad(&mut self) {
        self.grad.fill(0.0);
    }

    fn params_and_grad(&mut self) -> (&mut [f32], &[f32]) {
        (&mut self.params, &self.grad)
    }

    fn mode(&self) -> Mode {
        self.mode
    }

    fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
    }

    fn device(&self) -> &Device {
        &self.device
    }

    fn to_device(&mut self, device: &Device) -> Result<()> {
        if device == &self.device {
            return Ok(());
        }

        let residency = if device.is_host() {
            None
        } else {
            let bytes = (self.params.len() + self.grad.len()) * mem::size_of::<f32>();
            Some(device.reserve(bytes)?)
        };

        self.residency = residency;
        self.device = device.clone();
        Ok(())
    }

    fn state_dict(&self) -> StateDict {
        let mut state = Vec::new();
        let mut offset = 0;

        for (k, layer) in self.layers.iter().enumerate() {
            let Layer::Dense(dense) = layer else {
                continue;
            };

            let (n, m) = dense.dim();
            let w = &self.params[offset..offset + n * m];
            let b = &self.params[offset + n * m..offset + dense.size()];
            offset += dense.size();

            state.push(StateEntry {
                name: format!("layers.{k}.weight"),
                shape: vec![n, m],
                data: w.to_vec(),
            });
            state.push(StateEntry {
                name: format!("layers.{k}.bias"),
                shape: vec![m],
                data: b.to_vec(),
            });
        }

        state
    }

    fn load_state_dict(&mut self, state: &StateDict) -> Result<()> {
        let mut params = self.params.clone();
        let mut offset = 0;

        for (k, layer) in self.layers.iter().enumerate() {
            let Layer::Dense(dense) = layer else {
                continue;
            };

            let (n, m) = dense.dim();
            for (suffix, shape) in [("weight", vec![n, m]), ("bias", vec![m])] {
                let name = format!("layers.{k}.{suffix}");
                let entry = state
                    .iter()
                    .find(|e| e.name == name)
                    .ok_or_else(|| MlErr::Checkpoint(format!("missing tensor {name}")))?;

                if entry.shape != shape || entry.data.len() != shape.iter().product::<usize>() {
                    return Err(MlErr::ShapeMismatch {
                        what: "checkpoint tensor",
                        got: entry.shape.clone(),
                        expected: shape,
                    });
                }

                let len = entry.data.len();
                params[offset..offset + len].copy_from_slice(&entry.data);
                offset += len;
            }
        }

        self.params = params;
        Ok(())
    }
}
