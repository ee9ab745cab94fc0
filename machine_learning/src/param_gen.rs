use rand::Rng;
use rand_distr::{Distribution, Normal, Uniform};

use crate::{
    MlErr, Result,
    arch::{Sequential, layers::Layer},
};

/// How the parameters of a dense layer get their initial values.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParamGen {
    Const { value: f32 },
    Uniform { low: f32, high: f32 },
    Normal { mean: f32, std_dev: f32 },
    /// Glorot uniform weights, `U(-l, l)` with `l = sqrt(6 / (fan_in + fan_out))`, zero biases.
    XavierUniform,
}

impl ParamGen {
    /// Generates the parameters of a dense layer, weights first then biases.
    ///
    /// # Arguments
    /// * `dim` - The fan in and fan out of the layer.
    /// * `rng` - The random number generator to sample from.
    ///
    /// # Returns
    /// The `(fan_in + 1) * fan_out` parameters or an error if the distribution is invalid.
    pub fn generate<R: Rng>(
        &self,
        (fan_in, fan_out): (usize, usize),
        rng: &mut R,
    ) -> Result<Vec<f32>> {
        let w_size = fan_in * fan_out;
        let size = w_size + fan_out;

        let params = match *self {
            ParamGen::Const { value } => vec![value; size],
            ParamGen::Uniform { low, high } => {
                let dist = Uniform::<f32>::new(low, high).map_err(|e| invalid(self, e))?;
                dist.sample_iter(rng).take(size).collect()
            }
            ParamGen::Normal { mean, std_dev } => {
                let dist = Normal::new(mean, std_dev).map_err(|e| invalid(self, e))?;
                dist.sample_iter(rng).take(size).collect()
            }
            ParamGen::XavierUniform => {
                let limit = (6.0 / (fan_in + fan_out).max(1) as f32).sqrt();
                let dist = Uniform::<f32>::new_inclusive(-limit, limit)
                    .map_err(|e| invalid(self, e))?;

                let mut params: Vec<f32> = dist.sample_iter(rng).take(w_size).collect();
                params.resize(size, 0.0);
                params
            }
        };

        Ok(params)
    }

    /// Initializes every dense layer of `model`.
    pub fn init<R: Rng>(&self, model: &mut Sequential, rng: &mut R) -> Result<()> {
        let mut params = Vec::with_capacity(model.params().len());

        for layer in model.layers() {
            if let Layer::Dense(dense) = layer {
                params.extend(self.generate(dense.dim(), rng)?);
            }
        }

        model.set_params(params)
    }
}

fn invalid(param_gen: &ParamGen, e: impl std::fmt::Display) -> MlErr {
    MlErr::InvalidArgument(format!(
        "invalid parameter distribution {param_gen:?}: {e}"
    ))
}
