use ndarray::{Array2, ArrayView2};
use rand::{Rng, SeedableRng, rngs::StdRng};

use crate::{MlErr, Result, arch::Mode};

/// Inverted dropout: zeroes each activation with probability `rate` while training and
/// rescales the survivors, it's the identity in evaluation mode.
#[derive(Clone, Debug)]
pub struct Dropout {
    rate: f32,
    rng: StdRng,
    mask: Option<Array2<f32>>,
}

impl Dropout {
    /// Creates a new `Dropout` layer.
    ///
    /// # Arguments
    /// * `rate` - The probability of dropping an activation, in `[0, 1)`.
    /// * `seed` - The seed for the mask sampling.
    ///
    /// # Returns
    /// A new `Dropout` instance or an error if the rate is out of range.
    pub fn new(rate: f32, seed: u64) -> Result<Self> {
        if !(0.0..1.0).contains(&rate) {
            return Err(MlErr::InvalidArgument(format!(
                "dropout rate must be in [0, 1), got {rate}"
            )));
        }

        Ok(Self {
            rate,
            rng: StdRng::seed_from_u64(seed),
            mask: None,
        })
    }

    pub fn rate(&self) -> f32 {
        self.rate
    }

    pub fn forward(&mut self, x: ArrayView2<f32>, mode: Mode) -> Array2<f32> {
        if mode == Mode::Eval || self.rate == 0.0 {
            self.mask = None;
            return x.to_owned();
        }

        let keep = 1.0 - self.rate;
        let rng = &mut self.rng;
        let mask = Array2::from_shape_fn(x.raw_dim(), |_| {
            if rng.random::<f32>() < keep { 1.0 / keep } else { 0.0 }
        });

        let y = &x * &mask;
        self.mask = Some(mask);
        y
    }

    pub fn backward(&mut self, d: Array2<f32>) -> Array2<f32> {
        match &self.mask {
            Some(mask) => d * mask,
            None => d,
        }
    }
}
