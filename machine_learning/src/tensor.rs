use std::mem;

use ndarray::{ArrayD, ArrayViewD};

use crate::{
    Result,
    device::{Device, Lease},
};

/// An n-dimensional array of `f32`s resident on some device.
#[derive(Debug)]
pub struct Tensor {
    data: ArrayD<f32>,
    lease: Lease,
}

impl Tensor {
    /// Copies `data` onto `device`, the source array is left untouched.
    ///
    /// # Arguments
    /// * `data` - The host array to transfer.
    /// * `device` - The destination device.
    ///
    /// # Returns
    /// The device resident tensor or `MlErr::DeviceTransfer` if the device is out of memory.
    pub fn transfer(data: ArrayViewD<'_, f32>, device: &Device) -> Result<Self> {
        let lease = device.reserve(data.len() * mem::size_of::<f32>())?;

        Ok(Self {
            data: data.to_owned(),
            lease,
        })
    }

    /// Moves an owned array onto `device` without copying its elements.
    pub fn from_array(data: ArrayD<f32>, device: &Device) -> Result<Self> {
        let lease = device.reserve(data.len() * mem::size_of::<f32>())?;
        Ok(Self { data, lease })
    }

    pub fn device(&self) -> &Device {
        self.lease.device()
    }

    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    pub fn view(&self) -> ArrayViewD<'_, f32> {
        self.data.view()
    }

    /// The size of the leading dimension, that is, the amount of examples.
    pub fn nrows(&self) -> usize {
        self.data.shape().first().copied().unwrap_or(0)
    }

    pub fn into_data(self) -> ArrayD<f32> {
        self.data
    }
}
