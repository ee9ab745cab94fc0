use ndarray::ArrayD;

use crate::{MlErr, Result, dataset::Batch, device::Device, tensor::Tensor};

/// A batch split by role and resident on the compute device.
#[derive(Debug)]
pub struct DeviceBatch {
    pub inputs: Vec<Tensor>,
    pub labels: Vec<Tensor>,
    pub weights: Tensor,
}

impl DeviceBatch {
    /// The amount of examples in the batch, the leading dimension of the first input.
    pub fn size(&self) -> usize {
        self.inputs
            .first()
            .map_or_else(|| self.weights.nrows(), Tensor::nrows)
    }
}

/// Splits `batch` positionally into inputs, labels and weights, copying each tensor onto
/// `device`.
///
/// # Arguments
/// * `batch` - The host batch, left untouched.
/// * `num_inputs` - The amount of leading input tensors.
/// * `num_labels` - The amount of label tensors following the inputs.
/// * `device` - The active compute device.
///
/// # Returns
/// The device batch, `MlErr::MalformedBatch` if `batch` doesn't hold exactly
/// `num_inputs + num_labels + 1` tensors or `MlErr::DeviceTransfer` if the device is full.
pub fn split_batch(
    batch: &Batch,
    num_inputs: usize,
    num_labels: usize,
    device: &Device,
) -> Result<DeviceBatch> {
    let expected = num_inputs + num_labels + 1;
    let tensors = batch.tensors();

    if tensors.len() != expected {
        return Err(MlErr::MalformedBatch {
            got: tensors.len(),
            expected,
        });
    }

    let transfer = |range: &[ArrayD<f32>]| {
        range
            .iter()
            .map(|t| Tensor::transfer(t.view(), device))
            .collect::<Result<Vec<_>>>()
    };

    let inputs = transfer(&tensors[..num_inputs])?;
    let labels = transfer(&tensors[num_inputs..expected - 1])?;
    let weights = Tensor::transfer(tensors[expected - 1].view(), device)?;

    Ok(DeviceBatch {
        inputs,
        labels,
        weights,
    })
}

#[cfg(test)]
mod tests {
    use ndarray::IxDyn;

    use super::*;

    fn batch(len: usize) -> Batch {
        let tensors = (0..len)
            .map(|i| ArrayD::from_elem(IxDyn(&[3, 1]), i as f32))
            .collect();

        Batch::new(tensors)
    }

    #[test]
    fn splits_positionally() {
        let src = batch(4);
        let split = split_batch(&src, 2, 1, &Device::host()).unwrap();

        assert_eq!(split.inputs.len(), 2);
        assert_eq!(split.labels.len(), 1);
        assert_eq!(split.size(), 3);
        assert_eq!(split.inputs[1].view()[[0, 0]], 1.0);
        assert_eq!(split.labels[0].view()[[0, 0]], 2.0);
        assert_eq!(split.weights.view()[[0, 0]], 3.0);

        // the source batch is untouched
        assert_eq!(src, batch(4));
    }

    #[test]
    fn wrong_lengths_are_malformed() {
        for len in [0, 1, 2, 3, 5, 9] {
            let res = split_batch(&batch(len), 2, 1, &Device::host());
            assert!(
                matches!(res, Err(MlErr::MalformedBatch { got, expected: 4 }) if got == len),
                "length {len} was accepted"
            );
        }
    }

    #[test]
    fn tensors_land_on_the_device() {
        let device = Device::accelerator(0, Some(1024));
        let split = split_batch(&batch(3), 1, 1, &device).unwrap();

        assert_eq!(split.inputs[0].device(), &device);
        assert_eq!(split.weights.device(), &device);
        assert_eq!(device.used_bytes(), 3 * 3 * 4);

        drop(split);
        assert_eq!(device.used_bytes(), 0);
    }

    #[test]
    fn full_devices_fail_the_transfer() {
        let device = Device::accelerator(0, Some(20));
        let res = split_batch(&batch(3), 1, 1, &device);

        assert!(matches!(res, Err(MlErr::DeviceTransfer { .. })));
        assert_eq!(device.used_bytes(), 0);
    }
}
