use std::{
    fmt::{self, Display},
    fs,
    path::{Path, PathBuf},
};

use log::{debug, error};
use safetensors::{
    SafeTensors,
    tensor::{Dtype, TensorView},
};

use crate::{
    MlErr, Result,
    arch::{Model, StateDict, StateEntry},
    device::Device,
};

/// The extension of every checkpoint file.
pub const CHECKPOINT_EXT: &str = "safetensors";

/// Which snapshot of a model a checkpoint holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointKind {
    /// Overwritten every time the model's validation loss improves.
    Best,
    /// Written once, at the end of the run.
    Last,
}

impl Display for CheckpointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckpointKind::Best => write!(f, "best"),
            CheckpointKind::Last => write!(f, "last"),
        }
    }
}

/// Returns the path of the checkpoint of model `index`: `{out_prefix}-{index}-{kind}.safetensors`.
pub fn checkpoint_path(out_prefix: &Path, index: usize, kind: CheckpointKind) -> PathBuf {
    let mut path = out_prefix.as_os_str().to_owned();
    path.push(format!("-{index}-{kind}.{CHECKPOINT_EXT}"));
    PathBuf::from(path)
}

/// Tracks the minimum validation loss seen by every model of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckpointTracker {
    min_losses: Vec<f64>,
}

impl CheckpointTracker {
    /// Creates a new tracker for `n` models, every minimum starts at `+inf`.
    pub fn new(n: usize) -> Self {
        Self {
            min_losses: vec![f64::INFINITY; n],
        }
    }

    /// Records the validation loss of model `i`.
    ///
    /// # Returns
    /// `true` if `loss` strictly improves on the model's minimum, which is then updated.
    pub fn observe(&mut self, i: usize, loss: f64) -> bool {
        let improved = loss < self.min_losses[i];
        if improved {
            self.min_losses[i] = loss;
        }

        improved
    }

    pub fn min_losses(&self) -> &[f64] {
        &self.min_losses
    }
}

/// Keeps a model on the host for as long as it lives, moving it back to the device it came from
/// afterwards.
///
/// Prefer `restore` to surface transfer errors, dropping the guard only logs them.
pub struct HostResidency<'a, M: Model + ?Sized> {
    model: &'a mut M,
    device: Option<Device>,
}

impl<'a, M: Model + ?Sized> HostResidency<'a, M> {
    /// Moves `model` to the host.
    ///
    /// # Returns
    /// The guard or an error if the model couldn't leave its device, in which case it stays
    /// where it was.
    pub fn enter(model: &'a mut M) -> Result<Self> {
        let device = model.device().clone();
        model.to_device(&Device::host())?;
        debug!("moved model from {device} to host");

        Ok(Self {
            model,
            device: Some(device),
        })
    }

    pub fn model(&self) -> &M {
        self.model
    }

    /// Moves the model back to its original device.
    pub fn restore(mut self) -> Result<()> {
        match self.device.take() {
            Some(device) => self.model.to_device(&device),
            None => Ok(()),
        }
    }
}

impl<M: Model + ?Sized> Drop for HostResidency<'_, M> {
    fn drop(&mut self) {
        let Some(device) = self.device.take() else {
            return;
        };

        if let Err(e) = self.model.to_device(&device) {
            error!("failed to move model back to {device}: {e}");
        }
    }
}

/// Writes `state` to `path` as a safetensors file.
pub fn save_checkpoint(path: &Path, state: &StateDict) -> Result<()> {
    let views = state
        .iter()
        .map(|entry| -> Result<(&str, TensorView<'_>)> {
            let bytes: &[u8] = bytemuck::cast_slice(entry.data.as_slice());
            let view = TensorView::new(Dtype::F32, entry.shape.clone(), bytes)?;
            Ok((entry.name.as_str(), view))
        })
        .collect::<Result<Vec<_>>>()?;

    let bytes = safetensors::serialize(views, &None)?;
    fs::write(path, bytes)?;
    Ok(())
}

/// Reads a safetensors file written by `save_checkpoint` back into a state dict, sorted by
/// tensor name.
pub fn load_checkpoint(path: &Path) -> Result<StateDict> {
    let bytes = fs::read(path)?;
    let tensors = SafeTensors::deserialize(&bytes)?;

    let mut state = tensors
        .tensors()
        .into_iter()
        .map(|(name, view)| {
            if view.dtype() != Dtype::F32 {
                return Err(MlErr::Checkpoint(format!(
                    "tensor {name} has dtype {:?}, expected F32",
                    view.dtype()
                )));
            }

            let data = view
                .data()
                .chunks_exact(4)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect();

            Ok(StateEntry {
                name,
                shape: view.shape().to_vec(),
                data,
            })
        })
        .collect::<Result<StateDict>>()?;

    state.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(state)
}

/// Persists `model` to `path`, moving it to the host for the duration of the write.
pub fn save_model<M: Model + ?Sized>(model: &mut M, path: &Path) -> Result<()> {
    let residency = HostResidency::enter(model)?;
    save_checkpoint(path, &residency.model().state_dict())?;
    debug!(path:? = path; "saved checkpoint");
    residency.restore()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::{Sequential, layers::Layer};

    fn model() -> Sequential {
        let mut model = Sequential::new(
            [Layer::dense((2, 2), None), Layer::dense((2, 1), None)],
            vec!["x".into()],
            vec!["y".into()],
        );
        let params = (0..model.size()).map(|i| i as f32 * 0.5).collect();
        model.set_params(params).unwrap();
        model
    }

    #[test]
    fn paths_follow_the_prefix() {
        let prefix = Path::new("/tmp/out/run_a");
        assert_eq!(
            checkpoint_path(prefix, 3, CheckpointKind::Best),
            Path::new("/tmp/out/run_a-3-best.safetensors")
        );
        assert_eq!(
            checkpoint_path(prefix, 0, CheckpointKind::Last),
            Path::new("/tmp/out/run_a-0-last.safetensors")
        );
    }

    #[test]
    fn tracker_requires_strict_improvement() {
        let mut tracker = CheckpointTracker::new(2);

        assert!(tracker.observe(0, 1.0));
        assert!(!tracker.observe(0, 1.0));
        assert!(!tracker.observe(0, 2.0));
        assert!(tracker.observe(0, 0.5));
        assert!(!tracker.observe(1, f64::INFINITY));
        assert_eq!(tracker.min_losses(), &[0.5, f64::INFINITY]);
    }

    #[test]
    fn checkpoints_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.safetensors");
        let original = model();

        save_checkpoint(&path, &original.state_dict()).unwrap();
        let state = load_checkpoint(&path).unwrap();

        let mut restored = Sequential::new(
            [Layer::dense((2, 2), None), Layer::dense((2, 1), None)],
            vec!["x".into()],
            vec!["y".into()],
        );
        restored.load_state_dict(&state).unwrap();
        assert_eq!(restored.params(), original.params());
    }

    #[test]
    fn saving_returns_the_model_to_its_device() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.safetensors");
        let device = Device::accelerator(0, None);

        let mut model = model();
        model.to_device(&device).unwrap();
        let used = device.used_bytes();

        save_model(&mut model, &path).unwrap();
        assert!(path.exists());
        assert_eq!(model.device(), &device);
        assert_eq!(device.used_bytes(), used);
    }

    #[test]
    fn dropping_the_guard_restores_the_device() {
        let device = Device::accelerator(0, None);
        let mut model = model();
        model.to_device(&device).unwrap();

        {
            let residency = HostResidency::enter(&mut model).unwrap();
            assert!(residency.model().device().is_host());
            assert_eq!(device.used_bytes(), 0);
        }

        assert_eq!(model.device(), &device);
    }

    #[test]
    fn missing_files_fail() {
        let dir = tempfile::tempdir().unwrap();
        let res = load_checkpoint(&dir.path().join("missing.safetensors"));
        assert!(matches!(res, Err(MlErr::Io(_))));
    }
}
