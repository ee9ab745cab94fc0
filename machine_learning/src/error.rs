use std::{
    error::Error,
    fmt::{self, Display},
    io,
};

/// The result type used in the entire machine learning module.
pub type Result<T> = std::result::Result<T, MlErr>;

/// The machine learning module's error type.
///
/// Every variant except `Io` describes a structural misconfiguration, they are never retried.
#[derive(Debug)]
pub enum MlErr {
    /// A batch doesn't hold `num_inputs + num_labels + 1` tensors.
    MalformedBatch { got: usize, expected: usize },
    /// Predicted, label or weight shapes are incompatible.
    ShapeMismatch {
        what: &'static str,
        got: Vec<usize>,
        expected: Vec<usize>,
    },
    /// Moving a tensor or a network between devices failed.
    DeviceTransfer {
        device: String,
        requested: usize,
        available: usize,
    },
    /// A tensor lives on a different device than the network consuming it.
    DeviceMismatch { expected: String, got: String },
    /// The networks or settings of a single run disagree with each other.
    HeterogeneousModels {
        what: &'static str,
        index: usize,
    },
    InvalidArgument(String),
    Checkpoint(String),
    Io(io::Error),
}

impl Display for MlErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MlErr::MalformedBatch { got, expected } => write!(
                f,
                "malformed batch: got {got} tensors, expected {expected}"
            ),
            MlErr::ShapeMismatch {
                what,
                got,
                expected,
            } => write!(
                f,
                "shape mismatch for {what}: got {got:?}, expected {expected:?}"
            ),
            MlErr::DeviceTransfer {
                device,
                requested,
                available,
            } => write!(
                f,
                "failed to transfer {requested} bytes to {device}, only {available} bytes available"
            ),
            MlErr::DeviceMismatch { expected, got } => {
                write!(f, "expected data on {expected}, got data on {got}")
            }
            MlErr::HeterogeneousModels { what, index } => write!(
                f,
                "model {index} disagrees with model 0 on its {what}"
            ),
            MlErr::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            MlErr::Checkpoint(msg) => write!(f, "checkpoint error: {msg}"),
            MlErr::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl Error for MlErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            MlErr::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for MlErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<safetensors::SafeTensorError> for MlErr {
    fn from(value: safetensors::SafeTensorError) -> Self {
        Self::Checkpoint(value.to_string())
    }
}
