mod checkpoint;
mod engine;
mod metrics;
mod sink;
mod split;

pub use checkpoint::{
    CHECKPOINT_EXT, CheckpointKind, CheckpointTracker, HostResidency, checkpoint_path,
    load_checkpoint, save_checkpoint, save_model,
};
pub use engine::{EnsembleTrainer, TrainOptions, TrainSettings};
pub use metrics::{
    EpochMetrics, LossAccumulator, TrainingLog, average_losses, examples_per_second, format_g,
};
pub use sink::{NullSink, SCALARS_FILE, ScalarEvent, ScalarLog, ScalarSink};
pub use split::{DeviceBatch, split_batch};
