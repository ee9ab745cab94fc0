use std::{path::PathBuf, time::Instant};

use log::{debug, info, warn};
use rand::{Rng, SeedableRng, rngs::StdRng};

use super::{
    checkpoint::{self, CheckpointKind, CheckpointTracker},
    metrics::{EpochMetrics, LossAccumulator, TrainingLog, examples_per_second},
    sink::{NullSink, ScalarLog, ScalarSink},
    split::split_batch,
};
use crate::{
    MlErr, Result,
    arch::{Mode, Model},
    dataset::BatchSource,
    device::Device,
    loss::Loss,
    optimization::Optimizer,
};

/// How a single model of the ensemble is trained.
pub struct TrainSettings {
    pub loss: Box<dyn Loss>,
    pub optimizer: Box<dyn Optimizer>,
    pub epochs: usize,
}

impl TrainSettings {
    pub fn new(loss: Box<dyn Loss>, optimizer: Box<dyn Optimizer>, epochs: usize) -> Self {
        Self {
            loss,
            optimizer,
            epochs,
        }
    }
}

/// The options of a whole training run.
#[derive(Debug, Clone)]
pub struct TrainOptions {
    /// Checkpoints are written to `{out_prefix}-{index}-{best|last}.safetensors`.
    pub out_prefix: PathBuf,
    /// The probability of each model consuming each training batch.
    pub batch_use_prob: f64,
    /// Whether to print a summary line per epoch to stdout.
    pub print_log: bool,
    /// Where to write the `train_loss` and `val_loss` series, if anywhere.
    pub log_dir: Option<PathBuf>,
    pub device: Device,
    /// The seed of the participation sampling, drawn from the OS when `None`.
    pub seed: Option<u64>,
}

impl TrainOptions {
    /// Creates the default options for a run writing its checkpoints to `out_prefix`.
    pub fn new(out_prefix: impl Into<PathBuf>) -> Self {
        Self {
            out_prefix: out_prefix.into(),
            batch_use_prob: 1.0,
            print_log: true,
            log_dir: None,
            device: Device::host(),
            seed: None,
        }
    }
}

/// Trains a set of independent models in lockstep over the same batches.
///
/// Within a batch the models are visited in index order, each one completing its forward pass,
/// backward pass and optimizer step before the next one starts.
pub struct EnsembleTrainer<M: Model> {
    models: Vec<M>,
    settings: Vec<TrainSettings>,
    options: TrainOptions,
    tracker: CheckpointTracker,
    min_pooled_loss: f64,
    rng: StdRng,
    epochs: usize,
    num_inputs: usize,
    num_labels: usize,
}

impl<M: Model> EnsembleTrainer<M> {
    /// Creates a new `EnsembleTrainer`.
    ///
    /// # Arguments
    /// * `models` - The models to train, they must all agree on their input and label names.
    /// * `settings` - The settings of each model, they must all agree on the epoch count.
    /// * `options` - The options of the run.
    ///
    /// # Returns
    /// A new trainer, `MlErr::HeterogeneousModels` if the models or settings disagree or
    /// `MlErr::InvalidArgument` for any other invalid argument.
    pub fn new(models: Vec<M>, settings: Vec<TrainSettings>, options: TrainOptions) -> Result<Self> {
        let Some(first) = models.first() else {
            return Err(MlErr::InvalidArgument("there are no models to train".into()));
        };

        if settings.len() != models.len() {
            return Err(MlErr::InvalidArgument(format!(
                "got {} training settings for {} models",
                settings.len(),
                models.len()
            )));
        }

        let p = options.batch_use_prob;
        if !(0.0..=1.0).contains(&p) {
            return Err(MlErr::InvalidArgument(format!(
                "batch use probability must be in [0, 1], got {p}"
            )));
        }

        for (index, model) in models.iter().enumerate().skip(1) {
            if model.input_names() != first.input_names() {
                return Err(MlErr::HeterogeneousModels {
                    what: "input names",
                    index,
                });
            }
            if model.label_names() != first.label_names() {
                return Err(MlErr::HeterogeneousModels {
                    what: "label names",
                    index,
                });
            }
        }

        let epochs = settings[0].epochs;
        if let Some(index) = settings.iter().position(|s| s.epochs != epochs) {
            return Err(MlErr::HeterogeneousModels {
                what: "epoch count",
                index,
            });
        }

        let num_inputs = first.input_names().len();
        let num_labels = first.label_names().len();

        let rng = match options.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        Ok(Self {
            num_inputs,
            num_labels,
            tracker: CheckpointTracker::new(models.len()),
            min_pooled_loss: f64::INFINITY,
            models,
            settings,
            options,
            rng,
            epochs,
        })
    }

    pub fn models(&self) -> &[M] {
        &self.models
    }

    pub fn into_models(self) -> Vec<M> {
        self.models
    }

    /// The minimum validation loss seen by each model so far.
    pub fn min_validation_losses(&self) -> &[f64] {
        self.tracker.min_losses()
    }

    /// Runs every epoch, writing the scalar series to the options' log directory if there's one.
    ///
    /// # Arguments
    /// * `train` - The training batches, iterated once per epoch.
    /// * `val` - The validation batches, iterated once per epoch.
    ///
    /// # Returns
    /// The metrics of every epoch or the first fatal error.
    pub fn train<T, V>(&mut self, train: &mut T, val: &mut V) -> Result<TrainingLog>
    where
        T: BatchSource,
        V: BatchSource,
    {
        match self.options.log_dir.clone() {
            Some(log_dir) => {
                let mut sink = ScalarLog::create(&log_dir)?;
                self.train_with_sink(train, val, &mut sink)
            }
            None => self.train_with_sink(train, val, &mut NullSink),
        }
    }

    /// Same as `train` but sending the scalar series to `sink`.
    pub fn train_with_sink<T, V>(
        &mut self,
        train: &mut T,
        val: &mut V,
        sink: &mut dyn ScalarSink,
    ) -> Result<TrainingLog>
    where
        T: BatchSource,
        V: BatchSource,
    {
        info!(
            models = self.models.len(),
            epochs = self.epochs,
            device:% = self.options.device;
            "starting training"
        );

        for model in &mut self.models {
            model.to_device(&self.options.device)?;
            model.set_mode(Mode::Train);
        }

        let mut log = TrainingLog::new();

        for epoch in 0..self.epochs {
            let metrics = self.run_epoch(epoch, train, val)?;

            if self.options.print_log {
                println!("{}", metrics.to_log_line());
            }

            sink.log_value("train_loss", metrics.train_loss, epoch)?;
            sink.log_value("val_loss", metrics.val_loss, epoch)?;
            sink.flush()?;

            info!(
                epoch = epoch,
                train_loss = metrics.train_loss,
                val_loss = metrics.val_loss;
                "finished epoch"
            );

            log.push(metrics);
        }

        self.finish()?;
        Ok(log)
    }

    fn run_epoch<T, V>(&mut self, epoch: usize, train: &mut T, val: &mut V) -> Result<EpochMetrics>
    where
        T: BatchSource,
        V: BatchSource,
    {
        for model in &mut self.models {
            model.zero_grad();
        }

        let start = Instant::now();
        let train_acc = self.train_phase(train)?;
        let epoch_duration_sec = start.elapsed().as_secs_f64();

        for (i, &examples) in train_acc.examples().iter().enumerate() {
            if examples == 0 {
                warn!("model {i} consumed no training examples in epoch {epoch}");
            }
        }

        self.set_mode(Mode::Eval);
        let val_acc = self.validation_phase(val);
        self.set_mode(Mode::Train);
        let val_acc = val_acc?;

        let val_loss = val_acc.pooled_average();
        let improved = val_loss < self.min_pooled_loss;
        if improved {
            self.min_pooled_loss = val_loss;
        }

        let metrics = EpochMetrics {
            epoch,
            train_loss: train_acc.pooled_average(),
            val_loss,
            epoch_duration_sec,
            examples_per_sec: examples_per_second(train_acc.total_examples(), epoch_duration_sec),
            improved,
            train_losses: train_acc.average_losses(),
            val_losses: val_acc.average_losses(),
            train_examples: train_acc.examples().to_vec(),
        };

        self.save_improved(&metrics.val_losses)?;
        Ok(metrics)
    }

    /// Runs one pass over `train`, each model consuming each batch with probability
    /// `batch_use_prob`.
    fn train_phase<T: BatchSource>(&mut self, train: &mut T) -> Result<LossAccumulator> {
        let mut acc = LossAccumulator::new(self.models.len());
        let device = &self.options.device;

        for batch in train.batches() {
            let batch = split_batch(&batch, self.num_inputs, self.num_labels, device)?;
            let batch_size = batch.size();

            let models = self.models.iter_mut().zip(&mut self.settings);
            for (i, (model, settings)) in models.enumerate() {
                if self.rng.random::<f64>() >= self.options.batch_use_prob {
                    continue;
                }

                let outputs = model.forward(&batch.inputs)?;
                let eval = settings
                    .loss
                    .evaluate(&outputs, &batch.labels, &batch.weights)?;

                model.backward(&eval.d_outputs)?;
                let (params, grad) = model.params_and_grad();
                settings.optimizer.update_params(params, grad)?;
                model.zero_grad();

                acc.accumulate(i, eval.value as f64, batch_size);
            }
        }

        Ok(acc)
    }

    /// Runs one pass over `val`, every model evaluating every batch.
    fn validation_phase<V: BatchSource>(&mut self, val: &mut V) -> Result<LossAccumulator> {
        let mut acc = LossAccumulator::new(self.models.len());
        let device = &self.options.device;

        for batch in val.batches() {
            let batch = split_batch(&batch, self.num_inputs, self.num_labels, device)?;
            let batch_size = batch.size();

            let models = self.models.iter_mut().zip(&self.settings);
            for (i, (model, settings)) in models.enumerate() {
                let outputs = model.forward(&batch.inputs)?;
                let loss = settings
                    .loss
                    .loss(&outputs, &batch.labels, &batch.weights)?;

                acc.accumulate(i, loss as f64, batch_size);
            }
        }

        Ok(acc)
    }

    fn set_mode(&mut self, mode: Mode) {
        for model in &mut self.models {
            model.set_mode(mode);
        }
    }

    /// Writes the best checkpoint of every model whose validation loss improved.
    fn save_improved(&mut self, val_losses: &[f64]) -> Result<()> {
        for (i, (model, &loss)) in self.models.iter_mut().zip(val_losses).enumerate() {
            if !self.tracker.observe(i, loss) {
                continue;
            }

            let path = checkpoint::checkpoint_path(&self.options.out_prefix, i, CheckpointKind::Best);
            checkpoint::save_model(model, &path)?;
            debug!("model {i} improved to a validation loss of {loss}");
        }

        Ok(())
    }

    /// Leaves every model in train mode on the compute device and writes its last checkpoint.
    fn finish(&mut self) -> Result<()> {
        for (i, model) in self.models.iter_mut().enumerate() {
            model.set_mode(Mode::Train);
            model.to_device(&self.options.device)?;

            let path = checkpoint::checkpoint_path(&self.options.out_prefix, i, CheckpointKind::Last);
            checkpoint::save_model(model, &path)?;
        }

        info!(out_prefix:? = self.options.out_prefix; "training finished");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use ndarray::{ArrayD, IxDyn};

    use super::*;
    use crate::{
        arch::{Sequential, layers::Layer},
        dataset::Batch,
        loss::LossKind,
        optimization::GradientDescent,
    };

    fn model(inputs: &[&str]) -> Sequential {
        Sequential::new(
            [Layer::dense((1, 1), None)],
            inputs.iter().map(|s| s.to_string()).collect(),
            vec!["y".into()],
        )
    }

    fn settings(epochs: usize) -> TrainSettings {
        TrainSettings::new(
            LossKind::WeightedMse.build(),
            Box::new(GradientDescent::new(0.1)),
            epochs,
        )
    }

    fn options(dir: &tempfile::TempDir) -> TrainOptions {
        TrainOptions {
            print_log: false,
            seed: Some(7),
            ..TrainOptions::new(dir.path().join("run"))
        }
    }

    #[test]
    fn rejects_heterogeneous_models() {
        let dir = tempfile::tempdir().unwrap();

        let res = EnsembleTrainer::new(
            vec![model(&["x"]), model(&["z"])],
            vec![settings(1), settings(1)],
            options(&dir),
        );
        assert!(matches!(
            res,
            Err(MlErr::HeterogeneousModels { index: 1, .. })
        ));

        let res = EnsembleTrainer::new(
            vec![model(&["x"]), model(&["x"])],
            vec![settings(1), settings(2)],
            options(&dir),
        );
        assert!(matches!(
            res,
            Err(MlErr::HeterogeneousModels {
                what: "epoch count",
                index: 1
            })
        ));
    }

    #[test]
    fn rejects_invalid_probabilities() {
        let dir = tempfile::tempdir().unwrap();

        for p in [-0.1, 1.5, f64::NAN] {
            let options = TrainOptions {
                batch_use_prob: p,
                ..options(&dir)
            };
            let res = EnsembleTrainer::new(vec![model(&["x"])], vec![settings(1)], options);
            assert!(matches!(res, Err(MlErr::InvalidArgument(_))));
        }
    }

    #[test]
    fn malformed_batches_abort_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let mut trainer =
            EnsembleTrainer::new(vec![model(&["x"])], vec![settings(1)], options(&dir)).unwrap();

        let ones = ArrayD::ones(IxDyn(&[2, 1]));
        let mut train = vec![Batch::new(vec![ones.clone(), ones])];
        let mut val = train.clone();

        assert!(matches!(
            trainer.train(&mut train, &mut val),
            Err(MlErr::MalformedBatch {
                got: 2,
                expected: 3
            })
        ));
    }
}
