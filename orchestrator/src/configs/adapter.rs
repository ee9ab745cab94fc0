use machine_learning::{
    arch::{Model, Sequential, activations::ActFn, layers::Layer},
    loss::LossKind,
    optimization::{Adam, GradientDescent, GradientDescentWithMomentum, Optimizer},
    param_gen::ParamGen,
    training::TrainSettings,
};
use rand::{Rng, SeedableRng, rngs::StdRng};

use super::{
    ActFnConfig, LayerConfig, LossFnConfig, ModelConfig, OptimizerConfig, ParamGenConfig,
    SettingsConfig,
};
use crate::error::OrchestratorError;

/// The independent seeds of every random stream of a fold, all drawn from a single master seed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoldSeeds {
    /// Seeds the batch participation sampling of the engine.
    pub participation: u64,
    /// Seeds the per-epoch shuffle of the training data.
    pub shuffle: u64,
    /// Seeds the initialisation of each model, one per model.
    pub init: Vec<u64>,
}

impl FoldSeeds {
    /// Draws the seeds of a fold training `num_nets` models.
    ///
    /// # Arguments
    /// * `seed` - The master seed, drawn from the OS when `None`.
    /// * `num_nets` - The amount of models of the fold.
    pub fn new(seed: Option<u64>, num_nets: usize) -> Self {
        let mut master = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        Self {
            participation: master.random(),
            shuffle: master.random(),
            init: (0..num_nets).map(|_| master.random()).collect(),
        }
    }
}

/// Validates settings files and turns them into the models and training settings of a fold.
#[derive(Debug, Default)]
pub struct Adapter;

impl Adapter {
    pub fn new() -> Self {
        Self
    }

    /// Builds `num_nets` identically structured, independently initialized models and their
    /// training settings.
    ///
    /// # Arguments
    /// * `settings` - The fold's settings.
    /// * `seeds` - The fold's seeds, one model is built per initialisation seed.
    /// * `epochs` - The amount of epochs every model is trained for.
    ///
    /// # Returns
    /// The models and their settings, or `OrchestratorError::InvalidConfig` if the settings are
    /// invalid.
    pub fn adapt_settings(
        &self,
        settings: &SettingsConfig,
        seeds: &FoldSeeds,
        epochs: usize,
    ) -> Result<(Vec<Sequential>, Vec<TrainSettings>), OrchestratorError> {
        self.validate_settings(settings)?;

        let num_nets = seeds.init.len();
        if num_nets == 0 {
            return Err(OrchestratorError::InvalidConfig(
                "at least one network must be trained".into(),
            ));
        }

        let mut models = Vec::with_capacity(num_nets);
        let mut train_settings = Vec::with_capacity(num_nets);

        for &seed in &seeds.init {
            let mut rng = StdRng::seed_from_u64(seed);
            let model = self.adapt_model(settings, &mut rng)?;
            let optimizer = self.adapt_optimizer(settings.optimizer, model.size());
            let loss = self.adapt_loss_fn(settings.loss).build();

            models.push(model);
            train_settings.push(TrainSettings::new(loss, optimizer, epochs));
        }

        Ok((models, train_settings))
    }

    // -------------------------------------------------------------------------
    // Validation
    // -------------------------------------------------------------------------

    /// Checks a settings file without building anything.
    pub fn validate_settings(&self, settings: &SettingsConfig) -> Result<(), OrchestratorError> {
        if settings.settings_id.is_empty() {
            return Err(OrchestratorError::InvalidConfig(
                "settings_id must not be empty".into(),
            ));
        }
        if settings.input_names.is_empty() || settings.label_names.is_empty() {
            return Err(OrchestratorError::InvalidConfig(format!(
                "{}: input_names and label_names must not be empty",
                settings.settings_id
            )));
        }
        if settings.batch_size == 0 {
            return Err(OrchestratorError::InvalidConfig(format!(
                "{}: batch_size must be greater than 0",
                settings.settings_id
            )));
        }

        let invalid =
            |msg: String| OrchestratorError::InvalidConfig(format!("{}: {msg}", settings.settings_id));

        self.validate_model(&settings.model).map_err(invalid)?;
        self.validate_optimizer(settings.optimizer).map_err(invalid)
    }

    fn validate_model(&self, model: &ModelConfig) -> Result<(), String> {
        let ModelConfig::Sequential { layers } = model;

        let mut dims = layers.iter().enumerate().filter_map(|(i, layer)| match *layer {
            LayerConfig::Dense { dim, .. } => Some((i, dim)),
            LayerConfig::Dropout { .. } => None,
        });

        let Some((first, (n, m))) = dims.next() else {
            return Err("model must have at least one dense layer".into());
        };
        if n == 0 || m == 0 {
            return Err(format!("layer {first}: dimensions must be greater than 0"));
        }

        // Adjacent dense layers must have compatible dimensions: prev.m == next.n
        let mut prev_m = m;
        for (i, (n, m)) in dims {
            if prev_m != n {
                return Err(format!(
                    "layer {i}: input size ({n}) does not match previous layer output size ({prev_m})"
                ));
            }
            if m == 0 {
                return Err(format!("layer {i}: output size must be greater than 0"));
            }
            prev_m = m;
        }

        for (i, layer) in layers.iter().enumerate() {
            let LayerConfig::Dropout { rate } = *layer else {
                continue;
            };

            if !(0.0..1.0).contains(&rate) {
                return Err(format!("layer {i}: dropout rate ({rate}) must be in [0, 1)"));
            }
        }

        Ok(())
    }

    fn validate_optimizer(&self, optimizer: OptimizerConfig) -> Result<(), String> {
        let lr = match optimizer {
            OptimizerConfig::Adam { lr, .. }
            | OptimizerConfig::GradientDescent { lr }
            | OptimizerConfig::GradientDescentWithMomentum { lr, .. } => lr,
        };

        if !(lr.is_finite() && lr > 0.0) {
            return Err(format!("learning rate ({lr}) must be positive"));
        }

        Ok(())
    }

    // -------------------------------------------------------------------------
    // Adaptation
    // -------------------------------------------------------------------------

    fn adapt_model<R: Rng>(
        &self,
        settings: &SettingsConfig,
        rng: &mut R,
    ) -> Result<Sequential, OrchestratorError> {
        let ModelConfig::Sequential { layers } = &settings.model;

        let layers = layers
            .iter()
            .map(|layer| self.adapt_layer(layer, rng))
            .collect::<Result<Vec<_>, _>>()?;

        let mut model = Sequential::new(
            layers,
            settings.input_names.clone(),
            settings.label_names.clone(),
        );

        self.adapt_param_gen(settings.init).init(&mut model, rng)?;
        Ok(model)
    }

    fn adapt_layer<R: Rng>(
        &self,
        layer: &LayerConfig,
        rng: &mut R,
    ) -> Result<Layer, OrchestratorError> {
        let layer = match *layer {
            LayerConfig::Dense { dim, act_fn } => {
                Layer::dense(dim, act_fn.map(|act_fn| self.adapt_act_fn(act_fn)))
            }
            LayerConfig::Dropout { rate } => Layer::dropout(rate, rng.random())?,
        };

        Ok(layer)
    }

    fn adapt_act_fn(&self, act_fn: ActFnConfig) -> ActFn {
        match act_fn {
            ActFnConfig::Sigmoid { amp } => ActFn::sigmoid(amp),
            ActFnConfig::Relu => ActFn::relu(),
            ActFnConfig::Tanh => ActFn::tanh(),
        }
    }

    fn adapt_param_gen(&self, param_gen: ParamGenConfig) -> ParamGen {
        match param_gen {
            ParamGenConfig::Const { value } => ParamGen::Const { value },
            ParamGenConfig::Uniform { low, high } => ParamGen::Uniform { low, high },
            ParamGenConfig::Normal { mean, std_dev } => ParamGen::Normal { mean, std_dev },
            ParamGenConfig::XavierUniform => ParamGen::XavierUniform,
        }
    }

    fn adapt_loss_fn(&self, loss_fn: LossFnConfig) -> LossKind {
        match loss_fn {
            LossFnConfig::WeightedMse => LossKind::WeightedMse,
            LossFnConfig::Mse => LossKind::Mse,
            LossFnConfig::Mae => LossKind::Mae,
        }
    }

    fn adapt_optimizer(&self, optimizer: OptimizerConfig, len: usize) -> Box<dyn Optimizer> {
        match optimizer {
            OptimizerConfig::Adam { lr, b1, b2, eps } => {
                Box::new(Adam::new(len, lr, b1, b2, eps))
            }
            OptimizerConfig::GradientDescent { lr } => Box::new(GradientDescent::new(lr)),
            OptimizerConfig::GradientDescentWithMomentum { lr, mu } => {
                Box::new(GradientDescentWithMomentum::new(len, lr, mu))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> SettingsConfig {
        serde_json::from_str(
            r#"{
                "settings_id": "small",
                "input_names": ["x"],
                "label_names": ["y"],
                "model": {"type": "sequential", "layers": [
                    {"type": "dense", "dim": [2, 3], "act_fn": {"type": "relu"}},
                    {"type": "dropout", "rate": 0.1},
                    {"type": "dense", "dim": [3, 1]}
                ]},
                "loss": "weighted_mse",
                "optimizer": {"type": "adam", "lr": 0.01},
                "batch_size": 4,
                "seed": 5
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn builds_independent_models() {
        let seeds = FoldSeeds::new(Some(5), 3);
        let (models, settings) = Adapter::new().adapt_settings(&settings(), &seeds, 7).unwrap();

        assert_eq!(models.len(), 3);
        assert_eq!(settings.len(), 3);
        assert!(settings.iter().all(|s| s.epochs == 7));
        assert_eq!(models[0].size(), 3 * 3 + 4);
        assert_ne!(models[0].params(), models[1].params());
    }

    #[test]
    fn seeded_settings_are_reproducible() {
        let adapter = Adapter::new();
        let (a, _) = adapter.adapt_settings(&settings(), &FoldSeeds::new(Some(5), 1), 1).unwrap();
        let (b, _) = adapter.adapt_settings(&settings(), &FoldSeeds::new(Some(5), 1), 1).unwrap();

        assert_eq!(a[0].params(), b[0].params());
    }

    #[test]
    fn rejects_unchained_layers() {
        let mut settings = settings();
        settings.model = ModelConfig::Sequential {
            layers: vec![
                LayerConfig::Dense {
                    dim: (2, 3),
                    act_fn: None,
                },
                LayerConfig::Dense {
                    dim: (2, 1),
                    act_fn: None,
                },
            ],
        };

        assert!(matches!(
            Adapter::new().adapt_settings(&settings, &FoldSeeds::new(None, 1), 1),
            Err(OrchestratorError::InvalidConfig(_))
        ));
    }

    #[test]
    fn rejects_invalid_values() {
        let adapter = Adapter::new();

        let mut zero_batch = settings();
        zero_batch.batch_size = 0;
        assert!(adapter.validate_settings(&zero_batch).is_err());

        let mut no_labels = settings();
        no_labels.label_names.clear();
        assert!(adapter.validate_settings(&no_labels).is_err());

        let mut bad_lr = settings();
        bad_lr.optimizer = OptimizerConfig::GradientDescent { lr: -1.0 };
        assert!(adapter.validate_settings(&bad_lr).is_err());

        let mut bad_dropout = settings();
        bad_dropout.model = ModelConfig::Sequential {
            layers: vec![
                LayerConfig::Dense {
                    dim: (2, 1),
                    act_fn: None,
                },
                LayerConfig::Dropout { rate: 1.0 },
            ],
        };
        assert!(adapter.validate_settings(&bad_dropout).is_err());

        let no_nets = FoldSeeds::new(None, 0);
        assert!(adapter.adapt_settings(&settings(), &no_nets, 1).is_err());
    }

    #[test]
    fn fold_streams_are_independent() {
        let seeds = FoldSeeds::new(Some(5), 2);
        assert_eq!(seeds, FoldSeeds::new(Some(5), 2));

        let mut all = vec![seeds.participation, seeds.shuffle];
        all.extend(&seeds.init);
        all.sort();
        all.dedup();
        assert_eq!(all.len(), 4);
        assert!(!all.contains(&5));

        let mut settings = settings();
        settings.init = ParamGenConfig::Uniform { low: 0.0, high: 1.0 };
        let (models, _) = Adapter::new().adapt_settings(&settings, &seeds, 1).unwrap();
        let first_weight = models[0].params()[0];

        for seed in [5, seeds.participation, seeds.shuffle] {
            let first_draw: f32 = StdRng::seed_from_u64(seed).random();
            assert_ne!(first_weight, first_draw);
        }
    }

    #[test]
    fn defaults_are_filled_in() {
        let settings = settings();
        assert_eq!(settings.init, ParamGenConfig::XavierUniform);
        assert!(!settings.shuffle);
        assert_eq!(
            settings.optimizer,
            OptimizerConfig::Adam {
                lr: 0.01,
                b1: 0.9,
                b2: 0.999,
                eps: 1e-8
            }
        );
    }
}
