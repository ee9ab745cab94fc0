use std::{fs, path::PathBuf};

use log::{info, warn};
use machine_learning::{
    dataset::{DataLoader, InMemoryDataset},
    device::Device,
    training::{EnsembleTrainer, TrainOptions, TrainingLog},
};
use rand::{SeedableRng, rngs::StdRng};
use rayon::prelude::*;

use crate::{
    configs::{Adapter, FoldSeeds, SettingsConfig},
    error::OrchestratorError,
};

/// Everything a single fold of the search needs besides its datasets and device.
#[derive(Debug, Clone)]
pub struct FoldSettings {
    pub settings: SettingsConfig,
    pub epochs: usize,
    /// Checkpoints are written to `{base_out_dir}/{settings_id}-{i}-{best|last}.safetensors`.
    pub base_out_dir: PathBuf,
    /// Scalar series are written under `{base_log_dir}/{settings_id}`.
    pub base_log_dir: PathBuf,
    pub num_nets_to_train: usize,
    pub batch_use_prob: f64,
    pub print_log: bool,
}

impl FoldSettings {
    pub fn out_prefix(&self) -> PathBuf {
        self.base_out_dir.join(&self.settings.settings_id)
    }

    pub fn log_dir(&self) -> PathBuf {
        self.base_log_dir.join(&self.settings.settings_id)
    }
}

/// Checks that every settings file consumes the same dataset elements.
///
/// # Arguments
/// * `settings` - The settings of every fold.
///
/// # Returns
/// The element names of the first settings file (inputs then labels), or
/// `OrchestratorError::InvalidConfig` if there are no settings or any of them disagrees.
pub fn check_element_names(settings: &[SettingsConfig]) -> Result<Vec<String>, OrchestratorError> {
    let Some(first) = settings.first() else {
        return Err(OrchestratorError::InvalidConfig(
            "no training settings were given".into(),
        ));
    };

    let names = first.element_names();
    for other in &settings[1..] {
        if other.element_names() != names {
            return Err(OrchestratorError::InvalidConfig(format!(
                "{} consumes elements {:?} but {} consumes {:?}",
                other.settings_id,
                other.element_names(),
                first.settings_id,
                names
            )));
        }
    }

    Ok(names)
}

/// Trains a single fold.
///
/// # Arguments
/// * `fold` - The fold to train.
/// * `train` - The training dataset.
/// * `val` - The validation dataset.
/// * `device` - The compute device the fold owns.
///
/// # Returns
/// The fold's per-epoch metrics or the first error found.
pub fn run_training(
    fold: &FoldSettings,
    train: &InMemoryDataset,
    val: &InMemoryDataset,
    device: Device,
) -> Result<TrainingLog, OrchestratorError> {
    let settings = &fold.settings;
    let adapter = Adapter::new();

    adapter.validate_settings(settings)?;
    check_input_size(settings, train)?;
    check_input_size(settings, val)?;

    let seeds = FoldSeeds::new(settings.seed, fold.num_nets_to_train);
    let (models, train_settings) = adapter.adapt_settings(settings, &seeds, fold.epochs)?;

    let element_names = settings.element_names();
    let shuffle = settings
        .shuffle
        .then(|| StdRng::seed_from_u64(seeds.shuffle));

    let mut train = DataLoader::new(train.clone(), &element_names, settings.batch_size, shuffle)?;
    let mut val =
        DataLoader::<StdRng>::new(val.clone(), &element_names, settings.batch_size, None)?;

    if train.is_empty() || val.is_empty() {
        warn!(settings_id = settings.settings_id.as_str(); "fold has an empty dataset");
    }

    fs::create_dir_all(&fold.base_out_dir)?;

    let options = TrainOptions {
        out_prefix: fold.out_prefix(),
        batch_use_prob: fold.batch_use_prob,
        print_log: fold.print_log,
        log_dir: Some(fold.log_dir()),
        device,
        seed: Some(seeds.participation),
    };

    info!(
        settings_id = settings.settings_id.as_str(),
        models = fold.num_nets_to_train,
        epochs = fold.epochs;
        "training fold"
    );

    let mut trainer = EnsembleTrainer::new(models, train_settings, options)?;
    let log = trainer.train(&mut train, &mut val)?;

    info!(settings_id = settings.settings_id.as_str(); "fold finished");
    println!("{}", settings.settings_id);

    Ok(log)
}

fn check_input_size(
    settings: &SettingsConfig,
    dataset: &InMemoryDataset,
) -> Result<(), OrchestratorError> {
    let mut width = 0;
    for name in &settings.input_names {
        let Some(element) = dataset.element(name) else {
            return Err(OrchestratorError::InvalidConfig(format!(
                "{}: dataset has no element {name}",
                settings.settings_id
            )));
        };

        width += element.shape().iter().skip(1).product::<usize>();
    }

    match settings.model.input_size() {
        Some(expected) if expected != width => Err(OrchestratorError::InvalidConfig(format!(
            "{}: model expects {expected} input features but the dataset has {width}",
            settings.settings_id
        ))),
        _ => Ok(()),
    }
}

/// Trains every fold, running up to `parallelism` of them at once.
///
/// # Arguments
/// * `folds` - The folds to train.
/// * `train` - The training dataset shared by every fold.
/// * `val` - The validation dataset shared by every fold.
/// * `parallelism` - The maximum amount of folds trained at the same time.
/// * `accelerator_memory` - The byte capacity of each fold's accelerator, the host is used
///   when `None`.
///
/// # Returns
/// The settings id and metrics of every fold in the order given, or the first fold failure.
pub fn run_folds(
    folds: &[FoldSettings],
    train: &InMemoryDataset,
    val: &InMemoryDataset,
    parallelism: usize,
    accelerator_memory: Option<usize>,
) -> Result<Vec<(String, TrainingLog)>, OrchestratorError> {
    if parallelism == 0 {
        return Err(OrchestratorError::InvalidConfig(
            "parallelism must be greater than 0".into(),
        ));
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(parallelism)
        .build()
        .map_err(|e| OrchestratorError::InvalidConfig(format!("cannot start worker pool: {e}")))?;

    info!(folds = folds.len(), parallelism = parallelism; "running folds");

    pool.install(|| {
        folds
            .par_iter()
            .enumerate()
            .map(|(i, fold)| {
                let device = match accelerator_memory {
                    Some(bytes) => Device::accelerator(i, Some(bytes)),
                    None => Device::host(),
                };

                let settings_id = fold.settings.settings_id.clone();
                run_training(fold, train, val, device)
                    .map(|log| (settings_id.clone(), log))
                    .map_err(|e| OrchestratorError::FoldFailed {
                        settings_id,
                        source: Box::new(e),
                    })
            })
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(id: &str, inputs: &[&str]) -> SettingsConfig {
        let mut settings: SettingsConfig = serde_json::from_str(
            r#"{
                "settings_id": "",
                "input_names": [],
                "label_names": ["y"],
                "model": {"type": "sequential", "layers": [{"type": "dense", "dim": [1, 1]}]},
                "loss": "mse",
                "optimizer": {"type": "gradient_descent", "lr": 0.1},
                "batch_size": 2
            }"#,
        )
        .unwrap();

        settings.settings_id = id.into();
        settings.input_names = inputs.iter().map(|s| s.to_string()).collect();
        settings
    }

    #[test]
    fn element_names_come_from_the_first_settings() {
        let names = check_element_names(&[settings("a", &["x"]), settings("b", &["x"])]).unwrap();
        assert_eq!(names, ["x", "y"]);
    }

    #[test]
    fn disagreeing_element_names_are_rejected() {
        let res = check_element_names(&[settings("a", &["x"]), settings("b", &["z"])]);
        assert!(matches!(res, Err(OrchestratorError::InvalidConfig(_))));

        assert!(check_element_names(&[]).is_err());
    }

    #[test]
    fn input_size_must_match_the_dataset() {
        let dataset = InMemoryDataset::new(
            vec![
                ("x".into(), ndarray::Array2::<f32>::zeros((4, 2)).into_dyn()),
                ("y".into(), ndarray::Array1::<f32>::zeros(4).into_dyn()),
            ],
            None,
        )
        .unwrap();

        assert!(matches!(
            check_input_size(&settings("a", &["x"]), &dataset),
            Err(OrchestratorError::InvalidConfig(_))
        ));
        assert!(check_input_size(&settings("a", &["y"]), &dataset).is_ok());
    }

    #[test]
    fn validation_width_is_checked_before_training() {
        let dataset = |width| {
            InMemoryDataset::new(
                vec![
                    ("x".into(), ndarray::Array2::<f32>::zeros((4, width)).into_dyn()),
                    ("y".into(), ndarray::Array1::<f32>::zeros(4).into_dyn()),
                ],
                None,
            )
            .unwrap()
        };

        let dir = tempfile::tempdir().unwrap();
        let fold = FoldSettings {
            settings: settings("a", &["x"]),
            epochs: 1,
            base_out_dir: dir.path().join("out"),
            base_log_dir: dir.path().join("logs"),
            num_nets_to_train: 1,
            batch_use_prob: 1.0,
            print_log: false,
        };

        let res = run_training(&fold, &dataset(1), &dataset(2), Device::host());
        assert!(matches!(res, Err(OrchestratorError::InvalidConfig(_))));
        assert!(!dir.path().join("out").exists());
    }

    #[test]
    fn zero_parallelism_is_rejected() {
        let empty = InMemoryDataset::new(vec![], None).unwrap();
        assert!(run_folds(&[], &empty, &empty, 0, None).is_err());
    }
}
