use std::{fs, path::Path};

use serde::{Deserialize, Serialize};

use super::{ModelConfig, ParamGenConfig};
use crate::error::OrchestratorError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LossFnConfig {
    WeightedMse,
    Mse,
    Mae,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OptimizerConfig {
    Adam {
        lr: f32,
        #[serde(default = "default_b1")]
        b1: f32,
        #[serde(default = "default_b2")]
        b2: f32,
        #[serde(default = "default_eps")]
        eps: f32,
    },
    GradientDescent {
        lr: f32,
    },
    #[serde(rename = "momentum")]
    GradientDescentWithMomentum {
        lr: f32,
        mu: f32,
    },
}

fn default_b1() -> f32 {
    0.9
}

fn default_b2() -> f32 {
    0.999
}

fn default_eps() -> f32 {
    1e-8
}

/// The contents of a single hyperparameter settings file, one per fold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingsConfig {
    /// Names the fold's checkpoints and log directory.
    pub settings_id: String,
    pub input_names: Vec<String>,
    pub label_names: Vec<String>,
    pub model: ModelConfig,
    #[serde(default)]
    pub init: ParamGenConfig,
    pub loss: LossFnConfig,
    pub optimizer: OptimizerConfig,
    pub batch_size: usize,
    #[serde(default)]
    pub shuffle: bool,
    #[serde(default)]
    pub seed: Option<u64>,
}

impl SettingsConfig {
    /// Reads a settings file.
    pub fn load(path: &Path) -> Result<Self, OrchestratorError> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// The names of the dataset elements the fold consumes: inputs then labels.
    pub fn element_names(&self) -> Vec<String> {
        self.input_names
            .iter()
            .chain(&self.label_names)
            .cloned()
            .collect()
    }
}
