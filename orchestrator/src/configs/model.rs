use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActFnConfig {
    Sigmoid {
        #[serde(default = "default_amp")]
        amp: f32,
    },
    Relu,
    Tanh,
}

fn default_amp() -> f32 {
    1.0
}

/// How every dense layer of a model gets its initial parameters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ParamGenConfig {
    Const {
        value: f32,
    },
    Uniform {
        low: f32,
        high: f32,
    },
    Normal {
        mean: f32,
        std_dev: f32,
    },
    #[default]
    XavierUniform,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LayerConfig {
    Dense {
        dim: (usize, usize),
        #[serde(default)]
        act_fn: Option<ActFnConfig>,
    },
    Dropout {
        rate: f32,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ModelConfig {
    Sequential { layers: Vec<LayerConfig> },
}

impl ModelConfig {
    /// The width of the concatenated inputs the model expects, `None` if it has no dense layer.
    pub fn input_size(&self) -> Option<usize> {
        let ModelConfig::Sequential { layers } = self;

        layers.iter().find_map(|layer| match *layer {
            LayerConfig::Dense { dim: (n, _), .. } => Some(n),
            LayerConfig::Dropout { .. } => None,
        })
    }
}
