use std::{fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::{Result, SwarmErr};

/// Hyperparameters of the particle swarm.
///
/// `max_param_value` and `min_param_value` only bound the initial positions, they are never
/// enforced while searching.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SwarmConfig {
    pub inertial_weight: f32,
    pub cognitive_coefficient: f32,
    pub social_coefficient: f32,
    pub num_particles: usize,
    pub max_param_value: f32,
    pub min_param_value: f32,
    pub seed: Option<u64>,
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            inertial_weight: 0.9,
            cognitive_coefficient: 1.,
            social_coefficient: 1.,
            num_particles: 100,
            max_param_value: 10.,
            min_param_value: -10.,
            seed: None,
        }
    }
}

impl SwarmConfig {
    /// Validates the configuration.
    ///
    /// # Returns
    /// An `InvalidConfig` error describing the first violated constraint.
    pub fn validate(&self) -> Result<()> {
        if self.num_particles == 0 {
            return Err(SwarmErr::InvalidConfig(
                "num_particles must be greater than 0".into(),
            ));
        }

        let coefficients = [
            ("inertial_weight", self.inertial_weight),
            ("cognitive_coefficient", self.cognitive_coefficient),
            ("social_coefficient", self.social_coefficient),
            ("max_param_value", self.max_param_value),
            ("min_param_value", self.min_param_value),
        ];

        if let Some((name, value)) = coefficients.iter().find(|(_, v)| !v.is_finite()) {
            return Err(SwarmErr::InvalidConfig(format!(
                "{name} must be finite, got {value}"
            )));
        }

        if self.min_param_value > self.max_param_value {
            return Err(SwarmErr::InvalidConfig(format!(
                "min_param_value ({}) cannot exceed max_param_value ({})",
                self.min_param_value, self.max_param_value
            )));
        }

        Ok(())
    }
}

/// Settings of the gradient refinement bursts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefinerConfig {
    pub epochs: usize,
    pub learning_rate: f32,
}

impl Default for RefinerConfig {
    fn default() -> Self {
        Self {
            epochs: 50,
            learning_rate: 0.02,
        }
    }
}

impl RefinerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.epochs == 0 {
            return Err(SwarmErr::InvalidConfig(
                "epochs must be greater than 0".into(),
            ));
        }

        if !(self.learning_rate.is_finite() && self.learning_rate > 0.) {
            return Err(SwarmErr::InvalidConfig(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            )));
        }

        Ok(())
    }
}

/// Sizing and regularization of a graph attention network.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GatConfig {
    /// Input features per node.
    pub nfeat: usize,
    /// Hidden features per attention head.
    pub nhid: usize,
    /// Output classes.
    pub nclass: usize,
    /// Dropout rate applied to inputs, attention coefficients and hidden features.
    #[serde(default = "default_dropout")]
    pub dropout: f32,
    /// Attention heads of the hidden layer.
    #[serde(default = "default_nheads")]
    pub nheads: usize,
    /// Negative slope of the attention's leaky relu.
    #[serde(default = "default_alpha")]
    pub alpha: f32,
}

fn default_dropout() -> f32 {
    0.6
}

fn default_nheads() -> usize {
    8
}

fn default_alpha() -> f32 {
    0.2
}

impl GatConfig {
    pub fn validate(&self) -> Result<()> {
        let sizes = [
            ("nfeat", self.nfeat),
            ("nhid", self.nhid),
            ("nclass", self.nclass),
            ("nheads", self.nheads),
        ];

        if let Some((name, _)) = sizes.iter().find(|(_, v)| *v == 0) {
            return Err(SwarmErr::InvalidConfig(format!(
                "{name} must be greater than 0"
            )));
        }

        if !(0. ..1.).contains(&self.dropout) {
            return Err(SwarmErr::InvalidConfig(format!(
                "dropout must lie in [0, 1), got {}",
                self.dropout
            )));
        }

        if !self.alpha.is_finite() {
            return Err(SwarmErr::InvalidConfig(format!(
                "alpha must be finite, got {}",
                self.alpha
            )));
        }

        Ok(())
    }
}

/// Everything a hybrid training run needs, loadable from json.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrainingConfig {
    #[serde(default)]
    pub swarm: SwarmConfig,
    #[serde(default)]
    pub refiner: RefinerConfig,
    pub gat: GatConfig,
    #[serde(default = "default_iterations")]
    pub iterations: usize,
}

fn default_iterations() -> usize {
    20
}

impl TrainingConfig {
    /// Parses and validates a configuration from a json string.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a configuration from a json file.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<()> {
        self.swarm.validate()?;
        self.refiner.validate()?;
        self.gat.validate()
    }
}
