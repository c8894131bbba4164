use crate::algorithms::initializer::InitializationMethod;
use crate::error::SynthesisError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub synthesizer: SynthesizerConfig,
    pub model: ModelConfig,
    pub service: ServiceConfig,
}

/// Where the neighbour search for a new item starts from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeedStrategy {
    /// The zero vector. Assumes a roughly zero-centred embedding space.
    #[default]
    Origin,
    /// Mean of the candidate item embeddings in the snapshot.
    Mean,
    /// The new item's own (pre-existing, usually noisy) snapshot row.
    Current,
}

/// Sign handling for the reconstruction weights after the solve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeightConstraint {
    /// Solve, then renormalize to sum to one. Negative weights are kept.
    #[default]
    Unconstrained,
    /// Clamp negative weights to zero before renormalizing.
    NonNegative,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesizerConfig {
    pub k: usize,
    pub alpha: f64,
    pub sgd_steps: usize,
    pub learning_rate: f64,
    pub momentum: f64,
    pub regularization: f64,
    pub seed: SeedStrategy,
    pub weight_constraint: WeightConstraint,
}

impl Default for SynthesizerConfig {
    fn default() -> Self {
        Self {
            k: 10,
            alpha: 0.5,
            sgd_steps: 3,
            learning_rate: 1e-3,
            momentum: 0.9,
            regularization: 1e-3,
            seed: SeedStrategy::Origin,
            weight_constraint: WeightConstraint::Unconstrained,
        }
    }
}

impl SynthesizerConfig {
    /// Checks everything that can be checked without a model. `k` against
    /// the item count is checked per call.
    pub fn validate(&self) -> Result<(), SynthesisError> {
        if self.k == 0 {
            return Err(SynthesisError::Configuration(
                "k must be at least 1".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.alpha) {
            return Err(SynthesisError::Configuration(format!(
                "alpha must be in [0, 1], got {}",
                self.alpha
            )));
        }

        if !self.learning_rate.is_finite() || self.learning_rate <= 0.0 {
            return Err(SynthesisError::Configuration(format!(
                "learning_rate must be positive and finite, got {}",
                self.learning_rate
            )));
        }

        if !(0.0..1.0).contains(&self.momentum) {
            return Err(SynthesisError::Configuration(format!(
                "momentum must be in [0, 1), got {}",
                self.momentum
            )));
        }

        if !self.regularization.is_finite() || self.regularization <= 0.0 {
            return Err(SynthesisError::Configuration(format!(
                "regularization must be positive and finite, got {}",
                self.regularization
            )));
        }

        Ok(())
    }
}

/// Shape and initialization of the reference graph model used by the CLI.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub num_users: usize,
    pub num_items: usize,
    pub embedding_dim: usize,
    pub propagation_layers: usize,
    pub interactions_per_user: usize,
    pub init: InitializationMethod,
    pub seed: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            num_users: 1000,
            num_items: 5000,
            embedding_dim: 64,
            propagation_layers: 2,
            interactions_per_user: 20,
            init: InitializationMethod::Normal {
                mean: 0.0,
                std_dev: 0.1,
            },
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub batch_size: usize,
    pub persist_momentum: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            batch_size: 256,
            persist_momentum: false,
        }
    }
}

impl Config {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(
                config::Environment::with_prefix("COLDREC")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), SynthesisError> {
        self.synthesizer.validate()?;

        if self.model.embedding_dim == 0 {
            return Err(SynthesisError::Configuration(
                "model.embedding_dim must be at least 1".to_string(),
            ));
        }

        if self.service.batch_size == 0 {
            return Err(SynthesisError::Configuration(
                "service.batch_size must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}
