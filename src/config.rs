//! Configuration parsing and validation.
//!
//! Every strategy's parameters are fully enumerated here — there is no
//! dynamic parameter injection. Unknown strategy names fail at
//! deserialization, and cross-field invariants (stage-list lengths, a
//! terminal stage reaching the full class count) fail in
//! [`TrainConfig::validate`] before any training starts.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::curriculum::StagePlan;
use crate::error::{Result, TrainError};
use crate::training::{CaptureTrigger, LoopOptions};

/// Main configuration for a training run.
///
/// # Example
///
/// ```rust
/// use curriculum_trainer_rs::config::{Strategy, TrainConfig};
///
/// let config = TrainConfig::sample(Strategy::Catewise);
/// config.validate().unwrap();
/// assert_eq!(config.strategy, Strategy::Catewise);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainConfig {
    /// Logical run id, distinguishing experiments that share a checkpoint
    /// directory.
    pub run_id: String,

    /// Directory checkpoints are stored under.
    pub checkpoint_dir: String,

    /// Directory the raw data lives under.
    pub data_dir: String,

    /// Batch-range selector for the training split.
    #[serde(default)]
    pub train_range: Vec<usize>,

    /// Batch-range selector for the evaluation split.
    #[serde(default)]
    pub test_range: Vec<usize>,

    /// Cases per batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Epoch budget for epoch-bounded strategies.
    #[serde(default = "default_num_epoch")]
    pub num_epoch: u64,

    /// Batch budget for the minibatch strategy.
    #[serde(default)]
    pub num_batch: Option<u64>,

    /// Checkpoint every `save_freq` batches.
    #[serde(default = "default_freq")]
    pub save_freq: u64,

    /// Evaluate every `test_freq` batches.
    #[serde(default = "default_freq")]
    pub test_freq: u64,

    /// Adjust the learning rate every `adjust_freq` batches.
    #[serde(default = "default_freq")]
    pub adjust_freq: u64,

    /// Learning-rate adjustment factor; `1.0` disables adjustment.
    #[serde(default = "default_factor")]
    pub factor: f64,

    /// Base learning rate.
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,

    /// Trainer strategy.
    #[serde(default)]
    pub strategy: Strategy,

    /// Layer-wise strategy settings.
    #[serde(default)]
    pub layerwise: Option<LayerwiseConfig>,

    /// Category-wise strategy settings.
    #[serde(default)]
    pub catewise: Option<StagedConfig>,

    /// Category-group strategy settings.
    #[serde(default)]
    pub categroup: Option<StagedConfig>,
}

fn default_batch_size() -> usize {
    128
}
fn default_num_epoch() -> u64 {
    30
}
fn default_freq() -> u64 {
    100
}
fn default_factor() -> f64 {
    1.0
}
fn default_learning_rate() -> f64 {
    0.1
}

/// Trainer strategy selector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Plain epoch-bounded training.
    #[default]
    Normal,
    /// Bounded-batch-count training.
    Minibatch,
    /// Layer-wise curriculum.
    Layerwise,
    /// Category-wise curriculum.
    Catewise,
    /// Category-group curriculum.
    Categroup,
}

/// Settings for the layer-wise strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerwiseConfig {
    /// Directory intermediate activations are spooled under.
    pub output_dir: String,

    /// Element budget per spooled chunk.
    #[serde(default = "default_spool_elements")]
    pub spool_elements: usize,
}

fn default_spool_elements() -> usize {
    crate::spool::DiskSpooler::DEFAULT_MAX_ELEMENTS
}

/// Settings for the staged category strategies.
///
/// The three lists are per-stage and must have equal length; the last
/// size must equal `full_count`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagedConfig {
    /// Full class count (category-wise) or group count (category-group).
    pub full_count: usize,

    /// Per-stage category-range or group sizes, ending at `full_count`.
    pub sizes: Vec<usize>,

    /// Per-stage batch budgets.
    pub batch_budgets: Vec<u64>,

    /// Per-stage learning rates.
    pub learning_rates: Vec<f64>,
}

impl StagedConfig {
    /// Builds the per-stage plans.
    #[must_use]
    pub fn stage_plans(&self) -> Vec<StagePlan> {
        self.sizes
            .iter()
            .zip(&self.batch_budgets)
            .zip(&self.learning_rates)
            .map(|((&size, &batch_budget), &learning_rate)| StagePlan {
                size,
                batch_budget,
                learning_rate,
            })
            .collect()
    }

    fn validate(&self, section: &str) -> Result<()> {
        if self.sizes.is_empty() {
            return Err(TrainError::Config(format!(
                "{section}: at least one stage size is required"
            )));
        }
        if self.sizes.len() != self.batch_budgets.len() {
            return Err(TrainError::Config(format!(
                "{section}: {} sizes but {} batch budgets",
                self.sizes.len(),
                self.batch_budgets.len()
            )));
        }
        if self.sizes.len() != self.learning_rates.len() {
            return Err(TrainError::Config(format!(
                "{section}: {} sizes but {} learning rates",
                self.sizes.len(),
                self.learning_rates.len()
            )));
        }
        if *self.sizes.last().expect("checked non-empty") != self.full_count {
            return Err(TrainError::Config(format!(
                "{section}: stage sizes must end at the full count {}",
                self.full_count
            )));
        }
        Ok(())
    }
}

impl TrainConfig {
    /// Loads a configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&contents)?)
    }

    /// Writes the configuration to a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let contents = serde_yaml::to_string(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// A runnable sample configuration for the given strategy.
    #[must_use]
    pub fn sample(strategy: Strategy) -> Self {
        let mut config = Self {
            run_id: "run0".to_string(),
            checkpoint_dir: "./checkpoints".to_string(),
            data_dir: "./data".to_string(),
            train_range: vec![1, 40],
            test_range: vec![41, 48],
            batch_size: default_batch_size(),
            num_epoch: default_num_epoch(),
            num_batch: None,
            save_freq: default_freq(),
            test_freq: default_freq(),
            adjust_freq: default_freq(),
            factor: default_factor(),
            learning_rate: default_learning_rate(),
            strategy,
            layerwise: None,
            catewise: None,
            categroup: None,
        };
        match strategy {
            Strategy::Normal => {}
            Strategy::Minibatch => config.num_batch = Some(10_000),
            Strategy::Layerwise => {
                config.layerwise = Some(LayerwiseConfig {
                    output_dir: "./outputs".to_string(),
                    spool_elements: default_spool_elements(),
                });
            }
            Strategy::Catewise => {
                config.catewise = Some(StagedConfig {
                    full_count: 1000,
                    sizes: vec![100, 500, 1000],
                    batch_budgets: vec![4000, 4000, 8000],
                    learning_rates: vec![0.1, 0.05, 0.01],
                });
            }
            Strategy::Categroup => {
                config.categroup = Some(StagedConfig {
                    full_count: 50,
                    sizes: vec![10, 50],
                    batch_budgets: vec![4000, 8000],
                    learning_rates: vec![0.1, 0.01],
                });
            }
        }
        config
    }

    /// The loop options this configuration implies.
    #[must_use]
    pub fn loop_options(&self) -> LoopOptions {
        LoopOptions {
            batch_size: self.batch_size,
            test_freq: self.test_freq,
            save_freq: self.save_freq,
            adjust_freq: self.adjust_freq,
            lr_factor: self.factor,
            capture: CaptureTrigger::Never,
        }
    }

    /// Validates the configuration, failing fast before any loop runs.
    ///
    /// # Errors
    ///
    /// Returns [`TrainError::Config`] naming the offending field.
    pub fn validate(&self) -> Result<()> {
        if self.run_id.is_empty() {
            return Err(TrainError::Config("run_id must not be empty".to_string()));
        }
        if self.checkpoint_dir.is_empty() {
            return Err(TrainError::Config(
                "checkpoint_dir must not be empty".to_string(),
            ));
        }
        if self.batch_size == 0 {
            return Err(TrainError::Config("batch_size must be positive".to_string()));
        }
        if self.learning_rate <= 0.0 {
            return Err(TrainError::Config(
                "learning_rate must be positive".to_string(),
            ));
        }
        if self.factor <= 0.0 {
            return Err(TrainError::Config("factor must be positive".to_string()));
        }

        match self.strategy {
            Strategy::Normal => {}
            Strategy::Minibatch => {
                if self.num_batch.unwrap_or(0) == 0 {
                    return Err(TrainError::Config(
                        "minibatch strategy requires a positive num_batch".to_string(),
                    ));
                }
            }
            Strategy::Layerwise => {
                let layerwise = self.layerwise.as_ref().ok_or_else(|| {
                    TrainError::Config("layerwise strategy requires a layerwise section".to_string())
                })?;
                if layerwise.output_dir.is_empty() {
                    return Err(TrainError::Config(
                        "layerwise.output_dir must not be empty".to_string(),
                    ));
                }
            }
            Strategy::Catewise => {
                self.catewise
                    .as_ref()
                    .ok_or_else(|| {
                        TrainError::Config(
                            "catewise strategy requires a catewise section".to_string(),
                        )
                    })?
                    .validate("catewise")?;
            }
            Strategy::Categroup => {
                self.categroup
                    .as_ref()
                    .ok_or_else(|| {
                        TrainError::Config(
                            "categroup strategy requires a categroup section".to_string(),
                        )
                    })?
                    .validate("categroup")?;
            }
        }
        Ok(())
    }
}
