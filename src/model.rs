//! Model-adapter boundary.
//!
//! The numeric layer that executes forward/backward passes lives outside
//! this crate. The orchestrator sees it only through [`ModelAdapter`]: step
//! the model on a batch, export its layers for checkpointing, scale its
//! learning rate, and surface penultimate-layer activations for spooling.
//!
//! [`Layer`] is the serialized form a model exports and curriculum
//! controllers operate on. Controllers never mutate an adapter's topology
//! in place — they transform an exported layer list (see
//! [`crate::curriculum::surgery`]) and ask a [`ModelFactory`] for a fresh
//! adapter built from the result.

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Layer role within an exported model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerKind {
    /// Convolution layer.
    Conv,
    /// Pooling layer.
    Pool,
    /// Response-normalization layer.
    Norm,
    /// Elementwise activation layer.
    Neuron,
    /// Fully-connected layer.
    #[serde(rename = "fc")]
    FullyConnected,
    /// Softmax output layer.
    Softmax,
}

impl LayerKind {
    /// Whether this kind belongs to the convolutional prefix of a model.
    #[must_use]
    pub fn is_convolutional(&self) -> bool {
        matches!(self, Self::Conv | Self::Pool | Self::Norm)
    }
}

/// One exported model layer: learned tensors, momentum terms, and the
/// per-layer configuration curriculum surgery manipulates.
///
/// `weight`/`bias` of `None` means untrained — a factory building a model
/// from such a layer must freshly initialize it. That nulling is the
/// transfer contract of curriculum training: mutated layers restart from
/// scratch while every other layer carries its learned tensors forward.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Layer {
    /// Layer name, unique within a model.
    pub name: String,
    /// Layer role.
    pub kind: LayerKind,
    /// Learned weights, rows = output units.
    pub weight: Option<Array2<f32>>,
    /// Learned biases.
    pub bias: Option<Array1<f32>>,
    /// Weight momentum accumulator.
    pub weight_momentum: Option<Array2<f32>>,
    /// Bias momentum accumulator.
    pub bias_momentum: Option<Array1<f32>>,
    /// Output unit count, for layers where it is configurable.
    pub output_size: Option<usize>,
    /// Spatial output shape, recorded so downstream phases can derive the
    /// input geometry of a detached sub-model.
    pub output_shape: Option<Vec<usize>>,
    /// Per-layer learning-rate scale for weights.
    pub weight_lr: f64,
    /// Per-layer learning-rate scale for biases.
    pub bias_lr: f64,
}

impl Layer {
    /// Creates an untrained layer of the given kind.
    #[must_use]
    pub fn untrained(name: impl Into<String>, kind: LayerKind) -> Self {
        Self {
            name: name.into(),
            kind,
            weight: None,
            bias: None,
            weight_momentum: None,
            bias_momentum: None,
            output_size: None,
            output_shape: None,
            weight_lr: 1.0,
            bias_lr: 1.0,
        }
    }

    /// Whether the layer currently carries learned tensors.
    #[must_use]
    pub fn is_trained(&self) -> bool {
        self.weight.is_some() || self.bias.is_some()
    }
}

/// Whether a step should update weights or only evaluate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainMode {
    /// Forward + backward + weight update.
    Train,
    /// Forward only; metrics reported, weights untouched.
    Test,
}

/// What the adapter reports back from one step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepOutcome {
    /// Loss for the batch.
    pub cost: f64,
    /// Fraction of cases classified correctly, in `[0, 1]`.
    pub accuracy: f64,
    /// Number of cases in the batch.
    pub case_count: usize,
}

/// The orchestrator's view of the numeric training layer.
///
/// Failures returned from [`train_step`](Self::train_step) are fatal to the
/// run: the loop propagates them without retrying, since a repeated
/// identical step would fail identically.
pub trait ModelAdapter {
    /// Executes one step on `(input, label)` in the given mode.
    fn train_step(
        &mut self,
        input: &Array2<f32>,
        label: &Array1<f32>,
        mode: TrainMode,
    ) -> Result<StepOutcome>;

    /// Exports the current layer list for checkpointing or surgery.
    fn export_layers(&self) -> Vec<Layer>;

    /// Scales the adapter's learning rate by `factor`.
    fn adjust_learning_rate(&mut self, factor: f64);

    /// Penultimate-layer activations for the most recent batch, rows =
    /// cases. Used by the capture path to spool intermediate data for
    /// later phases.
    fn activation_snapshot(&self) -> Result<Array2<f32>>;

    /// Clears weight-momentum accumulators, so a resumed stage does not
    /// inherit velocity from a differently-shaped predecessor.
    fn clear_momentum(&mut self);
}

/// Builds a fresh adapter from an exported layer list.
///
/// Curriculum controllers call this at every topology mutation; an adapter
/// is never resized in place.
pub trait ModelFactory {
    /// Constructs an adapter from `layers` with the given base learning
    /// rate. Layers whose tensors are `None` must be freshly initialized.
    fn build(&self, layers: Vec<Layer>, learning_rate: f64) -> Result<Box<dyn ModelAdapter>>;
}
