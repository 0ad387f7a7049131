//! Pure layer-list transformations for phase transitions.
//!
//! Curriculum controllers never mutate a loaded checkpoint in place. Every
//! structural change — freezing, splitting, resizing, splicing — is a pure
//! function from an immutable layer list (plus a phase descriptor) to a
//! new list, so the same checkpoint can feed several stages without
//! aliasing surprises.

use crate::error::{Result, TrainError};
use crate::model::{Layer, LayerKind};

/// An ordered fully-connected stack entry: one fully-connected layer and
/// its trailing activation layer, when present.
#[derive(Debug, Clone)]
pub struct FcPair {
    /// The fully-connected layer.
    pub fc: Layer,
    /// Its activation layer, if the model has one after the fc.
    pub activation: Option<Layer>,
}

impl FcPair {
    /// The entry's layers in model order.
    #[must_use]
    pub fn into_layers(self) -> Vec<Layer> {
        let mut layers = vec![self.fc];
        layers.extend(self.activation);
        layers
    }
}

/// The three sections a layer-wise curriculum trains separately.
#[derive(Debug, Clone)]
pub struct CurriculumSplit {
    /// Convolutional prefix: conv, pool, norm, and interleaved activation
    /// layers up to the first fully-connected layer.
    pub conv_prefix: Vec<Layer>,
    /// Fully-connected section, split pairwise in model order.
    pub fc_stack: Vec<FcPair>,
    /// The softmax output layer.
    pub softmax: Layer,
}

/// Splits a model into convolutional prefix, pairwise fully-connected
/// stack, and softmax head.
///
/// # Errors
///
/// A model with no fully-connected layers cannot be trained layer-wise —
/// that is a configuration error, not a fallback case. A missing softmax
/// head or an activation layer with no preceding fully-connected layer is
/// likewise rejected.
pub fn split_curriculum(layers: &[Layer]) -> Result<CurriculumSplit> {
    let mut conv_prefix = Vec::new();
    let mut fc_stack: Vec<FcPair> = Vec::new();
    let mut softmax = None;
    let mut in_conv = true;

    for layer in layers {
        match layer.kind {
            kind if kind.is_convolutional() && in_conv => conv_prefix.push(layer.clone()),
            LayerKind::Neuron if in_conv => conv_prefix.push(layer.clone()),
            LayerKind::FullyConnected => {
                in_conv = false;
                fc_stack.push(FcPair {
                    fc: layer.clone(),
                    activation: None,
                });
            }
            LayerKind::Neuron => {
                let entry = fc_stack.last_mut().ok_or_else(|| {
                    TrainError::Config(format!(
                        "activation layer '{}' has no preceding fully-connected layer",
                        layer.name
                    ))
                })?;
                if entry.activation.is_some() {
                    return Err(TrainError::Config(format!(
                        "two activation layers follow fully-connected layer '{}'",
                        entry.fc.name
                    )));
                }
                entry.activation = Some(layer.clone());
            }
            LayerKind::Softmax => softmax = Some(layer.clone()),
            kind => {
                return Err(TrainError::Config(format!(
                    "layer '{}' of kind {kind:?} after the convolutional prefix",
                    layer.name
                )))
            }
        }
    }

    if fc_stack.is_empty() {
        return Err(TrainError::Config(
            "layer-wise training requires at least one fully-connected layer".to_string(),
        ));
    }
    let softmax = softmax.ok_or_else(|| {
        TrainError::Config("layer-wise training requires a softmax output layer".to_string())
    })?;

    Ok(CurriculumSplit {
        conv_prefix,
        fc_stack,
        softmax,
    })
}

/// Returns the layer with all learned tensors nulled, forcing fresh
/// initialization when a factory rebuilds the model.
#[must_use]
pub fn strip_learned(layer: &Layer) -> Layer {
    Layer {
        weight: None,
        bias: None,
        weight_momentum: None,
        bias_momentum: None,
        ..layer.clone()
    }
}

/// Returns a stripped copy of a fully-connected layer widened (or
/// narrowed) to `output_size` units.
///
/// # Errors
///
/// Only fully-connected layers are resizable.
pub fn resize_output(layer: &Layer, output_size: usize) -> Result<Layer> {
    if layer.kind != LayerKind::FullyConnected {
        return Err(TrainError::Config(format!(
            "cannot resize layer '{}': expected a fully-connected layer, found {:?}",
            layer.name, layer.kind
        )));
    }
    let mut resized = strip_learned(layer);
    resized.output_size = Some(output_size);
    Ok(resized)
}

/// Returns the layer with its per-layer learning rates scaled by `factor`.
#[must_use]
pub fn scale_learning_rate(layer: &Layer, factor: f64) -> Layer {
    let mut scaled = layer.clone();
    scaled.weight_lr *= factor;
    scaled.bias_lr *= factor;
    scaled
}

/// Replaces the last `replaced` layers of `base` with `replacement`.
///
/// The layer-wise curriculum uses this to splice a freshly trained
/// sub-model (a new stack pair plus the retrained tail) over the
/// checkpoint's old tail, growing the model by one stack entry.
///
/// # Errors
///
/// `base` must have at least `replaced` layers.
pub fn splice_tail(base: &[Layer], replacement: &[Layer], replaced: usize) -> Result<Vec<Layer>> {
    if base.len() < replaced {
        return Err(TrainError::Config(format!(
            "cannot replace {replaced} layers of a {}-layer model",
            base.len()
        )));
    }
    let mut layers = base[..base.len() - replaced].to_vec();
    layers.extend_from_slice(replacement);
    Ok(layers)
}
