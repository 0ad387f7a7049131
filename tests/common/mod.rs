//! Shared fixtures: a deterministic stub adapter, synthetic data sources,
//! and recording factory/partitioner implementations.
//!
//! The stub adapter performs no numeric work. It reports a strictly
//! decreasing cost, initializes missing layer tensors with a per-build
//! marker value, and carries already-present tensors forward unchanged —
//! which is exactly what the curriculum transfer tests need to observe.

#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;

use ndarray::{Array1, Array2};

use curriculum_trainer_rs::data::{
    Batch, DataPartitioner, DataSelector, DataSource, SourcePair,
};
use curriculum_trainer_rs::error::{Result, TrainError};
use curriculum_trainer_rs::model::{
    Layer, LayerKind, ModelAdapter, ModelFactory, StepOutcome, TrainMode,
};

/// Activation width the stub adapter reports.
pub const ACTIVATION_DIM: usize = 4;

/// Counters a test can observe while the adapter is boxed inside a loop.
#[derive(Default)]
pub struct AdapterProbe {
    pub steps: usize,
    pub adjustments: usize,
    pub momentum_clears: usize,
}

/// A model adapter that fabricates deterministic outcomes.
pub struct StubAdapter {
    layers: Vec<Layer>,
    learning_rate: f64,
    steps: usize,
    last_rows: usize,
    fail_at_step: Option<usize>,
    probe: Option<Rc<RefCell<AdapterProbe>>>,
}

impl StubAdapter {
    pub fn new(layers: Vec<Layer>, learning_rate: f64) -> Self {
        Self {
            layers,
            learning_rate,
            steps: 0,
            last_rows: 0,
            fail_at_step: None,
            probe: None,
        }
    }

    /// Makes the adapter fail on its `n`-th step (1-based).
    pub fn failing_at(mut self, step: usize) -> Self {
        self.fail_at_step = Some(step);
        self
    }

    /// Attaches a shared probe the test keeps a handle to.
    pub fn with_probe(mut self, probe: Rc<RefCell<AdapterProbe>>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn learning_rate(&self) -> f64 {
        self.learning_rate
    }
}

impl ModelAdapter for StubAdapter {
    fn train_step(
        &mut self,
        input: &Array2<f32>,
        label: &Array1<f32>,
        _mode: TrainMode,
    ) -> Result<StepOutcome> {
        self.steps += 1;
        if let Some(probe) = &self.probe {
            probe.borrow_mut().steps += 1;
        }
        if self.fail_at_step == Some(self.steps) {
            return Err(TrainError::Step(format!(
                "stub adapter failed at step {}",
                self.steps
            )));
        }
        assert_eq!(input.nrows(), label.len(), "batch rows must match labels");
        self.last_rows = input.nrows();
        Ok(StepOutcome {
            cost: 2.0 / self.steps as f64,
            accuracy: 0.5,
            case_count: input.nrows(),
        })
    }

    fn export_layers(&self) -> Vec<Layer> {
        self.layers.clone()
    }

    fn adjust_learning_rate(&mut self, factor: f64) {
        self.learning_rate *= factor;
        if let Some(probe) = &self.probe {
            probe.borrow_mut().adjustments += 1;
        }
    }

    fn activation_snapshot(&self) -> Result<Array2<f32>> {
        Ok(Array2::from_elem(
            (self.last_rows, ACTIVATION_DIM),
            self.steps as f32,
        ))
    }

    fn clear_momentum(&mut self) {
        for layer in &mut self.layers {
            layer.weight_momentum = None;
            layer.bias_momentum = None;
        }
        if let Some(probe) = &self.probe {
            probe.borrow_mut().momentum_clears += 1;
        }
    }
}

/// Builds stub adapters, numbering each build and initializing missing
/// tensors with the build number as a marker value.
#[derive(Default)]
pub struct StubFactory {
    pub builds: Rc<RefCell<Vec<Vec<Layer>>>>,
}

impl StubFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn build_count(&self) -> usize {
        self.builds.borrow().len()
    }
}

impl ModelFactory for StubFactory {
    fn build(&self, mut layers: Vec<Layer>, learning_rate: f64) -> Result<Box<dyn ModelAdapter>> {
        let marker = self.builds.borrow().len() as f32 + 1.0;
        for layer in &mut layers {
            if layer.kind == LayerKind::FullyConnected && layer.weight.is_none() {
                let out = layer.output_size.unwrap_or(2);
                layer.weight = Some(Array2::from_elem((out, 2), marker));
                layer.bias = Some(Array1::from_elem(out, marker));
            }
        }
        self.builds.borrow_mut().push(layers.clone());
        Ok(Box::new(StubAdapter::new(layers, learning_rate)))
    }
}

/// A synthetic source serving fixed-size batches, `batches_per_epoch` per
/// pass. The epoch counter starts at 1 and advances on the batch that
/// completes a pass, so that boundary batch reports the incremented value.
pub struct SyntheticSource {
    batches_per_epoch: usize,
    rows: usize,
    cols: usize,
    position: usize,
    epoch: u64,
}

impl SyntheticSource {
    pub fn new(batches_per_epoch: usize, rows: usize, cols: usize) -> Self {
        Self {
            batches_per_epoch,
            rows,
            cols,
            position: 0,
            epoch: 1,
        }
    }
}

impl DataSource for SyntheticSource {
    fn next_batch(&mut self, _batch_size: usize) -> Result<Batch> {
        let fill = self.position as f32;
        self.position += 1;
        if self.position == self.batches_per_epoch {
            self.position = 0;
            self.epoch += 1;
        }
        Ok(Batch {
            data: Array2::from_elem((self.rows, self.cols), fill),
            labels: Array1::from_elem(self.rows, fill),
            epoch: self.epoch,
        })
    }

    fn reset(&mut self) {
        self.position = 0;
        self.epoch = 1;
    }
}

/// A partitioner handing out synthetic sources and recording every
/// selector it was asked for.
#[derive(Default)]
pub struct RecordingPartitioner {
    pub requests: Rc<RefCell<Vec<DataSelector>>>,
}

impl RecordingPartitioner {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DataPartitioner for RecordingPartitioner {
    fn partition(&self, selector: &DataSelector) -> Result<SourcePair> {
        self.requests.borrow_mut().push(*selector);
        Ok(SourcePair {
            train: Box::new(SyntheticSource::new(4, 3, 2)),
            test: Box::new(SyntheticSource::new(2, 3, 2)),
        })
    }
}

/// A three-layer staged model: hidden fc, output fc, softmax.
pub fn staged_model(full_count: usize) -> Vec<Layer> {
    let mut hidden = Layer::untrained("fc_hidden", LayerKind::FullyConnected);
    hidden.output_size = Some(8);
    let mut output = Layer::untrained("fc_out", LayerKind::FullyConnected);
    output.output_size = Some(full_count);
    let softmax = Layer::untrained("softmax", LayerKind::Softmax);
    vec![hidden, output, softmax]
}

/// A small convolutional model with a two-pair fully-connected stack.
pub fn layerwise_model() -> Vec<Layer> {
    let mut fc1 = Layer::untrained("fc1", LayerKind::FullyConnected);
    fc1.output_size = Some(8);
    let mut fc2 = Layer::untrained("fc2", LayerKind::FullyConnected);
    fc2.output_size = Some(4);
    vec![
        Layer::untrained("conv1", LayerKind::Conv),
        Layer::untrained("pool1", LayerKind::Pool),
        fc1,
        Layer::untrained("fc1_neuron", LayerKind::Neuron),
        fc2,
        Layer::untrained("softmax", LayerKind::Softmax),
    ]
}
