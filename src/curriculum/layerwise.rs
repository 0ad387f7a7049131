//! Layer-wise curriculum: train the fully-connected stack one pair at a
//! time over cached activations.
//!
//! The controller first trains a reduced head model (convolutional prefix,
//! the last fully-connected layer, softmax) for one epoch while spooling
//! penultimate-layer activations to disk. Each remaining stack pair then
//! gets its own phase: reload the latest checkpoint, strip the tail
//! fully-connected layer back to untrained, assemble a small model from
//! the pair plus the checkpoint tail, train it for one epoch on the
//! replayed activations, splice the trained layers back, and retrain the
//! full model on raw data — one epoch for intermediate pairs, the full
//! epoch budget for the terminal pair.

use std::path::PathBuf;

use tracing::info;

use crate::checkpoint::CheckpointStore;
use crate::curriculum::surgery::{
    scale_learning_rate, split_curriculum, splice_tail, strip_learned, FcPair,
};
use crate::data::{DataSource, SpooledSource};
use crate::error::{Result, TrainError};
use crate::model::{Layer, LayerKind, ModelFactory};
use crate::policy::EpochBound;
use crate::spool::{DiskSpooler, Spooler};
use crate::state::TrainingState;
use crate::training::{CaptureTrigger, LoopOptions, TrainingLoop};

/// Settings specific to the layer-wise strategy.
#[derive(Debug, Clone)]
pub struct LayerwiseSettings {
    /// Directory the activation chunk files are spooled under.
    pub output_dir: PathBuf,
    /// Element budget per spooled chunk.
    pub spool_elements: usize,
}

impl LayerwiseSettings {
    /// Settings with the default spool budget.
    #[must_use]
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            spool_elements: DiskSpooler::DEFAULT_MAX_ELEMENTS,
        }
    }

    fn train_target(&self) -> PathBuf {
        self.output_dir.join("train-data")
    }

    fn test_target(&self) -> PathBuf {
        self.output_dir.join("test-data")
    }
}

/// Layer-wise curriculum controller.
pub struct LayerwiseTrainer {
    inner: TrainingLoop,
    factory: Box<dyn ModelFactory>,
    settings: LayerwiseSettings,
    stack: Vec<FcPair>,
    num_epoch: u64,
    learning_rate: f64,
}

impl std::fmt::Debug for LayerwiseTrainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LayerwiseTrainer").finish_non_exhaustive()
    }
}

impl LayerwiseTrainer {
    /// Builds the controller and the reduced head model for phase zero.
    ///
    /// # Errors
    ///
    /// Fails fast on a model with no fully-connected section (layer-wise
    /// training is undefined for it) and on adapter construction errors.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        init_layers: &[Layer],
        factory: Box<dyn ModelFactory>,
        train_source: Box<dyn DataSource>,
        test_source: Box<dyn DataSource>,
        store: CheckpointStore,
        options: LoopOptions,
        settings: LayerwiseSettings,
        num_epoch: u64,
        learning_rate: f64,
    ) -> Result<Self> {
        let split = split_curriculum(init_layers)?;
        let mut stack = split.fc_stack;
        let head_pair = stack.pop().expect("split guarantees a non-empty stack");

        // Head model: convolutional prefix, the last fully-connected
        // layer, softmax. The popped pair's activation layer stays out,
        // matching the reduced head the full model is later grown from.
        let mut head = split.conv_prefix;
        head.push(head_pair.fc);
        head.push(split.softmax);

        std::fs::create_dir_all(&settings.output_dir)?;

        let adapter = factory.build(head, learning_rate)?;
        let inner = TrainingLoop::new(adapter, train_source, test_source, store, options);

        Ok(Self {
            inner,
            factory,
            settings,
            stack,
            num_epoch,
            learning_rate,
        })
    }

    /// The checkpoint store, holding the latest full-model snapshot.
    #[must_use]
    pub fn store(&self) -> &CheckpointStore {
        self.inner.store()
    }

    /// Runs every phase of the curriculum.
    ///
    /// # Errors
    ///
    /// Propagates loop, persistence, and surgery failures; no phase is
    /// retried.
    pub fn train(&mut self) -> Result<()> {
        // Phase zero: one epoch of the head model, spooling activations.
        info!(stack_entries = self.stack.len(), "layerwise: head phase");
        self.install_spoolers();
        self.run_phase(1)?;

        let stack = std::mem::take(&mut self.stack);
        let total = stack.len();
        for (index, entry) in stack.into_iter().enumerate() {
            let is_terminal = index + 1 == total;
            info!(entry = index, is_terminal, "layerwise: stack phase");

            // Chunk counts recorded by the previous full phase key the
            // replay sources.
            let (train_spool, test_spool) = self.inner.set_spoolers(None, None);
            let train_chunks = spool_count(train_spool)?;
            let test_chunks = spool_count(test_spool)?;

            let checkpoint = self
                .inner
                .store()
                .latest()
                .cloned()
                .ok_or_else(|| {
                    TrainError::Persistence("no checkpoint available after phase".to_string())
                })?;
            let base_layers = checkpoint.layers;
            if base_layers.len() < 2 {
                return Err(TrainError::Config(
                    "checkpoint model is too small for layer-wise surgery".to_string(),
                ));
            }
            let tail_fc = &base_layers[base_layers.len() - 2];
            if tail_fc.kind != LayerKind::FullyConnected {
                return Err(TrainError::Config(format!(
                    "expected a fully-connected layer before the output, found {:?}",
                    tail_fc.kind
                )));
            }

            // Sub-model: the stack pair at a scaled learning rate, the
            // stripped tail fully-connected layer, and the softmax head.
            let mut sub_layers = Vec::new();
            sub_layers.push(scale_learning_rate(&entry.fc, self.learning_rate));
            if let Some(activation) = &entry.activation {
                sub_layers.push(activation.clone());
            }
            sub_layers.push(strip_learned(tail_fc));
            sub_layers.push(base_layers[base_layers.len() - 1].clone());

            let sub_adapter = self.factory.build(sub_layers, 1.0)?;
            self.inner.set_adapter(sub_adapter);

            let replay_train: Box<dyn DataSource> = Box::new(SpooledSource::new(
                self.settings.train_target(),
                train_chunks,
            )?);
            let replay_test: Box<dyn DataSource> =
                Box::new(SpooledSource::new(self.settings.test_target(), test_chunks)?);
            let (raw_train, raw_test) = self.inner.swap_sources(replay_train, replay_test);

            // No spoolers are installed during a sub-model phase, so
            // nothing is captured while replaying.
            self.run_phase(1)?;

            // Splice the trained sub-model over the checkpoint tail; the
            // model grows by one stack pair.
            let trained = self.inner.adapter_mut().export_layers();
            let full_layers = splice_tail(&base_layers, &trained, 2)?;

            // Full-model phase on raw data with fresh spoolers, so the
            // next stack entry replays activations of the updated model.
            let full_adapter = self.factory.build(full_layers, self.learning_rate)?;
            self.inner.set_adapter(full_adapter);
            self.inner.swap_sources(raw_train, raw_test);
            self.inner.reset_sources();
            self.install_spoolers();
            let budget = if is_terminal { self.num_epoch } else { 1 };
            self.run_phase(budget)?;
        }
        Ok(())
    }

    /// One bounded sub-run: fresh state, capture over the final epoch,
    /// epoch-bounded continuation.
    fn run_phase(&mut self, max_epoch: u64) -> Result<()> {
        self.inner.reset_state(TrainingState::new());
        self.inner.options_mut().capture = CaptureTrigger::FromEpoch(max_epoch);
        let mut policy = EpochBound::new(max_epoch);
        self.inner.run(&mut policy)
    }

    fn install_spoolers(&mut self) {
        let train = DiskSpooler::new(self.settings.train_target(), self.settings.spool_elements);
        let test = DiskSpooler::new(self.settings.test_target(), self.settings.spool_elements);
        self.inner
            .set_spoolers(Some(Box::new(train)), Some(Box::new(test)));
    }
}

fn spool_count(spool: Option<Box<dyn Spooler>>) -> Result<usize> {
    spool
        .map(|s| s.chunk_count())
        .ok_or_else(|| TrainError::Config("layerwise phase ran without spoolers".to_string()))
}
