//! Category-wise and category-group curricula: staged output-layer growth.
//!
//! Both strategies begin training with the output layer narrowed to a
//! leading subset of categories (or a first grouping), then widen it stage
//! by stage. Every stage transition reloads the latest checkpoint, nulls
//! the output layer's weights and momentum so it reinitializes at the new
//! width, re-points the data partitioner, clears the adapter's momentum,
//! and resumes with a fresh bounded-batch sub-run. All other layers carry
//! their learned weights forward unchanged — the transfer contract of
//! curriculum training.
//!
//! The two differ only in how the data is narrowed: by class-range prefix
//! ([`DataSelector::CategoryRange`]) or by group membership count
//! ([`DataSelector::GroupCount`]).

use tracing::info;

use crate::checkpoint::CheckpointStore;
use crate::curriculum::surgery::resize_output;
use crate::data::{DataPartitioner, DataSelector};
use crate::error::{Result, TrainError};
use crate::model::{Layer, ModelFactory};
use crate::policy::BatchBound;
use crate::state::TrainingState;
use crate::training::{LoopOptions, TrainingLoop};

/// One stage of a staged curriculum: how wide the output layer is, how
/// many batches the stage may consume, and at what learning rate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StagePlan {
    /// Category-range or group cardinality for this stage.
    pub size: usize,
    /// Batches this stage's sub-run may consume.
    pub batch_budget: u64,
    /// Base learning rate for this stage's adapter.
    pub learning_rate: f64,
}

/// Shared engine behind both staged strategies.
struct StagedTrainer {
    inner: TrainingLoop,
    factory: Box<dyn ModelFactory>,
    partitioner: Box<dyn DataPartitioner>,
    stages: Vec<StagePlan>,
    select: fn(usize) -> DataSelector,
    label: &'static str,
}

impl StagedTrainer {
    fn new(
        init_layers: &[Layer],
        factory: Box<dyn ModelFactory>,
        partitioner: Box<dyn DataPartitioner>,
        store: CheckpointStore,
        options: LoopOptions,
        stages: Vec<StagePlan>,
        full_count: usize,
        select: fn(usize) -> DataSelector,
        label: &'static str,
    ) -> Result<Self> {
        validate_stages(&stages, full_count)?;

        // Stage zero starts from the initial model with the output layer
        // narrowed (and nulled) to the first stage size.
        let first = stages[0];
        let layers = with_resized_output(init_layers, first.size)?;
        let sources = partitioner.partition(&select(first.size))?;
        let adapter = factory.build(layers, first.learning_rate)?;
        let inner = TrainingLoop::new(adapter, sources.train, sources.test, store, options);

        Ok(Self {
            inner,
            factory,
            partitioner,
            stages,
            select,
            label,
        })
    }

    fn train(&mut self) -> Result<()> {
        let stages = self.stages.clone();
        for (index, stage) in stages.iter().enumerate() {
            info!(
                strategy = self.label,
                stage = index,
                size = stage.size,
                batch_budget = stage.batch_budget,
                "curriculum stage"
            );
            if index > 0 {
                self.enter_stage(stage)?;
            }
            let mut policy = BatchBound::new(stage.batch_budget);
            self.inner.run(&mut policy)?;
        }
        Ok(())
    }

    /// Applies a stage transition: reload, resize, re-point, reset.
    fn enter_stage(&mut self, stage: &StagePlan) -> Result<()> {
        let checkpoint = self.inner.store().latest().cloned().ok_or_else(|| {
            TrainError::Persistence("no checkpoint available after stage".to_string())
        })?;
        let layers = with_resized_output(&checkpoint.layers, stage.size)?;

        let sources = self.partitioner.partition(&(self.select)(stage.size))?;
        self.inner.swap_sources(sources.train, sources.test);
        self.inner.reset_state(TrainingState::new());

        let adapter = self.factory.build(layers, stage.learning_rate)?;
        self.inner.set_adapter(adapter);
        self.inner.adapter_mut().clear_momentum();
        Ok(())
    }

    fn store(&self) -> &CheckpointStore {
        self.inner.store()
    }
}

/// Returns `layers` with the output fully-connected layer (second to
/// last) stripped and resized; every other layer is carried unchanged.
fn with_resized_output(layers: &[Layer], size: usize) -> Result<Vec<Layer>> {
    if layers.len() < 2 {
        return Err(TrainError::Config(
            "staged training requires an output layer and a softmax head".to_string(),
        ));
    }
    let mut out = layers.to_vec();
    let output_index = layers.len() - 2;
    out[output_index] = resize_output(&layers[output_index], size)?;
    Ok(out)
}

fn validate_stages(stages: &[StagePlan], full_count: usize) -> Result<()> {
    if stages.is_empty() {
        return Err(TrainError::Config(
            "staged training requires at least one stage".to_string(),
        ));
    }
    let last = stages[stages.len() - 1].size;
    if last != full_count {
        return Err(TrainError::Config(format!(
            "stage sizes must end at the full count {full_count}, found {last}"
        )));
    }
    Ok(())
}

/// Category-wise curriculum controller: stages narrow the data to leading
/// class ranges.
pub struct CategoryWiseTrainer(StagedTrainer);

impl std::fmt::Debug for CategoryWiseTrainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CategoryWiseTrainer").finish_non_exhaustive()
    }
}

impl CategoryWiseTrainer {
    /// Builds the controller. `full_count` is the model's full class
    /// count; the last stage must reach it.
    ///
    /// # Errors
    ///
    /// Fails fast on an empty or non-terminating stage list, before any
    /// training starts.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        init_layers: &[Layer],
        factory: Box<dyn ModelFactory>,
        partitioner: Box<dyn DataPartitioner>,
        store: CheckpointStore,
        options: LoopOptions,
        stages: Vec<StagePlan>,
        full_count: usize,
    ) -> Result<Self> {
        Ok(Self(StagedTrainer::new(
            init_layers,
            factory,
            partitioner,
            store,
            options,
            stages,
            full_count,
            DataSelector::CategoryRange,
            "catewise",
        )?))
    }

    /// Runs every stage in order.
    ///
    /// # Errors
    ///
    /// Propagates loop and persistence failures; no stage is retried.
    pub fn train(&mut self) -> Result<()> {
        self.0.train()
    }

    /// The checkpoint store, holding the latest snapshot.
    #[must_use]
    pub fn store(&self) -> &CheckpointStore {
        self.0.store()
    }
}

/// Category-group curriculum controller: stages partition the data by
/// group membership count.
pub struct CategoryGroupTrainer(StagedTrainer);

impl CategoryGroupTrainer {
    /// Builds the controller. `full_count` is the full group count; the
    /// last stage must reach it.
    ///
    /// # Errors
    ///
    /// Fails fast on an empty or non-terminating stage list, before any
    /// training starts.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        init_layers: &[Layer],
        factory: Box<dyn ModelFactory>,
        partitioner: Box<dyn DataPartitioner>,
        store: CheckpointStore,
        options: LoopOptions,
        stages: Vec<StagePlan>,
        full_count: usize,
    ) -> Result<Self> {
        Ok(Self(StagedTrainer::new(
            init_layers,
            factory,
            partitioner,
            store,
            options,
            stages,
            full_count,
            DataSelector::GroupCount,
            "categroup",
        )?))
    }

    /// Runs every stage in order.
    ///
    /// # Errors
    ///
    /// Propagates loop and persistence failures; no stage is retried.
    pub fn train(&mut self) -> Result<()> {
        self.0.train()
    }

    /// The checkpoint store, holding the latest snapshot.
    #[must_use]
    pub fn store(&self) -> &CheckpointStore {
        self.0.store()
    }
}
