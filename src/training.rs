//! The batch-by-batch training control loop.
//!
//! [`TrainingLoop`] drives one bounded run: draw a batch, step the model
//! adapter, record metrics, and fire the periodic side effects —
//! evaluation, learning-rate adjustment, checkpointing, activation capture
//! — that the configured frequencies and the injected [`StopPolicy`]
//! allow. On exit it forces a final evaluation pass and checkpoint save
//! (unless the last iteration already performed them) and flushes both
//! spoolers, so no buffered activation data is lost at run end.
//!
//! Adapter and checkpoint failures are fatal: they propagate out of
//! [`run`](TrainingLoop::run) without retry.

use std::time::Instant;

use tracing::{debug, info};

use crate::checkpoint::{Checkpoint, CheckpointStore};
use crate::data::DataSource;
use crate::error::Result;
use crate::model::{ModelAdapter, TrainMode};
use crate::policy::StopPolicy;
use crate::spool::{NamedArrays, Spooler, ACTIVATION_FIELD, LABEL_FIELD};
use crate::state::{MetricRecord, TrainingState};

/// When intermediate activations are forwarded to a spooler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureTrigger {
    /// Never capture.
    Never,
    /// Capture on every step.
    Always,
    /// Capture once the epoch counter reaches the given epoch — with the
    /// run's final epoch, the default behavior of capturing only the last
    /// pass.
    FromEpoch(u64),
}

impl CaptureTrigger {
    /// Whether capture is active in the given state.
    #[must_use]
    pub fn is_active(&self, state: &TrainingState) -> bool {
        match self {
            Self::Never => false,
            Self::Always => true,
            Self::FromEpoch(epoch) => state.epoch >= *epoch,
        }
    }
}

/// Frequencies and factors steering one run of the loop.
#[derive(Debug, Clone)]
pub struct LoopOptions {
    /// Cases requested per batch.
    pub batch_size: usize,
    /// Evaluate every `test_freq` batches. Zero disables periodic
    /// evaluation (the final evaluation still runs).
    pub test_freq: u64,
    /// Checkpoint every `save_freq` batches. Zero disables periodic saves
    /// (the final save still runs).
    pub save_freq: u64,
    /// Scale the learning rate every `adjust_freq` batches.
    pub adjust_freq: u64,
    /// Learning-rate scale factor; `1.0` disables adjustment.
    pub lr_factor: f64,
    /// Activation-capture condition.
    pub capture: CaptureTrigger,
}

impl Default for LoopOptions {
    fn default() -> Self {
        Self {
            batch_size: 128,
            test_freq: 100,
            save_freq: 100,
            adjust_freq: 100,
            lr_factor: 1.0,
            capture: CaptureTrigger::Never,
        }
    }
}

/// One resumable training loop instance.
///
/// The loop exclusively owns its adapter, data sources, spoolers,
/// checkpoint store, and [`TrainingState`] — there is no concurrent access
/// and no cancellation primitive; a run ends when the policy declines to
/// continue or an error propagates.
pub struct TrainingLoop {
    adapter: Box<dyn ModelAdapter>,
    train_source: Box<dyn DataSource>,
    test_source: Box<dyn DataSource>,
    train_spool: Option<Box<dyn Spooler>>,
    test_spool: Option<Box<dyn Spooler>>,
    store: CheckpointStore,
    options: LoopOptions,
    state: TrainingState,
}

impl TrainingLoop {
    /// Creates a loop over the given collaborators.
    ///
    /// If the store already holds a checkpoint for its run id, the state is
    /// restored from it so the next iteration continues at batch `B + 1`;
    /// otherwise the state starts fresh.
    #[must_use]
    pub fn new(
        adapter: Box<dyn ModelAdapter>,
        train_source: Box<dyn DataSource>,
        test_source: Box<dyn DataSource>,
        store: CheckpointStore,
        options: LoopOptions,
    ) -> Self {
        let state = match store.latest() {
            Some(checkpoint) => TrainingState::from_checkpoint(checkpoint),
            None => TrainingState::new(),
        };
        Self {
            adapter,
            train_source,
            test_source,
            train_spool: None,
            test_spool: None,
            store,
            options,
            state,
        }
    }

    /// Current run state.
    #[must_use]
    pub fn state(&self) -> &TrainingState {
        &self.state
    }

    /// Replaces the run state. Curriculum controllers call this with a
    /// freshly constructed state at every phase boundary — counters are
    /// never reset by reusing a shared field.
    pub fn reset_state(&mut self, state: TrainingState) {
        self.state = state;
    }

    /// The checkpoint store backing this loop.
    #[must_use]
    pub fn store(&self) -> &CheckpointStore {
        &self.store
    }

    /// Mutable access to the model adapter.
    pub fn adapter_mut(&mut self) -> &mut dyn ModelAdapter {
        self.adapter.as_mut()
    }

    /// Swaps in a different adapter, returning the previous one.
    pub fn set_adapter(&mut self, adapter: Box<dyn ModelAdapter>) -> Box<dyn ModelAdapter> {
        std::mem::replace(&mut self.adapter, adapter)
    }

    /// Swaps both data sources, returning the previous pair.
    pub fn swap_sources(
        &mut self,
        train: Box<dyn DataSource>,
        test: Box<dyn DataSource>,
    ) -> (Box<dyn DataSource>, Box<dyn DataSource>) {
        (
            std::mem::replace(&mut self.train_source, train),
            std::mem::replace(&mut self.test_source, test),
        )
    }

    /// Resets both data sources to the start of their first pass.
    pub fn reset_sources(&mut self) {
        self.train_source.reset();
        self.test_source.reset();
    }

    /// Installs spoolers for activation capture, returning the previous
    /// pair. Pass `None` to disable capture on either side.
    pub fn set_spoolers(
        &mut self,
        train: Option<Box<dyn Spooler>>,
        test: Option<Box<dyn Spooler>>,
    ) -> (Option<Box<dyn Spooler>>, Option<Box<dyn Spooler>>) {
        (
            std::mem::replace(&mut self.train_spool, train),
            std::mem::replace(&mut self.test_spool, test),
        )
    }

    /// Mutable access to the loop options, for phase-specific overrides.
    pub fn options_mut(&mut self) -> &mut LoopOptions {
        &mut self.options
    }

    /// Runs the loop until `policy` declines to continue.
    ///
    /// # Errors
    ///
    /// Propagates adapter step failures, data-source failures, and
    /// checkpoint write failures immediately. None are retried.
    pub fn run(&mut self, policy: &mut dyn StopPolicy) -> Result<()> {
        info!(
            run_id = self.store.run_id(),
            batch = self.state.batch,
            epoch = self.state.epoch,
            "starting training run"
        );
        let mut evaluated_at = None;
        let mut saved_at = None;

        while policy.should_continue(&self.state) {
            let batch = self.train_source.next_batch(self.options.batch_size)?;
            self.state.advance_batch(batch.epoch);

            let started = Instant::now();
            let outcome = self
                .adapter
                .train_step(&batch.data, &batch.labels, TrainMode::Train)?;
            let elapsed = started.elapsed().as_secs_f64();
            self.state.push_train_record(MetricRecord::from_step(
                outcome.cost,
                1.0 - outcome.accuracy,
                outcome.case_count,
                elapsed,
            ));
            debug!(
                epoch = self.state.epoch,
                batch = self.state.batch,
                error = 1.0 - outcome.accuracy,
                cost = outcome.cost,
                elapsed_secs = elapsed,
                "train step"
            );

            if self.options.capture.is_active(&self.state) {
                if let Some(spool) = self.train_spool.as_mut() {
                    let snapshot = self.adapter.activation_snapshot()?;
                    let mut record = NamedArrays::new();
                    record.insert(LABEL_FIELD.to_string(), batch.labels.clone().into_dyn());
                    record.insert(ACTIVATION_FIELD.to_string(), snapshot.into_dyn());
                    spool.add(record)?;
                }
            }

            if self.options.test_freq > 0 && self.state.batch % self.options.test_freq == 0 {
                self.run_evaluation()?;
                evaluated_at = Some(self.state.batch);
            }

            if self.options.lr_factor != 1.0
                && self.options.adjust_freq > 0
                && self.state.batch % self.options.adjust_freq == 0
            {
                info!(factor = self.options.lr_factor, "adjusting learning rate");
                self.adapter.adjust_learning_rate(self.options.lr_factor);
            }

            if self.options.save_freq > 0
                && self.state.batch % self.options.save_freq == 0
                && policy.allow_checkpoint(&self.state)
            {
                self.save_checkpoint()?;
                saved_at = Some(self.state.batch);
            }
        }

        // The run must end with an evaluation and a durable checkpoint; an
        // iteration that already performed them as its last act is not
        // repeated.
        if evaluated_at != Some(self.state.batch) {
            self.run_evaluation()?;
        }
        if saved_at != Some(self.state.batch) {
            self.save_checkpoint()?;
        }
        if let Some(spool) = self.train_spool.as_mut() {
            spool.finish()?;
        }
        if let Some(spool) = self.test_spool.as_mut() {
            spool.finish()?;
        }

        info!(
            batches = self.state.batch,
            train_records = self.state.train_records.len(),
            test_records = self.state.test_records.len(),
            "training run finished"
        );
        Ok(())
    }

    /// One evaluation pass: a single batch from the test source, stepped
    /// in test mode, recorded into the evaluation sequence.
    fn run_evaluation(&mut self) -> Result<()> {
        let started = Instant::now();
        let batch = self.test_source.next_batch(self.options.batch_size)?;
        let outcome = self
            .adapter
            .train_step(&batch.data, &batch.labels, TrainMode::Test)?;
        let elapsed = started.elapsed().as_secs_f64();
        self.state.push_test_record(MetricRecord::from_step(
            outcome.cost,
            1.0 - outcome.accuracy,
            outcome.case_count,
            elapsed,
        ));
        info!(
            error = 1.0 - outcome.accuracy,
            cost = outcome.cost,
            elapsed_secs = elapsed,
            "evaluation"
        );

        if self.options.capture.is_active(&self.state) {
            if let Some(spool) = self.test_spool.as_mut() {
                let snapshot = self.adapter.activation_snapshot()?;
                let mut record = NamedArrays::new();
                record.insert(LABEL_FIELD.to_string(), batch.labels.into_dyn());
                record.insert(ACTIVATION_FIELD.to_string(), snapshot.into_dyn());
                spool.add(record)?;
            }
        }
        Ok(())
    }

    /// Exports the adapter's layers and both metric sequences into a
    /// checkpoint, tagged with the current epoch.
    fn save_checkpoint(&mut self) -> Result<()> {
        let checkpoint = Checkpoint::new(self.adapter.export_layers(), self.state.clone());
        self.store.save(checkpoint, self.state.epoch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_trigger_from_epoch() {
        let mut state = TrainingState::new();
        state.epoch = 2;
        assert!(!CaptureTrigger::FromEpoch(3).is_active(&state));
        state.epoch = 3;
        assert!(CaptureTrigger::FromEpoch(3).is_active(&state));
        state.epoch = 4;
        assert!(CaptureTrigger::FromEpoch(3).is_active(&state));
    }

    #[test]
    fn test_capture_trigger_constants() {
        let state = TrainingState::new();
        assert!(!CaptureTrigger::Never.is_active(&state));
        assert!(CaptureTrigger::Always.is_active(&state));
    }

    #[test]
    fn test_default_options_disable_adjustment() {
        let options = LoopOptions::default();
        assert_eq!(options.lr_factor, 1.0);
        assert_eq!(options.capture, CaptureTrigger::Never);
    }
}
