//! Run state: counters and append-only metric sequences.
//!
//! [`TrainingState`] is the single mutable value a training loop owns. It is
//! created fresh at run start (or restored from a checkpoint), advanced once
//! per iteration, and serialized wholesale into every checkpoint. Curriculum
//! controllers never reuse a state across phases — each phase constructs a
//! new one, so a stale batch counter cannot leak into the next sub-run.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::checkpoint::Checkpoint;

/// One recorded measurement: named scalar metrics, the number of cases the
/// batch contained, and the wall time the step took.
///
/// Records are append-only and order-significant — the sequence is the
/// training curve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    /// Named scalar metrics, e.g. `cost` and `error`.
    pub values: BTreeMap<String, f64>,
    /// Number of cases in the batch this record covers.
    pub case_count: usize,
    /// Elapsed wall time for the step, in seconds.
    pub elapsed_secs: f64,
}

impl MetricRecord {
    /// Builds a record from a cost/error pair, the common shape produced by
    /// both train and evaluation steps.
    #[must_use]
    pub fn from_step(cost: f64, error: f64, case_count: usize, elapsed_secs: f64) -> Self {
        let mut values = BTreeMap::new();
        values.insert("cost".to_string(), cost);
        values.insert("error".to_string(), error);
        Self {
            values,
            case_count,
            elapsed_secs,
        }
    }

    /// Returns a named metric value, if recorded.
    #[must_use]
    pub fn value(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied()
    }
}

/// Mutable state of one training run.
///
/// # Example
///
/// ```rust
/// use curriculum_trainer_rs::state::{MetricRecord, TrainingState};
///
/// let mut state = TrainingState::new();
/// state.advance_batch(1);
/// state.push_train_record(MetricRecord::from_step(2.3, 0.9, 128, 0.05));
///
/// assert_eq!(state.batch, 1);
/// assert_eq!(state.epoch, 1);
/// assert_eq!(state.train_records.len(), 1);
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrainingState {
    /// Batches processed so far in this run.
    pub batch: u64,
    /// Epoch counter as reported by the data source.
    pub epoch: u64,
    /// Training-step metric sequence, in execution order.
    pub train_records: Vec<MetricRecord>,
    /// Evaluation-step metric sequence, in execution order.
    pub test_records: Vec<MetricRecord>,
}

impl TrainingState {
    /// Creates a fresh state with zeroed counters and empty sequences.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Restores state from a checkpoint so a restarted loop continues at
    /// batch `B + 1` rather than from zero.
    #[must_use]
    pub fn from_checkpoint(checkpoint: &Checkpoint) -> Self {
        checkpoint.state.clone()
    }

    /// Advances the batch counter and adopts the epoch reported by the data
    /// source alongside the batch.
    pub fn advance_batch(&mut self, epoch: u64) {
        self.batch += 1;
        self.epoch = epoch;
    }

    /// Appends one training metric record.
    pub fn push_train_record(&mut self, record: MetricRecord) {
        self.train_records.push(record);
    }

    /// Appends one evaluation metric record.
    pub fn push_test_record(&mut self, record: MetricRecord) {
        self.test_records.push(record);
    }

    /// Most recent evaluation cost, if any evaluation has run.
    #[must_use]
    pub fn last_test_cost(&self) -> Option<f64> {
        self.test_records.last().and_then(|r| r.value("cost"))
    }
}
