//! Loop continuation and trigger policies.
//!
//! The training loop is composed with an injected [`StopPolicy`] rather
//! than specialized by subclassing: plain epoch-bounded runs, bounded
//! mini-batch runs, and early-stopped runs are all the same loop with a
//! different strategy object.

use crate::state::TrainingState;

/// Decides whether the loop keeps iterating, and may additionally gate
/// periodic checkpoint saves.
pub trait StopPolicy {
    /// Evaluated once per iteration, before the next batch is drawn.
    fn should_continue(&mut self, state: &TrainingState) -> bool;

    /// Whether a periodic checkpoint trigger may fire in the current
    /// state. The final save at run end is never gated.
    fn allow_checkpoint(&self, _state: &TrainingState) -> bool {
        true
    }
}

/// Continue while `epoch <= max_epoch`.
#[derive(Debug, Clone, Copy)]
pub struct EpochBound {
    /// Last epoch included in the run.
    pub max_epoch: u64,
}

impl EpochBound {
    /// Bounds a run at `max_epoch` passes.
    #[must_use]
    pub fn new(max_epoch: u64) -> Self {
        Self { max_epoch }
    }
}

impl StopPolicy for EpochBound {
    fn should_continue(&mut self, state: &TrainingState) -> bool {
        state.epoch <= self.max_epoch
    }
}

/// Continue while `batch < max_batch`.
#[derive(Debug, Clone, Copy)]
pub struct BatchBound {
    /// Number of batches the run may consume.
    pub max_batch: u64,
}

impl BatchBound {
    /// Bounds a run at `max_batch` batches.
    #[must_use]
    pub fn new(max_batch: u64) -> Self {
        Self { max_batch }
    }
}

impl StopPolicy for BatchBound {
    fn should_continue(&mut self, state: &TrainingState) -> bool {
        state.batch < self.max_batch
    }
}

/// Early stopping on a smoothed evaluation cost, inside an epoch bound.
///
/// Tracks an exponential moving average of the evaluation cost. When the
/// smoothed cost has not improved by at least `min_delta` over `patience`
/// consecutive evaluations, the run stops even though epochs remain.
/// Periodic checkpoints are only allowed while the smoothed cost is at its
/// best, so the surviving checkpoint is the best-seen model rather than
/// the last one before the stop fired.
#[derive(Debug, Clone)]
pub struct SmoothedStop {
    max_epoch: u64,
    alpha: f64,
    min_delta: f64,
    patience: usize,
    smoothed: Option<f64>,
    best: Option<f64>,
    stale_evals: usize,
    seen_evals: usize,
    improved: bool,
}

impl SmoothedStop {
    /// Creates a policy bounded at `max_epoch` that stops after `patience`
    /// evaluations without a `min_delta` improvement of the smoothed cost.
    #[must_use]
    pub fn new(max_epoch: u64, patience: usize, min_delta: f64) -> Self {
        Self {
            max_epoch,
            alpha: 0.25,
            min_delta,
            patience,
            smoothed: None,
            best: None,
            stale_evals: 0,
            seen_evals: 0,
            improved: true,
        }
    }

    fn absorb_new_evals(&mut self, state: &TrainingState) {
        while self.seen_evals < state.test_records.len() {
            let record = &state.test_records[self.seen_evals];
            self.seen_evals += 1;
            let Some(cost) = record.value("cost") else {
                continue;
            };
            let smoothed = match self.smoothed {
                Some(prev) => prev + self.alpha * (cost - prev),
                None => cost,
            };
            self.smoothed = Some(smoothed);
            match self.best {
                Some(best) if smoothed >= best - self.min_delta => {
                    self.stale_evals += 1;
                    self.improved = false;
                }
                _ => {
                    self.best = Some(smoothed);
                    self.stale_evals = 0;
                    self.improved = true;
                }
            }
        }
    }
}

impl StopPolicy for SmoothedStop {
    fn should_continue(&mut self, state: &TrainingState) -> bool {
        self.absorb_new_evals(state);
        state.epoch <= self.max_epoch && self.stale_evals < self.patience
    }

    fn allow_checkpoint(&self, _state: &TrainingState) -> bool {
        self.improved
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::MetricRecord;

    fn state_at(batch: u64, epoch: u64) -> TrainingState {
        let mut state = TrainingState::new();
        state.batch = batch;
        state.epoch = epoch;
        state
    }

    #[test]
    fn test_epoch_bound_inclusive() {
        let mut policy = EpochBound::new(2);
        assert!(policy.should_continue(&state_at(0, 0)));
        assert!(policy.should_continue(&state_at(10, 2)));
        assert!(!policy.should_continue(&state_at(10, 3)));
    }

    #[test]
    fn test_batch_bound_exclusive() {
        let mut policy = BatchBound::new(3);
        assert!(policy.should_continue(&state_at(2, 1)));
        assert!(!policy.should_continue(&state_at(3, 1)));
    }

    #[test]
    fn test_smoothed_stop_halts_on_plateau() {
        let mut policy = SmoothedStop::new(100, 2, 1e-3);
        let mut state = state_at(0, 1);

        state.push_test_record(MetricRecord::from_step(2.0, 0.5, 16, 0.01));
        assert!(policy.should_continue(&state));

        // Flat costs: the smoothed value stops improving.
        state.push_test_record(MetricRecord::from_step(2.0, 0.5, 16, 0.01));
        assert!(policy.should_continue(&state));
        state.push_test_record(MetricRecord::from_step(2.0, 0.5, 16, 0.01));
        assert!(!policy.should_continue(&state));
    }

    #[test]
    fn test_smoothed_stop_continues_while_improving() {
        let mut policy = SmoothedStop::new(100, 2, 1e-3);
        let mut state = state_at(0, 1);
        for i in 0..6 {
            state.push_test_record(MetricRecord::from_step(3.0 - i as f64 * 0.4, 0.5, 16, 0.01));
            assert!(policy.should_continue(&state));
        }
    }

    #[test]
    fn test_smoothed_stop_respects_epoch_bound() {
        let mut policy = SmoothedStop::new(2, 10, 1e-3);
        assert!(!policy.should_continue(&state_at(5, 3)));
    }

    #[test]
    fn test_smoothed_stop_gates_checkpoints_when_stale() {
        let mut policy = SmoothedStop::new(100, 5, 1e-3);
        let mut state = state_at(0, 1);
        state.push_test_record(MetricRecord::from_step(2.0, 0.5, 16, 0.01));
        policy.should_continue(&state);
        assert!(policy.allow_checkpoint(&state));

        state.push_test_record(MetricRecord::from_step(2.5, 0.5, 16, 0.01));
        policy.should_continue(&state);
        assert!(!policy.allow_checkpoint(&state));
    }
}
