//! Staged curriculum controllers.
//!
//! A curriculum controller composes multiple sequential [`crate::training::TrainingLoop`]
//! runs with a model-mutation step between phases. Phases run strictly in
//! order — each one's model and data configuration is derived from the
//! previous phase's persisted checkpoint, so nothing overlaps.
//!
//! Three strategies are provided:
//!
//! - [`LayerwiseTrainer`] grows the fully-connected stack one pair at a
//!   time, training sub-models over activations spooled by earlier phases.
//! - [`CategoryWiseTrainer`] widens the output layer across leading
//!   class-range stages.
//! - [`CategoryGroupTrainer`] does the same across group-membership
//!   partitions.

pub mod category;
pub mod layerwise;
pub mod surgery;

pub use category::{CategoryGroupTrainer, CategoryWiseTrainer, StagePlan};
pub use layerwise::{LayerwiseSettings, LayerwiseTrainer};
pub use surgery::{
    resize_output, scale_learning_rate, splice_tail, split_curriculum, strip_learned,
    CurriculumSplit, FcPair,
};
