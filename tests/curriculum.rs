//! Integration tests for the curriculum controllers: stage counts, the
//! weight-transfer contract, and layer-wise growth over replayed
//! activations.

mod common;

use common::{layerwise_model, staged_model, RecordingPartitioner, StubFactory, SyntheticSource};
use curriculum_trainer_rs::checkpoint::CheckpointStore;
use curriculum_trainer_rs::curriculum::{
    CategoryGroupTrainer, CategoryWiseTrainer, LayerwiseSettings, LayerwiseTrainer, StagePlan,
};
use curriculum_trainer_rs::data::DataSelector;
use curriculum_trainer_rs::error::TrainError;
use curriculum_trainer_rs::training::LoopOptions;
use tempfile::TempDir;

fn stage(size: usize, batch_budget: u64) -> StagePlan {
    StagePlan {
        size,
        batch_budget,
        learning_rate: 0.1,
    }
}

fn quiet_options() -> LoopOptions {
    LoopOptions {
        batch_size: 3,
        test_freq: 1000,
        save_freq: 1000,
        ..LoopOptions::default()
    }
}

#[test]
fn test_catewise_stage_count_and_selectors() {
    let dir = TempDir::new().unwrap();
    let factory = StubFactory::new();
    let builds = factory.builds.clone();
    let partitioner = RecordingPartitioner::new();
    let requests = partitioner.requests.clone();
    let store = CheckpointStore::open(dir.path(), "cate").unwrap();

    let mut trainer = CategoryWiseTrainer::new(
        &staged_model(6),
        Box::new(factory),
        Box::new(partitioner),
        store,
        quiet_options(),
        vec![stage(2, 2), stage(4, 2), stage(6, 2)],
        6,
    )
    .unwrap();
    trainer.train().unwrap();

    // One stage per configured size: 1 + len(extra ranges).
    assert_eq!(builds.borrow().len(), 3);
    assert_eq!(
        *requests.borrow(),
        vec![
            DataSelector::CategoryRange(2),
            DataSelector::CategoryRange(4),
            DataSelector::CategoryRange(6),
        ]
    );

    // The final stage ran at the full class count and left a checkpoint.
    let latest = trainer.store().latest().unwrap();
    assert_eq!(latest.state.batch, 2);
    let output = &latest.layers[latest.layers.len() - 2];
    assert_eq!(output.output_size, Some(6));
}

#[test]
fn test_catewise_transfer_contract() {
    let dir = TempDir::new().unwrap();
    let factory = StubFactory::new();
    let builds = factory.builds.clone();
    let store = CheckpointStore::open(dir.path(), "transfer").unwrap();

    let mut trainer = CategoryWiseTrainer::new(
        &staged_model(4),
        Box::new(factory),
        Box::new(RecordingPartitioner::new()),
        store,
        quiet_options(),
        vec![stage(2, 2), stage(4, 2)],
        4,
    )
    .unwrap();
    trainer.train().unwrap();

    // At each transition the output layer was handed to the factory with
    // nulled tensors while the hidden layer kept its learned weights.
    let builds = builds.borrow();
    let stage2_input = &builds[1];
    let hidden = &stage2_input[0];
    let output = &stage2_input[1];
    // Hidden layer carries the marker of the first build (1.0) forward.
    assert_eq!(hidden.weight.as_ref().unwrap()[[0, 0]], 1.0);
    // Output layer was reinitialized by the second build (marker 2.0).
    assert_eq!(output.weight.as_ref().unwrap()[[0, 0]], 2.0);
    assert_eq!(output.output_size, Some(4));
    assert!(output.weight_momentum.is_none());
}

#[test]
fn test_categroup_uses_group_selectors() {
    let dir = TempDir::new().unwrap();
    let partitioner = RecordingPartitioner::new();
    let requests = partitioner.requests.clone();
    let store = CheckpointStore::open(dir.path(), "group").unwrap();

    let mut trainer = CategoryGroupTrainer::new(
        &staged_model(5),
        Box::new(StubFactory::new()),
        Box::new(partitioner),
        store,
        quiet_options(),
        vec![stage(2, 2), stage(5, 2)],
        5,
    )
    .unwrap();
    trainer.train().unwrap();

    assert_eq!(
        *requests.borrow(),
        vec![DataSelector::GroupCount(2), DataSelector::GroupCount(5)]
    );
}

#[test]
fn test_staged_validation_fails_before_any_build() {
    let dir = TempDir::new().unwrap();
    let factory = StubFactory::new();
    let builds = factory.builds.clone();
    let store = CheckpointStore::open(dir.path(), "invalid").unwrap();

    // The stage list does not end at the full class count.
    let err = CategoryWiseTrainer::new(
        &staged_model(6),
        Box::new(factory),
        Box::new(RecordingPartitioner::new()),
        store,
        quiet_options(),
        vec![stage(2, 2), stage(4, 2)],
        6,
    )
    .unwrap_err();

    assert!(matches!(err, TrainError::Config(_)));
    assert_eq!(builds.borrow().len(), 0);
}

#[test]
fn test_layerwise_grows_model_over_replayed_activations() {
    let checkpoint_dir = TempDir::new().unwrap();
    let output_dir = TempDir::new().unwrap();
    let factory = StubFactory::new();
    let builds = factory.builds.clone();
    let store = CheckpointStore::open(checkpoint_dir.path(), "layer").unwrap();

    let mut trainer = LayerwiseTrainer::new(
        &layerwise_model(),
        Box::new(factory),
        Box::new(SyntheticSource::new(2, 3, 2)),
        Box::new(SyntheticSource::new(2, 3, 2)),
        store,
        quiet_options(),
        LayerwiseSettings::new(output_dir.path()),
        2,
        0.5,
    )
    .unwrap();
    trainer.train().unwrap();

    // Head phase, one sub-model phase, one full phase: three builds.
    let builds = builds.borrow();
    assert_eq!(builds.len(), 3);

    // The head model trained the conv prefix plus the last pair's fc.
    let head_names: Vec<&str> = builds[0].iter().map(|l| l.name.as_str()).collect();
    assert_eq!(head_names, vec!["conv1", "pool1", "fc2", "softmax"]);

    // The sub-model replayed activations: first stack pair at a scaled
    // learning rate, the stripped checkpoint tail behind it.
    let sub = &builds[1];
    let sub_names: Vec<&str> = sub.iter().map(|l| l.name.as_str()).collect();
    assert_eq!(sub_names, vec!["fc1", "fc1_neuron", "fc2", "softmax"]);
    assert!((sub[0].weight_lr - 0.5).abs() < 1e-12);

    // The final full model grew by the spliced-in pair.
    let latest = trainer.store().latest().unwrap();
    let full_names: Vec<&str> = latest.layers.iter().map(|l| l.name.as_str()).collect();
    assert_eq!(
        full_names,
        vec!["conv1", "pool1", "fc1", "fc1_neuron", "fc2", "softmax"]
    );
    // Chunk files from the final full phase remain on disk for the next
    // consumer.
    assert!(output_dir.path().join("train-data.0").exists());
    assert!(output_dir.path().join("test-data.0").exists());
}

#[test]
fn test_layerwise_rejects_all_convolutional_model() {
    let checkpoint_dir = TempDir::new().unwrap();
    let output_dir = TempDir::new().unwrap();
    let store = CheckpointStore::open(checkpoint_dir.path(), "allconv").unwrap();

    let layers = vec![
        curriculum_trainer_rs::model::Layer::untrained(
            "conv1",
            curriculum_trainer_rs::model::LayerKind::Conv,
        ),
        curriculum_trainer_rs::model::Layer::untrained(
            "softmax",
            curriculum_trainer_rs::model::LayerKind::Softmax,
        ),
    ];
    let err = LayerwiseTrainer::new(
        &layers,
        Box::new(StubFactory::new()),
        Box::new(SyntheticSource::new(2, 3, 2)),
        Box::new(SyntheticSource::new(2, 3, 2)),
        store,
        quiet_options(),
        LayerwiseSettings::new(output_dir.path()),
        2,
        0.5,
    )
    .unwrap_err();
    assert!(matches!(err, TrainError::Config(_)));
}
