use std::{
    num::NonZeroUsize,
    sync::atomic::{AtomicUsize, Ordering},
    thread,
};

use engine::{
    Booster, EngineError, GbdtEngine, NativeEngine, RuntimeGuard, TrainParams, TrainingRows,
    WorkerSlot,
};
use orchestrator::{
    Dataset, LocalCluster, OrchestratorError, Vector,
    configs::{ClassifierConfig, TrainingConfig},
};
use rand::{Rng, SeedableRng, rngs::StdRng};

#[derive(Debug, PartialEq)]
struct FixedBooster(f64);

impl Booster for FixedBooster {
    fn score(&self, _features: &[f64]) -> f64 {
        self.0
    }

    fn class_count(&self) -> usize {
        2
    }
}

/// Hands out a fixed margin, or a different one per rank when `divergent`.
#[derive(Default)]
struct MockEngine {
    inits: AtomicUsize,
    divergent: bool,
    failing_rank: Option<usize>,
}

impl NativeEngine for MockEngine {
    type Session = usize;
    type Booster = FixedBooster;

    fn init(&self, _runtime: &RuntimeGuard, slot: WorkerSlot<'_>) -> engine::Result<usize> {
        self.inits.fetch_add(1, Ordering::SeqCst);
        Ok(slot.rank)
    }

    fn train(
        &self,
        _runtime: &RuntimeGuard,
        rank: usize,
        rows: TrainingRows<'_>,
        _params: &TrainParams,
    ) -> engine::Result<FixedBooster> {
        assert!(!rows.is_empty());

        if self.failing_rank == Some(rank) {
            return Err(EngineError::InvalidData("mock failure".into()));
        }
        if self.divergent {
            return Ok(FixedBooster(rank as f64));
        }
        Ok(FixedBooster(0.5))
    }
}

fn config() -> TrainingConfig {
    TrainingConfig {
        base_port: 0,
        ..Default::default()
    }
}

fn dataset(rows: usize, partitions: usize) -> Dataset {
    let rows = (0..rows).map(|i| (vec![i as f64], (i % 2) as f64)).collect();
    Dataset::from_rows(rows, NonZeroUsize::new(partitions).unwrap()).unwrap()
}

#[test]
fn four_partitions_on_two_executors_train_one_model() {
    let engine = MockEngine::default();
    let env = LocalCluster::localhost(2);

    let model = orchestrator::train(
        &env,
        &engine,
        &dataset(16, 4),
        &config(),
        ClassifierConfig::default(),
    )
    .unwrap();

    assert_eq!(engine.inits.load(Ordering::SeqCst), 2);
    assert_eq!(model.num_classes(), 2);
    assert_eq!(model.predict_raw(&[3.0]), Vector::Dense(vec![-0.5, 0.5]));

    let prediction = model.predict(&[3.0]).unwrap();
    let Vector::Dense(probs) = prediction.probability else {
        panic!("probabilities must be dense");
    };
    let p0 = 1.0 / (1.0 + std::f64::consts::E);
    assert!((probs[0] - p0).abs() < 1e-12);
    assert!((probs[1] - (1.0 - p0)).abs() < 1e-12);
    assert_eq!(prediction.predicted_class, 1);
}

#[test]
fn zero_executors_fails_before_any_worker() {
    let engine = MockEngine::default();
    let env = LocalCluster::localhost(0);

    let err = orchestrator::train(
        &env,
        &engine,
        &dataset(4, 2),
        &config(),
        ClassifierConfig::default(),
    )
    .err()
    .unwrap();

    assert!(matches!(err, OrchestratorError::Configuration(_)));
    assert_eq!(engine.inits.load(Ordering::SeqCst), 0);
}

#[test]
fn empty_partition_fails_before_any_worker() {
    let engine = MockEngine::default();
    let env = LocalCluster::localhost(3);

    let err = orchestrator::train(
        &env,
        &engine,
        &dataset(2, 3),
        &config(),
        ClassifierConfig::default(),
    )
    .err()
    .unwrap();

    assert!(matches!(err, OrchestratorError::TopologyBuild { partition: 2, .. }));
    assert_eq!(engine.inits.load(Ordering::SeqCst), 0);
}

#[test]
fn invalid_config_fails_before_any_worker() {
    let engine = MockEngine::default();
    let bad = TrainingConfig {
        num_leaves: 1,
        ..config()
    };

    let err = orchestrator::train(
        &LocalCluster::localhost(2),
        &engine,
        &dataset(4, 2),
        &bad,
        ClassifierConfig::default(),
    )
    .err()
    .unwrap();

    assert!(matches!(err, OrchestratorError::Configuration(_)));
    assert_eq!(engine.inits.load(Ordering::SeqCst), 0);
}

#[test]
fn threshold_count_is_checked_before_any_worker() {
    let engine = MockEngine::default();
    let classifier = ClassifierConfig {
        thresholds: Some(vec![0.2, 0.3, 0.5]),
        ..Default::default()
    };

    let err = orchestrator::train(
        &LocalCluster::localhost(2),
        &engine,
        &dataset(4, 2),
        &config(),
        classifier,
    )
    .err()
    .unwrap();

    assert!(matches!(err, OrchestratorError::Configuration(_)));
    assert_eq!(engine.inits.load(Ordering::SeqCst), 0);
}

#[test]
fn divergent_boosters_fail_the_reduction() {
    let engine = MockEngine {
        divergent: true,
        ..Default::default()
    };

    let err = orchestrator::train(
        &LocalCluster::localhost(2),
        &engine,
        &dataset(8, 2),
        &config(),
        ClassifierConfig::default(),
    )
    .err()
    .unwrap();

    assert!(matches!(err, OrchestratorError::Reduction(_)));
}

#[test]
fn one_failing_worker_fails_the_round() {
    let engine = MockEngine {
        failing_rank: Some(1),
        ..Default::default()
    };

    let err = orchestrator::train(
        &LocalCluster::localhost(3),
        &engine,
        &dataset(9, 3),
        &config(),
        ClassifierConfig::default(),
    )
    .err()
    .unwrap();

    match err {
        OrchestratorError::WorkerTraining { partition, source } => {
            assert_eq!(partition, 1);
            assert!(matches!(source, EngineError::InvalidData(_)));
        }
        other => panic!("unexpected error: {other}"),
    }
}

/// Two noisy blobs, labelled by which side of `x0 + x1 = 0` they were drawn on.
fn blobs(rows: usize, seed: u64) -> Vec<(Vec<f64>, f64)> {
    let mut rng = StdRng::seed_from_u64(seed);

    (0..rows)
        .map(|i| {
            let label = (i % 2) as f64;
            let center = if label == 1.0 { 1.0 } else { -1.0 };
            let x = vec![
                center + rng.random_range(-0.8..0.8),
                center + rng.random_range(-0.8..0.8),
                rng.random_range(-1.0..1.0),
            ];
            (x, label)
        })
        .collect()
}

#[test]
fn native_engine_trains_end_to_end() {
    let training = TrainingConfig {
        base_port: 0,
        num_iterations: 15,
        learning_rate: 0.3,
        num_leaves: 8,
        max_bin: 64,
        min_data_in_leaf: 5,
        ..Default::default()
    };
    let dataset = Dataset::from_rows(blobs(400, 1), NonZeroUsize::new(4).unwrap()).unwrap();

    let model = orchestrator::train(
        &LocalCluster::localhost(2),
        &GbdtEngine::new(),
        &dataset,
        &training,
        ClassifierConfig::default(),
    )
    .unwrap();

    assert_eq!(model.booster().trees().len(), 15);

    let held_out = blobs(200, 2);
    let hits = held_out
        .iter()
        .filter(|(x, y)| model.predict(x).unwrap().predicted_class as f64 == *y)
        .count();
    assert!(hits as f64 / held_out.len() as f64 > 0.95);
}

#[test]
fn predictions_can_run_concurrently() {
    let model = orchestrator::train(
        &LocalCluster::localhost(2),
        &MockEngine::default(),
        &dataset(8, 2),
        &config(),
        ClassifierConfig::default(),
    )
    .unwrap();

    let expected = model.predict(&[0.0]).unwrap();
    thread::scope(|s| {
        for i in 0..8 {
            let (model, expected) = (&model, &expected);
            s.spawn(move || {
                for _ in 0..100 {
                    assert_eq!(&model.predict(&[i as f64]).unwrap(), expected);
                }
            });
        }
    });
}
