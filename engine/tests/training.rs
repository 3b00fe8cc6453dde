use std::{net::TcpListener, num::NonZeroUsize, thread, time::Duration};

use engine::{
    Booster, EngineError, GbdtBooster, GbdtEngine, MAX_BIN, NativeEngine, ParallelismMode,
    TrainParams, TrainingRows, WorkerSlot, net::Endpoint, runtime,
};
use rand::{Rng, SeedableRng, rngs::StdRng};

const NUM_FEATURES: usize = 3;

struct Shard {
    features: Vec<f64>,
    labels: Vec<f64>,
}

/// Rows labelled by `x0 > 0.2`, the other features are noise.
fn make_shards(world: usize, rows_per_shard: usize, seed: u64) -> Vec<Shard> {
    let mut rng = StdRng::seed_from_u64(seed);

    (0..world)
        .map(|_| {
            let mut features = Vec::with_capacity(rows_per_shard * NUM_FEATURES);
            let mut labels = Vec::with_capacity(rows_per_shard);

            for _ in 0..rows_per_shard {
                let row: [f64; NUM_FEATURES] = [
                    rng.random_range(-1.0..1.0),
                    rng.random_range(-1.0..1.0),
                    rng.random_range(0.0..5.0),
                ];
                features.extend_from_slice(&row);
                labels.push(if row[0] > 0.2 { 1.0 } else { 0.0 });
            }

            Shard { features, labels }
        })
        .collect()
}

fn params(parallelism: ParallelismMode) -> TrainParams {
    TrainParams {
        parallelism,
        num_iterations: NonZeroUsize::new(20).unwrap(),
        learning_rate: 0.3,
        num_leaves: NonZeroUsize::new(4).unwrap(),
        max_bin: NonZeroUsize::new(32).unwrap(),
        min_data_in_leaf: 5,
        ..TrainParams::default()
    }
}

fn bind_world(world: usize) -> (Vec<TcpListener>, Vec<Endpoint>) {
    (0..world)
        .map(|_| {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            let port = listener.local_addr().unwrap().port();
            (listener, Endpoint::new("127.0.0.1", port))
        })
        .unzip()
}

/// Runs one worker per shard, each on its own thread, like a real round.
fn train_round(shards: &[Shard], params: &TrainParams) -> Vec<Result<GbdtBooster, EngineError>> {
    let rt = runtime::acquire().unwrap();
    let engine = GbdtEngine::new();
    let (listeners, topology) = bind_world(shards.len());

    thread::scope(|s| {
        let handles: Vec<_> = listeners
            .into_iter()
            .zip(shards)
            .enumerate()
            .map(|(rank, (listener, shard))| {
                let (rt, engine, topology) = (&rt, &engine, &topology);
                s.spawn(move || -> Result<GbdtBooster, EngineError> {
                    let slot = WorkerSlot {
                        rank,
                        listener,
                        topology,
                        join_timeout: Duration::from_secs(10),
                    };
                    let session = engine.init(rt, slot)?;
                    let rows = TrainingRows::new(&shard.features, &shard.labels, NUM_FEATURES)?;
                    engine.train(rt, session, rows, params)
                })
            })
            .collect();

        handles.into_iter().map(|h| h.join().unwrap()).collect()
    })
}

fn accuracy(booster: &GbdtBooster, shards: &[Shard]) -> f64 {
    let mut hits = 0;
    let mut total = 0;

    for shard in shards {
        for (row, label) in shard.features.chunks_exact(NUM_FEATURES).zip(&shard.labels) {
            let predicted = if booster.score(row) > 0.0 { 1.0 } else { 0.0 };
            hits += usize::from(predicted == *label);
            total += 1;
        }
    }

    hits as f64 / total as f64
}

#[test]
fn data_parallel_workers_build_the_same_booster() {
    let shards = make_shards(2, 150, 7);
    let boosters: Vec<_> = train_round(&shards, &params(ParallelismMode::DataParallel))
        .into_iter()
        .map(|res| res.unwrap())
        .collect();

    assert_eq!(boosters[0], boosters[1]);
    assert_eq!(boosters[0].trees().len(), 20);
    assert!(accuracy(&boosters[0], &shards) > 0.95);

    let held_out = make_shards(1, 200, 99);
    assert!(accuracy(&boosters[0], &held_out) > 0.9);
}

#[test]
fn voting_parallel_workers_build_the_same_booster() {
    let top_k = NonZeroUsize::new(1).unwrap();
    let shards = make_shards(3, 100, 11);
    let boosters: Vec<_> = train_round(&shards, &params(ParallelismMode::VotingParallel { top_k }))
        .into_iter()
        .map(|res| res.unwrap())
        .collect();

    assert_eq!(boosters[0], boosters[1]);
    assert_eq!(boosters[1], boosters[2]);
    assert!(accuracy(&boosters[0], &shards) > 0.9);
}

#[test]
fn single_worker_round_trains_alone() {
    let shards = make_shards(1, 200, 3);
    let mut boosters = train_round(&shards, &params(ParallelismMode::DataParallel));

    let booster = boosters.remove(0).unwrap();
    assert!(accuracy(&booster, &shards) > 0.95);
}

#[test]
fn invalid_labels_fail_the_whole_round() {
    let mut shards = make_shards(2, 50, 5);
    shards[0].labels[3] = 2.0;

    let results = train_round(&shards, &params(ParallelismMode::DataParallel));

    assert!(matches!(results[0], Err(EngineError::InvalidData(_))));
    assert!(results[1].is_err());
}

#[test]
fn oversized_bin_count_is_rejected_on_every_worker() {
    let shards = make_shards(2, 50, 13);
    let params = TrainParams {
        max_bin: NonZeroUsize::new(MAX_BIN + 1).unwrap(),
        ..params(ParallelismMode::DataParallel)
    };

    for result in train_round(&shards, &params) {
        assert!(matches!(result, Err(EngineError::InvalidData(_))));
    }
}
