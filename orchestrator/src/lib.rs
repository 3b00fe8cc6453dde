pub mod classifier;
pub mod configs;
pub mod data;
pub mod env;
pub mod error;
mod planner;
mod reducer;
mod round;
mod topology;

use engine::NativeEngine;
use log::info;

pub use classifier::{ClassificationModel, NUM_CLASSES, Prediction, Vector};
pub use data::{Dataset, Partition};
pub use env::{ExecutionEnv, LocalCluster, TaskContext};
pub use error::{OrchestratorError, Result};
pub use planner::plan;
pub use reducer::reduce;
pub use round::run_round;
pub use topology::{PortClaims, TopologyBuilder, WorkerTopology};

use crate::configs::{ClassifierConfig, TrainingConfig};

/// Trains a classifier on `dataset`, one worker per executor of `env`.
///
/// Plans the partitions, claims an endpoint for every worker, runs a single
/// training round and reduces its boosters into one model. Either every
/// worker succeeds or the whole call fails.
///
/// # Arguments
/// * `env` - Where the workers run.
/// * `engine` - The native engine every worker trains with.
/// * `dataset` - The training data.
/// * `training` - The round's configuration.
/// * `classifier` - Column identifiers and thresholds of the returned model.
///
/// # Returns
/// The trained model or the first error that aborted training.
pub fn train<E, N>(
    env: &E,
    engine: &N,
    dataset: &Dataset,
    training: &TrainingConfig,
    classifier: ClassifierConfig,
) -> Result<ClassificationModel<N::Booster>>
where
    E: ExecutionEnv,
    N: NativeEngine,
{
    let params = training.to_params()?;
    classifier.validate_for(NUM_CLASSES)?;

    let runtime = engine::runtime::acquire()?;

    let planned = plan(env, dataset)?;
    let (topology, claims) = TopologyBuilder::new(training.base_port)
        .with_port_scan_limit(training.port_scan_limit)
        .build(env, &planned)?;

    let boosters = run_round(
        env,
        engine,
        &runtime,
        &planned,
        &topology,
        &claims,
        &params,
        training.join_timeout(),
    )?;
    drop(runtime);

    let booster = reduce(boosters)?;
    let model = ClassificationModel::new(booster, classifier)?;

    info!(workers = topology.num_workers(), classes = model.num_classes(); "model trained");
    Ok(model)
}
