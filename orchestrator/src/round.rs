use std::time::Duration;

use engine::{EngineError, NativeEngine, RuntimeGuard, TrainParams, WorkerSlot};
use log::{debug, error, info};

use crate::{
    data::Dataset,
    env::ExecutionEnv,
    error::{OrchestratorError, Result},
    topology::{PortClaims, WorkerTopology},
};

/// Runs one synchronized training round, one worker per partition.
///
/// Every worker joins the mesh described by `topology` through the listener it
/// claimed and trains cooperatively with all the others. The round is all or
/// nothing, if a single worker fails no booster is returned.
///
/// # Arguments
/// * `env` - Runs the workers, all of them concurrently.
/// * `engine` - The native engine every worker trains with.
/// * `runtime` - The process-wide engine runtime.
/// * `dataset` - The planned dataset, one partition per worker.
/// * `topology` - The endpoint of every worker, in partition order.
/// * `claims` - The listeners backing `topology`.
/// * `params` - The hyperparameters shared by every worker.
/// * `join_timeout` - How long a worker waits for the whole mesh to join.
///
/// # Returns
/// One booster per partition, in partition order.
#[allow(clippy::too_many_arguments)]
pub fn run_round<E, N>(
    env: &E,
    engine: &N,
    runtime: &RuntimeGuard,
    dataset: &Dataset,
    topology: &WorkerTopology,
    claims: &PortClaims,
    params: &TrainParams,
    join_timeout: Duration,
) -> Result<Vec<N::Booster>>
where
    E: ExecutionEnv,
    N: NativeEngine,
{
    if topology.num_workers() != dataset.num_partitions() {
        return Err(OrchestratorError::InvariantViolation(format!(
            "topology has {} workers for {} partitions",
            topology.num_workers(),
            dataset.num_partitions()
        )));
    }

    info!(workers = topology.num_workers(); "starting training round");

    let results = env.map_partitions(dataset, |ctx, partition| {
        let rank = ctx.partition;
        let worker_err = |source| OrchestratorError::WorkerTraining {
            partition: rank,
            source,
        };

        let Some(listener) = claims.take(rank) else {
            return Err(OrchestratorError::InvariantViolation(format!(
                "partition {rank} has no port claim"
            )));
        };

        let slot = WorkerSlot {
            rank,
            listener,
            topology: topology.endpoints(),
            join_timeout,
        };

        let session = engine.init(runtime, slot).map_err(worker_err)?;
        debug!(partition = rank; "worker joined the round");

        let rows = partition.training_rows().map_err(worker_err)?;
        let booster = engine
            .train(runtime, session, rows, params)
            .map_err(worker_err)?;

        debug!(partition = rank; "worker finished training");
        Ok(booster)
    });

    let mut boosters = Vec::with_capacity(results.len());
    let mut failure: Option<OrchestratorError> = None;

    for result in results {
        match result {
            Ok(booster) => boosters.push(booster),
            Err(e) => {
                error!("{e}");
                // Prefer the worker that failed first over the peers it took down.
                let replace = failure
                    .as_ref()
                    .is_none_or(|f| is_peer_failure(f) && !is_peer_failure(&e));
                if replace {
                    failure = Some(e);
                }
            }
        }
    }

    if let Some(e) = failure {
        return Err(e);
    }

    info!(boosters = boosters.len(); "training round finished");
    Ok(boosters)
}

fn is_peer_failure(e: &OrchestratorError) -> bool {
    matches!(
        e,
        OrchestratorError::WorkerTraining {
            source: EngineError::PeerFailed { .. },
            ..
        }
    )
}
