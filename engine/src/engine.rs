use std::{net, time::Duration};

use log::debug;
use tokio::net::TcpListener;

use crate::{
    EngineError, Result, TrainParams,
    booster::{Booster, GbdtBooster},
    data::TrainingRows,
    learner,
    net::{Endpoint, Mesh},
    runtime::RuntimeGuard,
};

/// Everything one worker needs to take its place in a round.
#[derive(Debug)]
pub struct WorkerSlot<'a> {
    /// This worker's index into `topology`.
    pub rank: usize,
    /// The listener already bound to `topology[rank]`.
    pub listener: net::TcpListener,
    pub topology: &'a [Endpoint],
    pub join_timeout: Duration,
}

/// A network-aware distributed training engine.
///
/// `init` and `train` are called once per worker and round, concurrently on
/// every worker of the topology.
pub trait NativeEngine: Sync {
    type Session;
    /// Equal on every worker of a successful round.
    type Booster: Booster + PartialEq + Send;

    /// Opens this worker's endpoint and joins its peers.
    fn init(&self, runtime: &RuntimeGuard, slot: WorkerSlot<'_>) -> Result<Self::Session>;

    /// Trains on the local `rows` cooperatively with the session's peers.
    fn train(
        &self,
        runtime: &RuntimeGuard,
        session: Self::Session,
        rows: TrainingRows<'_>,
        params: &TrainParams,
    ) -> Result<Self::Booster>;
}

/// The built-in histogram based GBDT engine.
#[derive(Debug, Default, Clone, Copy)]
pub struct GbdtEngine;

impl GbdtEngine {
    pub fn new() -> Self {
        Self
    }
}

impl NativeEngine for GbdtEngine {
    type Session = Mesh;
    type Booster = GbdtBooster;

    fn init(&self, runtime: &RuntimeGuard, slot: WorkerSlot<'_>) -> Result<Mesh> {
        let WorkerSlot {
            rank,
            listener,
            topology,
            join_timeout,
        } = slot;

        let addr = topology
            .get(rank)
            .map(ToString::to_string)
            .unwrap_or_else(|| format!("rank {rank}"));
        let bind_err = |source| EngineError::Bind {
            addr: addr.clone(),
            source,
        };

        listener.set_nonblocking(true).map_err(bind_err)?;

        runtime.block_on(async {
            let listener = TcpListener::from_std(listener).map_err(bind_err)?;
            debug!(rank = rank; "listening at {addr}");
            Mesh::join(listener, rank, topology, join_timeout).await
        })
    }

    fn train(
        &self,
        runtime: &RuntimeGuard,
        mut session: Mesh,
        rows: TrainingRows<'_>,
        params: &TrainParams,
    ) -> Result<GbdtBooster> {
        runtime.block_on(async move {
            match learner::fit(&mut session, rows, params).await {
                Ok(booster) => {
                    session.close().await?;
                    Ok(booster)
                }
                Err(e) => {
                    session.abort(&e.to_string()).await;
                    Err(e)
                }
            }
        })
    }
}
