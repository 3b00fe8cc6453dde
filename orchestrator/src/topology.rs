use std::{
    collections::HashMap,
    io,
    net::{TcpListener, ToSocketAddrs},
};

use engine::net::Endpoint;
use log::{debug, info};
use parking_lot::Mutex;

use crate::{
    data::Dataset,
    env::ExecutionEnv,
    error::{OrchestratorError, Result},
};

const DEFAULT_PORT_SCAN_LIMIT: u16 = 1000;

/// The endpoint of every worker of a round, in partition order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerTopology {
    endpoints: Vec<Endpoint>,
}

impl WorkerTopology {
    pub fn new(endpoints: Vec<Endpoint>) -> Self {
        Self { endpoints }
    }

    #[inline]
    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    #[inline]
    pub fn num_workers(&self) -> usize {
        self.endpoints.len()
    }
}

/// The listeners bound while building a topology, by partition.
///
/// Holding the listener is what reserves the port, each worker takes its own
/// claim out exactly once.
#[derive(Debug, Default)]
pub struct PortClaims {
    listeners: Mutex<HashMap<usize, TcpListener>>,
}

impl PortClaims {
    fn insert(&self, partition: usize, listener: TcpListener) {
        self.listeners.lock().insert(partition, listener);
    }

    /// Takes the claim of `partition`, `None` if it was already taken.
    pub fn take(&self, partition: usize) -> Option<TcpListener> {
        self.listeners.lock().remove(&partition)
    }

    pub fn len(&self) -> usize {
        self.listeners.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.lock().is_empty()
    }
}

/// Gives every partition of a dataset its own network identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TopologyBuilder {
    base_port: u16,
    port_scan_limit: u16,
}

impl TopologyBuilder {
    /// Creates a new `TopologyBuilder` scanning ports upwards from `base_port`.
    ///
    /// A `base_port` of `0` lets the OS pick a free port for every worker.
    pub fn new(base_port: u16) -> Self {
        Self {
            base_port,
            port_scan_limit: DEFAULT_PORT_SCAN_LIMIT,
        }
    }

    /// Caps how many consecutive ports are tried per partition.
    pub fn with_port_scan_limit(mut self, port_scan_limit: u16) -> Self {
        self.port_scan_limit = port_scan_limit;
        self
    }

    /// Claims one port per partition on the host of the executor running it.
    ///
    /// Runs a single discovery pass over `dataset` on `env`, every task binds
    /// the first free port of its host so partitions sharing a host always
    /// end up with distinct ports.
    ///
    /// # Returns
    /// The topology in partition order and the claims backing it, or the
    /// `OrchestratorError::TopologyBuild` of the lowest failing partition.
    pub fn build<E: ExecutionEnv>(
        &self,
        env: &E,
        dataset: &Dataset,
    ) -> Result<(WorkerTopology, PortClaims)> {
        let claims = PortClaims::default();

        let endpoints = env
            .map_partitions(dataset, |ctx, partition| {
                let fail = |reason: String| OrchestratorError::TopologyBuild {
                    partition: ctx.partition,
                    reason,
                };

                if partition.is_empty() {
                    return Err(fail("partition has no rows".into()));
                }

                let listener = self.claim_port(ctx.host).map_err(fail)?;
                let port = listener
                    .local_addr()
                    .map_err(|e| fail(format!("claimed listener has no address: {e}")))?
                    .port();

                debug!(partition = ctx.partition, port = port; "claimed port on {}", ctx.host);
                claims.insert(ctx.partition, listener);
                Ok(Endpoint::new(ctx.host, port))
            })
            .into_iter()
            .collect::<Result<Vec<_>>>()?;

        let topology = WorkerTopology::new(endpoints);
        info!(workers = topology.num_workers(); "topology built");
        Ok((topology, claims))
    }

    /// Binds the first port of `host` that isn't in use.
    fn claim_port(&self, host: &str) -> std::result::Result<TcpListener, String> {
        if self.port_scan_limit == 0 {
            return Err("port scan limit is zero".into());
        }

        if (host, 0).to_socket_addrs().is_err() {
            return Err(format!("can't resolve host {host}"));
        }

        let first = self.base_port;
        let last = first.saturating_add(self.port_scan_limit - 1);

        for port in first..=last {
            match TcpListener::bind((host, port)) {
                Ok(listener) => return Ok(listener),
                Err(e) if e.kind() == io::ErrorKind::AddrInUse => continue,
                Err(e) => return Err(format!("failed to bind {host}:{port}: {e}")),
            }
        }

        Err(format!("no free port on {host} between {first} and {last}"))
    }
}
