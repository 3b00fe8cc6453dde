use std::{borrow::Cow, collections::HashSet, io, iter, net::SocketAddr, time::Duration};

use comms::{
    OnoReceiver, OnoSender,
    msg::{Command, Msg, Payload},
};
use futures::{StreamExt, future, stream::FuturesUnordered};
use log::{debug, info, warn};
use tokio::{
    net::{
        TcpListener, TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    time,
};

use super::Endpoint;
use crate::{EngineError, Result};

type NetRx = OnoReceiver<OwnedReadHalf>;
type NetTx = OnoSender<OwnedWriteHalf>;

const CONNECT_RETRY: Duration = Duration::from_millis(50);
const ABORT_GRACE: Duration = Duration::from_secs(1);
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);
/// Far above any encoded `Join`.
const MAX_JOIN_LEN: usize = 1024;

/// Element-wise combination applied by `Mesh::allreduce`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReduceOp {
    Sum,
    Min,
    Max,
}

impl ReduceOp {
    fn combine(self, acc: f64, x: f64) -> f64 {
        match self {
            Self::Sum => acc + x,
            Self::Min => acc.min(x),
            Self::Max => acc.max(x),
        }
    }
}

struct Peer {
    rank: usize,
    rx: NetRx,
    tx: NetTx,
}

/// The fully connected set of links between the workers of one round.
///
/// Rank `i` connects to every lower rank and accepts every higher one, so each
/// pair of workers shares exactly one link.
pub struct Mesh {
    rank: usize,
    world: usize,
    peers: Vec<Peer>,
}

impl Mesh {
    /// Opens every link of the mesh for `rank` and waits on a barrier until all
    /// the workers in `topology` have done the same.
    ///
    /// # Arguments
    /// * `listener` - The already bound listener claimed for this rank.
    /// * `rank` - This worker's position in `topology`.
    /// * `topology` - The endpoints of every worker, identical for all of them.
    /// * `timeout` - Upper bound for the whole join, barrier included.
    ///
    /// # Returns
    /// The joined mesh, `EngineError::JoinTimeout` if some peer never showed up,
    /// or the I/O or protocol error that broke the join.
    pub async fn join(
        listener: TcpListener,
        rank: usize,
        topology: &[Endpoint],
        timeout: Duration,
    ) -> Result<Self> {
        let world = topology.len();
        if rank >= world {
            return Err(EngineError::Protocol(format!(
                "rank {rank} is outside of a topology of {world} workers"
            )));
        }

        let join = async {
            let (accepted, connected) = tokio::try_join!(
                Self::accept_higher(&listener, rank, world),
                Self::connect_lower(rank, topology),
            )?;

            let mut peers = connected;
            peers.extend(accepted);
            peers.sort_by_key(|peer| peer.rank);

            let mut mesh = Self { rank, world, peers };
            mesh.barrier().await?;
            Ok::<_, EngineError>(mesh)
        };

        let mesh = time::timeout(timeout, join)
            .await
            .map_err(|_| EngineError::JoinTimeout { rank, timeout })??;

        info!(rank = rank, world = world; "mesh joined");
        Ok(mesh)
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn world(&self) -> usize {
        self.world
    }

    /// Combines `buf` element-wise with the buffers of every other worker.
    ///
    /// Contributions are always folded in rank order, so every worker ends up
    /// with bit-identical results. No worker returns before all of them sent
    /// their contribution, which makes every call a barrier.
    ///
    /// # Arguments
    /// * `buf` - The local contribution, overwritten with the combined result.
    /// * `op` - The element-wise combination.
    pub async fn allreduce(&mut self, buf: &mut [f64], op: ReduceOp) -> Result<()> {
        if self.peers.is_empty() {
            return Ok(());
        }

        let local = buf.to_vec();
        let len = local.len();
        let msg = Msg::Data(Payload::Reduce(&local));

        let (txs, rxs): (Vec<_>, Vec<_>) = self
            .peers
            .iter_mut()
            .map(|peer| ((peer.rank, &mut peer.tx), (peer.rank, &mut peer.rx)))
            .unzip();

        let send = async {
            for (rank, tx) in txs {
                tx.send(&msg).await.map_err(|e| lost_peer(rank, e))?;
            }
            Ok::<_, EngineError>(())
        };
        let recv = future::try_join_all(
            rxs.into_iter()
                .map(|(rank, rx)| Self::recv_contribution(rank, rx, len)),
        );
        let ((), contributions) = tokio::try_join!(send, recv)?;

        // Peers are sorted and hold every rank but ours.
        let (lower, higher) = contributions.split_at(self.rank);
        let mut ordered = lower
            .iter()
            .map(Vec::as_slice)
            .chain(iter::once(local.as_slice()))
            .chain(higher.iter().map(Vec::as_slice));

        if let Some(first) = ordered.next() {
            buf.copy_from_slice(first);
        }
        for contribution in ordered {
            for (acc, x) in buf.iter_mut().zip(contribution) {
                *acc = op.combine(*acc, *x);
            }
        }

        Ok(())
    }

    /// Tells every peer this worker is leaving the round because of `reason`.
    ///
    /// Best effort, peers that can't be reached in time are skipped.
    pub async fn abort(mut self, reason: &str) {
        warn!(rank = self.rank; "aborting round: {reason}");
        let msg = Msg::Err(Cow::Borrowed(reason));

        for peer in &mut self.peers {
            if time::timeout(ABORT_GRACE, peer.tx.send(&msg)).await.is_err() {
                debug!(rank = self.rank, peer = peer.rank; "peer unreachable while aborting");
            }
        }
    }

    /// Exchanges a `Disconnect` with every peer and closes all the links.
    pub async fn close(mut self) -> Result<()> {
        let msg = Msg::Control(Command::Disconnect);

        let (txs, rxs): (Vec<_>, Vec<_>) = self
            .peers
            .iter_mut()
            .map(|peer| (&mut peer.tx, (peer.rank, &mut peer.rx)))
            .unzip();

        let send = async {
            for tx in txs {
                tx.send(&msg).await?;
                tx.shutdown().await?;
            }
            Ok::<_, EngineError>(())
        };
        let recv = future::try_join_all(
            rxs.into_iter()
                .map(|(rank, rx)| Self::recv_disconnect(rank, rx)),
        );
        tokio::try_join!(send, recv)?;

        debug!(rank = self.rank; "mesh closed");
        Ok(())
    }

    async fn barrier(&mut self) -> Result<()> {
        let mut present = [1.0];
        self.allreduce(&mut present, ReduceOp::Sum).await?;

        if present[0] != self.world as f64 {
            return Err(EngineError::Protocol(format!(
                "barrier counted {} workers, expected {}",
                present[0], self.world
            )));
        }

        Ok(())
    }

    async fn accept_higher(listener: &TcpListener, rank: usize, world: usize) -> Result<Vec<Peer>> {
        let expected = world - rank - 1;
        let mut peers = Vec::with_capacity(expected);
        let mut seen = HashSet::with_capacity(expected);
        let mut handshakes = FuturesUnordered::new();

        while peers.len() < expected {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, addr) = accepted?;
                    handshakes.push(Self::handshake(stream, addr, rank));
                }
                Some(joined) = handshakes.next() => {
                    let Some((peer_world, peer)) = joined else {
                        continue;
                    };
                    let peer_rank = peer.rank;

                    if peer_world != world || peer_rank <= rank || peer_rank >= world {
                        return Err(EngineError::Protocol(format!(
                            "rank {rank} got a join from rank {peer_rank} of {peer_world}, mesh has {world}"
                        )));
                    }
                    if !seen.insert(peer_rank) {
                        return Err(EngineError::Protocol(format!(
                            "rank {peer_rank} joined rank {rank} twice"
                        )));
                    }

                    peers.push(peer);
                }
            }
        }

        Ok(peers)
    }

    /// Reads the `Join` opening an accepted connection.
    ///
    /// # Returns
    /// The claimed world and the peer, or `None` if the connection was
    /// dropped because it didn't open with a `Join` in time.
    async fn handshake(stream: TcpStream, addr: SocketAddr, rank: usize) -> Option<(usize, Peer)> {
        if let Err(e) = stream.set_nodelay(true) {
            warn!(rank = rank; "dropping connection from {addr}: {e}");
            return None;
        }
        let (rx, tx) = stream.into_split();
        let (mut rx, tx) = comms::channel(rx, tx);
        let mut buf: Vec<u64> = Vec::new();

        let first = time::timeout(HANDSHAKE_TIMEOUT, rx.recv_bounded(&mut buf, MAX_JOIN_LEN));
        match first.await {
            Ok(Ok(Msg::Control(Command::Join { rank: peer, world }))) => {
                debug!(rank = rank, peer = peer; "accepted peer from {addr}");
                Some((world, Peer { rank: peer, rx, tx }))
            }
            Ok(Ok(msg)) => {
                warn!(rank = rank; "dropping connection from {addr}, expected join, got {msg:?}");
                None
            }
            Ok(Err(e)) => {
                warn!(rank = rank; "dropping connection from {addr}: {e}");
                None
            }
            Err(_) => {
                warn!(rank = rank; "dropping connection from {addr}, no join after {HANDSHAKE_TIMEOUT:?}");
                None
            }
        }
    }

    async fn connect_lower(rank: usize, topology: &[Endpoint]) -> Result<Vec<Peer>> {
        let world = topology.len();
        let connections = topology[..rank]
            .iter()
            .enumerate()
            .map(|(peer_rank, endpoint)| async move {
                let stream = Self::connect_with_retry(endpoint).await?;
                stream.set_nodelay(true)?;
                let (rx, tx) = stream.into_split();
                let (rx, mut tx) = comms::channel(rx, tx);

                let msg = Msg::Control(Command::Join { rank, world });
                tx.send(&msg).await?;

                debug!(rank = rank, peer = peer_rank; "connected to peer at {endpoint}");
                Ok::<_, EngineError>(Peer {
                    rank: peer_rank,
                    rx,
                    tx,
                })
            });

        future::try_join_all(connections).await
    }

    /// Connects to `endpoint`, retrying while nobody listens there yet.
    async fn connect_with_retry(endpoint: &Endpoint) -> io::Result<TcpStream> {
        loop {
            match TcpStream::connect((endpoint.host.as_str(), endpoint.port)).await {
                Ok(stream) => return Ok(stream),
                Err(e) if e.kind() == io::ErrorKind::ConnectionRefused => {
                    time::sleep(CONNECT_RETRY).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn recv_contribution(rank: usize, rx: &mut NetRx, len: usize) -> Result<Vec<f64>> {
        let mut buf: Vec<f64> = Vec::new();

        match rx.recv_into(&mut buf).await.map_err(|e| lost_peer(rank, e))? {
            Msg::Data(Payload::Reduce(nums)) if nums.len() == len => Ok(nums.to_vec()),
            Msg::Data(Payload::Reduce(nums)) => Err(EngineError::Protocol(format!(
                "rank {rank} contributed {} values, expected {len}",
                nums.len()
            ))),
            Msg::Err(detail) => Err(EngineError::PeerFailed {
                rank,
                detail: detail.into_owned(),
            }),
            msg => Err(EngineError::Protocol(format!(
                "rank {rank} sent {msg:?} during a reduction"
            ))),
        }
    }

    async fn recv_disconnect(rank: usize, rx: &mut NetRx) -> Result<()> {
        let mut buf: Vec<u64> = Vec::new();

        match rx.recv_into(&mut buf).await.map_err(|e| lost_peer(rank, e))? {
            Msg::Control(Command::Disconnect) => Ok(()),
            Msg::Err(detail) => Err(EngineError::PeerFailed {
                rank,
                detail: detail.into_owned(),
            }),
            msg => Err(EngineError::Protocol(format!(
                "rank {rank} sent {msg:?} while disconnecting"
            ))),
        }
    }
}

/// Attributes a broken link to the peer on the other side.
fn lost_peer(rank: usize, e: io::Error) -> EngineError {
    match e.kind() {
        io::ErrorKind::UnexpectedEof
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::BrokenPipe => EngineError::PeerFailed {
            rank,
            detail: e.to_string(),
        },
        _ => EngineError::Io(e),
    }
}
