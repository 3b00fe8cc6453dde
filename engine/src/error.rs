use std::{error::Error, fmt, io, time::Duration};

/// The engine module's result type.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Failures of the native training engine.
#[derive(Debug)]
pub enum EngineError {
    /// An underlying I/O error on a mesh link.
    Io(io::Error),
    /// The worker couldn't take ownership of its claimed endpoint.
    Bind { addr: String, source: io::Error },
    /// Not every peer joined the mesh within the allowed time.
    JoinTimeout { rank: usize, timeout: Duration },
    /// A peer sent something the protocol doesn't allow at this point.
    Protocol(String),
    /// A peer reported its own failure and left the round.
    PeerFailed { rank: usize, detail: String },
    /// The local rows can't be used for training.
    InvalidData(String),
    /// The process-wide runtime couldn't be set up.
    Runtime(io::Error),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "io error: {e}"),
            Self::Bind { addr, source } => write!(f, "failed to bind {addr}: {source}"),
            Self::JoinTimeout { rank, timeout } => {
                write!(f, "rank {rank} timed out after {timeout:?} waiting for peers")
            }
            Self::Protocol(msg) => write!(f, "protocol violation: {msg}"),
            Self::PeerFailed { rank, detail } => write!(f, "peer {rank} failed: {detail}"),
            Self::InvalidData(msg) => write!(f, "invalid training data: {msg}"),
            Self::Runtime(e) => write!(f, "runtime initialization failed: {e}"),
        }
    }
}

impl Error for EngineError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io(e) | Self::Runtime(e) => Some(e),
            Self::Bind { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<io::Error> for EngineError {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}
