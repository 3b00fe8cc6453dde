use std::fmt;

use engine::EngineError;

/// The orchestrator module's result type.
pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// All errors that can occur in the orchestrator.
///
/// Every variant is fatal to the `train` call that produced it, no partial
/// model is ever returned.
#[derive(Debug)]
pub enum OrchestratorError {
    /// Invalid configuration, caught before any worker starts.
    Configuration(String),
    /// Some partition couldn't be given a network identity.
    TopologyBuild { partition: usize, reason: String },
    /// A worker failed during the training round.
    WorkerTraining {
        partition: usize,
        source: EngineError,
    },
    /// The per-partition boosters couldn't be reduced to a single one.
    Reduction(String),
    /// A value broke an internal contract of the inference model.
    InvariantViolation(String),
    /// The process-wide engine runtime couldn't be set up.
    Runtime(EngineError),
}

impl fmt::Display for OrchestratorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration(msg) => write!(f, "invalid configuration: {msg}"),
            Self::TopologyBuild { partition, reason } => {
                write!(f, "topology build failed for partition {partition}: {reason}")
            }
            Self::WorkerTraining { partition, source } => {
                write!(f, "worker for partition {partition} failed: {source}")
            }
            Self::Reduction(msg) => write!(f, "model reduction failed: {msg}"),
            Self::InvariantViolation(msg) => write!(f, "invariant violated: {msg}"),
            Self::Runtime(e) => write!(f, "engine runtime unavailable: {e}"),
        }
    }
}

impl std::error::Error for OrchestratorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::WorkerTraining { source, .. } => Some(source),
            Self::Runtime(e) => Some(e),
            _ => None,
        }
    }
}

impl From<EngineError> for OrchestratorError {
    fn from(e: EngineError) -> Self {
        Self::Runtime(e)
    }
}
