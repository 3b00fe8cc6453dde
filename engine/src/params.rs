use std::num::NonZeroUsize;

use serde::{Deserialize, Serialize};

const DEFAULT_ITERATIONS: NonZeroUsize = NonZeroUsize::new(100).unwrap();
const DEFAULT_LEAVES: NonZeroUsize = NonZeroUsize::new(31).unwrap();
const DEFAULT_MAX_BIN: NonZeroUsize = NonZeroUsize::new(255).unwrap();

/// The most bins a feature can be split into, bins are stored as `u16`.
pub const MAX_BIN: usize = u16::MAX as usize;

/// How workers share split-finding work during a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParallelismMode {
    /// Every worker contributes full histograms for every feature.
    DataParallel,
    /// Workers vote their `top_k` local features, only the most voted are aggregated.
    VotingParallel { top_k: NonZeroUsize },
}

/// Immutable hyperparameters shared by every worker of a round.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainParams {
    pub parallelism: ParallelismMode,
    pub num_iterations: NonZeroUsize,
    pub learning_rate: f64,
    pub num_leaves: NonZeroUsize,
    pub max_bin: NonZeroUsize,
    pub min_data_in_leaf: usize,
    pub min_sum_hessian: f64,
    pub lambda_l2: f64,
    pub min_gain_to_split: f64,
}

impl Default for TrainParams {
    fn default() -> Self {
        Self {
            parallelism: ParallelismMode::DataParallel,
            num_iterations: DEFAULT_ITERATIONS,
            learning_rate: 0.1,
            num_leaves: DEFAULT_LEAVES,
            max_bin: DEFAULT_MAX_BIN,
            min_data_in_leaf: 20,
            min_sum_hessian: 1e-3,
            lambda_l2: 0.0,
            min_gain_to_split: 0.0,
        }
    }
}
