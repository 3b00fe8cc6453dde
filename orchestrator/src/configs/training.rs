use std::{num::NonZeroUsize, time::Duration};

use engine::{MAX_BIN, ParallelismMode, TrainParams};
use serde::{Deserialize, Serialize};

use crate::error::{OrchestratorError, Result};

/// The most boosting iterations a single round may run.
pub const MAX_ITERATIONS: usize = 1_000_000;

/// How workers split the search for the best splits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParallelismConfig {
    DataParallel,
    VotingParallel { top_k: usize },
}

/// Everything `train` needs besides the data, every field has a default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// The first port tried when claiming worker endpoints, `0` lets the OS pick.
    pub base_port: u16,
    /// How many consecutive ports are tried per host.
    pub port_scan_limit: u16,
    pub join_timeout_secs: u64,
    pub parallelism: ParallelismConfig,
    pub num_iterations: usize,
    pub learning_rate: f64,
    pub num_leaves: usize,
    pub max_bin: usize,
    pub min_data_in_leaf: usize,
    pub min_sum_hessian: f64,
    pub lambda_l2: f64,
    pub min_gain_to_split: f64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            base_port: 12400,
            port_scan_limit: 1000,
            join_timeout_secs: 120,
            parallelism: ParallelismConfig::DataParallel,
            num_iterations: 100,
            learning_rate: 0.1,
            num_leaves: 31,
            max_bin: 255,
            min_data_in_leaf: 20,
            min_sum_hessian: 1e-3,
            lambda_l2: 0.0,
            min_gain_to_split: 0.0,
        }
    }
}

impl TrainingConfig {
    pub fn join_timeout(&self) -> Duration {
        Duration::from_secs(self.join_timeout_secs)
    }

    /// Validates the configuration and converts it into the engine's parameters.
    ///
    /// # Returns
    /// The parameters or `OrchestratorError::Configuration` naming the first invalid field.
    pub fn to_params(&self) -> Result<TrainParams> {
        if self.port_scan_limit == 0 {
            return invalid("port_scan_limit must be at least 1");
        }
        if self.join_timeout_secs == 0 {
            return invalid("join_timeout_secs must be at least 1");
        }
        if !self.learning_rate.is_finite() || self.learning_rate <= 0.0 {
            return invalid(format!(
                "learning_rate must be positive and finite, got {}",
                self.learning_rate
            ));
        }
        let Some(num_leaves) = NonZeroUsize::new(self.num_leaves).filter(|n| n.get() >= 2) else {
            return invalid(format!("num_leaves must be at least 2, got {}", self.num_leaves));
        };
        let Some(max_bin) = NonZeroUsize::new(self.max_bin).filter(|n| n.get() >= 2) else {
            return invalid(format!("max_bin must be at least 2, got {}", self.max_bin));
        };
        if max_bin.get() > MAX_BIN {
            return invalid(format!("max_bin must be at most {MAX_BIN}, got {max_bin}"));
        }

        for (name, value) in [
            ("min_sum_hessian", self.min_sum_hessian),
            ("lambda_l2", self.lambda_l2),
            ("min_gain_to_split", self.min_gain_to_split),
        ] {
            if !value.is_finite() || value < 0.0 {
                return invalid(format!("{name} must be non-negative and finite, got {value}"));
            }
        }

        let Some(num_iterations) = NonZeroUsize::new(self.num_iterations) else {
            return invalid("num_iterations must be at least 1");
        };
        if num_iterations.get() > MAX_ITERATIONS {
            return invalid(format!(
                "num_iterations must be at most {MAX_ITERATIONS}, got {num_iterations}"
            ));
        }

        let parallelism = match self.parallelism {
            ParallelismConfig::DataParallel => ParallelismMode::DataParallel,
            ParallelismConfig::VotingParallel { top_k } => match NonZeroUsize::new(top_k) {
                Some(top_k) => ParallelismMode::VotingParallel { top_k },
                None => return invalid("voting_parallel top_k must be at least 1"),
            },
        };

        Ok(TrainParams {
            parallelism,
            num_iterations,
            learning_rate: self.learning_rate,
            num_leaves,
            max_bin,
            min_data_in_leaf: self.min_data_in_leaf,
            min_sum_hessian: self.min_sum_hessian,
            lambda_l2: self.lambda_l2,
            min_gain_to_split: self.min_gain_to_split,
        })
    }
}

fn invalid<T>(msg: impl Into<String>) -> Result<T> {
    Err(OrchestratorError::Configuration(msg.into()))
}
