use std::num::NonZeroUsize;

use log::info;

use crate::{
    data::Dataset,
    env::ExecutionEnv,
    error::{OrchestratorError, Result},
};

/// Coalesces `dataset` so there is one partition per executor of `env`.
///
/// When there are fewer partitions than executors the partitioning is kept
/// as is, every partition still gets its own worker.
///
/// # Returns
/// The planned dataset, or `OrchestratorError::Configuration` if `env` has no executors.
pub fn plan<E: ExecutionEnv>(env: &E, dataset: &Dataset) -> Result<Dataset> {
    let Some(executors) = NonZeroUsize::new(env.executors()) else {
        return Err(OrchestratorError::Configuration(
            "the execution environment has no executors".into(),
        ));
    };

    let planned = dataset.coalesce(executors);
    info!(
        executors = executors.get(),
        partitions = dataset.num_partitions(),
        workers = planned.num_partitions();
        "planned training partitions"
    );

    Ok(planned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::LocalCluster;

    fn dataset(partitions: usize) -> Dataset {
        let rows = (0..partitions * 3).map(|i| (vec![i as f64], 1.0)).collect();
        Dataset::from_rows(rows, NonZeroUsize::new(partitions).unwrap()).unwrap()
    }

    #[test]
    fn one_partition_per_executor() {
        let planned = plan(&LocalCluster::localhost(2), &dataset(4)).unwrap();
        assert_eq!(planned.num_partitions(), 2);
        assert_eq!(planned.num_rows(), 12);
    }

    #[test]
    fn fewer_partitions_than_executors_are_kept() {
        let planned = plan(&LocalCluster::localhost(5), &dataset(3)).unwrap();
        assert_eq!(planned.num_partitions(), 3);
    }

    #[test]
    fn zero_executors_is_a_configuration_error() {
        let err = plan(&LocalCluster::localhost(0), &dataset(2)).unwrap_err();
        assert!(matches!(err, OrchestratorError::Configuration(_)));
    }
}
