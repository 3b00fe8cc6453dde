//! Where partition tasks run.

use std::{panic, thread};

use crate::data::{Dataset, Partition};

const LOOPBACK: &str = "127.0.0.1";

/// What a partition task knows about where it runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskContext<'a> {
    /// The index of the partition handed to the task.
    pub partition: usize,
    /// The host of the executor running the task.
    pub host: &'a str,
}

/// A set of executors able to run one task per partition in parallel.
pub trait ExecutionEnv: Sync {
    /// The amount of executors available for training.
    fn executors(&self) -> usize;

    /// Runs `task` once for every partition of `dataset`, concurrently, and
    /// collects the outputs in partition order.
    ///
    /// Tasks of one call must all be running at the same time, training
    /// rounds block until every partition has joined.
    fn map_partitions<T, F>(&self, dataset: &Dataset, task: F) -> Vec<T>
    where
        T: Send,
        F: Fn(TaskContext<'_>, &Partition) -> T + Sync;
}

/// An in-process cluster running one OS thread per partition.
///
/// Partition `i` is assigned to the executor `i % hosts.len()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalCluster {
    hosts: Vec<String>,
}

impl LocalCluster {
    /// Creates a new `LocalCluster` with one executor per host.
    pub fn new(hosts: Vec<String>) -> Self {
        Self { hosts }
    }

    /// A cluster of `executors` executors, all on the loopback interface.
    pub fn localhost(executors: usize) -> Self {
        Self::new(vec![LOOPBACK.to_string(); executors])
    }

    pub fn hosts(&self) -> &[String] {
        &self.hosts
    }

    fn host_of(&self, partition: usize) -> &str {
        match self.hosts.len() {
            0 => LOOPBACK,
            n => &self.hosts[partition % n],
        }
    }
}

impl ExecutionEnv for LocalCluster {
    fn executors(&self) -> usize {
        self.hosts.len()
    }

    fn map_partitions<T, F>(&self, dataset: &Dataset, task: F) -> Vec<T>
    where
        T: Send,
        F: Fn(TaskContext<'_>, &Partition) -> T + Sync,
    {
        let task = &task;

        thread::scope(|s| {
            let handles: Vec<_> = dataset
                .partitions()
                .iter()
                .enumerate()
                .map(|(partition, data)| {
                    let ctx = TaskContext {
                        partition,
                        host: self.host_of(partition),
                    };
                    s.spawn(move || task(ctx, data.as_ref()))
                })
                .collect();

            handles
                .into_iter()
                .map(|handle| handle.join().unwrap_or_else(|e| panic::resume_unwind(e)))
                .collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use std::{
        num::NonZeroUsize,
        sync::{Barrier, Mutex},
    };

    use super::*;

    fn dataset(partitions: usize) -> Dataset {
        let rows = (0..partitions).map(|i| (vec![i as f64], 0.0)).collect();
        Dataset::from_rows(rows, NonZeroUsize::new(partitions).unwrap()).unwrap()
    }

    #[test]
    fn assigns_hosts_round_robin() {
        let env = LocalCluster::new(vec!["a".into(), "b".into()]);
        let hosts = env.map_partitions(&dataset(3), |ctx, _| ctx.host.to_string());

        assert_eq!(hosts, ["a", "b", "a"]);
        assert_eq!(env.executors(), 2);
    }

    #[test]
    fn tasks_run_concurrently_and_keep_partition_order() {
        let env = LocalCluster::localhost(4);
        let barrier = Barrier::new(4);
        let seen = Mutex::new(Vec::new());

        let out = env.map_partitions(&dataset(4), |ctx, partition| {
            // All four tasks must be alive at once to get through.
            barrier.wait();
            seen.lock().unwrap().push(ctx.partition);
            partition.rows().next().map(|row| row[0])
        });

        assert_eq!(out, [Some(0.0), Some(1.0), Some(2.0), Some(3.0)]);
        assert_eq!(seen.into_inner().unwrap().len(), 4);
    }
}
