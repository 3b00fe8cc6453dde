//! Row-partitioned training data.

use std::{num::NonZeroUsize, ops::Range, sync::Arc};

use engine::TrainingRows;

use crate::error::{OrchestratorError, Result};

/// One dense, row-major block of rows with their labels.
#[derive(Debug, Clone, PartialEq)]
pub struct Partition {
    features: Vec<f64>,
    labels: Vec<f64>,
    num_features: usize,
}

impl Partition {
    /// Creates a new `Partition`.
    ///
    /// # Arguments
    /// * `features` - Row-major features, `num_features` per row.
    /// * `labels` - One label per row.
    /// * `num_features` - The width of every row.
    ///
    /// # Returns
    /// The partition or `OrchestratorError::Configuration` if the sizes don't line up.
    pub fn new(features: Vec<f64>, labels: Vec<f64>, num_features: usize) -> Result<Self> {
        if num_features == 0 {
            return Err(OrchestratorError::Configuration(
                "rows must have at least one feature".into(),
            ));
        }
        if features.len() != labels.len() * num_features {
            return Err(OrchestratorError::Configuration(format!(
                "{} feature values don't split into {} rows of {num_features}",
                features.len(),
                labels.len()
            )));
        }

        Ok(Self {
            features,
            labels,
            num_features,
        })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    #[inline]
    pub fn num_features(&self) -> usize {
        self.num_features
    }

    #[inline]
    pub fn labels(&self) -> &[f64] {
        &self.labels
    }

    /// Iterates over the feature vector of every row.
    pub fn rows(&self) -> impl Iterator<Item = &[f64]> {
        self.features.chunks_exact(self.num_features)
    }

    /// Borrows the partition the way the engine trains on it.
    pub fn training_rows(&self) -> engine::Result<TrainingRows<'_>> {
        TrainingRows::new(&self.features, &self.labels, self.num_features)
    }

    fn concat(parts: &[Arc<Partition>], num_features: usize) -> Self {
        let rows = parts.iter().map(|p| p.len()).sum();
        let mut features = Vec::with_capacity(rows * num_features);
        let mut labels = Vec::with_capacity(rows);

        for part in parts {
            features.extend_from_slice(&part.features);
            labels.extend_from_slice(&part.labels);
        }

        Self {
            features,
            labels,
            num_features,
        }
    }
}

/// An immutable, row-partitioned dataset.
///
/// Partitions are shared, cloning a dataset or keeping its partition count
/// never copies rows.
#[derive(Debug, Clone)]
pub struct Dataset {
    partitions: Vec<Arc<Partition>>,
    num_features: usize,
}

impl Dataset {
    /// Creates a dataset out of already built partitions.
    ///
    /// # Returns
    /// The dataset, or `OrchestratorError::Configuration` if there are no
    /// partitions or they disagree on the feature count.
    pub fn new(partitions: Vec<Partition>) -> Result<Self> {
        let Some(num_features) = partitions.first().map(Partition::num_features) else {
            return Err(OrchestratorError::Configuration(
                "a dataset needs at least one partition".into(),
            ));
        };

        if let Some(idx) = partitions
            .iter()
            .position(|p| p.num_features() != num_features)
        {
            return Err(OrchestratorError::Configuration(format!(
                "partition {idx} has {} features, expected {num_features}",
                partitions[idx].num_features()
            )));
        }

        Ok(Self {
            partitions: partitions.into_iter().map(Arc::new).collect(),
            num_features,
        })
    }

    /// Splits `rows` into `num_partitions` contiguous, balanced partitions.
    ///
    /// # Arguments
    /// * `rows` - `(features, label)` pairs, all with the same feature count.
    /// * `num_partitions` - The amount of partitions to create.
    pub fn from_rows(rows: Vec<(Vec<f64>, f64)>, num_partitions: NonZeroUsize) -> Result<Self> {
        let Some(num_features) = rows.first().map(|(x, _)| x.len()) else {
            return Err(OrchestratorError::Configuration(
                "a dataset needs at least one row".into(),
            ));
        };

        if let Some(idx) = rows.iter().position(|(x, _)| x.len() != num_features) {
            return Err(OrchestratorError::Configuration(format!(
                "row {idx} has {} features, expected {num_features}",
                rows[idx].0.len()
            )));
        }

        let total = rows.len();
        let n = num_partitions.get();
        let mut rows = rows.into_iter();

        let partitions = (0..n)
            .map(|i| {
                let len = shard_range(total, i, n).len();
                let mut features = Vec::with_capacity(len * num_features);
                let mut labels = Vec::with_capacity(len);

                for (x, y) in rows.by_ref().take(len) {
                    features.extend(x);
                    labels.push(y);
                }

                Partition::new(features, labels, num_features)
            })
            .collect::<Result<Vec<_>>>()?;

        Self::new(partitions)
    }

    #[inline]
    pub fn num_partitions(&self) -> usize {
        self.partitions.len()
    }

    #[inline]
    pub fn num_features(&self) -> usize {
        self.num_features
    }

    pub fn num_rows(&self) -> usize {
        self.partitions.iter().map(|p| p.len()).sum()
    }

    #[inline]
    pub fn partitions(&self) -> &[Arc<Partition>] {
        &self.partitions
    }

    /// Merges contiguous groups of partitions so at most `n` remain.
    ///
    /// Partitions are never split: asking for more partitions than there are
    /// returns the same partitions.
    pub fn coalesce(&self, n: NonZeroUsize) -> Self {
        let total = self.num_partitions();
        let n = n.get();

        if n >= total {
            return self.clone();
        }

        let partitions = (0..n)
            .map(|i| {
                let group = &self.partitions[shard_range(total, i, n)];
                Arc::new(Partition::concat(group, self.num_features))
            })
            .collect();

        Self {
            partitions,
            num_features: self.num_features,
        }
    }
}

/// Splits `total` items among `groups` and returns the range of group `idx`.
///
/// Ranges are contiguous, disjoint, cover `0..total` and their sizes differ
/// by at most one.
fn shard_range(total: usize, idx: usize, groups: usize) -> Range<usize> {
    let base = total / groups;
    let rem = total % groups;

    let start = idx * base + idx.min(rem);
    let end = start + base + usize::from(idx < rem);

    start..end
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nz(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).unwrap()
    }

    fn rows(n: usize) -> Vec<(Vec<f64>, f64)> {
        (0..n).map(|i| (vec![i as f64, -(i as f64)], (i % 2) as f64)).collect()
    }

    #[test]
    fn shard_range_balanced() {
        assert_eq!(shard_range(10, 0, 3), 0..4);
        assert_eq!(shard_range(10, 1, 3), 4..7);
        assert_eq!(shard_range(10, 2, 3), 7..10);
        assert_eq!(shard_range(2, 2, 4), 2..2);
    }

    #[test]
    fn from_rows_keeps_row_order() {
        let dataset = Dataset::from_rows(rows(7), nz(3)).unwrap();

        let sizes: Vec<_> = dataset.partitions().iter().map(|p| p.len()).collect();
        assert_eq!(sizes, [3, 2, 2]);
        assert_eq!(dataset.num_rows(), 7);

        let second: Vec<_> = dataset.partitions()[1].rows().map(|r| r[0]).collect();
        assert_eq!(second, [3.0, 4.0]);
    }

    #[test]
    fn rejects_ragged_rows() {
        let mut ragged = rows(3);
        ragged[1].0.push(1.0);

        assert!(matches!(
            Dataset::from_rows(ragged, nz(1)),
            Err(OrchestratorError::Configuration(_))
        ));
        assert!(Dataset::from_rows(Vec::new(), nz(1)).is_err());
    }

    #[test]
    fn coalesce_merges_contiguous_partitions() {
        let dataset = Dataset::from_rows(rows(8), nz(4)).unwrap();
        let merged = dataset.coalesce(nz(3));

        assert_eq!(merged.num_partitions(), 3);
        assert_eq!(merged.num_rows(), 8);

        let first: Vec<_> = merged.partitions()[0].rows().map(|r| r[0]).collect();
        assert_eq!(first, [0.0, 1.0, 2.0, 3.0]);
    }

    #[test]
    fn coalesce_never_grows() {
        let dataset = Dataset::from_rows(rows(4), nz(2)).unwrap();
        let same = dataset.coalesce(nz(5));

        assert_eq!(same.num_partitions(), 2);
        assert!(Arc::ptr_eq(&same.partitions()[0], &dataset.partitions()[0]));
    }
}
