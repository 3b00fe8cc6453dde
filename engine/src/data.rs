use crate::{
    EngineError, MAX_BIN, Result,
    net::{Mesh, ReduceOp},
};

/// A borrowed, dense, row-major block of training rows.
#[derive(Debug, Clone, Copy)]
pub struct TrainingRows<'a> {
    features: &'a [f64],
    labels: &'a [f64],
    num_features: usize,
}

impl<'a> TrainingRows<'a> {
    /// Creates a new view over `labels.len()` rows.
    ///
    /// # Arguments
    /// * `features` - Row-major features, `num_features` per row.
    /// * `labels` - One label per row.
    /// * `num_features` - The width of every row.
    ///
    /// # Returns
    /// The view or `EngineError::InvalidData` if the sizes don't line up.
    pub fn new(features: &'a [f64], labels: &'a [f64], num_features: usize) -> Result<Self> {
        if num_features == 0 {
            return Err(EngineError::InvalidData(
                "rows must have at least one feature".into(),
            ));
        }
        if features.len() != labels.len() * num_features {
            return Err(EngineError::InvalidData(format!(
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
    pub fn labels(&self) -> &'a [f64] {
        self.labels
    }

    #[inline]
    pub fn row(&self, idx: usize) -> &'a [f64] {
        &self.features[idx * self.num_features..(idx + 1) * self.num_features]
    }
}

/// Maps raw feature values into bins, identical on every worker.
#[derive(Debug, Clone, PartialEq)]
pub struct BinMapper {
    /// Per feature, sorted upper bounds: bin `b` holds values `<= thresholds[b]`.
    thresholds: Vec<Vec<f64>>,
}

impl BinMapper {
    /// Builds equal-width bins between every feature's global minimum and maximum.
    ///
    /// # Arguments
    /// * `mins` - The global minimum of every feature.
    /// * `maxs` - The global maximum of every feature.
    /// * `max_bin` - The amount of bins of a non-constant feature.
    pub fn from_bounds(mins: &[f64], maxs: &[f64], max_bin: usize) -> Self {
        let thresholds = mins
            .iter()
            .zip(maxs)
            .map(|(&min, &max)| {
                if max <= min || max_bin < 2 {
                    return Vec::new();
                }

                let width = (max - min) / max_bin as f64;
                (1..max_bin).map(|k| min + k as f64 * width).collect()
            })
            .collect();

        Self { thresholds }
    }

    /// Computes the bins for `rows` out of the bounds of every worker's rows.
    pub async fn fit(mesh: &mut Mesh, rows: &TrainingRows<'_>, max_bin: usize) -> Result<Self> {
        if max_bin > MAX_BIN {
            return Err(EngineError::InvalidData(format!(
                "at most {MAX_BIN} bins per feature are supported, got {max_bin}"
            )));
        }

        let nf = rows.num_features();
        let mut mins = vec![f64::INFINITY; nf];
        let mut maxs = vec![f64::NEG_INFINITY; nf];

        for idx in 0..rows.len() {
            for (f, &x) in rows.row(idx).iter().enumerate() {
                if !x.is_finite() {
                    return Err(EngineError::InvalidData(format!(
                        "row {idx} has a non finite value for feature {f}"
                    )));
                }
                mins[f] = mins[f].min(x);
                maxs[f] = maxs[f].max(x);
            }
        }

        mesh.allreduce(&mut mins, ReduceOp::Min).await?;
        mesh.allreduce(&mut maxs, ReduceOp::Max).await?;
        Ok(Self::from_bounds(&mins, &maxs, max_bin))
    }

    #[inline]
    pub fn num_features(&self) -> usize {
        self.thresholds.len()
    }

    #[inline]
    pub fn num_bins(&self, feature: usize) -> usize {
        self.thresholds[feature].len() + 1
    }

    /// The raw value splitting bins `..=bin` from the rest.
    #[inline]
    pub fn threshold(&self, feature: usize, bin: usize) -> f64 {
        self.thresholds[feature][bin]
    }

    /// The bin of `x`, the amount of thresholds strictly below it.
    #[inline]
    pub fn bin(&self, feature: usize, x: f64) -> usize {
        self.thresholds[feature].partition_point(|t| *t < x)
    }
}

/// The engine's in-memory training representation, column-major bins.
#[derive(Debug)]
pub struct BinnedData {
    mapper: BinMapper,
    bins: Vec<Vec<u16>>,
    labels: Vec<f64>,
}

impl BinnedData {
    /// Bins every row, labels must be either `0` or `1`.
    pub fn new(mapper: BinMapper, rows: &TrainingRows<'_>) -> Result<Self> {
        if let Some(idx) = rows.labels().iter().position(|y| *y != 0.0 && *y != 1.0) {
            return Err(EngineError::InvalidData(format!(
                "row {idx} has label {}, binary labels must be 0 or 1",
                rows.labels()[idx]
            )));
        }
        if (0..mapper.num_features()).any(|f| mapper.num_bins(f) > MAX_BIN) {
            return Err(EngineError::InvalidData(format!(
                "at most {MAX_BIN} bins per feature are supported"
            )));
        }

        let bins = (0..mapper.num_features())
            .map(|f| {
                (0..rows.len())
                    .map(|idx| mapper.bin(f, rows.row(idx)[f]) as u16)
                    .collect()
            })
            .collect();

        Ok(Self {
            mapper,
            bins,
            labels: rows.labels().to_vec(),
        })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    #[inline]
    pub fn mapper(&self) -> &BinMapper {
        &self.mapper
    }

    #[inline]
    pub fn labels(&self) -> &[f64] {
        &self.labels
    }

    #[inline]
    pub fn bin(&self, feature: usize, row: usize) -> usize {
        self.bins[feature][row] as usize
    }
}
