//! Gradient histograms and split finding.
//!
//! A histogram is a flat `f64` buffer so it can be reduced across the mesh as
//! is: for every bin of every feature a `(gradient, hessian, count)` triple,
//! followed by the triple of totals.

use std::ops::Range;

use crate::{TrainParams, data::BinnedData};

const STRIDE: usize = 3;

/// Gradient statistics of a set of rows.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Sums {
    pub grad: f64,
    pub hess: f64,
    pub count: f64,
}

impl Sums {
    fn from_slot(slot: &[f64]) -> Self {
        Self {
            grad: slot[0],
            hess: slot[1],
            count: slot[2],
        }
    }

    fn minus(self, other: Self) -> Self {
        Self {
            grad: self.grad - other.grad,
            hess: self.hess - other.hess,
            count: self.count - other.count,
        }
    }

    /// The regularized contribution of this node to the objective.
    fn score(self, lambda_l2: f64) -> f64 {
        let denom = self.hess + lambda_l2;
        if denom <= 0.0 {
            0.0
        } else {
            self.grad * self.grad / denom
        }
    }

    /// The optimal leaf value for these statistics, before shrinkage.
    pub fn leaf_value(self, lambda_l2: f64) -> f64 {
        let denom = self.hess + lambda_l2;
        if denom <= 0.0 { 0.0 } else { -self.grad / denom }
    }
}

/// A candidate split of one leaf.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SplitInfo {
    pub feature: usize,
    /// Rows with a bin `<= bin` go left.
    pub bin: usize,
    pub gain: f64,
    pub left: Sums,
    pub right: Sums,
}

/// Where every feature lives inside a histogram buffer.
#[derive(Debug, Clone)]
pub struct HistLayout {
    offsets: Vec<usize>,
    total_bins: usize,
}

impl HistLayout {
    pub fn new(bins_per_feature: impl IntoIterator<Item = usize>) -> Self {
        let mut offsets = Vec::new();
        let mut total_bins = 0;

        for bins in bins_per_feature {
            offsets.push(total_bins);
            total_bins += bins;
        }

        Self {
            offsets,
            total_bins,
        }
    }

    /// The length of a histogram buffer, totals included.
    pub fn len(&self) -> usize {
        (self.total_bins + 1) * STRIDE
    }

    pub fn num_features(&self) -> usize {
        self.offsets.len()
    }

    /// The span of `feature`'s bins inside a histogram buffer.
    pub fn feature_range(&self, feature: usize) -> Range<usize> {
        let start = self.offsets[feature];
        let end = self
            .offsets
            .get(feature + 1)
            .copied()
            .unwrap_or(self.total_bins);
        start * STRIDE..end * STRIDE
    }

    pub fn totals_range(&self) -> Range<usize> {
        self.total_bins * STRIDE..self.len()
    }

    pub fn totals(&self, hist: &[f64]) -> Sums {
        Sums::from_slot(&hist[self.totals_range()])
    }

    /// Accumulates the statistics of `rows` into a new histogram.
    pub fn build(&self, data: &BinnedData, rows: &[u32], grad: &[f64], hess: &[f64]) -> Vec<f64> {
        let mut hist = vec![0.0; self.len()];

        for f in 0..self.num_features() {
            let base = self.offsets[f];
            for &row in rows {
                let row = row as usize;
                let slot = (base + data.bin(f, row)) * STRIDE;
                hist[slot] += grad[row];
                hist[slot + 1] += hess[row];
                hist[slot + 2] += 1.0;
            }
        }

        let totals = self.totals_range().start;
        for &row in rows {
            let row = row as usize;
            hist[totals] += grad[row];
            hist[totals + 1] += hess[row];
            hist[totals + 2] += 1.0;
        }

        hist
    }

    /// Finds the best split of `feature` out of an aggregated histogram.
    pub fn best_split_for(
        &self,
        hist: &[f64],
        feature: usize,
        params: &SplitParams,
    ) -> Option<SplitInfo> {
        let total = self.totals(hist);
        let parent_score = total.score(params.lambda_l2);
        let bins = &hist[self.feature_range(feature)];

        let mut left = Sums::default();
        let mut best: Option<SplitInfo> = None;

        // The last bin can't be a left side, nothing would go right.
        let candidates = (bins.len() / STRIDE).saturating_sub(1);
        for (bin, slot) in bins.chunks_exact(STRIDE).enumerate().take(candidates) {
            let add = Sums::from_slot(slot);
            left.grad += add.grad;
            left.hess += add.hess;
            left.count += add.count;
            let right = total.minus(left);

            if left.count < params.min_data_in_leaf || right.count < params.min_data_in_leaf {
                continue;
            }
            if left.hess < params.min_sum_hessian || right.hess < params.min_sum_hessian {
                continue;
            }

            let gain = left.score(params.lambda_l2) + right.score(params.lambda_l2) - parent_score;
            if gain > params.min_gain_to_split && best.is_none_or(|b| gain > b.gain) {
                best = Some(SplitInfo {
                    feature,
                    bin,
                    gain,
                    left,
                    right,
                });
            }
        }

        best
    }

    /// Finds the best split over every feature allowed by `available`.
    ///
    /// Ties are broken towards the lowest feature, then the lowest bin.
    pub fn best_split(
        &self,
        hist: &[f64],
        available: Option<&[bool]>,
        params: &SplitParams,
    ) -> Option<SplitInfo> {
        (0..self.num_features())
            .filter(|&f| available.is_none_or(|mask| mask[f]))
            .filter_map(|f| self.best_split_for(hist, f, params))
            .fold(None, |best: Option<SplitInfo>, split| match best {
                Some(b) if b.gain >= split.gain => Some(b),
                _ => Some(split),
            })
    }

    /// Copies the totals and the bins of `features` into a compact buffer.
    pub fn pack(&self, hist: &[f64], features: &[usize]) -> Vec<f64> {
        let mut packed = hist[self.totals_range()].to_vec();
        for &f in features {
            packed.extend_from_slice(&hist[self.feature_range(f)]);
        }
        packed
    }

    /// Inverse of `pack`, features that weren't packed are left zeroed.
    pub fn unpack(&self, packed: &[f64], features: &[usize]) -> Vec<f64> {
        let mut hist = vec![0.0; self.len()];
        let totals = self.totals_range();
        let mut cursor = totals.len();
        hist[totals.clone()].copy_from_slice(&packed[..cursor]);

        for &f in features {
            let range = self.feature_range(f);
            let len = range.len();
            hist[range].copy_from_slice(&packed[cursor..cursor + len]);
            cursor += len;
        }

        hist
    }
}

/// The constraints a split must satisfy.
#[derive(Debug, Clone, Copy)]
pub struct SplitParams {
    pub min_data_in_leaf: f64,
    pub min_sum_hessian: f64,
    pub lambda_l2: f64,
    pub min_gain_to_split: f64,
}

impl SplitParams {
    /// Constraints for histograms aggregated over the whole mesh.
    pub fn global(params: &TrainParams) -> Self {
        Self {
            min_data_in_leaf: params.min_data_in_leaf.max(1) as f64,
            min_sum_hessian: params.min_sum_hessian,
            lambda_l2: params.lambda_l2,
            min_gain_to_split: params.min_gain_to_split,
        }
    }

    /// Constraints for a single worker's share out of `world` workers.
    pub fn local(params: &TrainParams, world: usize) -> Self {
        let world = world.max(1) as f64;
        Self {
            min_data_in_leaf: (params.min_data_in_leaf as f64 / world).max(1.0),
            min_sum_hessian: params.min_sum_hessian / world,
            ..Self::global(params)
        }
    }
}

/// `parent - child`, element-wise.
pub fn subtract(parent: &[f64], child: &[f64]) -> Vec<f64> {
    parent.iter().zip(child).map(|(p, c)| p - c).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> SplitParams {
        SplitParams {
            min_data_in_leaf: 1.0,
            min_sum_hessian: 0.0,
            lambda_l2: 0.0,
            min_gain_to_split: 0.0,
        }
    }

    /// A single feature with `slots` as its bins, totals computed from them.
    fn single_feature(slots: &[[f64; 3]]) -> (HistLayout, Vec<f64>) {
        let layout = HistLayout::new([slots.len()]);
        let mut hist: Vec<f64> = slots.iter().flatten().copied().collect();
        let totals = slots.iter().fold([0.0; 3], |acc, s| {
            [acc[0] + s[0], acc[1] + s[1], acc[2] + s[2]]
        });
        hist.extend_from_slice(&totals);
        (layout, hist)
    }

    #[test]
    fn finds_the_separating_bin() {
        let (layout, hist) = single_feature(&[
            [-4.0, 2.0, 2.0],
            [-2.0, 1.0, 1.0],
            [3.0, 1.0, 1.0],
            [3.0, 1.0, 1.0],
        ]);

        let split = layout.best_split(&hist, None, &params()).unwrap();
        assert_eq!(split.feature, 0);
        assert_eq!(split.bin, 1);
        assert_eq!(split.left.count, 3.0);
        assert_eq!(split.right.count, 2.0);
        assert!(split.gain > 0.0);
    }

    #[test]
    fn respects_min_data_in_leaf() {
        let (layout, hist) = single_feature(&[[-4.0, 1.0, 1.0], [1.0, 1.0, 1.0], [1.0, 1.0, 1.0]]);

        let split = layout.best_split(&hist, None, &params()).unwrap();
        assert_eq!(split.bin, 0);

        let strict = SplitParams {
            min_data_in_leaf: 2.0,
            ..params()
        };
        assert!(layout.best_split(&hist, None, &strict).is_none());
    }

    #[test]
    fn single_bin_feature_never_splits() {
        let (layout, hist) = single_feature(&[[5.0, 1.0, 4.0]]);
        assert!(layout.best_split(&hist, None, &params()).is_none());
    }

    #[test]
    fn pack_unpack_keeps_selected_features() {
        let layout = HistLayout::new([2, 3]);
        let hist: Vec<f64> = (0..layout.len()).map(|i| i as f64).collect();

        let packed = layout.pack(&hist, &[1]);
        assert_eq!(packed.len(), 3 + 9);

        let unpacked = layout.unpack(&packed, &[1]);
        assert_eq!(&unpacked[layout.feature_range(1)], &hist[layout.feature_range(1)]);
        assert_eq!(&unpacked[layout.totals_range()], &hist[layout.totals_range()]);
        assert!(unpacked[layout.feature_range(0)].iter().all(|x| *x == 0.0));
    }

    #[test]
    fn leaf_value_is_newton_step() {
        let sums = Sums {
            grad: 4.0,
            hess: 2.0,
            count: 2.0,
        };
        assert_eq!(sums.leaf_value(0.0), -2.0);
        assert_eq!(sums.leaf_value(2.0), -1.0);
    }
}
