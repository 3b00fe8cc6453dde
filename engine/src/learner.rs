//! Cooperative leaf-wise boosting over a joined mesh.
//!
//! Every decision is taken out of mesh-wide reductions, which every worker
//! computes identically, so all the workers of a round grow the same trees.

use log::{debug, info};

use crate::{
    EngineError, ParallelismMode, Result, TrainParams,
    booster::GbdtBooster,
    data::{BinMapper, BinnedData, TrainingRows},
    histogram::{self, HistLayout, SplitInfo, SplitParams, Sums},
    net::{Mesh, ReduceOp},
    tree::{Node, Tree},
};

/// `P(y = 1) = sigmoid(SIGMOID_SCALE * margin)`.
pub const SIGMOID_SCALE: f64 = 2.0;

const PROB_EPS: f64 = 1e-15;
const MIN_HESSIAN: f64 = 1e-16;

/// Trains a booster on `rows` together with every other worker of `mesh`.
///
/// # Arguments
/// * `mesh` - The joined mesh of this round.
/// * `rows` - This worker's local rows.
/// * `params` - The hyperparameters, identical for every worker.
///
/// # Returns
/// The booster, equal on every worker, or the first error found.
pub async fn fit(
    mesh: &mut Mesh,
    rows: TrainingRows<'_>,
    params: &TrainParams,
) -> Result<GbdtBooster> {
    let mapper = BinMapper::fit(mesh, &rows, params.max_bin.get()).await?;
    let data = BinnedData::new(mapper, &rows)?;
    let mapper = data.mapper();
    let layout = HistLayout::new((0..mapper.num_features()).map(|f| mapper.num_bins(f)));

    let init_score = initial_score(mesh, &data).await?;
    let mut scores = vec![init_score; data.len()];
    let mut grad = vec![0.0; data.len()];
    let mut hess = vec![0.0; data.len()];
    let mut trees = Vec::new();

    for iteration in 0..params.num_iterations.get() {
        for (i, (&score, &label)) in scores.iter().zip(data.labels()).enumerate() {
            let p = sigmoid(SIGMOID_SCALE * score);
            grad[i] = SIGMOID_SCALE * (p - label);
            hess[i] = (SIGMOID_SCALE * SIGMOID_SCALE * p * (1.0 - p)).max(MIN_HESSIAN);
        }

        let grower = TreeGrower {
            params,
            layout: &layout,
            data: &data,
            grad: &grad,
            hess: &hess,
            world: mesh.world(),
        };
        let (tree, leaf_of_row) = grower.grow(mesh).await?;

        for (score, &node) in scores.iter_mut().zip(&leaf_of_row) {
            if let Node::Leaf { value } = tree.nodes()[node] {
                *score += value;
            }
        }

        debug!(rank = mesh.rank(), iteration = iteration, leaves = tree.num_leaves(); "tree grown");
        trees.push(tree);
    }

    info!(rank = mesh.rank(), trees = trees.len(); "training finished");
    Ok(GbdtBooster::new(init_score, trees))
}

/// The margin matching the global positive rate.
async fn initial_score(mesh: &mut Mesh, data: &BinnedData) -> Result<f64> {
    let mut stats = [data.labels().iter().sum::<f64>(), data.len() as f64];
    mesh.allreduce(&mut stats, ReduceOp::Sum).await?;

    let [positives, total] = stats;
    if total == 0.0 {
        return Err(EngineError::InvalidData(
            "no worker of the mesh holds any row".into(),
        ));
    }

    let p = (positives / total).clamp(PROB_EPS, 1.0 - PROB_EPS);
    Ok((p / (1.0 - p)).ln() / SIGMOID_SCALE)
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// A histogram reduced over the mesh, restricted to `available` features if any.
struct Aggregated {
    hist: Vec<f64>,
    available: Option<Vec<bool>>,
}

struct LeafState {
    node: usize,
    rows: Vec<u32>,
    sums: Sums,
    hist: Aggregated,
    best: Option<SplitInfo>,
}

struct TreeGrower<'a> {
    params: &'a TrainParams,
    layout: &'a HistLayout,
    data: &'a BinnedData,
    grad: &'a [f64],
    hess: &'a [f64],
    world: usize,
}

impl TreeGrower<'_> {
    /// Grows one tree, returning it with the leaf node of every local row.
    async fn grow(&self, mesh: &mut Mesh) -> Result<(Tree, Vec<usize>)> {
        let split_params = SplitParams::global(self.params);
        let mut tree = Tree::new();

        let rows: Vec<u32> = (0..self.data.len() as u32).collect();
        let hist = self.aggregate(mesh, &rows).await?;
        let mut leaves = vec![self.leaf(0, rows, hist, &split_params)];

        while leaves.len() < self.params.num_leaves.get() {
            let Some(idx) = best_leaf(&leaves) else {
                break;
            };

            let parent = leaves.remove(idx);
            let Some(split) = parent.best else {
                break;
            };

            let threshold = self.data.mapper().threshold(split.feature, split.bin);
            let (left_node, right_node) = tree.split(parent.node, split.feature, threshold);

            let (left_rows, right_rows): (Vec<u32>, Vec<u32>) = parent
                .rows
                .iter()
                .partition(|&&row| self.data.bin(split.feature, row as usize) <= split.bin);

            let (left_hist, right_hist) = self
                .aggregate_children(mesh, &parent.hist, &left_rows, &right_rows, &split)
                .await?;

            leaves.push(self.leaf(left_node, left_rows, left_hist, &split_params));
            leaves.push(self.leaf(right_node, right_rows, right_hist, &split_params));
        }

        let mut leaf_of_row = vec![0; self.data.len()];
        for leaf in &leaves {
            let value = self.params.learning_rate * leaf.sums.leaf_value(self.params.lambda_l2);
            tree.set_leaf_value(leaf.node, value);

            for &row in &leaf.rows {
                leaf_of_row[row as usize] = leaf.node;
            }
        }

        Ok((tree, leaf_of_row))
    }

    fn leaf(
        &self,
        node: usize,
        rows: Vec<u32>,
        hist: Aggregated,
        params: &SplitParams,
    ) -> LeafState {
        let sums = self.layout.totals(&hist.hist);
        let best = self.layout.best_split(&hist.hist, hist.available.as_deref(), params);

        LeafState {
            node,
            rows,
            sums,
            hist,
            best,
        }
    }

    /// Reduces the histogram of `rows` over the whole mesh.
    async fn aggregate(&self, mesh: &mut Mesh, rows: &[u32]) -> Result<Aggregated> {
        let mut hist = self.layout.build(self.data, rows, self.grad, self.hess);

        match self.params.parallelism {
            ParallelismMode::DataParallel => {
                mesh.allreduce(&mut hist, ReduceOp::Sum).await?;
                Ok(Aggregated {
                    hist,
                    available: None,
                })
            }
            ParallelismMode::VotingParallel { top_k } => self.vote(mesh, hist, top_k.get()).await,
        }
    }

    /// Aggregates both children of a split.
    ///
    /// In data parallel mode only the smaller child is reduced, the larger one
    /// is the parent minus the smaller. Voting reduces both, their elected
    /// features may differ from the parent's.
    async fn aggregate_children(
        &self,
        mesh: &mut Mesh,
        parent: &Aggregated,
        left_rows: &[u32],
        right_rows: &[u32],
        split: &SplitInfo,
    ) -> Result<(Aggregated, Aggregated)> {
        if let ParallelismMode::VotingParallel { .. } = self.params.parallelism {
            let left = self.aggregate(mesh, left_rows).await?;
            let right = self.aggregate(mesh, right_rows).await?;
            return Ok((left, right));
        }

        // Global counts, so every worker picks the same side.
        let left_is_smaller = split.left.count <= split.right.count;
        let small_rows = if left_is_smaller { left_rows } else { right_rows };

        let small = self.aggregate(mesh, small_rows).await?;
        let large = Aggregated {
            hist: histogram::subtract(&parent.hist, &small.hist),
            available: None,
        };

        Ok(if left_is_smaller {
            (small, large)
        } else {
            (large, small)
        })
    }

    /// Elects the features worth reducing out of every worker's local favourites.
    async fn vote(&self, mesh: &mut Mesh, local: Vec<f64>, top_k: usize) -> Result<Aggregated> {
        let nf = self.layout.num_features();
        let local_params = SplitParams::local(self.params, self.world);

        let mut candidates: Vec<SplitInfo> = (0..nf)
            .filter_map(|f| self.layout.best_split_for(&local, f, &local_params))
            .collect();
        candidates.sort_by(|a, b| b.gain.total_cmp(&a.gain).then(a.feature.cmp(&b.feature)));

        let mut votes = vec![0.0; nf];
        for split in candidates.iter().take(top_k) {
            votes[split.feature] = 1.0;
        }
        mesh.allreduce(&mut votes, ReduceOp::Sum).await?;

        let mut elected: Vec<usize> = (0..nf).filter(|&f| votes[f] > 0.0).collect();
        elected.sort_by(|&a, &b| votes[b].total_cmp(&votes[a]).then(a.cmp(&b)));
        elected.truncate(2 * top_k);
        elected.sort_unstable();

        let mut packed = self.layout.pack(&local, &elected);
        mesh.allreduce(&mut packed, ReduceOp::Sum).await?;

        let mut available = vec![false; nf];
        for &f in &elected {
            available[f] = true;
        }

        Ok(Aggregated {
            hist: self.layout.unpack(&packed, &elected),
            available: Some(available),
        })
    }
}

/// The leaf with the highest gain split, ties go to the oldest leaf.
fn best_leaf(leaves: &[LeafState]) -> Option<usize> {
    leaves
        .iter()
        .enumerate()
        .filter_map(|(idx, leaf)| leaf.best.map(|split| (idx, split.gain)))
        .fold(None, |best: Option<(usize, f64)>, (idx, gain)| match best {
            Some((_, best_gain)) if best_gain >= gain => best,
            _ => Some((idx, gain)),
        })
        .map(|(idx, _)| idx)
}
