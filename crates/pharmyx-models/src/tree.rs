//! CART regression tree.
//!
//! Splits minimise the summed squared error of the two children. Each split
//! considers a random subset of `max_features` columns drawn from the tree's
//! own RNG, so a tree is fully determined by its seed and its training rows.

use std::cmp::Ordering;

use rand::rngs::StdRng;
use rand::seq::index;
use serde::{Deserialize, Serialize};

use pharmyx_common::OmicsTable;

#[derive(Debug, Clone, Copy)]
pub struct TreeParams {
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    /// Number of candidate features per split.
    pub max_features: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum Node {
    Leaf { value: f64 },
    Split { feature: usize, threshold: f64, left: usize, right: usize },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegressionTree {
    nodes: Vec<Node>,
}

struct Builder<'a> {
    x: &'a OmicsTable,
    y: &'a [f64],
    params: TreeParams,
    rng: &'a mut StdRng,
    nodes: Vec<Node>,
    /// Total squared-error reduction per feature.
    importances: Vec<f64>,
}

struct BestSplit {
    feature: usize,
    threshold: f64,
    gain: f64,
}

impl RegressionTree {
    /// Grow a tree on the rows in `indices` (duplicates allowed for bootstrap).
    /// Squared-error reductions are added into `importances`.
    pub fn fit(
        x: &OmicsTable,
        y: &[f64],
        indices: Vec<usize>,
        params: TreeParams,
        rng: &mut StdRng,
        importances: &mut [f64],
    ) -> Self {
        let mut builder = Builder {
            x,
            y,
            params,
            rng,
            nodes: Vec::new(),
            importances: vec![0.0; x.n_cols()],
        };
        builder.grow(indices, 0);
        for (total, gain) in importances.iter_mut().zip(&builder.importances) {
            *total += gain;
        }
        Self { nodes: builder.nodes }
    }

    pub fn predict_row(&self, row: &[f64]) -> f64 {
        let mut idx = 0;
        loop {
            match &self.nodes[idx] {
                Node::Leaf { value } => return *value,
                Node::Split { feature, threshold, left, right } => {
                    idx = if row[*feature] <= *threshold { *left } else { *right };
                }
            }
        }
    }

    pub fn depth(&self) -> usize {
        fn walk(nodes: &[Node], idx: usize) -> usize {
            match &nodes[idx] {
                Node::Leaf { .. } => 0,
                Node::Split { left, right, .. } => 1 + walk(nodes, *left).max(walk(nodes, *right)),
            }
        }
        walk(&self.nodes, 0)
    }
}

impl Builder<'_> {
    /// Returns the index of the node built for `indices`.
    fn grow(&mut self, indices: Vec<usize>, depth: usize) -> usize {
        let n = indices.len();
        let (sum, sum_sq) = indices.iter().fold((0.0, 0.0), |(s, sq), &i| {
            (s + self.y[i], sq + self.y[i] * self.y[i])
        });
        let mean = sum / n as f64;
        let sse = (sum_sq - sum * mean).max(0.0);

        let node_idx = self.nodes.len();
        self.nodes.push(Node::Leaf { value: mean });

        if depth >= self.params.max_depth
            || n < self.params.min_samples_split
            || n < 2 * self.params.min_samples_leaf
            || sse < 1e-12
        {
            return node_idx;
        }

        let Some(best) = self.best_split(&indices, sse) else {
            return node_idx;
        };

        self.importances[best.feature] += best.gain;
        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = indices
            .into_iter()
            .partition(|&i| self.x.get(i, best.feature) <= best.threshold);

        let left = self.grow(left_rows, depth + 1);
        let right = self.grow(right_rows, depth + 1);
        self.nodes[node_idx] = Node::Split {
            feature: best.feature,
            threshold: best.threshold,
            left,
            right,
        };
        node_idx
    }

    fn best_split(&mut self, indices: &[usize], parent_sse: f64) -> Option<BestSplit> {
        let n_features = self.x.n_cols();
        let k = self.params.max_features.clamp(1, n_features);
        let candidates = index::sample(&mut *self.rng, n_features, k).into_vec();
        let min_leaf = self.params.min_samples_leaf.max(1);
        let n = indices.len();

        let mut best: Option<BestSplit> = None;
        let mut pairs: Vec<(f64, f64)> = Vec::with_capacity(n);

        for feature in candidates {
            pairs.clear();
            pairs.extend(indices.iter().map(|&i| (self.x.get(i, feature), self.y[i])));
            pairs.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal));

            let total: f64 = pairs.iter().map(|p| p.1).sum();
            let total_sq: f64 = pairs.iter().map(|p| p.1 * p.1).sum();
            let mut left_sum = 0.0;
            let mut left_sq = 0.0;

            for split in 1..n {
                let (xv, yv) = pairs[split - 1];
                left_sum += yv;
                left_sq += yv * yv;

                if split < min_leaf || n - split < min_leaf {
                    continue;
                }
                let next_x = pairs[split].0;
                if next_x - xv <= 1e-12 {
                    continue;
                }

                let nl = split as f64;
                let nr = (n - split) as f64;
                let right_sum = total - left_sum;
                let right_sq = total_sq - left_sq;
                let child_sse = (left_sq - left_sum * left_sum / nl) + (right_sq - right_sum * right_sum / nr);
                let gain = parent_sse - child_sse;

                if gain > 1e-12 && best.as_ref().map_or(true, |b| gain > b.gain) {
                    best = Some(BestSplit { feature, threshold: (xv + next_x) / 2.0, gain });
                }
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn table(rows: Vec<Vec<f64>>) -> OmicsTable {
        let n = rows.len();
        let w = rows[0].len();
        OmicsTable::from_rows(
            (0..n).map(|i| format!("s{i}")).collect(),
            (0..w).map(|i| format!("f{i}")).collect(),
            rows,
        )
        .unwrap()
    }

    fn params(max_depth: usize) -> TreeParams {
        TreeParams { max_depth, min_samples_split: 2, min_samples_leaf: 1, max_features: 2 }
    }

    #[test]
    fn test_learns_step_function_on_informative_feature() {
        // f1 is noise, f0 determines y
        let x = table(vec![
            vec![0.0, 5.0], vec![1.0, 3.0], vec![2.0, 4.0],
            vec![10.0, 4.0], vec![11.0, 5.0], vec![12.0, 3.0],
        ]);
        let y = [1.0, 1.0, 1.0, 9.0, 9.0, 9.0];
        let mut rng = StdRng::seed_from_u64(7);
        let mut imp = vec![0.0; 2];
        let tree = RegressionTree::fit(&x, &y, (0..6).collect(), params(4), &mut rng, &mut imp);

        assert_eq!(tree.predict_row(&[0.5, 100.0]), 1.0);
        assert_eq!(tree.predict_row(&[11.5, -100.0]), 9.0);
        assert_eq!(tree.depth(), 1);
        assert!(imp[0] > 0.0);
        assert_eq!(imp[1], 0.0);
    }

    #[test]
    fn test_depth_limit() {
        let x = table((0..16).map(|i| vec![i as f64, 0.0]).collect());
        let y: Vec<f64> = (0..16).map(|i| (i * i) as f64).collect();
        let mut rng = StdRng::seed_from_u64(1);
        let mut imp = vec![0.0; 2];
        let tree = RegressionTree::fit(&x, &y, (0..16).collect(), params(2), &mut rng, &mut imp);
        assert!(tree.depth() <= 2);
    }

    #[test]
    fn test_constant_target_is_single_leaf() {
        let x = table(vec![vec![1.0], vec![2.0], vec![3.0]]);
        let mut rng = StdRng::seed_from_u64(3);
        let mut imp = vec![0.0; 1];
        let tree = RegressionTree::fit(&x, &[4.0, 4.0, 4.0], vec![0, 1, 2], params(5), &mut rng, &mut imp);
        assert_eq!(tree.depth(), 0);
        assert_eq!(tree.predict_row(&[100.0]), 4.0);
    }
}
