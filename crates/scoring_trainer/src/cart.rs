//! CART (Classification and Regression Tree) builder
//!
//! Exact-greedy regression trees on second-order gradient statistics.
//! Candidate thresholds for each feature are at most `max_bins` quantiles of
//! the training values, and every row is pre-assigned to a bin so a node's
//! split search is one pass over its rows per feature.

use credit_scoring_core::gbdt::{Node, Tree};

use crate::deterministic::SplitTieBreaker;

/// Parameters of a single tree
#[derive(Clone, Debug)]
pub struct TreeConfig {
    pub max_depth: usize,
    pub min_samples_leaf: usize,
    pub l2_regularization: f64,
    pub min_split_gain: f64,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            max_depth: 6,
            min_samples_leaf: 20,
            l2_regularization: 1.0,
            min_split_gain: 1e-9,
        }
    }
}

/// Quantile thresholds per feature and the bin of every row.
///
/// Bin `k` holds values `<= thresholds[k]` (and above the previous
/// threshold); the extra last bin holds values above every threshold and
/// NaN, which is where `value <= threshold` sends them at inference.
#[derive(Clone, Debug)]
pub struct BinnedFeatures {
    thresholds: Vec<Vec<f64>>,
    bins: Vec<Vec<u16>>,
}

impl BinnedFeatures {
    pub fn from_rows(rows: &[Vec<f64>], n_features: usize, max_bins: usize) -> Self {
        let max_bins = max_bins.clamp(2, u16::MAX as usize);
        let thresholds: Vec<Vec<f64>> = (0..n_features)
            .map(|f| quantile_thresholds(rows.iter().map(|row| row[f]), max_bins))
            .collect();

        let bins = rows
            .iter()
            .map(|row| {
                thresholds
                    .iter()
                    .enumerate()
                    .map(|(f, cuts)| bin_of(row[f], cuts))
                    .collect()
            })
            .collect();

        Self { thresholds, bins }
    }

    pub fn n_features(&self) -> usize {
        self.thresholds.len()
    }

    pub fn n_rows(&self) -> usize {
        self.bins.len()
    }

    pub fn thresholds(&self, feature: usize) -> &[f64] {
        &self.thresholds[feature]
    }

    fn bin(&self, row: usize, feature: usize) -> usize {
        self.bins[row][feature] as usize
    }
}

fn quantile_thresholds(values: impl Iterator<Item = f64>, max_bins: usize) -> Vec<f64> {
    let mut sorted: Vec<f64> = values.filter(|v| !v.is_nan()).collect();
    sorted.sort_by(f64::total_cmp);
    let Some(&max) = sorted.last() else {
        return Vec::new();
    };

    let mut distinct = sorted.clone();
    distinct.dedup();

    let mut cuts: Vec<f64> = if distinct.len() <= max_bins {
        distinct
    } else {
        (1..max_bins)
            .map(|k| sorted[k * sorted.len() / max_bins])
            .collect()
    };
    cuts.dedup();
    // nothing lies above the maximum, so it cannot split
    cuts.retain(|&c| c < max);
    cuts
}

fn bin_of(value: f64, cuts: &[f64]) -> u16 {
    let bin = if value.is_nan() {
        cuts.len()
    } else {
        cuts.partition_point(|&c| c < value)
    };
    bin as u16
}

#[derive(Debug, Clone, Copy, Default)]
struct Stats {
    gradient: f64,
    hessian: f64,
    count: usize,
}

impl Stats {
    fn add(&mut self, gradient: f64, hessian: f64) {
        self.gradient += gradient;
        self.hessian += hessian;
        self.count += 1;
    }

    fn minus(self, other: Stats) -> Stats {
        Stats {
            gradient: self.gradient - other.gradient,
            hessian: self.hessian - other.hessian,
            count: self.count - other.count,
        }
    }
}

#[derive(Debug, Clone)]
struct SplitCandidate {
    feature_idx: usize,
    bin: usize,
    gain: f64,
    tie_breaker: SplitTieBreaker,
}

/// Builds one regression tree for the given gradients and hessians.
pub struct CartBuilder<'a> {
    config: TreeConfig,
    binned: &'a BinnedFeatures,
    gradients: &'a [f64],
    hessians: &'a [f64],
}

impl<'a> CartBuilder<'a> {
    pub fn new(
        binned: &'a BinnedFeatures,
        gradients: &'a [f64],
        hessians: &'a [f64],
        config: TreeConfig,
    ) -> Self {
        Self {
            config,
            binned,
            gradients,
            hessians,
        }
    }

    /// Grow a tree on `rows`, its output scaled by `weight`.
    pub fn build(&self, rows: &[usize], weight: f64) -> Tree {
        let mut nodes = Vec::new();
        self.build_node(rows, 0, &mut nodes);
        Tree::new(nodes, weight)
    }

    fn build_node(&self, rows: &[usize], depth: usize, nodes: &mut Vec<Node>) -> u32 {
        let current = nodes.len() as u32;
        let stats = self.sum(rows);
        let leaf = Node::leaf(current, self.leaf_value(stats));

        if depth >= self.config.max_depth || rows.len() < 2 * self.config.min_samples_leaf.max(1) {
            nodes.push(leaf);
            return current;
        }

        let Some(split) = self.find_best_split(rows, stats) else {
            nodes.push(leaf);
            return current;
        };

        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = rows
            .iter()
            .copied()
            .partition(|&row| self.binned.bin(row, split.feature_idx) <= split.bin);

        let threshold = self.binned.thresholds(split.feature_idx)[split.bin];
        // children are filled in once their subtrees exist
        nodes.push(Node::internal(current, split.feature_idx, threshold, 0, 0));

        let left = self.build_node(&left_rows, depth + 1, nodes);
        let right = self.build_node(&right_rows, depth + 1, nodes);
        nodes[current as usize] =
            Node::internal(current, split.feature_idx, threshold, left, right);

        current
    }

    fn find_best_split(&self, rows: &[usize], parent: Stats) -> Option<SplitCandidate> {
        let mut best: Option<SplitCandidate> = None;
        let parent_score = self.score(parent);

        for feature_idx in 0..self.binned.n_features() {
            let n_cuts = self.binned.thresholds(feature_idx).len();
            if n_cuts == 0 {
                continue;
            }

            let mut histogram = vec![Stats::default(); n_cuts + 1];
            for &row in rows {
                histogram[self.binned.bin(row, feature_idx)]
                    .add(self.gradients[row], self.hessians[row]);
            }

            let mut left = Stats::default();
            for (bin, bucket) in histogram.iter().take(n_cuts).enumerate() {
                left.gradient += bucket.gradient;
                left.hessian += bucket.hessian;
                left.count += bucket.count;
                let right = parent.minus(left);

                if left.count < self.config.min_samples_leaf
                    || right.count < self.config.min_samples_leaf
                    || left.count == 0
                    || right.count == 0
                {
                    continue;
                }

                let gain = 0.5 * (self.score(left) + self.score(right) - parent_score);
                if gain <= self.config.min_split_gain {
                    continue;
                }

                let candidate = SplitCandidate {
                    feature_idx,
                    bin,
                    gain,
                    tie_breaker: SplitTieBreaker::new(feature_idx, bin),
                };
                best = match best {
                    None => Some(candidate),
                    Some(current) => {
                        if gain > current.gain
                            || (gain == current.gain && candidate.tie_breaker < current.tie_breaker)
                        {
                            Some(candidate)
                        } else {
                            Some(current)
                        }
                    }
                };
            }
        }

        best
    }

    fn sum(&self, rows: &[usize]) -> Stats {
        let mut stats = Stats::default();
        for &row in rows {
            stats.add(self.gradients[row], self.hessians[row]);
        }
        stats
    }

    /// G² / (H + λ)
    fn score(&self, stats: Stats) -> f64 {
        stats.gradient * stats.gradient / (stats.hessian + self.config.l2_regularization)
    }

    /// -G / (H + λ)
    fn leaf_value(&self, stats: Stats) -> f64 {
        let denominator = stats.hessian + self.config.l2_regularization;
        if denominator <= 0.0 {
            return 0.0;
        }
        -stats.gradient / denominator
    }
}
