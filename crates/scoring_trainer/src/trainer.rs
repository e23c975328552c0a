//! Gradient Boosted Decision Tree (GBDT) trainer
//!
//! Binary logistic boosting: each tree is fitted to the gradients and
//! hessians of the log-loss at the current margins, with optional balanced
//! class weights and seeded row subsampling.

use credit_scoring_core::config::TrainingConfig;
use credit_scoring_core::gbdt::sigmoid;
use credit_scoring_core::log::StageTimer;
use credit_scoring_core::{FeatureMatrix, GbdtModel};
use tracing::{debug, info};

use crate::cart::{BinnedFeatures, CartBuilder, TreeConfig};
use crate::deterministic::LcgRng;
use crate::errors::{Result, TrainerError};

/// Smallest hessian kept, so leaf values stay finite on saturated rows
const MIN_HESSIAN: f64 = 1e-12;
/// Clamp of the initial base rate
const RATE_EPSILON: f64 = 1e-6;

/// GBDT training parameters
#[derive(Clone, Debug, PartialEq)]
pub struct GbdtParams {
    pub num_trees: usize,
    pub max_depth: usize,
    pub min_samples_leaf: usize,
    pub learning_rate: f64,
    pub max_bins: usize,
    pub subsample: f64,
    pub l2_regularization: f64,
    pub balanced_classes: bool,
    pub seed: u64,
}

impl Default for GbdtParams {
    fn default() -> Self {
        Self::from(&TrainingConfig::default())
    }
}

impl From<&TrainingConfig> for GbdtParams {
    fn from(config: &TrainingConfig) -> Self {
        Self {
            num_trees: config.num_trees,
            max_depth: config.max_depth,
            min_samples_leaf: config.min_samples_leaf,
            learning_rate: config.learning_rate,
            max_bins: config.max_bins,
            subsample: config.subsample,
            l2_regularization: config.l2_regularization,
            balanced_classes: config.balanced_classes,
            seed: config.seed,
        }
    }
}

/// GBDT trainer
pub struct GbdtTrainer {
    params: GbdtParams,
}

impl GbdtTrainer {
    pub fn new(params: GbdtParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &GbdtParams {
        &self.params
    }

    /// Train on an encoded matrix and 0/1 labels.
    pub fn train(&self, matrix: &FeatureMatrix, labels: &[u8]) -> Result<GbdtModel> {
        let _timer = StageTimer::start("gbdt training");
        let n = matrix.n_rows();

        if n == 0 {
            return Err(TrainerError::Training("no training rows".into()));
        }
        if labels.len() != n {
            return Err(TrainerError::Training(format!(
                "{} labels for {n} rows",
                labels.len()
            )));
        }
        if let Some(bad) = labels.iter().find(|&&l| l > 1) {
            return Err(TrainerError::Training(format!("label {bad} is not 0 or 1")));
        }
        if !(self.params.subsample > 0.0 && self.params.subsample <= 1.0) {
            return Err(TrainerError::Training(format!(
                "subsample must be in (0, 1], got {}",
                self.params.subsample
            )));
        }

        let weights = self.sample_weights(labels);
        let bias = self.initial_margin(labels, &weights);
        let binned =
            BinnedFeatures::from_rows(matrix.rows(), matrix.n_cols(), self.params.max_bins);
        let tree_config = TreeConfig {
            max_depth: self.params.max_depth,
            min_samples_leaf: self.params.min_samples_leaf,
            l2_regularization: self.params.l2_regularization,
            ..TreeConfig::default()
        };

        let mut margins = vec![bias; n];
        let mut gradients = vec![0.0; n];
        let mut hessians = vec![0.0; n];
        let mut rng = LcgRng::new(self.params.seed);
        let mut trees = Vec::with_capacity(self.params.num_trees);

        for tree_idx in 0..self.params.num_trees {
            for i in 0..n {
                let p = sigmoid(margins[i]);
                let y = f64::from(labels[i]);
                gradients[i] = weights[i] * (p - y);
                hessians[i] = (weights[i] * p * (1.0 - p)).max(MIN_HESSIAN);
            }

            let rows = self.subsample_rows(n, &mut rng);
            let builder = CartBuilder::new(&binned, &gradients, &hessians, tree_config.clone());
            let tree = builder.build(&rows, self.params.learning_rate);

            for (margin, row) in margins.iter_mut().zip(matrix.rows()) {
                *margin += tree.evaluate(row);
            }

            debug!(
                tree = tree_idx + 1,
                nodes = tree.nodes.len(),
                rows = rows.len(),
                log_loss = log_loss(labels, &margins),
                "tree built"
            );
            trees.push(tree);
        }

        let model = GbdtModel::new(matrix.columns().to_vec(), bias, trees);
        model.validate()?;

        info!(
            trees = model.num_trees(),
            features = matrix.n_cols(),
            rows = n,
            bias,
            log_loss = log_loss(labels, &margins),
            "gbdt trained"
        );
        Ok(model)
    }

    /// Inverse class frequency, scaled so the weights sum to n.
    fn sample_weights(&self, labels: &[u8]) -> Vec<f64> {
        let n = labels.len() as f64;
        let positives = labels.iter().filter(|&&l| l == 1).count() as f64;
        let negatives = n - positives;

        if !self.params.balanced_classes || positives == 0.0 || negatives == 0.0 {
            return vec![1.0; labels.len()];
        }
        let positive_weight = n / (2.0 * positives);
        let negative_weight = n / (2.0 * negatives);
        labels
            .iter()
            .map(|&l| if l == 1 { positive_weight } else { negative_weight })
            .collect()
    }

    /// Log-odds of the weighted positive rate.
    fn initial_margin(&self, labels: &[u8], weights: &[f64]) -> f64 {
        let total: f64 = weights.iter().sum();
        let positive: f64 = labels
            .iter()
            .zip(weights)
            .filter(|(&l, _)| l == 1)
            .map(|(_, &w)| w)
            .sum();
        let rate = (positive / total).clamp(RATE_EPSILON, 1.0 - RATE_EPSILON);
        (rate / (1.0 - rate)).ln()
    }

    fn subsample_rows(&self, n: usize, rng: &mut LcgRng) -> Vec<usize> {
        if self.params.subsample >= 1.0 {
            return (0..n).collect();
        }
        let rows: Vec<usize> = (0..n)
            .filter(|_| rng.next_f64() < self.params.subsample)
            .collect();
        if rows.is_empty() {
            vec![rng.next_range(n as u64) as usize]
        } else {
            rows
        }
    }
}

/// Mean unweighted log-loss of margins against labels.
pub fn log_loss(labels: &[u8], margins: &[f64]) -> f64 {
    if labels.is_empty() {
        return 0.0;
    }
    let total: f64 = labels
        .iter()
        .zip(margins)
        .map(|(&y, &m)| {
            let p = sigmoid(m).clamp(1e-15, 1.0 - 1e-15);
            if y == 1 {
                -p.ln()
            } else {
                -(1.0 - p).ln()
            }
        })
        .sum();
    total / labels.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use credit_scoring_core::Classifier;

    fn separable() -> (FeatureMatrix, Vec<u8>) {
        let rows: Vec<Vec<f64>> = (0..40)
            .map(|i| vec![f64::from(i), f64::from(i % 3)])
            .collect();
        let labels = (0..40).map(|i| u8::from(i >= 30)).collect();
        let matrix = FeatureMatrix::new(vec!["AMT".into(), "NOISE".into()], rows).unwrap();
        (matrix, labels)
    }

    fn params() -> GbdtParams {
        GbdtParams {
            num_trees: 20,
            max_depth: 2,
            min_samples_leaf: 2,
            learning_rate: 0.3,
            max_bins: 16,
            subsample: 0.8,
            l2_regularization: 1.0,
            balanced_classes: true,
            seed: 42,
        }
    }

    #[test]
    fn test_learns_a_separable_boundary() {
        let (matrix, labels) = separable();
        let model = GbdtTrainer::new(params()).train(&matrix, &labels).unwrap();

        assert_eq!(model.num_trees(), 20);
        assert_eq!(model.feature_names, vec!["AMT", "NOISE"]);
        let probs = model.predict_proba(&matrix).unwrap();
        assert!(probs[..25].iter().all(|&p| p < 0.5));
        assert!(probs[35..].iter().all(|&p| p > 0.5));
    }

    #[test]
    fn test_training_is_reproducible() {
        let (matrix, labels) = separable();
        let first = GbdtTrainer::new(params()).train(&matrix, &labels).unwrap();
        let second = GbdtTrainer::new(params()).train(&matrix, &labels).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.hash_hex().unwrap(), second.hash_hex().unwrap());
    }

    #[test]
    fn test_balanced_weights_center_the_bias() {
        let (_, labels) = separable();
        let trainer = GbdtTrainer::new(params());
        let weights = trainer.sample_weights(&labels);
        assert!(trainer.initial_margin(&labels, &weights).abs() < 1e-9);

        let unbalanced = GbdtTrainer::new(GbdtParams {
            balanced_classes: false,
            ..params()
        });
        let weights = unbalanced.sample_weights(&labels);
        let expected = (0.25f64 / 0.75).ln();
        assert!((unbalanced.initial_margin(&labels, &weights) - expected).abs() < 1e-9);
    }

    #[test]
    fn test_rejects_bad_inputs() {
        let (matrix, labels) = separable();
        let trainer = GbdtTrainer::new(params());
        assert!(trainer.train(&matrix, &labels[..10]).is_err());

        let mut bad = labels.clone();
        bad[0] = 3;
        assert!(trainer.train(&matrix, &bad).is_err());
    }
}
