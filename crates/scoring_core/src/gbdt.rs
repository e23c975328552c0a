//! Gradient-boosted decision trees for binary default scoring
//!
//! Inference side only: the ensemble sums leaf values of every tree plus a
//! bias into a log-odds margin, and the logistic function maps it to a
//! probability of default. Trees are produced by the trainer crate.

use crate::artifacts::{ArtifactStore, MODEL_ARTIFACT};
use crate::errors::{Result, ScoringError};
use crate::matrix::FeatureMatrix;
use crate::serde_canon::hash_canonical_hex;
use serde::{Deserialize, Serialize};

/// Current model format version
pub const MODEL_VERSION: u32 = 1;

/// Anything that turns an encoded matrix into default probabilities.
pub trait Classifier: Send + Sync {
    /// Encoded columns the classifier expects, in order
    fn feature_names(&self) -> &[String];

    /// One probability in [0, 1] per row.
    fn predict_proba(&self, matrix: &FeatureMatrix) -> Result<Vec<f64>>;

    /// Hard labels at the conventional 0.5 cut.
    fn predict(&self, matrix: &FeatureMatrix) -> Result<Vec<u8>> {
        Ok(self
            .predict_proba(matrix)?
            .into_iter()
            .map(|p| u8::from(p >= 0.5))
            .collect())
    }
}

fn check_columns(expected: &[String], matrix: &FeatureMatrix) -> Result<()> {
    if expected != matrix.columns() {
        return Err(ScoringError::InvalidInput(format!(
            "classifier expects {} features, matrix has {} with different names or order",
            expected.len(),
            matrix.n_cols()
        )));
    }
    Ok(())
}

pub fn sigmoid(margin: f64) -> f64 {
    1.0 / (1.0 + (-margin).exp())
}

/// Tree node. Internal nodes send `value <= threshold` left; missing values
/// (NaN) fail the comparison and go right.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub split: Option<Split>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leaf: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Split {
    pub feature: usize,
    pub threshold: f64,
    pub left: u32,
    pub right: u32,
}

impl Node {
    pub fn internal(id: u32, feature: usize, threshold: f64, left: u32, right: u32) -> Self {
        Self {
            id,
            split: Some(Split {
                feature,
                threshold,
                left,
                right,
            }),
            leaf: None,
        }
    }

    pub fn leaf(id: u32, value: f64) -> Self {
        Self {
            id,
            split: None,
            leaf: Some(value),
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.split.is_none()
    }
}

/// One regression tree; node 0 is the root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tree {
    pub nodes: Vec<Node>,
    pub weight: f64,
}

impl Tree {
    pub fn new(nodes: Vec<Node>, weight: f64) -> Self {
        Self { nodes, weight }
    }

    /// Weighted leaf value reached by `features`. Assumes a validated tree.
    pub fn evaluate(&self, features: &[f64]) -> f64 {
        let mut idx = 0usize;
        // a validated tree has no cycles, so the walk ends within nodes.len() steps
        for _ in 0..self.nodes.len() {
            let Some(node) = self.nodes.get(idx) else {
                return 0.0;
            };
            match node.split {
                None => return node.leaf.unwrap_or(0.0) * self.weight,
                Some(split) => {
                    let value = features.get(split.feature).copied().unwrap_or(f64::NAN);
                    idx = if value <= split.threshold {
                        split.left as usize
                    } else {
                        split.right as usize
                    };
                }
            }
        }
        0.0
    }

    pub fn depth(&self) -> usize {
        fn walk(nodes: &[Node], idx: usize, remaining: usize) -> usize {
            match nodes.get(idx).and_then(|n| n.split) {
                Some(split) if remaining > 0 => {
                    1 + walk(nodes, split.left as usize, remaining - 1)
                        .max(walk(nodes, split.right as usize, remaining - 1))
                }
                _ => 0,
            }
        }
        walk(&self.nodes, 0, self.nodes.len())
    }

    /// Checks child links, feature indices and leaf values.
    pub fn validate(&self, n_features: usize) -> std::result::Result<(), String> {
        if self.nodes.is_empty() {
            return Err("tree has no nodes".to_string());
        }
        if !self.weight.is_finite() {
            return Err("tree weight is not finite".to_string());
        }
        let n = self.nodes.len();
        for (i, node) in self.nodes.iter().enumerate() {
            match (&node.split, node.leaf) {
                (Some(split), _) => {
                    // children always come after their parent, which rules out cycles
                    for child in [split.left, split.right] {
                        let child = child as usize;
                        if child <= i || child >= n {
                            return Err(format!("node {i} has invalid child {child}"));
                        }
                    }
                    if split.feature >= n_features {
                        return Err(format!(
                            "node {i} splits on feature {} of {n_features}",
                            split.feature
                        ));
                    }
                    if split.threshold.is_nan() {
                        return Err(format!("node {i} has a NaN threshold"));
                    }
                }
                (None, Some(value)) if value.is_finite() => {}
                (None, _) => return Err(format!("leaf node {i} has no finite value")),
            }
        }
        Ok(())
    }
}

/// Binary logistic boosted ensemble
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GbdtModel {
    pub version: u32,
    pub feature_names: Vec<String>,
    /// Initial log-odds
    pub bias: f64,
    pub trees: Vec<Tree>,
}

impl GbdtModel {
    pub fn new(feature_names: Vec<String>, bias: f64, trees: Vec<Tree>) -> Self {
        Self {
            version: MODEL_VERSION,
            feature_names,
            bias,
            trees,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.version != MODEL_VERSION {
            return Err(ScoringError::InvalidInput(format!(
                "unsupported model version {}",
                self.version
            )));
        }
        if !self.bias.is_finite() {
            return Err(ScoringError::InvalidInput("model bias is not finite".into()));
        }
        for (i, tree) in self.trees.iter().enumerate() {
            tree.validate(self.feature_names.len())
                .map_err(|e| ScoringError::InvalidInput(format!("tree {i}: {e}")))?;
        }
        Ok(())
    }

    pub fn num_trees(&self) -> usize {
        self.trees.len()
    }

    /// Raw log-odds for one encoded row.
    pub fn margin(&self, features: &[f64]) -> f64 {
        self.trees
            .iter()
            .fold(self.bias, |acc, tree| acc + tree.evaluate(features))
    }

    pub fn hash_hex(&self) -> Result<String> {
        Ok(hash_canonical_hex(self)?)
    }

    pub fn save(&self, store: &ArtifactStore) -> Result<String> {
        store.save(MODEL_ARTIFACT, self)
    }

    /// Load and validate; a structurally broken model is a persistence error.
    pub fn load(store: &ArtifactStore) -> Result<Self> {
        let model: Self = store.load(MODEL_ARTIFACT)?;
        model
            .validate()
            .map_err(|e| ScoringError::Persistence(format!("stored model is invalid: {e}")))?;
        Ok(model)
    }
}

impl Classifier for GbdtModel {
    fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    fn predict_proba(&self, matrix: &FeatureMatrix) -> Result<Vec<f64>> {
        check_columns(&self.feature_names, matrix)?;
        Ok(matrix
            .rows()
            .iter()
            .map(|row| sigmoid(self.margin(row)))
            .collect())
    }
}

/// Predicts the training base rate for every row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriorModel {
    feature_names: Vec<String>,
    base_rate: f64,
}

impl PriorModel {
    pub fn fit(feature_names: Vec<String>, labels: &[u8]) -> Result<Self> {
        if labels.is_empty() {
            return Err(ScoringError::InvalidInput("no labels to fit a prior on".into()));
        }
        let positives = labels.iter().filter(|&&l| l == 1).count();
        Ok(Self {
            feature_names,
            base_rate: positives as f64 / labels.len() as f64,
        })
    }

    pub fn base_rate(&self) -> f64 {
        self.base_rate
    }
}

impl Classifier for PriorModel {
    fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    fn predict_proba(&self, matrix: &FeatureMatrix) -> Result<Vec<f64>> {
        check_columns(&self.feature_names, matrix)?;
        Ok(vec![self.base_rate; matrix.n_rows()])
    }
}
