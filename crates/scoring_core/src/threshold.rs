//! Business-cost threshold calibration
//!
//! Searches a grid of candidate thresholds for the one maximizing
//! `1 / (1 + w_fn * FN + w_fp * FP)` on held-out probabilities. Missing a
//! defaulter (FN) costs five times as much as refusing a good applicant
//! (FP) with the default weights.

use crate::artifacts::{ArtifactStore, THRESHOLD_ARTIFACT};
use crate::config::ThresholdConfig;
use crate::decision::decide;
use crate::errors::{Result, ScoringError};
use crate::log::StageTimer;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

pub const DEFAULT_GRID_START: f64 = 0.05;
pub const DEFAULT_GRID_END: f64 = 0.5;
pub const DEFAULT_GRID_POINTS: usize = 50;

/// `points` evenly spaced values from `start` to `end`, both inclusive.
pub fn linspace(start: f64, end: f64, points: usize) -> Vec<f64> {
    match points {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (end - start) / (points - 1) as f64;
            (0..points)
                .map(|i| if i == points - 1 { end } else { start + step * i as f64 })
                .collect()
        }
    }
}

/// 50 evenly spaced thresholds over [0.05, 0.5].
pub fn default_thresholds() -> Vec<f64> {
    linspace(DEFAULT_GRID_START, DEFAULT_GRID_END, DEFAULT_GRID_POINTS)
}

/// Relative cost of each error kind
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CostWeights {
    pub false_negative: f64,
    pub false_positive: f64,
}

impl CostWeights {
    pub fn new(false_negative: f64, false_positive: f64) -> Self {
        Self {
            false_negative,
            false_positive,
        }
    }
}

impl Default for CostWeights {
    fn default() -> Self {
        Self::new(5.0, 1.0)
    }
}

/// Binary confusion counts, positive = default
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionCounts {
    pub true_positive: usize,
    pub false_positive: usize,
    pub true_negative: usize,
    pub false_negative: usize,
}

impl ConfusionCounts {
    /// Count outcomes of `predictions` against `labels` (both 0/1).
    pub fn from_predictions(labels: &[u8], predictions: &[u8]) -> Self {
        let mut counts = Self::default();
        for (&label, &prediction) in labels.iter().zip(predictions) {
            match (label, prediction) {
                (1, 1) => counts.true_positive += 1,
                (0, 1) => counts.false_positive += 1,
                (1, _) => counts.false_negative += 1,
                _ => counts.true_negative += 1,
            }
        }
        counts
    }

    /// Counts of the decision rule `probability >= threshold`.
    pub fn at_threshold(labels: &[u8], probabilities: &[f64], threshold: f64) -> Self {
        let predictions: Vec<u8> = probabilities
            .iter()
            .map(|&p| decide(p, threshold).flag())
            .collect();
        Self::from_predictions(labels, &predictions)
    }
}

/// Score in (0, 1]; 1 means no errors at all.
pub fn business_score(counts: &ConfusionCounts, weights: CostWeights) -> f64 {
    1.0 / (1.0
        + weights.false_negative * counts.false_negative as f64
        + weights.false_positive * counts.false_positive as f64)
}

/// Outcome of a threshold search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdSearch {
    pub best_threshold: f64,
    pub best_score: f64,
    pub best_index: usize,
    pub thresholds: Vec<f64>,
    pub scores: Vec<f64>,
}

/// Persisted threshold, read verbatim by the serving path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdArtifact {
    pub best_threshold: f64,
    pub best_score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thresholds: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scores: Option<Vec<f64>>,
}

impl ThresholdArtifact {
    /// Artifact carrying the full grid for auditability.
    pub fn from_search(search: &ThresholdSearch) -> Self {
        Self {
            best_threshold: search.best_threshold,
            best_score: search.best_score,
            thresholds: Some(search.thresholds.clone()),
            scores: Some(search.scores.clone()),
        }
    }

    pub fn save(&self, store: &ArtifactStore) -> Result<String> {
        store.save(THRESHOLD_ARTIFACT, self)
    }

    pub fn load(store: &ArtifactStore) -> Result<Self> {
        let artifact: Self = store.load(THRESHOLD_ARTIFACT)?;
        if !(0.0..=1.0).contains(&artifact.best_threshold) {
            return Err(ScoringError::Persistence(format!(
                "stored threshold {} is outside [0, 1]",
                artifact.best_threshold
            )));
        }
        Ok(artifact)
    }
}

/// Evaluate every candidate and keep the best; ties go to the earliest
/// candidate.
pub fn optimize(
    labels: &[u8],
    probabilities: &[f64],
    candidates: &[f64],
    weights: CostWeights,
) -> Result<ThresholdSearch> {
    if labels.is_empty() {
        return Err(ScoringError::InvalidInput("no labels to calibrate on".into()));
    }
    if labels.len() != probabilities.len() {
        return Err(ScoringError::InvalidInput(format!(
            "{} labels but {} probabilities",
            labels.len(),
            probabilities.len()
        )));
    }
    if candidates.is_empty() {
        return Err(ScoringError::InvalidInput("no candidate thresholds".into()));
    }
    if let Some(bad) = labels.iter().find(|&&l| l > 1) {
        return Err(ScoringError::InvalidInput(format!(
            "labels must be 0 or 1, found {bad}"
        )));
    }
    if probabilities.iter().any(|p| !p.is_finite()) {
        return Err(ScoringError::InvalidInput(
            "probabilities must be finite".into(),
        ));
    }

    let scores: Vec<f64> = candidates
        .iter()
        .map(|&t| business_score(&ConfusionCounts::at_threshold(labels, probabilities, t), weights))
        .collect();

    let mut best_index = 0;
    for (i, &score) in scores.iter().enumerate().skip(1) {
        if score > scores[best_index] {
            best_index = i;
        }
    }

    Ok(ThresholdSearch {
        best_threshold: candidates[best_index],
        best_score: scores[best_index],
        best_index,
        thresholds: candidates.to_vec(),
        scores,
    })
}

/// Threshold search bound to a cost model and candidate grid
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdCalibrator {
    weights: CostWeights,
    candidates: Vec<f64>,
}

impl Default for ThresholdCalibrator {
    fn default() -> Self {
        Self::new(CostWeights::default(), default_thresholds())
    }
}

impl ThresholdCalibrator {
    pub fn new(weights: CostWeights, candidates: Vec<f64>) -> Self {
        Self {
            weights,
            candidates,
        }
    }

    pub fn from_config(config: &ThresholdConfig) -> Self {
        Self::new(config.weights(), config.candidates())
    }

    pub fn weights(&self) -> CostWeights {
        self.weights
    }

    pub fn candidates(&self) -> &[f64] {
        &self.candidates
    }

    pub fn optimize(&self, labels: &[u8], probabilities: &[f64]) -> Result<ThresholdSearch> {
        optimize(labels, probabilities, &self.candidates, self.weights)
    }

    /// Optimize and persist the result. A failed write is logged and the
    /// in-memory result is still returned.
    pub fn calibrate(
        &self,
        labels: &[u8],
        probabilities: &[f64],
        store: &ArtifactStore,
    ) -> Result<ThresholdSearch> {
        let _timer = StageTimer::start("threshold calibration");
        let search = self.optimize(labels, probabilities)?;

        info!(
            threshold = search.best_threshold,
            score = search.best_score,
            candidates = search.thresholds.len(),
            "decision threshold selected"
        );

        if let Err(err) = ThresholdArtifact::from_search(&search).save(store) {
            warn!(error = %err, "could not persist decision threshold");
        }
        Ok(search)
    }
}
