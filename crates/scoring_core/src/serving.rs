//! Serving adapter: persisted preprocessor + model + threshold applied to
//! incoming records.

use crate::artifacts::ArtifactStore;
use crate::decision::decide;
use crate::errors::{Result, ScoringError};
use crate::gbdt::{Classifier, GbdtModel};
use crate::preprocess::Preprocessor;
use crate::table::{Record, Table};
use crate::threshold::ThresholdArtifact;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Response returned for every scored record
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoringResponse {
    /// Model label at the 0.5 cut
    pub prediction: u8,
    pub probability_default: f64,
    pub threshold_used: f64,
    /// Business decision at the calibrated threshold
    pub decision: u8,
}

/// Immutable scoring service; share it by reference across requests.
#[derive(Debug, Clone)]
pub struct ScoringService {
    preprocessor: Preprocessor,
    model: GbdtModel,
    threshold: ThresholdArtifact,
}

impl ScoringService {
    /// Assemble a service from already loaded parts.
    pub fn new(
        preprocessor: Preprocessor,
        model: GbdtModel,
        threshold: ThresholdArtifact,
    ) -> Result<Self> {
        let columns = preprocessor.final_columns()?;
        if columns != model.feature_names.as_slice() {
            return Err(ScoringError::Persistence(format!(
                "model expects {} features but the preprocessor produces {}",
                model.feature_names.len(),
                columns.len()
            )));
        }
        Ok(Self {
            preprocessor,
            model,
            threshold,
        })
    }

    /// Load every artifact from `store`. Any missing or invalid artifact is
    /// a persistence error and no service is built.
    pub fn load(store: &ArtifactStore) -> Result<Self> {
        let fatal = |what: &str, err: ScoringError| match err {
            ScoringError::Persistence(_) => err,
            other => ScoringError::Persistence(format!("cannot load {what}: {other}")),
        };

        let preprocessor = Preprocessor::load(store).map_err(|e| fatal("preprocessor", e))?;
        let model = GbdtModel::load(store).map_err(|e| fatal("model", e))?;
        let threshold = ThresholdArtifact::load(store).map_err(|e| fatal("threshold", e))?;
        let service = Self::new(preprocessor, model, threshold)?;

        info!(
            dir = %store.dir().display(),
            features = service.model.feature_names.len(),
            trees = service.model.num_trees(),
            threshold = service.threshold.best_threshold,
            "scoring service ready"
        );
        Ok(service)
    }

    pub fn threshold(&self) -> f64 {
        self.threshold.best_threshold
    }

    pub fn model(&self) -> &GbdtModel {
        &self.model
    }

    pub fn preprocessor(&self) -> &Preprocessor {
        &self.preprocessor
    }

    /// Score one raw record.
    pub fn score(&self, record: &Record) -> Result<ScoringResponse> {
        let table = Table::from_records(std::slice::from_ref(record))?;
        let responses = self.score_table(&table)?;
        responses
            .into_iter()
            .next()
            .ok_or_else(|| ScoringError::InvalidInput("record produced no rows".into()))
    }

    /// Score every row of a raw table.
    pub fn score_table(&self, table: &Table) -> Result<Vec<ScoringResponse>> {
        let matrix = self.preprocessor.transform(table)?;
        let probabilities = self.model.predict_proba(&matrix)?;
        let threshold = self.threshold.best_threshold;
        debug!(rows = probabilities.len(), threshold, "rows scored");

        Ok(probabilities
            .into_iter()
            .map(|p| ScoringResponse {
                prediction: u8::from(p >= 0.5),
                probability_default: p,
                threshold_used: threshold,
                decision: decide(p, threshold).flag(),
            })
            .collect())
    }
}
