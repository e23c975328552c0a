//! Training pipeline orchestration
//!
//! load → merge → split → preprocess → train → compare with the prior
//! baseline → calibrate the threshold → persist artifacts → score the
//! application test table.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use credit_scoring_core::drift::DriftReport;
use credit_scoring_core::log::StageTimer;
use credit_scoring_core::threshold::{business_score, ConfusionCounts};
use credit_scoring_core::{
    ArtifactStore, Classifier, CostWeights, DriftDetector, FeatureMatrix, KeyValue, PriorModel,
    Preprocessor, Record, ScoringConfig, ScoringResponse, ScoringService, TableMerger,
    ThresholdArtifact, ThresholdCalibrator,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::dataset::{
    load_table, stratified_split, EntityFeatures, LabeledFeatures, RawTables, APPLICATION_TEST,
    APPLICATION_TRAIN,
};
use crate::errors::{Result, TrainerError};
use crate::trainer::{GbdtParams, GbdtTrainer};

pub const PREDICTIONS_FILE: &str = "predictions.csv";
pub const TRAINING_REPORT_FILE: &str = "training_report.json";

/// Holdout metrics of one classifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelEvaluation {
    pub name: String,
    /// Business score of the 0.5 cut
    pub business_score: f64,
    pub roc_auc: Option<f64>,
    pub confusion: ConfusionCounts,
}

/// Summary of a training run, also written to `training_report.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingReport {
    pub generated_at: String,
    pub version: String,
    pub train_rows: usize,
    pub holdout_rows: usize,
    pub test_rows: usize,
    pub features: usize,
    pub positive_rate: f64,
    pub baseline: ModelEvaluation,
    pub model: ModelEvaluation,
    pub threshold: f64,
    pub threshold_score: f64,
    pub model_hash: String,
    pub predictions_path: PathBuf,
}

/// Run the full offline pipeline described by `config`.
pub fn run_training(config: &ScoringConfig) -> Result<TrainingReport> {
    let _timer = StageTimer::start("training pipeline");
    let key = config.schema.entity_key.as_str();

    let (application_train, application_test, sources) =
        RawTables::load(&config.paths.data_dir)?.into_sources();
    let merger = TableMerger::new(key);
    let (train_table, test_table) =
        merger.build_features(&application_train, &application_test, &sources)?;

    let labeled = LabeledFeatures::from_table(train_table, key, &config.schema.target_column)?;
    let split = stratified_split(
        &labeled.labels,
        config.training.holdout_fraction,
        config.training.seed,
    )?;
    let fitting = labeled.select(&split.train);
    let holdout = labeled.select(&split.holdout);
    info!(
        train = fitting.len(),
        holdout = holdout.len(),
        positive_rate = labeled.positive_rate(),
        "holdout split"
    );

    let mut preprocessor = Preprocessor::new(config.preprocess.clone());
    let train_matrix = preprocessor.fit_transform(&fitting.features)?;
    let holdout_matrix = preprocessor.transform(&holdout.features)?;

    let model = GbdtTrainer::new(GbdtParams::from(&config.training))
        .train(&train_matrix, &fitting.labels)?;
    let prior = PriorModel::fit(train_matrix.columns().to_vec(), &fitting.labels)?;

    let weights = config.threshold.weights();
    let baseline = evaluate("prior", &prior, &holdout_matrix, &holdout.labels, weights)?;
    let evaluation = evaluate("gbdt", &model, &holdout_matrix, &holdout.labels, weights)?;
    if evaluation.business_score < baseline.business_score {
        warn!(
            model = evaluation.business_score,
            baseline = baseline.business_score,
            "boosted model scores below the prior baseline"
        );
    }

    let store = ArtifactStore::new(&config.paths.models_dir);
    let holdout_probabilities = model.predict_proba(&holdout_matrix)?;
    let search = ThresholdCalibrator::from_config(&config.threshold).calibrate(
        &holdout.labels,
        &holdout_probabilities,
        &store,
    )?;

    preprocessor.save(&store)?;
    let model_hash = model.save(&store)?;

    let service = ScoringService::new(
        preprocessor,
        model,
        ThresholdArtifact::from_search(&search),
    )?;
    let test = EntityFeatures::from_table(test_table, key)?;
    let responses = service.score_table(&test.features)?;
    let predictions_path = config.paths.reports_dir.join(PREDICTIONS_FILE);
    write_predictions(&predictions_path, key, &test.keys, &responses)?;

    let report = TrainingReport {
        generated_at: Utc::now().to_rfc3339(),
        version: crate::VERSION.to_string(),
        train_rows: fitting.len(),
        holdout_rows: holdout.len(),
        test_rows: responses.len(),
        features: train_matrix.n_cols(),
        positive_rate: labeled.positive_rate(),
        baseline,
        model: evaluation,
        threshold: search.best_threshold,
        threshold_score: search.best_score,
        model_hash,
        predictions_path,
    };
    write_report(&config.paths.reports_dir, &report)?;

    info!(
        threshold = report.threshold,
        business_score = report.threshold_score,
        auc = ?report.model.roc_auc,
        "training complete"
    );
    Ok(report)
}

/// Score one JSON record with the persisted artifacts.
pub fn predict_record(config: &ScoringConfig, record_json: &str) -> Result<ScoringResponse> {
    let record: Record = serde_json::from_str(record_json)?;
    let service = ScoringService::load(&ArtifactStore::new(&config.paths.models_dir))?;
    Ok(service.score(&record)?)
}

/// Compare the application train table against the test table and write
/// the drift report.
pub fn run_drift(config: &ScoringConfig) -> Result<DriftReport> {
    let _timer = StageTimer::start("drift report");
    let reference = load_table(&config.paths.data_dir, APPLICATION_TRAIN)?;
    let current = load_table(&config.paths.data_dir, APPLICATION_TEST)?;

    let report = DriftDetector::default()
        .excluding([
            config.schema.entity_key.as_str(),
            config.schema.target_column.as_str(),
        ])
        .compare(&reference, &current)?;
    report.write_to_dir(&config.paths.reports_dir)?;

    info!(
        drifted = report.number_of_drifted_columns,
        share = report.share_of_drifted_columns,
        dataset_drift = report.dataset_drift,
        "drift checked"
    );
    Ok(report)
}

fn evaluate(
    name: &str,
    classifier: &dyn Classifier,
    matrix: &FeatureMatrix,
    labels: &[u8],
    weights: CostWeights,
) -> Result<ModelEvaluation> {
    let probabilities = classifier.predict_proba(matrix)?;
    let predictions: Vec<u8> = probabilities.iter().map(|&p| u8::from(p >= 0.5)).collect();
    let confusion = ConfusionCounts::from_predictions(labels, &predictions);
    let evaluation = ModelEvaluation {
        name: name.to_string(),
        business_score: business_score(&confusion, weights),
        roc_auc: roc_auc(labels, &probabilities),
        confusion,
    };
    info!(
        model = name,
        business_score = evaluation.business_score,
        auc = ?evaluation.roc_auc,
        "holdout evaluation"
    );
    Ok(evaluation)
}

/// Area under the ROC curve from average ranks; `None` with a single class.
pub fn roc_auc(labels: &[u8], scores: &[f64]) -> Option<f64> {
    let positives = labels.iter().filter(|&&l| l == 1).count();
    let negatives = labels.len() - positives;
    if positives == 0 || negatives == 0 || scores.len() != labels.len() {
        return None;
    }

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));

    let mut positive_rank_sum = 0.0;
    let mut start = 0;
    while start < order.len() {
        let mut end = start + 1;
        while end < order.len() && scores[order[end]] == scores[order[start]] {
            end += 1;
        }
        // ranks are 1-based; tied scores share the mean rank
        let rank = (start + end + 1) as f64 / 2.0;
        let tied_positives = order[start..end].iter().filter(|&&i| labels[i] == 1).count();
        positive_rank_sum += rank * tied_positives as f64;
        start = end;
    }

    let p = positives as f64;
    Some((positive_rank_sum - p * (p + 1.0) / 2.0) / (p * negatives as f64))
}

fn write_predictions(
    path: &Path,
    key: &str,
    keys: &[Option<KeyValue>],
    responses: &[ScoringResponse],
) -> Result<()> {
    if keys.len() != responses.len() {
        return Err(TrainerError::Training(format!(
            "{} keys for {} predictions",
            keys.len(),
            responses.len()
        )));
    }
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }

    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record([key, "probability_default", "decision"])?;
    for (entity, response) in keys.iter().zip(responses) {
        writer.write_record([
            entity.as_ref().map(ToString::to_string).unwrap_or_default(),
            response.probability_default.to_string(),
            response.decision.to_string(),
        ])?;
    }
    writer.flush()?;

    info!(path = %path.display(), rows = responses.len(), "predictions written");
    Ok(())
}

fn write_report(dir: &Path, report: &TrainingReport) -> Result<()> {
    fs::create_dir_all(dir)?;
    let path = dir.join(TRAINING_REPORT_FILE);
    fs::write(&path, serde_json::to_string_pretty(report)?)?;
    info!(path = %path.display(), "training report written");
    Ok(())
}
