//! Credit Scoring Trainer - offline training and batch scoring
//!
//! Loads the raw credit tables, builds the merged feature tables, trains a
//! reproducible gradient-boosted classifier, calibrates the business
//! decision threshold and persists everything the serving side needs.

pub mod cart;
pub mod dataset;
pub mod deterministic;
pub mod errors;
pub mod pipeline;
pub mod trainer;

pub use dataset::{stratified_split, EntityFeatures, HoldoutSplit, LabeledFeatures, RawTables};
pub use deterministic::{LcgRng, SplitTieBreaker};
pub use errors::TrainerError;
pub use pipeline::{predict_record, run_drift, run_training, ModelEvaluation, TrainingReport};
pub use trainer::{GbdtParams, GbdtTrainer};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
