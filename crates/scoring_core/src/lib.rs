//! Credit Scoring Core
//!
//! Turns a primary application table plus its one-to-many history tables
//! into a fixed-width feature matrix, and turns default probabilities into
//! approve/refuse decisions under an asymmetric business cost.
//!
//! Modules:
//! - `table`: Typed columnar tables, joins and CSV/record loading
//! - `aggregate`: Per-entity numeric roll-ups of history tables
//! - `merge`: Multi-source feature assembly onto the application tables
//! - `preprocess`: Fit/transform cleaning, imputation, encoding and alignment
//! - `threshold`: Business-cost threshold calibration
//! - `decision`: Probability-to-decision rule
//! - `gbdt`: Classifier capability and boosted-tree inference
//! - `serving`: Scoring service over persisted artifacts
//! - `drift`: Reference vs current data drift report
//! - `artifacts`, `serde_canon`: Hashed artifact persistence
//! - `config`, `log`: Layered configuration and stage timing

pub mod aggregate;
pub mod artifacts;
pub mod config;
pub mod decision;
pub mod drift;
pub mod errors;
pub mod gbdt;
pub mod log;
pub mod matrix;
pub mod merge;
pub mod preprocess;
pub mod serde_canon;
pub mod serving;
pub mod table;
pub mod threshold;

pub use aggregate::aggregate;
pub use artifacts::ArtifactStore;
pub use config::ScoringConfig;
pub use decision::{decide, Decision};
pub use drift::{DriftDetector, DriftReport};
pub use errors::{Result, ScoringError};
pub use gbdt::{Classifier, GbdtModel, PriorModel};
pub use matrix::FeatureMatrix;
pub use merge::{AuxiliarySource, TableMerger};
pub use preprocess::{Preprocessor, PreprocessorState};
pub use serving::{ScoringResponse, ScoringService};
pub use table::{Column, ColumnData, ColumnKind, KeyValue, Record, Table};
pub use threshold::{CostWeights, ThresholdArtifact, ThresholdCalibrator, ThresholdSearch};

/// Crate version string for reports and artifacts
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
