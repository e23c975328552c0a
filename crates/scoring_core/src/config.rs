//! Scoring pipeline configuration
//!
//! Defaults are built in; a TOML file and `CREDIT_SCORING_*` environment
//! variables are layered on top with the `config` crate. Nested keys use a
//! double underscore, e.g. `CREDIT_SCORING_THRESHOLD__WEIGHT_FALSE_NEGATIVE=10`.

use crate::errors::{Result, ScoringError};
use crate::threshold::{linspace, CostWeights};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

/// Environment variable prefix for overrides
pub const ENV_PREFIX: &str = "CREDIT_SCORING";

/// Complete pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ScoringConfig {
    pub paths: PathsConfig,
    pub schema: SchemaConfig,
    pub preprocess: PreprocessConfig,
    pub threshold: ThresholdConfig,
    pub training: TrainingConfig,
}

/// Filesystem locations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Raw CSV tables
    pub data_dir: PathBuf,
    /// Persisted preprocessor, model and threshold
    pub models_dir: PathBuf,
    /// Monitoring reports
    pub reports_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            models_dir: PathBuf::from("models"),
            reports_dir: PathBuf::from("report"),
        }
    }
}

/// Names of the structural columns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemaConfig {
    pub entity_key: String,
    pub target_column: String,
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            entity_key: "SK_ID_CURR".to_string(),
            target_column: "TARGET".to_string(),
        }
    }
}

/// Cleaning and imputation constants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessConfig {
    /// Placeholder value replaced by missing before anything else.
    /// 365243 is the out-of-range day offset used by the source data.
    pub sentinel_value: Option<f64>,
    /// Fill value for categorical columns
    pub missing_category: String,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            sentinel_value: Some(365_243.0),
            missing_category: "Unknown".to_string(),
        }
    }
}

/// Business cost weights and candidate threshold grid
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdConfig {
    pub weight_false_negative: f64,
    pub weight_false_positive: f64,
    pub grid_start: f64,
    pub grid_end: f64,
    pub grid_points: usize,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            weight_false_negative: 5.0,
            weight_false_positive: 1.0,
            grid_start: 0.05,
            grid_end: 0.5,
            grid_points: 50,
        }
    }
}

impl ThresholdConfig {
    pub fn weights(&self) -> CostWeights {
        CostWeights::new(self.weight_false_negative, self.weight_false_positive)
    }

    pub fn candidates(&self) -> Vec<f64> {
        linspace(self.grid_start, self.grid_end, self.grid_points)
    }
}

/// Holdout split and boosted-tree parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub holdout_fraction: f64,
    pub seed: u64,
    pub num_trees: usize,
    pub max_depth: usize,
    pub min_samples_leaf: usize,
    pub learning_rate: f64,
    pub max_bins: usize,
    pub subsample: f64,
    pub l2_regularization: f64,
    pub balanced_classes: bool,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            holdout_fraction: 0.2,
            seed: 42,
            num_trees: 200,
            max_depth: 6,
            min_samples_leaf: 20,
            learning_rate: 0.1,
            max_bins: 32,
            subsample: 0.8,
            l2_regularization: 1.0,
            balanced_classes: true,
        }
    }
}

impl ScoringConfig {
    /// Load defaults, then `path` (if given, it must exist), then the
    /// environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            if !path.exists() {
                return Err(ScoringError::Config(format!(
                    "configuration file {} not found",
                    path.display()
                )));
            }
            builder = builder.add_source(File::from(path));
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: ScoringConfig = builder.build()?.try_deserialize()?;
        config.validate()?;

        info!(
            data_dir = %config.paths.data_dir.display(),
            models_dir = %config.paths.models_dir.display(),
            "configuration loaded"
        );
        Ok(config)
    }

    /// Reject values that would make the pipeline meaningless.
    pub fn validate(&self) -> Result<()> {
        let t = &self.threshold;
        if !(t.weight_false_negative > 0.0 && t.weight_false_positive > 0.0) {
            return Err(ScoringError::Config(
                "cost weights must be strictly positive".into(),
            ));
        }
        if t.grid_points == 0 || t.grid_start > t.grid_end {
            return Err(ScoringError::Config(format!(
                "invalid threshold grid [{}, {}] with {} points",
                t.grid_start, t.grid_end, t.grid_points
            )));
        }
        if !(t.grid_start >= 0.0 && t.grid_end <= 1.0) {
            return Err(ScoringError::Config(
                "threshold grid must lie within [0, 1]".into(),
            ));
        }

        let h = self.training.holdout_fraction;
        if !(h > 0.0 && h < 1.0) {
            return Err(ScoringError::Config(format!(
                "holdout_fraction must be in (0, 1), got {h}"
            )));
        }
        if self.training.num_trees == 0 || self.training.max_bins < 2 {
            return Err(ScoringError::Config(
                "num_trees must be positive and max_bins at least 2".into(),
            ));
        }
        if !(self.training.subsample > 0.0 && self.training.subsample <= 1.0) {
            return Err(ScoringError::Config(
                "subsample must be in (0, 1]".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = ScoringConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.preprocess.sentinel_value, Some(365_243.0));
        assert_eq!(config.threshold.candidates().len(), 50);
    }

    #[test]
    fn test_file_overrides_defaults() -> anyhow::Result<()> {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile()?;
        writeln!(file, "[threshold]")?;
        writeln!(file, "weight_false_negative = 10.0")?;
        writeln!(file, "[schema]")?;
        writeln!(file, "target_column = \"DEFAULTED\"")?;
        file.flush()?;

        let config = ScoringConfig::load(Some(file.path()))?;
        assert_eq!(config.threshold.weight_false_negative, 10.0);
        assert_eq!(config.threshold.weight_false_positive, 1.0);
        assert_eq!(config.schema.target_column, "DEFAULTED");
        assert_eq!(config.schema.entity_key, "SK_ID_CURR");
        Ok(())
    }

    #[test]
    fn test_explicit_missing_file_is_an_error() {
        let err = ScoringConfig::load(Some(Path::new("/definitely/not/here.toml")));
        assert!(matches!(err, Err(ScoringError::Config(_))));
    }

    #[test]
    fn test_rejects_bad_holdout_fraction() {
        let mut config = ScoringConfig::default();
        config.training.holdout_fraction = 1.0;
        assert!(config.validate().is_err());
    }
}
