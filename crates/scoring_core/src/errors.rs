//! Error types for the scoring core

use thiserror::Error;

/// Errors that can occur while building features, preprocessing,
/// calibrating or serving.
#[derive(Error, Debug)]
pub enum ScoringError {
    /// A required column is absent or a table is structurally inconsistent
    #[error("Schema error: {0}")]
    Schema(String),

    /// A fitted component was used before `fit` or artifact load
    #[error("Not fitted: {0}")]
    NotFitted(String),

    /// Malformed input (empty or mismatched arrays, wrong feature layout)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// An artifact could not be written or read back
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Configuration could not be assembled or is inconsistent
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// CSV decoding error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl From<config::ConfigError> for ScoringError {
    fn from(err: config::ConfigError) -> Self {
        ScoringError::Config(err.to_string())
    }
}

/// Result type for scoring core operations
pub type Result<T> = std::result::Result<T, ScoringError>;
