//! File-based artifact persistence
//!
//! Each artifact is written as canonical JSON to `<dir>/<name>.json` with
//! its BLAKE3 digest next to it in `<dir>/<name>.hash`. Loading verifies the
//! digest whenever the sidecar exists.

use crate::errors::{Result, ScoringError};
use crate::serde_canon::{hash_bytes_hex, to_canonical_json};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Fitted preprocessing state
pub const PREPROCESSOR_ARTIFACT: &str = "preprocessor";
/// Trained classifier
pub const MODEL_ARTIFACT: &str = "model";
/// Calibrated decision threshold
pub const THRESHOLD_ARTIFACT: &str = "threshold";

/// Directory holding the training/serving contract artifacts
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn json_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.json"))
    }

    pub fn hash_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.hash"))
    }

    pub fn exists(&self, name: &str) -> bool {
        self.json_path(name).exists()
    }

    /// Persist `value` under `name`, returning its digest.
    pub fn save<T: Serialize>(&self, name: &str, value: &T) -> Result<String> {
        let persist = |context: &str, err: &dyn std::fmt::Display| {
            ScoringError::Persistence(format!("{context} for artifact '{name}': {err}"))
        };

        fs::create_dir_all(&self.dir)
            .map_err(|e| persist(&format!("cannot create {}", self.dir.display()), &e))?;

        let json = to_canonical_json(value).map_err(|e| persist("cannot serialize", &e))?;
        let digest = hash_bytes_hex(json.as_bytes());

        let json_path = self.json_path(name);
        fs::write(&json_path, &json)
            .map_err(|e| persist(&format!("cannot write {}", json_path.display()), &e))?;
        fs::write(self.hash_path(name), &digest)
            .map_err(|e| persist("cannot write digest", &e))?;

        info!(artifact = name, path = %json_path.display(), hash = %digest, "artifact saved");
        Ok(digest)
    }

    /// Load `name`, verifying its digest when one was written.
    pub fn load<T: DeserializeOwned>(&self, name: &str) -> Result<T> {
        let json_path = self.json_path(name);
        let json = fs::read_to_string(&json_path).map_err(|e| {
            ScoringError::Persistence(format!(
                "cannot read artifact '{name}' from {}: {e}",
                json_path.display()
            ))
        })?;

        let hash_path = self.hash_path(name);
        if hash_path.exists() {
            let expected = fs::read_to_string(&hash_path).map_err(|e| {
                ScoringError::Persistence(format!("cannot read digest of '{name}': {e}"))
            })?;
            let actual = hash_bytes_hex(json.as_bytes());
            if expected.trim() != actual {
                return Err(ScoringError::Persistence(format!(
                    "digest mismatch for artifact '{name}': expected {}, found {actual}",
                    expected.trim()
                )));
            }
        } else {
            debug!(artifact = name, "no digest sidecar, skipping verification");
        }

        serde_json::from_str(&json).map_err(|e| {
            ScoringError::Persistence(format!("cannot decode artifact '{name}': {e}"))
        })
    }
}
