//! Data drift between a reference table (training data) and current data
//!
//! Numeric columns are compared with the two-sample Kolmogorov-Smirnov test,
//! categorical columns with the Jensen-Shannon distance between category
//! frequencies. Missing values are ignored by both tests.

use crate::errors::{Result, ScoringError};
use crate::log::StageTimer;
use crate::table::{ColumnData, ColumnKind, Table};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const DRIFT_REPORT_FILE: &str = "data_drift_report.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftTest {
    KolmogorovSmirnov,
    JensenShannon,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDrift {
    pub column: String,
    pub kind: ColumnKind,
    pub test: DriftTest,
    /// KS statistic or JS distance
    pub statistic: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub p_value: Option<f64>,
    pub threshold: f64,
    pub drift_detected: bool,
    pub reference_missing_share: f64,
    pub current_missing_share: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftReport {
    pub generated_at: String,
    pub reference_rows: usize,
    pub current_rows: usize,
    pub columns: Vec<ColumnDrift>,
    /// Common columns that could not be tested (kind mismatch or no data)
    pub skipped: Vec<String>,
    pub number_of_drifted_columns: usize,
    pub share_of_drifted_columns: f64,
    pub dataset_drift: bool,
}

impl DriftReport {
    pub fn drifted_columns(&self) -> impl Iterator<Item = &str> {
        self.columns
            .iter()
            .filter(|c| c.drift_detected)
            .map(|c| c.column.as_str())
    }

    /// Write the report as pretty JSON into `dir`, returning the file path.
    pub fn write_to_dir(&self, dir: &Path) -> Result<PathBuf> {
        fs::create_dir_all(dir)?;
        let path = dir.join(DRIFT_REPORT_FILE);
        fs::write(&path, serde_json::to_string_pretty(self)?)?;
        info!(path = %path.display(), "drift report written");
        Ok(path)
    }
}

/// Drift test configuration
#[derive(Debug, Clone, PartialEq)]
pub struct DriftDetector {
    /// KS drift when the p-value falls below this
    pub ks_p_value: f64,
    /// JS drift when the distance reaches this
    pub js_threshold: f64,
    /// Dataset drift when this share of columns drifted
    pub drift_share: f64,
    excluded: HashSet<String>,
}

impl Default for DriftDetector {
    fn default() -> Self {
        Self {
            ks_p_value: 0.05,
            js_threshold: 0.1,
            drift_share: 0.5,
            excluded: HashSet::new(),
        }
    }
}

impl DriftDetector {
    /// Skip identifier and label columns.
    pub fn excluding<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.excluded.extend(columns.into_iter().map(Into::into));
        self
    }

    pub fn compare(&self, reference: &Table, current: &Table) -> Result<DriftReport> {
        let _timer = StageTimer::start("drift detection");

        let common: Vec<&str> = reference
            .column_names()
            .into_iter()
            .filter(|name| current.contains(name) && !self.excluded.contains(*name))
            .collect();
        if common.is_empty() {
            return Err(ScoringError::InvalidInput(
                "reference and current data share no columns".into(),
            ));
        }

        let mut columns = Vec::new();
        let mut skipped = Vec::new();
        for name in common {
            let (Some(left), Some(right)) = (reference.column(name), current.column(name)) else {
                continue;
            };
            match self.compare_column(name, &left.data, &right.data) {
                Some(result) => {
                    debug!(
                        column = name,
                        statistic = result.statistic,
                        drift = result.drift_detected,
                        "column compared"
                    );
                    columns.push(result);
                }
                None => skipped.push(name.to_string()),
            }
        }

        let drifted = columns.iter().filter(|c| c.drift_detected).count();
        let share = if columns.is_empty() {
            0.0
        } else {
            drifted as f64 / columns.len() as f64
        };
        let report = DriftReport {
            generated_at: Utc::now().to_rfc3339(),
            reference_rows: reference.n_rows(),
            current_rows: current.n_rows(),
            number_of_drifted_columns: drifted,
            share_of_drifted_columns: share,
            dataset_drift: !columns.is_empty() && share >= self.drift_share,
            columns,
            skipped,
        };

        info!(
            tested = report.columns.len(),
            drifted,
            share,
            dataset_drift = report.dataset_drift,
            "drift comparison complete"
        );
        Ok(report)
    }

    fn compare_column(
        &self,
        name: &str,
        reference: &ColumnData,
        current: &ColumnData,
    ) -> Option<ColumnDrift> {
        let reference_missing_share = missing_share(reference);
        let current_missing_share = missing_share(current);

        match (reference, current) {
            (ColumnData::Numeric(a), ColumnData::Numeric(b)) => {
                let a: Vec<f64> = a.iter().flatten().copied().filter(|v| !v.is_nan()).collect();
                let b: Vec<f64> = b.iter().flatten().copied().filter(|v| !v.is_nan()).collect();
                if a.is_empty() || b.is_empty() {
                    return None;
                }
                let (n, m) = (a.len(), b.len());
                let statistic = ks_statistic(a, b);
                let p_value = ks_p_value(statistic, n, m);
                Some(ColumnDrift {
                    column: name.to_string(),
                    kind: ColumnKind::Numeric,
                    test: DriftTest::KolmogorovSmirnov,
                    statistic,
                    p_value: Some(p_value),
                    threshold: self.ks_p_value,
                    drift_detected: p_value < self.ks_p_value,
                    reference_missing_share,
                    current_missing_share,
                })
            }
            (ColumnData::Categorical(a), ColumnData::Categorical(b)) => {
                let a = frequencies(a);
                let b = frequencies(b);
                if a.is_empty() || b.is_empty() {
                    return None;
                }
                let statistic = jensen_shannon_distance(&a, &b);
                Some(ColumnDrift {
                    column: name.to_string(),
                    kind: ColumnKind::Categorical,
                    test: DriftTest::JensenShannon,
                    statistic,
                    p_value: None,
                    threshold: self.js_threshold,
                    drift_detected: statistic >= self.js_threshold,
                    reference_missing_share,
                    current_missing_share,
                })
            }
            _ => None,
        }
    }
}

fn missing_share(data: &ColumnData) -> f64 {
    if data.is_empty() {
        0.0
    } else {
        data.missing_count() as f64 / data.len() as f64
    }
}

/// Largest gap between the two empirical CDFs.
pub fn ks_statistic(mut a: Vec<f64>, mut b: Vec<f64>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    a.sort_by(f64::total_cmp);
    b.sort_by(f64::total_cmp);
    let (n, m) = (a.len() as f64, b.len() as f64);
    let (mut i, mut j) = (0usize, 0usize);
    let mut d: f64 = 0.0;
    while i < a.len() && j < b.len() {
        let v = a[i].min(b[j]);
        while i < a.len() && a[i] <= v {
            i += 1;
        }
        while j < b.len() && b[j] <= v {
            j += 1;
        }
        d = d.max((i as f64 / n - j as f64 / m).abs());
    }
    d
}

/// Asymptotic two-sided p-value of a KS statistic for sample sizes n, m.
pub fn ks_p_value(statistic: f64, n: usize, m: usize) -> f64 {
    if n == 0 || m == 0 {
        return 1.0;
    }
    let en = ((n * m) as f64 / (n + m) as f64).sqrt();
    let lambda = (en + 0.12 + 0.11 / en) * statistic;
    kolmogorov_survival(lambda)
}

/// Q_KS(λ) = 2 Σ (-1)^(j-1) exp(-2 j² λ²)
fn kolmogorov_survival(lambda: f64) -> f64 {
    // the series converges too slowly near zero, where Q_KS is 1 anyway
    if lambda < 0.2 {
        return 1.0;
    }
    let mut sum = 0.0;
    let mut sign = 1.0;
    for j in 1..=100 {
        let j = j as f64;
        let term = sign * 2.0 * (-2.0 * j * j * lambda * lambda).exp();
        sum += term;
        if term.abs() < 1e-12 {
            break;
        }
        sign = -sign;
    }
    sum.clamp(0.0, 1.0)
}

fn frequencies(values: &[Option<String>]) -> BTreeMap<&str, f64> {
    let mut counts: BTreeMap<&str, f64> = BTreeMap::new();
    for value in values.iter().flatten() {
        *counts.entry(value.as_str()).or_insert(0.0) += 1.0;
    }
    let total: f64 = counts.values().sum();
    for count in counts.values_mut() {
        *count /= total;
    }
    counts
}

/// Square root of the JS divergence (natural log), in [0, sqrt(ln 2)].
pub fn jensen_shannon_distance(p: &BTreeMap<&str, f64>, q: &BTreeMap<&str, f64>) -> f64 {
    let categories: HashSet<&str> = p.keys().chain(q.keys()).copied().collect();
    let mut divergence = 0.0;
    for category in categories {
        let pi = p.get(category).copied().unwrap_or(0.0);
        let qi = q.get(category).copied().unwrap_or(0.0);
        let mi = 0.5 * (pi + qi);
        if pi > 0.0 {
            divergence += 0.5 * pi * (pi / mi).ln();
        }
        if qi > 0.0 {
            divergence += 0.5 * qi * (qi / mi).ln();
        }
    }
    divergence.max(0.0).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::Column;

    fn numeric(values: impl Iterator<Item = f64>) -> Vec<Option<f64>> {
        values.map(Some).collect()
    }

    fn categorical(values: &[&str]) -> Vec<Option<String>> {
        values.iter().map(|v| Some(v.to_string())).collect()
    }

    #[test]
    fn test_ks_statistic_of_identical_and_disjoint_samples() {
        let a: Vec<f64> = (0..50).map(f64::from).collect();
        assert_eq!(ks_statistic(a.clone(), a.clone()), 0.0);
        let shifted: Vec<f64> = (100..150).map(f64::from).collect();
        assert_eq!(ks_statistic(a, shifted), 1.0);
        assert_eq!(ks_statistic(vec![1.0, 2.0], vec![2.0, 3.0]), 0.5);
    }

    #[test]
    fn test_ks_p_value_bounds() {
        assert_eq!(ks_p_value(0.0, 100, 100), 1.0);
        assert!(ks_p_value(1.0, 100, 100) < 1e-10);
        let mid = ks_p_value(0.15, 100, 100);
        assert!(mid > 0.05 && mid < 0.5, "p = {mid}");
    }

    #[test]
    fn test_js_distance_range() {
        let p: BTreeMap<&str, f64> = [("a", 0.5), ("b", 0.5)].into_iter().collect();
        let q: BTreeMap<&str, f64> = [("c", 1.0)].into_iter().collect();
        assert_eq!(jensen_shannon_distance(&p, &p), 0.0);
        let max = jensen_shannon_distance(&p, &q);
        assert!((max - std::f64::consts::LN_2.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_report_flags_shifted_columns() {
        let reference = Table::new(vec![
            Column::numeric("SK_ID_CURR", numeric((0..100).map(f64::from))),
            Column::numeric("AMT", numeric((0..100).map(f64::from))),
            Column::numeric("AGE", numeric((0..100).map(|v| f64::from(v % 10)))),
            Column::categorical("TYPE", categorical(&["a"; 100])),
        ])
        .unwrap();
        let current = Table::new(vec![
            Column::numeric("SK_ID_CURR", numeric((100..200).map(f64::from))),
            Column::numeric("AMT", numeric((500..600).map(f64::from))),
            Column::numeric("AGE", numeric((0..100).map(|v| f64::from(v % 10)))),
            Column::categorical("TYPE", categorical(&["b"; 100])),
            Column::numeric("NEW", numeric((0..100).map(f64::from))),
        ])
        .unwrap();

        let report = DriftDetector::default()
            .excluding(["SK_ID_CURR"])
            .compare(&reference, &current)
            .unwrap();

        assert_eq!(report.columns.len(), 3);
        let drifted: Vec<&str> = report.drifted_columns().collect();
        assert_eq!(drifted, vec!["AMT", "TYPE"]);
        assert!(report.dataset_drift);
        assert!((report.share_of_drifted_columns - 2.0 / 3.0).abs() < 1e-12);

        let dir = tempfile::tempdir().unwrap();
        let path = report.write_to_dir(dir.path()).unwrap();
        let back: DriftReport = serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(back.number_of_drifted_columns, 2);
    }

    #[test]
    fn test_kind_mismatch_and_empty_columns_are_skipped() {
        let reference = Table::new(vec![
            Column::numeric("A", numeric([1.0, 2.0].into_iter())),
            Column::numeric("B", vec![None, None]),
        ])
        .unwrap();
        let current = Table::new(vec![
            Column::categorical("A", categorical(&["x", "y"])),
            Column::numeric("B", numeric([1.0, 2.0].into_iter())),
        ])
        .unwrap();
        let report = DriftDetector::default().compare(&reference, &current).unwrap();
        assert!(report.columns.is_empty());
        assert_eq!(report.skipped, vec!["A".to_string(), "B".to_string()]);
        assert!(!report.dataset_drift);
    }

    #[test]
    fn test_no_common_columns_is_an_error() {
        let reference = Table::new(vec![Column::numeric("A", vec![Some(1.0)])]).unwrap();
        let current = Table::new(vec![Column::numeric("B", vec![Some(1.0)])]).unwrap();
        assert!(matches!(
            DriftDetector::default().compare(&reference, &current),
            Err(ScoringError::InvalidInput(_))
        ));
    }
}
