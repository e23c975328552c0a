//! Fit/transform preprocessing with train/serve column alignment
//!
//! `fit` learns, from a reference table only:
//! - which columns are numeric and which are categorical,
//! - an imputation value per column (mean, or a fixed category),
//! - the exact ordered list of encoded output columns.
//!
//! `transform` replays the same cleaning, imputation and indicator encoding
//! on any table and then aligns the result to the fitted column list, so its
//! output layout never depends on the content of the table being scored.

use crate::artifacts::{ArtifactStore, PREPROCESSOR_ARTIFACT};
use crate::config::PreprocessConfig;
use crate::errors::{Result, ScoringError};
use crate::log::StageTimer;
use crate::matrix::FeatureMatrix;
use crate::table::{Column, ColumnData, ColumnKind, Table};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use tracing::{debug, info};

/// Learned fill value of a column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ImputationValue {
    Number(f64),
    Category(String),
}

/// Everything `fit` learns. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreprocessorState {
    pub numeric_features: Vec<String>,
    pub categorical_features: Vec<String>,
    pub imputation_values: BTreeMap<String, ImputationValue>,
    pub final_columns: Vec<String>,
    /// Fitted column each entry of `final_columns` is encoded from
    pub column_sources: Vec<String>,
    pub sentinel_value: Option<f64>,
    pub missing_category: String,
}

impl PreprocessorState {
    fn kind_of(&self, name: &str) -> Option<ColumnKind> {
        if self.numeric_features.iter().any(|c| c == name) {
            Some(ColumnKind::Numeric)
        } else if self.categorical_features.iter().any(|c| c == name) {
            Some(ColumnKind::Categorical)
        } else {
            None
        }
    }
}

/// Stateful preprocessor: `Unfit` until [`Preprocessor::fit`] succeeds.
#[derive(Debug, Clone)]
pub struct Preprocessor {
    config: PreprocessConfig,
    state: Option<PreprocessorState>,
}

impl Preprocessor {
    pub fn new(config: PreprocessConfig) -> Self {
        Self {
            config,
            state: None,
        }
    }

    /// Rebuild a fitted preprocessor from persisted state.
    pub fn from_state(state: PreprocessorState) -> Self {
        let config = PreprocessConfig {
            sentinel_value: state.sentinel_value,
            missing_category: state.missing_category.clone(),
        };
        Self {
            config,
            state: Some(state),
        }
    }

    pub fn is_fitted(&self) -> bool {
        self.state.is_some()
    }

    pub fn state(&self) -> Option<&PreprocessorState> {
        self.state.as_ref()
    }

    pub fn final_columns(&self) -> Result<&[String]> {
        Ok(&self.fitted()?.final_columns)
    }

    fn fitted(&self) -> Result<&PreprocessorState> {
        self.state.as_ref().ok_or_else(|| {
            ScoringError::NotFitted("preprocessor must be fitted before transform".into())
        })
    }

    /// Learn cleaning, imputation and encoding parameters from `reference`.
    ///
    /// Refitting replaces the previous state entirely.
    pub fn fit(&mut self, reference: &Table) -> Result<()> {
        let _timer = StageTimer::start("preprocessor fit");

        if reference.n_rows() == 0 {
            return Err(ScoringError::InvalidInput(
                "cannot fit preprocessor on an empty table".into(),
            ));
        }

        let sentinel = self.config.sentinel_value;
        let columns = clean(reference, sentinel, &HashSet::new());
        let dropped = reference.n_cols() - columns.len();

        let mut numeric_features = Vec::new();
        let mut categorical_features = Vec::new();
        let mut imputation_values = BTreeMap::new();

        for column in &columns {
            match &column.data {
                ColumnData::Numeric(values) => {
                    let observed: Vec<f64> = values.iter().flatten().copied().collect();
                    // all-missing columns were dropped, so `observed` is non-empty
                    let mean = observed.iter().sum::<f64>() / observed.len() as f64;
                    numeric_features.push(column.name.clone());
                    imputation_values.insert(column.name.clone(), ImputationValue::Number(mean));
                }
                ColumnData::Categorical(_) => {
                    categorical_features.push(column.name.clone());
                    imputation_values.insert(
                        column.name.clone(),
                        ImputationValue::Category(self.config.missing_category.clone()),
                    );
                }
            }
        }

        let imputed = impute(columns, &imputation_values);
        let encoded = encode(&imputed, reference.n_rows(), Baseline::DropFirst);

        let mut owners: HashMap<&str, &str> = HashMap::with_capacity(encoded.len());
        for column in &encoded {
            if let Some(first) = owners.insert(column.name.as_str(), column.source.as_str()) {
                return Err(ScoringError::Schema(format!(
                    "encoded column '{}' is produced by both '{first}' and '{}'",
                    column.name, column.source
                )));
            }
        }
        let (final_columns, column_sources): (Vec<String>, Vec<String>) = encoded
            .into_iter()
            .map(|column| (column.name, column.source))
            .unzip();

        info!(
            numeric = numeric_features.len(),
            categorical = categorical_features.len(),
            dropped_all_missing = dropped,
            encoded_columns = final_columns.len(),
            "preprocessor fitted"
        );

        self.state = Some(PreprocessorState {
            numeric_features,
            categorical_features,
            imputation_values,
            final_columns,
            column_sources,
            sentinel_value: sentinel,
            missing_category: self.config.missing_category.clone(),
        });
        Ok(())
    }

    pub fn fit_transform(&mut self, reference: &Table) -> Result<FeatureMatrix> {
        self.fit(reference)?;
        self.transform(reference)
    }

    /// Apply the fitted parameters to `table`.
    ///
    /// The output columns are exactly `final_columns`, in order: encoded
    /// columns the table does not produce are filled with 0, anything else
    /// is discarded.
    pub fn transform(&self, table: &Table) -> Result<FeatureMatrix> {
        let state = self.fitted()?;
        let n_rows = table.n_rows();

        // fitted columns survive even when entirely missing here so that
        // imputation, not zero-filling, applies to them
        let fitted: HashSet<&str> = state
            .numeric_features
            .iter()
            .chain(&state.categorical_features)
            .map(String::as_str)
            .collect();

        let columns: Vec<Column> = clean(table, state.sentinel_value, &fitted)
            .into_iter()
            .filter(|column| fitted.contains(column.name.as_str()))
            .map(|column| match state.kind_of(&column.name) {
                Some(kind) => coerce(column, kind),
                None => column,
            })
            .collect();

        let imputed = impute(columns, &state.imputation_values);
        let encoded = encode(&imputed, n_rows, Baseline::KeepAll);

        // an unseen or baseline level may collide with another column's
        // indicator name, so values are matched on source and name
        let produced: HashMap<(&str, &str), &Vec<f64>> = encoded
            .iter()
            .map(|column| ((column.source.as_str(), column.name.as_str()), &column.values))
            .collect();

        let zeros = vec![0.0; n_rows];
        let mut filled = 0usize;
        let aligned: Vec<&Vec<f64>> = state
            .final_columns
            .iter()
            .zip(&state.column_sources)
            .map(|(name, source)| {
                produced
                    .get(&(source.as_str(), name.as_str()))
                    .copied()
                    .unwrap_or_else(|| {
                        filled += 1;
                        &zeros
                    })
            })
            .collect();
        let used = state.final_columns.len() - filled;

        let rows = (0..n_rows)
            .map(|row| aligned.iter().map(|values| values[row]).collect())
            .collect();

        debug!(
            rows = n_rows,
            zero_filled = filled,
            discarded = encoded.len().saturating_sub(used),
            "aligned to fitted columns"
        );
        FeatureMatrix::new(state.final_columns.clone(), rows)
    }

    /// Persist the fitted state.
    pub fn save(&self, store: &ArtifactStore) -> Result<String> {
        store.save(PREPROCESSOR_ARTIFACT, self.fitted()?)
    }

    /// Load a fitted preprocessor.
    pub fn load(store: &ArtifactStore) -> Result<Self> {
        let state: PreprocessorState = store.load(PREPROCESSOR_ARTIFACT)?;
        if state.column_sources.len() != state.final_columns.len() {
            return Err(ScoringError::Persistence(format!(
                "stored preprocessor has {} column sources for {} columns",
                state.column_sources.len(),
                state.final_columns.len()
            )));
        }
        Ok(Self::from_state(state))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Baseline {
    /// Skip the lexicographically first level of each categorical column
    DropFirst,
    /// One indicator per observed level; alignment removes the baseline
    KeepAll,
}

/// Replace the sentinel with missing, then drop all-missing columns that
/// are not in `keep`.
fn clean(table: &Table, sentinel: Option<f64>, keep: &HashSet<&str>) -> Vec<Column> {
    table
        .columns()
        .iter()
        .map(|column| match (&column.data, sentinel) {
            (ColumnData::Numeric(values), Some(sentinel)) => Column::numeric(
                column.name.clone(),
                values
                    .iter()
                    .map(|v| v.filter(|&x| x != sentinel))
                    .collect(),
            ),
            _ => column.clone(),
        })
        .filter(|column| !column.data.is_all_missing() || keep.contains(column.name.as_str()))
        .collect()
}

/// Convert a column to the kind it had at fit time.
fn coerce(column: Column, kind: ColumnKind) -> Column {
    match (column.data, kind) {
        (ColumnData::Categorical(values), ColumnKind::Numeric) => Column::numeric(
            column.name,
            values
                .into_iter()
                .map(|v| v.and_then(|s| s.trim().parse::<f64>().ok()))
                .collect(),
        ),
        (ColumnData::Numeric(values), ColumnKind::Categorical) => Column::categorical(
            column.name,
            values.into_iter().map(|v| v.map(|x| x.to_string())).collect(),
        ),
        (data, _) => Column {
            name: column.name,
            data,
        },
    }
}

/// Fill missing cells from `values`; columns without an entry, or whose
/// entry has the wrong kind, are left as they are.
fn impute(columns: Vec<Column>, values: &BTreeMap<String, ImputationValue>) -> Vec<Column> {
    columns
        .into_iter()
        .map(|column| match (column.data, values.get(&column.name)) {
            (ColumnData::Numeric(cells), Some(ImputationValue::Number(fill))) => Column::numeric(
                column.name,
                cells.into_iter().map(|v| Some(v.unwrap_or(*fill))).collect(),
            ),
            (ColumnData::Categorical(cells), Some(ImputationValue::Category(fill))) => {
                Column::categorical(
                    column.name,
                    cells
                        .into_iter()
                        .map(|v| Some(v.unwrap_or_else(|| fill.clone())))
                        .collect(),
                )
            }
            (data, _) => Column {
                name: column.name,
                data,
            },
        })
        .collect()
}

/// One output column and the input column it was encoded from
#[derive(Debug)]
struct Encoded {
    source: String,
    name: String,
    values: Vec<f64>,
}

/// Numeric columns first (in order), then one indicator column per level
/// of each categorical column, levels sorted lexicographically and named
/// `{column}_{level}`. Remaining missing numeric cells become NaN.
fn encode(columns: &[Column], n_rows: usize, baseline: Baseline) -> Vec<Encoded> {
    let mut encoded = Vec::with_capacity(columns.len());

    for column in columns {
        if let ColumnData::Numeric(values) = &column.data {
            encoded.push(Encoded {
                source: column.name.clone(),
                name: column.name.clone(),
                values: values.iter().map(|v| v.unwrap_or(f64::NAN)).collect(),
            });
        }
    }

    for column in columns {
        let ColumnData::Categorical(values) = &column.data else {
            continue;
        };
        let levels: BTreeSet<&str> = values.iter().flatten().map(String::as_str).collect();
        let skip = usize::from(baseline == Baseline::DropFirst);

        for level in levels.into_iter().skip(skip) {
            let indicator = (0..n_rows)
                .map(|row| {
                    if values[row].as_deref() == Some(level) {
                        1.0
                    } else {
                        0.0
                    }
                })
                .collect();
            encoded.push(Encoded {
                source: column.name.clone(),
                name: format!("{}_{}", column.name, level),
                values: indicator,
            });
        }
    }

    encoded
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference() -> Table {
        Table::new(vec![
            Column::numeric("A", vec![Some(1.0), Some(2.0), None, Some(4.0)]),
            Column::categorical(
                "B",
                vec![
                    Some("x".into()),
                    Some("y".into()),
                    Some("x".into()),
                    Some("z".into()),
                ],
            ),
        ])
        .unwrap()
    }

    fn fitted() -> Preprocessor {
        let mut pre = Preprocessor::new(PreprocessConfig::default());
        pre.fit(&reference()).unwrap();
        pre
    }

    #[test]
    fn test_transform_before_fit_fails() {
        let pre = Preprocessor::new(PreprocessConfig::default());
        assert!(matches!(
            pre.transform(&reference()),
            Err(ScoringError::NotFitted(_))
        ));
        assert!(pre.final_columns().is_err());
    }

    #[test]
    fn test_learns_mean_and_drops_first_level() {
        let pre = fitted();
        let state = pre.state().unwrap();

        match state.imputation_values.get("A") {
            Some(ImputationValue::Number(mean)) => assert!((mean - 7.0 / 3.0).abs() < 1e-12),
            other => panic!("unexpected imputation {other:?}"),
        }
        assert_eq!(
            state.imputation_values.get("B"),
            Some(&ImputationValue::Category("Unknown".into()))
        );
        assert_eq!(state.final_columns, vec!["A", "B_y", "B_z"]);
    }

    #[test]
    fn test_unseen_category_and_missing_numeric() {
        let pre = fitted();
        let row = Table::new(vec![
            Column::numeric("A", vec![None]),
            Column::categorical("B", vec![Some("q".into())]),
        ])
        .unwrap();

        let out = pre.transform(&row).unwrap();
        assert_eq!(out.columns(), pre.final_columns().unwrap());
        let values = out.row(0).unwrap();
        assert!((values[0] - 7.0 / 3.0).abs() < 1e-12);
        assert_eq!(&values[1..], &[0.0, 0.0]);
    }

    #[test]
    fn test_sentinel_is_missing_and_all_missing_columns_drop() {
        let table = Table::new(vec![
            Column::numeric("DAYS_EMPLOYED", vec![Some(-100.0), Some(365_243.0), Some(-300.0)]),
            Column::numeric("EMPTY", vec![None, None, None]),
            Column::numeric("ONLY_SENTINEL", vec![Some(365_243.0), None, Some(365_243.0)]),
        ])
        .unwrap();

        let mut pre = Preprocessor::new(PreprocessConfig::default());
        let out = pre.fit_transform(&table).unwrap();

        assert_eq!(out.columns(), &["DAYS_EMPLOYED".to_string()]);
        assert_eq!(out.column_values("DAYS_EMPLOYED"), Some(vec![-100.0, -200.0, -300.0]));
    }

    #[test]
    fn test_missing_columns_are_zero_filled_and_extras_discarded() {
        let pre = fitted();
        let drifted = Table::new(vec![
            Column::categorical("B", vec![Some("z".into()), Some("x".into())]),
            Column::numeric("NEW_FEATURE", vec![Some(9.0), Some(9.0)]),
        ])
        .unwrap();

        let out = pre.transform(&drifted).unwrap();
        assert_eq!(out.columns(), pre.final_columns().unwrap());
        assert_eq!(out.rows(), &[vec![0.0, 0.0, 1.0], vec![0.0, 0.0, 0.0]]);
    }

    #[test]
    fn test_categorical_missing_uses_fill_category() {
        let mut pre = Preprocessor::new(PreprocessConfig::default());
        let table = Table::new(vec![Column::categorical(
            "C",
            vec![Some("a".into()), None, Some("b".into())],
        )])
        .unwrap();

        let out = pre.fit_transform(&table).unwrap();
        // levels: Unknown, a, b -> "Unknown" is the baseline
        assert_eq!(out.columns(), &["C_a".to_string(), "C_b".to_string()]);
        assert_eq!(out.rows()[1], vec![0.0, 0.0]);
    }

    #[test]
    fn test_coerces_to_fitted_kind() {
        let pre = fitted();
        let row = Table::new(vec![
            Column::categorical("A", vec![Some("3.5".into())]),
            Column::numeric("B", vec![None]),
        ])
        .unwrap();

        let out = pre.transform(&row).unwrap();
        assert_eq!(out.row(0), Some(&[3.5, 0.0, 0.0][..]));
    }

    #[test]
    fn test_empty_reference_is_rejected() {
        let mut pre = Preprocessor::new(PreprocessConfig::default());
        assert!(matches!(
            pre.fit(&Table::default()),
            Err(ScoringError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_state_round_trips_through_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let pre = fitted();
        pre.save(&store).unwrap();

        let loaded = Preprocessor::load(&store).unwrap();
        assert_eq!(loaded.state(), pre.state());
        assert_eq!(
            loaded.transform(&reference()).unwrap(),
            pre.transform(&reference()).unwrap()
        );
    }

    #[test]
    fn test_clashing_encoded_names_are_rejected() {
        let numeric_vs_level = Table::new(vec![
            Column::numeric("B_x", vec![Some(5.0), Some(6.0), Some(7.0)]),
            Column::categorical("B", vec![Some("w".into()), Some("x".into()), Some("x".into())]),
        ])
        .unwrap();
        let mut pre = Preprocessor::new(PreprocessConfig::default());
        let err = pre.fit(&numeric_vs_level).unwrap_err();
        assert!(matches!(err, ScoringError::Schema(_)));
        assert!(err.to_string().contains("B_x"));
        assert!(!pre.is_fitted());

        let level_vs_level = Table::new(vec![
            Column::categorical("A", vec![Some("0".into()), Some("B_x".into())]),
            Column::categorical("A_B", vec![Some("w".into()), Some("x".into())]),
        ])
        .unwrap();
        assert!(matches!(
            Preprocessor::new(PreprocessConfig::default()).fit(&level_vs_level),
            Err(ScoringError::Schema(_))
        ));
    }

    #[test]
    fn test_unseen_level_does_not_shadow_another_column() {
        let reference = Table::new(vec![
            Column::numeric("A_q", vec![Some(1.0), Some(2.0), Some(3.0)]),
            Column::categorical("A", vec![Some("a".into()), Some("b".into()), Some("c".into())]),
        ])
        .unwrap();
        let mut pre = Preprocessor::new(PreprocessConfig::default());
        pre.fit(&reference).unwrap();
        assert_eq!(pre.final_columns().unwrap(), &["A_q", "A_b", "A_c"]);

        // level "q" of A encodes to "A_q", the name of the numeric column
        let incoming = Table::new(vec![
            Column::categorical("A", vec![Some("q".into()), Some("b".into())]),
            Column::numeric("A_q", vec![Some(8.0), Some(9.0)]),
        ])
        .unwrap();
        let out = pre.transform(&incoming).unwrap();
        assert_eq!(out.rows(), &[vec![8.0, 0.0, 0.0], vec![9.0, 1.0, 0.0]]);
    }

    #[test]
    fn test_alignment_follows_column_sources() {
        // a hand-edited state may repeat a name; each slot still reads its own source
        let pre = Preprocessor::from_state(PreprocessorState {
            numeric_features: vec!["B_x".into()],
            categorical_features: vec!["B".into()],
            imputation_values: BTreeMap::new(),
            final_columns: vec!["B_x".into(), "B_x".into()],
            column_sources: vec!["B_x".into(), "B".into()],
            sentinel_value: None,
            missing_category: "Unknown".into(),
        });
        let without_category =
            Table::new(vec![Column::numeric("B_x", vec![Some(5.0)])]).unwrap();
        let out = pre.transform(&without_category).unwrap();
        assert_eq!(out.rows(), &[vec![5.0, 0.0]]);
    }

    #[test]
    fn test_load_rejects_inconsistent_sources() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let mut state = fitted().state().unwrap().clone();
        state.column_sources.pop();
        store.save(PREPROCESSOR_ARTIFACT, &state).unwrap();

        assert!(matches!(
            Preprocessor::load(&store),
            Err(ScoringError::Persistence(_))
        ));
    }
}
