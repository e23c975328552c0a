//! Raw CSV tables, label extraction and the holdout split

use crate::deterministic::row_hash;
use crate::errors::{Result, TrainerError};
use credit_scoring_core::log::StageTimer;
use credit_scoring_core::table::ColumnData;
use credit_scoring_core::{AuxiliarySource, KeyValue, Table};
use std::path::Path;
use tracing::info;

pub const APPLICATION_TRAIN: &str = "application_train.csv";
pub const APPLICATION_TEST: &str = "application_test.csv";
pub const BUREAU: &str = "bureau.csv";
pub const BUREAU_BALANCE: &str = "bureau_balance.csv";
pub const PREVIOUS_APPLICATION: &str = "previous_application.csv";
pub const POS_CASH_BALANCE: &str = "POS_CASH_balance.csv";
pub const INSTALLMENTS_PAYMENTS: &str = "installments_payments.csv";
pub const CREDIT_CARD_BALANCE: &str = "credit_card_balance.csv";

/// Sub-entity key linking bureau_balance rows to bureau rows
pub const BUREAU_KEY: &str = "SK_ID_BUREAU";

/// Read one CSV from `dir`; a missing file is reported by name.
pub fn load_table(dir: &Path, file: &str) -> Result<Table> {
    let path = dir.join(file);
    if !path.exists() {
        return Err(TrainerError::Dataset(format!(
            "input file {} not found",
            path.display()
        )));
    }
    let table = Table::from_csv_path(&path)?;
    info!(
        file,
        rows = table.n_rows(),
        columns = table.n_cols(),
        "table loaded"
    );
    Ok(table)
}

/// The eight source tables of the credit dataset
#[derive(Debug, Clone)]
pub struct RawTables {
    pub application_train: Table,
    pub application_test: Table,
    pub bureau: Table,
    pub bureau_balance: Table,
    pub previous_application: Table,
    pub pos_cash: Table,
    pub installments: Table,
    pub credit_card: Table,
}

impl RawTables {
    pub fn load(data_dir: &Path) -> Result<Self> {
        let _timer = StageTimer::start("load raw tables");
        Ok(Self {
            application_train: load_table(data_dir, APPLICATION_TRAIN)?,
            application_test: load_table(data_dir, APPLICATION_TEST)?,
            bureau: load_table(data_dir, BUREAU)?,
            bureau_balance: load_table(data_dir, BUREAU_BALANCE)?,
            previous_application: load_table(data_dir, PREVIOUS_APPLICATION)?,
            pos_cash: load_table(data_dir, POS_CASH_BALANCE)?,
            installments: load_table(data_dir, INSTALLMENTS_PAYMENTS)?,
            credit_card: load_table(data_dir, CREDIT_CARD_BALANCE)?,
        })
    }

    /// Split into the two primary tables and the auxiliary sources, in
    /// join order: bureau (with its monthly balances), previous
    /// applications, installments, POS cash, credit card.
    pub fn into_sources(self) -> (Table, Table, Vec<AuxiliarySource>) {
        let sources = vec![
            AuxiliarySource::new("bureau", self.bureau).with_child(
                "bb",
                BUREAU_KEY,
                self.bureau_balance,
            ),
            AuxiliarySource::new("prev", self.previous_application),
            AuxiliarySource::new("ins", self.installments),
            AuxiliarySource::new("pos", self.pos_cash),
            AuxiliarySource::new("cc", self.credit_card),
        ];
        (self.application_train, self.application_test, sources)
    }
}

/// Feature table with its entity keys split off
#[derive(Debug, Clone)]
pub struct EntityFeatures {
    pub keys: Vec<Option<KeyValue>>,
    pub features: Table,
}

impl EntityFeatures {
    pub fn from_table(mut table: Table, entity_key: &str) -> Result<Self> {
        let keys = table.keys(entity_key)?;
        table.drop_column(entity_key);
        Ok(Self {
            keys,
            features: table,
        })
    }
}

/// Feature table with entity keys and 0/1 labels split off
#[derive(Debug, Clone)]
pub struct LabeledFeatures {
    pub keys: Vec<Option<KeyValue>>,
    pub labels: Vec<u8>,
    pub features: Table,
}

impl LabeledFeatures {
    pub fn from_table(mut table: Table, entity_key: &str, target: &str) -> Result<Self> {
        let target_column = table.require(target)?;
        let ColumnData::Numeric(values) = &target_column.data else {
            return Err(TrainerError::Dataset(format!(
                "target column '{target}' is not numeric"
            )));
        };

        let labels = values
            .iter()
            .enumerate()
            .map(|(row, value)| match value {
                Some(v) if *v == 0.0 => Ok(0u8),
                Some(v) if *v == 1.0 => Ok(1u8),
                other => Err(TrainerError::Dataset(format!(
                    "row {row}: target must be 0 or 1, found {other:?}"
                ))),
            })
            .collect::<Result<Vec<u8>>>()?;

        table.drop_column(target);
        let EntityFeatures { keys, features } = EntityFeatures::from_table(table, entity_key)?;
        Ok(Self {
            keys,
            labels,
            features,
        })
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn positive_rate(&self) -> f64 {
        if self.labels.is_empty() {
            return 0.0;
        }
        self.labels.iter().filter(|&&l| l == 1).count() as f64 / self.labels.len() as f64
    }

    pub fn select(&self, indices: &[usize]) -> Self {
        Self {
            keys: indices.iter().map(|&i| self.keys[i].clone()).collect(),
            labels: indices.iter().map(|&i| self.labels[i]).collect(),
            features: self.features.select_rows(indices),
        }
    }
}

/// Row indices of the fitting and held-out parts, both ascending
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HoldoutSplit {
    pub train: Vec<usize>,
    pub holdout: Vec<usize>,
}

/// Hold out `fraction` of each class, chosen by seeded row hash.
pub fn stratified_split(labels: &[u8], fraction: f64, seed: u64) -> Result<HoldoutSplit> {
    if !(fraction > 0.0 && fraction < 1.0) {
        return Err(TrainerError::Dataset(format!(
            "holdout fraction must be in (0, 1), got {fraction}"
        )));
    }

    let mut train = Vec::new();
    let mut holdout = Vec::new();
    for class in [0u8, 1u8] {
        let mut rows: Vec<usize> = labels
            .iter()
            .enumerate()
            .filter(|(_, l)| **l == class)
            .map(|(i, _)| i)
            .collect();
        rows.sort_by_key(|&i| (row_hash(&[i as u64, u64::from(class)], seed), i));

        let n_holdout = ((rows.len() as f64) * fraction).round() as usize;
        holdout.extend_from_slice(&rows[..n_holdout]);
        train.extend_from_slice(&rows[n_holdout..]);
    }

    if train.is_empty() || holdout.is_empty() {
        return Err(TrainerError::Dataset(format!(
            "{} rows are too few for a {fraction} holdout split",
            labels.len()
        )));
    }

    train.sort_unstable();
    holdout.sort_unstable();
    Ok(HoldoutSplit { train, holdout })
}

#[cfg(test)]
mod tests {
    use super::*;
    use credit_scoring_core::Column;
    use std::fs;

    fn labeled() -> Table {
        Table::new(vec![
            Column::numeric("SK_ID_CURR", vec![Some(1.0), Some(2.0), Some(3.0)]),
            Column::numeric("TARGET", vec![Some(0.0), Some(1.0), Some(0.0)]),
            Column::numeric("AMT", vec![Some(5.0), None, Some(7.0)]),
        ])
        .unwrap()
    }

    #[test]
    fn test_labels_and_keys_are_split_off() {
        let data = LabeledFeatures::from_table(labeled(), "SK_ID_CURR", "TARGET").unwrap();
        assert_eq!(data.labels, vec![0, 1, 0]);
        assert_eq!(data.keys[2], Some(KeyValue::Int(3)));
        assert_eq!(data.features.column_names(), vec!["AMT"]);
        assert!((data.positive_rate() - 1.0 / 3.0).abs() < 1e-12);

        let picked = data.select(&[2, 0]);
        assert_eq!(picked.labels, vec![0, 0]);
        assert_eq!(picked.keys[0], Some(KeyValue::Int(3)));
    }

    #[test]
    fn test_bad_target_values_are_rejected() {
        let table = Table::new(vec![
            Column::numeric("SK_ID_CURR", vec![Some(1.0), Some(2.0)]),
            Column::numeric("TARGET", vec![Some(0.0), Some(2.0)]),
        ])
        .unwrap();
        assert!(matches!(
            LabeledFeatures::from_table(table, "SK_ID_CURR", "TARGET"),
            Err(TrainerError::Dataset(_))
        ));
    }

    #[test]
    fn test_split_is_stratified_and_reproducible() {
        let labels: Vec<u8> = (0..100).map(|i| u8::from(i % 5 == 0)).collect();
        let split = stratified_split(&labels, 0.2, 42).unwrap();

        assert_eq!(split.holdout.len(), 20);
        assert_eq!(split.train.len(), 80);
        let holdout_positives = split.holdout.iter().filter(|&&i| labels[i] == 1).count();
        assert_eq!(holdout_positives, 4);
        assert_eq!(split, stratified_split(&labels, 0.2, 42).unwrap());
        assert_ne!(split, stratified_split(&labels, 0.2, 7).unwrap());
    }

    #[test]
    fn test_split_rejects_degenerate_input() {
        assert!(stratified_split(&[0, 1], 0.2, 1).is_err());
        assert!(stratified_split(&[0, 1, 0, 1], 1.5, 1).is_err());
    }

    #[test]
    fn test_missing_file_is_named() {
        let dir = tempfile::tempdir().unwrap();
        let err = RawTables::load(dir.path()).unwrap_err();
        assert!(err.to_string().contains(APPLICATION_TRAIN));

        fs::write(dir.path().join("small.csv"), "A,B\n1,x\n,y\n").unwrap();
        let table = load_table(dir.path(), "small.csv").unwrap();
        assert_eq!(table.n_rows(), 2);
    }
}
