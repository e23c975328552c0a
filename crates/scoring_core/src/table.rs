//! Typed in-memory tables
//!
//! Every table is an ordered list of named columns, each either numeric
//! (`Option<f64>`) or categorical (`Option<String>`). `None` is the single
//! representation of a missing value; it is never conflated with zero.

use crate::errors::{Result, ScoringError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::io::Read;
use std::path::Path;

/// Cell spellings treated as missing when reading CSV input.
pub const MISSING_MARKERS: [&str; 8] = ["", "NA", "N/A", "NaN", "nan", "null", "NULL", "None"];

/// A JSON-like record keyed by column name, as received on the serving path.
pub type Record = BTreeMap<String, Value>;

/// Kind of values a column holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnKind {
    Numeric,
    Categorical,
}

/// Column storage
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnData {
    Numeric(Vec<Option<f64>>),
    Categorical(Vec<Option<String>>),
}

impl ColumnData {
    /// A column of `len` missing values of the given kind.
    pub fn missing(kind: ColumnKind, len: usize) -> Self {
        match kind {
            ColumnKind::Numeric => ColumnData::Numeric(vec![None; len]),
            ColumnKind::Categorical => ColumnData::Categorical(vec![None; len]),
        }
    }

    pub fn kind(&self) -> ColumnKind {
        match self {
            ColumnData::Numeric(_) => ColumnKind::Numeric,
            ColumnData::Categorical(_) => ColumnKind::Categorical,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ColumnData::Numeric(values) => values.len(),
            ColumnData::Categorical(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn missing_count(&self) -> usize {
        match self {
            ColumnData::Numeric(values) => values.iter().filter(|v| v.is_none()).count(),
            ColumnData::Categorical(values) => values.iter().filter(|v| v.is_none()).count(),
        }
    }

    /// True when every cell is missing (including the zero-row case).
    pub fn is_all_missing(&self) -> bool {
        self.missing_count() == self.len()
    }

    /// Join key of a single row, `None` when the cell is missing.
    pub fn key_at(&self, row: usize) -> Option<KeyValue> {
        match self {
            ColumnData::Numeric(values) => {
                values.get(row).copied().flatten().map(KeyValue::from_f64)
            }
            ColumnData::Categorical(values) => values
                .get(row)
                .and_then(|v| v.as_deref())
                .map(KeyValue::from_text),
        }
    }

    /// Rows at `indices`, in that order.
    pub fn select(&self, indices: &[usize]) -> Self {
        match self {
            ColumnData::Numeric(values) => {
                ColumnData::Numeric(indices.iter().map(|&i| values[i]).collect())
            }
            ColumnData::Categorical(values) => {
                ColumnData::Categorical(indices.iter().map(|&i| values[i].clone()).collect())
            }
        }
    }

    /// Rows at `positions`; a `None` position yields a missing cell.
    pub fn gather(&self, positions: &[Option<usize>]) -> Self {
        match self {
            ColumnData::Numeric(values) => ColumnData::Numeric(
                positions.iter().map(|p| p.and_then(|i| values[i])).collect(),
            ),
            ColumnData::Categorical(values) => ColumnData::Categorical(
                positions
                    .iter()
                    .map(|p| p.and_then(|i| values[i].clone()))
                    .collect(),
            ),
        }
    }
}

/// A named column
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub data: ColumnData,
}

impl Column {
    pub fn numeric(name: impl Into<String>, values: Vec<Option<f64>>) -> Self {
        Self {
            name: name.into(),
            data: ColumnData::Numeric(values),
        }
    }

    pub fn categorical(name: impl Into<String>, values: Vec<Option<String>>) -> Self {
        Self {
            name: name.into(),
            data: ColumnData::Categorical(values),
        }
    }

    pub fn kind(&self) -> ColumnKind {
        self.data.kind()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Normalized grouping / join key.
///
/// Integral numbers and their canonical integer text compare equal, so an
/// identifier read as text in one table still joins against the numeric
/// identifier of another.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum KeyValue {
    Int(i64),
    Text(String),
}

impl KeyValue {
    pub fn from_f64(value: f64) -> Self {
        if value.is_finite() && value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
            KeyValue::Int(value as i64)
        } else {
            KeyValue::Text(value.to_string())
        }
    }

    /// Text is an `Int` only when it is the canonical rendering of one, so
    /// `"007"` and `" 7"` stay distinct from `"7"`.
    pub fn from_text(value: &str) -> Self {
        match value.parse::<i64>() {
            Ok(int) if int.to_string() == value => KeyValue::Int(int),
            _ => KeyValue::Text(value.to_string()),
        }
    }
}

impl fmt::Display for KeyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyValue::Int(v) => write!(f, "{v}"),
            KeyValue::Text(v) => f.write_str(v),
        }
    }
}

/// Ordered collection of equally long named columns
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    columns: Vec<Column>,
    index: HashMap<String, usize>,
    n_rows: usize,
}

impl Table {
    /// Build a table, rejecting duplicate names and ragged columns.
    pub fn new(columns: Vec<Column>) -> Result<Self> {
        let n_rows = columns.first().map(Column::len).unwrap_or(0);
        let mut table = Self {
            columns: Vec::with_capacity(columns.len()),
            index: HashMap::with_capacity(columns.len()),
            n_rows,
        };
        for column in columns {
            table.push_column(column)?;
        }
        Ok(table)
    }

    /// A table with a known row count but no columns yet.
    pub fn with_rows(n_rows: usize) -> Self {
        Self {
            n_rows,
            ..Self::default()
        }
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn n_cols(&self) -> usize {
        self.columns.len()
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn into_columns(self) -> Vec<Column> {
        self.columns
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.index.get(name).map(|&i| &self.columns[i])
    }

    /// Like [`Table::column`] but a missing column is a schema error.
    pub fn require(&self, name: &str) -> Result<&Column> {
        self.column(name).ok_or_else(|| {
            ScoringError::Schema(format!("required column '{name}' is absent"))
        })
    }

    /// Append a column. The first column of a column-less, row-less table
    /// fixes the row count.
    pub fn push_column(&mut self, column: Column) -> Result<()> {
        if self.index.contains_key(&column.name) {
            return Err(ScoringError::Schema(format!(
                "duplicate column '{}'",
                column.name
            )));
        }
        if self.columns.is_empty() && self.n_rows == 0 {
            self.n_rows = column.len();
        }
        if column.len() != self.n_rows {
            return Err(ScoringError::Schema(format!(
                "column '{}' has {} rows, table has {}",
                column.name,
                column.len(),
                self.n_rows
            )));
        }
        self.index.insert(column.name.clone(), self.columns.len());
        self.columns.push(column);
        Ok(())
    }

    /// Remove a column by name, keeping the row count.
    pub fn drop_column(&mut self, name: &str) -> Option<Column> {
        let position = self.index.remove(name)?;
        let removed = self.columns.remove(position);
        for slot in self.index.values_mut() {
            if *slot > position {
                *slot -= 1;
            }
        }
        Some(removed)
    }

    /// Rows at `indices`, in that order.
    pub fn select_rows(&self, indices: &[usize]) -> Table {
        let columns = self
            .columns
            .iter()
            .map(|c| Column {
                name: c.name.clone(),
                data: c.data.select(indices),
            })
            .collect();
        Table {
            columns,
            index: self.index.clone(),
            n_rows: indices.len(),
        }
    }

    /// Normalized keys of every row of `key`.
    pub fn keys(&self, key: &str) -> Result<Vec<Option<KeyValue>>> {
        let column = self.require(key)?;
        Ok((0..self.n_rows).map(|row| column.data.key_at(row)).collect())
    }

    /// Left join on `key`.
    ///
    /// Every row of `self` is kept in its original order; rows without a
    /// match get missing values in the appended columns. The right-hand
    /// keys must be unique so that no row is ever duplicated.
    pub fn left_join(&self, right: &Table, key: &str) -> Result<Table> {
        let left_keys = self.keys(key)?;
        let right_keys = right.keys(key)?;

        let mut lookup: HashMap<KeyValue, usize> = HashMap::with_capacity(right_keys.len());
        for (row, value) in right_keys.into_iter().enumerate() {
            if let Some(value) = value {
                if lookup.insert(value.clone(), row).is_some() {
                    return Err(ScoringError::Schema(format!(
                        "join key '{key}' is not unique in the right-hand table (value {value})"
                    )));
                }
            }
        }

        let positions: Vec<Option<usize>> = left_keys
            .iter()
            .map(|k| k.as_ref().and_then(|k| lookup.get(k).copied()))
            .collect();

        let mut joined = self.clone();
        for column in right.columns.iter().filter(|c| c.name != key) {
            if joined.contains(&column.name) {
                return Err(ScoringError::Schema(format!(
                    "column '{}' exists on both sides of the join on '{key}'",
                    column.name
                )));
            }
            joined.push_column(Column {
                name: column.name.clone(),
                data: column.data.gather(&positions),
            })?;
        }
        Ok(joined)
    }

    /// Read a CSV file with a header row.
    pub fn from_csv_path<P: AsRef<Path>>(path: P) -> Result<Table> {
        let file = std::fs::File::open(path.as_ref())?;
        Self::from_csv_reader(file)
    }

    /// Read CSV from any reader. Column kinds are inferred: a column is
    /// numeric when every non-missing cell parses as `f64`.
    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Table> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
        let mut raw: Vec<Vec<Option<String>>> = vec![Vec::new(); headers.len()];

        for record in reader.records() {
            let record = record?;
            for (i, cells) in raw.iter_mut().enumerate() {
                let cell = record.get(i).unwrap_or("");
                cells.push(if MISSING_MARKERS.contains(&cell) {
                    None
                } else {
                    Some(cell.to_string())
                });
            }
        }

        let columns = headers
            .into_iter()
            .zip(raw)
            .map(|(name, cells)| Column {
                name,
                data: infer_column(cells),
            })
            .collect();
        Table::new(columns)
    }

    /// Build a table from JSON-like records.
    ///
    /// A field holding any string becomes categorical (numbers in it are
    /// rendered as text); otherwise it is numeric, booleans map to 0/1 and
    /// null is missing.
    pub fn from_records(records: &[Record]) -> Result<Table> {
        let mut names: Vec<&String> = Vec::new();
        for record in records {
            for name in record.keys() {
                if !names.contains(&name) {
                    names.push(name);
                }
            }
        }

        let mut columns = Vec::with_capacity(names.len());
        for name in names {
            let cells: Vec<&Value> = records
                .iter()
                .map(|r| r.get(name).unwrap_or(&Value::Null))
                .collect();

            if let Some(bad) = cells.iter().find(|v| v.is_array() || v.is_object()) {
                return Err(ScoringError::InvalidInput(format!(
                    "field '{name}' holds a nested value: {bad}"
                )));
            }

            let data = if cells.iter().any(|v| v.is_string()) {
                ColumnData::Categorical(cells.iter().map(|v| json_to_text(v)).collect())
            } else {
                ColumnData::Numeric(cells.iter().map(|v| json_to_number(v)).collect())
            };
            columns.push(Column {
                name: name.clone(),
                data,
            });
        }

        let mut table = Table::new(columns)?;
        if table.n_cols() == 0 {
            table.n_rows = records.len();
        }
        Ok(table)
    }
}

fn infer_column(cells: Vec<Option<String>>) -> ColumnData {
    let parsed: Option<Vec<Option<f64>>> = cells
        .iter()
        .map(|cell| match cell {
            None => Some(None),
            Some(text) => text.parse::<f64>().ok().map(Some),
        })
        .collect();

    match parsed {
        Some(values) => ColumnData::Numeric(values),
        None => ColumnData::Categorical(cells),
    }
}

fn json_to_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

fn json_to_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn people() -> Table {
        Table::new(vec![
            Column::numeric("id", vec![Some(1.0), Some(2.0), Some(3.0)]),
            Column::categorical(
                "city",
                vec![Some("paris".into()), None, Some("lyon".into())],
            ),
        ])
        .unwrap()
    }

    #[test]
    fn test_rejects_duplicate_and_ragged_columns() {
        let dup = Table::new(vec![
            Column::numeric("a", vec![Some(1.0)]),
            Column::numeric("a", vec![Some(2.0)]),
        ]);
        assert!(matches!(dup, Err(ScoringError::Schema(_))));

        let ragged = Table::new(vec![
            Column::numeric("a", vec![Some(1.0)]),
            Column::numeric("b", vec![Some(2.0), None]),
        ]);
        assert!(matches!(ragged, Err(ScoringError::Schema(_))));
    }

    #[test]
    fn test_require_reports_missing_column() {
        let err = people().require("income").unwrap_err();
        assert!(err.to_string().contains("income"));
    }

    #[test]
    fn test_drop_column_keeps_index_consistent() {
        let mut table = people();
        table
            .push_column(Column::numeric("age", vec![Some(30.0), None, Some(41.0)]))
            .unwrap();
        assert!(table.drop_column("id").is_some());
        assert_eq!(table.column_names(), vec!["city", "age"]);
        assert_eq!(table.column("age").unwrap().kind(), ColumnKind::Numeric);
        assert_eq!(table.n_rows(), 3);
    }

    #[test]
    fn test_left_join_keeps_left_rows_and_fills_missing() {
        let right = Table::new(vec![
            Column::numeric("id", vec![Some(3.0), Some(1.0)]),
            Column::numeric("score", vec![Some(0.3), Some(0.1)]),
        ])
        .unwrap();

        let joined = people().left_join(&right, "id").unwrap();
        assert_eq!(joined.n_rows(), 3);
        assert_eq!(
            joined.column("score").unwrap().data,
            ColumnData::Numeric(vec![Some(0.1), None, Some(0.3)])
        );
    }

    #[test]
    fn test_left_join_rejects_duplicate_right_keys() {
        let right = Table::new(vec![
            Column::numeric("id", vec![Some(1.0), Some(1.0)]),
            Column::numeric("score", vec![Some(0.3), Some(0.1)]),
        ])
        .unwrap();
        assert!(matches!(
            people().left_join(&right, "id"),
            Err(ScoringError::Schema(_))
        ));
    }

    #[test]
    fn test_text_and_numeric_keys_match() {
        assert_eq!(KeyValue::from_f64(100002.0), KeyValue::from_text("100002"));
        assert_eq!(KeyValue::from_text("abc"), KeyValue::Text("abc".into()));
        assert_eq!(KeyValue::from_text("-12"), KeyValue::Int(-12));
    }

    #[test]
    fn test_non_canonical_integer_text_is_distinct() {
        assert_eq!(KeyValue::from_text("007"), KeyValue::Text("007".into()));
        assert_eq!(KeyValue::from_text(" 7"), KeyValue::Text(" 7".into()));
        assert_ne!(KeyValue::from_text("007"), KeyValue::from_text("7"));

        let right = Table::new(vec![
            Column::categorical("id", vec![Some("007".into()), Some("7".into())]),
            Column::numeric("score", vec![Some(0.3), Some(0.7)]),
        ])
        .unwrap();
        let left = Table::new(vec![Column::numeric("id", vec![Some(7.0)])]).unwrap();
        let joined = left.left_join(&right, "id").unwrap();
        assert_eq!(
            joined.column("score").unwrap().data,
            ColumnData::Numeric(vec![Some(0.7)])
        );
    }

    #[test]
    fn test_csv_inference_and_missing_markers() {
        let csv = "SK_ID_CURR,AMT_CREDIT,NAME_CONTRACT_TYPE\n\
                   100002,406597.5,Cash loans\n\
                   100003,,Revolving loans\n\
                   100004,NaN,\n";
        let table = Table::from_csv_reader(csv.as_bytes()).unwrap();

        assert_eq!(table.n_rows(), 3);
        assert_eq!(table.column("SK_ID_CURR").unwrap().kind(), ColumnKind::Numeric);
        assert_eq!(
            table.column("AMT_CREDIT").unwrap().data,
            ColumnData::Numeric(vec![Some(406597.5), None, None])
        );
        assert_eq!(
            table.column("NAME_CONTRACT_TYPE").unwrap().data,
            ColumnData::Categorical(vec![
                Some("Cash loans".into()),
                Some("Revolving loans".into()),
                None
            ])
        );
    }

    #[test]
    fn test_records_build_typed_columns() {
        let mut record = Record::new();
        record.insert("EXT_SOURCE_2".into(), json!(0.62));
        record.insert("CODE_GENDER".into(), json!("M"));
        record.insert("OWN_CAR_AGE".into(), Value::Null);
        record.insert("FLAG_OWN_CAR".into(), json!(true));

        let table = Table::from_records(&[record]).unwrap();
        assert_eq!(table.n_rows(), 1);
        assert_eq!(
            table.column("EXT_SOURCE_2").unwrap().data,
            ColumnData::Numeric(vec![Some(0.62)])
        );
        assert_eq!(table.column("CODE_GENDER").unwrap().kind(), ColumnKind::Categorical);
        assert_eq!(
            table.column("OWN_CAR_AGE").unwrap().data,
            ColumnData::Numeric(vec![None])
        );
        assert_eq!(
            table.column("FLAG_OWN_CAR").unwrap().data,
            ColumnData::Numeric(vec![Some(1.0)])
        );
    }

    #[test]
    fn test_records_reject_nested_values() {
        let mut record = Record::new();
        record.insert("x".into(), json!([1, 2]));
        assert!(matches!(
            Table::from_records(&[record]),
            Err(ScoringError::InvalidInput(_))
        ));
    }
}
