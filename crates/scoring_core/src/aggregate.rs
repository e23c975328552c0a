//! Per-entity aggregation of one-to-many auxiliary tables
//!
//! Collapses every numeric column of a history table into
//! `{prefix}_{column}_{statistic}` columns, one row per distinct key.

use crate::errors::Result;
use crate::table::{Column, ColumnData, KeyValue, Table};
use std::collections::BTreeMap;
use tracing::debug;

/// Statistics computed for every numeric column, in output order.
pub const STATISTICS: [&str; 4] = ["mean", "min", "max", "sum"];

/// Output column name for an aggregate.
pub fn aggregate_column_name(prefix: &str, column: &str, statistic: &str) -> String {
    format!("{prefix}_{column}_{statistic}")
}

#[derive(Debug, Clone, Copy)]
struct Accumulator {
    count: usize,
    sum: f64,
    min: f64,
    max: f64,
}

impl Accumulator {
    fn new() -> Self {
        Self {
            count: 0,
            sum: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }

    fn push(&mut self, value: f64) {
        self.count += 1;
        self.sum += value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }

    /// `[mean, min, max, sum]`, all missing for an empty group.
    fn finish(&self) -> [Option<f64>; 4] {
        if self.count == 0 {
            return [None; 4];
        }
        [
            Some(self.sum / self.count as f64),
            Some(self.min),
            Some(self.max),
            Some(self.sum),
        ]
    }
}

/// Aggregate `table` by `group_key`.
///
/// Rows whose key is missing are ignored. Non-numeric columns are not
/// aggregated. Missing values are skipped, so a group with no observed
/// value for a column gets missing aggregates rather than zeros. The output
/// keeps the key column under its original name, sorted by key.
pub fn aggregate(table: &Table, group_key: &str, name_prefix: &str) -> Result<Table> {
    let keys = table.keys(group_key)?;

    let mut groups: BTreeMap<KeyValue, Vec<usize>> = BTreeMap::new();
    for (row, key) in keys.into_iter().enumerate() {
        if let Some(key) = key {
            groups.entry(key).or_default().push(row);
        }
    }

    let first_rows: Vec<usize> = groups.values().map(|rows| rows[0]).collect();
    let key_column = table.require(group_key)?;

    let mut output = Table::with_rows(groups.len());
    output.push_column(Column {
        name: group_key.to_string(),
        data: key_column.data.select(&first_rows),
    })?;

    for column in table.columns() {
        if column.name == group_key {
            continue;
        }
        let values = match &column.data {
            ColumnData::Numeric(values) => values,
            ColumnData::Categorical(_) => continue,
        };

        let mut stats: [Vec<Option<f64>>; 4] = Default::default();
        for rows in groups.values() {
            let mut acc = Accumulator::new();
            for value in rows.iter().filter_map(|&row| values[row]) {
                acc.push(value);
            }
            for (slot, value) in stats.iter_mut().zip(acc.finish()) {
                slot.push(value);
            }
        }

        for (statistic, values) in STATISTICS.iter().zip(stats) {
            output.push_column(Column::numeric(
                aggregate_column_name(name_prefix, &column.name, statistic),
                values,
            ))?;
        }
    }

    debug!(
        prefix = name_prefix,
        key = group_key,
        groups = output.n_rows(),
        columns = output.n_cols(),
        "aggregated auxiliary table"
    );
    Ok(output)
}
