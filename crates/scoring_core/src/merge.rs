//! Merging auxiliary aggregates onto the primary entity tables

use crate::aggregate::aggregate;
use crate::errors::Result;
use crate::log::StageTimer;
use crate::table::Table;
use tracing::info;

/// A finer-grained history table that links only to a sub-entity key of
/// its parent (for example monthly balances of one bureau record).
#[derive(Debug, Clone)]
pub struct ChildSource {
    pub prefix: String,
    /// Sub-entity key shared by the child and its parent
    pub key: String,
    pub table: Table,
}

/// One auxiliary history table linked to the entity key.
#[derive(Debug, Clone)]
pub struct AuxiliarySource {
    pub prefix: String,
    pub table: Table,
    pub child: Option<ChildSource>,
}

impl AuxiliarySource {
    pub fn new(prefix: impl Into<String>, table: Table) -> Self {
        Self {
            prefix: prefix.into(),
            table,
            child: None,
        }
    }

    /// Attach a child table rolled up through `key` before entity-level
    /// aggregation.
    pub fn with_child(
        mut self,
        prefix: impl Into<String>,
        key: impl Into<String>,
        table: Table,
    ) -> Self {
        self.child = Some(ChildSource {
            prefix: prefix.into(),
            key: key.into(),
            table,
        });
        self
    }
}

/// Builds per-entity feature tables from a primary table and its histories.
#[derive(Debug, Clone)]
pub struct TableMerger {
    entity_key: String,
}

impl TableMerger {
    pub fn new(entity_key: impl Into<String>) -> Self {
        Self {
            entity_key: entity_key.into(),
        }
    }

    pub fn entity_key(&self) -> &str {
        &self.entity_key
    }

    /// Aggregate one source down to one row per entity.
    ///
    /// A child table is aggregated on its sub-entity key first and
    /// left-joined onto the parent, then the parent is aggregated on the
    /// entity key.
    pub fn aggregate_source(&self, source: &AuxiliarySource) -> Result<Table> {
        let _timer = StageTimer::start(format!("aggregate {}", source.prefix));

        let parent = match &source.child {
            Some(child) => {
                let rolled_up = aggregate(&child.table, &child.key, &child.prefix)?;
                source.table.left_join(&rolled_up, &child.key)?
            }
            None => source.table.clone(),
        };

        aggregate(&parent, &self.entity_key, &source.prefix)
    }

    /// Left-join every source aggregate onto both primary tables.
    ///
    /// Sources are joined in the order given. Entities without history keep
    /// their rows with missing aggregate columns. Inputs are not modified.
    pub fn build_features(
        &self,
        primary_train: &Table,
        primary_test: &Table,
        sources: &[AuxiliarySource],
    ) -> Result<(Table, Table)> {
        let _timer = StageTimer::start("feature engineering");

        primary_train.require(&self.entity_key)?;
        primary_test.require(&self.entity_key)?;

        let mut train = primary_train.clone();
        let mut test = primary_test.clone();

        for source in sources {
            let aggregated = self.aggregate_source(source)?;
            train = train.left_join(&aggregated, &self.entity_key)?;
            test = test.left_join(&aggregated, &self.entity_key)?;
            info!(
                source = %source.prefix,
                entities = aggregated.n_rows(),
                columns = aggregated.n_cols().saturating_sub(1),
                "merged auxiliary aggregates"
            );
        }

        info!(
            train_rows = train.n_rows(),
            test_rows = test.n_rows(),
            columns = train.n_cols(),
            "feature tables built"
        );
        Ok((train, test))
    }
}
