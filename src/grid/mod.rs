// src/grid/mod.rs
//! Immutable grid snapshots.
//!
//! A `Grid` bundles a column model, a runner-owned row source and overlay
//! models. Every transformation goes through the runner and yields a new
//! `Grid`; existing values are never touched, which is what lets history
//! positions share snapshots across threads without locking.

pub mod column_model;
pub mod row;

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use crate::runner::{
    AnyState, BackendError, BackendResult, ProgressingFuture, RowAggregator, RowFilter, RowMapper,
    RowSource, Runner,
};

pub use column_model::{ColumnMetadata, ColumnModel, ModelError};
pub use row::Row;

/// Auxiliary model state attached to a dataset, keyed by model name.
pub type OverlayModels = BTreeMap<String, serde_json::Value>;

#[derive(Clone)]
pub struct Grid {
    runner: Arc<dyn Runner>,
    column_model: ColumnModel,
    rows: RowSource,
    overlay_models: OverlayModels,
}

impl Grid {
    pub fn from_rows(runner: Arc<dyn Runner>, column_model: ColumnModel, rows: Vec<Row>) -> Self {
        let rows = runner.rows_from_vec(rows);
        Grid {
            runner,
            column_model,
            rows,
            overlay_models: OverlayModels::new(),
        }
    }

    pub fn load(runner: &Arc<dyn Runner>, path: &Path) -> BackendResult<Self> {
        let data = runner.load_grid_data(path)?;
        Ok(Grid {
            runner: Arc::clone(runner),
            column_model: data.column_model,
            rows: data.rows,
            overlay_models: data.overlay_models,
        })
    }

    pub fn runner(&self) -> &Arc<dyn Runner> {
        &self.runner
    }

    pub fn column_model(&self) -> &ColumnModel {
        &self.column_model
    }

    pub fn row_source(&self) -> &RowSource {
        &self.rows
    }

    pub fn overlay_models(&self) -> &OverlayModels {
        &self.overlay_models
    }

    pub fn row_count(&self) -> BackendResult<u64> {
        self.runner.row_count(&self.rows)
    }

    pub fn rows(&self, start: u64, limit: usize) -> BackendResult<Vec<(u64, Row)>> {
        self.runner.rows_window(&self.rows, start, limit)
    }

    /// Materializes every row. Meant for small grids and tests.
    pub fn collect_rows(&self) -> BackendResult<Vec<Row>> {
        Ok(self
            .rows(0, usize::MAX)?
            .into_iter()
            .map(|(_, row)| row)
            .collect())
    }

    pub fn map_rows(&self, mapper: &dyn RowMapper, column_model: ColumnModel) -> BackendResult<Self> {
        let rows = self.runner.map_rows(&self.rows, mapper)?;
        Ok(Grid {
            runner: Arc::clone(&self.runner),
            column_model,
            rows,
            overlay_models: self.overlay_models.clone(),
        })
    }

    pub fn filter_rows(&self, filter: &dyn RowFilter) -> BackendResult<Self> {
        let rows = self.runner.filter_rows(&self.rows, filter)?;
        Ok(Grid {
            runner: Arc::clone(&self.runner),
            column_model: self.column_model.clone(),
            rows,
            overlay_models: self.overlay_models.clone(),
        })
    }

    pub fn aggregate_rows<A: RowAggregator>(&self, aggregator: &A) -> BackendResult<A::State> {
        let fold = |rows: &mut dyn Iterator<Item = (u64, &Row)>| -> AnyState {
            let state = rows.fold(aggregator.initial(), |state, (row_id, row)| {
                aggregator.with_row(state, row_id, row)
            });
            Box::new(state)
        };
        let partials = self.runner.fold_partitions(&self.rows, &fold)?;
        let mut result = aggregator.initial();
        for partial in partials {
            let partial = partial.downcast::<A::State>().map_err(|_| {
                BackendError::Worker("aggregation produced a state of the wrong type".to_string())
            })?;
            result = aggregator.combine(result, *partial);
        }
        Ok(result)
    }

    pub fn record_count(&self) -> BackendResult<u64> {
        self.aggregate_rows(&RecordCounter)
    }

    /// Same rows under a different schema (renames, reordered metadata).
    pub fn with_column_model(&self, column_model: ColumnModel) -> Self {
        Grid {
            runner: Arc::clone(&self.runner),
            column_model,
            rows: self.rows.clone(),
            overlay_models: self.overlay_models.clone(),
        }
    }

    pub fn with_overlay_model(&self, key: impl Into<String>, model: serde_json::Value) -> Self {
        let mut overlay_models = self.overlay_models.clone();
        overlay_models.insert(key.into(), model);
        Grid {
            runner: Arc::clone(&self.runner),
            column_model: self.column_model.clone(),
            rows: self.rows.clone(),
            overlay_models,
        }
    }

    pub fn without_overlay_model(&self, key: &str) -> Self {
        let mut overlay_models = self.overlay_models.clone();
        overlay_models.remove(key);
        Grid {
            runner: Arc::clone(&self.runner),
            column_model: self.column_model.clone(),
            rows: self.rows.clone(),
            overlay_models,
        }
    }

    pub fn save_to_file_async(&self, path: &Path) -> ProgressingFuture<()> {
        self.runner.save_grid_async(self, path)
    }

    /// Compares schema, overlays and every row. Linear in the grid size.
    pub fn structurally_eq(&self, other: &Grid) -> BackendResult<bool> {
        if self.column_model != other.column_model || self.overlay_models != other.overlay_models {
            return Ok(false);
        }
        if self.rows.ptr_eq(&other.rows) {
            return Ok(true);
        }
        if self.row_count()? != other.row_count()? {
            return Ok(false);
        }
        Ok(self.collect_rows()? == other.collect_rows()?)
    }
}

impl fmt::Debug for Grid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Grid")
            .field("runner", &self.runner.name())
            .field("columns", &self.column_model.names())
            .field("overlay_models", &self.overlay_models.keys().collect::<Vec<_>>())
            .finish()
    }
}

struct RecordCounter;

impl RowAggregator for RecordCounter {
    type State = u64;

    fn initial(&self) -> u64 {
        0
    }

    fn with_row(&self, count: u64, row_id: u64, row: &Row) -> u64 {
        if row.starts_record(row_id) {
            count + 1
        } else {
            count
        }
    }

    fn combine(&self, left: u64, right: u64) -> u64 {
        left + right
    }
}
