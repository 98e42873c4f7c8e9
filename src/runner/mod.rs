// src/runner/mod.rs
//! Execution backend contract.
//!
//! A `Runner` owns the physical representation of row data. The core only
//! ever sees it through an opaque `RowSource` handle and asks the runner to
//! derive new sources (map, filter), fold over them, or persist them.

pub mod error;
pub mod local;
pub mod progress;
mod snapshot;

use std::any::Any;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use crate::grid::{ColumnModel, Grid, OverlayModels, Row};

pub use error::{BackendError, BackendResult};
pub use local::LocalRunner;
pub use progress::{NoProgress, ProgressReporter, ProgressingFuture, TaskState};

/// Opaque handle to a runner's row representation. Cloning is cheap.
#[derive(Clone)]
pub struct RowSource(Arc<dyn Any + Send + Sync>);

impl RowSource {
    pub fn new<T: Any + Send + Sync>(rows: T) -> Self {
        RowSource(Arc::new(rows))
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }

    pub fn ptr_eq(&self, other: &RowSource) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for RowSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RowSource(..)")
    }
}

/// Everything a runner reads back from a persisted snapshot.
#[derive(Debug, Clone)]
pub struct GridData {
    pub column_model: ColumnModel,
    pub overlay_models: OverlayModels,
    pub rows: RowSource,
}

pub trait RowMapper: Send + Sync {
    fn map_row(&self, row_id: u64, row: &Row) -> Row;
}

impl<F> RowMapper for F
where
    F: Fn(u64, &Row) -> Row + Send + Sync,
{
    fn map_row(&self, row_id: u64, row: &Row) -> Row {
        self(row_id, row)
    }
}

pub trait RowFilter: Send + Sync {
    fn keep_row(&self, row_id: u64, row: &Row) -> bool;
}

impl<F> RowFilter for F
where
    F: Fn(u64, &Row) -> bool + Send + Sync,
{
    fn keep_row(&self, row_id: u64, row: &Row) -> bool {
        self(row_id, row)
    }
}

/// Typed fold over rows. Partitions are folded independently and the
/// partial states combined in partition order.
pub trait RowAggregator: Send + Sync {
    type State: Send + 'static;

    fn initial(&self) -> Self::State;
    fn with_row(&self, state: Self::State, row_id: u64, row: &Row) -> Self::State;
    fn combine(&self, left: Self::State, right: Self::State) -> Self::State;
}

pub type AnyState = Box<dyn Any + Send>;

/// Type-erased per-partition fold handed to `Runner::fold_partitions`.
pub type PartitionFold<'a> = dyn Fn(&mut dyn Iterator<Item = (u64, &Row)>) -> AnyState + Sync + 'a;

pub trait Runner: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    fn rows_from_vec(&self, rows: Vec<Row>) -> RowSource;

    fn row_count(&self, rows: &RowSource) -> BackendResult<u64>;

    /// Fetches at most `limit` rows starting at row id `start`.
    fn rows_window(&self, rows: &RowSource, start: u64, limit: usize) -> BackendResult<Vec<(u64, Row)>>;

    fn map_rows(&self, rows: &RowSource, mapper: &dyn RowMapper) -> BackendResult<RowSource>;

    /// Keeps matching rows; the result is re-indexed from 0.
    fn filter_rows(&self, rows: &RowSource, filter: &dyn RowFilter) -> BackendResult<RowSource>;

    /// Runs `fold` once per partition and returns the partial states in
    /// partition order.
    fn fold_partitions(&self, rows: &RowSource, fold: &PartitionFold<'_>) -> BackendResult<Vec<AnyState>>;

    /// True when `path` holds a complete snapshot this runner can load.
    fn has_snapshot(&self, path: &Path) -> bool;

    fn load_grid_data(&self, path: &Path) -> BackendResult<GridData>;

    /// Overlay models of a complete snapshot, without reading its rows.
    fn snapshot_overlay_models(&self, path: &Path) -> BackendResult<OverlayModels>;

    /// Runtime that background work for this runner's grids is spawned on.
    fn task_handle(&self) -> tokio::runtime::Handle;

    fn save_grid_async(&self, grid: &Grid, path: &Path) -> ProgressingFuture<()>;
}
