// src/history/change.rs

use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use super::change_data::{ChangeDataError, ChangeDataStore};
use crate::grid::{Grid, ModelError};
use crate::runner::{BackendError, Runner};

#[derive(Debug, Error)]
pub enum ChangeError {
    /// The input grid does not satisfy the change's preconditions.
    #[error("Change does not apply: {0}")]
    DoesNotApply(String),
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),
    #[error("Change data error: {0}")]
    ChangeData(#[from] ChangeDataError),
}

impl From<ModelError> for ChangeError {
    fn from(e: ModelError) -> Self {
        ChangeError::DoesNotApply(e.to_string())
    }
}

/// What a change guarantees about the rows of its output grid, relative to
/// its input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GridPreservation {
    /// Same rows, same ids, same order.
    RowsPreserved,
    /// Rows may be added or removed but record boundaries are kept.
    RecordsPreserved,
    NoRowPreservation,
}

#[derive(Debug, Clone)]
pub struct ChangeResult {
    pub grid: Grid,
    pub preservation: GridPreservation,
}

impl ChangeResult {
    pub fn new(grid: Grid, preservation: GridPreservation) -> Self {
        ChangeResult { grid, preservation }
    }
}

/// Everything a change may consult besides its input grid.
pub struct ChangeContext<'a> {
    entry_id: u64,
    change_data: &'a dyn ChangeDataStore,
    runner: &'a Arc<dyn Runner>,
}

impl<'a> ChangeContext<'a> {
    pub fn new(entry_id: u64, change_data: &'a dyn ChangeDataStore, runner: &'a Arc<dyn Runner>) -> Self {
        ChangeContext { entry_id, change_data, runner }
    }

    pub fn entry_id(&self) -> u64 {
        self.entry_id
    }

    pub fn runner(&self) -> &Arc<dyn Runner> {
        self.runner
    }

    pub fn change_data(&self) -> &dyn ChangeDataStore {
        self.change_data
    }

    /// Returns the data stored under `key` for this entry, computing and
    /// storing it on first use.
    pub fn get_or_compute<T, F>(&self, key: &str, compute: F) -> Result<T, ChangeError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Result<T, ChangeError>,
    {
        if let Some(stored) = self.change_data.get(self.entry_id, key)? {
            debug!("ChangeContext: reusing change data '{}' of entry {}", key, self.entry_id);
            return serde_json::from_value(stored)
                .map_err(|e| ChangeError::ChangeData(ChangeDataError::Json(e)));
        }
        let computed = compute()?;
        let value = serde_json::to_value(&computed).map_err(ChangeDataError::Json)?;
        self.change_data.put(self.entry_id, key, value)?;
        Ok(computed)
    }
}

impl fmt::Debug for ChangeContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeContext")
            .field("entry_id", &self.entry_id)
            .field("runner", &self.runner.name())
            .finish()
    }
}

/// A pure transformation of a grid.
///
/// `apply` must depend only on the input grid and the context: replaying the
/// same change on the same input has to give the same output, which is what
/// makes undo/redo by replay sound. Changes are persisted as their `kind`
/// plus `payload`, and decoded back through the change registry.
pub trait Change: Send + Sync + fmt::Debug {
    fn kind(&self) -> &'static str;

    fn apply(&self, grid: &Grid, ctx: &ChangeContext<'_>) -> Result<ChangeResult, ChangeError>;

    /// Whether the change is cheap enough to run without a progress handle.
    /// `History` applies every change on the calling thread and only logs
    /// the duration of non-immediate ones; running those in the background
    /// is up to the caller.
    fn is_immediate(&self) -> bool {
        true
    }

    fn payload(&self) -> Result<serde_json::Value, serde_json::Error>;
}
