// src/history/mod.rs
//! Undo/redo history over immutable grids.
//!
//! The history is a list of applied changes and a cursor. The grid at any
//! position is the anchor grid with the first `position` changes replayed on
//! top of it; the grid cache only shortens that replay. Moving the cursor is
//! free, grids are derived lazily when asked for.

pub mod change;
pub mod change_data;
pub mod entry;
pub mod error;
pub mod grid_cache;
pub mod store;

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::grid::Grid;
use crate::operations::{Operation, Recipe};

pub use change::{Change, ChangeContext, ChangeError, ChangeResult, GridPreservation};
pub use change_data::{
    ChangeDataError, ChangeDataRecord, ChangeDataStore, InMemoryChangeDataStore, SqliteChangeDataStore,
};
pub use entry::HistoryEntry;
pub use error::HistoryError;
pub use grid_cache::{GridCache, InMemoryGridCache};
pub use store::{HistoryStore, HistoryStoreError};

#[derive(Debug)]
pub struct History {
    anchor: Grid,
    anchor_id: u64,
    entries: Vec<HistoryEntry>,
    position: usize,
    change_data: Arc<dyn ChangeDataStore>,
    grid_cache: Arc<dyn GridCache>,
    /// Highest id ever handed out, including ids of discarded entries.
    last_id: u64,
}

impl History {
    pub fn new(
        anchor: Grid,
        anchor_id: u64,
        change_data: Arc<dyn ChangeDataStore>,
        grid_cache: Arc<dyn GridCache>,
    ) -> Self {
        History {
            anchor,
            anchor_id,
            entries: Vec::new(),
            position: 0,
            change_data,
            grid_cache,
            last_id: anchor_id,
        }
    }

    /// Rebuilds a history from recorded entries (used when loading).
    pub fn with_entries(
        anchor: Grid,
        anchor_id: u64,
        entries: Vec<HistoryEntry>,
        position: usize,
        change_data: Arc<dyn ChangeDataStore>,
        grid_cache: Arc<dyn GridCache>,
    ) -> Result<Self, HistoryError> {
        if position > entries.len() {
            return Err(HistoryError::PositionOutOfRange { position, len: entries.len() });
        }
        let last_id = entries.iter().map(|e| e.id).max().unwrap_or(0).max(anchor_id);
        Ok(History {
            anchor,
            anchor_id,
            entries,
            position,
            change_data,
            grid_cache,
            last_id,
        })
    }

    pub fn anchor(&self) -> &Grid {
        &self.anchor
    }

    pub fn anchor_id(&self) -> u64 {
        self.anchor_id
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    /// Entries that can be redone.
    pub fn future_entries(&self) -> &[HistoryEntry] {
        &self.entries[self.position..]
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn change_data(&self) -> &Arc<dyn ChangeDataStore> {
        &self.change_data
    }

    pub fn grid_cache(&self) -> &Arc<dyn GridCache> {
        &self.grid_cache
    }

    pub fn current_grid(&self) -> Result<Grid, HistoryError> {
        self.grid_at(self.position)
    }

    /// Grid after the first `position` entries.
    pub fn grid_at(&self, position: usize) -> Result<Grid, HistoryError> {
        if position > self.entries.len() {
            return Err(HistoryError::PositionOutOfRange { position, len: self.entries.len() });
        }
        if position == 0 {
            return Ok(self.anchor.clone());
        }

        // Closest cached grid at or before the target.
        let mut start = 0;
        let mut grid = self.anchor.clone();
        for p in (1..=position).rev() {
            if let Some(cached) = self.grid_cache.get(self.entries[p - 1].id) {
                start = p;
                grid = cached;
                break;
            }
        }
        if start == position {
            debug!("History: grid at position {} served from cache", position);
            return Ok(grid);
        }

        debug!("History: replaying entries {}..{}", start, position);
        for entry in &self.entries[start..position] {
            let ctx = ChangeContext::new(entry.id, self.change_data.as_ref(), grid.runner());
            let result = match entry.change.apply(&grid, &ctx) {
                Ok(result) => result,
                Err(ChangeError::DoesNotApply(reason)) => {
                    error!(
                        "History: entry {} ('{}') no longer applies during replay: {}",
                        entry.id, entry.description, reason
                    );
                    return Err(HistoryError::Corrupted {
                        entry_id: entry.id,
                        description: entry.description.clone(),
                        reason,
                    });
                }
                Err(e) => return Err(e.into()),
            };
            grid = result.grid;
        }
        self.grid_cache.put(self.entries[position - 1].id, grid.clone());
        Ok(grid)
    }

    /// Applies `change` to the current grid and records it. Any redo branch is
    /// discarded. Returns the id of the new entry.
    pub fn add_entry(
        &mut self,
        description: impl Into<String>,
        operation: Option<Arc<dyn Operation>>,
        change: Arc<dyn Change>,
    ) -> Result<u64, HistoryError> {
        let description = description.into();
        let current = self.current_grid()?;
        let id = self.allocate_entry_id();

        let ctx = ChangeContext::new(id, self.change_data.as_ref(), current.runner());
        let immediate = change.is_immediate();
        let started = Utc::now();
        if !immediate {
            info!("History: applying long-running change '{}'", description);
        }
        let result = match change.apply(&current, &ctx) {
            Ok(result) => result,
            Err(e) => {
                // Drop whatever side data the attempt stored under the unused id.
                self.change_data.evict(id)?;
                return Err(match e {
                    ChangeError::DoesNotApply(reason) => {
                        warn!("History: rejected '{}': {}", description, reason);
                        HistoryError::ChangeRejected { description, reason }
                    }
                    other => other.into(),
                });
            }
        };

        if !immediate {
            info!(
                "History: long-running change '{}' finished in {} ms",
                description,
                (Utc::now() - started).num_milliseconds()
            );
        }

        if self.position < self.entries.len() {
            let discarded: Vec<u64> = self.entries.drain(self.position..).map(|e| e.id).collect();
            for entry_id in &discarded {
                self.change_data.evict(*entry_id)?;
            }
            self.grid_cache.evict(&discarded);
            info!("History: discarded {} undone entries", discarded.len());
        }

        debug!(
            "History: entry {} '{}' applied ({:?})",
            id, description, result.preservation
        );
        self.entries.push(HistoryEntry::new(id, description, operation, change));
        self.position = self.entries.len();
        self.grid_cache.put(id, result.grid);
        Ok(id)
    }

    pub fn apply_operation(&mut self, operation: Arc<dyn Operation>) -> Result<u64, HistoryError> {
        operation.validate()?;
        let change = operation.create_change()?;
        self.add_entry(operation.description(), Some(operation), change)
    }

    /// Validates and analyzes `recipe`, checks that the current grid has
    /// every required column, then applies the operations in order.
    ///
    /// Operations applied before a failing one stay in the history; they can
    /// be undone like any other entry.
    pub fn apply_recipe(&mut self, recipe: &Recipe) -> Result<Vec<u64>, HistoryError> {
        recipe.validate()?;
        let analysis = recipe.analyze()?;
        let grid = self.current_grid()?;
        let missing: Vec<String> = analysis
            .required_columns
            .iter()
            .filter(|column| grid.column_model().index_of(column).is_none())
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(HistoryError::MissingColumns { columns: missing });
        }

        let mut ids = Vec::with_capacity(recipe.len());
        for operation in recipe.operations() {
            ids.push(self.apply_operation(Arc::clone(operation))?);
        }
        info!("History: applied recipe of {} operations", ids.len());
        Ok(ids)
    }

    pub fn undo(&mut self) -> Result<(), HistoryError> {
        if self.position == 0 {
            return Err(HistoryError::NothingToUndo);
        }
        self.position -= 1;
        Ok(())
    }

    pub fn redo(&mut self) -> Result<(), HistoryError> {
        if self.position >= self.entries.len() {
            return Err(HistoryError::NothingToRedo);
        }
        self.position += 1;
        Ok(())
    }

    pub fn go_to(&mut self, position: usize) -> Result<(), HistoryError> {
        if position > self.entries.len() {
            return Err(HistoryError::PositionOutOfRange { position, len: self.entries.len() });
        }
        self.position = position;
        Ok(())
    }

    fn allocate_entry_id(&mut self) -> u64 {
        let now = u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0);
        let id = now.max(self.last_id + 1).max(self.anchor_id + 1);
        self.last_id = id;
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{ColumnModel, Row};
    use crate::operations::{ColumnRemovalOperation, ColumnRenameOperation};
    use crate::runner::LocalRunner;

    fn history() -> History {
        let runner = LocalRunner::new(Some(2), 2).unwrap().shared();
        let grid = Grid::from_rows(
            runner,
            ColumnModel::from_names(["a", "b", "c"]).unwrap(),
            vec![Row::new(["1", "2", "3"]), Row::new(["4", "5", "6"])],
        );
        History::new(
            grid,
            1,
            Arc::new(InMemoryChangeDataStore::new()),
            Arc::new(InMemoryGridCache::new(4)),
        )
    }

    #[test]
    fn test_initial_state() {
        let mut history = history();
        assert_eq!(history.position(), 0);
        assert!(history.entries().is_empty());
        assert!(matches!(history.undo(), Err(HistoryError::NothingToUndo)));
        assert!(matches!(history.redo(), Err(HistoryError::NothingToRedo)));
    }

    #[test]
    fn test_entry_ids_increase() {
        let mut history = history();
        let first = history.apply_operation(Arc::new(ColumnRenameOperation::new("a", "x"))).unwrap();
        let second = history.apply_operation(Arc::new(ColumnRenameOperation::new("x", "y"))).unwrap();
        assert!(first > 1);
        assert!(second > first);

        history.undo().unwrap();
        let third = history.apply_operation(Arc::new(ColumnRemovalOperation::new("x"))).unwrap();
        assert!(third > second);
    }

    #[test]
    fn test_rejected_change_leaves_history_untouched() {
        let mut history = history();
        history.apply_operation(Arc::new(ColumnRemovalOperation::new("a"))).unwrap();
        history.undo().unwrap();

        let err = history
            .apply_operation(Arc::new(ColumnRenameOperation::new("missing", "z")))
            .unwrap_err();
        assert!(matches!(err, HistoryError::ChangeRejected { .. }));
        assert_eq!(history.entries().len(), 1);
        assert_eq!(history.position(), 0);
        history.redo().unwrap();
        assert_eq!(history.current_grid().unwrap().column_model().names(), vec!["b", "c"]);
    }

    #[test]
    fn test_go_to_bounds() {
        let mut history = history();
        history.apply_operation(Arc::new(ColumnRemovalOperation::new("c"))).unwrap();
        history.go_to(0).unwrap();
        assert_eq!(history.current_grid().unwrap().column_model().len(), 3);
        assert!(matches!(
            history.go_to(5),
            Err(HistoryError::PositionOutOfRange { position: 5, len: 1 })
        ));
    }
}
