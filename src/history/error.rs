// src/history/error.rs

use thiserror::Error;

use super::change::ChangeError;
use super::change_data::ChangeDataError;
use crate::operations::{OperationError, RecipeError};
use crate::runner::BackendError;

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("Nothing to undo")]
    NothingToUndo,
    #[error("Nothing to redo")]
    NothingToRedo,
    #[error("History position {position} out of range (entry count {len})")]
    PositionOutOfRange { position: usize, len: usize },
    /// The change does not apply to the current grid; the history is unchanged.
    #[error("'{description}' cannot be applied: {reason}")]
    ChangeRejected { description: String, reason: String },
    /// A recorded change no longer applies during replay.
    #[error("History corrupted at entry {entry_id} ('{description}'): {reason}")]
    Corrupted {
        entry_id: u64,
        description: String,
        reason: String,
    },
    #[error("Grid is missing columns required by the recipe: {}", .columns.join(", "))]
    MissingColumns { columns: Vec<String> },
    #[error(transparent)]
    Change(#[from] ChangeError),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    ChangeData(#[from] ChangeDataError),
    #[error(transparent)]
    Operation(#[from] OperationError),
    #[error(transparent)]
    Recipe(#[from] RecipeError),
}
