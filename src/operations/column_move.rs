// src/operations/column_move.rs

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::{rename, tagged_json, ColumnsDiff, Operation, OperationError};
use crate::grid::{Grid, Row};
use crate::history::{Change, ChangeContext, ChangeError, ChangeResult, GridPreservation};

pub const OP_ID: &str = "core/column-move";
pub const CHANGE_KIND: &str = "column-move";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnMoveOperation {
    pub column_name: String,
    /// Target position in the column order.
    pub index: usize,
}

impl ColumnMoveOperation {
    pub fn new(column_name: impl Into<String>, index: usize) -> Self {
        ColumnMoveOperation { column_name: column_name.into(), index }
    }
}

impl Operation for ColumnMoveOperation {
    fn op_id(&self) -> &str {
        OP_ID
    }

    fn description(&self) -> String {
        format!("Move column {} to position {}", self.column_name, self.index)
    }

    fn column_dependencies(&self) -> Option<BTreeSet<String>> {
        Some(BTreeSet::from([self.column_name.clone()]))
    }

    // Reordering changes neither the set of columns nor their content.
    fn columns_diff(&self) -> Option<ColumnsDiff> {
        Some(ColumnsDiff::empty())
    }

    fn rename_columns(&self, renames: &BTreeMap<String, String>) -> Option<Arc<dyn Operation>> {
        Some(Arc::new(ColumnMoveOperation::new(rename(renames, &self.column_name), self.index)))
    }

    fn to_json(&self) -> Result<serde_json::Value, serde_json::Error> {
        tagged_json(OP_ID, &self.description(), self)
    }

    fn create_change(&self) -> Result<Arc<dyn Change>, OperationError> {
        Ok(Arc::new(ColumnMoveChange {
            column_name: self.column_name.clone(),
            index: self.index,
        }))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnMoveChange {
    pub column_name: String,
    pub index: usize,
}

impl Change for ColumnMoveChange {
    fn kind(&self) -> &'static str {
        CHANGE_KIND
    }

    fn apply(&self, grid: &Grid, _ctx: &ChangeContext<'_>) -> Result<ChangeResult, ChangeError> {
        let from = grid.column_model().require_index(&self.column_name)?;
        let model = grid.column_model().move_column(from, self.index)?;
        if from == self.index {
            return Ok(ChangeResult::new(grid.clone(), GridPreservation::RowsPreserved));
        }
        let to = self.index;
        let moved = grid.map_rows(&|_row_id: u64, row: &Row| row.with_cell_moved(from, to), model)?;
        Ok(ChangeResult::new(moved, GridPreservation::RowsPreserved))
    }

    fn payload(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}
