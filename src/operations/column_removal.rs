// src/operations/column_removal.rs

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::{rename, tagged_json, ColumnsDiff, Operation, OperationError};
use crate::grid::{Grid, Row};
use crate::history::{Change, ChangeContext, ChangeError, ChangeResult, GridPreservation};

pub const OP_ID: &str = "core/column-removal";
pub const CHANGE_KIND: &str = "column-removal";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnRemovalOperation {
    pub column_name: String,
}

impl ColumnRemovalOperation {
    pub fn new(column_name: impl Into<String>) -> Self {
        ColumnRemovalOperation { column_name: column_name.into() }
    }
}

impl Operation for ColumnRemovalOperation {
    fn op_id(&self) -> &str {
        OP_ID
    }

    fn description(&self) -> String {
        format!("Remove column {}", self.column_name)
    }

    fn column_dependencies(&self) -> Option<BTreeSet<String>> {
        Some(BTreeSet::from([self.column_name.clone()]))
    }

    fn columns_diff(&self) -> Option<ColumnsDiff> {
        Some(ColumnsDiff::builder().delete_column(self.column_name.as_str()).build())
    }

    fn rename_columns(&self, renames: &BTreeMap<String, String>) -> Option<Arc<dyn Operation>> {
        Some(Arc::new(ColumnRemovalOperation::new(rename(renames, &self.column_name))))
    }

    fn validate(&self) -> Result<(), OperationError> {
        if self.column_name.is_empty() {
            return Err(OperationError::Invalid {
                op_id: OP_ID.to_string(),
                reason: "column name must not be empty".to_string(),
            });
        }
        Ok(())
    }

    fn to_json(&self) -> Result<serde_json::Value, serde_json::Error> {
        tagged_json(OP_ID, &self.description(), self)
    }

    fn create_change(&self) -> Result<Arc<dyn Change>, OperationError> {
        self.validate()?;
        Ok(Arc::new(ColumnRemovalChange { column_name: self.column_name.clone() }))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnRemovalChange {
    pub column_name: String,
}

impl Change for ColumnRemovalChange {
    fn kind(&self) -> &'static str {
        CHANGE_KIND
    }

    fn apply(&self, grid: &Grid, _ctx: &ChangeContext<'_>) -> Result<ChangeResult, ChangeError> {
        let index = grid.column_model().require_index(&self.column_name)?;
        let model = grid.column_model().remove_column(index)?;
        let narrowed = grid.map_rows(&|_row_id: u64, row: &Row| row.without_cell(index), model)?;
        Ok(ChangeResult::new(narrowed, GridPreservation::RowsPreserved))
    }

    fn payload(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}
