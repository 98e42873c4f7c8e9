// src/operations/column_rename.rs

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::{rename, tagged_json, ColumnsDiff, Operation, OperationError};
use crate::grid::Grid;
use crate::history::{Change, ChangeContext, ChangeError, ChangeResult, GridPreservation};

pub const OP_ID: &str = "core/column-rename";
pub const CHANGE_KIND: &str = "column-rename";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnRenameOperation {
    pub old_column_name: String,
    pub new_column_name: String,
}

impl ColumnRenameOperation {
    pub fn new(old_column_name: impl Into<String>, new_column_name: impl Into<String>) -> Self {
        ColumnRenameOperation {
            old_column_name: old_column_name.into(),
            new_column_name: new_column_name.into(),
        }
    }
}

impl Operation for ColumnRenameOperation {
    fn op_id(&self) -> &str {
        OP_ID
    }

    fn description(&self) -> String {
        format!("Rename column {} to {}", self.old_column_name, self.new_column_name)
    }

    fn column_dependencies(&self) -> Option<BTreeSet<String>> {
        Some(BTreeSet::from([self.old_column_name.clone()]))
    }

    fn columns_diff(&self) -> Option<ColumnsDiff> {
        Some(
            ColumnsDiff::builder()
                .delete_column(self.old_column_name.as_str())
                .add_column(self.new_column_name.as_str(), Some(self.old_column_name.as_str()))
                .build(),
        )
    }

    fn rename_columns(&self, renames: &BTreeMap<String, String>) -> Option<Arc<dyn Operation>> {
        Some(Arc::new(ColumnRenameOperation::new(
            rename(renames, &self.old_column_name),
            rename(renames, &self.new_column_name),
        )))
    }

    fn validate(&self) -> Result<(), OperationError> {
        if self.old_column_name.is_empty() || self.new_column_name.is_empty() {
            return Err(OperationError::Invalid {
                op_id: OP_ID.to_string(),
                reason: "column names must not be empty".to_string(),
            });
        }
        Ok(())
    }

    fn to_json(&self) -> Result<serde_json::Value, serde_json::Error> {
        tagged_json(OP_ID, &self.description(), self)
    }

    fn create_change(&self) -> Result<Arc<dyn Change>, OperationError> {
        self.validate()?;
        Ok(Arc::new(ColumnRenameChange {
            old_column_name: self.old_column_name.clone(),
            new_column_name: self.new_column_name.clone(),
        }))
    }
}

/// Schema-only change: the rows are shared with the input grid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnRenameChange {
    pub old_column_name: String,
    pub new_column_name: String,
}

impl Change for ColumnRenameChange {
    fn kind(&self) -> &'static str {
        CHANGE_KIND
    }

    fn apply(&self, grid: &Grid, _ctx: &ChangeContext<'_>) -> Result<ChangeResult, ChangeError> {
        let model = grid.column_model();
        let index = model.require_index(&self.old_column_name)?;
        let renamed = model.rename_column(index, &self.new_column_name)?;
        Ok(ChangeResult::new(
            grid.with_column_model(renamed),
            GridPreservation::RowsPreserved,
        ))
    }

    fn payload(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}
