// src/operations/row_flag.rs
//! Flags or unflags rows, optionally only those whose cell in a given column
//! equals a value.
//!
//! Matching rows are computed once by folding over the grid and kept as an
//! immutable list of row ids in the change data of the entry; replays reuse
//! that list instead of re-evaluating the selector.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::{rename, tagged_json, ColumnsDiff, Operation, OperationError};
use crate::grid::{Grid, Row};
use crate::history::{Change, ChangeContext, ChangeError, ChangeResult, GridPreservation};
use crate::runner::RowAggregator;

pub const OP_ID: &str = "core/row-flag";
pub const CHANGE_KIND: &str = "row-flag";
pub const FLAGGED_ROWS_KEY: &str = "flagged-rows";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowFlagOperation {
    pub flagged: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl RowFlagOperation {
    /// Applies to every row.
    pub fn all_rows(flagged: bool) -> Self {
        RowFlagOperation { flagged, column_name: None, value: None }
    }

    pub fn where_equals(flagged: bool, column_name: impl Into<String>, value: impl Into<String>) -> Self {
        RowFlagOperation {
            flagged,
            column_name: Some(column_name.into()),
            value: Some(value.into()),
        }
    }
}

impl Operation for RowFlagOperation {
    fn op_id(&self) -> &str {
        OP_ID
    }

    fn description(&self) -> String {
        let verb = if self.flagged { "Flag" } else { "Unflag" };
        match (&self.column_name, &self.value) {
            (Some(column), Some(value)) => format!("{} rows where {} = {}", verb, column, value),
            _ => format!("{} all rows", verb),
        }
    }

    fn column_dependencies(&self) -> Option<BTreeSet<String>> {
        Some(self.column_name.iter().cloned().collect())
    }

    fn columns_diff(&self) -> Option<ColumnsDiff> {
        Some(ColumnsDiff::empty())
    }

    fn rename_columns(&self, renames: &BTreeMap<String, String>) -> Option<Arc<dyn Operation>> {
        Some(Arc::new(RowFlagOperation {
            flagged: self.flagged,
            column_name: self.column_name.as_deref().map(|c| rename(renames, c).to_string()),
            value: self.value.clone(),
        }))
    }

    fn validate(&self) -> Result<(), OperationError> {
        if self.column_name.is_some() != self.value.is_some() {
            return Err(OperationError::Invalid {
                op_id: OP_ID.to_string(),
                reason: "columnName and value must be given together".to_string(),
            });
        }
        Ok(())
    }

    fn to_json(&self) -> Result<serde_json::Value, serde_json::Error> {
        tagged_json(OP_ID, &self.description(), self)
    }

    fn create_change(&self) -> Result<Arc<dyn Change>, OperationError> {
        self.validate()?;
        Ok(Arc::new(RowFlagChange {
            flagged: self.flagged,
            column_name: self.column_name.clone(),
            value: self.value.clone(),
        }))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowFlagChange {
    pub flagged: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

struct MatchingRows {
    selector: Option<(usize, String)>,
}

impl RowAggregator for MatchingRows {
    type State = Vec<u64>;

    fn initial(&self) -> Vec<u64> {
        Vec::new()
    }

    fn with_row(&self, mut ids: Vec<u64>, row_id: u64, row: &Row) -> Vec<u64> {
        let matches = match &self.selector {
            Some((index, value)) => row.cell(*index).unwrap_or_default() == value.as_str(),
            None => true,
        };
        if matches {
            ids.push(row_id);
        }
        ids
    }

    fn combine(&self, mut left: Vec<u64>, right: Vec<u64>) -> Vec<u64> {
        left.extend(right);
        left
    }
}

impl Change for RowFlagChange {
    fn kind(&self) -> &'static str {
        CHANGE_KIND
    }

    fn apply(&self, grid: &Grid, ctx: &ChangeContext<'_>) -> Result<ChangeResult, ChangeError> {
        let selector = match &self.column_name {
            Some(column) => Some((
                grid.column_model().require_index(column)?,
                self.value.clone().unwrap_or_default(),
            )),
            None => None,
        };
        let row_ids: Vec<u64> = ctx.get_or_compute(FLAGGED_ROWS_KEY, || {
            Ok(grid.aggregate_rows(&MatchingRows { selector })?)
        })?;
        let row_ids: HashSet<u64> = row_ids.into_iter().collect();
        let flagged = self.flagged;
        let updated = grid.map_rows(
            &|row_id: u64, row: &Row| {
                if row_ids.contains(&row_id) {
                    row.with_flag(flagged)
                } else {
                    row.clone()
                }
            },
            grid.column_model().clone(),
        )?;
        Ok(ChangeResult::new(updated, GridPreservation::RowsPreserved))
    }

    /// Scans and rewrites every row.
    fn is_immediate(&self) -> bool {
        false
    }

    fn payload(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}
