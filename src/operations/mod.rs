// src/operations/mod.rs
//! Declarative transformations.
//!
//! An `Operation` is what a user asks for ("rename column foo to bar"). It
//! can describe its column-level effect without touching any data, which is
//! what `Recipe` analysis is built on, and it turns into a `Change` when the
//! history actually executes it.

pub mod column_move;
pub mod column_removal;
pub mod column_rename;
pub mod columns_diff;
pub mod recipe;
pub mod row_flag;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use crate::history::Change;

pub use column_move::ColumnMoveOperation;
pub use column_removal::ColumnRemovalOperation;
pub use column_rename::ColumnRenameOperation;
pub use columns_diff::{AddedColumn, ColumnsDiff, ColumnsDiffBuilder};
pub use recipe::{Recipe, RecipeAnalysis, RecipeError};
pub use row_flag::RowFlagOperation;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OperationError {
    #[error("Unknown operation '{0}'")]
    Unknown(String),
    #[error("Missing operation (null entry)")]
    Null,
    #[error("Invalid '{op_id}' operation: {reason}")]
    Invalid { op_id: String, reason: String },
}

pub trait Operation: Send + Sync + fmt::Debug {
    /// Stable identifier used as the `op` field of the JSON form.
    fn op_id(&self) -> &str;

    fn description(&self) -> String;

    /// Columns read by the operation. `None` when they cannot be predicted.
    fn column_dependencies(&self) -> Option<BTreeSet<String>> {
        None
    }

    /// Column-level effect. `None` when it cannot be predicted.
    fn columns_diff(&self) -> Option<ColumnsDiff> {
        None
    }

    /// Same operation acting on renamed columns. `None` when the operation
    /// does not support renaming.
    fn rename_columns(&self, _renames: &BTreeMap<String, String>) -> Option<Arc<dyn Operation>> {
        None
    }

    fn validate(&self) -> Result<(), OperationError> {
        Ok(())
    }

    /// JSON form, carrying `op` and `description` alongside the parameters.
    fn to_json(&self) -> Result<serde_json::Value, serde_json::Error>;

    fn create_change(&self) -> Result<Arc<dyn Change>, OperationError>;
}

/// Builds the JSON form of an operation from its serializable parameters.
pub(crate) fn tagged_json<P: Serialize>(
    op_id: &str,
    description: &str,
    params: &P,
) -> Result<serde_json::Value, serde_json::Error> {
    let mut value = serde_json::to_value(params)?;
    if let serde_json::Value::Object(map) = &mut value {
        map.insert("op".to_string(), serde_json::Value::String(op_id.to_string()));
        map.insert(
            "description".to_string(),
            serde_json::Value::String(description.to_string()),
        );
    }
    Ok(value)
}

pub(crate) fn rename<'a>(renames: &'a BTreeMap<String, String>, name: &'a str) -> &'a str {
    renames.get(name).map(String::as_str).unwrap_or(name)
}

/// An operation whose `op` id is not registered. Its JSON is kept verbatim so
/// that recipes and history provenance survive a round trip.
#[derive(Debug, Clone, PartialEq)]
pub struct UnknownOperation {
    op_id: String,
    raw: serde_json::Value,
}

impl UnknownOperation {
    pub fn new(raw: serde_json::Value) -> Self {
        let op_id = raw
            .get("op")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        UnknownOperation { op_id, raw }
    }

    pub fn raw(&self) -> &serde_json::Value {
        &self.raw
    }
}

impl Operation for UnknownOperation {
    fn op_id(&self) -> &str {
        &self.op_id
    }

    fn description(&self) -> String {
        self.raw
            .get("description")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| format!("Unknown operation '{}'", self.op_id))
    }

    fn validate(&self) -> Result<(), OperationError> {
        if self.raw.is_null() {
            Err(OperationError::Null)
        } else {
            Err(OperationError::Unknown(self.op_id.clone()))
        }
    }

    fn to_json(&self) -> Result<serde_json::Value, serde_json::Error> {
        Ok(self.raw.clone())
    }

    fn create_change(&self) -> Result<Arc<dyn Change>, OperationError> {
        Err(self
            .validate()
            .err()
            .unwrap_or_else(|| OperationError::Unknown(self.op_id.clone())))
    }
}
