// src/operations/recipe.rs
//! Ordered lists of operations and their static column analysis.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use super::{Operation, OperationError};
use crate::registry::OperationRegistry;

#[derive(Debug, Error)]
pub enum RecipeError {
    #[error("Operation {index} ({op_id}) depends on column '{column}', which an earlier operation removed")]
    ColumnRemoved { index: usize, op_id: String, column: String },
    #[error("Operation {index} ({op_id}) creates column '{column}', which already exists at that point")]
    ColumnExists { index: usize, op_id: String, column: String },
    #[error("Operation {index} is invalid: {source}")]
    InvalidOperation {
        index: usize,
        #[source]
        source: OperationError,
    },
    #[error("Operation {index} ({op_id}) cannot be applied to renamed columns")]
    RenameUnsupported { index: usize, op_id: String },
    #[error("A recipe must be a JSON array of operations")]
    NotAnArray,
    #[error("Malformed recipe JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Column lineage of a recipe, computed without running it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecipeAnalysis {
    /// Columns the input grid must provide.
    pub required_columns: BTreeSet<String>,
    /// Columns present at the end that were not in the input.
    pub new_columns: BTreeSet<String>,
    /// Columns created and then removed again along the way.
    pub internal_columns: BTreeSet<String>,
}

#[derive(Debug, Clone, Default)]
pub struct Recipe {
    operations: Vec<Arc<dyn Operation>>,
}

#[derive(Default)]
struct ScanState {
    present: BTreeSet<String>,
    absent: BTreeSet<String>,
    required: BTreeSet<String>,
    produced: BTreeSet<String>,
    internal: BTreeSet<String>,
}

impl ScanState {
    fn depend_on(&mut self, index: usize, op: &dyn Operation, column: &str) -> Result<(), RecipeError> {
        if self.present.contains(column) {
            return Ok(());
        }
        if self.absent.contains(column) {
            return Err(RecipeError::ColumnRemoved {
                index,
                op_id: op.op_id().to_string(),
                column: column.to_string(),
            });
        }
        self.required.insert(column.to_string());
        self.present.insert(column.to_string());
        Ok(())
    }
}

impl Recipe {
    pub fn new(operations: Vec<Arc<dyn Operation>>) -> Self {
        Recipe { operations }
    }

    pub fn operations(&self) -> &[Arc<dyn Operation>] {
        &self.operations
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Parses the JSON array form. Entries with an unregistered `op` id (and
    /// `null` entries) are kept as `UnknownOperation`s; `validate` rejects them.
    pub fn from_json(json: &str, registry: &OperationRegistry) -> Result<Self, RecipeError> {
        let value: serde_json::Value = serde_json::from_str(json)?;
        Self::from_value(value, registry)
    }

    pub fn from_value(value: serde_json::Value, registry: &OperationRegistry) -> Result<Self, RecipeError> {
        let entries = match value {
            serde_json::Value::Array(entries) => entries,
            _ => return Err(RecipeError::NotAnArray),
        };
        let operations = entries
            .into_iter()
            .map(|entry| registry.decode(entry))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Recipe { operations })
    }

    pub fn to_json(&self) -> Result<serde_json::Value, serde_json::Error> {
        let entries = self
            .operations
            .iter()
            .map(|op| op.to_json())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(serde_json::Value::Array(entries))
    }

    pub fn validate(&self) -> Result<(), RecipeError> {
        for (index, op) in self.operations.iter().enumerate() {
            op.validate()
                .map_err(|source| RecipeError::InvalidOperation { index, source })?;
        }
        Ok(())
    }

    /// Scans the operations in order and derives required, new and internal
    /// columns. The scan stops at the first operation whose column effect is
    /// unknown: nothing after it can be attributed to the input.
    pub fn analyze(&self) -> Result<RecipeAnalysis, RecipeError> {
        let mut state = ScanState::default();
        for (index, op) in self.operations.iter().enumerate() {
            let op = op.as_ref();
            if let Some(dependencies) = op.column_dependencies() {
                for column in &dependencies {
                    state.depend_on(index, op, column)?;
                }
            }
            let diff = match op.columns_diff() {
                Some(diff) => diff,
                None => {
                    debug!("Recipe: operation {} ({}) has an opaque column effect", index, op.op_id());
                    break;
                }
            };
            for column in diff.modified() {
                state.depend_on(index, op, column)?;
            }
            for column in diff.deleted() {
                state.depend_on(index, op, column)?;
                state.present.remove(column);
                state.absent.insert(column.clone());
                if state.produced.contains(column) {
                    state.internal.insert(column.clone());
                }
            }
            for column in diff.added_names() {
                if state.present.contains(column) {
                    return Err(RecipeError::ColumnExists {
                        index,
                        op_id: op.op_id().to_string(),
                        column: column.to_string(),
                    });
                }
                state.present.insert(column.to_string());
                state.produced.insert(column.to_string());
                state.absent.remove(column);
                state.internal.remove(column);
            }
        }

        let new_columns = state.present.difference(&state.required).cloned().collect();
        let internal_columns = state
            .internal
            .iter()
            .filter(|c| !state.required.contains(*c) && !state.present.contains(*c))
            .cloned()
            .collect();
        Ok(RecipeAnalysis {
            required_columns: state.required,
            new_columns,
            internal_columns,
        })
    }

    /// Every column name mentioned by a dependency or a diff.
    pub fn mentioned_columns(&self) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        for op in &self.operations {
            if let Some(dependencies) = op.column_dependencies() {
                names.extend(dependencies);
            }
            if let Some(diff) = op.columns_diff() {
                names.extend(diff.column_names());
            }
        }
        names
    }

    pub fn rename_columns(&self, renames: &BTreeMap<String, String>) -> Result<Recipe, RecipeError> {
        let operations = self
            .operations
            .iter()
            .enumerate()
            .map(|(index, op)| {
                op.rename_columns(renames).ok_or_else(|| RecipeError::RenameUnsupported {
                    index,
                    op_id: op.op_id().to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Recipe { operations })
    }

    /// Renames internal columns that would clash with `existing` columns of
    /// the grid the recipe is applied to. Each clashing column `c` becomes the
    /// first of `c_2`, `c_3`, ... not used by the grid nor by the recipe.
    pub fn avoid_internal_column_collisions(&self, existing: &BTreeSet<String>) -> Result<Recipe, RecipeError> {
        let analysis = self.analyze()?;
        let mut taken = self.mentioned_columns();
        taken.extend(existing.iter().cloned());

        let mut renames = BTreeMap::new();
        for column in analysis.internal_columns.intersection(existing) {
            let mut suffix = 2usize;
            let fresh = loop {
                let candidate = format!("{}_{}", column, suffix);
                if !taken.contains(&candidate) {
                    break candidate;
                }
                suffix += 1;
            };
            taken.insert(fresh.clone());
            renames.insert(column.clone(), fresh);
        }
        if renames.is_empty() {
            return Ok(self.clone());
        }
        debug!("Recipe: renaming internal columns {:?}", renames);
        self.rename_columns(&renames)
    }
}
