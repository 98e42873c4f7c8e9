// src/grid/column_model.rs

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Schema-level failures. Callers inside a `Change` usually turn these into
/// `ChangeError::DoesNotApply`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error("Column '{0}' already exists")]
    DuplicateColumn(String),
    #[error("No column named '{0}'")]
    UnknownColumn(String),
    #[error("Column index {index} out of range (column count {len})")]
    IndexOutOfRange { index: usize, len: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnMetadata {
    pub name: String,
    /// Name the column had when the dataset was first created.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_name: Option<String>,
    /// Free-form per-column configuration (statistics, reconciliation config...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<serde_json::Value>,
}

impl ColumnMetadata {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        ColumnMetadata {
            original_name: Some(name.clone()),
            name,
            config: None,
        }
    }

    pub fn renamed(&self, new_name: &str) -> Self {
        ColumnMetadata {
            name: new_name.to_string(),
            original_name: self.original_name.clone(),
            config: self.config.clone(),
        }
    }
}

/// Ordered column schema. Names are unique; order is display order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnModel {
    columns: Vec<ColumnMetadata>,
}

impl ColumnModel {
    pub fn new(columns: Vec<ColumnMetadata>) -> Result<Self, ModelError> {
        let mut seen = std::collections::HashSet::with_capacity(columns.len());
        for column in &columns {
            if !seen.insert(column.name.as_str()) {
                return Err(ModelError::DuplicateColumn(column.name.clone()));
            }
        }
        Ok(ColumnModel { columns })
    }

    pub fn from_names<I, S>(names: I) -> Result<Self, ModelError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(names.into_iter().map(ColumnMetadata::new).collect())
    }

    pub fn columns(&self) -> &[ColumnMetadata] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn require_index(&self, name: &str) -> Result<usize, ModelError> {
        self.index_of(name)
            .ok_or_else(|| ModelError::UnknownColumn(name.to_string()))
    }

    pub fn column(&self, name: &str) -> Option<&ColumnMetadata> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn rename_column(&self, index: usize, new_name: &str) -> Result<Self, ModelError> {
        self.check_index(index)?;
        if let Some(existing) = self.index_of(new_name) {
            if existing != index {
                return Err(ModelError::DuplicateColumn(new_name.to_string()));
            }
        }
        let mut columns = self.columns.clone();
        columns[index] = columns[index].renamed(new_name);
        Ok(ColumnModel { columns })
    }

    pub fn remove_column(&self, index: usize) -> Result<Self, ModelError> {
        self.check_index(index)?;
        let mut columns = self.columns.clone();
        columns.remove(index);
        Ok(ColumnModel { columns })
    }

    pub fn move_column(&self, from: usize, to: usize) -> Result<Self, ModelError> {
        self.check_index(from)?;
        self.check_index(to)?;
        let mut columns = self.columns.clone();
        let column = columns.remove(from);
        columns.insert(to, column);
        Ok(ColumnModel { columns })
    }

    fn check_index(&self, index: usize) -> Result<(), ModelError> {
        if index >= self.columns.len() {
            Err(ModelError::IndexOutOfRange { index, len: self.columns.len() })
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_names_rejected() {
        let err = ColumnModel::from_names(["a", "b", "a"]).unwrap_err();
        assert_eq!(err, ModelError::DuplicateColumn("a".to_string()));
    }

    #[test]
    fn test_rename_keeps_original_name() {
        let model = ColumnModel::from_names(["a", "b"]).unwrap();
        let renamed = model.rename_column(0, "z").unwrap();
        assert_eq!(renamed.names(), vec!["z", "b"]);
        assert_eq!(renamed.columns()[0].original_name.as_deref(), Some("a"));
        assert!(model.rename_column(0, "b").is_err());
        // renaming to its own name is a no-op, not a conflict
        assert!(model.rename_column(0, "a").is_ok());
    }

    #[test]
    fn test_move_and_remove() {
        let model = ColumnModel::from_names(["a", "b", "c"]).unwrap();
        assert_eq!(model.move_column(0, 2).unwrap().names(), vec!["b", "c", "a"]);
        assert_eq!(model.remove_column(1).unwrap().names(), vec!["a", "c"]);
        assert_eq!(
            model.move_column(0, 3).unwrap_err(),
            ModelError::IndexOutOfRange { index: 3, len: 3 }
        );
    }
}
