// src/operations/columns_diff.rs

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddedColumn {
    pub name: String,
    /// Column the new one is inserted after; `None` places it first.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<String>,
}

/// Column-level effect of an operation, known before running it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnsDiff {
    added: Vec<AddedColumn>,
    deleted: BTreeSet<String>,
    modified: BTreeSet<String>,
}

impl ColumnsDiff {
    /// No column is touched (row-only operations, reorderings).
    pub fn empty() -> Self {
        ColumnsDiff::default()
    }

    pub fn modify_single_column(name: impl Into<String>) -> Self {
        ColumnsDiff::builder().modify_column(name).build()
    }

    pub fn builder() -> ColumnsDiffBuilder {
        ColumnsDiffBuilder::default()
    }

    pub fn added(&self) -> &[AddedColumn] {
        &self.added
    }

    pub fn added_names(&self) -> impl Iterator<Item = &str> {
        self.added.iter().map(|c| c.name.as_str())
    }

    pub fn deleted(&self) -> &BTreeSet<String> {
        &self.deleted
    }

    pub fn modified(&self) -> &BTreeSet<String> {
        &self.modified
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.deleted.is_empty() && self.modified.is_empty()
    }

    /// Every column name the diff mentions.
    pub fn column_names(&self) -> BTreeSet<String> {
        self.added
            .iter()
            .flat_map(|c| std::iter::once(&c.name).chain(c.after.iter()))
            .chain(self.deleted.iter())
            .chain(self.modified.iter())
            .cloned()
            .collect()
    }

    pub fn rename_columns(&self, renames: &BTreeMap<String, String>) -> ColumnsDiff {
        let rename = |name: &String| renames.get(name).unwrap_or(name).clone();
        ColumnsDiff {
            added: self
                .added
                .iter()
                .map(|c| AddedColumn {
                    name: rename(&c.name),
                    after: c.after.as_ref().map(rename),
                })
                .collect(),
            deleted: self.deleted.iter().map(rename).collect(),
            modified: self.modified.iter().map(rename).collect(),
        }
    }
}

#[derive(Debug, Default)]
pub struct ColumnsDiffBuilder {
    diff: ColumnsDiff,
}

impl ColumnsDiffBuilder {
    pub fn add_column(mut self, name: impl Into<String>, after: Option<&str>) -> Self {
        self.diff.added.push(AddedColumn {
            name: name.into(),
            after: after.map(str::to_string),
        });
        self
    }

    pub fn delete_column(mut self, name: impl Into<String>) -> Self {
        self.diff.deleted.insert(name.into());
        self
    }

    pub fn modify_column(mut self, name: impl Into<String>) -> Self {
        self.diff.modified.insert(name.into());
        self
    }

    pub fn build(self) -> ColumnsDiff {
        self.diff
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rename_touches_every_position() {
        let diff = ColumnsDiff::builder()
            .add_column("b", Some("a"))
            .delete_column("a")
            .modify_column("c")
            .build();
        let renames: BTreeMap<String, String> =
            [("a".to_string(), "x".to_string()), ("c".to_string(), "z".to_string())]
                .into_iter()
                .collect();
        let renamed = diff.rename_columns(&renames);
        assert_eq!(renamed.added()[0].after.as_deref(), Some("x"));
        assert_eq!(renamed.added()[0].name, "b");
        assert!(renamed.deleted().contains("x"));
        assert!(renamed.modified().contains("z"));
        assert_eq!(
            renamed.column_names().into_iter().collect::<Vec<_>>(),
            vec!["b", "x", "z"]
        );
    }

    #[test]
    fn test_empty_and_single_modification() {
        assert!(ColumnsDiff::empty().is_empty());
        let diff = ColumnsDiff::modify_single_column("price");
        assert!(!diff.is_empty());
        assert_eq!(diff.modified().len(), 1);
    }
}
