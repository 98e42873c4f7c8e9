// src/history/change_data/mod.rs
//! Side data attached to history entries.
//!
//! Some changes depend on data that is expensive or impossible to recompute
//! (external lookups, fetched content). It is stored per `(entry id, key)`
//! so that replaying an entry after undo/redo reuses the original result.

mod memory;
mod sqlite;

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use memory::InMemoryChangeDataStore;
pub use sqlite::SqliteChangeDataStore;

#[derive(Debug, Error)]
pub enum ChangeDataError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeDataRecord {
    pub entry_id: u64,
    pub key: String,
    pub data: serde_json::Value,
}

pub trait ChangeDataStore: Send + Sync + fmt::Debug {
    fn get(&self, entry_id: u64, key: &str) -> Result<Option<serde_json::Value>, ChangeDataError>;

    fn put(&self, entry_id: u64, key: &str, data: serde_json::Value) -> Result<(), ChangeDataError>;

    /// Drops every key stored for `entry_id`.
    fn evict(&self, entry_id: u64) -> Result<(), ChangeDataError>;

    /// All records, ordered by entry id then key.
    fn records(&self) -> Result<Vec<ChangeDataRecord>, ChangeDataError>;
}
