// src/history/entry.rs

use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::change::Change;
use crate::operations::Operation;

/// One applied change. Immutable once recorded.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub id: u64,
    pub time: DateTime<Utc>,
    pub description: String,
    /// The operation the change was created from, kept for provenance.
    pub operation: Option<Arc<dyn Operation>>,
    pub change: Arc<dyn Change>,
}

impl HistoryEntry {
    pub fn new(
        id: u64,
        description: impl Into<String>,
        operation: Option<Arc<dyn Operation>>,
        change: Arc<dyn Change>,
    ) -> Self {
        HistoryEntry {
            id,
            time: Utc::now(),
            description: description.into(),
            operation,
            change,
        }
    }
}
