// src/runner/error.rs

use std::path::PathBuf;
use thiserror::Error;

/// Failures raised by an execution backend. Grid values involved stay valid,
/// so callers may retry at their discretion.
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Snapshot at {0} is incomplete (missing completion marker)")]
    IncompleteSnapshot(PathBuf),
    #[error("Row source was not produced by the '{0}' runner")]
    ForeignRowSource(&'static str),
    #[error("Operation cancelled")]
    Cancelled,
    #[error("Worker failure: {0}")]
    Worker(String),
}

pub type BackendResult<T> = Result<T, BackendError>;
