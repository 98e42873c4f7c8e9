// src/lib.rs
//! Gridline: immutable grids transformed through an undo/redo history, with
//! pluggable execution backends and static analysis of operation recipes.

pub mod cli;
pub mod grid;
pub mod history;
pub mod operations;
pub mod registry;
pub mod runner;
pub mod settings;

pub use grid::{ColumnMetadata, ColumnModel, Grid, Row};
pub use history::{History, HistoryEntry, HistoryError, HistoryStore, HistoryStoreError};
pub use operations::{ColumnsDiff, Operation, Recipe, RecipeAnalysis, RecipeError};
pub use registry::Registries;
pub use runner::{LocalRunner, Runner};
pub use settings::EngineSettings;
