// src/cli/mod.rs
// Maintenance commands over a saved history directory

pub mod analyze_recipe;
pub mod apply_recipe;
pub mod init;
pub mod navigate;
pub mod show_history;

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

use crate::history::{History, HistoryError, HistoryStore, HistoryStoreError};
use crate::operations::RecipeError;
use crate::registry::Registries;
use crate::runner::{BackendError, Runner};
use crate::settings::EngineSettings;

#[derive(Parser)]
#[command(name = "gridline")]
#[command(about = "Gridline - versioned grid engine with undo/redo history and recipe analysis", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create a history directory from a JSON grid (array of rows, first row = headers)
    Init {
        /// History directory to create
        dir: PathBuf,
        /// JSON file holding the grid
        grid: PathBuf,
    },

    /// List the entries of a saved history
    History {
        /// History directory
        dir: PathBuf,
    },

    /// Undo the last applied entry
    Undo {
        /// History directory
        dir: PathBuf,
    },

    /// Redo the next undone entry
    Redo {
        /// History directory
        dir: PathBuf,
    },

    /// Print required, new and internal columns of a recipe without running it
    AnalyzeRecipe {
        /// JSON file holding the recipe
        recipe: PathBuf,
        /// Columns of the target grid; internal columns clashing with them are renamed
        #[arg(long, value_delimiter = ',')]
        existing: Vec<String>,
    },

    /// Apply a recipe to the current state of a saved history
    ApplyRecipe {
        /// History directory
        dir: PathBuf,
        /// JSON file holding the recipe
        recipe: PathBuf,
    },
}

#[derive(Debug, Error)]
pub enum CliError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{0}")]
    Backend(#[from] BackendError),
    #[error("{0}")]
    History(#[from] HistoryError),
    #[error("{0}")]
    Store(#[from] HistoryStoreError),
    #[error("{0}")]
    Recipe(#[from] RecipeError),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Shared by every command.
pub struct CliContext {
    pub runner: Arc<dyn Runner>,
    pub registries: Arc<Registries>,
    pub settings: EngineSettings,
}

impl CliContext {
    pub fn store(&self) -> HistoryStore {
        HistoryStore::new(Arc::clone(&self.registries))
            .with_grid_cache_capacity(self.settings.grid_cache_capacity)
    }

    pub fn load_history(&self, dir: &Path) -> Result<History, CliError> {
        let anchor_id = HistoryStore::read_anchor_id(dir)?;
        Ok(self.store().load(&self.runner, dir, anchor_id)?)
    }

    pub fn save_history(&self, history: &History, dir: &Path) -> Result<(), CliError> {
        Ok(self.store().save_async(history, dir).join()?)
    }
}

pub fn run(command: Commands, ctx: &CliContext) -> Result<(), CliError> {
    match command {
        Commands::Init { dir, grid } => init::run(ctx, &dir, &grid),
        Commands::History { dir } => show_history::run(ctx, &dir),
        Commands::Undo { dir } => navigate::undo(ctx, &dir),
        Commands::Redo { dir } => navigate::redo(ctx, &dir),
        Commands::AnalyzeRecipe { recipe, existing } => analyze_recipe::run(ctx, &recipe, existing),
        Commands::ApplyRecipe { dir, recipe } => apply_recipe::run(ctx, &dir, &recipe),
    }
}
