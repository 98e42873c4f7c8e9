// src/cli/init.rs
use chrono::Utc;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use super::{CliContext, CliError};
use crate::grid::{ColumnModel, Grid, Row};
use crate::history::{History, InMemoryChangeDataStore, InMemoryGridCache};

pub fn run(ctx: &CliContext, dir: &Path, grid_path: &Path) -> Result<(), CliError> {
    if dir.join(crate::history::store::HISTORY_FILE).exists() {
        return Err(CliError::InvalidInput(format!(
            "{} already holds a history",
            dir.display()
        )));
    }
    let raw: Vec<Vec<String>> = serde_json::from_str(&fs::read_to_string(grid_path)?)?;
    let mut raw = raw.into_iter();
    let headers = raw
        .next()
        .ok_or_else(|| CliError::InvalidInput("grid file has no header row".to_string()))?;
    let column_model = ColumnModel::from_names(headers)
        .map_err(|e| CliError::InvalidInput(e.to_string()))?;
    let rows: Vec<Row> = raw.map(Row::new).collect();
    let row_count = rows.len();

    let grid = Grid::from_rows(Arc::clone(&ctx.runner), column_model, rows);
    let anchor_id = u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0);
    let history = History::new(
        grid,
        anchor_id,
        Arc::new(InMemoryChangeDataStore::new()),
        Arc::new(InMemoryGridCache::new(ctx.settings.grid_cache_capacity)),
    );
    ctx.save_history(&history, dir)?;

    println!(
        "Initialized {} ({} columns, {} rows, anchor {})",
        dir.display(),
        history.anchor().column_model().len(),
        row_count,
        anchor_id
    );
    Ok(())
}
