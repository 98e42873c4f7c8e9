// src/cli/navigate.rs
use std::path::Path;

use super::{CliContext, CliError};
use crate::history::History;

pub fn undo(ctx: &CliContext, dir: &Path) -> Result<(), CliError> {
    step(ctx, dir, History::undo)
}

pub fn redo(ctx: &CliContext, dir: &Path) -> Result<(), CliError> {
    step(ctx, dir, History::redo)
}

fn step(
    ctx: &CliContext,
    dir: &Path,
    action: fn(&mut History) -> Result<(), crate::history::HistoryError>,
) -> Result<(), CliError> {
    let mut history = ctx.load_history(dir)?;
    action(&mut history)?;
    let grid = history.current_grid()?;
    ctx.save_history(&history, dir)?;
    println!(
        "Position {} of {} | columns: {}",
        history.position(),
        history.entries().len(),
        grid.column_model().names().join(", ")
    );
    Ok(())
}
