// src/cli/apply_recipe.rs
use std::fs;
use std::path::Path;

use super::{CliContext, CliError};
use crate::operations::Recipe;

pub fn run(ctx: &CliContext, dir: &Path, recipe_path: &Path) -> Result<(), CliError> {
    let recipe = Recipe::from_json(&fs::read_to_string(recipe_path)?, &ctx.registries.operations)?;
    let mut history = ctx.load_history(dir)?;
    let outcome = history.apply_recipe(&recipe);
    // Operations applied before a failure are kept, so save either way.
    ctx.save_history(&history, dir)?;
    let ids = outcome?;

    let grid = history.current_grid()?;
    println!("Applied {} operations (entries {:?})", ids.len(), ids);
    println!("Columns: {}", grid.column_model().names().join(", "));
    Ok(())
}
