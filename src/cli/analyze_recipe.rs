// src/cli/analyze_recipe.rs
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use super::{CliContext, CliError};
use crate::operations::Recipe;

pub fn run(ctx: &CliContext, recipe_path: &Path, existing: Vec<String>) -> Result<(), CliError> {
    let recipe = Recipe::from_json(&fs::read_to_string(recipe_path)?, &ctx.registries.operations)?;
    recipe.validate()?;
    let analysis = recipe.analyze()?;
    println!("{}", serde_json::to_string_pretty(&analysis)?);

    let existing: BTreeSet<String> = existing
        .into_iter()
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .collect();
    if !existing.is_empty() && !analysis.internal_columns.is_disjoint(&existing) {
        let renamed = recipe.avoid_internal_column_collisions(&existing)?;
        println!("\nRecipe with internal columns renamed:");
        println!("{}", serde_json::to_string_pretty(&renamed.to_json()?)?);
    }
    Ok(())
}
