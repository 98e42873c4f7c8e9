// src/cli/show_history.rs
use std::path::Path;

use super::{CliContext, CliError};

pub fn run(ctx: &CliContext, dir: &Path) -> Result<(), CliError> {
    let history = ctx.load_history(dir)?;
    println!("Anchor {} | position {} of {}\n", history.anchor_id(), history.position(), history.entries().len());

    println!("{:<3} {:<15} {:<26} {}", "", "Entry", "Time", "Description");
    println!("{}", "-".repeat(80));
    for (index, entry) in history.entries().iter().enumerate() {
        let marker = if index < history.position() { "*" } else { " " };
        println!(
            "{:<3} {:<15} {:<26} {}",
            marker,
            entry.id,
            entry.time.format("%Y-%m-%d %H:%M:%S%.3f"),
            entry.description
        );
    }

    let grid = history.current_grid()?;
    println!("\nColumns: {}", grid.column_model().names().join(", "));
    println!("Rows: {} ({} records)", grid.row_count()?, grid.record_count()?);
    Ok(())
}
