// src/grid/row.rs

use serde::{Deserialize, Serialize};

/// One row of a grid. Blank cells are empty strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Row {
    pub cells: Vec<String>,
    #[serde(default)]
    pub flagged: bool,
}

impl Row {
    pub fn new<I, S>(cells: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Row {
            cells: cells.into_iter().map(Into::into).collect(),
            flagged: false,
        }
    }

    pub fn cell(&self, index: usize) -> Option<&str> {
        self.cells.get(index).map(String::as_str)
    }

    pub fn is_cell_blank(&self, index: usize) -> bool {
        self.cell(index).map_or(true, |c| c.trim().is_empty())
    }

    /// Whether this row opens a new record: the first row always does,
    /// afterwards any row with a non-blank key (first) cell.
    pub fn starts_record(&self, row_id: u64) -> bool {
        row_id == 0 || !self.is_cell_blank(0)
    }

    pub fn with_flag(&self, flagged: bool) -> Self {
        Row {
            cells: self.cells.clone(),
            flagged,
        }
    }

    pub fn without_cell(&self, index: usize) -> Self {
        let mut cells = self.cells.clone();
        if index < cells.len() {
            cells.remove(index);
        }
        Row { cells, flagged: self.flagged }
    }

    pub fn with_cell_moved(&self, from: usize, to: usize) -> Self {
        let mut cells = self.cells.clone();
        // Short rows are padded so positional moves stay aligned with the schema
        let needed = from.max(to) + 1;
        if cells.len() < needed {
            cells.resize(needed, String::new());
        }
        let cell = cells.remove(from);
        cells.insert(to, cell);
        Row { cells, flagged: self.flagged }
    }
}
