// tests/history_navigation.rs
// Undo/redo, truncation and replay behavior of History.

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use gridline::grid::{ColumnModel, Grid, Row};
use gridline::history::{
    Change, ChangeContext, ChangeDataStore, ChangeError, ChangeResult, GridCache, GridPreservation,
    History, HistoryError, InMemoryChangeDataStore, InMemoryGridCache,
};
use gridline::operations::row_flag::FLAGGED_ROWS_KEY;
use gridline::operations::{
    ColumnMoveOperation, ColumnRemovalOperation, ColumnRenameOperation, Operation, Recipe,
    RowFlagOperation,
};
use gridline::runner::{LocalRunner, Runner};

fn runner() -> Arc<dyn Runner> {
    LocalRunner::new(Some(2), 2).unwrap().shared()
}

fn people() -> Grid {
    Grid::from_rows(
        runner(),
        ColumnModel::from_names(["name", "city", "phone"]).unwrap(),
        vec![
            Row::new(["Ada", "London", "1"]),
            Row::new(["", "", "2"]),
            Row::new(["Grace", "Arlington", "3"]),
            Row::new(["", "Paris", ""]),
            Row::new(["Alan", "London", "5"]),
        ],
    )
}

fn history_with_cache(capacity: usize) -> History {
    History::new(
        people(),
        1,
        Arc::new(InMemoryChangeDataStore::new()),
        Arc::new(InMemoryGridCache::new(capacity)),
    )
}

fn operations() -> Vec<Arc<dyn Operation>> {
    vec![
        Arc::new(ColumnRenameOperation::new("phone", "tel")),
        Arc::new(RowFlagOperation::where_equals(true, "city", "London")),
        Arc::new(ColumnMoveOperation::new("tel", 0)),
        Arc::new(ColumnRemovalOperation::new("city")),
    ]
}

/// Drops continuation rows without a city; record boundaries stay intact.
#[derive(Debug)]
struct DropCitylessContinuations;

impl Change for DropCitylessContinuations {
    fn kind(&self) -> &'static str {
        "test/drop-cityless-continuations"
    }

    fn apply(&self, grid: &Grid, _ctx: &ChangeContext<'_>) -> Result<ChangeResult, ChangeError> {
        let city = grid.column_model().require_index("city")?;
        let filtered = grid.filter_rows(&|row_id: u64, row: &Row| {
            row.starts_record(row_id) || !row.is_cell_blank(city)
        })?;
        Ok(ChangeResult::new(filtered, GridPreservation::RecordsPreserved))
    }

    fn payload(&self) -> Result<serde_json::Value, serde_json::Error> {
        Ok(serde_json::Value::Null)
    }
}

/// Applies once, then refuses: simulates a change that no longer matches
/// the grid it is replayed on.
#[derive(Debug, Default)]
struct AppliesOnce {
    calls: AtomicUsize,
}

impl Change for AppliesOnce {
    fn kind(&self) -> &'static str {
        "test/applies-once"
    }

    fn apply(&self, grid: &Grid, _ctx: &ChangeContext<'_>) -> Result<ChangeResult, ChangeError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) > 0 {
            return Err(ChangeError::DoesNotApply("column layout changed".to_string()));
        }
        Ok(ChangeResult::new(grid.clone(), GridPreservation::RowsPreserved))
    }

    fn payload(&self) -> Result<serde_json::Value, serde_json::Error> {
        Ok(serde_json::Value::Null)
    }
}

#[test]
fn undo_redo_round_trip() {
    let mut history = history_with_cache(4);
    let mut states = vec![history.current_grid().unwrap()];
    for op in operations() {
        history.apply_operation(op).unwrap();
        states.push(history.current_grid().unwrap());
    }
    assert_eq!(history.position(), 4);

    for expected in states.iter().rev().skip(1) {
        history.undo().unwrap();
        assert!(history.current_grid().unwrap().structurally_eq(expected).unwrap());
    }
    assert!(matches!(history.undo(), Err(HistoryError::NothingToUndo)));

    for expected in states.iter().skip(1) {
        history.redo().unwrap();
        assert!(history.current_grid().unwrap().structurally_eq(expected).unwrap());
    }
    assert!(matches!(history.redo(), Err(HistoryError::NothingToRedo)));

    let last = history.current_grid().unwrap();
    assert_eq!(last.column_model().names(), vec!["tel", "name"]);
    let flags: Vec<bool> = last.collect_rows().unwrap().iter().map(|r| r.flagged).collect();
    assert_eq!(flags, vec![true, false, false, false, true]);
}

#[test]
fn replay_does_not_depend_on_cache() {
    let mut cached = history_with_cache(8);
    let mut uncached = history_with_cache(0);
    for op in operations() {
        cached.apply_operation(Arc::clone(&op)).unwrap();
        uncached.apply_operation(op).unwrap();
    }
    for position in 0..=4 {
        let a = cached.grid_at(position).unwrap();
        let b = uncached.grid_at(position).unwrap();
        assert!(a.structurally_eq(&b).unwrap(), "grids differ at position {}", position);
    }
    assert!(uncached.grid_cache().cached_ids().is_empty());
}

#[test]
fn adding_after_undo_discards_future_entries() {
    let mut history = history_with_cache(8);
    let first = history
        .apply_operation(Arc::new(ColumnRenameOperation::new("phone", "tel")))
        .unwrap();
    let flagged = history
        .apply_operation(Arc::new(RowFlagOperation::all_rows(true)))
        .unwrap();
    assert!(history.change_data().get(flagged, FLAGGED_ROWS_KEY).unwrap().is_some());
    assert!(history.grid_cache().cached_ids().contains(&flagged));

    history.undo().unwrap();
    let replacement = history
        .apply_operation(Arc::new(ColumnRemovalOperation::new("city")))
        .unwrap();

    let ids: Vec<u64> = history.entries().iter().map(|e| e.id).collect();
    assert_eq!(ids, vec![first, replacement]);
    assert_eq!(history.position(), 2);
    assert!(history.change_data().get(flagged, FLAGGED_ROWS_KEY).unwrap().is_none());
    assert!(!history.grid_cache().cached_ids().contains(&flagged));
    assert!(matches!(history.redo(), Err(HistoryError::NothingToRedo)));
}

#[test]
fn change_data_is_reused_on_replay() {
    let mut history = history_with_cache(0);
    let id = history
        .apply_operation(Arc::new(RowFlagOperation::where_equals(true, "city", "London")))
        .unwrap();
    assert_eq!(
        history.change_data().get(id, FLAGGED_ROWS_KEY).unwrap(),
        Some(serde_json::json!([0, 4]))
    );

    // Replay must use the recorded row ids rather than re-evaluating the selector.
    history
        .change_data()
        .put(id, FLAGGED_ROWS_KEY, serde_json::json!([1]))
        .unwrap();
    let flags: Vec<bool> = history
        .current_grid()
        .unwrap()
        .collect_rows()
        .unwrap()
        .iter()
        .map(|r| r.flagged)
        .collect();
    assert_eq!(flags, vec![false, true, false, false, false]);
}

#[test]
fn records_preserved_change_keeps_record_count() {
    let mut history = history_with_cache(4);
    let before = history.current_grid().unwrap();
    assert_eq!(before.row_count().unwrap(), 5);
    assert_eq!(before.record_count().unwrap(), 3);

    let change = Arc::new(DropCitylessContinuations);
    let store = InMemoryChangeDataStore::new();
    let direct = change
        .apply(&before, &ChangeContext::new(99, &store, before.runner()))
        .unwrap();
    assert_eq!(direct.preservation, GridPreservation::RecordsPreserved);

    history
        .add_entry("Drop continuation rows without city", None, change)
        .unwrap();
    let after = history.current_grid().unwrap();
    assert_eq!(after.row_count().unwrap(), 4);
    assert_eq!(after.record_count().unwrap(), 3);
    assert!(after.structurally_eq(&direct.grid).unwrap());
}

#[test]
fn replay_failure_reports_corruption() {
    let mut history = history_with_cache(0);
    let id = history
        .add_entry("Fragile change", None, Arc::new(AppliesOnce::default()))
        .unwrap();
    match history.current_grid() {
        Err(HistoryError::Corrupted { entry_id, description, .. }) => {
            assert_eq!(entry_id, id);
            assert_eq!(description, "Fragile change");
        }
        other => panic!("expected corruption, got {:?}", other),
    }
    // The anchor is still reachable.
    history.undo().unwrap();
    assert_eq!(history.current_grid().unwrap().column_model().len(), 3);
}

#[test]
fn recipe_checks_required_columns_before_running() {
    let mut history = history_with_cache(4);
    let recipe = Recipe::new(vec![
        Arc::new(ColumnRenameOperation::new("name", "full_name")),
        Arc::new(ColumnRemovalOperation::new("email")),
    ]);
    match history.apply_recipe(&recipe) {
        Err(HistoryError::MissingColumns { columns }) => assert_eq!(columns, vec!["email"]),
        other => panic!("expected missing columns, got {:?}", other),
    }
    assert!(history.entries().is_empty());

    let recipe = Recipe::new(vec![
        Arc::new(ColumnRenameOperation::new("name", "full_name")),
        Arc::new(ColumnRemovalOperation::new("phone")),
    ]);
    let ids = history.apply_recipe(&recipe).unwrap();
    assert_eq!(ids.len(), 2);
    assert_eq!(
        history.current_grid().unwrap().column_model().names(),
        vec!["full_name", "city"]
    );
    assert_eq!(history.entries()[0].description, "Rename column name to full_name");
}

#[derive(Clone, Default)]
struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[test]
fn long_running_changes_are_timed_in_the_log() {
    let logs = LogBuffer::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish();

    let mut history = history_with_cache(4);
    tracing::subscriber::with_default(subscriber, || {
        history
            .apply_operation(Arc::new(ColumnRenameOperation::new("phone", "tel")))
            .unwrap();
        history
            .apply_operation(Arc::new(RowFlagOperation::all_rows(true)))
            .unwrap();
    });

    let output = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
    let timed: Vec<&str> = output.lines().filter(|l| l.contains("long-running change")).collect();
    assert_eq!(timed.len(), 2, "{}", output);
    assert!(timed.iter().all(|l| l.contains("Flag all rows")), "{}", output);
    assert!(timed[1].contains("finished in"));
    assert_eq!(history.position(), 2);
}
