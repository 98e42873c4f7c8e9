// src/history/store.rs
//! Persistence of a history to a directory.
//!
//! ```text
//! <dir>/history.json          entry log and cursor, written last
//! <dir>/initial/              anchor grid snapshot
//! <dir>/grids/<entry id>/     snapshots of cached grids
//! <dir>/change_data.sqlite    change data
//! ```
//!
//! Every file is written under a temporary name and renamed into place, and
//! `history.json` is only replaced once everything it refers to is on disk.
//! An interrupted save therefore leaves the previous save loadable.
//!
//! The anchor snapshot is tagged with its anchor id. A save for another
//! anchor rewrites `initial/` and drops every snapshot under `grids/`; a
//! load refuses an `initial/` tagged with a different id.

use std::collections::{BTreeSet, VecDeque};
use std::fs;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use super::change_data::{
    ChangeDataError, ChangeDataRecord, ChangeDataStore, InMemoryChangeDataStore, SqliteChangeDataStore,
};
use super::entry::HistoryEntry;
use super::error::HistoryError;
use super::grid_cache::{GridCache, InMemoryGridCache};
use super::History;
use crate::grid::Grid;
use crate::registry::{RegistryError, Registries};
use crate::runner::{BackendError, ProgressReporter, ProgressingFuture, Runner, TaskState};

pub const HISTORY_FILE: &str = "history.json";
pub const ANCHOR_DIR: &str = "initial";
pub const GRIDS_DIR: &str = "grids";
pub const CHANGE_DATA_FILE: &str = "change_data.sqlite";
const FORMAT_VERSION: u32 = 1;
/// Overlay model on the saved anchor snapshot naming the anchor id it belongs to.
const ANCHOR_ID_MODEL: &str = "gridline.anchorId";
const DEFAULT_GRID_CACHE_CAPACITY: usize = 8;

#[derive(Debug, Error)]
pub enum HistoryStoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),
    #[error("Change data error: {0}")]
    ChangeData(#[from] ChangeDataError),
    #[error("Entry {entry_id} has change kind '{kind}', which is not registered")]
    UnknownChangeKind { entry_id: u64, kind: String },
    #[error("History was saved for anchor {found}, expected {expected}")]
    AnchorMismatch { expected: u64, found: u64 },
    #[error("Corrupt history file: {0}")]
    Corrupt(String),
    #[error(transparent)]
    History(#[from] HistoryError),
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HistoryFile {
    format_version: u32,
    anchor_id: u64,
    position: usize,
    entries: Vec<EntryRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EntryRecord {
    id: u64,
    time: DateTime<Utc>,
    description: String,
    #[serde(default)]
    operation: Option<serde_json::Value>,
    change_kind: String,
    change: serde_json::Value,
}

impl EntryRecord {
    fn from_entry(entry: &HistoryEntry) -> Result<Self, serde_json::Error> {
        Ok(EntryRecord {
            id: entry.id,
            time: entry.time,
            description: entry.description.clone(),
            operation: entry.operation.as_ref().map(|op| op.to_json()).transpose()?,
            change_kind: entry.change.kind().to_string(),
            change: entry.change.payload()?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct HistoryStore {
    registries: Arc<Registries>,
    grid_cache_capacity: usize,
}

impl HistoryStore {
    pub fn new(registries: Arc<Registries>) -> Self {
        HistoryStore {
            registries,
            grid_cache_capacity: DEFAULT_GRID_CACHE_CAPACITY,
        }
    }

    /// Capacity of the grid cache created for loaded histories.
    pub fn with_grid_cache_capacity(mut self, capacity: usize) -> Self {
        self.grid_cache_capacity = capacity;
        self
    }

    /// Saves on the calling thread, reporting progress to `reporter`.
    pub fn save(
        &self,
        history: &History,
        dir: &Path,
        reporter: &dyn ProgressReporter,
    ) -> Result<(), HistoryStoreError> {
        self.plan_save(history, dir)?.run(reporter, &TaskState::default())
    }

    /// Saves on the runner's task runtime. Cancelling the returned future
    /// before it reaches the `history.json` rename leaves the previous save
    /// in place.
    pub fn save_async(
        &self,
        history: &History,
        dir: &Path,
    ) -> ProgressingFuture<(), HistoryStoreError> {
        let plan = match self.plan_save(history, dir) {
            Ok(plan) => plan,
            Err(e) => return ProgressingFuture::ready(Err(e)),
        };
        let handle = history.anchor().runner().task_handle();
        ProgressingFuture::spawn_blocking(&handle, move |state| plan.run(state, state))
    }

    /// Captures what a save needs from `history` and starts the snapshot
    /// writes. Nothing visible to `load` changes until `SavePlan::run`
    /// commits.
    fn plan_save(&self, history: &History, dir: &Path) -> Result<SavePlan, HistoryStoreError> {
        fs::create_dir_all(dir.join(GRIDS_DIR))?;
        let runner = history.anchor().runner();
        let live_ids: BTreeSet<u64> = history.entries().iter().map(|e| e.id).collect();

        // Everything that can fail comes before the snapshot writes start.
        let change_data = history
            .change_data()
            .records()?
            .into_iter()
            .filter(|r| live_ids.contains(&r.entry_id))
            .collect();
        let file = HistoryFile {
            format_version: FORMAT_VERSION,
            anchor_id: history.anchor_id(),
            position: history.position(),
            entries: history
                .entries()
                .iter()
                .map(EntryRecord::from_entry)
                .collect::<Result<_, _>>()?,
        };

        let anchor_dir = dir.join(ANCHOR_DIR);
        let anchor_current =
            recorded_anchor_id(runner.as_ref(), &anchor_dir) == Some(history.anchor_id());
        let anchor_task = if anchor_current {
            debug!("HistoryStore: anchor snapshot already present in {:?}", anchor_dir);
            None
        } else {
            if anchor_dir.exists() {
                info!(
                    "HistoryStore: {:?} holds another anchor, it will be replaced by anchor {}",
                    anchor_dir,
                    history.anchor_id()
                );
            }
            let staging = temp_sibling(&anchor_dir);
            let task = history
                .anchor()
                .with_overlay_model(ANCHOR_ID_MODEL, serde_json::json!(history.anchor_id()))
                .save_to_file_async(&staging);
            Some((staging, task))
        };

        // Snapshots left by a history on another anchor are never reused.
        let mut keep_grids = if anchor_current { live_ids.clone() } else { BTreeSet::new() };
        let mut snapshots = Vec::new();
        for entry_id in history.grid_cache().cached_ids().intersection(&live_ids) {
            let grid_dir = grid_dir(dir, *entry_id);
            if anchor_current && runner.has_snapshot(&grid_dir) {
                continue;
            }
            // The cache may drop the grid between listing and fetching.
            if let Some(grid) = history.grid_cache().get(*entry_id) {
                snapshots.push(grid.save_to_file_async(&grid_dir));
                keep_grids.insert(*entry_id);
            }
        }

        Ok(SavePlan {
            dir: dir.to_path_buf(),
            anchor_task,
            snapshots,
            keep_grids,
            change_data,
            file,
        })
    }

    /// Anchor id recorded in a saved history, for callers that did not keep it.
    pub fn read_anchor_id(dir: &Path) -> Result<u64, HistoryStoreError> {
        let file: HistoryFile =
            serde_json::from_reader(BufReader::new(fs::File::open(dir.join(HISTORY_FILE))?))?;
        Ok(file.anchor_id)
    }

    pub fn load(
        &self,
        runner: &Arc<dyn Runner>,
        dir: &Path,
        anchor_id: u64,
    ) -> Result<History, HistoryStoreError> {
        let file: HistoryFile =
            serde_json::from_reader(BufReader::new(fs::File::open(dir.join(HISTORY_FILE))?))?;
        if file.format_version > FORMAT_VERSION {
            return Err(HistoryStoreError::Corrupt(format!(
                "format version {} is newer than supported version {}",
                file.format_version, FORMAT_VERSION
            )));
        }
        if file.anchor_id != anchor_id {
            return Err(HistoryStoreError::AnchorMismatch { expected: anchor_id, found: file.anchor_id });
        }
        if file.position > file.entries.len() {
            return Err(HistoryStoreError::Corrupt(format!(
                "position {} beyond {} entries",
                file.position,
                file.entries.len()
            )));
        }

        let anchor_dir = dir.join(ANCHOR_DIR);
        let anchor = Grid::load(runner, &anchor_dir)?;
        match anchor.overlay_models().get(ANCHOR_ID_MODEL).and_then(|id| id.as_u64()) {
            Some(found) if found == anchor_id => {}
            Some(found) => return Err(HistoryStoreError::AnchorMismatch { expected: anchor_id, found }),
            None => {
                return Err(HistoryStoreError::Corrupt(format!(
                    "anchor snapshot {:?} does not record its anchor id",
                    anchor_dir
                )))
            }
        }
        let anchor = anchor.without_overlay_model(ANCHOR_ID_MODEL);
        let mut entries = Vec::with_capacity(file.entries.len());
        let mut previous_id = anchor_id;
        for record in file.entries {
            if record.id <= previous_id {
                return Err(HistoryStoreError::Corrupt(format!(
                    "entry id {} does not follow {}",
                    record.id, previous_id
                )));
            }
            previous_id = record.id;
            entries.push(self.decode_entry(record)?);
        }

        let change_data_path = dir.join(CHANGE_DATA_FILE);
        let change_data = if change_data_path.is_file() {
            let persisted = SqliteChangeDataStore::open_read_only(&change_data_path)?;
            InMemoryChangeDataStore::from_records(persisted.records()?)
        } else {
            InMemoryChangeDataStore::new()
        };

        let grid_cache = InMemoryGridCache::new(self.grid_cache_capacity);
        let live_ids: BTreeSet<u64> = entries.iter().map(|e| e.id).collect();
        for (entry_id, path) in snapshot_dirs(&dir.join(GRIDS_DIR)) {
            if !live_ids.contains(&entry_id) {
                continue;
            }
            if !runner.has_snapshot(&path) {
                warn!("HistoryStore: skipping incomplete snapshot {:?}", path);
                continue;
            }
            match Grid::load(runner, &path) {
                Ok(grid) => grid_cache.put(entry_id, grid),
                Err(e) => warn!("HistoryStore: skipping unreadable snapshot {:?}: {}", path, e),
            }
        }

        info!(
            "HistoryStore: loaded {} entries (position {}) from {:?}, {} cached grids",
            entries.len(),
            file.position,
            dir,
            grid_cache.len()
        );
        Ok(History::with_entries(
            anchor,
            anchor_id,
            entries,
            file.position,
            Arc::new(change_data),
            Arc::new(grid_cache),
        )?)
    }

    fn decode_entry(&self, record: EntryRecord) -> Result<HistoryEntry, HistoryStoreError> {
        let change = self
            .registries
            .changes
            .decode(&record.change_kind, record.change)
            .map_err(|e| match e {
                RegistryError::UnknownChangeKind(kind) => {
                    HistoryStoreError::UnknownChangeKind { entry_id: record.id, kind }
                }
                RegistryError::Json(e) => HistoryStoreError::Json(e),
            })?;
        let operation = match record.operation {
            Some(json) => {
                let operation = self.registries.operations.decode(json)?;
                if !self.registries.operations.contains(operation.op_id()) {
                    warn!(
                        "HistoryStore: entry {} was created by unknown operation '{}'",
                        record.id,
                        operation.op_id()
                    );
                }
                Some(operation)
            }
            None => None,
        };
        Ok(HistoryEntry {
            id: record.id,
            time: record.time,
            description: record.description,
            operation,
            change,
        })
    }
}

/// A save in progress: snapshot writes already running, plus the data for
/// the files written at commit.
struct SavePlan {
    dir: PathBuf,
    /// Staging directory and write task of an anchor snapshot replacing `initial/`.
    anchor_task: Option<(PathBuf, ProgressingFuture<()>)>,
    snapshots: Vec<ProgressingFuture<()>>,
    keep_grids: BTreeSet<u64>,
    change_data: Vec<ChangeDataRecord>,
    file: HistoryFile,
}

impl SavePlan {
    fn run(self, reporter: &dyn ProgressReporter, state: &TaskState) -> Result<(), HistoryStoreError> {
        let SavePlan {
            dir,
            anchor_task,
            snapshots,
            keep_grids,
            change_data,
            file,
        } = self;
        reporter.report_progress(0);

        let anchor_staging = anchor_task.as_ref().map(|(path, _)| path.clone());
        let mut tasks: VecDeque<ProgressingFuture<()>> =
            anchor_task.into_iter().map(|(_, task)| task).chain(snapshots).collect();
        let change_data_tmp = temp_sibling(&dir.join(CHANGE_DATA_FILE));
        let history_tmp = temp_sibling(&dir.join(HISTORY_FILE));

        let staged = join_snapshots(&mut tasks, reporter, state).and_then(|()| {
            state.checkpoint()?;
            SqliteChangeDataStore::create_file(&change_data_tmp, &change_data)?;
            reporter.report_progress(85);
            state.checkpoint()?;
            write_history_file(&history_tmp, &file)?;
            reporter.report_progress(90);
            state.checkpoint()?;
            Ok(())
        });
        let committed = staged.and_then(|()| {
            if let Some(staging) = &anchor_staging {
                replace_dir(staging, &dir.join(ANCHOR_DIR))?;
            }
            fs::rename(&change_data_tmp, dir.join(CHANGE_DATA_FILE))?;
            fs::rename(&history_tmp, dir.join(HISTORY_FILE))?;
            Ok(())
        });
        if let Err(e) = committed {
            for task in &tasks {
                task.cancel();
            }
            // Wait for the snapshot writers to clean up their own staging.
            for task in tasks {
                let _ = task.join();
            }
            remove_leftover(&change_data_tmp);
            remove_leftover(&history_tmp);
            if let Some(staging) = anchor_staging.filter(|p| p.exists()) {
                if let Err(cleanup) = fs::remove_dir_all(&staging) {
                    warn!("HistoryStore: failed to remove {:?}: {}", staging, cleanup);
                }
            }
            match &e {
                HistoryStoreError::Backend(BackendError::Cancelled) => {
                    info!("HistoryStore: save to {:?} cancelled", dir)
                }
                other => warn!("HistoryStore: save to {:?} failed: {}", dir, other),
            }
            return Err(e);
        }

        // Past the commit point: stale snapshots only cost disk space.
        if let Err(e) = remove_stale_grids(&dir, &keep_grids) {
            warn!("HistoryStore: failed to remove stale snapshots in {:?}: {}", dir, e);
        }
        reporter.report_progress(100);
        info!(
            "HistoryStore: saved {} entries (position {}) to {:?}",
            file.entries.len(),
            file.position,
            dir
        );
        Ok(())
    }
}

/// Waits for the snapshot writes in order, forwarding cancellation.
fn join_snapshots(
    tasks: &mut VecDeque<ProgressingFuture<()>>,
    reporter: &dyn ProgressReporter,
    state: &TaskState,
) -> Result<(), HistoryStoreError> {
    let total = tasks.len().max(1);
    let mut done = 0;
    while !tasks.is_empty() {
        state.checkpoint()?;
        if let Some(task) = tasks.pop_front() {
            task.join_within(state)?;
        }
        done += 1;
        reporter.report_progress(u8::try_from(10 + done * 70 / total).unwrap_or(80));
    }
    reporter.report_progress(80);
    Ok(())
}

/// Anchor id stored in the snapshot at `path`, if it is complete and tagged.
fn recorded_anchor_id(runner: &dyn Runner, path: &Path) -> Option<u64> {
    if !runner.has_snapshot(path) {
        return None;
    }
    runner.snapshot_overlay_models(path).ok()?.get(ANCHOR_ID_MODEL)?.as_u64()
}

fn write_history_file(path: &Path, file: &HistoryFile) -> Result<(), HistoryStoreError> {
    let mut writer = BufWriter::new(fs::File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, file)?;
    writer.flush()?;
    writer.get_ref().sync_all()?;
    Ok(())
}

/// Moves the directory `staging` to `target`, replacing what was there.
fn replace_dir(staging: &Path, target: &Path) -> Result<(), HistoryStoreError> {
    if !target.exists() {
        fs::rename(staging, target)?;
        return Ok(());
    }
    let retired = temp_sibling(target);
    fs::rename(target, &retired)?;
    if let Err(e) = fs::rename(staging, target) {
        let _ = fs::rename(&retired, target);
        return Err(e.into());
    }
    if let Err(e) = fs::remove_dir_all(&retired) {
        warn!("HistoryStore: failed to remove retired {:?}: {}", retired, e);
    }
    Ok(())
}

fn remove_leftover(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("HistoryStore: failed to remove {:?}: {}", path, e),
    }
}

fn remove_stale_grids(dir: &Path, keep: &BTreeSet<u64>) -> Result<(), HistoryStoreError> {
    for entry in WalkDir::new(dir.join(GRIDS_DIR)).min_depth(1).max_depth(1) {
        let entry = entry.map_err(|e| HistoryStoreError::Io(e.into()))?;
        let name = entry.file_name().to_string_lossy();
        let stale = match name.parse::<u64>() {
            Ok(id) => !keep.contains(&id),
            // Leftovers of interrupted snapshot writes.
            Err(_) => name.starts_with('.'),
        };
        if stale && entry.file_type().is_dir() {
            debug!("HistoryStore: removing stale snapshot {:?}", entry.path());
            fs::remove_dir_all(entry.path())?;
        }
    }
    Ok(())
}

fn grid_dir(dir: &Path, entry_id: u64) -> PathBuf {
    dir.join(GRIDS_DIR).join(entry_id.to_string())
}

fn temp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.tmp-{}", name, Uuid::new_v4()))
}

/// Snapshot directories under `grids/`, by entry id, oldest first.
fn snapshot_dirs(grids: &Path) -> Vec<(u64, PathBuf)> {
    let mut found: Vec<(u64, PathBuf)> = WalkDir::new(grids)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_dir())
        .filter_map(|e| {
            let id = e.file_name().to_str()?.parse::<u64>().ok()?;
            Some((id, e.into_path()))
        })
        .collect();
    found.sort_by_key(|(id, _)| *id);
    found
}
