// src/runner/snapshot.rs
//! On-disk snapshot format used by the local runner.
//!
//! ```text
//! <snapshot>/metadata.json     column model, overlay models, counts
//! <snapshot>/part-00000.jsonl  one JSON row per line
//! <snapshot>/_SUCCESS          written last
//! ```
//!
//! Snapshots are assembled in a hidden sibling directory and renamed into
//! place, so a reader never sees a half-written snapshot carrying the marker.

use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use super::error::{BackendError, BackendResult};
use super::progress::TaskState;
use crate::grid::{ColumnModel, OverlayModels, Row};

const METADATA_FILE: &str = "metadata.json";
const SUCCESS_MARKER: &str = "_SUCCESS";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SnapshotMetadata {
    pub column_model: ColumnModel,
    #[serde(default)]
    pub overlay_models: OverlayModels,
    pub row_count: u64,
    pub partition_count: usize,
}

fn part_file_name(index: usize) -> String {
    format!("part-{:05}.jsonl", index)
}

pub(crate) fn is_complete(path: &Path) -> bool {
    path.join(SUCCESS_MARKER).is_file()
}

fn sibling(path: &Path, tag: &str) -> BackendResult<PathBuf> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| BackendError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("snapshot path {:?} has no file name", path),
        )))?;
    Ok(parent.join(format!(".{}.{}-{}", name, tag, Uuid::new_v4())))
}

pub(crate) fn write_snapshot(
    path: &Path,
    column_model: &ColumnModel,
    overlay_models: &OverlayModels,
    partitions: &[Arc<Vec<Row>>],
    state: &TaskState,
) -> BackendResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let staging = sibling(path, "tmp")?;
    fs::create_dir(&staging)?;

    let written = write_contents(&staging, column_model, overlay_models, partitions, state)
        .and_then(|_| state.checkpoint());
    if let Err(e) = written {
        if let Err(cleanup) = fs::remove_dir_all(&staging) {
            warn!("Snapshot: failed to clean up staging directory {:?}: {}", staging, cleanup);
        }
        return Err(e);
    }

    // Swap into place; a previous snapshot is only removed once the new one is visible.
    if path.exists() {
        let retired = sibling(path, "old")?;
        fs::rename(path, &retired)?;
        if let Err(e) = fs::rename(&staging, path) {
            let _ = fs::rename(&retired, path);
            let _ = fs::remove_dir_all(&staging);
            return Err(e.into());
        }
        if let Err(e) = fs::remove_dir_all(&retired) {
            warn!("Snapshot: failed to remove retired snapshot {:?}: {}", retired, e);
        }
    } else {
        fs::rename(&staging, path)?;
    }
    debug!("Snapshot written to {:?} ({} partitions)", path, partitions.len());
    Ok(())
}

fn write_contents(
    dir: &Path,
    column_model: &ColumnModel,
    overlay_models: &OverlayModels,
    partitions: &[Arc<Vec<Row>>],
    state: &TaskState,
) -> BackendResult<()> {
    let total = partitions.len().max(1);
    let mut row_count = 0u64;
    for (index, partition) in partitions.iter().enumerate() {
        state.checkpoint()?;
        let mut writer = BufWriter::new(File::create(dir.join(part_file_name(index)))?);
        for row in partition.iter() {
            serde_json::to_writer(&mut writer, row)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
        row_count += partition.len() as u64;
        // Leave headroom: 100 is only reported once the snapshot is in place.
        let percent = (index + 1) * 99 / total;
        state.set_progress(u8::try_from(percent).unwrap_or(99));
    }

    let metadata = SnapshotMetadata {
        column_model: column_model.clone(),
        overlay_models: overlay_models.clone(),
        row_count,
        partition_count: partitions.len(),
    };
    let writer = BufWriter::new(File::create(dir.join(METADATA_FILE))?);
    serde_json::to_writer_pretty(writer, &metadata)?;

    state.checkpoint()?;
    File::create(dir.join(SUCCESS_MARKER))?.sync_all()?;
    Ok(())
}

pub(crate) fn read_metadata(path: &Path) -> BackendResult<SnapshotMetadata> {
    if !is_complete(path) {
        return Err(BackendError::IncompleteSnapshot(path.to_path_buf()));
    }
    Ok(serde_json::from_reader(BufReader::new(File::open(path.join(METADATA_FILE))?))?)
}

pub(crate) fn read_snapshot(path: &Path) -> BackendResult<(SnapshotMetadata, Vec<Vec<Row>>)> {
    let metadata = read_metadata(path)?;

    let mut partitions = Vec::with_capacity(metadata.partition_count);
    for index in 0..metadata.partition_count {
        let reader = BufReader::new(File::open(path.join(part_file_name(index)))?);
        let mut rows = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            rows.push(serde_json::from_str::<Row>(&line)?);
        }
        partitions.push(rows);
    }

    let loaded: u64 = partitions.iter().map(|p| p.len() as u64).sum();
    if loaded != metadata.row_count {
        warn!(
            "Snapshot {:?}: metadata declares {} rows but {} were read",
            path, metadata.row_count, loaded
        );
        return Err(BackendError::IncompleteSnapshot(path.to_path_buf()));
    }
    Ok((metadata, partitions))
}
