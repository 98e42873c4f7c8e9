// src/runner/local.rs
//! In-process runner: rows are held in fixed-size partitions, bulk row work
//! runs on a rayon pool and snapshot saves on a tokio blocking pool.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use rayon::prelude::*;
use tracing::{debug, info};

use super::error::{BackendError, BackendResult};
use super::progress::ProgressingFuture;
use super::snapshot;
use super::{AnyState, GridData, PartitionFold, RowFilter, RowMapper, RowSource, Runner};
use crate::grid::{Grid, OverlayModels, Row};
use crate::settings::EngineSettings;

const RUNNER_NAME: &str = "local";

#[derive(Debug, Clone)]
struct LocalRows {
    partitions: Vec<Arc<Vec<Row>>>,
    /// Row id of the first row of each partition.
    offsets: Vec<u64>,
    total: u64,
}

impl LocalRows {
    fn from_partitions(partitions: Vec<Arc<Vec<Row>>>) -> Self {
        let mut offsets = Vec::with_capacity(partitions.len());
        let mut total = 0u64;
        for partition in &partitions {
            offsets.push(total);
            total += partition.len() as u64;
        }
        LocalRows { partitions, offsets, total }
    }

    fn from_rows(rows: Vec<Row>, partition_size: usize) -> Self {
        let size = partition_size.max(1);
        let mut partitions = Vec::with_capacity(rows.len() / size + 1);
        let mut rows = rows.into_iter().peekable();
        while rows.peek().is_some() {
            partitions.push(Arc::new(rows.by_ref().take(size).collect::<Vec<_>>()));
        }
        Self::from_partitions(partitions)
    }
}

#[derive(Clone)]
pub struct LocalRunner {
    partition_size: usize,
    pool: Arc<rayon::ThreadPool>,
    runtime: Arc<tokio::runtime::Runtime>,
}

impl LocalRunner {
    pub const DEFAULT_PARTITION_SIZE: usize = 4096;

    /// `worker_threads: None` lets rayon pick one thread per core.
    pub fn new(worker_threads: Option<usize>, partition_size: usize) -> BackendResult<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(worker_threads.unwrap_or(0))
            .thread_name(|i| format!("gridline-worker-{}", i))
            .build()
            .map_err(|e| BackendError::Worker(e.to_string()))?;
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("gridline-io")
            .enable_all()
            .build()?;
        info!(
            "LocalRunner: {} workers, partitions of {} rows",
            pool.current_num_threads(),
            partition_size.max(1)
        );
        Ok(LocalRunner {
            partition_size: partition_size.max(1),
            pool: Arc::new(pool),
            runtime: Arc::new(runtime),
        })
    }

    pub fn from_settings(settings: &EngineSettings) -> BackendResult<Self> {
        Self::new(settings.worker_threads, settings.partition_size)
    }

    pub fn shared(self) -> Arc<dyn Runner> {
        Arc::new(self)
    }

    pub fn partition_size(&self) -> usize {
        self.partition_size
    }

    fn local_rows<'a>(&self, rows: &'a RowSource) -> BackendResult<&'a LocalRows> {
        rows.downcast_ref::<LocalRows>()
            .ok_or(BackendError::ForeignRowSource(RUNNER_NAME))
    }
}

impl fmt::Debug for LocalRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalRunner")
            .field("partition_size", &self.partition_size)
            .field("workers", &self.pool.current_num_threads())
            .finish()
    }
}

impl Runner for LocalRunner {
    fn name(&self) -> &'static str {
        RUNNER_NAME
    }

    fn rows_from_vec(&self, rows: Vec<Row>) -> RowSource {
        RowSource::new(LocalRows::from_rows(rows, self.partition_size))
    }

    fn row_count(&self, rows: &RowSource) -> BackendResult<u64> {
        Ok(self.local_rows(rows)?.total)
    }

    fn rows_window(&self, rows: &RowSource, start: u64, limit: usize) -> BackendResult<Vec<(u64, Row)>> {
        let local = self.local_rows(rows)?;
        if start >= local.total || limit == 0 {
            return Ok(Vec::new());
        }
        // Last partition whose first row id is <= start.
        let first = match local.offsets.binary_search(&start) {
            Ok(mut i) => {
                // Skip empty partitions sharing the same offset.
                while i + 1 < local.offsets.len() && local.offsets[i + 1] == start {
                    i += 1;
                }
                i
            }
            Err(i) => i.saturating_sub(1),
        };
        let mut window = Vec::with_capacity(limit.min(4096));
        for (partition, &offset) in local.partitions[first..].iter().zip(&local.offsets[first..]) {
            for (i, row) in partition.iter().enumerate() {
                let row_id = offset + i as u64;
                if row_id < start {
                    continue;
                }
                if window.len() == limit {
                    return Ok(window);
                }
                window.push((row_id, row.clone()));
            }
        }
        Ok(window)
    }

    fn map_rows(&self, rows: &RowSource, mapper: &dyn RowMapper) -> BackendResult<RowSource> {
        let local = self.local_rows(rows)?;
        let partitions: Vec<Arc<Vec<Row>>> = self.pool.install(|| {
            local
                .partitions
                .par_iter()
                .zip(local.offsets.par_iter())
                .map(|(partition, &offset)| {
                    Arc::new(
                        partition
                            .iter()
                            .enumerate()
                            .map(|(i, row)| mapper.map_row(offset + i as u64, row))
                            .collect::<Vec<_>>(),
                    )
                })
                .collect()
        });
        debug!("LocalRunner: mapped {} rows over {} partitions", local.total, partitions.len());
        Ok(RowSource::new(LocalRows::from_partitions(partitions)))
    }

    fn filter_rows(&self, rows: &RowSource, filter: &dyn RowFilter) -> BackendResult<RowSource> {
        let local = self.local_rows(rows)?;
        let partitions: Vec<Arc<Vec<Row>>> = self.pool.install(|| {
            local
                .partitions
                .par_iter()
                .zip(local.offsets.par_iter())
                .map(|(partition, &offset)| {
                    Arc::new(
                        partition
                            .iter()
                            .enumerate()
                            .filter(|(i, row)| filter.keep_row(offset + *i as u64, row))
                            .map(|(_, row)| row.clone())
                            .collect::<Vec<_>>(),
                    )
                })
                .collect()
        });
        let filtered = LocalRows::from_partitions(partitions);
        debug!("LocalRunner: filter kept {} of {} rows", filtered.total, local.total);
        Ok(RowSource::new(filtered))
    }

    fn fold_partitions(&self, rows: &RowSource, fold: &PartitionFold<'_>) -> BackendResult<Vec<AnyState>> {
        let local = self.local_rows(rows)?;
        Ok(self.pool.install(|| {
            local
                .partitions
                .par_iter()
                .zip(local.offsets.par_iter())
                .map(|(partition, &offset)| {
                    let mut rows = partition
                        .iter()
                        .enumerate()
                        .map(move |(i, row)| (offset + i as u64, row));
                    fold(&mut rows)
                })
                .collect()
        }))
    }

    fn has_snapshot(&self, path: &Path) -> bool {
        snapshot::is_complete(path)
    }

    fn load_grid_data(&self, path: &Path) -> BackendResult<GridData> {
        let (metadata, partitions) = snapshot::read_snapshot(path)?;
        let rows = LocalRows::from_partitions(partitions.into_iter().map(Arc::new).collect());
        debug!("LocalRunner: loaded {} rows from {:?}", rows.total, path);
        Ok(GridData {
            column_model: metadata.column_model,
            overlay_models: metadata.overlay_models,
            rows: RowSource::new(rows),
        })
    }

    fn snapshot_overlay_models(&self, path: &Path) -> BackendResult<OverlayModels> {
        Ok(snapshot::read_metadata(path)?.overlay_models)
    }

    fn task_handle(&self) -> tokio::runtime::Handle {
        self.runtime.handle().clone()
    }

    fn save_grid_async(&self, grid: &Grid, path: &Path) -> ProgressingFuture<()> {
        let rows = match self.local_rows(grid.row_source()) {
            Ok(rows) => rows.clone(),
            Err(e) => return ProgressingFuture::ready(Err(e)),
        };
        let column_model = grid.column_model().clone();
        let overlay_models = grid.overlay_models().clone();
        let path = path.to_path_buf();
        ProgressingFuture::spawn_blocking(self.runtime.handle(), move |state| {
            snapshot::write_snapshot(&path, &column_model, &overlay_models, &rows.partitions, state)?;
            info!("LocalRunner: saved {} rows to {:?}", rows.total, path);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(n: usize) -> Vec<Row> {
        (0..n).map(|i| Row::new([i.to_string()])).collect()
    }

    #[test]
    fn test_partitioning_and_window() {
        let runner = LocalRunner::new(Some(2), 3).unwrap();
        let source = runner.rows_from_vec(rows(10));
        assert_eq!(runner.row_count(&source).unwrap(), 10);

        let window = runner.rows_window(&source, 4, 4).unwrap();
        let ids: Vec<u64> = window.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![4, 5, 6, 7]);
        assert_eq!(window[0].1.cells, vec!["4"]);

        assert!(runner.rows_window(&source, 10, 5).unwrap().is_empty());
        assert_eq!(runner.rows_window(&source, 8, 100).unwrap().len(), 2);
    }

    #[test]
    fn test_map_keeps_order_and_filter_reindexes() {
        let runner = LocalRunner::new(Some(4), 2).unwrap();
        let source = runner.rows_from_vec(rows(9));
        let mapped = runner
            .map_rows(&source, &|id: u64, row: &Row| Row::new([format!("{}-{}", id, row.cells[0])]))
            .unwrap();
        let all = runner.rows_window(&mapped, 0, usize::MAX).unwrap();
        assert_eq!(all[8].1.cells, vec!["8-8"]);

        let even = runner
            .filter_rows(&source, &|_id: u64, row: &Row| row.cells[0].parse::<u32>().unwrap() % 2 == 0)
            .unwrap();
        let kept = runner.rows_window(&even, 0, usize::MAX).unwrap();
        let ids: Vec<u64> = kept.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![0, 1, 2, 3, 4]);
        assert_eq!(kept[4].1.cells, vec!["8"]);
    }

    #[test]
    fn test_foreign_row_source_rejected() {
        let runner = LocalRunner::new(Some(1), 2).unwrap();
        let foreign = RowSource::new(42u32);
        assert!(matches!(
            runner.row_count(&foreign),
            Err(BackendError::ForeignRowSource("local"))
        ));
    }

    #[test]
    fn test_overlay_models_read_without_rows() {
        let runner = LocalRunner::new(Some(1), 2).unwrap().shared();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snap");
        assert!(runner.snapshot_overlay_models(&path).is_err());

        let grid = Grid::from_rows(
            Arc::clone(&runner),
            crate::grid::ColumnModel::from_names(["n"]).unwrap(),
            rows(5),
        )
        .with_overlay_model("origin", serde_json::json!({ "sheet": "people" }));
        grid.save_to_file_async(&path).join().unwrap();

        let models = runner.snapshot_overlay_models(&path).unwrap();
        assert_eq!(models["origin"]["sheet"], "people");
    }
}
