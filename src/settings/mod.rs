// src/settings/mod.rs
pub mod io;

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;

use crate::runner::LocalRunner;

pub const ENV_WORKER_THREADS: &str = "GRIDLINE_WORKER_THREADS";
pub const ENV_PARTITION_SIZE: &str = "GRIDLINE_PARTITION_SIZE";
pub const ENV_GRID_CACHE_CAPACITY: &str = "GRIDLINE_GRID_CACHE_CAPACITY";
pub const ENV_LOG: &str = "GRIDLINE_LOG";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineSettings {
    /// `None` means one worker per core.
    pub worker_threads: Option<usize>,
    pub partition_size: usize,
    /// Grid snapshots kept by the in-memory grid cache.
    pub grid_cache_capacity: usize,
    pub log_filter: String,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            worker_threads: None,
            partition_size: LocalRunner::DEFAULT_PARTITION_SIZE,
            grid_cache_capacity: 8,
            log_filter: "info".to_string(),
        }
    }
}

impl EngineSettings {
    /// Settings file from the platform config directory, then environment
    /// overrides. Call `dotenvy::dotenv()` beforehand to pick up a `.env` file.
    pub fn load() -> std::io::Result<Self> {
        let path = io::default_config_path()?;
        Ok(Self::load_from(&path)?.with_env_overrides(|key| std::env::var(key).ok()))
    }

    pub fn load_from(path: &Path) -> std::io::Result<Self> {
        io::load_settings_from_path(path)
    }

    pub fn save_to(&self, path: &Path) -> std::io::Result<()> {
        io::save_settings_to_path(self, path)
    }

    /// Applies `GRIDLINE_*` overrides looked up through `lookup`. Unparsable
    /// values are ignored with a warning.
    pub fn with_env_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(ENV_WORKER_THREADS) {
            match raw.trim().parse::<usize>() {
                Ok(0) => self.worker_threads = None,
                Ok(n) => self.worker_threads = Some(n),
                Err(e) => warn!("EngineSettings: ignoring {}={:?}: {}", ENV_WORKER_THREADS, raw, e),
            }
        }
        if let Some(raw) = lookup(ENV_PARTITION_SIZE) {
            match raw.trim().parse::<usize>() {
                Ok(n) if n > 0 => self.partition_size = n,
                Ok(_) => warn!("EngineSettings: ignoring {}=0", ENV_PARTITION_SIZE),
                Err(e) => warn!("EngineSettings: ignoring {}={:?}: {}", ENV_PARTITION_SIZE, raw, e),
            }
        }
        if let Some(raw) = lookup(ENV_GRID_CACHE_CAPACITY) {
            match raw.trim().parse::<usize>() {
                Ok(n) => self.grid_cache_capacity = n,
                Err(e) => warn!("EngineSettings: ignoring {}={:?}: {}", ENV_GRID_CACHE_CAPACITY, raw, e),
            }
        }
        if let Some(filter) = lookup(ENV_LOG) {
            if !filter.trim().is_empty() {
                self.log_filter = filter;
            }
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = EngineSettings::load_from(&dir.path().join("absent.json")).unwrap();
        assert_eq!(settings, EngineSettings::default());
    }

    #[test]
    fn test_partial_file_and_env_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"partitionSize": 128, "logFilter": "debug"}"#).unwrap();

        let loaded = EngineSettings::load_from(&path).unwrap();
        assert_eq!(loaded.partition_size, 128);
        assert_eq!(loaded.grid_cache_capacity, 8);

        let env: HashMap<&str, &str> = [
            (ENV_WORKER_THREADS, "3"),
            (ENV_PARTITION_SIZE, "not-a-number"),
            (ENV_GRID_CACHE_CAPACITY, "2"),
        ]
        .into_iter()
        .collect();
        let merged = loaded.with_env_overrides(|key| env.get(key).map(|v| v.to_string()));
        assert_eq!(merged.worker_threads, Some(3));
        assert_eq!(merged.partition_size, 128);
        assert_eq!(merged.grid_cache_capacity, 2);
        assert_eq!(merged.log_filter, "debug");
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");
        let settings = EngineSettings {
            worker_threads: Some(2),
            ..EngineSettings::default()
        };
        settings.save_to(&path).unwrap();
        assert_eq!(EngineSettings::load_from(&path).unwrap(), settings);
    }
}
