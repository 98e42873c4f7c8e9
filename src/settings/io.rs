// src/settings/io.rs
use directories_next::ProjectDirs;
use std::fs;
use std::io::{self, BufReader, BufWriter, ErrorKind};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

const QUALIFIER: &str = "org";
const ORGANIZATION: &str = "Gridline";
const APPLICATION: &str = "gridline";
const CONFIG_FILE: &str = "engine_settings.json";

pub fn default_config_path() -> io::Result<PathBuf> {
    if let Some(proj_dirs) = ProjectDirs::from(QUALIFIER, ORGANIZATION, APPLICATION) {
        Ok(proj_dirs.config_dir().join(CONFIG_FILE))
    } else {
        Err(io::Error::new(
            ErrorKind::NotFound,
            "Could not determine project directories for engine settings.",
        ))
    }
}

/// Reads settings from `path`. A missing file yields the defaults.
pub fn load_settings_from_path<T: for<'de> serde::de::Deserialize<'de> + Default>(path: &Path) -> io::Result<T> {
    debug!("EngineSettings: Attempting to load settings from {:?}", path);
    match fs::File::open(path) {
        Ok(file) => match serde_json::from_reader(BufReader::new(file)) {
            Ok(settings) => {
                info!("EngineSettings: Loaded settings from {:?}", path);
                Ok(settings)
            }
            Err(e) => {
                error!("EngineSettings: Failed to parse settings file {:?}: {}", path, e);
                Err(io::Error::new(
                    ErrorKind::InvalidData,
                    format!("Failed to parse settings file: {}", e),
                ))
            }
        },
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!("EngineSettings: No settings file at {:?}. Using defaults.", path);
            Ok(Default::default())
        }
        Err(e) => {
            error!("EngineSettings: Failed to open settings file {:?}: {}", path, e);
            Err(e)
        }
    }
}

pub fn save_settings_to_path<T: serde::Serialize>(settings: &T, path: &Path) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    info!("EngineSettings: Saving settings to {:?}", path);
    let writer = BufWriter::new(fs::File::create(path)?);
    serde_json::to_writer_pretty(writer, settings).map_err(|e| {
        error!("EngineSettings: Failed to serialize settings to {:?}: {}", path, e);
        io::Error::new(ErrorKind::Other, e)
    })
}
