use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::Deserialize;

use crate::db::queries::ConflictPolicy;
use crate::extract::RecordPolicy;

/// Application configuration loaded from TOML config file.
/// All fields have defaults; the config file is optional.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Root of the song-catalog files.
    pub song_data_dir: PathBuf,
    /// Root of the activity-log files.
    pub log_data_dir: PathBuf,
    /// Custom database path (overrides XDG default).
    pub db_path: Option<PathBuf>,
    /// Data file extension, without the dot.
    pub extension: String,
    /// Conflict handling for songs and artists.
    pub conflict: ConflictPolicy,
    /// Reject a whole file on its first malformed record.
    pub strict: bool,
    /// Stop the run at the first failed file.
    pub fail_fast: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            song_data_dir: PathBuf::from("data/song_data"),
            log_data_dir: PathBuf::from("data/log_data"),
            db_path: None,
            extension: crate::DATA_EXTENSION.to_string(),
            conflict: ConflictPolicy::default(),
            strict: false,
            fail_fast: false,
        }
    }
}

impl AppConfig {
    /// Load config from `~/.config/songplay-etl/config.toml`.
    /// Returns default config if file doesn't exist.
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => {
                log::debug!("No config file found, using defaults");
                Self::default()
            }
        }
    }

    /// Load config from an explicit path, falling back to defaults (with a
    /// warning) if it can't be read or parsed.
    pub fn load_from(path: &Path) -> Self {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) => {
                log::warn!("Failed to read {}: {}. Using defaults.", path.display(), e);
                return Self::default();
            }
        };
        match toml::from_str::<AppConfig>(&contents) {
            Ok(config) => {
                log::info!("Loaded config from {}", path.display());
                config
            }
            Err(e) => {
                log::warn!("Failed to parse {}: {}. Using defaults.", path.display(), e);
                Self::default()
            }
        }
    }

    pub fn record_policy(&self) -> RecordPolicy {
        if self.strict {
            RecordPolicy::Abort
        } else {
            RecordPolicy::Skip
        }
    }

    fn config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", crate::APP_NAME)
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }
}

/// Resolve the default database path using XDG data directory.
pub fn default_db_path() -> PathBuf {
    if let Some(dirs) = ProjectDirs::from("", "", crate::APP_NAME) {
        let data_dir = dirs.data_dir();
        std::fs::create_dir_all(data_dir).ok();
        data_dir.join("songplays.db")
    } else {
        PathBuf::from("songplays.db")
    }
}
