use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};

const CONFIG_FILE_NAME: &str = "config.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct MigrationConfig {
    /// Pause after each written volume so SQLite and the allocator can catch up.
    #[serde(default = "default_volume_pause_ms")]
    pub(crate) volume_pause_ms: u64,
    /// Pause after each legacy v1 series.
    #[serde(default = "default_series_pause_ms")]
    pub(crate) series_pause_ms: u64,
    /// Legacy v2 rows deleted per background batch.
    #[serde(default = "default_delete_batch_size")]
    pub(crate) delete_batch_size: usize,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            volume_pause_ms: default_volume_pause_ms(),
            series_pause_ms: default_series_pause_ms(),
            delete_batch_size: default_delete_batch_size(),
        }
    }
}

impl MigrationConfig {
    pub(crate) fn volume_pause(&self) -> Duration {
        Duration::from_millis(self.volume_pause_ms)
    }

    pub(crate) fn series_pause(&self) -> Duration {
        Duration::from_millis(self.series_pause_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ThumbnailConfig {
    #[serde(default = "default_thumbnail_width")]
    pub(crate) max_width: u32,
    #[serde(default = "default_thumbnail_height")]
    pub(crate) max_height: u32,
}

impl Default for ThumbnailConfig {
    fn default() -> Self {
        Self {
            max_width: default_thumbnail_width(),
            max_height: default_thumbnail_height(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct LibraryConfig {
    #[serde(default = "default_decode_timeout_ms")]
    pub(crate) decode_timeout_ms: u64,
    #[serde(default = "default_debug_log_capacity")]
    pub(crate) debug_log_capacity: usize,
    #[serde(default)]
    pub(crate) migration: MigrationConfig,
    #[serde(default)]
    pub(crate) thumbnail: ThumbnailConfig,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            decode_timeout_ms: default_decode_timeout_ms(),
            debug_log_capacity: default_debug_log_capacity(),
            migration: MigrationConfig::default(),
            thumbnail: ThumbnailConfig::default(),
        }
    }
}

impl LibraryConfig {
    pub(crate) fn decode_timeout(&self) -> Duration {
        Duration::from_millis(self.decode_timeout_ms.max(1))
    }
}

fn default_decode_timeout_ms() -> u64 {
    10_000
}

fn default_debug_log_capacity() -> usize {
    50
}

fn default_volume_pause_ms() -> u64 {
    10
}

fn default_series_pause_ms() -> u64 {
    50
}

fn default_delete_batch_size() -> usize {
    5
}

fn default_thumbnail_width() -> u32 {
    250
}

fn default_thumbnail_height() -> u32 {
    360
}

pub(crate) fn config_file_path(data_dir: &Path) -> PathBuf {
    data_dir.join(CONFIG_FILE_NAME)
}

/// Missing or unreadable config falls back to defaults.
pub(crate) fn load_config(path: &Path) -> LibraryConfig {
    match std::fs::read_to_string(path) {
        Ok(data) => serde_json::from_str(&data).unwrap_or_else(|err| {
            tracing::warn!(path = %path.display(), %err, "ignoring malformed config");
            LibraryConfig::default()
        }),
        Err(_) => LibraryConfig::default(),
    }
}

pub(crate) fn save_config(path: &Path, config: &LibraryConfig) -> StoreResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| StoreError::io(e, parent))?;
    }
    let json = serde_json::to_string_pretty(config)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, &json).map_err(|e| StoreError::io(e, &tmp))?;
    std::fs::rename(&tmp, path).map_err(|e| StoreError::io(e, path))?;
    Ok(())
}
