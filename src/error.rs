use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by the on-disk stores (current schema and legacy readers).
#[derive(Debug, Error)]
pub(crate) enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Legacy record decoding error: {0}")]
    Decode(#[from] bincode::error::DecodeError),

    #[error("I/O error at {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },

    #[error("database not found: {}", path.display())]
    DatabaseMissing { path: PathBuf },

    #[error("volume {uuid} not found in {table}")]
    VolumeMissing { uuid: String, table: &'static str },

    #[error("series {id} not found in legacy catalog")]
    SeriesMissing { id: String },
}

impl StoreError {
    pub(crate) fn io(source: std::io::Error, path: impl Into<PathBuf>) -> Self {
        Self::Io {
            source,
            path: path.into(),
        }
    }
}

/// Terminal per-index failures of the image cache.
#[derive(Debug, Error, Clone)]
pub(crate) enum CacheError {
    #[error("image {index} failed to load: {reason}")]
    Load { index: usize, reason: String },

    #[error("image {index} did not load within {timeout_ms} ms")]
    Timeout { index: usize, timeout_ms: u64 },

    #[error("image {index} decode task aborted: {reason}")]
    Task { index: usize, reason: String },
}

#[derive(Debug, Error)]
pub(crate) enum ThumbnailError {
    #[error("no image available to build a thumbnail from")]
    NoSource,

    #[error("thumbnail image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("thumbnail I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures that abort a migration run. Committed volumes stay committed.
#[derive(Debug, Error)]
pub(crate) enum MigrationError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("unsupported legacy schema version {0} (expected 1 or 2)")]
    UnsupportedVersion(u8),

    #[error("legacy database {} is missing", path.display())]
    LegacyMissing { path: PathBuf },
}

pub(crate) type StoreResult<T> = std::result::Result<T, StoreError>;
