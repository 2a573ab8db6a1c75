use serde::Serialize;

use crate::catalog::{StorageRoot, LEGACY_DB_NAME};
use crate::error::StoreResult;
use crate::legacy::{table_names, V1_CATALOG_TABLE, V2_DATA_TABLE, V2_VOLUMES_TABLE};
use crate::types::LegacyVersion;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "shape", content = "tables")]
pub(crate) enum LegacyShape {
    Absent,
    V1,
    V2,
    /// A legacy database exists but matches neither layout.
    Unrecognized(Vec<String>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum MigrationNeed {
    None,
    V1,
    V2,
}

impl MigrationNeed {
    pub(crate) fn version(&self) -> Option<LegacyVersion> {
        match self {
            Self::None => None,
            Self::V1 => Some(LegacyVersion::V1),
            Self::V2 => Some(LegacyVersion::V2),
        }
    }
}

pub(crate) fn classify_tables(tables: &[String]) -> LegacyShape {
    let has = |name: &str| tables.iter().any(|t| t == name);
    if has(V1_CATALOG_TABLE) && !has(V2_VOLUMES_TABLE) {
        LegacyShape::V1
    } else if has(V2_VOLUMES_TABLE) && has(V2_DATA_TABLE) {
        LegacyShape::V2
    } else {
        LegacyShape::Unrecognized(tables.to_vec())
    }
}

/// Inspect the legacy database, if any, without assuming a schema.
///
/// A file that cannot be opened or read as SQLite is reported as
/// `Unrecognized` with no tables, so it never blocks status or migration.
pub(crate) fn inspect_legacy(root: &StorageRoot) -> StoreResult<LegacyShape> {
    if !root.has_database(LEGACY_DB_NAME)? {
        return Ok(LegacyShape::Absent);
    }
    let path = root.legacy_path();
    match table_names(&path) {
        Ok(tables) => Ok(classify_tables(&tables)),
        Err(err) => {
            tracing::warn!(path = %path.display(), %err, "legacy database is unreadable");
            Ok(LegacyShape::Unrecognized(Vec::new()))
        }
    }
}

/// An unrecognized legacy database is left on disk untouched and reported as
/// needing no migration.
pub(crate) fn check_migration_needed(root: &StorageRoot) -> StoreResult<MigrationNeed> {
    Ok(match inspect_legacy(root)? {
        LegacyShape::Absent => MigrationNeed::None,
        LegacyShape::V1 => MigrationNeed::V1,
        LegacyShape::V2 => MigrationNeed::V2,
        LegacyShape::Unrecognized(tables) => {
            tracing::warn!(
                path = %root.legacy_path().display(),
                ?tables,
                "legacy database matches no known layout, ignoring it"
            );
            MigrationNeed::None
        }
    })
}
