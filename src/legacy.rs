//! Readers for the two superseded on-disk layouts.
//!
//! v1 keeps one `catalog` row per series whose `manga` column is the whole
//! series (every volume with its OCR pages and raw files) as a bincode blob.
//! v2 splits small per-volume metadata (`volumes`) from the heavy payload
//! (`volumes_data`).

use std::collections::BTreeMap;
use std::path::Path;

use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};
use crate::types::{FileBag, Page};

pub(crate) const V1_CATALOG_TABLE: &str = "catalog";
pub(crate) const V2_VOLUMES_TABLE: &str = "volumes";
pub(crate) const V2_DATA_TABLE: &str = "volumes_data";

fn bincode_config() -> bincode::config::Configuration {
    bincode::config::standard()
}

fn open_read_only(path: &Path) -> StoreResult<Connection> {
    if !path.exists() {
        return Err(StoreError::DatabaseMissing {
            path: path.to_path_buf(),
        });
    }
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    conn.busy_timeout(std::time::Duration::from_secs(5))?;
    Ok(conn)
}

/// Names of the user tables in a database, sorted. Opens without assuming any schema.
pub(crate) fn table_names(path: &Path) -> StoreResult<Vec<String>> {
    let conn = open_read_only(path)?;
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
    )?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

fn into_file_bag(files: BTreeMap<String, Vec<u8>>) -> FileBag {
    files.into_iter().map(|(name, data)| (name, data.into())).collect()
}

// ── v1 ───────────────────────────────────────────────────────────────────

/// OCR document embedded in every v1 volume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct LegacyMokuroData {
    pub(crate) version: String,
    /// Series title.
    pub(crate) title: String,
    pub(crate) title_uuid: String,
    /// Volume title.
    pub(crate) volume: String,
    pub(crate) volume_uuid: String,
    pub(crate) pages: Vec<Page>,
    pub(crate) chars: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct LegacyV1Volume {
    pub(crate) mokuro_data: LegacyMokuroData,
    pub(crate) volume_name: String,
    pub(crate) thumbnail: Option<Vec<u8>>,
    pub(crate) files: BTreeMap<String, Vec<u8>>,
}

impl LegacyV1Volume {
    pub(crate) fn take_files(&mut self) -> FileBag {
        into_file_bag(std::mem::take(&mut self.files))
    }
}

/// One short-lived connection to a v1 database. Callers open a fresh reader
/// per series and drop it as soon as the series is loaded.
pub(crate) struct LegacyV1Reader {
    conn: Connection,
}

impl LegacyV1Reader {
    pub(crate) fn open(path: &Path) -> StoreResult<Self> {
        Ok(Self {
            conn: open_read_only(path)?,
        })
    }

    /// Series keys in catalog order.
    pub(crate) fn series_ids(&self) -> StoreResult<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id FROM catalog ORDER BY rowid")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub(crate) fn volume_count_total(&self) -> StoreResult<usize> {
        let total: i64 = self.conn.query_row(
            "SELECT COALESCE(SUM(volume_count), 0) FROM catalog",
            [],
            |row| row.get(0),
        )?;
        Ok(total as usize)
    }

    pub(crate) fn load_series(&self, id: &str) -> StoreResult<Vec<LegacyV1Volume>> {
        let blob: Option<Vec<u8>> = self
            .conn
            .query_row(
                "SELECT manga FROM catalog WHERE id = ?",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        let blob = blob.ok_or_else(|| StoreError::SeriesMissing { id: id.to_string() })?;
        let (volumes, _) = bincode::serde::decode_from_slice(&blob, bincode_config())?;
        Ok(volumes)
    }
}

// ── v2 ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct LegacyV2Metadata {
    pub(crate) mokuro_version: String,
    pub(crate) series_title: String,
    pub(crate) series_uuid: String,
    pub(crate) volume_title: String,
    pub(crate) volume_uuid: String,
    pub(crate) page_count: usize,
    pub(crate) character_count: u64,
    #[serde(skip)]
    pub(crate) thumbnail: Option<Vec<u8>>,
}

#[derive(Debug, Clone)]
pub(crate) struct LegacyV2Data {
    pub(crate) pages: Vec<Page>,
    pub(crate) files: FileBag,
}

pub(crate) struct LegacyV2Reader {
    conn: Connection,
}

impl LegacyV2Reader {
    pub(crate) fn open(path: &Path) -> StoreResult<Self> {
        Ok(Self {
            conn: open_read_only(path)?,
        })
    }

    /// Every volume's metadata. Small enough to hold in memory at once.
    pub(crate) fn all_metadata(&self) -> StoreResult<Vec<LegacyV2Metadata>> {
        let mut stmt = self
            .conn
            .prepare("SELECT metadata, thumbnail FROM volumes")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, Option<Vec<u8>>>(1)?))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (json, thumbnail) = row?;
            let mut meta: LegacyV2Metadata = serde_json::from_str(&json)?;
            meta.thumbnail = thumbnail;
            out.push(meta);
        }
        Ok(out)
    }

    pub(crate) fn load_volume_data(&self, uuid: &str) -> StoreResult<LegacyV2Data> {
        let row: Option<(String, Vec<u8>)> = self
            .conn
            .query_row(
                "SELECT pages, files FROM volumes_data WHERE volume_uuid = ?",
                params![uuid],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let (pages_json, files_blob) = row.ok_or_else(|| StoreError::VolumeMissing {
            uuid: uuid.to_string(),
            table: V2_DATA_TABLE,
        })?;
        let pages: Vec<Page> = serde_json::from_str(&pages_json)?;
        let (files, _): (BTreeMap<String, Vec<u8>>, usize) =
            bincode::serde::decode_from_slice(&files_blob, bincode_config())?;
        Ok(LegacyV2Data {
            pages,
            files: into_file_bag(files),
        })
    }
}

/// Write access to a v2 database, used only to drop rows that have already
/// been migrated.
pub(crate) struct LegacyV2Pruner {
    conn: Connection,
}

impl LegacyV2Pruner {
    pub(crate) fn open(path: &Path) -> StoreResult<Self> {
        if !path.exists() {
            return Err(StoreError::DatabaseMissing {
                path: path.to_path_buf(),
            });
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Ok(Self { conn })
    }

    pub(crate) fn delete_volumes(&mut self, uuids: &[String]) -> StoreResult<usize> {
        let tx = self.conn.transaction()?;
        let mut deleted = 0;
        for uuid in uuids {
            deleted += tx.execute("DELETE FROM volumes WHERE volume_uuid = ?", params![uuid])?;
            tx.execute("DELETE FROM volumes_data WHERE volume_uuid = ?", params![uuid])?;
        }
        tx.commit()?;
        Ok(deleted)
    }
}

// ── Test fixtures ────────────────────────────────────────────────────────


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn v1_reader_loads_series() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("legacy.sqlite");
        write_v1(
            &path,
            &[
                ("s1", vec![v1_volume("One", "s1u", "Vol 1", "a"), v1_volume("One", "s1u", "Vol 2", "b")]),
                ("s2", vec![v1_volume("Two", "s2u", "Vol 1", "c")]),
            ],
        );
        let reader = LegacyV1Reader::open(&path).unwrap();
        assert_eq!(reader.series_ids().unwrap(), vec!["s1", "s2"]);
        assert_eq!(reader.volume_count_total().unwrap(), 3);

        let mut series = reader.load_series("s1").unwrap();
        assert_eq!(series.len(), 2);
        assert_eq!(series[1].mokuro_data.volume_uuid, "b");
        let files = series[0].take_files();
        assert_eq!(files.len(), 2);
        assert!(series[0].files.is_empty());

        assert!(matches!(
            reader.load_series("missing"),
            Err(StoreError::SeriesMissing { .. })
        ));
    }

    #[test]
    fn v2_reader_and_pruner() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("legacy.sqlite");
        let mut with_thumb = v2_metadata("S", "Vol 1", "a");
        with_thumb.thumbnail = Some(vec![9, 9]);
        write_v2(&path, &[with_thumb, v2_metadata("S", "Vol 2", "b")]);

        let reader = LegacyV2Reader::open(&path).unwrap();
        let mut meta = reader.all_metadata().unwrap();
        meta.sort_by(|x, y| x.volume_uuid.cmp(&y.volume_uuid));
        assert_eq!(meta.len(), 2);
        assert_eq!(meta[0].thumbnail, Some(vec![9, 9]));
        assert_eq!(meta[1].thumbnail, None);

        let data = reader.load_volume_data("b").unwrap();
        assert_eq!(data.pages.len(), 2);
        assert_eq!(data.files.len(), 2);

        let mut pruner = LegacyV2Pruner::open(&path).unwrap();
        assert_eq!(pruner.delete_volumes(&["a".to_string()]).unwrap(), 1);
        assert_eq!(reader.all_metadata().unwrap().len(), 1);
        assert!(matches!(
            reader.load_volume_data("a"),
            Err(StoreError::VolumeMissing { .. })
        ));
    }

    #[test]
    fn table_names_lists_user_tables() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("legacy.sqlite");
        write_v2(&path, &[]);
        assert_eq!(table_names(&path).unwrap(), vec!["volumes", "volumes_data"]);
    }
}
