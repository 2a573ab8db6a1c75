//! SQLite-backed current-schema (v3) library store.
//!
//! Three tables keyed by volume UUID:
//!   - `volumes`       metadata, cumulative character counts, optional thumbnail
//!   - `volume_ocr`    per-page OCR blocks as JSON
//!   - `volume_files`  the raw image file bag, one row per file
//!
//! A volume is always written to all three tables inside one transaction.

use std::collections::HashSet;
use std::path::Path;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{StoreError, StoreResult};
use crate::types::{FileBag, Page, Thumbnail, VolumeMetadata, VolumeRecord};

pub(crate) struct LibraryDb {
    conn: Connection,
}

// ── Schema SQL ───────────────────────────────────────────────────────────

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS volumes (
    volume_uuid TEXT PRIMARY KEY,
    series_uuid TEXT NOT NULL,
    series_title TEXT NOT NULL,
    volume_title TEXT NOT NULL,
    mokuro_version TEXT NOT NULL DEFAULT '',
    page_count INTEGER NOT NULL,
    character_count INTEGER NOT NULL,
    page_char_counts TEXT NOT NULL DEFAULT '[]',
    thumbnail BLOB,
    thumbnail_width INTEGER,
    thumbnail_height INTEGER,
    added_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_volumes_series ON volumes(series_uuid);

CREATE TABLE IF NOT EXISTS volume_ocr (
    volume_uuid TEXT PRIMARY KEY,
    pages TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS volume_files (
    volume_uuid TEXT NOT NULL,
    name TEXT NOT NULL,
    data BLOB NOT NULL,
    PRIMARY KEY (volume_uuid, name)
);

CREATE TABLE IF NOT EXISTS settings (
    key TEXT PRIMARY KEY,
    value BLOB NOT NULL,
    updated_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
);
";

const VOLUME_COLUMNS: &str = "volume_uuid, series_uuid, series_title, volume_title, mokuro_version,
     page_count, character_count, page_char_counts, thumbnail, thumbnail_width,
     thumbnail_height, added_at";

impl LibraryDb {
    /// Open an existing database. Errors if the file doesn't exist.
    pub(crate) fn open(path: &Path) -> StoreResult<Self> {
        if !path.exists() {
            return Err(StoreError::DatabaseMissing {
                path: path.to_path_buf(),
            });
        }
        let conn = Connection::open(path)?;
        let db = Self { conn };
        db.apply_pragmas()?;
        db.init_schema()?;
        Ok(db)
    }

    /// Open or create a database file with full schema.
    pub(crate) fn open_or_create(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::io(e, parent))?;
        }
        let conn = Connection::open(path)?;
        let db = Self { conn };
        db.apply_pragmas()?;
        db.init_schema()?;
        Ok(db)
    }

    fn apply_pragmas(&self) -> StoreResult<()> {
        self.conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;",
        )?;
        Ok(())
    }

    fn init_schema(&self) -> StoreResult<()> {
        self.conn.execute_batch(SCHEMA_SQL)?;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }

    // ── Volume reads ─────────────────────────────────────────────────

    pub(crate) fn volume_count(&self) -> StoreResult<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM volumes", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// UUIDs of every committed volume. Used as the resume guard for migration.
    pub(crate) fn volume_uuids(&self) -> StoreResult<HashSet<String>> {
        let mut stmt = self.conn.prepare("SELECT volume_uuid FROM volumes")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut out = HashSet::new();
        for row in rows {
            out.insert(row?);
        }
        Ok(out)
    }

    pub(crate) fn volume(&self, uuid: &str) -> StoreResult<Option<VolumeMetadata>> {
        let sql = format!("SELECT {VOLUME_COLUMNS} FROM volumes WHERE volume_uuid = ?");
        let volume = self
            .conn
            .query_row(&sql, params![uuid], Self::row_to_volume)
            .optional()?;
        volume.transpose()
    }

    /// All volumes ordered by series title, then volume title.
    pub(crate) fn list_volumes(&self) -> StoreResult<Vec<VolumeMetadata>> {
        let sql = format!(
            "SELECT {VOLUME_COLUMNS} FROM volumes ORDER BY series_title, volume_title"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], Self::row_to_volume)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row??);
        }
        Ok(out)
    }

    pub(crate) fn volume_pages(&self, uuid: &str) -> StoreResult<Vec<Page>> {
        let json: Option<String> = self
            .conn
            .query_row(
                "SELECT pages FROM volume_ocr WHERE volume_uuid = ?",
                params![uuid],
                |row| row.get(0),
            )
            .optional()?;
        let json = json.ok_or_else(|| StoreError::VolumeMissing {
            uuid: uuid.to_string(),
            table: "volume_ocr",
        })?;
        Ok(serde_json::from_str(&json)?)
    }

    pub(crate) fn volume_files(&self, uuid: &str) -> StoreResult<FileBag> {
        let mut stmt = self
            .conn
            .prepare("SELECT name, data FROM volume_files WHERE volume_uuid = ?")?;
        let rows = stmt.query_map(params![uuid], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?))
        })?;
        let mut files = FileBag::new();
        for row in rows {
            let (name, data) = row?;
            files.insert(name, data.into());
        }
        Ok(files)
    }

    // ── Volume writes ────────────────────────────────────────────────

    /// Write metadata, OCR pages and files for one volume atomically.
    /// Re-writing an existing UUID replaces it.
    pub(crate) fn write_volume(&mut self, record: &VolumeRecord) -> StoreResult<()> {
        let meta = &record.metadata;
        let counts_json = serde_json::to_string(&meta.page_char_counts)?;
        let pages_json = serde_json::to_string(&record.pages)?;
        let (thumb_bytes, thumb_w, thumb_h) = match &meta.thumbnail {
            Some(t) => (Some(t.bytes.as_slice()), Some(t.width), Some(t.height)),
            None => (None, None, None),
        };

        let tx = self.conn.transaction()?;
        tx.execute(
            &format!(
                "INSERT OR REPLACE INTO volumes ({VOLUME_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"
            ),
            params![
                meta.volume_uuid,
                meta.series_uuid,
                meta.series_title,
                meta.volume_title,
                meta.mokuro_version,
                meta.page_count as i64,
                meta.character_count as i64,
                counts_json,
                thumb_bytes,
                thumb_w,
                thumb_h,
                meta.added_at,
            ],
        )?;
        tx.execute(
            "INSERT OR REPLACE INTO volume_ocr (volume_uuid, pages) VALUES (?1, ?2)",
            params![meta.volume_uuid, pages_json],
        )?;
        tx.execute(
            "DELETE FROM volume_files WHERE volume_uuid = ?",
            params![meta.volume_uuid],
        )?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO volume_files (volume_uuid, name, data) VALUES (?1, ?2, ?3)",
            )?;
            for (name, data) in &record.files {
                stmt.execute(params![meta.volume_uuid, name, &data[..]])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    // ── Settings ─────────────────────────────────────────────────────

    pub(crate) fn setting_get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        Ok(self
            .conn
            .query_row(
                "SELECT value FROM settings WHERE key = ?",
                params![key],
                |row| row.get::<_, Vec<u8>>(0),
            )
            .optional()?)
    }

    pub(crate) fn setting_set(&self, key: &str, value: &[u8]) -> StoreResult<()> {
        let now = Utc::now().timestamp();
        self.conn.execute(
            "INSERT INTO settings (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, now],
        )?;
        Ok(())
    }

    // ── Helpers ──────────────────────────────────────────────────────

    fn row_to_volume(row: &rusqlite::Row) -> Result<StoreResult<VolumeMetadata>, rusqlite::Error> {
        let counts_json: String = row.get(7)?;
        let page_char_counts: Vec<u64> = match serde_json::from_str(&counts_json) {
            Ok(counts) => counts,
            Err(err) => return Ok(Err(err.into())),
        };
        let thumb_bytes: Option<Vec<u8>> = row.get(8)?;
        let thumb_w: Option<u32> = row.get(9)?;
        let thumb_h: Option<u32> = row.get(10)?;
        let thumbnail = match (thumb_bytes, thumb_w, thumb_h) {
            (Some(bytes), Some(width), Some(height)) => Some(Thumbnail {
                bytes,
                width,
                height,
            }),
            _ => None,
        };
        Ok(Ok(VolumeMetadata {
            volume_uuid: row.get(0)?,
            series_uuid: row.get(1)?,
            series_title: row.get(2)?,
            volume_title: row.get(3)?,
            mokuro_version: row.get(4)?,
            page_count: row.get::<_, i64>(5)? as usize,
            character_count: row.get::<_, i64>(6)? as u64,
            page_char_counts,
            thumbnail,
            added_at: row.get(11)?,
        }))
    }
}

#[cfg(test)]
pub(crate) fn sample_record(uuid: &str, title: &str) -> VolumeRecord {
    use crate::types::text_page;
    use std::sync::Arc;

    let pages = vec![text_page("p1.png", &["AB"]), text_page("p2.png", &["CDE"])];
    let mut files = FileBag::new();
    files.insert("p1.png".into(), Arc::from(&b"one"[..]));
    files.insert("p2.png".into(), Arc::from(&b"two"[..]));
    VolumeRecord {
        metadata: VolumeMetadata {
            volume_uuid: uuid.to_string(),
            series_uuid: "series-1".into(),
            series_title: "Series".into(),
            volume_title: title.to_string(),
            mokuro_version: "0.2.0".into(),
            page_count: 2,
            character_count: 5,
            page_char_counts: vec![2, 5],
            thumbnail: Some(Thumbnail {
                bytes: vec![1, 2, 3],
                width: 10,
                height: 20,
            }),
            added_at: 1_700_000_000,
        },
        pages,
        files,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_db() -> (tempfile::TempDir, LibraryDb) {
        let dir = tempfile::tempdir().unwrap();
        let db = LibraryDb::open_or_create(&dir.path().join("lib.sqlite")).unwrap();
        (dir, db)
    }

    #[test]
    fn test_open_missing_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = LibraryDb::open(&dir.path().join("absent.sqlite")).err().unwrap();
        assert!(matches!(err, StoreError::DatabaseMissing { .. }));
    }

    #[test]
    fn test_write_and_read_volume() {
        let (_dir, mut db) = temp_db();
        let record = sample_record("vol-1", "Volume 1");
        db.write_volume(&record).unwrap();

        assert_eq!(db.volume_count().unwrap(), 1);
        let meta = db.volume("vol-1").unwrap().unwrap();
        assert_eq!(meta, record.metadata);
        assert_eq!(db.volume_pages("vol-1").unwrap(), record.pages);
        assert_eq!(db.volume_files("vol-1").unwrap(), record.files);
        assert!(db.volume_uuids().unwrap().contains("vol-1"));
        assert!(db.volume("vol-2").unwrap().is_none());
    }

    #[test]
    fn test_rewrite_replaces_files() {
        let (_dir, mut db) = temp_db();
        let mut record = sample_record("vol-1", "Volume 1");
        db.write_volume(&record).unwrap();
        record.files.remove("p2.png");
        db.write_volume(&record).unwrap();
        assert_eq!(db.volume_count().unwrap(), 1);
        assert_eq!(db.volume_files("vol-1").unwrap().len(), 1);
    }

    #[test]
    fn test_failed_file_insert_rolls_back_metadata() {
        let (_dir, mut db) = temp_db();
        db.conn()
            .execute_batch(
                "CREATE TRIGGER fail_files BEFORE INSERT ON volume_files
                 BEGIN SELECT RAISE(ABORT, 'simulated write failure'); END;",
            )
            .unwrap();
        let err = db.write_volume(&sample_record("vol-1", "Volume 1"));
        assert!(err.is_err());
        assert_eq!(db.volume_count().unwrap(), 0);
        assert!(matches!(
            db.volume_pages("vol-1"),
            Err(StoreError::VolumeMissing { .. })
        ));
    }

    #[test]
    fn test_list_orders_by_titles() {
        let (_dir, mut db) = temp_db();
        db.write_volume(&sample_record("b", "Volume 2")).unwrap();
        db.write_volume(&sample_record("a", "Volume 1")).unwrap();
        let titles: Vec<String> = db
            .list_volumes()
            .unwrap()
            .into_iter()
            .map(|v| v.volume_title)
            .collect();
        assert_eq!(titles, vec!["Volume 1", "Volume 2"]);
    }

    #[test]
    fn test_settings() {
        let (_dir, db) = temp_db();
        assert!(db.setting_get("k").unwrap().is_none());
        db.setting_set("k", b"v1").unwrap();
        db.setting_set("k", b"v2").unwrap();
        assert_eq!(db.setting_get("k").unwrap().unwrap(), b"v2");
    }
}
