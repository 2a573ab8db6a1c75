//! The set of databases persisted in a data directory.
//!
//! Each database is one SQLite file named `<name>.sqlite`; deleting a database
//! removes the file together with its WAL side files.

use std::path::{Path, PathBuf};

use crate::error::{StoreError, StoreResult};

pub(crate) const LEGACY_DB_NAME: &str = "manga_library";
pub(crate) const CURRENT_DB_NAME: &str = "manga_library_v3";

const DB_EXTENSION: &str = "sqlite";
const SIDE_FILE_SUFFIXES: [&str; 2] = ["-wal", "-shm"];

#[derive(Debug, Clone)]
pub(crate) struct StorageRoot {
    dir: PathBuf,
}

impl StorageRoot {
    pub(crate) fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub(crate) fn dir(&self) -> &Path {
        &self.dir
    }

    pub(crate) fn ensure_dir(&self) -> StoreResult<()> {
        std::fs::create_dir_all(&self.dir).map_err(|e| StoreError::io(e, &self.dir))
    }

    pub(crate) fn database_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.{DB_EXTENSION}"))
    }

    pub(crate) fn legacy_path(&self) -> PathBuf {
        self.database_path(LEGACY_DB_NAME)
    }

    pub(crate) fn current_path(&self) -> PathBuf {
        self.database_path(CURRENT_DB_NAME)
    }

    /// Names of every database file in the directory, sorted.
    pub(crate) fn list_databases(&self) -> StoreResult<Vec<String>> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(StoreError::io(err, &self.dir)),
        };
        let mut names: Vec<String> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_file())
            .filter(|p| p.extension().and_then(|x| x.to_str()) == Some(DB_EXTENSION))
            .filter_map(|p| p.file_stem().and_then(|s| s.to_str()).map(str::to_string))
            .collect();
        names.sort();
        Ok(names)
    }

    pub(crate) fn has_database(&self, name: &str) -> StoreResult<bool> {
        Ok(self.list_databases()?.iter().any(|n| n == name))
    }

    /// Returns false when there was nothing to delete.
    pub(crate) fn delete_database(&self, name: &str) -> StoreResult<bool> {
        let path = self.database_path(name);
        let existed = remove_if_present(&path)?;
        for suffix in SIDE_FILE_SUFFIXES {
            let mut side = path.clone().into_os_string();
            side.push(suffix);
            remove_if_present(Path::new(&side))?;
        }
        if existed {
            tracing::info!(database = name, "deleted database");
        }
        Ok(existed)
    }
}

fn remove_if_present(path: &Path) -> StoreResult<bool> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(StoreError::io(err, path)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lists_only_database_files() {
        let dir = tempfile::tempdir().unwrap();
        let root = StorageRoot::new(dir.path());
        std::fs::write(root.database_path("b"), b"").unwrap();
        std::fs::write(root.database_path("a"), b"").unwrap();
        std::fs::write(dir.path().join("config.json"), b"{}").unwrap();
        std::fs::write(dir.path().join("a.sqlite-wal"), b"").unwrap();
        assert_eq!(root.list_databases().unwrap(), vec!["a", "b"]);
        assert!(root.has_database("a").unwrap());
        assert!(!root.has_database("c").unwrap());
    }

    #[test]
    fn missing_directory_is_empty_catalog() {
        let dir = tempfile::tempdir().unwrap();
        let root = StorageRoot::new(dir.path().join("nope"));
        assert!(root.list_databases().unwrap().is_empty());
    }

    #[test]
    fn delete_removes_side_files() {
        let dir = tempfile::tempdir().unwrap();
        let root = StorageRoot::new(dir.path());
        std::fs::write(root.database_path("x"), b"").unwrap();
        std::fs::write(dir.path().join("x.sqlite-wal"), b"").unwrap();
        std::fs::write(dir.path().join("x.sqlite-shm"), b"").unwrap();
        assert!(root.delete_database("x").unwrap());
        assert!(std::fs::read_dir(dir.path()).unwrap().next().is_none());
        assert!(!root.delete_database("x").unwrap());
    }
}
