use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};

const LOG_FILE_NAME: &str = "migration_log.json";

/// Destination for human-readable migration events.
pub(crate) trait LogSink: Send + Sync {
    fn record(&self, message: &str);
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct LogEntry {
    pub(crate) ts_utc: i64,
    pub(crate) message: String,
}

/// Bounded migration diary. Oldest entries are dropped once `capacity` is
/// reached; when backed by a file every append is persisted.
pub(crate) struct DebugLog {
    capacity: usize,
    path: Option<PathBuf>,
    entries: Mutex<VecDeque<LogEntry>>,
}

pub(crate) fn log_file_path(data_dir: &Path) -> PathBuf {
    data_dir.join(LOG_FILE_NAME)
}

impl DebugLog {
    pub(crate) fn in_memory(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            path: None,
            entries: Mutex::new(VecDeque::new()),
        }
    }

    /// Load previously persisted entries; an unreadable file starts empty.
    pub(crate) fn open(path: &Path, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let mut entries: VecDeque<LogEntry> = match std::fs::read_to_string(path) {
            Ok(data) => serde_json::from_str(&data).unwrap_or_default(),
            Err(_) => VecDeque::new(),
        };
        while entries.len() > capacity {
            entries.pop_front();
        }
        Self {
            capacity,
            path: Some(path.to_path_buf()),
            entries: Mutex::new(entries),
        }
    }

    pub(crate) fn entries(&self) -> Vec<LogEntry> {
        match self.entries.lock() {
            Ok(guard) => guard.iter().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().iter().cloned().collect(),
        }
    }

    pub(crate) fn clear(&self) -> StoreResult<()> {
        let mut guard = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        guard.clear();
        match &self.path {
            Some(path) => match std::fs::remove_file(path) {
                Ok(()) => Ok(()),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(err) => Err(StoreError::io(err, path)),
            },
            None => Ok(()),
        }
    }

    fn persist(&self, entries: &VecDeque<LogEntry>) -> StoreResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::io(e, parent))?;
        }
        let json = serde_json::to_string(entries)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(|e| StoreError::io(e, &tmp))?;
        std::fs::rename(&tmp, path).map_err(|e| StoreError::io(e, path))?;
        Ok(())
    }
}

impl LogSink for DebugLog {
    fn record(&self, message: &str) {
        tracing::debug!(target: "migration", "{message}");
        let mut guard = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        guard.push_back(LogEntry {
            ts_utc: Utc::now().timestamp_millis(),
            message: message.to_string(),
        });
        while guard.len() > self.capacity {
            guard.pop_front();
        }
        // Persistence is best effort; the log must never abort a migration.
        if let Err(err) = self.persist(&guard) {
            tracing::warn!(%err, "failed to persist migration log");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_only_newest_entries() {
        let log = DebugLog::in_memory(3);
        for i in 0..5 {
            log.record(&format!("event {i}"));
        }
        let messages: Vec<String> = log.entries().into_iter().map(|e| e.message).collect();
        assert_eq!(messages, vec!["event 2", "event 3", "event 4"]);
    }

    #[test]
    fn persists_across_reopen_and_clears() {
        let dir = tempfile::tempdir().unwrap();
        let path = log_file_path(dir.path());
        {
            let log = DebugLog::open(&path, 50);
            log.record("started");
            log.record("finished");
        }
        let reopened = DebugLog::open(&path, 50);
        assert_eq!(reopened.entries().len(), 2);
        assert_eq!(reopened.entries()[1].message, "finished");

        reopened.clear().unwrap();
        assert!(reopened.entries().is_empty());
        assert!(!path.exists());
        assert!(DebugLog::open(&path, 50).entries().is_empty());
    }

    #[test]
    fn reopen_with_smaller_capacity_truncates() {
        let dir = tempfile::tempdir().unwrap();
        let path = log_file_path(dir.path());
        let log = DebugLog::open(&path, 10);
        for i in 0..10 {
            log.record(&format!("{i}"));
        }
        let small = DebugLog::open(&path, 4);
        let messages: Vec<String> = small.entries().into_iter().map(|e| e.message).collect();
        assert_eq!(messages, vec!["6", "7", "8", "9"]);
    }
}
