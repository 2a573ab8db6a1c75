//! Moves volumes from a legacy layout (v1 or v2) into the current store.
//!
//! Every volume is committed in its own transaction. The set of UUIDs already
//! present in the current store is read once at start and used to skip work,
//! so a re-run after an interruption resumes where the last one stopped. The
//! legacy database is removed only after the whole run succeeded.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread;

use chrono::Utc;
use uuid::Uuid;

use crate::catalog::{StorageRoot, CURRENT_DB_NAME, LEGACY_DB_NAME};
use crate::char_count::{calculate_cumulative_char_counts, CharCounter};
use crate::config::MigrationConfig;
use crate::debug_log::LogSink;
use crate::error::{MigrationError, StoreError, StoreResult};
use crate::legacy::{LegacyV1Reader, LegacyV2Pruner, LegacyV2Reader};
use crate::library_db::LibraryDb;
use crate::matcher::match_files_to_pages;
use crate::thumbnail::ThumbnailResolver;
use crate::types::{
    FileBag, ImageBytes, LegacyVersion, MigrationPhase, MigrationProgress, MigrationReport, Page, Thumbnail,
    VolumeMetadata, VolumeRecord,
};

pub(crate) const SETTING_MIGRATED_FROM: &str = "migration.source";
pub(crate) const SETTING_MIGRATED_AT: &str = "migration.completed_at";

/// Legacy volume in a layout-neutral shape, ready to be assembled.
struct SourceVolume {
    volume_uuid: String,
    series_uuid: String,
    series_title: String,
    volume_title: String,
    mokuro_version: String,
    pages: Vec<Page>,
    files: FileBag,
    existing_thumbnail: Option<Vec<u8>>,
    /// Totals the legacy store recorded, compared against the recomputed ones.
    legacy_page_count: Option<usize>,
    legacy_character_count: u64,
}

#[derive(Debug, Default)]
struct PathOutcome {
    total: usize,
    migrated: usize,
    skipped: usize,
}

pub(crate) struct MigrationEngine<'a> {
    root: &'a StorageRoot,
    thumbnails: &'a dyn ThumbnailResolver,
    counter: &'a dyn CharCounter,
    log: &'a dyn LogSink,
    config: MigrationConfig,
}

impl<'a> MigrationEngine<'a> {
    pub(crate) fn new(
        root: &'a StorageRoot,
        thumbnails: &'a dyn ThumbnailResolver,
        counter: &'a dyn CharCounter,
        log: &'a dyn LogSink,
        config: MigrationConfig,
    ) -> Self {
        Self {
            root,
            thumbnails,
            counter,
            log,
            config,
        }
    }

    /// Run a full migration from legacy layout `source_version` (1 or 2).
    ///
    /// Errors propagate unchanged; volumes committed before the failure stay
    /// committed and are skipped by the next run.
    pub(crate) fn run_migration(
        &self,
        source_version: u8,
        on_progress: &mut dyn FnMut(&MigrationProgress),
    ) -> Result<MigrationReport, MigrationError> {
        let source = LegacyVersion::from_number(source_version)
            .ok_or(MigrationError::UnsupportedVersion(source_version))?;
        let legacy_path = self.root.legacy_path();
        if !legacy_path.exists() {
            return Err(MigrationError::LegacyMissing { path: legacy_path });
        }

        self.root.ensure_dir()?;
        let mut db = LibraryDb::open_or_create(&self.root.current_path())?;
        let mut migrated = db.volume_uuids()?;
        self.log.record(&format!(
            "starting migration from v{source_version}; {} volumes already in {CURRENT_DB_NAME}",
            migrated.len()
        ));
        tracing::info!(source = source_version, already = migrated.len(), "migration started");

        let outcome = match source {
            LegacyVersion::V1 => self.migrate_v1(&legacy_path, &mut db, &mut migrated, on_progress)?,
            LegacyVersion::V2 => self.migrate_v2(&legacy_path, &mut db, &mut migrated, on_progress)?,
        };

        let processed = outcome.migrated + outcome.skipped;
        on_progress(&MigrationProgress::new(
            MigrationPhase::DeletingSource,
            processed,
            outcome.total,
        ));
        self.root.delete_database(LEGACY_DB_NAME)?;
        self.log.record("deleted legacy database");

        let label = format!("v{}", source.number());
        db.setting_set(SETTING_MIGRATED_FROM, label.as_bytes())?;
        db.setting_set(SETTING_MIGRATED_AT, Utc::now().to_rfc3339().as_bytes())?;

        on_progress(&MigrationProgress::new(
            MigrationPhase::Complete,
            processed,
            outcome.total,
        ));
        self.log.record(&format!(
            "migration complete: {} written, {} skipped, {} total",
            outcome.migrated, outcome.skipped, outcome.total
        ));
        tracing::info!(
            migrated = outcome.migrated,
            skipped = outcome.skipped,
            total = outcome.total,
            "migration complete"
        );

        Ok(MigrationReport {
            source,
            volumes_total: outcome.total,
            migrated: outcome.migrated,
            skipped: outcome.skipped,
        })
    }

    // ── v1: series → volumes ─────────────────────────────────────────

    fn migrate_v1(
        &self,
        legacy_path: &Path,
        db: &mut LibraryDb,
        migrated: &mut HashSet<String>,
        on_progress: &mut dyn FnMut(&MigrationProgress),
    ) -> Result<PathOutcome, MigrationError> {
        on_progress(&MigrationProgress::new(MigrationPhase::Counting, 0, 0));
        let (series_ids, total) = {
            let reader = LegacyV1Reader::open(legacy_path)?;
            (reader.series_ids()?, reader.volume_count_total()?)
        };
        self.log.record(&format!(
            "v1: {total} volumes across {} series",
            series_ids.len()
        ));

        let mut outcome = PathOutcome {
            total,
            ..PathOutcome::default()
        };
        let series_total = series_ids.len();

        for (series_index, series_id) in series_ids.iter().enumerate() {
            let mut progress = MigrationProgress::new(
                MigrationPhase::LoadingSeries,
                outcome.migrated + outcome.skipped,
                total,
            );
            progress.series_current = Some(series_index + 1);
            progress.series_total = Some(series_total);
            on_progress(&progress);

            let mut volumes: Vec<Option<_>> = {
                let reader = LegacyV1Reader::open(legacy_path)?;
                reader.load_series(series_id)?.into_iter().map(Some).collect()
            };
            let mut fallback_series_uuid: Option<String> = None;

            for slot in volumes.iter_mut() {
                let Some(mut volume) = slot.take() else {
                    continue;
                };
                let uuid = volume.mokuro_data.volume_uuid.clone();
                if migrated.contains(&uuid) {
                    outcome.skipped += 1;
                    continue;
                }

                let series_uuid = if volume.mokuro_data.title_uuid.is_empty() {
                    fallback_series_uuid
                        .get_or_insert_with(|| Uuid::new_v4().to_string())
                        .clone()
                } else {
                    volume.mokuro_data.title_uuid.clone()
                };
                let files = volume.take_files();
                let data = volume.mokuro_data;
                let volume_title = if data.volume.is_empty() {
                    volume.volume_name
                } else {
                    data.volume
                };
                let record = self.assemble(SourceVolume {
                    volume_uuid: uuid.clone(),
                    series_uuid,
                    series_title: data.title,
                    volume_title,
                    mokuro_version: data.version,
                    pages: data.pages,
                    files,
                    existing_thumbnail: volume.thumbnail,
                    legacy_page_count: None,
                    legacy_character_count: data.chars,
                });

                let mut progress = MigrationProgress::new(
                    MigrationPhase::WritingVolume,
                    outcome.migrated + outcome.skipped + 1,
                    total,
                );
                progress.series_current = Some(series_index + 1);
                progress.series_total = Some(series_total);
                progress.series_title = Some(record.metadata.series_title.clone());
                progress.volume_title = Some(record.metadata.volume_title.clone());
                on_progress(&progress);

                self.commit(db, record)?;
                migrated.insert(uuid);
                outcome.migrated += 1;
                thread::sleep(self.config.volume_pause());
            }

            drop(volumes);
            thread::sleep(self.config.series_pause());
        }

        // Legacy v1 rows are not deleted per series; the whole database goes
        // once the run has succeeded.
        Ok(outcome)
    }

    // ── v2: flat metadata + data tables ──────────────────────────────

    fn migrate_v2(
        &self,
        legacy_path: &Path,
        db: &mut LibraryDb,
        migrated: &mut HashSet<String>,
        on_progress: &mut dyn FnMut(&MigrationProgress),
    ) -> Result<PathOutcome, MigrationError> {
        on_progress(&MigrationProgress::new(MigrationPhase::Counting, 0, 0));
        let reader = LegacyV2Reader::open(legacy_path)?;
        let mut all = reader.all_metadata()?;
        all.sort_by(|a, b| {
            natord::compare_ignore_case(&a.series_title, &b.series_title)
                .then_with(|| natord::compare_ignore_case(&a.volume_title, &b.volume_title))
        });

        let total = all.len();
        let (done, pending): (Vec<_>, Vec<_>) =
            all.into_iter().partition(|m| migrated.contains(&m.volume_uuid));
        let mut outcome = PathOutcome {
            total,
            migrated: 0,
            skipped: done.len(),
        };
        self.log.record(&format!(
            "v2: {total} volumes, {} already migrated",
            outcome.skipped
        ));

        let mut deletions = DeletionQueue::spawn(legacy_path, self.config.delete_batch_size)?;

        for meta in pending {
            let mut progress = MigrationProgress::new(
                MigrationPhase::WritingVolume,
                outcome.migrated + outcome.skipped + 1,
                total,
            );
            progress.series_title = Some(meta.series_title.clone());
            progress.volume_title = Some(meta.volume_title.clone());
            on_progress(&progress);

            let data = reader.load_volume_data(&meta.volume_uuid)?;
            let uuid = meta.volume_uuid.clone();
            let record = self.assemble(SourceVolume {
                volume_uuid: meta.volume_uuid,
                series_uuid: meta.series_uuid,
                series_title: meta.series_title,
                volume_title: meta.volume_title,
                mokuro_version: meta.mokuro_version,
                pages: data.pages,
                files: data.files,
                existing_thumbnail: meta.thumbnail,
                legacy_page_count: Some(meta.page_count),
                legacy_character_count: meta.character_count,
            });

            self.commit(db, record)?;
            migrated.insert(uuid.clone());
            outcome.migrated += 1;
            deletions.push(uuid);
            thread::sleep(self.config.volume_pause());
        }

        drop(reader);
        let pruned = deletions.finish();
        if pruned.failed_batches > 0 {
            self.log.record(&format!(
                "v2: {} legacy deletion batches failed; rows remain until the legacy database is removed",
                pruned.failed_batches
            ));
        }
        Ok(outcome)
    }

    // ── Shared steps ─────────────────────────────────────────────────

    /// Everything expensive happens here, before any transaction is opened.
    fn assemble(&self, source: SourceVolume) -> VolumeRecord {
        let thumbnail = self.resolve_thumbnail(&source);
        let page_char_counts = calculate_cumulative_char_counts(&source.pages, self.counter);
        let character_count = page_char_counts.last().copied().unwrap_or(0);
        let page_count = source.pages.len();
        if source.legacy_character_count != character_count
            || source.legacy_page_count.is_some_and(|n| n != page_count)
        {
            tracing::debug!(
                volume = %source.volume_uuid,
                legacy_pages = ?source.legacy_page_count,
                legacy_chars = source.legacy_character_count,
                pages = page_count,
                chars = character_count,
                "legacy totals differ from recomputed totals"
            );
            self.log.record(&format!(
                "recounted {} ({}): legacy {} chars, now {} chars over {} pages",
                source.volume_title,
                source.volume_uuid,
                source.legacy_character_count,
                character_count,
                page_count
            ));
        }
        VolumeRecord {
            metadata: VolumeMetadata {
                volume_uuid: source.volume_uuid,
                series_uuid: source.series_uuid,
                series_title: source.series_title,
                volume_title: source.volume_title,
                mokuro_version: source.mokuro_version,
                page_count,
                character_count,
                page_char_counts,
                thumbnail,
                added_at: Utc::now().timestamp(),
            },
            pages: source.pages,
            files: source.files,
        }
    }

    fn resolve_thumbnail(&self, source: &SourceVolume) -> Option<Thumbnail> {
        let cover = cover_image(&source.files, &source.pages);
        match self
            .thumbnails
            .resolve(source.existing_thumbnail.as_deref(), cover.as_deref())
        {
            Ok(thumbnail) => Some(thumbnail),
            Err(err) => {
                tracing::warn!(volume = %source.volume_uuid, %err, "no thumbnail for volume");
                self.log.record(&format!(
                    "thumbnail failed for {} ({}): {err}",
                    source.volume_title, source.volume_uuid
                ));
                None
            }
        }
    }

    fn commit(&self, db: &mut LibraryDb, record: VolumeRecord) -> StoreResult<()> {
        db.write_volume(&record)?;
        self.log.record(&format!(
            "wrote {} / {} ({} pages, {} files)",
            record.metadata.series_title,
            record.metadata.volume_title,
            record.metadata.page_count,
            record.files.len()
        ));
        Ok(())
    }
}

/// Image for the first page, or the first file when pages are empty.
fn cover_image(files: &FileBag, pages: &[Page]) -> Option<ImageBytes> {
    if pages.is_empty() {
        return files.values().next().cloned();
    }
    match_files_to_pages(files, pages).into_iter().flatten().next()
}

/// Delete the current-schema database. The legacy database is untouched, so
/// the next migration starts over from it.
pub(crate) fn rollback_migration(root: &StorageRoot) -> StoreResult<bool> {
    let deleted = root.delete_database(CURRENT_DB_NAME)?;
    tracing::info!(deleted, "migration rolled back");
    Ok(deleted)
}

// ── Background legacy deletion ───────────────────────────────────────────

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PruneSummary {
    pub(crate) deleted: usize,
    pub(crate) failed_batches: usize,
}

/// Batches migrated UUIDs and hands them to a worker thread that owns its own
/// connection to the legacy database. Failures are logged by the worker and
/// never reach the migration loop.
pub(crate) struct DeletionQueue {
    batch_size: usize,
    pending: Vec<String>,
    sender: Option<mpsc::Sender<Vec<String>>>,
    worker: Option<thread::JoinHandle<PruneSummary>>,
}

impl DeletionQueue {
    pub(crate) fn spawn(legacy_path: &Path, batch_size: usize) -> StoreResult<Self> {
        let mut pruner = LegacyV2Pruner::open(legacy_path)?;
        let (sender, receiver) = mpsc::channel::<Vec<String>>();
        let path: PathBuf = legacy_path.to_path_buf();
        let worker = thread::Builder::new()
            .name("legacy-prune".into())
            .spawn(move || {
                let mut summary = PruneSummary::default();
                for batch in receiver {
                    match pruner.delete_volumes(&batch) {
                        Ok(n) => summary.deleted += n,
                        Err(err) => {
                            summary.failed_batches += 1;
                            tracing::warn!(path = %path.display(), batch = batch.len(), %err, "legacy deletion batch failed");
                        }
                    }
                }
                summary
            })
            .map_err(|e| StoreError::io(e, legacy_path))?;
        Ok(Self {
            batch_size: batch_size.max(1),
            pending: Vec::new(),
            sender: Some(sender),
            worker: Some(worker),
        })
    }

    pub(crate) fn push(&mut self, uuid: String) {
        self.pending.push(uuid);
        if self.pending.len() >= self.batch_size {
            self.dispatch();
        }
    }

    fn dispatch(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let batch = std::mem::take(&mut self.pending);
        if let Some(sender) = &self.sender {
            if sender.send(batch).is_err() {
                tracing::warn!("legacy deletion worker is gone, dropping batch");
            }
        }
    }

    /// Flush the remaining UUIDs and wait for the worker to drain.
    pub(crate) fn finish(mut self) -> PruneSummary {
        self.dispatch();
        self.sender.take();
        match self.worker.take().map(|w| w.join()) {
            Some(Ok(summary)) => summary,
            Some(Err(_)) => {
                tracing::warn!("legacy deletion worker panicked");
                PruneSummary::default()
            }
            None => PruneSummary::default(),
        }
    }
}
