// Module declarations
mod catalog;
mod char_count;
mod cli;
mod config;
mod debug_log;
mod detector;
mod error;
mod image_cache;
mod legacy;
mod library_db;
mod matcher;
mod migration;
mod normalize;
mod thumbnail;
mod types;

// Re-export all module items at crate root so cross-module references work.
#[allow(unused_imports)]
pub(crate) use catalog::*;
#[allow(unused_imports)]
pub(crate) use char_count::*;
#[allow(unused_imports)]
pub(crate) use cli::*;
#[allow(unused_imports)]
pub(crate) use config::*;
#[allow(unused_imports)]
pub(crate) use debug_log::*;
#[allow(unused_imports)]
pub(crate) use detector::*;
#[allow(unused_imports)]
pub(crate) use error::*;
#[allow(unused_imports)]
pub(crate) use image_cache::*;
#[allow(unused_imports)]
pub(crate) use legacy::*;
#[allow(unused_imports)]
pub(crate) use library_db::*;
#[allow(unused_imports)]
pub(crate) use matcher::*;
#[allow(unused_imports)]
pub(crate) use migration::*;
#[allow(unused_imports)]
pub(crate) use normalize::*;
#[allow(unused_imports)]
pub(crate) use thumbnail::*;
#[allow(unused_imports)]
pub(crate) use types::*;

// External crate imports used directly in main()
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::DateTime;
use clap::Parser;
use serde::Serialize;
use walkdir::WalkDir;

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "gif", "avif", "bmp"];

#[derive(Serialize)]
struct StatusResponse {
    data_dir: String,
    legacy: LegacyShape,
    migration: MigrationNeed,
    current_volumes: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    migrated_from: Option<String>,
}

#[derive(Serialize)]
struct MatchRow {
    page: usize,
    img_path: String,
    file: Option<String>,
}

#[derive(Serialize)]
struct MatchResponse {
    volume: String,
    strategy: &'static str,
    files: usize,
    pages: Vec<MatchRow>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Command::Status { data_dir, json } => {
            let root = StorageRoot::new(&data_dir);
            let legacy = inspect_legacy(&root)?;
            let migration = check_migration_needed(&root)?;
            let (current_volumes, migrated_from) = if root.has_database(CURRENT_DB_NAME)? {
                let db = LibraryDb::open(&root.current_path())?;
                let from = db
                    .setting_get(SETTING_MIGRATED_FROM)?
                    .map(|v| String::from_utf8_lossy(&v).into_owned());
                (db.volume_count()?, from)
            } else {
                (0, None)
            };
            let payload = StatusResponse {
                data_dir: data_dir.display().to_string(),
                legacy,
                migration,
                current_volumes,
                migrated_from,
            };

            if json {
                println!("{}", serde_json::to_string_pretty(&payload)?);
            } else {
                println!("data_dir: {}", payload.data_dir);
                match &payload.legacy {
                    LegacyShape::Absent => println!("legacy: none"),
                    LegacyShape::V1 => println!("legacy: v1 (migration required)"),
                    LegacyShape::V2 => println!("legacy: v2 (migration required)"),
                    LegacyShape::Unrecognized(tables) => {
                        println!("legacy: unrecognized");
                        eprintln!(
                            "warning: {} matches no known layout (tables: {}); it was left untouched",
                            root.legacy_path().display(),
                            if tables.is_empty() { "none".to_string() } else { tables.join(", ") }
                        );
                    }
                }
                println!("current_volumes: {}", payload.current_volumes);
                if let Some(from) = &payload.migrated_from {
                    println!("migrated_from: {from}");
                }
            }
            Ok(())
        }

        Command::Migrate { data_dir, json } => {
            let root = StorageRoot::new(&data_dir);
            let config = load_config(&config_file_path(&data_dir));
            let log = DebugLog::open(&log_file_path(&data_dir), config.debug_log_capacity);

            let Some(version) = check_migration_needed(&root)?.version() else {
                println!("Nothing to migrate in {}", data_dir.display());
                return Ok(());
            };

            let thumbnails = ImageThumbnailer::new(&config.thumbnail);
            let engine = MigrationEngine::new(
                &root,
                &thumbnails,
                &MeaningfulChars,
                &log,
                config.migration.clone(),
            );
            let mut on_progress = |progress: &MigrationProgress| print_progress(progress, json);
            match engine.run_migration(version.number(), &mut on_progress) {
                Ok(report) => {
                    if json {
                        println!("{}", serde_json::to_string(&report)?);
                    } else {
                        println!(
                            "Migrated {} volumes from v{} ({} already present, {} total)",
                            report.migrated,
                            version.number(),
                            report.skipped,
                            report.volumes_total
                        );
                    }
                    Ok(())
                }
                Err(err) => {
                    log.record(&format!("migration failed: {err}"));
                    eprintln!("Migration failed: {err}");
                    eprintln!(
                        "Retry with `tankobon migrate {dir}` (finished volumes are kept), or discard progress with `tankobon rollback {dir}`.",
                        dir = data_dir.display()
                    );
                    std::process::exit(1);
                }
            }
        }

        Command::Rollback { data_dir } => {
            let root = StorageRoot::new(&data_dir);
            if rollback_migration(&root)? {
                println!("Deleted {}", root.current_path().display());
            } else {
                println!("No current store in {}", root.dir().display());
            }
            Ok(())
        }

        Command::Volumes { data_dir, json } => {
            let root = StorageRoot::new(&data_dir);
            let db = LibraryDb::open(&root.current_path())?;
            let volumes = db.list_volumes()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&volumes)?);
            } else {
                for v in &volumes {
                    let thumb = match &v.thumbnail {
                        Some(t) => format!("{}x{}", t.width, t.height),
                        None => "-".to_string(),
                    };
                    println!(
                        "{}  {} / {}  pages={} chars={} thumb={}",
                        v.volume_uuid, v.series_title, v.volume_title, v.page_count, v.character_count, thumb
                    );
                }
                println!("{} volumes", volumes.len());
            }
            Ok(())
        }

        Command::Log { data_dir, clear } => {
            let config = load_config(&config_file_path(&data_dir));
            let log = DebugLog::open(&log_file_path(&data_dir), config.debug_log_capacity);
            if clear {
                log.clear()?;
                println!("Cleared migration log");
                return Ok(());
            }
            for entry in log.entries() {
                let ts = DateTime::from_timestamp_millis(entry.ts_utc)
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| entry.ts_utc.to_string());
                println!("{ts}  {}", entry.message);
            }
            Ok(())
        }

        Command::Match {
            data_dir,
            volume,
            dir,
            json,
        } => {
            let root = StorageRoot::new(&data_dir);
            let db = LibraryDb::open(&root.current_path())?;
            let pages = db.volume_pages(&volume)?;
            let files = collect_images(&dir)?;
            let alignment = align_files(&files, &pages);

            let rows: Vec<MatchRow> = pages
                .iter()
                .zip(alignment.keys.iter().copied())
                .enumerate()
                .map(|(page, (p, key))| MatchRow {
                    page,
                    img_path: p.img_path.clone(),
                    file: key.map(str::to_string),
                })
                .collect();
            let payload = MatchResponse {
                volume,
                strategy: alignment.strategy.as_str(),
                files: files.len(),
                pages: rows,
            };

            if json {
                println!("{}", serde_json::to_string_pretty(&payload)?);
            } else {
                println!(
                    "strategy: {} ({} files, {} pages)",
                    payload.strategy,
                    payload.files,
                    payload.pages.len()
                );
                for row in &payload.pages {
                    println!(
                        "{:>4}  {}  ->  {}",
                        row.page,
                        row.img_path,
                        row.file.as_deref().unwrap_or("-")
                    );
                }
            }
            Ok(())
        }

        Command::Prefetch {
            data_dir,
            volume,
            page,
        } => {
            let root = StorageRoot::new(&data_dir);
            let config = load_config(&config_file_path(&data_dir));
            let db = LibraryDb::open(&root.current_path())?;
            let pages = db.volume_pages(&volume)?;
            let files = db.volume_files(&volume)?;
            let page_count = pages.len();
            let source = VolumeSource::fingerprinted(files, pages);

            let backend = Arc::new(RasterBackend::new());
            let dyn_backend: Arc<dyn ImageBackend> = backend.clone();
            let cache = ImageCache::new(dyn_backend, config.decode_timeout());

            let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
            runtime.block_on(async {
                cache.update_cache(&source, page);
                let Some((lo, hi)) = window_bounds(page, page_count) else {
                    println!("page {page} is outside the volume ({page_count} pages)");
                    return;
                };
                for index in lo..=hi {
                    match cache.get_image(index).await {
                        Ok(Some(image)) => println!(
                            "{index:>4}  {}x{}  handle={}  decoded={}",
                            image.width,
                            image.height,
                            image.handle.id(),
                            image.pixels_decoded
                        ),
                        Ok(None) => println!("{index:>4}  no file"),
                        Err(err) => println!("{index:>4}  failed: {err}"),
                    }
                }
                println!("resident: {:?}", cache.resident_indices());
                println!("ready: {:?}", cache.decoded_indices());
                println!("live handles: {} ({} bytes)", backend.live_handles(), backend.live_bytes());
                cache.cleanup();
            });
            Ok(())
        }

        Command::Config { data_dir, command } => {
            let path = config_file_path(&data_dir);
            match command {
                ConfigCommand::Show => {
                    let config = load_config(&path);
                    println!("{}", serde_json::to_string_pretty(&config)?);
                }
                ConfigCommand::Init { force } => {
                    if path.exists() && !force {
                        eprintln!("Refusing to overwrite existing file: {}", path.display());
                        std::process::exit(2);
                    }
                    save_config(&path, &load_config(&path))?;
                    println!("Wrote {}", path.display());
                }
            }
            Ok(())
        }
    }
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn print_progress(progress: &MigrationProgress, json: bool) {
    if json {
        match serde_json::to_string(progress) {
            Ok(line) => println!("{line}"),
            Err(err) => tracing::warn!(%err, "failed to encode progress"),
        }
        return;
    }
    let mut line = format!(
        "[{}/{}] {}",
        progress.volumes_current, progress.volumes_total, progress.phase
    );
    if let (Some(cur), Some(total)) = (progress.series_current, progress.series_total) {
        line.push_str(&format!(" series {cur}/{total}"));
    }
    match (&progress.series_title, &progress.volume_title) {
        (Some(series), Some(volume)) => line.push_str(&format!(" {series} / {volume}")),
        (None, Some(volume)) => line.push_str(&format!(" {volume}")),
        _ => {}
    }
    println!("{line}");
}

fn is_image_path(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.iter().any(|x| e.eq_ignore_ascii_case(x)))
        .unwrap_or(false)
}

/// Image files under `dir`, keyed by their `/`-separated path relative to it.
fn collect_images(dir: &Path) -> Result<FileBag, Box<dyn std::error::Error>> {
    let root: PathBuf = dir.canonicalize().unwrap_or_else(|_| dir.to_path_buf());
    if !root.exists() {
        eprintln!("Directory does not exist: {}", root.display());
        std::process::exit(2);
    }
    let mut files = FileBag::new();
    for entry in WalkDir::new(&root).follow_links(false) {
        let entry = match entry {
            Ok(e) => e,
            Err(_) => continue,
        };
        if !entry.file_type().is_file() || !is_image_path(entry.path()) {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(&root) else {
            continue;
        };
        let key = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        let bytes = fs::read(entry.path())?;
        files.insert(key, Arc::from(bytes));
    }
    Ok(files)
}
