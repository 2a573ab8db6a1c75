use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Raw image bytes shared between the file bag, the matcher and decode tasks.
pub(crate) type ImageBytes = Arc<[u8]>;

/// File name (as found in the user's archive) to image bytes.
pub(crate) type FileBag = BTreeMap<String, ImageBytes>;

// ── Pages ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct TextBlock {
    /// `[x1, y1, x2, y2]` in page pixels.
    pub(crate) bbox: [f64; 4],
    #[serde(default)]
    pub(crate) vertical: bool,
    pub(crate) font_size: f64,
    #[serde(default)]
    pub(crate) lines: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct Page {
    pub(crate) img_width: u32,
    pub(crate) img_height: u32,
    /// Path of the source image inside the source archive. Only used for matching.
    pub(crate) img_path: String,
    #[serde(default)]
    pub(crate) blocks: Vec<TextBlock>,
}

// ── Current schema (v3) ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Thumbnail {
    pub(crate) bytes: Vec<u8>,
    pub(crate) width: u32,
    pub(crate) height: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct VolumeMetadata {
    pub(crate) volume_uuid: String,
    pub(crate) series_uuid: String,
    pub(crate) series_title: String,
    pub(crate) volume_title: String,
    pub(crate) mokuro_version: String,
    pub(crate) page_count: usize,
    pub(crate) character_count: u64,
    /// `page_char_counts[i]` = characters through page `i` inclusive.
    pub(crate) page_char_counts: Vec<u64>,
    #[serde(skip)]
    pub(crate) thumbnail: Option<Thumbnail>,
    pub(crate) added_at: i64,
}

/// Everything written for one volume inside a single transaction.
#[derive(Debug, Clone)]
pub(crate) struct VolumeRecord {
    pub(crate) metadata: VolumeMetadata,
    pub(crate) pages: Vec<Page>,
    pub(crate) files: FileBag,
}

// ── Migration ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum MigrationPhase {
    Counting,
    LoadingSeries,
    WritingVolume,
    DeletingSource,
    Complete,
}

impl MigrationPhase {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            Self::Counting => "counting",
            Self::LoadingSeries => "loading_series",
            Self::WritingVolume => "writing_volume",
            Self::DeletingSource => "deleting_source",
            Self::Complete => "complete",
        }
    }
}

impl std::fmt::Display for MigrationPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Delivered to the progress callback at each phase transition. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub(crate) struct MigrationProgress {
    pub(crate) phase: MigrationPhase,
    pub(crate) volumes_current: usize,
    pub(crate) volumes_total: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) series_current: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) series_total: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) series_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) volume_title: Option<String>,
}

impl MigrationProgress {
    pub(crate) fn new(phase: MigrationPhase, volumes_current: usize, volumes_total: usize) -> Self {
        Self {
            phase,
            volumes_current,
            volumes_total,
            series_current: None,
            series_total: None,
            series_title: None,
            volume_title: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum LegacyVersion {
    V1,
    V2,
}

impl LegacyVersion {
    pub(crate) fn from_number(version: u8) -> Option<Self> {
        match version {
            1 => Some(Self::V1),
            2 => Some(Self::V2),
            _ => None,
        }
    }

    pub(crate) fn number(&self) -> u8 {
        match self {
            Self::V1 => 1,
            Self::V2 => 2,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct MigrationReport {
    pub(crate) source: LegacyVersion,
    pub(crate) volumes_total: usize,
    /// Volumes written by this run.
    pub(crate) migrated: usize,
    /// Volumes found already present in the current store.
    pub(crate) skipped: usize,
}

#[cfg(test)]
pub(crate) fn text_page(img_path: &str, lines: &[&str]) -> Page {
    Page {
        img_width: 800,
        img_height: 1200,
        img_path: img_path.to_string(),
        blocks: vec![TextBlock {
            bbox: [0.0, 0.0, 100.0, 100.0],
            vertical: true,
            font_size: 24.0,
            lines: lines.iter().map(|l| l.to_string()).collect(),
        }],
    }
}
