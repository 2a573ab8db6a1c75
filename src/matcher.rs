//! Aligns an unordered bag of archive files to an ordered page list.
//!
//! Strategies are tried in order and the first one that resolves every page
//! wins: exact path, unique basename, then natural-order position.

use std::collections::{HashMap, HashSet};

use crate::normalize::{normalize_path, normalized_basename};
use crate::types::{FileBag, ImageBytes, Page};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MatchStrategy {
    ExactPath,
    Basename,
    Positional,
}

impl MatchStrategy {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            Self::ExactPath => "exact-path",
            Self::Basename => "basename",
            Self::Positional => "positional",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Alignment<'a> {
    pub(crate) strategy: MatchStrategy,
    /// `keys[i]` is the file key for `pages[i]`, `None` when unmatched.
    pub(crate) keys: Vec<Option<&'a str>>,
}

pub(crate) fn align_files<'a>(files: &'a FileBag, pages: &[Page]) -> Alignment<'a> {
    if let Some(keys) = match_exact(files, pages) {
        return Alignment {
            strategy: MatchStrategy::ExactPath,
            keys,
        };
    }
    if let Some(keys) = match_basename(files, pages) {
        return Alignment {
            strategy: MatchStrategy::Basename,
            keys,
        };
    }
    Alignment {
        strategy: MatchStrategy::Positional,
        keys: match_positional(files, pages.len()),
    }
}

pub(crate) fn match_file_keys<'a>(files: &'a FileBag, pages: &[Page]) -> Vec<Option<&'a str>> {
    align_files(files, pages).keys
}

pub(crate) fn match_files_to_pages(files: &FileBag, pages: &[Page]) -> Vec<Option<ImageBytes>> {
    match_file_keys(files, pages)
        .into_iter()
        .map(|key| key.and_then(|k| files.get(k).cloned()))
        .collect()
}

fn match_exact<'a>(files: &'a FileBag, pages: &[Page]) -> Option<Vec<Option<&'a str>>> {
    let mut by_normalized: HashMap<String, &'a str> = HashMap::with_capacity(files.len());
    for key in files.keys() {
        by_normalized.entry(normalize_path(key)).or_insert(key.as_str());
    }

    let mut out = Vec::with_capacity(pages.len());
    for page in pages {
        if let Some((key, _)) = files.get_key_value(page.img_path.as_str()) {
            out.push(Some(key.as_str()));
            continue;
        }
        let key = by_normalized.get(&normalize_path(&page.img_path))?;
        out.push(Some(*key));
    }
    Some(out)
}

fn match_basename<'a>(files: &'a FileBag, pages: &[Page]) -> Option<Vec<Option<&'a str>>> {
    let mut by_base: HashMap<String, &'a str> = HashMap::with_capacity(files.len());
    let mut conflicts: HashSet<String> = HashSet::new();
    for key in files.keys() {
        let base = normalized_basename(key);
        match by_base.get(&base) {
            Some(existing) if *existing != key.as_str() => {
                conflicts.insert(base);
            }
            Some(_) => {}
            None => {
                by_base.insert(base, key.as_str());
            }
        }
    }

    let mut out = Vec::with_capacity(pages.len());
    for page in pages {
        let base = normalized_basename(&page.img_path);
        if conflicts.contains(&base) {
            tracing::debug!(basename = %base, "basename collision, falling back to positional match");
            return None;
        }
        let key = by_base.get(&base)?;
        out.push(Some(*key));
    }
    Some(out)
}

fn match_positional(files: &FileBag, page_count: usize) -> Vec<Option<&str>> {
    let mut keys: Vec<&str> = files.keys().map(String::as_str).collect();
    keys.sort_by(|a, b| natord::compare_ignore_case(a, b));
    (0..page_count).map(|i| keys.get(i).copied()).collect()
}
