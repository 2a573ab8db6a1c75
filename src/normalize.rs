use unicode_normalization::UnicodeNormalization;

/// Canonical form of an archive path for equality comparison: forward slashes,
/// NFC, lowercase. Never drops characters from the basename.
pub(crate) fn normalize_path(path: &str) -> String {
    path.replace('\\', "/").nfc().collect::<String>().to_lowercase()
}

pub(crate) fn normalized_basename(path: &str) -> String {
    let normalized = normalize_path(path);
    match normalized.rsplit_once('/') {
        Some((_, base)) => base.to_string(),
        None => normalized,
    }
}
