//! Canonical storage locations for ingested photos.

use chrono::{DateTime, Datelike, Utc};
use std::path::{Path, PathBuf};

/// Maps an organizing timestamp and a content hash to `<root>/<YYYY>/<MM>/<hash>.<ext>`.
///
/// The stored name is derived from the content hash, so two different contents
/// never share a location and the same content always maps to the same one.
#[derive(Clone, Debug)]
pub struct PlacementResolver {
    root: PathBuf,
}

impl PlacementResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn resolve(
        &self,
        organizing_at: DateTime<Utc>,
        content_hash: &str,
        mime_type: &str,
        original_filename: &str,
    ) -> PathBuf {
        self.month_dir(organizing_at)
            .join(stored_name(content_hash, mime_type, original_filename))
    }

    fn month_dir(&self, organizing_at: DateTime<Utc>) -> PathBuf {
        self.root
            .join(format!("{:04}", organizing_at.year()))
            .join(format!("{:02}", organizing_at.month()))
    }
}

/// `<hash>.<ext>`, with the extension taken from the mime type when it is a
/// known image type, from the original filename otherwise.
pub fn stored_name(content_hash: &str, mime_type: &str, original_filename: &str) -> String {
    format!(
        "{}.{}",
        content_hash,
        extension_for(mime_type, original_filename)
    )
}

fn extension_for(mime_type: &str, original_filename: &str) -> String {
    match mime_type {
        "image/jpeg" => return "jpg".to_string(),
        "image/png" => return "png".to_string(),
        _ => {}
    }

    Path::new(original_filename)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty() && e.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|e| e.to_lowercase())
        .unwrap_or_else(|| "bin".to_string())
}
