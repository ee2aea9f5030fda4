//! Catalog models for the SQLite-backed photo store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::ops::Range;

/// One ingested photo.
///
/// The content hash, stored location and timestamps never change after the
/// entry is committed. Description and tags are free-form annotations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Photo {
    pub id: i64,
    pub original_filename: String,
    pub stored_location: String,
    pub content_hash: String,
    pub ingested_at: DateTime<Utc>,
    pub captured_at: Option<DateTime<Utc>>,
    pub file_size_bytes: i64,
    pub mime_type: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub description: Option<String>,
    pub tags: BTreeSet<String>,
}

impl Photo {
    /// Capture time when known, ingestion time otherwise.
    pub fn organizing_at(&self) -> DateTime<Utc> {
        self.captured_at.unwrap_or(self.ingested_at)
    }
}

/// A photo about to be committed; the id is assigned by the store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewPhoto {
    pub original_filename: String,
    pub stored_location: String,
    pub content_hash: String,
    pub ingested_at: DateTime<Utc>,
    pub captured_at: Option<DateTime<Utc>>,
    pub file_size_bytes: i64,
    pub mime_type: String,
}

impl NewPhoto {
    pub fn organizing_at(&self) -> DateTime<Utc> {
        self.captured_at.unwrap_or(self.ingested_at)
    }
}

/// Named collection of photos.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Album {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
}

/// Sort order for photo listings.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhotoOrder {
    #[default]
    OrganizingDesc,
    OrganizingAsc,
    IngestedDesc,
    IngestedAsc,
    FilenameAsc,
    FilenameDesc,
}

impl PhotoOrder {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "organizing_desc" => Some(PhotoOrder::OrganizingDesc),
            "organizing_asc" => Some(PhotoOrder::OrganizingAsc),
            "ingested_desc" => Some(PhotoOrder::IngestedDesc),
            "ingested_asc" => Some(PhotoOrder::IngestedAsc),
            "filename_asc" => Some(PhotoOrder::FilenameAsc),
            "filename_desc" => Some(PhotoOrder::FilenameDesc),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PhotoOrder::OrganizingDesc => "organizing_desc",
            PhotoOrder::OrganizingAsc => "organizing_asc",
            PhotoOrder::IngestedDesc => "ingested_desc",
            PhotoOrder::IngestedAsc => "ingested_asc",
            PhotoOrder::FilenameAsc => "filename_asc",
            PhotoOrder::FilenameDesc => "filename_desc",
        }
    }

    /// ORDER BY clause, always ending with the id so ties are deterministic.
    pub(super) fn to_sql(self) -> &'static str {
        match self {
            PhotoOrder::OrganizingDesc => "COALESCE(p.captured_at, p.ingested_at) DESC, p.id DESC",
            PhotoOrder::OrganizingAsc => "COALESCE(p.captured_at, p.ingested_at) ASC, p.id ASC",
            PhotoOrder::IngestedDesc => "p.ingested_at DESC, p.id DESC",
            PhotoOrder::IngestedAsc => "p.ingested_at ASC, p.id ASC",
            PhotoOrder::FilenameAsc => "p.original_filename ASC, p.id ASC",
            PhotoOrder::FilenameDesc => "p.original_filename DESC, p.id DESC",
        }
    }
}

/// An already validated listing request, executed as-is by the store.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PhotoQuery {
    /// Half-open interval on the organizing timestamp.
    pub organizing_range: Option<Range<DateTime<Utc>>>,
    /// Case-sensitive substring of the original filename.
    pub filename_contains: Option<String>,
    /// Case-sensitive substring of any tag.
    pub tag_contains: Option<String>,
    pub order: PhotoOrder,
    pub limit: Option<usize>,
    pub offset: usize,
}
