//! PhotoStore trait definition.
//!
//! The ingestion pipeline and the query engine only talk to the catalog
//! through this trait, so tests can wrap or replace the SQLite store.

use super::models::{Album, NewPhoto, Photo, PhotoQuery};
use anyhow::Result;
use std::collections::BTreeSet;
use thiserror::Error;

/// Why a photo could not be inserted.
#[derive(Debug, Error)]
pub enum InsertPhotoError {
    /// Another entry already holds this content hash.
    #[error("content hash {0} is already cataloged")]
    DuplicateHash(String),

    /// Another entry already occupies this stored location.
    #[error("stored location {0} is already cataloged")]
    DuplicateLocation(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Repository over the photo catalog.
pub trait PhotoStore: Send + Sync {
    // =========================================================================
    // Lookups
    // =========================================================================

    fn find_by_id(&self, id: i64) -> Result<Option<Photo>>;

    /// Fast-path duplicate check. The unique constraint enforced by
    /// `insert_photo` remains the authority.
    fn find_by_hash(&self, content_hash: &str) -> Result<Option<Photo>>;

    fn find_by_location(&self, stored_location: &str) -> Result<Option<Photo>>;

    // =========================================================================
    // Writes
    // =========================================================================

    /// Commit a new entry. Unique constraint violations are reported as the
    /// matching `InsertPhotoError` variant, never as `Other`.
    fn insert_photo(&self, photo: &NewPhoto) -> Result<Photo, InsertPhotoError>;

    /// Replace the mutable annotations of an entry. Returns false if the id is unknown.
    fn set_annotations(
        &self,
        id: i64,
        description: Option<&str>,
        tags: &BTreeSet<String>,
    ) -> Result<bool>;

    // =========================================================================
    // Listing
    // =========================================================================

    fn list_photos(&self, query: &PhotoQuery) -> Result<Vec<Photo>>;

    fn count_photos(&self) -> Result<usize>;

    // =========================================================================
    // Albums
    // =========================================================================

    fn create_album(&self, name: &str, description: Option<&str>) -> Result<Album>;

    fn add_to_album(&self, album_id: i64, photo_id: i64) -> Result<()>;

    fn albums_for_photo(&self, photo_id: i64) -> Result<Vec<Album>>;
}
