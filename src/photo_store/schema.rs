//! SQLite schema for the photo catalog.
//!
//! Timestamps are Unix milliseconds (UTC). The organizing timestamp is derived
//! as `COALESCE(captured_at, ingested_at)` and is not stored.

use crate::sqlite_column;
use crate::sqlite_persistence::{
    Column, ForeignKey, ForeignKeyOnChange, SqlType, Table, VersionedSchema, DEFAULT_TIMESTAMP_MS,
};

const PHOTO_FK: ForeignKey = ForeignKey {
    foreign_table: "photos",
    foreign_column: "id",
    on_delete: ForeignKeyOnChange::Cascade,
};

const ALBUM_FK: ForeignKey = ForeignKey {
    foreign_table: "albums",
    foreign_column: "id",
    on_delete: ForeignKeyOnChange::Cascade,
};

/// One row per ingested photo. Both the content hash and the stored location
/// are unique, the content hash being the dedup key.
const PHOTOS_TABLE: Table = Table {
    name: "photos",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("original_filename", &SqlType::Text, non_null = true),
        sqlite_column!("stored_location", &SqlType::Text, non_null = true),
        sqlite_column!("content_hash", &SqlType::Text, non_null = true),
        sqlite_column!("ingested_at", &SqlType::Integer, non_null = true),
        sqlite_column!("captured_at", &SqlType::Integer),
        sqlite_column!("file_size_bytes", &SqlType::Integer, non_null = true),
        sqlite_column!("mime_type", &SqlType::Text, non_null = true),
        sqlite_column!("width", &SqlType::Integer),
        sqlite_column!("height", &SqlType::Integer),
        sqlite_column!("description", &SqlType::Text),
    ],
    indices: &[
        ("idx_photos_captured_at", "captured_at"),
        ("idx_photos_ingested_at", "ingested_at"),
    ],
    unique_constraints: &[&["content_hash"], &["stored_location"]],
};

const PHOTO_TAGS_TABLE: Table = Table {
    name: "photo_tags",
    columns: &[
        sqlite_column!(
            "photo_id",
            &SqlType::Integer,
            non_null = true,
            foreign_key = Some(&PHOTO_FK)
        ),
        sqlite_column!("tag", &SqlType::Text, non_null = true),
    ],
    indices: &[("idx_photo_tags_tag", "tag")],
    unique_constraints: &[&["photo_id", "tag"]],
};

const ALBUMS_TABLE: Table = Table {
    name: "albums",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("name", &SqlType::Text, non_null = true),
        sqlite_column!("description", &SqlType::Text),
    ],
    indices: &[],
    unique_constraints: &[&["name"]],
};

/// Photo <-> Album membership
const ALBUM_PHOTOS_TABLE: Table = Table {
    name: "album_photos",
    columns: &[
        sqlite_column!(
            "album_id",
            &SqlType::Integer,
            non_null = true,
            foreign_key = Some(&ALBUM_FK)
        ),
        sqlite_column!(
            "photo_id",
            &SqlType::Integer,
            non_null = true,
            foreign_key = Some(&PHOTO_FK)
        ),
        sqlite_column!(
            "added_at",
            &SqlType::Integer,
            non_null = true,
            default_value = Some(DEFAULT_TIMESTAMP_MS)
        ),
    ],
    indices: &[("idx_album_photos_photo", "photo_id")],
    unique_constraints: &[&["album_id", "photo_id"]],
};

pub const PHOTO_VERSIONED_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 0,
    tables: &[
        PHOTOS_TABLE,
        PHOTO_TAGS_TABLE,
        ALBUMS_TABLE,
        ALBUM_PHOTOS_TABLE,
    ],
    migration: None,
}];
