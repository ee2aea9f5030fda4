//! SQLite-backed photo store.

use super::models::{Album, NewPhoto, Photo, PhotoQuery};
use super::schema::PHOTO_VERSIONED_SCHEMAS;
use super::trait_def::{InsertPhotoError, PhotoStore};
use crate::sqlite_persistence::migrate_if_needed;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tracing::info;

const PHOTO_COLUMNS: &str = "p.id, p.original_filename, p.stored_location, p.content_hash, \
     p.ingested_at, p.captured_at, p.file_size_bytes, p.mime_type, p.width, p.height, p.description";

/// SQLite-backed photo catalog.
///
/// Writes go through a single connection, which also serializes concurrent
/// commits of the same content hash. Reads are spread over a small pool.
#[derive(Clone)]
pub struct SqlitePhotoStore {
    read_pool: Vec<Arc<Mutex<Connection>>>,
    write_conn: Arc<Mutex<Connection>>,
    read_index: Arc<AtomicUsize>,
}

fn millis_to_datetime(idx: usize, millis: i64) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
        .ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, millis))
}

impl SqlitePhotoStore {
    /// Open (or create) the catalog database at `db_path`.
    ///
    /// # Arguments
    /// * `db_path` - Path to the SQLite database file
    /// * `read_pool_size` - Number of read-only connections for concurrent queries
    pub fn new<P: AsRef<Path>>(db_path: P, read_pool_size: usize) -> Result<Self> {
        let db_path = db_path.as_ref();

        let mut write_conn = Connection::open_with_flags(
            db_path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_URI
                | rusqlite::OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .with_context(|| format!("Failed to open photo catalog database {:?}", db_path))?;

        migrate_if_needed(&mut write_conn, PHOTO_VERSIONED_SCHEMAS, "photo catalog")?;
        write_conn.pragma_update(None, "journal_mode", "WAL")?;

        let photo_count: i64 = write_conn
            .query_row("SELECT COUNT(*) FROM photos", [], |r| r.get(0))
            .unwrap_or(0);
        info!("Opened photo catalog: {} photos", photo_count);

        let mut read_pool = Vec::with_capacity(read_pool_size);
        for _ in 0..read_pool_size {
            let read_conn = Connection::open_with_flags(
                db_path,
                rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY
                    | rusqlite::OpenFlags::SQLITE_OPEN_URI
                    | rusqlite::OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )?;
            read_conn.pragma_update(None, "journal_mode", "WAL")?;
            read_pool.push(Arc::new(Mutex::new(read_conn)));
        }

        Ok(Self {
            read_pool,
            write_conn: Arc::new(Mutex::new(write_conn)),
            read_index: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// A private in-memory catalog. Reads share the write connection.
    pub fn in_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migrate_if_needed(&mut conn, PHOTO_VERSIONED_SCHEMAS, "photo catalog")?;
        Ok(Self {
            read_pool: Vec::new(),
            write_conn: Arc::new(Mutex::new(conn)),
            read_index: Arc::new(AtomicUsize::new(0)),
        })
    }

    fn get_read_conn(&self) -> Arc<Mutex<Connection>> {
        if self.read_pool.is_empty() {
            return self.write_conn.clone();
        }
        let index = self.read_index.fetch_add(1, Ordering::SeqCst) % self.read_pool.len();
        self.read_pool[index].clone()
    }

    // =========================================================================
    // Internal Helper Methods
    // =========================================================================

    fn parse_photo_row(row: &rusqlite::Row) -> rusqlite::Result<Photo> {
        let captured_at = match row.get::<_, Option<i64>>(5)? {
            Some(millis) => Some(millis_to_datetime(5, millis)?),
            None => None,
        };
        Ok(Photo {
            id: row.get(0)?,
            original_filename: row.get(1)?,
            stored_location: row.get(2)?,
            content_hash: row.get(3)?,
            ingested_at: millis_to_datetime(4, row.get(4)?)?,
            captured_at,
            file_size_bytes: row.get(6)?,
            mime_type: row.get(7)?,
            width: row.get(8)?,
            height: row.get(9)?,
            description: row.get(10)?,
            tags: BTreeSet::new(),
        })
    }

    fn get_photo_tags(conn: &Connection, photo_id: i64) -> Result<BTreeSet<String>> {
        let mut stmt = conn.prepare_cached("SELECT tag FROM photo_tags WHERE photo_id = ?1")?;
        let tags = stmt
            .query_map(params![photo_id], |r| r.get(0))?
            .collect::<Result<BTreeSet<String>, _>>()?;
        Ok(tags)
    }

    fn with_tags(conn: &Connection, mut photo: Photo) -> Result<Photo> {
        photo.tags = Self::get_photo_tags(conn, photo.id)?;
        Ok(photo)
    }

    fn find_one(&self, column: &str, value: Value) -> Result<Option<Photo>> {
        let conn_arc = self.get_read_conn();
        let conn = conn_arc.lock().unwrap();
        let photo = conn
            .query_row(
                &format!("SELECT {} FROM photos p WHERE p.{} = ?1", PHOTO_COLUMNS, column),
                params![value],
                Self::parse_photo_row,
            )
            .optional()?;
        photo.map(|p| Self::with_tags(&conn, p)).transpose()
    }

    fn classify_insert_error(err: rusqlite::Error, photo: &NewPhoto) -> InsertPhotoError {
        if let rusqlite::Error::SqliteFailure(ref failure, Some(ref message)) = err {
            if failure.code == ErrorCode::ConstraintViolation {
                if message.contains("photos.content_hash") {
                    return InsertPhotoError::DuplicateHash(photo.content_hash.clone());
                }
                if message.contains("photos.stored_location") {
                    return InsertPhotoError::DuplicateLocation(photo.stored_location.clone());
                }
            }
        }
        InsertPhotoError::Other(anyhow::Error::new(err).context("Failed to insert photo"))
    }
}

impl PhotoStore for SqlitePhotoStore {
    fn find_by_id(&self, id: i64) -> Result<Option<Photo>> {
        self.find_one("id", Value::Integer(id))
    }

    fn find_by_hash(&self, content_hash: &str) -> Result<Option<Photo>> {
        self.find_one("content_hash", Value::Text(content_hash.to_string()))
    }

    fn find_by_location(&self, stored_location: &str) -> Result<Option<Photo>> {
        self.find_one("stored_location", Value::Text(stored_location.to_string()))
    }

    fn insert_photo(&self, photo: &NewPhoto) -> Result<Photo, InsertPhotoError> {
        let conn = self.write_conn.lock().unwrap();
        conn.execute(
            "INSERT INTO photos (original_filename, stored_location, content_hash, ingested_at, \
             captured_at, file_size_bytes, mime_type) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                photo.original_filename,
                photo.stored_location,
                photo.content_hash,
                photo.ingested_at.timestamp_millis(),
                photo.captured_at.map(|t| t.timestamp_millis()),
                photo.file_size_bytes,
                photo.mime_type,
            ],
        )
        .map_err(|e| Self::classify_insert_error(e, photo))?;

        let id = conn.last_insert_rowid();
        // Round-trip through the row parser so the returned entry carries
        // exactly what a later read would (millisecond precision).
        let committed = conn
            .query_row(
                &format!("SELECT {} FROM photos p WHERE p.id = ?1", PHOTO_COLUMNS),
                params![id],
                Self::parse_photo_row,
            )
            .context("Failed to read back committed photo")?;
        Ok(committed)
    }

    fn set_annotations(
        &self,
        id: i64,
        description: Option<&str>,
        tags: &BTreeSet<String>,
    ) -> Result<bool> {
        let mut conn = self.write_conn.lock().unwrap();
        let tx = conn.transaction()?;
        let updated = tx.execute(
            "UPDATE photos SET description = ?2 WHERE id = ?1",
            params![id, description],
        )?;
        if updated == 0 {
            return Ok(false);
        }
        tx.execute("DELETE FROM photo_tags WHERE photo_id = ?1", params![id])?;
        {
            let mut stmt = tx.prepare("INSERT INTO photo_tags (photo_id, tag) VALUES (?1, ?2)")?;
            for tag in tags {
                stmt.execute(params![id, tag])?;
            }
        }
        tx.commit()?;
        Ok(true)
    }

    fn list_photos(&self, query: &PhotoQuery) -> Result<Vec<Photo>> {
        let mut clauses: Vec<&str> = Vec::new();
        let mut values: Vec<Value> = Vec::new();

        if let Some(range) = &query.organizing_range {
            clauses.push(
                "COALESCE(p.captured_at, p.ingested_at) >= ? \
                 AND COALESCE(p.captured_at, p.ingested_at) < ?",
            );
            values.push(Value::Integer(range.start.timestamp_millis()));
            values.push(Value::Integer(range.end.timestamp_millis()));
        }
        if let Some(needle) = &query.filename_contains {
            clauses.push("instr(p.original_filename, ?) > 0");
            values.push(Value::Text(needle.clone()));
        }
        if let Some(needle) = &query.tag_contains {
            clauses.push(
                "EXISTS (SELECT 1 FROM photo_tags t WHERE t.photo_id = p.id AND instr(t.tag, ?) > 0)",
            );
            values.push(Value::Text(needle.clone()));
        }

        let mut sql = format!("SELECT {} FROM photos p", PHOTO_COLUMNS);
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY ");
        sql.push_str(query.order.to_sql());
        sql.push_str(" LIMIT ? OFFSET ?");
        values.push(Value::Integer(query.limit.map(|l| l as i64).unwrap_or(-1)));
        values.push(Value::Integer(query.offset as i64));

        let conn_arc = self.get_read_conn();
        let conn = conn_arc.lock().unwrap();
        let mut stmt = conn.prepare(&sql)?;
        let photos = stmt
            .query_map(rusqlite::params_from_iter(values.iter()), Self::parse_photo_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        photos
            .into_iter()
            .map(|p| Self::with_tags(&conn, p))
            .collect()
    }

    fn count_photos(&self) -> Result<usize> {
        let conn_arc = self.get_read_conn();
        let conn = conn_arc.lock().unwrap();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM photos", [], |r| r.get(0))?;
        Ok(count as usize)
    }

    fn create_album(&self, name: &str, description: Option<&str>) -> Result<Album> {
        let conn = self.write_conn.lock().unwrap();
        conn.execute(
            "INSERT INTO albums (name, description) VALUES (?1, ?2)",
            params![name, description],
        )
        .with_context(|| format!("Failed to create album {:?}", name))?;
        Ok(Album {
            id: conn.last_insert_rowid(),
            name: name.to_string(),
            description: description.map(str::to_string),
        })
    }

    fn add_to_album(&self, album_id: i64, photo_id: i64) -> Result<()> {
        let conn = self.write_conn.lock().unwrap();
        conn.execute(
            "INSERT OR IGNORE INTO album_photos (album_id, photo_id) VALUES (?1, ?2)",
            params![album_id, photo_id],
        )?;
        Ok(())
    }

    fn albums_for_photo(&self, photo_id: i64) -> Result<Vec<Album>> {
        let conn_arc = self.get_read_conn();
        let conn = conn_arc.lock().unwrap();
        let mut stmt = conn.prepare_cached(
            "SELECT a.id, a.name, a.description FROM albums a \
             JOIN album_photos ap ON ap.album_id = a.id \
             WHERE ap.photo_id = ?1 ORDER BY a.name",
        )?;
        let albums = stmt
            .query_map(params![photo_id], |r| {
                Ok(Album {
                    id: r.get(0)?,
                    name: r.get(1)?,
                    description: r.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(albums)
    }
}
