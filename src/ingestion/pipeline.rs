//! Upload-to-catalog-entry orchestration.
//!
//! An ingestion runs in two phases:
//! 1. `prepare`: admission, staging, hashing + capture time, duplicate pre-check.
//!    Bounded by the per-ingestion deadline; dropping it only loses the staged copy.
//! 2. placement + commit + compensation, run as a single blocking task. It is
//!    never cancelled halfway, so a placed file is either cataloged or removed.

use super::capture_metadata::extract_capture_timestamp;
use super::duplicate_guard::{CommitOutcome, DuplicateCheck, DuplicateGuard};
use super::hasher::hash_file;
use super::placement::PlacementResolver;
use super::staging::{Placement, StagedFile, StagingArea, StagingError};
use crate::photo_store::{NewPhoto, Photo, PhotoStore};
use crate::server::metrics;
use anyhow::anyhow;
use chrono::{DateTime, Utc};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::AsyncRead;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::spawn_blocking;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum IngestionError {
    #[error("content already cataloged as photo {}", .existing.id)]
    Duplicate { existing: Box<Photo> },

    #[error("upload rejected: {0}")]
    Rejected(String),

    #[error("storage error: {0:#}")]
    Storage(anyhow::Error),

    #[error("persistence error: {0:#}")]
    Persistence(anyhow::Error),

    #[error("ingestion timed out after {0:?}")]
    Timeout(Duration),
}

impl IngestionError {
    /// Stable machine-readable name, used in responses and metric labels.
    pub fn kind(&self) -> &'static str {
        match self {
            IngestionError::Duplicate { .. } => "duplicate",
            IngestionError::Rejected(_) => "rejected",
            IngestionError::Storage(_) => "storage_error",
            IngestionError::Persistence(_) => "persistence_error",
            IngestionError::Timeout(_) => "timeout",
        }
    }

    /// Whether the failure is the server's fault rather than the upload's.
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            IngestionError::Storage(_) | IngestionError::Persistence(_) | IngestionError::Timeout(_)
        )
    }
}

impl From<StagingError> for IngestionError {
    fn from(err: StagingError) -> Self {
        match err {
            StagingError::FileTooLarge(..) => IngestionError::Rejected(err.to_string()),
            StagingError::Io(e) => {
                IngestionError::Storage(anyhow::Error::new(e).context("Failed to stage upload"))
            }
        }
    }
}

#[derive(Clone, Debug)]
pub struct PipelineSettings {
    /// Ingestions allowed to run at the same time; the rest wait for a slot.
    pub max_concurrent: usize,
    /// Deadline for admission, staging and analysis of one upload.
    pub timeout: Duration,
    pub max_file_size: Option<u64>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            timeout: Duration::from_secs(60),
            max_file_size: Some(10 * 1024 * 1024),
        }
    }
}

type CaptureTimeFn = fn(&Path) -> io::Result<Option<DateTime<Utc>>>;

pub struct IngestionPipeline {
    guard: DuplicateGuard,
    staging: StagingArea,
    placement: PlacementResolver,
    permits: Arc<Semaphore>,
    timeout: Duration,
    capture_time: CaptureTimeFn,
}

/// Everything the commit phase needs, owned so it can move into a blocking task.
struct Prepared {
    permit: OwnedSemaphorePermit,
    staged: StagedFile,
    target: PathBuf,
    photo: NewPhoto,
}

impl IngestionPipeline {
    pub fn new(
        store: Arc<dyn PhotoStore>,
        staging_dir: impl Into<PathBuf>,
        storage_root: impl Into<PathBuf>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            guard: DuplicateGuard::new(store),
            staging: StagingArea::new(staging_dir, settings.max_file_size),
            placement: PlacementResolver::new(storage_root),
            permits: Arc::new(Semaphore::new(settings.max_concurrent)),
            timeout: settings.timeout,
            capture_time: extract_capture_timestamp,
        }
    }

    /// Ingest one upload and return its new catalog entry.
    ///
    /// `declared_size` and `declared_mime` are recorded as given.
    pub async fn ingest<R>(
        &self,
        stream: R,
        original_filename: &str,
        declared_size: u64,
        declared_mime: &str,
    ) -> Result<Photo, IngestionError>
    where
        R: AsyncRead + Unpin,
    {
        let started = Instant::now();
        let result = self
            .run(stream, original_filename, declared_size, declared_mime)
            .await;

        match &result {
            Ok(photo) => {
                info!(
                    "Ingested {:?} as photo {} at {}",
                    original_filename, photo.id, photo.stored_location
                );
                metrics::record_ingestion("ingested", started.elapsed());
            }
            Err(e) => {
                match e {
                    IngestionError::Duplicate { existing } => info!(
                        "Upload {:?} duplicates photo {}",
                        original_filename, existing.id
                    ),
                    IngestionError::Rejected(_) => {
                        info!("Upload {:?} rejected: {}", original_filename, e)
                    }
                    _ => warn!("Failed to ingest {:?}: {}", original_filename, e),
                }
                metrics::record_ingestion(e.kind(), started.elapsed());
            }
        }
        result
    }

    async fn run<R>(
        &self,
        stream: R,
        original_filename: &str,
        declared_size: u64,
        declared_mime: &str,
    ) -> Result<Photo, IngestionError>
    where
        R: AsyncRead + Unpin,
    {
        let prepared = match tokio::time::timeout(
            self.timeout,
            self.prepare(stream, original_filename, declared_size, declared_mime),
        )
        .await
        {
            Ok(prepared) => prepared?,
            Err(_) => return Err(IngestionError::Timeout(self.timeout)),
        };

        let guard = self.guard.clone();
        spawn_blocking(move || place_and_commit(prepared, &guard))
            .await
            .map_err(|e| IngestionError::Storage(anyhow!("Placement task failed: {}", e)))?
    }

    async fn prepare<R>(
        &self,
        stream: R,
        original_filename: &str,
        declared_size: u64,
        declared_mime: &str,
    ) -> Result<Prepared, IngestionError>
    where
        R: AsyncRead + Unpin,
    {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| IngestionError::Storage(anyhow!("Ingestion slots closed: {}", e)))?;

        let ingested_at = Utc::now();
        let staged = self.staging.stage(stream, original_filename).await?;
        debug!(
            "Staged {:?} ({} bytes) at {:?}",
            original_filename,
            staged.size(),
            staged.path()
        );

        let (content_hash, captured_at) = analyze(staged.path(), self.capture_time).await?;

        let guard = self.guard.clone();
        let hash = content_hash.clone();
        let check = spawn_blocking(move || guard.check(&hash))
            .await
            .map_err(|e| IngestionError::Persistence(anyhow!("Duplicate check failed: {}", e)))?
            .map_err(IngestionError::Persistence)?;
        if let DuplicateCheck::Duplicate(existing) = check {
            return Err(IngestionError::Duplicate {
                existing: Box::new(existing),
            });
        }

        let organizing_at = captured_at.unwrap_or(ingested_at);
        let target =
            self.placement
                .resolve(organizing_at, &content_hash, declared_mime, original_filename);

        let photo = NewPhoto {
            original_filename: original_filename.to_string(),
            stored_location: target.to_string_lossy().into_owned(),
            content_hash,
            ingested_at,
            captured_at,
            file_size_bytes: declared_size as i64,
            mime_type: declared_mime.to_string(),
        };

        Ok(Prepared {
            permit,
            staged,
            target,
            photo,
        })
    }
}

/// Hash the staged copy and look for a capture time, concurrently.
///
/// A failed hash is a storage error. A failed capture time lookup only means
/// the photo is organized by its ingestion time.
async fn analyze(
    path: &Path,
    capture_time: CaptureTimeFn,
) -> Result<(String, Option<DateTime<Utc>>), IngestionError> {
    let hash_path = path.to_path_buf();
    let exif_path = path.to_path_buf();
    let (hashed, captured) = tokio::join!(
        spawn_blocking(move || hash_file(&hash_path)),
        spawn_blocking(move || capture_time(&exif_path)),
    );

    let content_hash = hashed
        .map_err(|e| IngestionError::Storage(anyhow!("Hashing task failed: {}", e)))?
        .map_err(|e| {
            IngestionError::Storage(anyhow::Error::new(e).context("Failed to hash staged upload"))
        })?;

    let captured_at = match captured {
        Ok(Ok(captured_at)) => captured_at,
        Ok(Err(e)) => {
            warn!("Could not read metadata of {:?}: {}", path, e);
            None
        }
        Err(e) => {
            warn!("Metadata task failed for {:?}: {}", path, e);
            None
        }
    };

    Ok((content_hash, captured_at))
}

fn place_and_commit(prepared: Prepared, guard: &DuplicateGuard) -> Result<Photo, IngestionError> {
    let Prepared {
        permit: _permit,
        staged,
        target,
        photo,
    } = prepared;

    // Held until the file at `target` is either cataloged or removed
    let _location = guard.lock_location(&photo.stored_location);

    let placement = staged.place(&target).map_err(|e| {
        IngestionError::Storage(
            anyhow::Error::new(e).context(format!("Failed to place upload at {:?}", target)),
        )
    })?;
    let created = matches!(placement, Placement::Created);

    match guard.commit(&photo) {
        Ok(CommitOutcome::Committed(committed)) => {
            // Someone else's bytes were already at the target. Make sure they
            // are still there now that this entry references them.
            if let Placement::AlreadyPresent(staged) = placement {
                if !target.exists() {
                    if let Err(e) = staged.place(&target) {
                        error!(
                            "Failed to restore {:?} for photo {}: {}",
                            target, committed.id, e
                        );
                    }
                }
            }
            Ok(committed)
        }
        Ok(CommitOutcome::Duplicate(existing)) => {
            if created && existing.stored_location != photo.stored_location {
                remove_placed(&target);
            }
            Err(IngestionError::Duplicate {
                existing: Box::new(existing),
            })
        }
        Err(e) => {
            if created {
                compensate(guard, &photo, &target);
            }
            Err(IngestionError::Persistence(e))
        }
    }
}

/// Remove a file placed by a failed commit unless a committed entry references it.
fn compensate(guard: &DuplicateGuard, photo: &NewPhoto, target: &Path) {
    match guard.store().find_by_location(&photo.stored_location) {
        Ok(Some(owner)) => debug!("Keeping {:?}, referenced by photo {}", target, owner.id),
        Ok(None) => remove_placed(target),
        Err(e) => {
            warn!("Could not check references to {:?}: {}", target, e);
            remove_placed(target);
        }
    }
}

fn remove_placed(target: &Path) {
    match std::fs::remove_file(target) {
        Ok(()) => debug!("Removed uncataloged file {:?}", target),
        Err(e) => error!("Failed to remove uncataloged file {:?}: {}", target, e),
    }
}
