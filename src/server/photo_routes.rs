//! Photo HTTP routes.
//!
//! Provides endpoints for:
//! - Uploading one or more photos (multipart/form-data)
//! - Listing photos with filters
//! - The year/month timeline
//! - Fetching a single photo with its tags and albums

use axum::{
    body::Bytes,
    extract::{multipart::Field, DefaultBodyLimit, Multipart, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, error, warn};

use crate::ingestion::IngestionError;
use crate::photo_store::Photo;
use crate::query::{PhotoFilter, QueryEngine, QueryError};
use crate::server::metrics;
use crate::server::state::{GuardedIngestionPipeline, GuardedPhotoStore, ServerState};

use super::ServerConfig;

/// Multipart field names carrying files.
const UPLOAD_FIELD_NAMES: &[&str] = &["photos", "file"];

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error_response(status: StatusCode, error: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
        }),
    )
        .into_response()
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UploadedPhoto {
    pub id: i64,
    pub filename: String,
    pub stored_location: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capture_timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UploadFailure {
    pub filename: String,
    pub error: String,
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub existing_id: Option<i64>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct UploadResponse {
    pub uploaded: Vec<UploadedPhoto>,
    pub errors: Vec<UploadFailure>,
}

#[derive(Debug, Deserialize)]
pub struct TimelineParams {
    pub limit_per_month: Option<usize>,
}

/// year -> two-digit month -> photos
pub type TimelineResponse = BTreeMap<String, BTreeMap<String, Vec<Photo>>>;

#[derive(Debug, Serialize)]
pub struct PhotoDetails {
    #[serde(flatten)]
    pub photo: Photo,
    pub albums: Vec<String>,
}

// =============================================================================
// Upload
// =============================================================================

/// A file read from the request, before it reaches the pipeline.
enum UploadSlot {
    Accepted {
        filename: String,
        mime_type: String,
        data: Bytes,
    },
    Rejected(UploadFailure),
}

fn rejection(filename: String, error: String) -> UploadSlot {
    metrics::record_rejected_upload();
    UploadSlot::Rejected(UploadFailure {
        filename,
        error,
        kind: "rejected".to_string(),
        existing_id: None,
    })
}

/// Read a field up to `max` bytes. `None` if it is larger.
async fn read_limited(field: &mut Field<'_>, max: u64) -> Result<Option<Bytes>, String> {
    let mut data = Vec::new();
    while let Some(chunk) = field.chunk().await.map_err(|e| e.to_string())? {
        if (data.len() + chunk.len()) as u64 > max {
            return Ok(None);
        }
        data.extend_from_slice(&chunk);
    }
    Ok(Some(Bytes::from(data)))
}

async fn read_upload_slots(
    config: &ServerConfig,
    multipart: &mut Multipart,
) -> Result<Vec<UploadSlot>, String> {
    let mut slots = Vec::new();

    while let Some(mut field) = multipart.next_field().await.map_err(|e| e.to_string())? {
        let field_name = field.name().unwrap_or("").to_string();
        if !UPLOAD_FIELD_NAMES.contains(&field_name.as_str()) {
            debug!("Ignoring multipart field {:?}", field_name);
            continue;
        }

        let filename = field
            .file_name()
            .filter(|f| !f.is_empty())
            .unwrap_or("upload")
            .to_string();
        let mime_type = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();

        if !config.is_allowed_mime_type(&mime_type) {
            slots.push(rejection(
                filename,
                format!("unsupported file type {}", mime_type),
            ));
            continue;
        }

        match read_limited(&mut field, config.max_file_size_bytes).await? {
            Some(data) if data.is_empty() => {
                slots.push(rejection(filename, "empty file".to_string()));
            }
            Some(data) => slots.push(UploadSlot::Accepted {
                filename,
                mime_type: mime_type.to_ascii_lowercase(),
                data,
            }),
            None => slots.push(rejection(
                filename,
                format!(
                    "file too large (max: {:#})",
                    byte_unit::Byte::from(config.max_file_size_bytes)
                ),
            )),
        }
    }

    Ok(slots)
}

fn failure_for(filename: String, err: &IngestionError) -> UploadFailure {
    let existing_id = match err {
        IngestionError::Duplicate { existing } => Some(existing.id),
        _ => None,
    };
    UploadFailure {
        filename,
        error: err.to_string(),
        kind: err.kind().to_string(),
        existing_id,
    }
}

/// 200 when everything landed, 207 on a mix. When nothing landed the status
/// reflects the failures: 409 if all were duplicates, 504 if all timed out,
/// 500 if any was the server's fault, 400 otherwise.
fn batch_status(response: &UploadResponse, any_internal: bool) -> StatusCode {
    if response.errors.is_empty() {
        StatusCode::OK
    } else if !response.uploaded.is_empty() {
        StatusCode::MULTI_STATUS
    } else if response.errors.iter().all(|e| e.kind == "duplicate") {
        StatusCode::CONFLICT
    } else if response.errors.iter().all(|e| e.kind == "timeout") {
        StatusCode::GATEWAY_TIMEOUT
    } else if any_internal {
        StatusCode::INTERNAL_SERVER_ERROR
    } else {
        StatusCode::BAD_REQUEST
    }
}

/// POST /upload - Upload one or more photos
async fn upload_photos(
    State(config): State<ServerConfig>,
    State(pipeline): State<GuardedIngestionPipeline>,
    mut multipart: Multipart,
) -> Response {
    let slots = match read_upload_slots(&config, &mut multipart).await {
        Ok(slots) => slots,
        Err(e) => {
            warn!("Failed to read upload: {}", e);
            return error_response(StatusCode::BAD_REQUEST, format!("invalid upload: {}", e));
        }
    };

    if slots.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "no files in upload");
    }

    let outcomes = join_all(slots.into_iter().map(|slot| {
        let pipeline = pipeline.clone();
        async move {
            match slot {
                UploadSlot::Rejected(failure) => Err((failure, false)),
                UploadSlot::Accepted {
                    filename,
                    mime_type,
                    data,
                } => match pipeline
                    .ingest(&data[..], &filename, data.len() as u64, &mime_type)
                    .await
                {
                    Ok(photo) => Ok(UploadedPhoto {
                        id: photo.id,
                        filename,
                        stored_location: photo.stored_location,
                        capture_timestamp: photo.captured_at,
                    }),
                    Err(e) => Err((failure_for(filename, &e), e.is_internal())),
                },
            }
        }
    }))
    .await;

    let mut response = UploadResponse::default();
    let mut any_internal = false;
    for outcome in outcomes {
        match outcome {
            Ok(uploaded) => response.uploaded.push(uploaded),
            Err((failure, internal)) => {
                any_internal |= internal;
                response.errors.push(failure);
            }
        }
    }

    let status = batch_status(&response, any_internal);
    (status, Json(response)).into_response()
}

// =============================================================================
// Queries
// =============================================================================

fn query_error_response(err: QueryError) -> Response {
    match err {
        QueryError::Validation(msg) => error_response(StatusCode::BAD_REQUEST, msg),
        QueryError::Store(e) => {
            error!("Photo query failed: {:#}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "query failed")
        }
    }
}

/// GET /photos - Filtered listing
async fn list_photos(
    State(engine): State<QueryEngine>,
    Query(filter): Query<PhotoFilter>,
) -> Response {
    match engine.list(&filter) {
        Ok(photos) => Json(photos).into_response(),
        Err(e) => query_error_response(e),
    }
}

/// GET /photos/timeline - Photos grouped by year and month
async fn get_timeline(
    State(engine): State<QueryEngine>,
    Query(params): Query<TimelineParams>,
) -> Response {
    let timeline = match engine.timeline(params.limit_per_month.unwrap_or(0)) {
        Ok(timeline) => timeline,
        Err(e) => return query_error_response(e),
    };

    let response: TimelineResponse = timeline
        .into_iter()
        .map(|(year, months)| {
            let months = months
                .into_iter()
                .map(|(month, photos)| (format!("{:02}", month), photos))
                .collect();
            (year.to_string(), months)
        })
        .collect();
    Json(response).into_response()
}

/// GET /photos/{id} - One photo with its album names
async fn get_photo(State(store): State<GuardedPhotoStore>, Path(id): Path<i64>) -> Response {
    let photo = match store.find_by_id(id) {
        Ok(Some(photo)) => photo,
        Ok(None) => return StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            error!("Failed to load photo {}: {:#}", id, e);
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "failed to load photo");
        }
    };

    match store.albums_for_photo(id) {
        Ok(albums) => Json(PhotoDetails {
            photo,
            albums: albums.into_iter().map(|a| a.name).collect(),
        })
        .into_response(),
        Err(e) => {
            error!("Failed to load albums of photo {}: {:#}", id, e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "failed to load photo")
        }
    }
}

// =============================================================================
// Router Construction
// =============================================================================

/// Build the photo routes.
///
/// - POST /upload - Upload photos (body limited to `max_request_size_bytes`)
/// - GET /photos - List photos
/// - GET /photos/timeline - Timeline
/// - GET /photos/{id} - Photo details
pub fn photo_routes(config: &ServerConfig) -> Router<ServerState> {
    let upload_route = Router::new()
        .route("/upload", post(upload_photos))
        .layer(DefaultBodyLimit::max(config.max_request_size_bytes));

    Router::new()
        .merge(upload_route)
        .route("/photos", get(list_photos))
        .route("/photos/timeline", get(get_timeline))
        .route("/photos/{id}", get(get_photo))
}
