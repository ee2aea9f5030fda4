use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

use axum::{extract::State, middleware, response::IntoResponse, routing::get, Json, Router};
use serde::Serialize;

use super::photo_routes::photo_routes;
use super::{log_requests, metrics::metrics_handler, state::*, ServerConfig};
use crate::ingestion::IngestionPipeline;
use crate::photo_store::PhotoStore;

#[derive(Serialize)]
struct ServerStats {
    pub uptime: String,
    pub hash: String,
}

fn format_uptime(duration: Duration) -> String {
    let total_seconds = duration.as_secs();

    let days = total_seconds / 86_400;
    let hours = (total_seconds % 86_400) / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    format!("{}d {:02}:{:02}:{:02}", days, hours, minutes, seconds)
}

async fn home(State(state): State<ServerState>) -> impl IntoResponse {
    let stats = ServerStats {
        uptime: format_uptime(state.start_time.elapsed()),
        hash: state.hash.clone(),
    };
    Json(stats)
}

pub fn make_app(
    config: ServerConfig,
    photo_store: Arc<dyn PhotoStore>,
    ingestion_pipeline: Arc<IngestionPipeline>,
) -> Router {
    let state = ServerState::new(config.clone(), photo_store, ingestion_pipeline);

    Router::new()
        .route("/", get(home))
        .merge(photo_routes(&config))
        .layer(middleware::from_fn_with_state(state.clone(), log_requests))
        .with_state(state)
}

fn make_metrics_app() -> Router {
    Router::new().route("/metrics", get(metrics_handler))
}

pub async fn run_server(
    config: ServerConfig,
    photo_store: Arc<dyn PhotoStore>,
    ingestion_pipeline: Arc<IngestionPipeline>,
) -> Result<()> {
    let port = config.port;
    let metrics_port = config.metrics_port;
    let app = make_app(config, photo_store, ingestion_pipeline);

    let metrics_listener = tokio::net::TcpListener::bind(format!("127.0.0.1:{}", metrics_port))
        .await
        .with_context(|| format!("Failed to bind metrics port {}", metrics_port))?;
    tokio::spawn(async move {
        if let Err(e) = axum::serve(metrics_listener, make_metrics_app()).await {
            error!("Metrics server stopped: {}", e);
        }
    });

    let listener = tokio::net::TcpListener::bind(format!("127.0.0.1:{}", port))
        .await
        .with_context(|| format!("Failed to bind port {}", port))?;

    info!("Ready to serve at port {}!", port);
    info!("Metrics available at port {}!", metrics_port);
    Ok(axum::serve(listener, app).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingestion::PipelineSettings;
    use crate::photo_store::{NewPhoto, SqlitePhotoStore};
    use crate::server::RequestsLoggingLevel;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;
    use tower::ServiceExt; // for `oneshot`

    struct TestApp {
        app: Router,
        store: Arc<SqlitePhotoStore>,
        _dirs: TempDir,
    }

    fn test_app() -> TestApp {
        let dirs = TempDir::new().unwrap();
        let store = Arc::new(SqlitePhotoStore::in_memory().unwrap());
        let pipeline = Arc::new(IngestionPipeline::new(
            store.clone(),
            dirs.path().join("staging"),
            dirs.path().join("photos"),
            PipelineSettings::default(),
        ));
        let config = ServerConfig {
            requests_logging_level: RequestsLoggingLevel::None,
            ..Default::default()
        };
        TestApp {
            app: make_app(config, store.clone(), pipeline),
            store,
            _dirs: dirs,
        }
    }

    async fn get(app: &Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    #[test]
    fn test_format_uptime() {
        assert_eq!(format_uptime(Duration::from_secs(0)), "0d 00:00:00");
        assert_eq!(
            format_uptime(Duration::from_secs(2 * 86_400 + 3 * 3600 + 4 * 60 + 5)),
            "2d 03:04:05"
        );
    }

    #[tokio::test]
    async fn responds_on_home() {
        let t = test_app();
        let (status, json) = get(&t.app, "/").await;
        assert_eq!(status, StatusCode::OK);
        assert!(json["uptime"].is_string());
        assert!(json["hash"].is_string());
    }

    #[tokio::test]
    async fn rejects_invalid_listing_filters() {
        let t = test_app();
        for uri in [
            "/photos?month=6",
            "/photos?year=2024&month=13",
            "/photos?orderBy=random",
            "/photos?limit=-1",
            "/photos?year=last",
        ] {
            let (status, _) = get(&t.app, uri).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{}", uri);
        }
    }

    #[tokio::test]
    async fn serves_photo_details_and_timeline() {
        let t = test_app();
        let photo = t
            .store
            .insert_photo(&NewPhoto {
                original_filename: "beach.jpg".to_string(),
                stored_location: "/photos/2023/06/abc.jpg".to_string(),
                content_hash: "abc".to_string(),
                ingested_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
                captured_at: Some(Utc.with_ymd_and_hms(2023, 6, 15, 10, 30, 0).unwrap()),
                file_size_bytes: 3,
                mime_type: "image/jpeg".to_string(),
            })
            .unwrap();
        let album = t.store.create_album("Summer", None).unwrap();
        t.store.add_to_album(album.id, photo.id).unwrap();

        let (status, json) = get(&t.app, &format!("/photos/{}", photo.id)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["original_filename"], "beach.jpg");
        assert_eq!(json["albums"], serde_json::json!(["Summer"]));

        let (status, _) = get(&t.app, "/photos/9999").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, json) = get(&t.app, "/photos/timeline?limit_per_month=1").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["2023"]["06"][0]["id"], photo.id);

        let (status, json) = get(&t.app, "/photos?year=2023&month=6").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn upload_without_files_is_bad_request() {
        let t = test_app();
        let body = "--XBOUNDARY\r\n\
                    Content-Disposition: form-data; name=\"note\"\r\n\r\n\
                    hello\r\n\
                    --XBOUNDARY--\r\n";
        let request = Request::builder()
            .method("POST")
            .uri("/upload")
            .header("content-type", "multipart/form-data; boundary=XBOUNDARY")
            .body(Body::from(body))
            .unwrap();
        let response = t.app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn metrics_endpoint_renders() {
        crate::server::metrics::init_metrics();
        let app = make_metrics_app();
        let request = Request::builder()
            .uri("/metrics")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
