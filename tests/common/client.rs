//! HTTP client for end-to-end tests
//!
//! Wraps reqwest with one method per photo-catalog endpoint. When API routes
//! or request formats change, update only this file.

use super::constants::*;
use reqwest::multipart::{Form, Part};
use reqwest::Response;
use std::time::Duration;

pub struct TestClient {
    /// The underlying reqwest client (public for custom requests in tests)
    pub client: reqwest::Client,
    /// The base URL of the test server
    pub base_url: String,
}

#[allow(dead_code)]
impl TestClient {
    pub fn new(base_url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .expect("Failed to build reqwest client");

        Self { client, base_url }
    }

    // ========================================================================
    // Ingestion
    // ========================================================================

    /// POST /upload with each file as a `photos` part
    pub async fn upload(&self, files: Vec<(&str, &str, Vec<u8>)>) -> Response {
        let mut form = Form::new();
        for (filename, mime_type, bytes) in files {
            let part = Part::bytes(bytes)
                .file_name(filename.to_string())
                .mime_str(mime_type)
                .expect("Invalid mime type");
            form = form.part("photos", part);
        }
        self.upload_form(form).await
    }

    /// POST /upload with a caller-built form
    pub async fn upload_form(&self, form: Form) -> Response {
        self.client
            .post(format!("{}/upload", self.base_url))
            .multipart(form)
            .send()
            .await
            .expect("Upload request failed")
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// GET /photos?<query>
    pub async fn list_photos(&self, query: &[(&str, &str)]) -> Response {
        self.client
            .get(format!("{}/photos", self.base_url))
            .query(query)
            .send()
            .await
            .expect("List photos request failed")
    }

    /// GET /photos/timeline
    pub async fn timeline(&self, limit_per_month: Option<usize>) -> Response {
        let mut request = self
            .client
            .get(format!("{}/photos/timeline", self.base_url));
        if let Some(limit) = limit_per_month {
            request = request.query(&[("limit_per_month", limit)]);
        }
        request.send().await.expect("Timeline request failed")
    }

    /// GET /photos/{id}
    pub async fn get_photo(&self, id: i64) -> Response {
        self.client
            .get(format!("{}/photos/{}", self.base_url, id))
            .send()
            .await
            .expect("Get photo request failed")
    }

    /// GET /
    pub async fn home(&self) -> Response {
        self.client
            .get(format!("{}/", self.base_url))
            .send()
            .await
            .expect("Home request failed")
    }
}
