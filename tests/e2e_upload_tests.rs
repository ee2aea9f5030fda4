//! End-to-end tests for photo ingestion over HTTP

mod common;

use chrono::{Datelike, Utc};
use common::{
    jpeg_with_datetime, jpeg_without_metadata, TestClient, TestServer, TEST_MAX_FILE_SIZE_BYTES,
};
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use serde_json::Value;

fn month_dir(at: chrono::DateTime<Utc>) -> String {
    format!("/{}/{:02}/", at.year(), at.month())
}

#[tokio::test]
async fn test_upload_places_photo_by_capture_month() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());

    let response = client
        .upload(vec![(
            "beach.jpg",
            "image/jpeg",
            jpeg_with_datetime("2023:06:15 10:30:00"),
        )])
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["errors"].as_array().unwrap().len(), 0);
    let uploaded = &body["uploaded"][0];
    assert_eq!(uploaded["filename"], "beach.jpg");
    assert_eq!(uploaded["capture_timestamp"], "2023-06-15T10:30:00Z");

    let stored = uploaded["stored_location"].as_str().unwrap();
    assert!(stored.contains("/2023/06/"), "{}", stored);
    assert!(stored.ends_with(".jpg"), "{}", stored);
    assert_eq!(server.stored_files().len(), 1);
}

#[tokio::test]
async fn test_upload_without_metadata_uses_ingestion_month() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());

    let before = Utc::now();
    let response = client
        .upload(vec![("scan.png", "image/png", jpeg_without_metadata("scan"))])
        .await;
    let after = Utc::now();
    assert_eq!(response.status(), StatusCode::OK);

    let body: Value = response.json().await.unwrap();
    let uploaded = &body["uploaded"][0];
    assert!(uploaded.get("capture_timestamp").is_none());

    let stored = uploaded["stored_location"].as_str().unwrap();
    assert!(
        stored.contains(&month_dir(before)) || stored.contains(&month_dir(after)),
        "{}",
        stored
    );
    assert!(stored.ends_with(".png"), "{}", stored);
}

#[tokio::test]
async fn test_duplicate_upload_is_conflict() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());
    let photo = jpeg_with_datetime("2023:06:15 10:30:00");

    let response = client
        .upload(vec![("first.jpg", "image/jpeg", photo.clone())])
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    let first_id = body["uploaded"][0]["id"].as_i64().unwrap();

    // Same bytes under another name
    let response = client
        .upload(vec![("second.jpg", "image/jpeg", photo)])
        .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["uploaded"].as_array().unwrap().len(), 0);
    assert_eq!(body["errors"][0]["filename"], "second.jpg");
    assert_eq!(body["errors"][0]["kind"], "duplicate");
    assert_eq!(body["errors"][0]["existing_id"], first_id);

    assert_eq!(server.photo_store.count_photos().unwrap(), 1);
    assert_eq!(server.stored_files().len(), 1);
}

#[tokio::test]
async fn test_concurrent_identical_uploads_store_one_photo() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());
    let photo = jpeg_with_datetime("2021:02:03 04:05:06");

    let (a, b) = tokio::join!(
        client.upload(vec![("a.jpg", "image/jpeg", photo.clone())]),
        client.upload(vec![("b.jpg", "image/jpeg", photo.clone())]),
    );

    let mut statuses = vec![a.status(), b.status()];
    statuses.sort();
    assert_eq!(statuses, vec![StatusCode::OK, StatusCode::CONFLICT]);

    assert_eq!(server.photo_store.count_photos().unwrap(), 1);
    assert_eq!(server.stored_files().len(), 1);
}

#[tokio::test]
async fn test_batch_with_oversized_file_is_partial_success() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());

    let oversized = vec![0xABu8; TEST_MAX_FILE_SIZE_BYTES as usize + 1];
    let response = client
        .upload(vec![
            ("one.jpg", "image/jpeg", jpeg_without_metadata("one")),
            ("big.jpg", "image/jpeg", oversized),
            ("three.jpg", "image/jpeg", jpeg_without_metadata("three")),
        ])
        .await;
    assert_eq!(response.status(), StatusCode::MULTI_STATUS);

    let body: Value = response.json().await.unwrap();
    let uploaded: Vec<&str> = body["uploaded"]
        .as_array()
        .unwrap()
        .iter()
        .map(|u| u["filename"].as_str().unwrap())
        .collect();
    assert_eq!(uploaded, vec!["one.jpg", "three.jpg"]);

    let errors = body["errors"].as_array().unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0]["filename"], "big.jpg");
    assert_eq!(errors[0]["kind"], "rejected");

    assert_eq!(server.stored_files().len(), 2);
}

#[tokio::test]
async fn test_unsupported_mime_type_is_rejected() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());

    let response = client
        .upload(vec![("notes.txt", "text/plain", b"hello".to_vec())])
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["errors"][0]["filename"], "notes.txt");
    assert_eq!(body["errors"][0]["kind"], "rejected");
    assert!(body["errors"][0]["error"]
        .as_str()
        .unwrap()
        .contains("text/plain"));
    assert!(server.stored_files().is_empty());
}

#[tokio::test]
async fn test_upload_accepts_file_field_name() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());

    let part = Part::bytes(jpeg_without_metadata("single"))
        .file_name("single.jpg")
        .mime_str("image/jpeg")
        .unwrap();
    let response = client.upload_form(Form::new().part("file", part)).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_upload_without_files_is_bad_request() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());

    let response = client
        .upload_form(Form::new().text("note", "no photos here"))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body: Value = response.json().await.unwrap();
    assert!(body["error"].is_string());
}
