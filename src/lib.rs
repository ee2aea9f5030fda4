//! Photo Catalog Server Library
//!
//! Ingests uploaded photos into a content-addressed, date-organized library
//! and serves filtered listings and a year/month timeline over the catalog.

pub mod config;
pub mod ingestion;
pub mod photo_store;
pub mod query;
pub mod server;
pub mod sqlite_persistence;

// Re-export commonly used types for convenience
pub use ingestion::{IngestionError, IngestionPipeline, PipelineSettings};
pub use photo_store::{Photo, PhotoStore, SqlitePhotoStore};
pub use query::{PhotoFilter, QueryEngine, QueryError};
pub use server::{make_app, run_server, RequestsLoggingLevel, ServerConfig};
