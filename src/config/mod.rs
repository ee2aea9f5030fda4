mod file_config;

pub use file_config::{FileConfig, IngestionConfig};

use crate::ingestion::PipelineSettings;
use crate::server::RequestsLoggingLevel;
use anyhow::{bail, Result};
use clap::ValueEnum;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_MAX_CONCURRENT_INGESTIONS: usize = 4;
pub const DEFAULT_INGESTION_TIMEOUT_SEC: u64 = 60;
pub const DEFAULT_MAX_FILE_SIZE_BYTES: u64 = 10 * 1024 * 1024;
pub const DEFAULT_MAX_REQUEST_SIZE_BYTES: usize = 100 * 1024 * 1024;
pub const DEFAULT_ALLOWED_MIME_TYPES: &[&str] = &["image/jpeg", "image/png"];

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub db_dir: Option<PathBuf>,
    pub storage_path: Option<PathBuf>,
    pub staging_dir: Option<PathBuf>,
    pub port: u16,
    pub metrics_port: u16,
    pub logging_level: RequestsLoggingLevel,
    pub max_concurrent_ingestions: Option<usize>,
    pub ingestion_timeout_sec: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_dir: PathBuf,
    /// Root of the `<YYYY>/<MM>/` photo tree.
    pub storage_path: PathBuf,
    pub staging_dir: PathBuf,
    pub port: u16,
    pub metrics_port: u16,
    pub logging_level: RequestsLoggingLevel,

    pub ingestion: IngestionSettings,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestionSettings {
    pub max_concurrent: usize,
    pub timeout_sec: u64,
    pub max_file_size_bytes: u64,
    pub max_request_size_bytes: usize,
    pub allowed_mime_types: Vec<String>,
}

impl Default for IngestionSettings {
    fn default() -> Self {
        Self {
            max_concurrent: DEFAULT_MAX_CONCURRENT_INGESTIONS,
            timeout_sec: DEFAULT_INGESTION_TIMEOUT_SEC,
            max_file_size_bytes: DEFAULT_MAX_FILE_SIZE_BYTES,
            max_request_size_bytes: DEFAULT_MAX_REQUEST_SIZE_BYTES,
            allowed_mime_types: DEFAULT_ALLOWED_MIME_TYPES
                .iter()
                .map(|m| m.to_string())
                .collect(),
        }
    }
}

impl IngestionSettings {
    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            max_concurrent: self.max_concurrent,
            timeout: Duration::from_secs(self.timeout_sec),
            max_file_size: Some(self.max_file_size_bytes),
        }
    }
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        // TOML overrides CLI for each field
        let db_dir = file
            .db_dir
            .map(PathBuf::from)
            .or_else(|| cli.db_dir.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("db_dir must be specified via --db-dir or in config file")
            })?;

        if !db_dir.exists() {
            bail!("Database directory does not exist: {:?}", db_dir);
        }
        if !db_dir.is_dir() {
            bail!("db_dir is not a directory: {:?}", db_dir);
        }

        let storage_path = file
            .storage_path
            .map(PathBuf::from)
            .or_else(|| cli.storage_path.clone())
            .unwrap_or_else(|| db_dir.join("photos"));

        // Staging defaults to inside the storage root so placement is a rename
        let staging_dir = file
            .staging_dir
            .map(PathBuf::from)
            .or_else(|| cli.staging_dir.clone())
            .unwrap_or_else(|| storage_path.join(".staging"));

        let port = file.port.unwrap_or(cli.port);
        let metrics_port = file.metrics_port.unwrap_or(cli.metrics_port);

        let logging_level = file
            .logging_level
            .and_then(|s| parse_logging_level(&s))
            .unwrap_or_else(|| cli.logging_level.clone());

        let ingestion_file = file.ingestion.unwrap_or_default();
        let defaults = IngestionSettings::default();
        let ingestion = IngestionSettings {
            max_concurrent: ingestion_file
                .max_concurrent
                .or(cli.max_concurrent_ingestions)
                .unwrap_or(defaults.max_concurrent),
            timeout_sec: ingestion_file
                .timeout_sec
                .or(cli.ingestion_timeout_sec)
                .unwrap_or(defaults.timeout_sec),
            max_file_size_bytes: ingestion_file
                .max_file_size_bytes
                .unwrap_or(defaults.max_file_size_bytes),
            max_request_size_bytes: ingestion_file
                .max_request_size_bytes
                .unwrap_or(defaults.max_request_size_bytes),
            allowed_mime_types: ingestion_file
                .allowed_mime_types
                .unwrap_or(defaults.allowed_mime_types),
        };

        if ingestion.max_concurrent == 0 {
            bail!("ingestion max_concurrent must be at least 1");
        }
        if ingestion.timeout_sec == 0 {
            bail!("ingestion timeout_sec must be at least 1");
        }
        if ingestion.allowed_mime_types.is_empty() {
            bail!("ingestion allowed_mime_types must not be empty");
        }

        Ok(Self {
            db_dir,
            storage_path,
            staging_dir,
            port,
            metrics_port,
            logging_level,
            ingestion,
        })
    }

    pub fn catalog_db_path(&self) -> PathBuf {
        self.db_dir.join("photo_catalog.db")
    }
}

/// Parses a logging level string into RequestsLoggingLevel.
/// Uses clap's ValueEnum trait for parsing.
fn parse_logging_level(s: &str) -> Option<RequestsLoggingLevel> {
    RequestsLoggingLevel::from_str(s, true).ok()
}
