use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use photo_catalog_server::config::{
    AppConfig, CliConfig, FileConfig, DEFAULT_INGESTION_TIMEOUT_SEC,
    DEFAULT_MAX_CONCURRENT_INGESTIONS,
};
use photo_catalog_server::photo_store::{PhotoStore, SqlitePhotoStore};
use photo_catalog_server::server::{self, metrics, RequestsLoggingLevel, ServerConfig};
use photo_catalog_server::ingestion::{IngestionPipeline, StagingArea};

/// Read-only SQLite connections serving listing queries.
const READ_POOL_SIZE: usize = 4;

fn parse_path(s: &str) -> Result<PathBuf> {
    let path_buf = PathBuf::from(s);
    let original_path = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(msg) => {
            if msg.kind() == std::io::ErrorKind::NotFound {
                path_buf
            } else {
                return Err(msg).with_context(|| format!("Error resolving path: {}", s));
            }
        }
    };
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(original_path))
}

#[derive(Parser, Debug)]
struct CliArgs {
    /// Path to a TOML config file. Its values override command line values.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Directory holding the photo catalog database.
    #[clap(long, value_parser = parse_path)]
    pub db_dir: Option<PathBuf>,

    /// Root of the photo library. Defaults to <db-dir>/photos.
    #[clap(long, value_parser = parse_path)]
    pub storage_path: Option<PathBuf>,

    /// Directory for in-flight uploads. Defaults to <storage-path>/.staging.
    #[clap(long, value_parser = parse_path)]
    pub staging_dir: Option<PathBuf>,

    /// The port to listen on.
    #[clap(short, long, default_value_t = 8080)]
    pub port: u16,

    /// The port for the metrics server (Prometheus scraping).
    #[clap(long, default_value_t = 9091)]
    pub metrics_port: u16,

    /// The level of logging to perform on each request.
    #[clap(long, default_value = "path")]
    pub logging_level: RequestsLoggingLevel,

    /// Uploads processed at the same time; further uploads wait.
    #[clap(long, default_value_t = DEFAULT_MAX_CONCURRENT_INGESTIONS)]
    pub max_concurrent_ingestions: usize,

    /// Seconds allowed to stage and analyze a single upload.
    #[clap(long, default_value_t = DEFAULT_INGESTION_TIMEOUT_SEC)]
    pub ingestion_timeout_sec: u64,
}

impl CliArgs {
    fn to_cli_config(&self) -> CliConfig {
        CliConfig {
            db_dir: self.db_dir.clone(),
            storage_path: self.storage_path.clone(),
            staging_dir: self.staging_dir.clone(),
            port: self.port,
            metrics_port: self.metrics_port,
            logging_level: self.logging_level.clone(),
            max_concurrent_ingestions: Some(self.max_concurrent_ingestions),
            ingestion_timeout_sec: Some(self.ingestion_timeout_sec),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .context("Failed to initialize logging")?;

    let file_config = match &cli_args.config {
        Some(path) => {
            info!("Loading config from {:?}", path);
            Some(FileConfig::load(path)?)
        }
        None => None,
    };
    let config = AppConfig::resolve(&cli_args.to_cli_config(), file_config)?;

    std::fs::create_dir_all(&config.storage_path)
        .with_context(|| format!("Failed to create storage directory {:?}", config.storage_path))?;
    StagingArea::new(&config.staging_dir, None)
        .init()
        .await
        .with_context(|| format!("Failed to create staging directory {:?}", config.staging_dir))?;

    info!(
        "Opening SQLite photo catalog at {:?}...",
        config.catalog_db_path()
    );
    let photo_store: Arc<dyn PhotoStore> = Arc::new(SqlitePhotoStore::new(
        config.catalog_db_path(),
        READ_POOL_SIZE,
    )?);

    info!("Initializing metrics...");
    metrics::init_metrics();
    metrics::init_catalog_metrics(photo_store.count_photos()?);

    info!(
        "Photo library at {:?}, staging at {:?}, {} concurrent ingestions",
        config.storage_path, config.staging_dir, config.ingestion.max_concurrent
    );
    let pipeline = Arc::new(IngestionPipeline::new(
        photo_store.clone(),
        &config.staging_dir,
        &config.storage_path,
        config.ingestion.pipeline_settings(),
    ));

    let server_config = ServerConfig {
        requests_logging_level: config.logging_level.clone(),
        port: config.port,
        metrics_port: config.metrics_port,
        max_file_size_bytes: config.ingestion.max_file_size_bytes,
        max_request_size_bytes: config.ingestion.max_request_size_bytes,
        allowed_mime_types: config.ingestion.allowed_mime_types.clone(),
    };

    server::run_server(server_config, photo_store, pipeline).await
}
