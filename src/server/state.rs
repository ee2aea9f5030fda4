use axum::extract::FromRef;

use crate::ingestion::IngestionPipeline;
use crate::photo_store::PhotoStore;
use crate::query::QueryEngine;
use std::sync::Arc;
use std::time::Instant;

use super::ServerConfig;

pub type GuardedPhotoStore = Arc<dyn PhotoStore>;
pub type GuardedIngestionPipeline = Arc<IngestionPipeline>;

#[derive(Clone)]
pub struct ServerState {
    pub config: ServerConfig,
    pub start_time: Instant,
    pub photo_store: GuardedPhotoStore,
    pub ingestion_pipeline: GuardedIngestionPipeline,
    pub query_engine: QueryEngine,
    pub hash: String,
}

impl ServerState {
    pub fn new(
        config: ServerConfig,
        photo_store: GuardedPhotoStore,
        ingestion_pipeline: GuardedIngestionPipeline,
    ) -> Self {
        ServerState {
            config,
            start_time: Instant::now(),
            query_engine: QueryEngine::new(photo_store.clone()),
            photo_store,
            ingestion_pipeline,
            hash: env!("GIT_HASH").to_string(),
        }
    }
}

impl FromRef<ServerState> for GuardedPhotoStore {
    fn from_ref(input: &ServerState) -> Self {
        input.photo_store.clone()
    }
}

impl FromRef<ServerState> for GuardedIngestionPipeline {
    fn from_ref(input: &ServerState) -> Self {
        input.ingestion_pipeline.clone()
    }
}

impl FromRef<ServerState> for QueryEngine {
    fn from_ref(input: &ServerState) -> Self {
        input.query_engine.clone()
    }
}

impl FromRef<ServerState> for ServerConfig {
    fn from_ref(input: &ServerState) -> Self {
        input.config.clone()
    }
}
