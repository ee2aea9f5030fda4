use super::RequestsLoggingLevel;
use crate::config::{
    DEFAULT_ALLOWED_MIME_TYPES, DEFAULT_MAX_FILE_SIZE_BYTES, DEFAULT_MAX_REQUEST_SIZE_BYTES,
};

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub requests_logging_level: RequestsLoggingLevel,
    pub port: u16,
    pub metrics_port: u16,
    /// Per-file limit checked before a file reaches the ingestion pipeline.
    pub max_file_size_bytes: u64,
    /// Limit on a whole multipart upload request.
    pub max_request_size_bytes: usize,
    pub allowed_mime_types: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            requests_logging_level: RequestsLoggingLevel::Path,
            port: 8080,
            metrics_port: 9091,
            max_file_size_bytes: DEFAULT_MAX_FILE_SIZE_BYTES,
            max_request_size_bytes: DEFAULT_MAX_REQUEST_SIZE_BYTES,
            allowed_mime_types: DEFAULT_ALLOWED_MIME_TYPES
                .iter()
                .map(|m| m.to_string())
                .collect(),
        }
    }
}

impl ServerConfig {
    pub fn is_allowed_mime_type(&self, mime_type: &str) -> bool {
        self.allowed_mime_types
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(mime_type))
    }
}
