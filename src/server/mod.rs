pub mod config;
mod http_layers;
pub mod metrics;
mod photo_routes;
pub mod server;
pub mod state;

pub use config::ServerConfig;
pub use http_layers::*;
pub use photo_routes::{PhotoDetails, UploadFailure, UploadResponse, UploadedPhoto};
pub use server::{make_app, run_server};
