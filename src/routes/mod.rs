//! Route modules for Simple NAS

pub mod delete;
pub mod download;
pub mod files;
pub mod health;
pub mod upload;

use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, DefaultBodyLimit},
    routing::{get, post},
    Router,
};

use crate::state::AppState;

/// Build the application router
pub fn router(state: AppState) -> Router {
    let body_limit = state.config().storage.max_upload_bytes;

    Router::new()
        .route("/", get(files::list_files).post(upload::upload_files))
        .route("/download", get(download::download_file))
        .route("/delete", post(delete::delete_file))
        .route("/health", get(health::health_check))
        .fallback(get(files::serve_file))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

/// Peer address for logs and the approval prompt
fn client_ip(connect: Option<ConnectInfo<SocketAddr>>) -> String {
    connect
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}
