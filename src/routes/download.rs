//! Download route

use axum::{
    extract::{Query, State},
    response::Response,
};
use serde::Deserialize;

use super::files::{file_response, Disposition};
use crate::error::{AppError, Result};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct DownloadQuery {
    pub file: Option<String>,
}

/// GET /download?file=<name>
///
/// Protected and unresolvable names are reported as missing so clients
/// cannot discover them.
pub async fn download_file(
    State(state): State<AppState>,
    Query(query): Query<DownloadQuery>,
) -> Result<Response> {
    let raw = query
        .file
        .filter(|f| !f.is_empty())
        .ok_or_else(|| AppError::BadRequest("Missing 'file' parameter".to_string()))?;

    let target = state.guard().resolve(&raw).map_err(|e| {
        tracing::debug!(file = %raw, error = %e, "Download refused");
        AppError::NotFound("File not found".to_string())
    })?;

    file_response(&target, Disposition::Attachment).await
}
