//! Upload route
//!
//! `POST /` with a `multipart/form-data` body. Every file part is written
//! independently; one bad part never blocks its siblings.

use std::net::SocketAddr;

use axum::{
    body::Bytes,
    extract::{ConnectInfo, State},
    http::{header, HeaderMap},
    response::{IntoResponse, Redirect, Response},
    Json,
};
use serde::Serialize;

use super::client_ip;
use crate::error::{AppError, Result};
use crate::multipart::{self, DecodeError};
use crate::state::AppState;

/// Summary returned to clients that ask for JSON
#[derive(Debug, Serialize)]
pub struct UploadSummary {
    pub status: String,
    pub files: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failed: Vec<FailedUpload>,
}

#[derive(Debug, Serialize)]
pub struct FailedUpload {
    pub file: String,
    pub error: String,
}

/// POST /
pub async fn upload_files(
    State(state): State<AppState>,
    connect: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .ok_or(DecodeError::MissingContentType)?;
    let boundary = multipart::boundary_from_content_type(content_type)?;
    let parts = multipart::decode(&boundary, &body)?;

    let requester = client_ip(connect);
    let mut files = Vec::new();
    let mut failed = Vec::new();
    let mut first_error: Option<AppError> = None;

    for part in parts {
        match state.writer().write(&part.filename, part.content).await {
            Ok(bytes) => {
                tracing::info!(file = %part.filename, bytes = bytes, requester = %requester, "File uploaded");
                files.push(part.filename);
            }
            Err(e) => {
                tracing::warn!(file = %part.filename, requester = %requester, error = %e, "Upload part rejected");
                let e = AppError::from(e);
                failed.push(FailedUpload {
                    file: part.filename,
                    error: e.to_string(),
                });
                first_error.get_or_insert(e);
            }
        }
    }

    if files.is_empty() {
        return Err(first_error.unwrap_or_else(|| AppError::BadRequest("No files uploaded".to_string())));
    }

    let status = format!("Files uploaded: {}", files.join(", "));
    tracing::info!("{}", status);

    if wants_json(&headers) {
        Ok(Json(UploadSummary { status, files, failed }).into_response())
    } else {
        Ok(Redirect::to("/").into_response())
    }
}

fn wants_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .map(|accept| accept.contains("application/json"))
        .unwrap_or(false)
}
