//! File listing and serving routes
//!
//! The thin presentation layer: a JSON listing of the served root and inline
//! serving of its files. Downloads share [`file_response`].

use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode, Uri},
    response::Response,
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::io::ReaderStream;

use crate::error::{AppError, Result};
use crate::guard::{is_temp_name, ResolvedPath};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct FileEntry {
    pub name: String,
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct FileListing {
    pub files: Vec<FileEntry>,
}

/// GET /
pub async fn list_files(State(state): State<AppState>) -> Result<Json<FileListing>> {
    let guard = state.guard();
    let mut dir = tokio::fs::read_dir(guard.root()).await?;
    let mut files = Vec::new();

    while let Some(entry) = dir.next_entry().await? {
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        if is_temp_name(&name) || guard.is_protected(&name) {
            continue;
        }

        let metadata = match entry.metadata().await {
            Ok(m) if m.is_file() => m,
            _ => continue,
        };

        files.push(FileEntry {
            name,
            size: metadata.len(),
            modified: metadata.modified().ok().map(DateTime::<Utc>::from),
        });
    }

    files.sort_by_cached_key(|f| f.name.to_lowercase());
    Ok(Json(FileListing { files }))
}

/// GET /<name>
pub async fn serve_file(State(state): State<AppState>, uri: Uri) -> Result<Response> {
    let raw = urlencoding::decode(uri.path().trim_start_matches('/'))
        .map_err(|_| AppError::BadRequest("Invalid path encoding".to_string()))?;

    let target = state
        .guard()
        .resolve(&raw)
        .map_err(|_| AppError::NotFound("File not found".to_string()))?;

    file_response(&target, Disposition::Inline).await
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Inline,
    Attachment,
}

/// Stream a regular file inside the root
pub async fn file_response(target: &ResolvedPath, disposition: Disposition) -> Result<Response> {
    let file = match tokio::fs::File::open(target.path()).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(AppError::NotFound("File not found".to_string()))
        }
        Err(e) => return Err(e.into()),
    };

    let metadata = file.metadata().await?;
    if !metadata.is_file() {
        return Err(AppError::NotFound("File not found".to_string()));
    }

    let content_type = mime_guess::from_path(target.name()).first_or_octet_stream();
    let body = Body::from_stream(ReaderStream::new(file));

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type.as_ref())
        .header(header::CONTENT_LENGTH, metadata.len())
        .header(
            header::CONTENT_DISPOSITION,
            content_disposition(disposition, target.name()),
        )
        .body(body)
        .map_err(|e| AppError::Internal(e.to_string()))
}

/// `attachment; filename="…"; filename*=UTF-8''…`
///
/// The quoted form is an ASCII fallback for old clients.
fn content_disposition(disposition: Disposition, name: &str) -> String {
    let kind = match disposition {
        Disposition::Inline => "inline",
        Disposition::Attachment => "attachment",
    };

    let fallback: String = name
        .chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c.is_ascii_graphic() || c == ' ' => c,
            _ => '_',
        })
        .collect();

    if fallback == name {
        format!("{kind}; filename=\"{name}\"")
    } else {
        format!(
            "{kind}; filename=\"{fallback}\"; filename*=UTF-8''{}",
            urlencoding::encode(name)
        )
    }
}
