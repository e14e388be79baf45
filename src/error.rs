//! Error types for the Simple NAS server

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::deletion::DeleteError;
use crate::guard::GuardError;
use crate::multipart::DecodeError;
use crate::writer::WriteError;

/// Application-wide result type
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(String),

    #[error("File is protected")]
    Protected(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Delete request denied by admin")]
    Denied { token: String },

    #[error("Delete request timed out waiting for admin")]
    TimedOut { token: String },

    #[error("Server interrupted")]
    Interrupted { token: Option<String> },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A file operation failed. Only `message` reaches the client.
    #[error("{message}")]
    FileIo {
        message: String,
        source: std::io::Error,
    },

    #[error("{0}")]
    Internal(String),
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Protected(_) | Self::Denied { .. } | Self::TimedOut { .. } => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Interrupted { .. } | Self::Io(_) | Self::FileIo { .. } | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "malformed",
            Self::Protected(_) => "protected",
            Self::NotFound(_) => "not_found",
            Self::Denied { .. } => "denied",
            Self::TimedOut { .. } => "timeout",
            Self::Interrupted { .. } | Self::Io(_) | Self::FileIo { .. } | Self::Internal(_) => {
                "server_error"
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let kind = self.kind();

        let message = match &self {
            AppError::Io(e) => {
                tracing::error!("IO error: {}", e);
                "IO error".to_string()
            }
            AppError::FileIo { message, source } => {
                tracing::error!("{}: {}", message, source);
                message.clone()
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                "An internal error occurred".to_string()
            }
            other => other.to_string(),
        };

        let token = match self {
            AppError::Denied { token } | AppError::TimedOut { token } => Some(token),
            AppError::Interrupted { token } => token,
            _ => None,
        };

        let body = Json(ErrorResponse {
            error: message,
            kind,
            token,
        });

        (status, body).into_response()
    }
}

impl From<GuardError> for AppError {
    fn from(e: GuardError) -> Self {
        match e {
            GuardError::Invalid(_) => AppError::BadRequest(e.to_string()),
            GuardError::Protected(name) => AppError::Protected(name),
        }
    }
}

impl From<DecodeError> for AppError {
    fn from(e: DecodeError) -> Self {
        AppError::BadRequest(e.to_string())
    }
}

impl From<WriteError> for AppError {
    fn from(e: WriteError) -> Self {
        match e {
            WriteError::Guard(e) => e.into(),
            WriteError::Io { name, source } => AppError::FileIo {
                message: format!("Can't write file {name}"),
                source,
            },
        }
    }
}

impl From<DeleteError> for AppError {
    fn from(e: DeleteError) -> Self {
        match e {
            DeleteError::Guard(e) => e.into(),
            DeleteError::NotFound(_) => AppError::NotFound("File not found".to_string()),
            DeleteError::Denied { token } => AppError::Denied { token },
            DeleteError::TimedOut { token } => AppError::TimedOut { token },
            DeleteError::Interrupted { token } => AppError::Interrupted { token: Some(token) },
            DeleteError::UnknownToken => AppError::NotFound(e.to_string()),
            DeleteError::FileMismatch => AppError::BadRequest(e.to_string()),
            DeleteError::Io { name, source } => AppError::FileIo {
                message: format!("Error deleting {name}"),
                source,
            },
        }
    }
}
