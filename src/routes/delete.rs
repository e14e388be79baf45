//! Delete route
//!
//! `POST /delete` with `{"file": .., "action": "request"}` waits for the admin;
//! `{"file": .., "action": "confirm", "token": ..}` finalizes a pending request.

use std::net::SocketAddr;

use axum::{
    body::Bytes,
    extract::{ConnectInfo, State},
    Json,
};
use serde::{Deserialize, Serialize};

use super::client_ip;
use crate::error::{AppError, Result};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct DeleteRequest {
    #[serde(default)]
    pub file: String,
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

/// POST /delete
pub async fn delete_file(
    State(state): State<AppState>,
    connect: Option<ConnectInfo<SocketAddr>>,
    body: Bytes,
) -> Result<Json<DeleteResponse>> {
    let request: DeleteRequest =
        serde_json::from_slice(&body).map_err(|_| AppError::BadRequest("Invalid JSON".to_string()))?;

    match request.action.as_str() {
        "request" => {
            let requester = client_ip(connect);
            let outcome = state.deletes().request(&request.file, &requester).await?;

            Ok(Json(DeleteResponse {
                status: "File deleted",
                token: Some(outcome.token),
            }))
        }
        "confirm" => {
            let token = request
                .token
                .filter(|t| !t.is_empty())
                .ok_or_else(|| AppError::BadRequest("Missing token".to_string()))?;
            state.deletes().confirm(&request.file, &token).await?;

            Ok(Json(DeleteResponse {
                status: "File deleted",
                token: None,
            }))
        }
        _ => Err(AppError::BadRequest("Invalid action".to_string())),
    }
}
