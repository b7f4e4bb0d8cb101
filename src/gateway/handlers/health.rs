//! Health check handler

use std::sync::Arc;

use axum::{Json, extract::State, http::StatusCode};
use chrono::Utc;
use serde::Serialize;

use super::super::state::AppState;
use super::super::types::ApiResponse;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub timestamp_ms: i64,
    pub version: &'static str,
    pub git_hash: &'static str,
    pub storage: &'static str,
}

/// GET /api/v1/health
///
/// 503 when the database is configured but does not answer. No internal
/// details are exposed.
pub async fn health_check(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<ApiResponse<HealthResponse>>) {
    let storage = match &state.db {
        Some(db) => match db.health_check().await {
            Ok(()) => "postgres",
            Err(e) => {
                tracing::error!("[HEALTH] PostgreSQL ping failed: {}", e);
                return (
                    StatusCode::SERVICE_UNAVAILABLE,
                    Json(ApiResponse {
                        message: "unavailable".to_string(),
                        data: None,
                    }),
                );
            }
        },
        None => "memory",
    };

    (
        StatusCode::OK,
        Json(ApiResponse::success(
            "ok",
            HealthResponse {
                timestamp_ms: Utc::now().timestamp_millis(),
                version: env!("CARGO_PKG_VERSION"),
                git_hash: env!("BUILD_GIT_HASH"),
                storage,
            },
        )),
    )
}
