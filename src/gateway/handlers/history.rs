use std::sync::Arc;

use axum::{Extension, extract::State};

use super::super::auth::AuthUser;
use super::super::state::AppState;
use super::super::types::{ApiResult, ok};
use crate::models::History;

/// GET /api/v1/history - the caller's settled transactions, newest first
pub async fn list_history(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<Vec<History>> {
    let mut rows = state.history.list_by_user(user.user_id).await?;
    rows.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
    ok("History fetched successfully", rows)
}
