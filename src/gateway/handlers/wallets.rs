//! Wallet, balance and sell-with-address handlers

use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use tracing::info;

use super::super::auth::AuthUser;
use super::super::state::AppState;
use super::super::types::{
    ApiResponse, ApiResult, CreateAccountRequest, WalletKeyQuery, WalletKeyResponse, created, ok,
};
use crate::error::ExchangeError;
use crate::models::Wallet;
use crate::settlement::{SellWithAddressRequest, SettlementReceipt, SettlementTask};

/// POST /api/v1/coin/account/create
///
/// Public: called once by the identity service after a user is verified.
pub async fn create_account(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateAccountRequest>,
) -> ApiResult<Vec<Wallet>> {
    let wallets = state.provisioner.provision(req.user_id).await?;
    info!(user_id = req.user_id, count = wallets.len(), "Account wallets created");
    created("Wallets created successfully", wallets)
}

/// GET /api/v1/users/{userId}/balances
pub async fn balances(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(user_id): Path<i64>,
) -> ApiResult<Vec<Wallet>> {
    if user_id != user.user_id {
        return Err(ExchangeError::Forbidden(format!(
            "balances of user {} are not visible to user {}",
            user_id, user.user_id
        )));
    }
    let wallets = state.ledger.balances(user_id).await?;
    ok("Balances fetched successfully", wallets)
}

/// GET /api/v1/coin/user/wallet/key?asset=BTC
pub async fn wallet_key(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Query(query): Query<WalletKeyQuery>,
) -> ApiResult<WalletKeyResponse> {
    let asset = query
        .asset
        .map(|a| a.trim().to_ascii_uppercase())
        .filter(|a| !a.is_empty())
        .ok_or_else(|| {
            ExchangeError::Validation("asset query parameter is required, e.g. BTC".to_string())
        })?;
    let wallet = state.ledger.find(user.user_id, &asset).await?;
    ok(
        "Wallet address fetched successfully",
        WalletKeyResponse {
            asset: wallet.asset,
            address_key: wallet.address,
        },
    )
}

/// POST /api/v1/coin/wallet/sell/address
///
/// Answers 202 once the task is recorded; settlement continues in the background.
pub async fn sell_with_address(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<SellWithAddressRequest>,
) -> ApiResult<SettlementReceipt> {
    let receipt = state
        .settlement
        .sell_with_address(user.user_id, &user.token, req)
        .await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(ApiResponse::success("Sale accepted", receipt)),
    ))
}

/// GET /api/v1/coin/wallet/sell/{taskId}
pub async fn settlement_status(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(task_id): Path<String>,
) -> ApiResult<SettlementTask> {
    let task = state.settlement.get_task(&task_id, user.user_id).await?;
    ok("Settlement fetched successfully", task)
}
