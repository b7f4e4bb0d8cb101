//! Request DTOs that have no service-level counterpart

use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAccountRequest {
    pub user_id: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct P2PActionRequest {
    pub order_id: i64,
}

/// `?asset=BTC`
#[derive(Debug, Deserialize)]
pub struct WalletKeyQuery {
    pub asset: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletKeyResponse {
    pub asset: String,
    pub address_key: String,
}
