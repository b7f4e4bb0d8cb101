use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::state::SettlementState;
use crate::models::PaymentMethod;

/// Direct sale of `amount` units of `asset` to the owner of `wallet_address`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SellWithAddressRequest {
    pub asset: String,
    pub amount: Decimal,
    pub price: Decimal,
    pub currency: String,
    pub payment_method: PaymentMethod,
    pub wallet_address: String,
}

/// Persisted outbox record driving one sale to completion
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementTask {
    /// ULID; doubles as the idempotency key prefix for every step
    pub task_id: String,
    pub seller_id: i64,
    pub buyer_id: i64,
    pub asset: String,
    pub amount: Decimal,
    pub price: Decimal,
    pub platform_fee: Decimal,
    pub currency: String,
    pub payment_method: PaymentMethod,
    pub buyer_address: String,
    /// Bearer token forwarded to the banking service; cleared once terminal
    #[serde(skip)]
    pub auth_token: Option<String>,
    pub state: SettlementState,
    pub error_message: Option<String>,
    pub retry_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SettlementTask {
    /// Fiat value of the sale
    pub fn trade_value(&self) -> Decimal {
        self.amount * self.price
    }

    /// Idempotency key for one step of this task
    pub fn op_key(&self, step: &str) -> String {
        format!("{}:{}", self.task_id, step)
    }
}

/// Returned to the caller before the detached steps run
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementReceipt {
    pub task_id: String,
    pub asset: String,
    pub amount: Decimal,
    pub price: Decimal,
    pub platform_fee: Decimal,
    pub status: SettlementState,
}

impl From<&SettlementTask> for SettlementReceipt {
    fn from(task: &SettlementTask) -> Self {
        Self {
            task_id: task.task_id.clone(),
            asset: task.asset.clone(),
            amount: task.amount,
            price: task.price,
            platform_fee: task.platform_fee,
            status: task.state,
        }
    }
}
