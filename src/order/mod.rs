//! Order lifecycle
//!
//! - [`state`] - order status machine
//! - [`matching`] - exact-price counter-order matching
//! - [`service`] - create / cancel / delete / claim / complete
//! - [`query`] - read endpoints joined with payment settings and bank details

pub mod matching;
pub mod query;
pub mod service;
pub mod state;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::models::{OrderSide, PaymentMethod};

pub use matching::MatchingEngine;
pub use query::{OrderQueryService, OrderView};
pub use service::OrderService;

/// Order placement request
///
/// `filledAmount` and `status` are accepted for compatibility and ignored;
/// new orders always start OPEN with nothing filled.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    pub user_id: i64,
    pub trading_pair: String,
    #[serde(rename = "type")]
    pub side: OrderSide,
    pub price: Decimal,
    pub amount: Decimal,
    pub currency: String,
    #[serde(default)]
    pub payment_method: Option<PaymentMethod>,
    #[serde(default)]
    pub filled_amount: Option<Decimal>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub bank_id: Option<i64>,
    #[serde(default)]
    pub remark: Option<String>,
    #[serde(default)]
    pub signature: Option<String>,
    #[serde(default)]
    pub expiration_time: Option<DateTime<Utc>>,
}

/// Price / amount patch; absent fields are left unchanged
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateOrderRequest {
    #[serde(default)]
    pub price: Option<Decimal>,
    #[serde(default)]
    pub amount: Option<Decimal>,
}
