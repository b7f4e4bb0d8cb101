//! External collaborators
//!
//! The identity service owns user profiles; the banking service owns bank
//! accounts and fiat balances. Both are reached over HTTP in production and
//! replaced by `mock` implementations in tests and standalone mode.

pub mod http;
pub mod mock;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum ClientError {
    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Non-success status that is not a 404
    #[error("Rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("Failed to decode response: {0}")]
    Decode(String),
}

impl ClientError {
    /// Upstream explicitly refused the request; repeating it will not help
    pub fn is_definitive(&self) -> bool {
        match self {
            ClientError::Rejected { status, .. } => (400..500).contains(status),
            ClientError::NotFound(_) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct UserRecord {
    pub id: i64,
    pub first_name: String,
    pub last_name: String,
    pub locked: bool,
    pub is_blocked: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: i64,
    #[serde(default)]
    pub email: String,
    pub username: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub records: Vec<UserRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BankDetails {
    pub id: i64,
    pub bank_code: String,
    pub bank_name: String,
    pub account_holder_name: String,
    pub account_number: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FiatBalance {
    #[serde(default)]
    pub id: i64,
    pub balance: Decimal,
    pub currency: String,
}

/// Body of `POST /wallet/credit/account`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditAccountRequest {
    /// Seller receiving fiat
    pub recipient_user_id: i64,
    /// Buyer whose fiat pays for the sale
    pub creditor_user_id: i64,
    pub currency_type: String,
    pub amount: Decimal,
    /// Platform fee retained
    pub profit: Decimal,
}

#[async_trait]
pub trait IdentityClient: Send + Sync {
    async fn find_by_username(&self, username: &str, token: &str)
    -> Result<UserProfile, ClientError>;

    async fn find_by_user_id(&self, user_id: i64, token: &str) -> Result<UserProfile, ClientError>;
}

#[async_trait]
pub trait BankingClient: Send + Sync {
    async fn bank_details(
        &self,
        user_id: i64,
        bank_id: i64,
        token: &str,
    ) -> Result<BankDetails, ClientError>;

    async fn fiat_balance(
        &self,
        user_id: i64,
        currency: &str,
        token: &str,
    ) -> Result<FiatBalance, ClientError>;

    /// Credit the recipient's fiat wallet; `idempotency_key` makes retries safe
    async fn credit_account(
        &self,
        request: &CreditAccountRequest,
        token: &str,
        idempotency_key: &str,
    ) -> Result<(), ClientError>;
}
