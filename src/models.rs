//! Domain records
//!
//! Persisted entities and the enums they carry. `New*` structs are the insert
//! shapes; ids and timestamps are assigned by the store.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::escrow::state::EscrowStatus;
use crate::order::state::OrderStatus;

// ============================================================================
// Enums
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }

    /// Side a counter-order must have to match
    pub fn opposite(&self) -> OrderSide {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderSide {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "BUY" => Ok(OrderSide::Buy),
            "SELL" => Ok(OrderSide::Sell),
            other => Err(format!("unknown order type: {}", other)),
        }
    }
}

/// Off-platform fiat payment channel agreed between buyer and seller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PaymentMethod {
    #[serde(rename = "BANK-TRANSFER")]
    BankTransfer,
    #[serde(rename = "CREDIT-OR-DEBIT")]
    CreditOrDebit,
    #[serde(rename = "CRYPTO-CURRENCY")]
    CryptoCurrency,
    #[serde(rename = "E-WALLET")]
    EWallet,
    #[serde(rename = "MOBILE-MONEY")]
    MobileMoney,
    #[serde(rename = "CASH-DEPOSIT")]
    CashDeposit,
    #[serde(rename = "GIFT-CARD")]
    GiftCard,
    #[serde(rename = "WIRE-TRANSFER")]
    WireTransfer,
    #[serde(rename = "QR-CODE")]
    QrCode,
    #[serde(rename = "PREPAID-VOUCHERS")]
    PrepaidVouchers,
    #[serde(rename = "FIAT-P2P")]
    FiatP2P,
}

impl PaymentMethod {
    pub const ALL: [PaymentMethod; 11] = [
        PaymentMethod::BankTransfer,
        PaymentMethod::CreditOrDebit,
        PaymentMethod::CryptoCurrency,
        PaymentMethod::EWallet,
        PaymentMethod::MobileMoney,
        PaymentMethod::CashDeposit,
        PaymentMethod::GiftCard,
        PaymentMethod::WireTransfer,
        PaymentMethod::QrCode,
        PaymentMethod::PrepaidVouchers,
        PaymentMethod::FiatP2P,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::BankTransfer => "BANK-TRANSFER",
            PaymentMethod::CreditOrDebit => "CREDIT-OR-DEBIT",
            PaymentMethod::CryptoCurrency => "CRYPTO-CURRENCY",
            PaymentMethod::EWallet => "E-WALLET",
            PaymentMethod::MobileMoney => "MOBILE-MONEY",
            PaymentMethod::CashDeposit => "CASH-DEPOSIT",
            PaymentMethod::GiftCard => "GIFT-CARD",
            PaymentMethod::WireTransfer => "WIRE-TRANSFER",
            PaymentMethod::QrCode => "QR-CODE",
            PaymentMethod::PrepaidVouchers => "PREPAID-VOUCHERS",
            PaymentMethod::FiatP2P => "FIAT-P2P",
        }
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_uppercase().replace('_', "-");
        PaymentMethod::ALL
            .into_iter()
            .find(|m| m.as_str() == wanted)
            .ok_or_else(|| format!("unknown payment method: {}", s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransactionType {
    Buy,
    Sell,
    Send,
    Receive,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Buy => "BUY",
            TransactionType::Sell => "SELL",
            TransactionType::Send => "SEND",
            TransactionType::Receive => "RECEIVE",
        }
    }
}

impl FromStr for TransactionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "BUY" => Ok(TransactionType::Buy),
            "SELL" => Ok(TransactionType::Sell),
            "SEND" => Ok(TransactionType::Send),
            "RECEIVE" => Ok(TransactionType::Receive),
            other => Err(format!("unknown transaction type: {}", other)),
        }
    }
}

// ============================================================================
// Orders
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: i64,
    pub user_id: i64,
    /// Single asset code, e.g. "BTC"
    pub trading_pair: String,
    #[serde(rename = "type")]
    pub side: OrderSide,
    pub is_maker: bool,
    pub price: Decimal,
    pub amount: Decimal,
    pub filled_amount: Decimal,
    pub currency: String,
    pub status: OrderStatus,
    /// Verified seller bank account; never set on BUY orders
    pub bank_id: Option<i64>,
    pub expiration_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewOrder {
    pub user_id: i64,
    pub trading_pair: String,
    pub side: OrderSide,
    pub price: Decimal,
    pub amount: Decimal,
    pub currency: String,
    pub bank_id: Option<i64>,
    pub expiration_time: Option<DateTime<Utc>>,
}

// ============================================================================
// Escrow / payment instructions / bookings
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Escrow {
    pub id: i64,
    pub order_id: i64,
    pub amount: Decimal,
    pub status: EscrowStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentSettings {
    pub id: i64,
    pub order_id: i64,
    pub seller_id: i64,
    pub remark: String,
    pub signature: String,
    pub payment_method: PaymentMethod,
}

#[derive(Debug, Clone)]
pub struct NewPaymentSettings {
    pub order_id: i64,
    pub seller_id: i64,
    pub remark: String,
    pub signature: String,
    pub payment_method: PaymentMethod,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
    pub id: i64,
    pub order_id: i64,
    pub buyer_id: i64,
    pub seller_id: i64,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// History
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct History {
    pub id: i64,
    #[serde(rename = "type")]
    pub kind: TransactionType,
    pub quantity: Decimal,
    pub price: Decimal,
    pub fee: Decimal,
    pub asset_id: String,
    pub user_id: i64,
    pub payment_method: PaymentMethod,
    /// Idempotency key for writes that may be replayed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewHistory {
    pub kind: TransactionType,
    pub quantity: Decimal,
    pub price: Decimal,
    pub fee: Decimal,
    pub asset_id: String,
    pub user_id: i64,
    pub payment_method: PaymentMethod,
    pub reference: Option<String>,
}

// ============================================================================
// Wallets
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Wallet {
    pub id: i64,
    pub user_id: i64,
    pub asset: String,
    pub balance: Decimal,
    /// Cumulative sold volume
    pub fill_amount: Decimal,
    pub address: String,
    /// Bumped on every balance write
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewWallet {
    pub user_id: i64,
    pub asset: String,
    pub address: String,
}
