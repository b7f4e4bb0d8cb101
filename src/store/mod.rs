//! Persistence boundary
//!
//! One async trait per store so the services can run against PostgreSQL in
//! production and against the in-memory stores in tests and standalone mode.
//! Status and balance writes that race are expressed as compare-and-swap
//! primitives returning whether the write took effect.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::escrow::state::EscrowStatus;
use crate::models::{
    Booking, Escrow, History, NewHistory, NewOrder, NewPaymentSettings, NewWallet, Order,
    OrderSide, PaymentSettings, Wallet,
};
use crate::order::state::OrderStatus;
use crate::settlement::state::SettlementState;
use crate::settlement::types::SettlementTask;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Corrupt row: {0}")]
    Corrupt(String),

    #[error("Duplicate key: {0}")]
    Duplicate(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Outcome of a versioned wallet write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasOutcome {
    Applied,
    /// The idempotency key was already consumed by an earlier write
    AlreadyApplied,
    /// Version moved since the wallet was read
    VersionMismatch,
}

/// Row selection for the order read endpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderFilter {
    ById(i64),
    All,
    BySide(OrderSide),
    ByUser(i64),
}

impl OrderFilter {
    pub fn matches(&self, order: &Order) -> bool {
        match self {
            OrderFilter::ById(id) => order.id == *id,
            OrderFilter::All => true,
            OrderFilter::BySide(side) => order.side == *side,
            OrderFilter::ByUser(user_id) => order.user_id == *user_id,
        }
    }
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn insert(&self, order: NewOrder) -> StoreResult<Order>;

    async fn get(&self, id: i64) -> StoreResult<Option<Order>>;

    /// Overwrite price and amount while the order is still OPEN.
    /// `None` when the order is gone or has left OPEN.
    async fn update_terms(
        &self,
        id: i64,
        price: Decimal,
        amount: Decimal,
    ) -> StoreResult<Option<Order>>;

    /// Flag a resting OPEN order as maker; false once it has left OPEN
    async fn mark_maker(&self, id: i64) -> StoreResult<bool>;

    /// Set `status = new` only if it is currently `expected`
    async fn transition_status(
        &self,
        id: i64,
        expected: OrderStatus,
        new: OrderStatus,
    ) -> StoreResult<bool>;

    /// OPEN orders of `side` on `trading_pair` at exactly `price`, oldest first
    async fn find_open_counter_orders(
        &self,
        trading_pair: &str,
        side: OrderSide,
        price: Decimal,
    ) -> StoreResult<Vec<Order>>;

    /// A PENDING order of `side` with identical pair, price and amount
    async fn find_pending_match(
        &self,
        trading_pair: &str,
        side: OrderSide,
        price: Decimal,
        amount: Decimal,
    ) -> StoreResult<Option<Order>>;

    /// Orders joined with their payment settings (if any), ordered by id
    async fn list_with_payment_settings(
        &self,
        filter: OrderFilter,
    ) -> StoreResult<Vec<(Order, Option<PaymentSettings>)>>;

    /// Remove escrow, bookings, payment settings and the order atomically
    async fn delete_cascade(&self, id: i64) -> StoreResult<()>;
}

#[async_trait]
pub trait EscrowStore: Send + Sync {
    async fn insert(&self, order_id: i64, amount: Decimal) -> StoreResult<Escrow>;

    async fn get(&self, id: i64) -> StoreResult<Option<Escrow>>;

    async fn find_by_order(&self, order_id: i64) -> StoreResult<Option<Escrow>>;

    /// Set `status = new` only if it is currently `expected`; returns the
    /// row as written, so callers act on the amount held at that moment
    async fn transition_status(
        &self,
        id: i64,
        expected: EscrowStatus,
        new: EscrowStatus,
    ) -> StoreResult<Option<Escrow>>;

    /// Set `amount = new` only while the escrow is OPEN and holds `expected`
    async fn resize(&self, id: i64, expected: Decimal, new: Decimal) -> StoreResult<bool>;
}

#[async_trait]
pub trait PaymentSettingsStore: Send + Sync {
    async fn insert(&self, settings: NewPaymentSettings) -> StoreResult<PaymentSettings>;

    async fn find(&self, order_id: i64, seller_id: i64) -> StoreResult<Option<PaymentSettings>>;

    async fn find_by_order(&self, order_id: i64) -> StoreResult<Option<PaymentSettings>>;
}

#[async_trait]
pub trait BookingStore: Send + Sync {
    async fn insert(&self, order_id: i64, buyer_id: i64, seller_id: i64) -> StoreResult<Booking>;

    /// Most recent booking for the order
    async fn find_by_order(&self, order_id: i64) -> StoreResult<Option<Booking>>;

    async fn list_by_order(&self, order_id: i64) -> StoreResult<Vec<Booking>>;

    async fn delete(&self, id: i64) -> StoreResult<()>;
}

#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Append a row; a repeated `reference` returns the existing row unchanged
    async fn append(&self, entry: NewHistory) -> StoreResult<History>;

    /// Newest first
    async fn list_by_user(&self, user_id: i64) -> StoreResult<Vec<History>>;
}

#[async_trait]
pub trait WalletStore: Send + Sync {
    async fn find(&self, user_id: i64, asset: &str) -> StoreResult<Option<Wallet>>;

    async fn find_by_address(&self, address: &str) -> StoreResult<Option<Wallet>>;

    async fn list_by_user(&self, user_id: i64) -> StoreResult<Vec<Wallet>>;

    /// Whether a write carrying `op_key` has already been recorded
    async fn op_applied(&self, op_key: &str) -> StoreResult<bool>;

    /// Insert all wallets or none
    async fn insert_batch(&self, wallets: Vec<NewWallet>) -> StoreResult<Vec<Wallet>>;

    /// Write balance and fill amount if the version is still `expected_version`,
    /// bumping it. When `op_key` is given it is recorded with the write and a
    /// second write with the same key reports `AlreadyApplied`.
    async fn compare_and_set(
        &self,
        wallet_id: i64,
        expected_version: i64,
        balance: Decimal,
        fill_amount: Decimal,
        op_key: Option<&str>,
    ) -> StoreResult<CasOutcome>;
}

#[async_trait]
pub trait SettlementStore: Send + Sync {
    async fn insert(&self, task: &SettlementTask) -> StoreResult<()>;

    async fn get(&self, task_id: &str) -> StoreResult<Option<SettlementTask>>;

    /// CAS state update; `error` is stored alongside when present
    async fn update_state_if(
        &self,
        task_id: &str,
        expected: SettlementState,
        new: SettlementState,
        error: Option<&str>,
    ) -> StoreResult<bool>;

    async fn increment_retry(&self, task_id: &str) -> StoreResult<()>;

    /// Non-terminal tasks untouched for at least `stale_after`, oldest first
    async fn find_stale(&self, stale_after: Duration, limit: usize)
    -> StoreResult<Vec<SettlementTask>>;
}

/// Handle to every store, injected into the services at construction
#[derive(Clone)]
pub struct Stores {
    pub orders: Arc<dyn OrderStore>,
    pub escrows: Arc<dyn EscrowStore>,
    pub payment_settings: Arc<dyn PaymentSettingsStore>,
    pub bookings: Arc<dyn BookingStore>,
    pub history: Arc<dyn HistoryStore>,
    pub wallets: Arc<dyn WalletStore>,
    pub settlements: Arc<dyn SettlementStore>,
}

impl Stores {
    /// All stores backed by one shared in-memory instance
    pub fn in_memory() -> Self {
        let mem = Arc::new(memory::MemoryStore::new());
        Self {
            orders: mem.clone(),
            escrows: mem.clone(),
            payment_settings: mem.clone(),
            bookings: mem.clone(),
            history: mem.clone(),
            wallets: mem.clone(),
            settlements: mem,
        }
    }

    pub fn postgres(pool: sqlx::PgPool) -> Self {
        let pg = Arc::new(postgres::PgStore::new(pool));
        Self {
            orders: pg.clone(),
            escrows: pg.clone(),
            payment_settings: pg.clone(),
            bookings: pg.clone(),
            history: pg.clone(),
            wallets: pg.clone(),
            settlements: pg,
        }
    }
}
