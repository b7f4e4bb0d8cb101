//! P2P Exchange - peer-to-peer crypto exchange backend
//!
//! Users hold per-asset wallet balances, place BUY/SELL orders, get matched
//! at exact price and settle through escrow plus payment confirmation.
//!
//! # Modules
//!
//! - [`models`] - persisted records and their enums
//! - [`store`] - storage traits with in-memory and PostgreSQL backends
//! - [`wallet`] - balance ledger, address generation, provisioning
//! - [`order`] - order lifecycle, matching and queries
//! - [`escrow`] - seller funds held against open SELL orders
//! - [`settlement`] - sell-with-address outbox, coordinator and recovery worker
//! - [`clients`] - identity and banking collaborators
//! - [`gateway`] - axum HTTP surface with JWT auth
//! - [`fee`] - trading and platform fee schedule

pub mod clients;
pub mod config;
pub mod db;
pub mod error;
pub mod escrow;
pub mod fee;
pub mod gateway;
pub mod logging;
pub mod models;
pub mod order;
pub mod settlement;
pub mod store;
pub mod wallet;

pub use error::{ExchangeError, Result};
pub use models::{Booking, Escrow, History, Order, OrderSide, PaymentMethod, Wallet};
pub use order::state::OrderStatus;
