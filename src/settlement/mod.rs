//! Sell-with-address settlement
//!
//! A direct sale of crypto to the owner of a wallet address, paid in fiat
//! through the banking service. Runs as a persisted task (outbox) with
//! idempotent steps and a recovery worker.

pub mod coordinator;
pub mod service;
pub mod state;
pub mod types;
pub mod worker;

pub use coordinator::SettlementCoordinator;
pub use service::SettlementService;
pub use state::SettlementState;
pub use types::{SellWithAddressRequest, SettlementReceipt, SettlementTask};
pub use worker::{SettlementWorker, WorkerConfig};
