use std::sync::Arc;

use crate::clients::IdentityClient;
use crate::db::Database;
use crate::order::{OrderQueryService, OrderService};
use crate::settlement::SettlementService;
use crate::store::HistoryStore;
use crate::wallet::{WalletLedger, provisioning::WalletProvisioner};

/// Shared gateway state
#[derive(Clone)]
pub struct AppState {
    pub orders: Arc<OrderService>,
    pub queries: Arc<OrderQueryService>,
    pub ledger: Arc<WalletLedger>,
    pub provisioner: Arc<WalletProvisioner>,
    pub settlement: Arc<SettlementService>,
    pub history: Arc<dyn HistoryStore>,
    /// Resolves username subjects to user ids
    pub identity: Arc<dyn IdentityClient>,
    /// Base64-encoded HS256 secret
    pub jwt_secret: String,
    /// Present when running on PostgreSQL
    pub db: Option<Arc<Database>>,
}
