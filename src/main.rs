//! P2P Exchange server
//!
//! ```text
//! ┌──────────┐    ┌──────────┐    ┌──────────────┐    ┌──────────┐
//! │ Gateway  │───▶│  Order   │───▶│ Wallet/Escrow│───▶│  Stores  │
//! │ (axum)   │    │ Services │    │   Ledger     │    │ (PG/mem) │
//! └──────────┘    └──────────┘    └──────────────┘    └──────────┘
//!                       │
//!                       ▼
//!              Identity / Banking (HTTP)
//! ```
//!
//! Usage: `p2p_exchange [--env dev] [--port 8080]`

use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;

use p2p_exchange::clients::http::{HttpBankingClient, HttpIdentityClient};
use p2p_exchange::clients::{BankingClient, IdentityClient};
use p2p_exchange::config::AppConfig;
use p2p_exchange::db::Database;
use p2p_exchange::escrow::EscrowManager;
use p2p_exchange::gateway::{self, state::AppState};
use p2p_exchange::logging::init_logging;
use p2p_exchange::order::{OrderQueryService, OrderService};
use p2p_exchange::settlement::{
    SettlementCoordinator, SettlementService, SettlementWorker, WorkerConfig,
};
use p2p_exchange::store::Stores;
use p2p_exchange::wallet::WalletLedger;
use p2p_exchange::wallet::address::MockAddressGenerator;
use p2p_exchange::wallet::provisioning::WalletProvisioner;

const DB_MAX_CONNECTIONS: u32 = 10;

fn get_arg(name: &str) -> Option<String> {
    let args: Vec<String> = std::env::args().collect();
    args.iter()
        .position(|a| a == name)
        .and_then(|i| args.get(i + 1).cloned())
}

fn get_env() -> String {
    get_arg("--env")
        .or_else(|| get_arg("-e"))
        .unwrap_or_else(|| "dev".to_string())
}

/// `--port` overrides `gateway.port`
fn get_port_override() -> Option<u16> {
    get_arg("--port").and_then(|p| p.parse().ok())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = get_env();
    let config = AppConfig::load(&env).context("loading configuration")?;
    let _log_guard = init_logging(&config);

    tracing::info!(
        env = %env,
        git_hash = env!("BUILD_GIT_HASH"),
        "Starting P2P exchange"
    );

    // ==========================================================================
    // Storage
    // ==========================================================================
    let (stores, db) = match &config.postgres_url {
        Some(url) => {
            let db = Database::connect(url, DB_MAX_CONNECTIONS)
                .await
                .context("connecting to PostgreSQL")?;
            db.migrate().await.context("running migrations")?;
            tracing::info!("Using PostgreSQL stores");
            (Stores::postgres(db.pool().clone()), Some(Arc::new(db)))
        }
        None => {
            tracing::warn!("No postgres_url configured, using in-memory stores");
            (Stores::in_memory(), None)
        }
    };

    // ==========================================================================
    // Collaborators
    // ==========================================================================
    let timeout = config.services.request_timeout();
    let identity: Arc<dyn IdentityClient> = Arc::new(
        HttpIdentityClient::new(&config.services.identity_url, timeout)
            .context("building identity client")?,
    );
    let banking: Arc<dyn BankingClient> = Arc::new(
        HttpBankingClient::new(&config.services.banking_url, timeout)
            .context("building banking client")?,
    );

    // ==========================================================================
    // Services
    // ==========================================================================
    let ledger = Arc::new(WalletLedger::new(stores.wallets.clone()));
    let escrow = Arc::new(EscrowManager::new(
        stores.escrows.clone(),
        stores.orders.clone(),
        stores.bookings.clone(),
        ledger.clone(),
    ));
    let orders = Arc::new(OrderService::new(
        &stores,
        ledger.clone(),
        escrow,
        identity.clone(),
        banking.clone(),
    ));
    let queries = Arc::new(OrderQueryService::new(stores.orders.clone(), banking.clone()));
    let provisioner = Arc::new(WalletProvisioner::new(
        stores.wallets.clone(),
        Arc::new(MockAddressGenerator),
        config.wallets.supported_assets.clone(),
    ));

    let coordinator = Arc::new(SettlementCoordinator::new(
        stores.settlements.clone(),
        stores.history.clone(),
        ledger.clone(),
        banking.clone(),
    ));
    let settlement = Arc::new(SettlementService::new(
        stores.settlements.clone(),
        ledger.clone(),
        banking,
        coordinator.clone(),
        config.settlement.platform_fee_rate,
    ));

    let worker = SettlementWorker::new(
        coordinator,
        WorkerConfig {
            scan_interval: Duration::from_millis(config.settlement.scan_interval_ms),
            stale_threshold: Duration::from_millis(config.settlement.stale_after_ms),
            batch_size: config.settlement.batch_size,
        },
    );
    tokio::spawn(async move {
        worker.run().await;
    });

    // ==========================================================================
    // Gateway
    // ==========================================================================
    let state = Arc::new(AppState {
        orders,
        queries,
        ledger,
        provisioner,
        settlement,
        history: stores.history.clone(),
        identity,
        jwt_secret: config.auth.jwt_secret.clone(),
        db,
    });

    let port = get_port_override().unwrap_or(config.gateway.port);
    gateway::run_server(state, &config.gateway.host, port).await
}
