//! HTTP gateway
//!
//! axum router under `/api/v1`. Everything except the health check and
//! account creation sits behind [`auth::jwt_auth_middleware`].

pub mod auth;
pub mod handlers;
pub mod state;
pub mod types;

use axum::{
    Router,
    middleware::from_fn_with_state,
    routing::{delete, get, post, put},
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

use handlers::{orders, wallets};
use state::AppState;

/// Build the full application router
pub fn router(state: Arc<AppState>) -> Router {
    // ==========================================================================
    // Public Routes
    // ==========================================================================
    let public_routes = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/coin/account/create", post(wallets::create_account));

    // ==========================================================================
    // Private Routes (JWT required)
    // ==========================================================================
    let private_routes = Router::new()
        // Orders
        .route("/order/create", post(orders::create_order))
        .route("/order/all", get(orders::fetch_all_orders))
        .route("/order/{id}", get(orders::fetch_order))
        .route("/order/update/{id}", put(orders::update_order))
        .route("/order/cancel/{id}", delete(orders::cancel_order))
        .route("/order/delete/{id}", delete(orders::delete_order))
        .route("/orders/details/{order_type}", get(orders::orders_by_type))
        .route("/orders/user/{user_id}", get(orders::user_orders))
        .route("/orders/buy/p2p/assets", post(orders::p2p_action))
        .route("/orders/{order_id}/status", put(orders::complete_trade))
        // Wallets
        .route("/users/{user_id}/balances", get(wallets::balances))
        .route("/coin/user/wallet/key", get(wallets::wallet_key))
        .route("/coin/wallet/sell/address", post(wallets::sell_with_address))
        .route("/coin/wallet/sell/{task_id}", get(wallets::settlement_status))
        // History
        .route("/history", get(handlers::list_history))
        .layer(from_fn_with_state(state.clone(), auth::jwt_auth_middleware));

    Router::new()
        .nest("/api/v1", public_routes.merge(private_routes))
        .with_state(state)
}

pub async fn run_server(state: Arc<AppState>, host: &str, port: u16) -> anyhow::Result<()> {
    let app = router(state);

    let addr = format!("{}:{}", host, port);
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| anyhow::anyhow!("failed to bind {}: {} (is the port in use?)", addr, e))?;

    info!(%addr, "Gateway listening");
    axum::serve(listener, app).await?;
    Ok(())
}
