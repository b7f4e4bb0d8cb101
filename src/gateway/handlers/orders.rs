//! Order handlers
//!
//! Thin adapters: extract the authenticated user, call the order services,
//! wrap the result in `ApiResponse`.

use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
};
use tracing::info;

use super::super::auth::AuthUser;
use super::super::state::AppState;
use super::super::types::{ApiResult, P2PActionRequest, created, ok};
use crate::error::ExchangeError;
use crate::models::{Booking, Order, OrderSide};
use crate::order::{CreateOrderRequest, OrderView, UpdateOrderRequest};

/// POST /api/v1/order/create
pub async fn create_order(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<CreateOrderRequest>,
) -> ApiResult<Order> {
    info!(user_id = user.user_id, side = %req.side, pair = %req.trading_pair, "Create order");
    let order = state
        .orders
        .create_order(user.user_id, &user.token, req)
        .await?;
    created("Order created successfully", order)
}

/// GET /api/v1/order/all
pub async fn fetch_all_orders(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<Vec<OrderView>> {
    let orders = state.queries.fetch_all_orders(&user.token).await?;
    ok("Orders fetched successfully", orders)
}

/// GET /api/v1/order/{id}
pub async fn fetch_order(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(order_id): Path<i64>,
) -> ApiResult<OrderView> {
    let order = state
        .queries
        .fetch_order_by_order_id(order_id, &user.token)
        .await?;
    ok("Order fetched successfully", order)
}

/// PUT /api/v1/order/update/{id}
pub async fn update_order(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(order_id): Path<i64>,
    Json(patch): Json<UpdateOrderRequest>,
) -> ApiResult<Order> {
    let order = state
        .orders
        .update_order(order_id, user.user_id, patch)
        .await?;
    ok("Order updated successfully", order)
}

/// DELETE /api/v1/order/cancel/{id}
pub async fn cancel_order(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(order_id): Path<i64>,
) -> Result<StatusCode, ExchangeError> {
    state.orders.cancel_order(order_id, user.user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /api/v1/order/delete/{id}
pub async fn delete_order(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(order_id): Path<i64>,
) -> Result<StatusCode, ExchangeError> {
    state.orders.delete_order(order_id, user.user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/v1/orders/details/{orderType}
pub async fn orders_by_type(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(order_type): Path<String>,
) -> ApiResult<Vec<OrderView>> {
    let side: OrderSide = order_type.parse().map_err(ExchangeError::Validation)?;
    let orders = state
        .queries
        .get_orders_by_order_type(side, &user.token)
        .await?;
    ok("Orders fetched successfully", orders)
}

/// GET /api/v1/orders/user/{userId}
pub async fn user_orders(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(user_id): Path<i64>,
) -> ApiResult<Vec<OrderView>> {
    let orders = state
        .queries
        .get_user_order_list(user_id, &user.token)
        .await?;
    ok("Orders fetched successfully", orders)
}

/// POST /api/v1/orders/buy/p2p/assets
pub async fn p2p_action(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<P2PActionRequest>,
) -> ApiResult<Booking> {
    let booking = state
        .orders
        .handle_p2p_order_action(req.order_id, user.user_id)
        .await?;
    ok("Order booked successfully", booking)
}

/// PUT /api/v1/orders/{orderId}/status
pub async fn complete_trade(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(order_id): Path<i64>,
) -> ApiResult<Order> {
    let order = state
        .orders
        .update_order_status_for_trade_completion(order_id, user.user_id)
        .await?;
    ok("Order status updated successfully", order)
}
