//! Order read endpoints
//!
//! Rows are joined with their payment settings. SELL rows additionally carry
//! the seller's bank details, fetched with the caller's bearer token; a row
//! that cannot be resolved fails the whole batch.

use futures::future::try_join_all;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

use crate::clients::{BankDetails, BankingClient};
use crate::error::{ExchangeError, Result};
use crate::models::{Order, OrderSide, PaymentSettings};
use crate::store::{OrderFilter, OrderStore};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderView {
    #[serde(flatten)]
    pub order: Order,
    pub payment_settings: Option<PaymentSettings>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bank_details: Option<BankDetails>,
}

pub struct OrderQueryService {
    orders: Arc<dyn OrderStore>,
    banking: Arc<dyn BankingClient>,
}

impl OrderQueryService {
    pub fn new(orders: Arc<dyn OrderStore>, banking: Arc<dyn BankingClient>) -> Self {
        Self { orders, banking }
    }

    pub async fn fetch_order_by_order_id(&self, order_id: i64, token: &str) -> Result<OrderView> {
        self.fetch(OrderFilter::ById(order_id), token)
            .await?
            .pop()
            .ok_or_else(|| ExchangeError::not_found(format!("order {}", order_id)))
    }

    pub async fn fetch_all_orders(&self, token: &str) -> Result<Vec<OrderView>> {
        self.fetch(OrderFilter::All, token).await
    }

    pub async fn get_orders_by_order_type(&self, side: OrderSide, token: &str) -> Result<Vec<OrderView>> {
        self.fetch(OrderFilter::BySide(side), token).await
    }

    pub async fn get_user_order_list(&self, user_id: i64, token: &str) -> Result<Vec<OrderView>> {
        if user_id <= 0 {
            return Err(ExchangeError::not_found("user id"));
        }
        self.fetch(OrderFilter::ByUser(user_id), token).await
    }

    async fn fetch(&self, filter: OrderFilter, token: &str) -> Result<Vec<OrderView>> {
        let rows = self.orders.list_with_payment_settings(filter).await?;
        debug!(?filter, rows = rows.len(), "Order rows loaded");

        // Lookups run concurrently; output keeps row order
        try_join_all(rows.into_iter().map(|(order, payment_settings)| async move {
            let bank_details = match order.side {
                OrderSide::Buy => None,
                OrderSide::Sell => Some(self.bank_details_for(&order, token).await?),
            };
            Ok::<_, ExchangeError>(OrderView {
                order,
                payment_settings,
                bank_details,
            })
        }))
        .await
    }

    async fn bank_details_for(&self, order: &Order, token: &str) -> Result<BankDetails> {
        if order.user_id <= 0 {
            return Err(ExchangeError::NotFound(format!(
                "User ID is missing on order {}",
                order.id
            )));
        }
        let bank_id = order.bank_id.ok_or_else(|| {
            ExchangeError::NotFound(format!("Bank ID is missing on order {}", order.id))
        })?;
        Ok(self
            .banking
            .bank_details(order.user_id, bank_id, token)
            .await?)
    }
}
