//! Order lifecycle service
//!
//! Orchestrates placement, update, cancellation, deletion, P2P claims and
//! trade completion over the stores, the wallet ledger, the escrow manager
//! and the identity / banking collaborators.
//!
//! Placement of a SELL order debits the seller's wallet before anything is
//! written. If a later write fails, the rows created so far are removed and
//! the debit is credited back before the error is returned.

use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{error, info, warn};

use super::matching::MatchingEngine;
use super::state::OrderStatus;
use super::{CreateOrderRequest, UpdateOrderRequest};
use crate::clients::{BankingClient, IdentityClient};
use crate::error::{ExchangeError, Result};
use crate::escrow::EscrowManager;
use crate::fee;
use crate::models::{Booking, NewOrder, NewPaymentSettings, Order, OrderSide, PaymentMethod};
use crate::store::{BookingStore, OrderStore, PaymentSettingsStore, Stores};
use crate::wallet::WalletLedger;

/// Validated SELL-only fields
struct SellTerms {
    bank_id: i64,
    remark: String,
    signature: String,
    payment_method: PaymentMethod,
}

pub struct OrderService {
    orders: Arc<dyn OrderStore>,
    payment_settings: Arc<dyn PaymentSettingsStore>,
    bookings: Arc<dyn BookingStore>,
    ledger: Arc<WalletLedger>,
    escrow: Arc<EscrowManager>,
    matcher: MatchingEngine,
    identity: Arc<dyn IdentityClient>,
    banking: Arc<dyn BankingClient>,
}

impl OrderService {
    pub fn new(
        stores: &Stores,
        ledger: Arc<WalletLedger>,
        escrow: Arc<EscrowManager>,
        identity: Arc<dyn IdentityClient>,
        banking: Arc<dyn BankingClient>,
    ) -> Self {
        Self {
            orders: stores.orders.clone(),
            payment_settings: stores.payment_settings.clone(),
            bookings: stores.bookings.clone(),
            ledger,
            escrow,
            matcher: MatchingEngine::new(
                stores.orders.clone(),
                stores.payment_settings.clone(),
                stores.bookings.clone(),
                stores.history.clone(),
            ),
            identity,
            banking,
        }
    }

    // ========================================================================
    // Placement
    // ========================================================================

    /// Place an order for the authenticated user and run matching on it
    pub async fn create_order(
        &self,
        caller_id: i64,
        token: &str,
        req: CreateOrderRequest,
    ) -> Result<Order> {
        let sell_terms = validate_create(&req)?;
        if req.user_id != caller_id {
            return Err(ExchangeError::Unauthorized(format!(
                "user {} cannot place orders for user {}",
                caller_id, req.user_id
            )));
        }

        let profile = self.identity.find_by_user_id(caller_id, token).await?;
        if !profile.enabled {
            return Err(ExchangeError::Forbidden(format!(
                "user {} is disabled",
                caller_id
            )));
        }

        if let Some(terms) = &sell_terms {
            self.verify_bank(caller_id, terms.bank_id, token).await?;
        }

        let wallet = self.ledger.find(caller_id, &req.trading_pair).await?;
        if sell_terms.is_some() {
            if wallet.balance < req.amount {
                return Err(ExchangeError::InsufficientBalance(format!(
                    "{} balance {} is below order amount {}",
                    req.trading_pair, wallet.balance, req.amount
                )));
            }
            self.ledger
                .debit(caller_id, &req.trading_pair, req.amount, None)
                .await?;
        }

        let new_order = NewOrder {
            user_id: caller_id,
            trading_pair: req.trading_pair.clone(),
            side: req.side,
            price: req.price,
            amount: req.amount,
            currency: req.currency.clone(),
            bank_id: sell_terms.as_ref().map(|t| t.bank_id),
            expiration_time: req.expiration_time,
        };

        let order = match self.orders.insert(new_order).await {
            Ok(order) => order,
            Err(e) => {
                let e = ExchangeError::from(e);
                if sell_terms.is_some() {
                    self.refund_debit(caller_id, &req.trading_pair, req.amount).await;
                }
                return Err(e);
            }
        };

        if let Some(terms) = &sell_terms {
            if let Err(e) = self.open_sell_side(&order, terms).await {
                self.undo_sell_placement(&order).await;
                return Err(e);
            }
        }

        info!(
            order_id = order.id,
            user_id = order.user_id,
            side = %order.side,
            trading_pair = %order.trading_pair,
            price = %order.price,
            amount = %order.amount,
            "Order created"
        );

        let payment_method = sell_terms.as_ref().map(|t| t.payment_method);
        match self.matcher.match_orders(&order, payment_method).await {
            Ok(order) => Ok(order),
            Err(e) => {
                warn!(order_id = order.id, error = %e.details(), "Matching failed, order left on the book");
                self.find_by_id(order.id).await
            }
        }
    }

    async fn verify_bank(&self, user_id: i64, bank_id: i64, token: &str) -> Result<()> {
        match self.banking.bank_details(user_id, bank_id, token).await {
            Ok(details) if details.id == bank_id => Ok(()),
            Ok(details) => Err(ExchangeError::BankDetailsMismatch(format!(
                "bank {} resolved to account {}",
                bank_id, details.id
            ))),
            Err(e) if e.is_definitive() => Err(ExchangeError::BankDetailsMismatch(format!(
                "bank {} could not be verified for user {}: {}",
                bank_id, user_id, e
            ))),
            Err(e) => Err(e.into()),
        }
    }

    async fn open_sell_side(&self, order: &Order, terms: &SellTerms) -> Result<()> {
        self.escrow.create_escrow(order, order.amount).await?;
        self.payment_settings
            .insert(NewPaymentSettings {
                order_id: order.id,
                seller_id: order.user_id,
                remark: terms.remark.clone(),
                signature: terms.signature.clone(),
                payment_method: terms.payment_method,
            })
            .await?;
        Ok(())
    }

    /// Remove a half-created SELL order and return the debited amount
    async fn undo_sell_placement(&self, order: &Order) {
        if let Err(e) = self.orders.delete_cascade(order.id).await {
            error!(order_id = order.id, error = %e, "CRITICAL: failed to remove half-created order");
        }
        self.refund_debit(order.user_id, &order.trading_pair, order.amount)
            .await;
    }

    async fn refund_debit(&self, user_id: i64, asset: &str, amount: Decimal) {
        match self.ledger.credit(user_id, asset, amount, None).await {
            Ok(_) => warn!(user_id, asset, %amount, "Order placement rolled back"),
            Err(e) => {
                error!(user_id, asset, %amount, error = %e.details(), "CRITICAL: placement debit not refunded")
            }
        }
    }

    // ========================================================================
    // Single-order operations
    // ========================================================================

    pub async fn find_by_id(&self, order_id: i64) -> Result<Order> {
        self.orders
            .get(order_id)
            .await?
            .ok_or_else(|| ExchangeError::not_found(format!("order {}", order_id)))
    }

    /// Overwrite price and/or amount of an OPEN order owned by the caller.
    ///
    /// Shrinking a SELL order shrinks its escrow and returns the difference to
    /// the seller. The escrow is resized first so that a concurrent match can
    /// never trade more than the order row says.
    pub async fn update_order(
        &self,
        order_id: i64,
        caller_id: i64,
        patch: UpdateOrderRequest,
    ) -> Result<Order> {
        let order = self.owned(order_id, caller_id).await?;
        if order.status != OrderStatus::Open {
            return Err(ExchangeError::Conflict(format!(
                "order {} is {} and can no longer be edited",
                order_id, order.status
            )));
        }

        let price = patch.price.unwrap_or(order.price);
        let amount = patch.amount.unwrap_or(order.amount);
        ensure_positive("price", price)?;
        ensure_positive("amount", amount)?;
        fee::trade_fee(amount, price, order.side, false)?;

        let escrow = match order.side {
            OrderSide::Sell if amount != order.amount => {
                let escrow = self.escrow.find_by_order(order_id).await?.ok_or_else(|| {
                    ExchangeError::not_found(format!("escrow for order {}", order_id))
                })?;
                if amount > escrow.amount {
                    return Err(ExchangeError::Validation(format!(
                        "amount {} exceeds escrowed {}",
                        amount, escrow.amount
                    )));
                }
                if amount < escrow.amount {
                    self.escrow.resize(&escrow, amount).await?;
                    Some(escrow)
                } else {
                    None
                }
            }
            _ => None,
        };

        let updated = match self.orders.update_terms(order_id, price, amount).await {
            Ok(Some(updated)) => updated,
            outcome => {
                if let Some(escrow) = &escrow {
                    self.escrow.undo_resize(&order, escrow, amount).await;
                }
                return Err(match outcome {
                    Err(e) => e.into(),
                    _ => ExchangeError::Conflict(format!(
                        "order {} left OPEN while being edited",
                        order_id
                    )),
                });
            }
        };

        if let Some(escrow) = &escrow {
            let released = escrow.amount - amount;
            if let Err(e) = self
                .ledger
                .credit(caller_id, &order.trading_pair, released, None)
                .await
            {
                error!(order_id, %released, error = %e.details(), "CRITICAL: resized escrow not returned to seller");
                return Err(e);
            }
        }

        info!(order_id, price = %updated.price, amount = %updated.amount, "Order updated");
        Ok(updated)
    }

    /// Cancel an order, then refund a SELL order's escrow to the owner.
    ///
    /// Cancelling an already cancelled order retries a refund that did not
    /// complete.
    pub async fn cancel_order(&self, order_id: i64, caller_id: i64) -> Result<()> {
        let order = self.owned(order_id, caller_id).await?;
        if order.status != OrderStatus::Cancelled {
            if !order.status.can_transition_to(OrderStatus::Cancelled) {
                return Err(ExchangeError::Conflict(format!(
                    "order {} is {} and cannot be cancelled",
                    order_id, order.status
                )));
            }
            if !self
                .orders
                .transition_status(order_id, order.status, OrderStatus::Cancelled)
                .await?
            {
                return Err(ExchangeError::ConcurrentModification(format!(
                    "order {} changed while cancelling",
                    order_id
                )));
            }
            info!(order_id, user_id = caller_id, "Order cancelled");
        }

        if order.side == OrderSide::Sell {
            if let Some(escrow) = self.escrow.find_by_order(order_id).await? {
                self.escrow.refund_to_seller(&order, &escrow).await?;
            }
        }
        Ok(())
    }

    /// Hard-delete an order with its escrow, bookings and payment settings
    pub async fn delete_order(&self, order_id: i64, caller_id: i64) -> Result<()> {
        if order_id <= 0 {
            return Err(ExchangeError::Validation("order id is required".to_string()));
        }
        let order = self.find_by_id(order_id).await?;
        if order.user_id != caller_id {
            return Err(ExchangeError::Unauthorized(format!(
                "order {} does not belong to user {}",
                order_id, caller_id
            )));
        }
        if order.status.blocks_deletion() {
            return Err(ExchangeError::Conflict(format!(
                "order {} is {} and part of a live trade",
                order_id, order.status
            )));
        }

        // Off the book before the escrow is refunded
        if order.status == OrderStatus::Open
            && !self
                .orders
                .transition_status(order_id, OrderStatus::Open, OrderStatus::Cancelled)
                .await?
        {
            return Err(ExchangeError::ConcurrentModification(format!(
                "order {} changed while deleting",
                order_id
            )));
        }
        if let Some(escrow) = self.escrow.find_by_order(order_id).await? {
            self.escrow.refund_to_seller(&order, &escrow).await?;
        }
        self.orders.delete_cascade(order_id).await?;
        info!(order_id, user_id = caller_id, "Order deleted");
        Ok(())
    }

    /// Claim another user's OPEN order as its counter-party
    ///
    /// A BUY order moves to PENDING (awaiting fiat); a SELL order is FILLED.
    pub async fn handle_p2p_order_action(&self, order_id: i64, acting_user_id: i64) -> Result<Booking> {
        let order = self.find_by_id(order_id).await?;
        if order.user_id == acting_user_id {
            return Err(ExchangeError::Forbidden(
                "cannot trade against your own order".to_string(),
            ));
        }
        if order.status != OrderStatus::Open {
            return Err(ExchangeError::Conflict(format!(
                "order {} is {} and cannot be claimed",
                order_id, order.status
            )));
        }

        let next = match order.side {
            OrderSide::Buy => OrderStatus::Pending,
            OrderSide::Sell => OrderStatus::Filled,
        };
        if !self
            .orders
            .transition_status(order_id, OrderStatus::Open, next)
            .await?
        {
            return Err(ExchangeError::Conflict(format!(
                "order {} was claimed by another user",
                order_id
            )));
        }

        let booking = self
            .bookings
            .insert(order_id, acting_user_id, order.user_id)
            .await?;
        info!(order_id, buyer_id = acting_user_id, seller_id = order.user_id, status = %next, "Order claimed");
        Ok(booking)
    }

    /// Owner confirms the fiat leg; a held SELL escrow is released to the buyer.
    ///
    /// The release runs before the order moves to PAYMENT_VERIFIED, so a failed
    /// release leaves the order FILLED and the call can be repeated.
    pub async fn update_order_status_for_trade_completion(
        &self,
        order_id: i64,
        caller_id: i64,
    ) -> Result<Order> {
        let order = self.owned(order_id, caller_id).await?;
        if !order.status.can_transition_to(OrderStatus::PaymentVerified) {
            return Err(ExchangeError::Conflict(format!(
                "order {} is {} and cannot be verified",
                order_id, order.status
            )));
        }

        if order.side == OrderSide::Sell {
            if let Some(escrow) = self.escrow.find_by_order(order_id).await? {
                if escrow.status.holds_funds() {
                    self.escrow.release_to_buyer(&escrow).await?;
                }
            }
        }

        if !self
            .orders
            .transition_status(order_id, order.status, OrderStatus::PaymentVerified)
            .await?
        {
            return Err(ExchangeError::ConcurrentModification(format!(
                "order {} changed while verifying payment",
                order_id
            )));
        }
        info!(order_id, user_id = caller_id, "Payment verified");
        self.find_by_id(order_id).await
    }

    async fn owned(&self, order_id: i64, caller_id: i64) -> Result<Order> {
        let order = self.find_by_id(order_id).await?;
        if order.user_id != caller_id {
            return Err(ExchangeError::Unauthorized(format!(
                "order {} does not belong to user {}",
                order_id, caller_id
            )));
        }
        Ok(order)
    }
}

fn ensure_positive(field: &str, value: Decimal) -> Result<()> {
    if value <= Decimal::ZERO {
        return Err(ExchangeError::Validation(format!(
            "{} must be greater than zero",
            field
        )));
    }
    Ok(())
}

fn required(field: &str, value: &Option<String>) -> Result<String> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => Err(ExchangeError::Validation(format!("{} is required", field))),
    }
}

/// Field checks that need no I/O; returns the SELL terms for SELL orders
fn validate_create(req: &CreateOrderRequest) -> Result<Option<SellTerms>> {
    if req.user_id <= 0 {
        return Err(ExchangeError::Validation("userId is required".to_string()));
    }
    if req.trading_pair.trim().is_empty() {
        return Err(ExchangeError::Validation("tradingPair is required".to_string()));
    }
    if req.currency.trim().is_empty() {
        return Err(ExchangeError::Validation("currency is required".to_string()));
    }
    ensure_positive("price", req.price)?;
    ensure_positive("amount", req.amount)?;
    fee::trade_fee(req.amount, req.price, req.side, false)?;

    match req.side {
        OrderSide::Buy => Ok(None),
        OrderSide::Sell => Ok(Some(SellTerms {
            bank_id: req
                .bank_id
                .filter(|id| *id > 0)
                .ok_or_else(|| ExchangeError::Validation("bankId is required".to_string()))?,
            remark: required("remark", &req.remark)?,
            signature: required("signature", &req.signature)?,
            payment_method: req.payment_method.ok_or_else(|| {
                ExchangeError::Validation("paymentMethod is required".to_string())
            })?,
        })),
    }
}
