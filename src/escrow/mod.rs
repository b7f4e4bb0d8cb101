//! Escrow manager
//!
//! An escrow holds the amount debited from a seller's wallet when a SELL order
//! is created. It leaves the held states exactly once: refunded to the seller
//! on cancellation or released to the buyer on trade completion. Both exits
//! claim the escrow with a status CAS before touching any wallet.

pub mod state;

use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::error::{ExchangeError, Result};
use crate::models::{Escrow, Order, OrderSide};
use crate::store::{BookingStore, EscrowStore, OrderStore};
use crate::wallet::WalletLedger;
use state::EscrowStatus;

/// Outcome of a release
#[derive(Debug, Clone, PartialEq)]
pub struct Release {
    pub escrow_id: i64,
    pub seller_id: i64,
    pub buyer_id: i64,
    pub amount: Decimal,
}

pub struct EscrowManager {
    escrows: Arc<dyn EscrowStore>,
    orders: Arc<dyn OrderStore>,
    bookings: Arc<dyn BookingStore>,
    ledger: Arc<WalletLedger>,
}

impl EscrowManager {
    pub fn new(
        escrows: Arc<dyn EscrowStore>,
        orders: Arc<dyn OrderStore>,
        bookings: Arc<dyn BookingStore>,
        ledger: Arc<WalletLedger>,
    ) -> Self {
        Self {
            escrows,
            orders,
            bookings,
            ledger,
        }
    }

    /// Open an escrow backing a SELL order
    pub async fn create_escrow(&self, order: &Order, amount: Decimal) -> Result<Escrow> {
        if order.side != OrderSide::Sell {
            return Err(ExchangeError::Validation(format!(
                "escrow can only back a SELL order, order {} is {}",
                order.id, order.side
            )));
        }
        if amount <= Decimal::ZERO || amount > order.amount {
            return Err(ExchangeError::Validation(format!(
                "escrow amount {} must be positive and at most the order amount {}",
                amount, order.amount
            )));
        }
        let escrow = self.escrows.insert(order.id, amount).await?;
        info!(escrow_id = escrow.id, order_id = order.id, %amount, "Escrow opened");
        Ok(escrow)
    }

    pub async fn find_by_order(&self, order_id: i64) -> Result<Option<Escrow>> {
        Ok(self.escrows.find_by_order(order_id).await?)
    }

    /// Move an escrow along its state machine; terminal escrows stay put
    pub async fn update_escrow_status(&self, escrow_id: i64, status: EscrowStatus) -> Result<Escrow> {
        let escrow = self
            .escrows
            .get(escrow_id)
            .await?
            .ok_or_else(|| ExchangeError::not_found(format!("escrow {}", escrow_id)))?;
        if escrow.status == status {
            return Ok(escrow);
        }
        if !escrow.status.can_transition_to(status) {
            return Err(ExchangeError::Conflict(format!(
                "escrow {} cannot move from {} to {}",
                escrow_id, escrow.status, status
            )));
        }
        let escrow = self
            .escrows
            .transition_status(escrow_id, escrow.status, status)
            .await?
            .ok_or_else(|| {
                ExchangeError::ConcurrentModification(format!(
                    "escrow {} changed while updating",
                    escrow_id
                ))
            })?;
        info!(escrow_id, status = %status, "Escrow status updated");
        Ok(escrow)
    }

    /// Shrink an OPEN escrow to `amount`. The difference is not credited here;
    /// the caller returns it to the seller once the order row agrees.
    pub async fn resize(&self, escrow: &Escrow, amount: Decimal) -> Result<()> {
        if amount <= Decimal::ZERO || amount > escrow.amount {
            return Err(ExchangeError::Validation(format!(
                "amount {} exceeds escrowed {}",
                amount, escrow.amount
            )));
        }
        if !self.escrows.resize(escrow.id, escrow.amount, amount).await? {
            return Err(ExchangeError::Conflict(format!(
                "escrow {} no longer holds {}",
                escrow.id, escrow.amount
            )));
        }
        info!(escrow_id = escrow.id, from = %escrow.amount, to = %amount, "Escrow resized");
        Ok(())
    }

    /// Put back an amount taken by `resize`. If the escrow has left OPEN in the
    /// meantime (refunded at the smaller amount) the difference goes straight
    /// back to the seller instead.
    pub async fn undo_resize(&self, order: &Order, escrow: &Escrow, resized_to: Decimal) {
        match self.escrows.resize(escrow.id, resized_to, escrow.amount).await {
            Ok(true) => return,
            Ok(false) => {}
            Err(e) => {
                error!(escrow_id = escrow.id, error = %e, "CRITICAL: escrow resize not undone");
                return;
            }
        }
        let difference = escrow.amount - resized_to;
        if let Err(e) = self
            .ledger
            .credit(order.user_id, &order.trading_pair, difference, None)
            .await
        {
            error!(escrow_id = escrow.id, %difference, error = %e.details(), "CRITICAL: resized amount not returned");
        }
    }

    /// Return the held amount to the order owner and mark the escrow cancelled.
    ///
    /// Returns false when the escrow no longer holds funds.
    pub async fn refund_to_seller(&self, order: &Order, escrow: &Escrow) -> Result<bool> {
        if !escrow.status.holds_funds() {
            return Ok(false);
        }
        let held = self
            .escrows
            .transition_status(escrow.id, escrow.status, EscrowStatus::Cancelled)
            .await?
            .ok_or_else(|| {
                ExchangeError::ConcurrentModification(format!(
                    "escrow {} changed while refunding",
                    escrow.id
                ))
            })?;

        if let Err(e) = self
            .ledger
            .credit(order.user_id, &order.trading_pair, held.amount, None)
            .await
        {
            error!(escrow_id = escrow.id, order_id = order.id, error = %e.details(), "Escrow refund failed, restoring hold");
            self.restore(&held, escrow.status).await;
            return Err(e);
        }

        info!(escrow_id = escrow.id, order_id = order.id, user_id = order.user_id, amount = %held.amount, "Escrow refunded");
        Ok(true)
    }

    /// Move the held amount into the buyer's wallet.
    ///
    /// The buyer is taken from the order's booking, or failing that from a
    /// PENDING BUY order with the same pair, price and amount. Returns `None`
    /// for escrows whose order is not a SELL order.
    pub async fn release_to_buyer(&self, escrow: &Escrow) -> Result<Option<Release>> {
        let order = self
            .orders
            .get(escrow.order_id)
            .await?
            .ok_or_else(|| ExchangeError::not_found(format!("order {}", escrow.order_id)))?;
        if order.side != OrderSide::Sell {
            return Ok(None);
        }
        if !escrow.status.holds_funds() {
            return Err(ExchangeError::Conflict(format!(
                "escrow {} is {} and holds no funds",
                escrow.id, escrow.status
            )));
        }

        let booking = self.bookings.find_by_order(order.id).await?;
        let buyer_id = match &booking {
            Some(b) => b.buyer_id,
            None => self
                .orders
                .find_pending_match(&order.trading_pair, OrderSide::Buy, order.price, order.amount)
                .await?
                .map(|o| o.user_id)
                .ok_or(ExchangeError::BuyOrderNotFound { escrow_id: escrow.id })?,
        };

        let held = self
            .escrows
            .transition_status(escrow.id, escrow.status, EscrowStatus::Success)
            .await?
            .ok_or_else(|| {
                ExchangeError::ConcurrentModification(format!(
                    "escrow {} changed while releasing",
                    escrow.id
                ))
            })?;
        let amount = held.amount;

        if let Err(e) = self
            .ledger
            .add_fill_amount(order.user_id, &order.trading_pair, amount, None)
            .await
        {
            error!(escrow_id = escrow.id, error = %e.details(), "Seller fill update failed, restoring hold");
            self.restore(&held, escrow.status).await;
            return Err(e);
        }
        if let Err(e) = self
            .ledger
            .credit(buyer_id, &order.trading_pair, amount, None)
            .await
        {
            error!(escrow_id = escrow.id, buyer_id, error = %e.details(), "Buyer credit failed, restoring hold");
            if let Err(undo) = self
                .ledger
                .subtract_fill_amount(order.user_id, &order.trading_pair, amount)
                .await
            {
                error!(escrow_id = escrow.id, error = %undo.details(), "CRITICAL: seller fill amount left incremented");
            }
            self.restore(&held, escrow.status).await;
            return Err(e);
        }

        // Booking is consumed by the release
        if let Some(b) = booking {
            if let Err(e) = self.bookings.delete(b.id).await {
                warn!(booking_id = b.id, error = %e, "Failed to remove consumed booking");
            }
        }

        info!(
            escrow_id = escrow.id,
            order_id = order.id,
            seller_id = order.user_id,
            buyer_id,
            %amount,
            "Escrow released to buyer"
        );
        Ok(Some(Release {
            escrow_id: escrow.id,
            seller_id: order.user_id,
            buyer_id,
            amount,
        }))
    }

    /// Compensation: undo our own status CAS after a failed wallet write
    async fn restore(&self, held: &Escrow, previous: EscrowStatus) {
        match self
            .escrows
            .transition_status(held.id, held.status, previous)
            .await
        {
            Ok(Some(_)) => {}
            Ok(None) => error!(escrow_id = held.id, "CRITICAL: escrow changed before its hold was restored"),
            Err(e) => error!(escrow_id = held.id, error = %e, "CRITICAL: escrow status could not be restored"),
        }
    }
}
