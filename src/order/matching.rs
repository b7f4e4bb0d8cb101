//! Matching Engine - counter-order matching and trade recording
//!
//! The engine handles:
//! 1. Finding OPEN counter-orders at exactly the same price
//! 2. Claiming one with a status CAS and filling both sides in full
//! 3. Writing the booking and the two history rows of the trade

use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::error::{ExchangeError, Result};
use crate::fee;
use crate::models::{NewHistory, Order, OrderSide, PaymentMethod, TransactionType};
use crate::order::state::OrderStatus;
use crate::store::{BookingStore, HistoryStore, OrderStore, PaymentSettingsStore};

/// Counter-party resolution for one candidate
struct PendingTrade {
    buyer_id: i64,
    seller_id: i64,
    /// Order whose payment settings govern the fiat leg
    seller_order_id: i64,
    payment_method: PaymentMethod,
    fee: Decimal,
}

pub struct MatchingEngine {
    orders: Arc<dyn OrderStore>,
    payment_settings: Arc<dyn PaymentSettingsStore>,
    bookings: Arc<dyn BookingStore>,
    history: Arc<dyn HistoryStore>,
}

impl MatchingEngine {
    pub fn new(
        orders: Arc<dyn OrderStore>,
        payment_settings: Arc<dyn PaymentSettingsStore>,
        bookings: Arc<dyn BookingStore>,
        history: Arc<dyn HistoryStore>,
    ) -> Self {
        Self {
            orders,
            payment_settings,
            bookings,
            history,
        }
    }

    /// Match a freshly persisted OPEN order and return its latest state
    ///
    /// # Flow:
    /// 1. Load OPEN counter-orders on the same pair at the same price
    /// 2. Resolve buyer, seller and payment method for the first candidate
    /// 3. Claim the candidate (OPEN -> FILLED), skip it if the claim is lost
    /// 4. Claim the new order; release the candidate if that fails
    /// 5. Book the pair and record both sides in history; if that fails both
    ///    claims are rolled back to OPEN and the error is returned
    /// 6. With no fill the order rests and becomes a maker
    ///
    /// `payment_method` is the new order's own method and is required for SELL
    /// orders. BUY orders take the method stored with the matched SELL order.
    pub async fn match_orders(
        &self,
        order: &Order,
        payment_method: Option<PaymentMethod>,
    ) -> Result<Order> {
        if order.status != OrderStatus::Open {
            return Ok(order.clone());
        }

        let candidates = self
            .orders
            .find_open_counter_orders(&order.trading_pair, order.side.opposite(), order.price)
            .await?;
        debug!(order_id = order.id, candidates = candidates.len(), "Counter-orders found");

        for counter in candidates {
            if counter.id == order.id || counter.user_id == order.user_id {
                continue;
            }

            let trade = self.resolve(order, &counter, payment_method).await?;

            if !self
                .orders
                .transition_status(counter.id, OrderStatus::Open, OrderStatus::Filled)
                .await?
            {
                debug!(order_id = order.id, counter_id = counter.id, "Counter-order already claimed");
                continue;
            }
            if !self
                .orders
                .transition_status(order.id, OrderStatus::Open, OrderStatus::Filled)
                .await?
            {
                // The new order was matched by someone else in the meantime
                self.orders
                    .transition_status(counter.id, OrderStatus::Filled, OrderStatus::Open)
                    .await?;
                warn!(order_id = order.id, counter_id = counter.id, "Order claimed concurrently, counter released");
                return self.reload(order.id).await;
            }

            if let Err(e) = self.settle(order, &counter, &trade).await {
                self.unwind(order.id, counter.id).await;
                return Err(e);
            }

            info!(
                order_id = order.id,
                counter_id = counter.id,
                buyer_id = trade.buyer_id,
                seller_id = trade.seller_id,
                quantity = %counter.amount,
                price = %order.price,
                "Orders matched"
            );
            return self.reload(order.id).await;
        }

        // No fill: rest on the book
        if !order.is_maker && self.orders.mark_maker(order.id).await? {
            debug!(order_id = order.id, "Order resting as maker");
        }
        self.reload(order.id).await
    }

    async fn settle(&self, order: &Order, counter: &Order, trade: &PendingTrade) -> Result<()> {
        let booking = self
            .bookings
            .insert(trade.seller_order_id, trade.buyer_id, trade.seller_id)
            .await?;
        if let Err(e) = self.record_trade(order, counter, trade).await {
            if let Err(undo) = self.bookings.delete(booking.id).await {
                error!(booking_id = booking.id, error = %undo, "Failed to remove booking of unrecorded fill");
            }
            return Err(e);
        }
        Ok(())
    }

    /// Return both claimed orders to OPEN after the trade could not be recorded
    async fn unwind(&self, order_id: i64, counter_id: i64) {
        for id in [order_id, counter_id] {
            match self
                .orders
                .transition_status(id, OrderStatus::Filled, OrderStatus::Open)
                .await
            {
                Ok(true) => {}
                Ok(false) => error!(order_id = id, "CRITICAL: unrecorded fill could not be reopened"),
                Err(e) => error!(order_id = id, error = %e, "CRITICAL: unrecorded fill could not be reopened"),
            }
        }
        warn!(order_id, counter_id, "Match rolled back");
    }

    async fn resolve(
        &self,
        order: &Order,
        counter: &Order,
        payment_method: Option<PaymentMethod>,
    ) -> Result<PendingTrade> {
        let (buyer_id, seller_id, seller_order_id) = match counter.side {
            OrderSide::Buy => (counter.user_id, order.user_id, order.id),
            OrderSide::Sell => (order.user_id, counter.user_id, counter.id),
        };

        let payment_method = match order.side {
            OrderSide::Sell => payment_method.ok_or_else(|| {
                ExchangeError::Validation("paymentMethod is required for SELL orders".to_string())
            })?,
            OrderSide::Buy => self
                .payment_settings
                .find(counter.id, counter.user_id)
                .await?
                .map(|s| s.payment_method)
                .ok_or(ExchangeError::PaymentSettingsMissing {
                    order_id: counter.id,
                })?,
        };

        let fee = fee::trade_fee(counter.amount, order.price, order.side, order.is_maker)?;

        Ok(PendingTrade {
            buyer_id,
            seller_id,
            seller_order_id,
            payment_method,
            fee,
        })
    }

    /// One BUY row for the buyer, one SELL row for the seller, same fee
    async fn record_trade(&self, order: &Order, counter: &Order, trade: &PendingTrade) -> Result<()> {
        let quantity = counter.amount;
        let fee = trade.fee;
        let reference = format!("match:{}:{}", order.id, counter.id);

        self.history
            .append(NewHistory {
                kind: TransactionType::Buy,
                quantity,
                price: order.price,
                fee,
                asset_id: order.trading_pair.clone(),
                user_id: trade.buyer_id,
                payment_method: trade.payment_method,
                reference: Some(format!("{}:buy", reference)),
            })
            .await?;
        self.history
            .append(NewHistory {
                kind: TransactionType::Sell,
                quantity,
                price: counter.price,
                fee,
                asset_id: order.trading_pair.clone(),
                user_id: trade.seller_id,
                payment_method: trade.payment_method,
                reference: Some(format!("{}:sell", reference)),
            })
            .await?;
        Ok(())
    }

    async fn reload(&self, id: i64) -> Result<Order> {
        self.orders
            .get(id)
            .await?
            .ok_or_else(|| ExchangeError::not_found(format!("order {}", id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Booking, NewOrder, NewPaymentSettings};
    use crate::store::memory::MemoryStore;
    use crate::store::{StoreError, StoreResult};
    use rust_decimal_macros::dec;

    /// Bookings table that rejects every insert
    struct BrokenBookings;

    #[async_trait::async_trait]
    impl BookingStore for BrokenBookings {
        async fn insert(&self, order_id: i64, _: i64, _: i64) -> StoreResult<Booking> {
            Err(StoreError::Corrupt(format!("booking for order {} rejected", order_id)))
        }

        async fn find_by_order(&self, _: i64) -> StoreResult<Option<Booking>> {
            Ok(None)
        }

        async fn list_by_order(&self, _: i64) -> StoreResult<Vec<Booking>> {
            Ok(Vec::new())
        }

        async fn delete(&self, _: i64) -> StoreResult<()> {
            Ok(())
        }
    }

    fn engine(store: &Arc<MemoryStore>) -> MatchingEngine {
        MatchingEngine::new(store.clone(), store.clone(), store.clone(), store.clone())
    }

    async fn place(store: &MemoryStore, user_id: i64, side: OrderSide, price: Decimal) -> Order {
        OrderStore::insert(
            store,
            NewOrder {
                user_id,
                trading_pair: "BTC".into(),
                side,
                price,
                amount: dec!(4),
                currency: "USD".into(),
                bank_id: (side == OrderSide::Sell).then_some(5),
                expiration_time: None,
            },
        )
        .await
        .unwrap()
    }

    async fn sell_with_settings(store: &MemoryStore, user_id: i64) -> Order {
        let sell = place(store, user_id, OrderSide::Sell, dec!(100)).await;
        PaymentSettingsStore::insert(
            store,
            NewPaymentSettings {
                order_id: sell.id,
                seller_id: user_id,
                remark: "pay fast".into(),
                signature: "sig".into(),
                payment_method: PaymentMethod::BankTransfer,
            },
        )
        .await
        .unwrap();
        sell
    }

    #[tokio::test]
    async fn test_buy_matches_resting_sell() {
        let store = Arc::new(MemoryStore::new());
        let sell = sell_with_settings(&store, 1).await;
        let buy = place(&store, 2, OrderSide::Buy, dec!(100)).await;

        let matched = engine(&store).match_orders(&buy, None).await.unwrap();
        assert_eq!(matched.status, OrderStatus::Filled);
        assert_eq!(matched.filled_amount, dec!(4));
        let sell = OrderStore::get(store.as_ref(), sell.id).await.unwrap().unwrap();
        assert_eq!(sell.status, OrderStatus::Filled);

        let bookings = store.list_by_order(sell.id).await.unwrap();
        assert_eq!(bookings.len(), 1);
        assert_eq!((bookings[0].buyer_id, bookings[0].seller_id), (2, 1));

        let buyer_rows = HistoryStore::list_by_user(store.as_ref(), 2).await.unwrap();
        let seller_rows = HistoryStore::list_by_user(store.as_ref(), 1).await.unwrap();
        assert_eq!(buyer_rows.len(), 1);
        assert_eq!(seller_rows.len(), 1);
        assert_eq!(buyer_rows[0].kind, TransactionType::Buy);
        assert_eq!(buyer_rows[0].fee, dec!(0.8));
        assert_eq!(seller_rows[0].fee, dec!(0.8));
        assert_eq!(seller_rows[0].payment_method, PaymentMethod::BankTransfer);
    }

    #[tokio::test]
    async fn test_no_candidate_rests_as_maker() {
        let store = Arc::new(MemoryStore::new());
        let _sell = sell_with_settings(&store, 1).await;
        let buy = place(&store, 2, OrderSide::Buy, dec!(99)).await;

        let rested = engine(&store).match_orders(&buy, None).await.unwrap();
        assert_eq!(rested.status, OrderStatus::Open);
        assert!(rested.is_maker);
    }

    #[tokio::test]
    async fn test_buy_without_seller_settings_fails() {
        let store = Arc::new(MemoryStore::new());
        let sell = place(&store, 1, OrderSide::Sell, dec!(100)).await;
        let buy = place(&store, 2, OrderSide::Buy, dec!(100)).await;

        let err = engine(&store).match_orders(&buy, None).await.unwrap_err();
        assert!(matches!(err, ExchangeError::PaymentSettingsMissing { order_id } if order_id == sell.id));
        let sell = OrderStore::get(store.as_ref(), sell.id).await.unwrap().unwrap();
        assert_eq!(sell.status, OrderStatus::Open);
    }

    #[tokio::test]
    async fn test_sell_uses_own_payment_method() {
        let store = Arc::new(MemoryStore::new());
        let buy = place(&store, 2, OrderSide::Buy, dec!(100)).await;
        let sell = place(&store, 1, OrderSide::Sell, dec!(100)).await;

        let matched = engine(&store)
            .match_orders(&sell, Some(PaymentMethod::MobileMoney))
            .await
            .unwrap();
        assert_eq!(matched.status, OrderStatus::Filled);
        let rows = HistoryStore::list_by_user(store.as_ref(), 2).await.unwrap();
        assert_eq!(rows[0].payment_method, PaymentMethod::MobileMoney);
        // SELL taker rate
        assert_eq!(rows[0].fee, dec!(1));
        let bookings = store.list_by_order(sell.id).await.unwrap();
        assert_eq!(bookings[0].buyer_id, buy.user_id);
    }

    #[tokio::test]
    async fn test_own_orders_never_match() {
        let store = Arc::new(MemoryStore::new());
        let _sell = sell_with_settings(&store, 1).await;
        let buy = place(&store, 1, OrderSide::Buy, dec!(100)).await;

        let rested = engine(&store).match_orders(&buy, None).await.unwrap();
        assert_eq!(rested.status, OrderStatus::Open);
    }

    #[tokio::test]
    async fn test_only_open_counters_are_considered() {
        let store = Arc::new(MemoryStore::new());
        let first = sell_with_settings(&store, 1).await;
        let second = sell_with_settings(&store, 3).await;
        OrderStore::transition_status(store.as_ref(), first.id, OrderStatus::Open, OrderStatus::Pending)
            .await
            .unwrap();
        let buy = place(&store, 2, OrderSide::Buy, dec!(100)).await;

        engine(&store).match_orders(&buy, None).await.unwrap();
        assert!(store.list_by_order(first.id).await.unwrap().is_empty());
        assert_eq!(store.list_by_order(second.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unrecorded_match_reopens_both_orders() {
        let store = Arc::new(MemoryStore::new());
        let sell = sell_with_settings(&store, 1).await;
        let buy = place(&store, 2, OrderSide::Buy, dec!(100)).await;
        let broken = MatchingEngine::new(
            store.clone(),
            store.clone(),
            Arc::new(BrokenBookings),
            store.clone(),
        );

        assert!(broken.match_orders(&buy, None).await.is_err());
        for id in [sell.id, buy.id] {
            let o = OrderStore::get(store.as_ref(), id).await.unwrap().unwrap();
            assert_eq!((o.status, o.filled_amount), (OrderStatus::Open, Decimal::ZERO));
        }
        assert!(HistoryStore::list_by_user(store.as_ref(), 2).await.unwrap().is_empty());

        // The pair still trades once recording works again
        let matched = engine(&store).match_orders(&buy, None).await.unwrap();
        assert_eq!(matched.status, OrderStatus::Filled);
    }

    #[tokio::test]
    async fn test_out_of_range_trade_claims_nothing() {
        let store = Arc::new(MemoryStore::new());
        let huge = dec!(1000000000000000);
        let buy = OrderStore::insert(
            store.as_ref(),
            NewOrder {
                user_id: 2,
                trading_pair: "BTC".into(),
                side: OrderSide::Buy,
                price: huge,
                amount: huge,
                currency: "USD".into(),
                bank_id: None,
                expiration_time: None,
            },
        )
        .await
        .unwrap();
        let sell = place(&store, 1, OrderSide::Sell, huge).await;

        let err = engine(&store)
            .match_orders(&sell, Some(PaymentMethod::BankTransfer))
            .await
            .unwrap_err();
        assert!(matches!(err, ExchangeError::Validation(_)));
        for id in [sell.id, buy.id] {
            let o = OrderStore::get(store.as_ref(), id).await.unwrap().unwrap();
            assert_eq!(o.status, OrderStatus::Open);
        }
    }
}
