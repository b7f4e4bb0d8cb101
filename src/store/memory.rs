//! In-memory stores
//!
//! `DashMap` tables with atomic id sequences. Used for standalone mode and as
//! the fake behind every service test. Per-row CAS operations run under the
//! row's shard lock, so they have the same race semantics as the SQL versions.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use rust_decimal::Decimal;
use std::sync::Mutex;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use super::{
    BookingStore, CasOutcome, EscrowStore, HistoryStore, OrderFilter, OrderStore,
    PaymentSettingsStore, SettlementStore, StoreError, StoreResult, WalletStore,
};
use crate::escrow::state::EscrowStatus;
use crate::models::{
    Booking, Escrow, History, NewHistory, NewOrder, NewPaymentSettings, NewWallet, Order,
    OrderSide, PaymentSettings, Wallet,
};
use crate::order::state::OrderStatus;
use crate::settlement::state::SettlementState;
use crate::settlement::types::SettlementTask;

#[derive(Default)]
struct Sequence(AtomicI64);

impl Sequence {
    fn next(&self) -> i64 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }
}

#[derive(Default)]
pub struct MemoryStore {
    orders: DashMap<i64, Order>,
    escrows: DashMap<i64, Escrow>,
    payment_settings: DashMap<i64, PaymentSettings>,
    bookings: DashMap<i64, Booking>,
    history: DashMap<i64, History>,
    history_refs: DashMap<String, i64>,
    wallets: DashMap<i64, Wallet>,
    wallet_ops: DashMap<String, i64>,
    settlements: DashMap<String, SettlementTask>,

    order_seq: Sequence,
    escrow_seq: Sequence,
    settings_seq: Sequence,
    booking_seq: Sequence,
    history_seq: Sequence,
    wallet_seq: Sequence,

    /// Serializes multi-table writes (cascade delete, batch insert)
    multi_table: Mutex<()>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_multi_table(&self) -> std::sync::MutexGuard<'_, ()> {
        self.multi_table
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn sorted<T: Clone>(items: impl Iterator<Item = (i64, T)>) -> Vec<T> {
        let mut rows: Vec<(i64, T)> = items.collect();
        rows.sort_by_key(|(id, _)| *id);
        rows.into_iter().map(|(_, v)| v).collect()
    }
}

// ============================================================================
// Orders
// ============================================================================

#[async_trait]
impl OrderStore for MemoryStore {
    async fn insert(&self, new: NewOrder) -> StoreResult<Order> {
        let now = Utc::now();
        let order = Order {
            id: self.order_seq.next(),
            user_id: new.user_id,
            trading_pair: new.trading_pair,
            side: new.side,
            is_maker: false,
            price: new.price,
            amount: new.amount,
            filled_amount: Decimal::ZERO,
            currency: new.currency,
            status: OrderStatus::Open,
            bank_id: new.bank_id,
            expiration_time: new.expiration_time,
            created_at: now,
            updated_at: now,
        };
        self.orders.insert(order.id, order.clone());
        Ok(order)
    }

    async fn get(&self, id: i64) -> StoreResult<Option<Order>> {
        Ok(self.orders.get(&id).map(|o| o.clone()))
    }

    async fn update_terms(
        &self,
        id: i64,
        price: Decimal,
        amount: Decimal,
    ) -> StoreResult<Option<Order>> {
        match self.orders.get_mut(&id) {
            Some(mut row) if row.status == OrderStatus::Open => {
                row.price = price;
                row.amount = amount;
                row.updated_at = Utc::now();
                Ok(Some(row.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn mark_maker(&self, id: i64) -> StoreResult<bool> {
        match self.orders.get_mut(&id) {
            Some(mut row) if row.status == OrderStatus::Open => {
                row.is_maker = true;
                row.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn transition_status(
        &self,
        id: i64,
        expected: OrderStatus,
        new: OrderStatus,
    ) -> StoreResult<bool> {
        match self.orders.get_mut(&id) {
            Some(mut row) if row.status == expected => {
                row.status = new;
                match new {
                    OrderStatus::Filled => row.filled_amount = row.amount,
                    OrderStatus::Open => row.filled_amount = Decimal::ZERO,
                    _ => {}
                }
                row.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn find_open_counter_orders(
        &self,
        trading_pair: &str,
        side: OrderSide,
        price: Decimal,
    ) -> StoreResult<Vec<Order>> {
        Ok(Self::sorted(
            self.orders
                .iter()
                .filter(|o| {
                    o.status == OrderStatus::Open
                        && o.side == side
                        && o.trading_pair == trading_pair
                        && o.price == price
                })
                .map(|o| (o.id, o.clone())),
        ))
    }

    async fn find_pending_match(
        &self,
        trading_pair: &str,
        side: OrderSide,
        price: Decimal,
        amount: Decimal,
    ) -> StoreResult<Option<Order>> {
        let matches = Self::sorted(
            self.orders
                .iter()
                .filter(|o| {
                    o.status == OrderStatus::Pending
                        && o.side == side
                        && o.trading_pair == trading_pair
                        && o.price == price
                        && o.amount == amount
                })
                .map(|o| (o.id, o.clone())),
        );
        Ok(matches.into_iter().next())
    }

    async fn list_with_payment_settings(
        &self,
        filter: OrderFilter,
    ) -> StoreResult<Vec<(Order, Option<PaymentSettings>)>> {
        let orders = Self::sorted(
            self.orders
                .iter()
                .filter(|o| filter.matches(o))
                .map(|o| (o.id, o.clone())),
        );
        Ok(orders
            .into_iter()
            .map(|order| {
                let settings = self
                    .payment_settings
                    .iter()
                    .find(|s| s.order_id == order.id)
                    .map(|s| s.clone());
                (order, settings)
            })
            .collect())
    }

    async fn delete_cascade(&self, id: i64) -> StoreResult<()> {
        let _guard = self.lock_multi_table();
        self.escrows.retain(|_, e| e.order_id != id);
        self.bookings.retain(|_, b| b.order_id != id);
        self.payment_settings.retain(|_, s| s.order_id != id);
        self.orders.remove(&id);
        Ok(())
    }
}

// ============================================================================
// Escrow
// ============================================================================

#[async_trait]
impl EscrowStore for MemoryStore {
    async fn insert(&self, order_id: i64, amount: Decimal) -> StoreResult<Escrow> {
        if self.escrows.iter().any(|e| e.order_id == order_id) {
            return Err(StoreError::Duplicate(format!("escrow for order {}", order_id)));
        }
        let now = Utc::now();
        let escrow = Escrow {
            id: self.escrow_seq.next(),
            order_id,
            amount,
            status: EscrowStatus::Open,
            created_at: now,
            updated_at: now,
        };
        self.escrows.insert(escrow.id, escrow.clone());
        Ok(escrow)
    }

    async fn get(&self, id: i64) -> StoreResult<Option<Escrow>> {
        Ok(self.escrows.get(&id).map(|e| e.clone()))
    }

    async fn find_by_order(&self, order_id: i64) -> StoreResult<Option<Escrow>> {
        Ok(self
            .escrows
            .iter()
            .find(|e| e.order_id == order_id)
            .map(|e| e.clone()))
    }

    async fn transition_status(
        &self,
        id: i64,
        expected: EscrowStatus,
        new: EscrowStatus,
    ) -> StoreResult<Option<Escrow>> {
        match self.escrows.get_mut(&id) {
            Some(mut row) if row.status == expected => {
                row.status = new;
                row.updated_at = Utc::now();
                Ok(Some(row.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn resize(&self, id: i64, expected: Decimal, new: Decimal) -> StoreResult<bool> {
        match self.escrows.get_mut(&id) {
            Some(mut row) if row.status == EscrowStatus::Open && row.amount == expected => {
                row.amount = new;
                row.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

// ============================================================================
// Payment settings / bookings / history
// ============================================================================

#[async_trait]
impl PaymentSettingsStore for MemoryStore {
    async fn insert(&self, new: NewPaymentSettings) -> StoreResult<PaymentSettings> {
        if self
            .payment_settings
            .iter()
            .any(|s| s.order_id == new.order_id && s.seller_id == new.seller_id)
        {
            return Err(StoreError::Duplicate(format!(
                "payment settings for order {}",
                new.order_id
            )));
        }
        let settings = PaymentSettings {
            id: self.settings_seq.next(),
            order_id: new.order_id,
            seller_id: new.seller_id,
            remark: new.remark,
            signature: new.signature,
            payment_method: new.payment_method,
        };
        self.payment_settings.insert(settings.id, settings.clone());
        Ok(settings)
    }

    async fn find(&self, order_id: i64, seller_id: i64) -> StoreResult<Option<PaymentSettings>> {
        Ok(self
            .payment_settings
            .iter()
            .find(|s| s.order_id == order_id && s.seller_id == seller_id)
            .map(|s| s.clone()))
    }

    async fn find_by_order(&self, order_id: i64) -> StoreResult<Option<PaymentSettings>> {
        Ok(self
            .payment_settings
            .iter()
            .find(|s| s.order_id == order_id)
            .map(|s| s.clone()))
    }
}

#[async_trait]
impl BookingStore for MemoryStore {
    async fn insert(&self, order_id: i64, buyer_id: i64, seller_id: i64) -> StoreResult<Booking> {
        let booking = Booking {
            id: self.booking_seq.next(),
            order_id,
            buyer_id,
            seller_id,
            created_at: Utc::now(),
        };
        self.bookings.insert(booking.id, booking.clone());
        Ok(booking)
    }

    async fn find_by_order(&self, order_id: i64) -> StoreResult<Option<Booking>> {
        Ok(self.list_by_order(order_id).await?.pop())
    }

    async fn list_by_order(&self, order_id: i64) -> StoreResult<Vec<Booking>> {
        Ok(Self::sorted(
            self.bookings
                .iter()
                .filter(|b| b.order_id == order_id)
                .map(|b| (b.id, b.clone())),
        ))
    }

    async fn delete(&self, id: i64) -> StoreResult<()> {
        self.bookings.remove(&id);
        Ok(())
    }
}

#[async_trait]
impl HistoryStore for MemoryStore {
    async fn append(&self, entry: NewHistory) -> StoreResult<History> {
        let now = Utc::now();
        let id = self.history_seq.next();
        let row = History {
            id,
            kind: entry.kind,
            quantity: entry.quantity,
            price: entry.price,
            fee: entry.fee,
            asset_id: entry.asset_id,
            user_id: entry.user_id,
            payment_method: entry.payment_method,
            reference: entry.reference.clone(),
            created_at: now,
            updated_at: now,
        };

        if let Some(reference) = entry.reference {
            match self.history_refs.entry(reference) {
                Entry::Occupied(existing) => {
                    let existing_id = *existing.get();
                    return self
                        .history
                        .get(&existing_id)
                        .map(|h| h.clone())
                        .ok_or_else(|| {
                            StoreError::Corrupt(format!("history {} missing", existing_id))
                        });
                }
                Entry::Vacant(slot) => {
                    self.history.insert(id, row.clone());
                    slot.insert(id);
                    return Ok(row);
                }
            }
        }

        self.history.insert(id, row.clone());
        Ok(row)
    }

    async fn list_by_user(&self, user_id: i64) -> StoreResult<Vec<History>> {
        let mut rows = Self::sorted(
            self.history
                .iter()
                .filter(|h| h.user_id == user_id)
                .map(|h| (h.id, h.clone())),
        );
        rows.reverse();
        Ok(rows)
    }
}

// ============================================================================
// Wallets
// ============================================================================

#[async_trait]
impl WalletStore for MemoryStore {
    async fn find(&self, user_id: i64, asset: &str) -> StoreResult<Option<Wallet>> {
        Ok(self
            .wallets
            .iter()
            .find(|w| w.user_id == user_id && w.asset == asset)
            .map(|w| w.clone()))
    }

    async fn find_by_address(&self, address: &str) -> StoreResult<Option<Wallet>> {
        Ok(self
            .wallets
            .iter()
            .find(|w| w.address == address)
            .map(|w| w.clone()))
    }

    async fn list_by_user(&self, user_id: i64) -> StoreResult<Vec<Wallet>> {
        Ok(Self::sorted(
            self.wallets
                .iter()
                .filter(|w| w.user_id == user_id)
                .map(|w| (w.id, w.clone())),
        ))
    }

    async fn op_applied(&self, op_key: &str) -> StoreResult<bool> {
        Ok(self.wallet_ops.contains_key(op_key))
    }

    async fn insert_batch(&self, wallets: Vec<NewWallet>) -> StoreResult<Vec<Wallet>> {
        let _guard = self.lock_multi_table();
        for new in &wallets {
            if self
                .wallets
                .iter()
                .any(|w| w.user_id == new.user_id && w.asset == new.asset)
            {
                return Err(StoreError::Duplicate(format!(
                    "wallet ({}, {})",
                    new.user_id, new.asset
                )));
            }
        }

        let now = Utc::now();
        let created: Vec<Wallet> = wallets
            .into_iter()
            .map(|new| Wallet {
                id: self.wallet_seq.next(),
                user_id: new.user_id,
                asset: new.asset,
                balance: Decimal::ZERO,
                fill_amount: Decimal::ZERO,
                address: new.address,
                version: 0,
                created_at: now,
                updated_at: now,
            })
            .collect();
        for wallet in &created {
            self.wallets.insert(wallet.id, wallet.clone());
        }
        Ok(created)
    }

    async fn compare_and_set(
        &self,
        wallet_id: i64,
        expected_version: i64,
        balance: Decimal,
        fill_amount: Decimal,
        op_key: Option<&str>,
    ) -> StoreResult<CasOutcome> {
        let Some(mut row) = self.wallets.get_mut(&wallet_id) else {
            return Err(StoreError::Corrupt(format!("wallet {} vanished", wallet_id)));
        };

        if let Some(key) = op_key {
            if self.wallet_ops.contains_key(key) {
                return Ok(CasOutcome::AlreadyApplied);
            }
        }
        if row.version != expected_version {
            return Ok(CasOutcome::VersionMismatch);
        }

        row.balance = balance;
        row.fill_amount = fill_amount;
        row.version += 1;
        row.updated_at = Utc::now();
        if let Some(key) = op_key {
            self.wallet_ops.insert(key.to_string(), wallet_id);
        }
        Ok(CasOutcome::Applied)
    }
}

// ============================================================================
// Settlement tasks
// ============================================================================

#[async_trait]
impl SettlementStore for MemoryStore {
    async fn insert(&self, task: &SettlementTask) -> StoreResult<()> {
        match self.settlements.entry(task.task_id.clone()) {
            Entry::Occupied(_) => Err(StoreError::Duplicate(format!("task {}", task.task_id))),
            Entry::Vacant(slot) => {
                slot.insert(task.clone());
                Ok(())
            }
        }
    }

    async fn get(&self, task_id: &str) -> StoreResult<Option<SettlementTask>> {
        Ok(self.settlements.get(task_id).map(|t| t.clone()))
    }

    async fn update_state_if(
        &self,
        task_id: &str,
        expected: SettlementState,
        new: SettlementState,
        error: Option<&str>,
    ) -> StoreResult<bool> {
        match self.settlements.get_mut(task_id) {
            Some(mut row) if row.state == expected => {
                row.state = new;
                if let Some(e) = error {
                    row.error_message = Some(e.to_string());
                }
                if new.is_terminal() {
                    row.auth_token = None;
                }
                row.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn increment_retry(&self, task_id: &str) -> StoreResult<()> {
        if let Some(mut row) = self.settlements.get_mut(task_id) {
            row.retry_count += 1;
            row.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn find_stale(
        &self,
        stale_after: Duration,
        limit: usize,
    ) -> StoreResult<Vec<SettlementTask>> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(stale_after).unwrap_or_else(|_| chrono::Duration::zero());
        let mut rows: Vec<SettlementTask> = self
            .settlements
            .iter()
            .filter(|t| !t.state.is_terminal() && t.updated_at <= cutoff)
            .map(|t| t.clone())
            .collect();
        rows.sort_by_key(|t| t.updated_at);
        rows.truncate(limit);
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PaymentMethod, TransactionType};
    use rust_decimal_macros::dec;

    fn new_order(user_id: i64, side: OrderSide, price: Decimal) -> NewOrder {
        NewOrder {
            user_id,
            trading_pair: "BTC".to_string(),
            side,
            price,
            amount: dec!(1),
            currency: "USD".to_string(),
            bank_id: None,
            expiration_time: None,
        }
    }

    #[tokio::test]
    async fn test_order_status_cas() {
        let store = MemoryStore::new();
        let order = OrderStore::insert(&store, new_order(1, OrderSide::Sell, dec!(10)))
            .await
            .unwrap();

        assert!(
            OrderStore::transition_status(&store, order.id, OrderStatus::Open, OrderStatus::Filled)
                .await
                .unwrap()
        );
        // Second claim loses
        assert!(
            !OrderStore::transition_status(&store, order.id, OrderStatus::Open, OrderStatus::Filled)
                .await
                .unwrap()
        );
        let stored = OrderStore::get(&store, order.id).await.unwrap().unwrap();
        assert_eq!(stored.filled_amount, dec!(1));
    }

    #[tokio::test]
    async fn test_term_edits_never_reopen_a_filled_order() {
        let store = MemoryStore::new();
        let order = OrderStore::insert(&store, new_order(1, OrderSide::Sell, dec!(10)))
            .await
            .unwrap();
        let edited = store.update_terms(order.id, dec!(11), dec!(1)).await.unwrap().unwrap();
        assert_eq!(edited.price, dec!(11));

        OrderStore::transition_status(&store, order.id, OrderStatus::Open, OrderStatus::Filled)
            .await
            .unwrap();
        assert!(store.update_terms(order.id, dec!(12), dec!(1)).await.unwrap().is_none());
        assert!(!store.mark_maker(order.id).await.unwrap());

        let stored = OrderStore::get(&store, order.id).await.unwrap().unwrap();
        assert_eq!((stored.status, stored.price), (OrderStatus::Filled, dec!(11)));
        assert!(!stored.is_maker);
    }

    #[tokio::test]
    async fn test_escrow_resize_and_transition() {
        let store = MemoryStore::new();
        let escrow = EscrowStore::insert(&store, 1, dec!(4)).await.unwrap();

        assert!(!store.resize(escrow.id, dec!(3), dec!(1)).await.unwrap());
        assert!(store.resize(escrow.id, dec!(4), dec!(1)).await.unwrap());

        let held = EscrowStore::transition_status(&store, escrow.id, EscrowStatus::Open, EscrowStatus::Cancelled)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(held.amount, dec!(1));
        assert!(!store.resize(escrow.id, dec!(1), dec!(4)).await.unwrap());
        assert!(
            EscrowStore::transition_status(&store, escrow.id, EscrowStatus::Open, EscrowStatus::Success)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_counter_orders_exact_price_oldest_first() {
        let store = MemoryStore::new();
        let a = OrderStore::insert(&store, new_order(1, OrderSide::Sell, dec!(100))).await.unwrap();
        OrderStore::insert(&store, new_order(2, OrderSide::Sell, dec!(100.5))).await.unwrap();
        let c = OrderStore::insert(&store, new_order(3, OrderSide::Sell, dec!(100.0))).await.unwrap();

        let found = store
            .find_open_counter_orders("BTC", OrderSide::Sell, dec!(100))
            .await
            .unwrap();
        let ids: Vec<i64> = found.iter().map(|o| o.id).collect();
        assert_eq!(ids, vec![a.id, c.id]);
    }

    #[tokio::test]
    async fn test_wallet_cas_version_and_op_key() {
        let store = MemoryStore::new();
        let wallets = store
            .insert_batch(vec![NewWallet {
                user_id: 1,
                asset: "BTC".into(),
                address: "1abc".into(),
            }])
            .await
            .unwrap();
        let w = &wallets[0];

        let first = store
            .compare_and_set(w.id, 0, dec!(5), dec!(0), Some("t1:credit"))
            .await
            .unwrap();
        assert_eq!(first, CasOutcome::Applied);

        let stale = store
            .compare_and_set(w.id, 0, dec!(7), dec!(0), None)
            .await
            .unwrap();
        assert_eq!(stale, CasOutcome::VersionMismatch);

        let replay = store
            .compare_and_set(w.id, 1, dec!(10), dec!(0), Some("t1:credit"))
            .await
            .unwrap();
        assert_eq!(replay, CasOutcome::AlreadyApplied);

        let stored = WalletStore::find(&store, 1, "BTC").await.unwrap().unwrap();
        assert_eq!(stored.balance, dec!(5));
        assert_eq!(stored.version, 1);
    }

    #[tokio::test]
    async fn test_history_reference_is_idempotent() {
        let store = MemoryStore::new();
        let entry = NewHistory {
            kind: TransactionType::Buy,
            quantity: dec!(1),
            price: dec!(10),
            fee: dec!(0.02),
            asset_id: "BTC".into(),
            user_id: 9,
            payment_method: PaymentMethod::BankTransfer,
            reference: Some("task:buy".into()),
        };
        let first = store.append(entry.clone()).await.unwrap();
        let second = store.append(entry).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(HistoryStore::list_by_user(&store, 9).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_cascade_removes_dependents() {
        let store = MemoryStore::new();
        let order = OrderStore::insert(&store, new_order(1, OrderSide::Sell, dec!(10))).await.unwrap();
        EscrowStore::insert(&store, order.id, dec!(1)).await.unwrap();
        BookingStore::insert(&store, order.id, 2, 1).await.unwrap();
        PaymentSettingsStore::insert(
            &store,
            NewPaymentSettings {
                order_id: order.id,
                seller_id: 1,
                remark: "r".into(),
                signature: "s".into(),
                payment_method: PaymentMethod::EWallet,
            },
        )
        .await
        .unwrap();

        store.delete_cascade(order.id).await.unwrap();

        assert!(OrderStore::get(&store, order.id).await.unwrap().is_none());
        assert!(EscrowStore::find_by_order(&store, order.id).await.unwrap().is_none());
        assert!(BookingStore::find_by_order(&store, order.id).await.unwrap().is_none());
        assert!(PaymentSettingsStore::find_by_order(&store, order.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_wallet_batch_rejected_whole() {
        let store = MemoryStore::new();
        let w = |asset: &str| NewWallet {
            user_id: 1,
            asset: asset.into(),
            address: format!("addr-{}", asset),
        };
        store.insert_batch(vec![w("BTC")]).await.unwrap();
        let err = store.insert_batch(vec![w("ETH"), w("BTC")]).await;
        assert!(matches!(err, Err(StoreError::Duplicate(_))));
        assert_eq!(WalletStore::list_by_user(&store, 1).await.unwrap().len(), 1);
    }
}
