//! PostgreSQL stores
//!
//! Status and balance updates are single-statement CAS writes
//! (`UPDATE ... WHERE status = $expected`). Multi-row writes run in one
//! transaction.

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::str::FromStr;
use std::time::Duration;

use super::{
    BookingStore, CasOutcome, EscrowStore, HistoryStore, OrderFilter, OrderStore,
    PaymentSettingsStore, SettlementStore, StoreError, StoreResult, WalletStore,
};
use crate::escrow::state::EscrowStatus;
use crate::models::{
    Booking, Escrow, History, NewHistory, NewOrder, NewPaymentSettings, NewWallet, Order,
    OrderSide, PaymentMethod, PaymentSettings, TransactionType, Wallet,
};
use crate::order::state::OrderStatus;
use crate::settlement::state::SettlementState;
use crate::settlement::types::SettlementTask;

const ORDER_COLUMNS: &str = "o.id, o.user_id, o.trading_pair, o.side, o.is_maker, o.price, \
     o.amount, o.filled_amount, o.currency, o.status, o.bank_id, o.expiration_time, \
     o.created_at, o.updated_at";

const HISTORY_COLUMNS: &str = "id, kind, quantity, price, fee, asset_id, user_id, \
     payment_method, reference, created_at, updated_at";

const WALLET_COLUMNS: &str = "id, user_id, asset, balance, fill_amount, address, version, \
     created_at, updated_at";

const TASK_COLUMNS: &str = "task_id, seller_id, buyer_id, asset, amount, price, platform_fee, \
     currency, payment_method, buyer_address, auth_token, state, error_message, retry_count, \
     created_at, updated_at";

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn parse<T: FromStr<Err = String>>(value: &str) -> StoreResult<T> {
    value.parse::<T>().map_err(StoreError::Corrupt)
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    e.as_database_error()
        .and_then(|d| d.code())
        .is_some_and(|code| code == "23505")
}

fn row_to_order(row: &PgRow) -> StoreResult<Order> {
    let side: String = row.try_get("side")?;
    let status: String = row.try_get("status")?;
    Ok(Order {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        trading_pair: row.try_get("trading_pair")?,
        side: parse::<OrderSide>(&side)?,
        is_maker: row.try_get("is_maker")?,
        price: row.try_get("price")?,
        amount: row.try_get("amount")?,
        filled_amount: row.try_get("filled_amount")?,
        currency: row.try_get("currency")?,
        status: parse::<OrderStatus>(&status)?,
        bank_id: row.try_get("bank_id")?,
        expiration_time: row.try_get("expiration_time")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_escrow(row: &PgRow) -> StoreResult<Escrow> {
    let status: String = row.try_get("status")?;
    Ok(Escrow {
        id: row.try_get("id")?,
        order_id: row.try_get("order_id")?,
        amount: row.try_get("amount")?,
        status: parse::<EscrowStatus>(&status)?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_settings(row: &PgRow, prefix: &str) -> StoreResult<PaymentSettings> {
    let col = |name: &str| format!("{}{}", prefix, name);
    let method: String = row.try_get(col("payment_method").as_str())?;
    Ok(PaymentSettings {
        id: row.try_get(col("id").as_str())?,
        order_id: row.try_get(col("order_id").as_str())?,
        seller_id: row.try_get(col("seller_id").as_str())?,
        remark: row.try_get(col("remark").as_str())?,
        signature: row.try_get(col("signature").as_str())?,
        payment_method: parse::<PaymentMethod>(&method)?,
    })
}

fn row_to_booking(row: &PgRow) -> StoreResult<Booking> {
    Ok(Booking {
        id: row.try_get("id")?,
        order_id: row.try_get("order_id")?,
        buyer_id: row.try_get("buyer_id")?,
        seller_id: row.try_get("seller_id")?,
        created_at: row.try_get("created_at")?,
    })
}

fn row_to_history(row: &PgRow) -> StoreResult<History> {
    let kind: String = row.try_get("kind")?;
    let method: String = row.try_get("payment_method")?;
    Ok(History {
        id: row.try_get("id")?,
        kind: parse::<TransactionType>(&kind)?,
        quantity: row.try_get("quantity")?,
        price: row.try_get("price")?,
        fee: row.try_get("fee")?,
        asset_id: row.try_get("asset_id")?,
        user_id: row.try_get("user_id")?,
        payment_method: parse::<PaymentMethod>(&method)?,
        reference: row.try_get("reference")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_wallet(row: &PgRow) -> StoreResult<Wallet> {
    Ok(Wallet {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        asset: row.try_get("asset")?,
        balance: row.try_get("balance")?,
        fill_amount: row.try_get("fill_amount")?,
        address: row.try_get("address")?,
        version: row.try_get("version")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_task(row: &PgRow) -> StoreResult<SettlementTask> {
    let state_id: i16 = row.try_get("state")?;
    let state = SettlementState::from_id(state_id)
        .ok_or_else(|| StoreError::Corrupt(format!("Invalid settlement state: {}", state_id)))?;
    let method: String = row.try_get("payment_method")?;
    Ok(SettlementTask {
        task_id: row.try_get("task_id")?,
        seller_id: row.try_get("seller_id")?,
        buyer_id: row.try_get("buyer_id")?,
        asset: row.try_get("asset")?,
        amount: row.try_get("amount")?,
        price: row.try_get("price")?,
        platform_fee: row.try_get("platform_fee")?,
        currency: row.try_get("currency")?,
        payment_method: parse::<PaymentMethod>(&method)?,
        buyer_address: row.try_get("buyer_address")?,
        auth_token: row.try_get("auth_token")?,
        state,
        error_message: row.try_get("error_message")?,
        retry_count: row.try_get("retry_count")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

// ============================================================================
// Orders
// ============================================================================

#[async_trait]
impl OrderStore for PgStore {
    async fn insert(&self, new: NewOrder) -> StoreResult<Order> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO orders_tb AS o
                (user_id, trading_pair, side, price, amount, currency, status, bank_id,
                 expiration_time)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING {ORDER_COLUMNS}
            "#
        ))
        .bind(new.user_id)
        .bind(&new.trading_pair)
        .bind(new.side.as_str())
        .bind(new.price)
        .bind(new.amount)
        .bind(&new.currency)
        .bind(OrderStatus::Open.as_str())
        .bind(new.bank_id)
        .bind(new.expiration_time)
        .fetch_one(&self.pool)
        .await?;
        row_to_order(&row)
    }

    async fn get(&self, id: i64) -> StoreResult<Option<Order>> {
        let row = sqlx::query(&format!("SELECT {ORDER_COLUMNS} FROM orders_tb o WHERE o.id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_order).transpose()
    }

    async fn update_terms(
        &self,
        id: i64,
        price: Decimal,
        amount: Decimal,
    ) -> StoreResult<Option<Order>> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE orders_tb AS o
            SET price = $1, amount = $2, updated_at = NOW()
            WHERE o.id = $3 AND o.status = $4
            RETURNING {ORDER_COLUMNS}
            "#
        ))
        .bind(price)
        .bind(amount)
        .bind(id)
        .bind(OrderStatus::Open.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_order).transpose()
    }

    async fn mark_maker(&self, id: i64) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE orders_tb SET is_maker = TRUE, updated_at = NOW() WHERE id = $1 AND status = $2",
        )
        .bind(id)
        .bind(OrderStatus::Open.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn transition_status(
        &self,
        id: i64,
        expected: OrderStatus,
        new: OrderStatus,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE orders_tb
            SET status = $1,
                filled_amount = CASE WHEN $1 = 'FILLED' THEN amount
                                     WHEN $1 = 'OPEN' THEN 0
                                     ELSE filled_amount END,
                updated_at = NOW()
            WHERE id = $2 AND status = $3
            "#,
        )
        .bind(new.as_str())
        .bind(id)
        .bind(expected.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn find_open_counter_orders(
        &self,
        trading_pair: &str,
        side: OrderSide,
        price: Decimal,
    ) -> StoreResult<Vec<Order>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {ORDER_COLUMNS} FROM orders_tb o
            WHERE o.trading_pair = $1 AND o.side = $2 AND o.price = $3 AND o.status = $4
            ORDER BY o.id
            "#
        ))
        .bind(trading_pair)
        .bind(side.as_str())
        .bind(price)
        .bind(OrderStatus::Open.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_order).collect()
    }

    async fn find_pending_match(
        &self,
        trading_pair: &str,
        side: OrderSide,
        price: Decimal,
        amount: Decimal,
    ) -> StoreResult<Option<Order>> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {ORDER_COLUMNS} FROM orders_tb o
            WHERE o.trading_pair = $1 AND o.side = $2 AND o.price = $3 AND o.amount = $4
              AND o.status = $5
            ORDER BY o.id
            LIMIT 1
            "#
        ))
        .bind(trading_pair)
        .bind(side.as_str())
        .bind(price)
        .bind(amount)
        .bind(OrderStatus::Pending.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_order).transpose()
    }

    async fn list_with_payment_settings(
        &self,
        filter: OrderFilter,
    ) -> StoreResult<Vec<(Order, Option<PaymentSettings>)>> {
        let clause = match filter {
            OrderFilter::ById(_) => "WHERE o.id = $1",
            OrderFilter::All => "",
            OrderFilter::BySide(_) => "WHERE o.side = $1",
            OrderFilter::ByUser(_) => "WHERE o.user_id = $1",
        };
        let sql = format!(
            r#"
            SELECT {ORDER_COLUMNS},
                   ps.id AS ps_id, ps.order_id AS ps_order_id, ps.seller_id AS ps_seller_id,
                   ps.remark AS ps_remark, ps.signature AS ps_signature,
                   ps.payment_method AS ps_payment_method
            FROM orders_tb o
            LEFT JOIN payment_settings_tb ps ON ps.order_id = o.id
            {clause}
            ORDER BY o.id
            "#
        );
        let query = sqlx::query(&sql);
        let query = match filter {
            OrderFilter::ById(id) => query.bind(id),
            OrderFilter::All => query,
            OrderFilter::BySide(side) => query.bind(side.as_str()),
            OrderFilter::ByUser(user_id) => query.bind(user_id),
        };
        let rows = query.fetch_all(&self.pool).await?;

        rows.iter()
            .map(|row| {
                let order = row_to_order(row)?;
                let ps_id: Option<i64> = row.try_get("ps_id")?;
                let settings = match ps_id {
                    Some(_) => Some(row_to_settings(row, "ps_")?),
                    None => None,
                };
                Ok((order, settings))
            })
            .collect()
    }

    async fn delete_cascade(&self, id: i64) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        for sql in [
            "DELETE FROM escrows_tb WHERE order_id = $1",
            "DELETE FROM bookings_tb WHERE order_id = $1",
            "DELETE FROM payment_settings_tb WHERE order_id = $1",
            "DELETE FROM orders_tb WHERE id = $1",
        ] {
            sqlx::query(sql).bind(id).execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

// ============================================================================
// Escrow
// ============================================================================

#[async_trait]
impl EscrowStore for PgStore {
    async fn insert(&self, order_id: i64, amount: Decimal) -> StoreResult<Escrow> {
        let row = sqlx::query(
            r#"
            INSERT INTO escrows_tb (order_id, amount, status)
            VALUES ($1, $2, $3)
            RETURNING id, order_id, amount, status, created_at, updated_at
            "#,
        )
        .bind(order_id)
        .bind(amount)
        .bind(EscrowStatus::Open.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::Duplicate(format!("escrow for order {}", order_id))
            } else {
                StoreError::Database(e)
            }
        })?;
        row_to_escrow(&row)
    }

    async fn get(&self, id: i64) -> StoreResult<Option<Escrow>> {
        let row = sqlx::query(
            "SELECT id, order_id, amount, status, created_at, updated_at FROM escrows_tb WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_escrow).transpose()
    }

    async fn find_by_order(&self, order_id: i64) -> StoreResult<Option<Escrow>> {
        let row = sqlx::query(
            "SELECT id, order_id, amount, status, created_at, updated_at FROM escrows_tb WHERE order_id = $1",
        )
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_escrow).transpose()
    }

    async fn transition_status(
        &self,
        id: i64,
        expected: EscrowStatus,
        new: EscrowStatus,
    ) -> StoreResult<Option<Escrow>> {
        let row = sqlx::query(
            r#"
            UPDATE escrows_tb SET status = $1, updated_at = NOW()
            WHERE id = $2 AND status = $3
            RETURNING id, order_id, amount, status, created_at, updated_at
            "#,
        )
        .bind(new.as_str())
        .bind(id)
        .bind(expected.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_escrow).transpose()
    }

    async fn resize(&self, id: i64, expected: Decimal, new: Decimal) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE escrows_tb SET amount = $1, updated_at = NOW()
            WHERE id = $2 AND amount = $3 AND status = $4
            "#,
        )
        .bind(new)
        .bind(id)
        .bind(expected)
        .bind(EscrowStatus::Open.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

// ============================================================================
// Payment settings / bookings / history
// ============================================================================

#[async_trait]
impl PaymentSettingsStore for PgStore {
    async fn insert(&self, new: NewPaymentSettings) -> StoreResult<PaymentSettings> {
        let row = sqlx::query(
            r#"
            INSERT INTO payment_settings_tb (order_id, seller_id, remark, signature, payment_method)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, order_id, seller_id, remark, signature, payment_method
            "#,
        )
        .bind(new.order_id)
        .bind(new.seller_id)
        .bind(&new.remark)
        .bind(&new.signature)
        .bind(new.payment_method.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::Duplicate(format!("payment settings for order {}", new.order_id))
            } else {
                StoreError::Database(e)
            }
        })?;
        row_to_settings(&row, "")
    }

    async fn find(&self, order_id: i64, seller_id: i64) -> StoreResult<Option<PaymentSettings>> {
        let row = sqlx::query(
            r#"
            SELECT id, order_id, seller_id, remark, signature, payment_method
            FROM payment_settings_tb WHERE order_id = $1 AND seller_id = $2
            "#,
        )
        .bind(order_id)
        .bind(seller_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(|r| row_to_settings(r, "")).transpose()
    }

    async fn find_by_order(&self, order_id: i64) -> StoreResult<Option<PaymentSettings>> {
        let row = sqlx::query(
            r#"
            SELECT id, order_id, seller_id, remark, signature, payment_method
            FROM payment_settings_tb WHERE order_id = $1
            ORDER BY id LIMIT 1
            "#,
        )
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(|r| row_to_settings(r, "")).transpose()
    }
}

#[async_trait]
impl BookingStore for PgStore {
    async fn insert(&self, order_id: i64, buyer_id: i64, seller_id: i64) -> StoreResult<Booking> {
        let row = sqlx::query(
            r#"
            INSERT INTO bookings_tb (order_id, buyer_id, seller_id)
            VALUES ($1, $2, $3)
            RETURNING id, order_id, buyer_id, seller_id, created_at
            "#,
        )
        .bind(order_id)
        .bind(buyer_id)
        .bind(seller_id)
        .fetch_one(&self.pool)
        .await?;
        row_to_booking(&row)
    }

    async fn find_by_order(&self, order_id: i64) -> StoreResult<Option<Booking>> {
        let row = sqlx::query(
            r#"
            SELECT id, order_id, buyer_id, seller_id, created_at
            FROM bookings_tb WHERE order_id = $1
            ORDER BY id DESC LIMIT 1
            "#,
        )
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_booking).transpose()
    }

    async fn list_by_order(&self, order_id: i64) -> StoreResult<Vec<Booking>> {
        let rows = sqlx::query(
            r#"
            SELECT id, order_id, buyer_id, seller_id, created_at
            FROM bookings_tb WHERE order_id = $1 ORDER BY id
            "#,
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_booking).collect()
    }

    async fn delete(&self, id: i64) -> StoreResult<()> {
        sqlx::query("DELETE FROM bookings_tb WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl HistoryStore for PgStore {
    async fn append(&self, entry: NewHistory) -> StoreResult<History> {
        let inserted = sqlx::query(&format!(
            r#"
            INSERT INTO history_tb
                (kind, quantity, price, fee, asset_id, user_id, payment_method, reference)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (reference) DO NOTHING
            RETURNING {HISTORY_COLUMNS}
            "#
        ))
        .bind(entry.kind.as_str())
        .bind(entry.quantity)
        .bind(entry.price)
        .bind(entry.fee)
        .bind(&entry.asset_id)
        .bind(entry.user_id)
        .bind(entry.payment_method.as_str())
        .bind(&entry.reference)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = inserted {
            return row_to_history(&row);
        }

        // Conflict: the reference was recorded by an earlier attempt
        let row = sqlx::query(&format!(
            "SELECT {HISTORY_COLUMNS} FROM history_tb WHERE reference = $1"
        ))
        .bind(&entry.reference)
        .fetch_one(&self.pool)
        .await?;
        row_to_history(&row)
    }

    async fn list_by_user(&self, user_id: i64) -> StoreResult<Vec<History>> {
        let rows = sqlx::query(&format!(
            "SELECT {HISTORY_COLUMNS} FROM history_tb WHERE user_id = $1 ORDER BY id DESC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_history).collect()
    }
}

// ============================================================================
// Wallets
// ============================================================================

#[async_trait]
impl WalletStore for PgStore {
    async fn find(&self, user_id: i64, asset: &str) -> StoreResult<Option<Wallet>> {
        let row = sqlx::query(&format!(
            "SELECT {WALLET_COLUMNS} FROM wallets_tb WHERE user_id = $1 AND asset = $2"
        ))
        .bind(user_id)
        .bind(asset)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_wallet).transpose()
    }

    async fn find_by_address(&self, address: &str) -> StoreResult<Option<Wallet>> {
        let row = sqlx::query(&format!(
            "SELECT {WALLET_COLUMNS} FROM wallets_tb WHERE address = $1"
        ))
        .bind(address)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_wallet).transpose()
    }

    async fn list_by_user(&self, user_id: i64) -> StoreResult<Vec<Wallet>> {
        let rows = sqlx::query(&format!(
            "SELECT {WALLET_COLUMNS} FROM wallets_tb WHERE user_id = $1 ORDER BY id"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_wallet).collect()
    }

    async fn op_applied(&self, op_key: &str) -> StoreResult<bool> {
        let row = sqlx::query("SELECT 1 FROM wallet_ops_tb WHERE op_key = $1")
            .bind(op_key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn insert_batch(&self, wallets: Vec<NewWallet>) -> StoreResult<Vec<Wallet>> {
        let mut tx = self.pool.begin().await?;
        let mut created = Vec::with_capacity(wallets.len());
        for new in &wallets {
            let row = sqlx::query(&format!(
                r#"
                INSERT INTO wallets_tb (user_id, asset, address)
                VALUES ($1, $2, $3)
                RETURNING {WALLET_COLUMNS}
                "#
            ))
            .bind(new.user_id)
            .bind(&new.asset)
            .bind(&new.address)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    StoreError::Duplicate(format!("wallet ({}, {})", new.user_id, new.asset))
                } else {
                    StoreError::Database(e)
                }
            })?;
            created.push(row_to_wallet(&row)?);
        }
        tx.commit().await?;
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
        let mut tx = self.pool.begin().await?;

        if let Some(key) = op_key {
            let recorded = sqlx::query(
                r#"
                INSERT INTO wallet_ops_tb (op_key, wallet_id) VALUES ($1, $2)
                ON CONFLICT (op_key) DO NOTHING
                "#,
            )
            .bind(key)
            .bind(wallet_id)
            .execute(&mut *tx)
            .await?;
            if recorded.rows_affected() == 0 {
                tx.rollback().await?;
                return Ok(CasOutcome::AlreadyApplied);
            }
        }

        let updated = sqlx::query(
            r#"
            UPDATE wallets_tb
            SET balance = $1, fill_amount = $2, version = version + 1, updated_at = NOW()
            WHERE id = $3 AND version = $4
            "#,
        )
        .bind(balance)
        .bind(fill_amount)
        .bind(wallet_id)
        .bind(expected_version)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(CasOutcome::VersionMismatch);
        }

        tx.commit().await?;
        Ok(CasOutcome::Applied)
    }
}

// ============================================================================
// Settlement tasks
// ============================================================================

#[async_trait]
impl SettlementStore for PgStore {
    async fn insert(&self, task: &SettlementTask) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO settlement_tasks_tb
                (task_id, seller_id, buyer_id, asset, amount, price, platform_fee, currency,
                 payment_method, buyer_address, auth_token, state, retry_count,
                 created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, 0, $13, $13)
            "#,
        )
        .bind(&task.task_id)
        .bind(task.seller_id)
        .bind(task.buyer_id)
        .bind(&task.asset)
        .bind(task.amount)
        .bind(task.price)
        .bind(task.platform_fee)
        .bind(&task.currency)
        .bind(task.payment_method.as_str())
        .bind(&task.buyer_address)
        .bind(&task.auth_token)
        .bind(task.state.id())
        .bind(task.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::Duplicate(format!("task {}", task.task_id))
            } else {
                StoreError::Database(e)
            }
        })?;
        Ok(())
    }

    async fn get(&self, task_id: &str) -> StoreResult<Option<SettlementTask>> {
        let row = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM settlement_tasks_tb WHERE task_id = $1"
        ))
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_task).transpose()
    }

    async fn update_state_if(
        &self,
        task_id: &str,
        expected: SettlementState,
        new: SettlementState,
        error: Option<&str>,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE settlement_tasks_tb
            SET state = $1,
                error_message = COALESCE($2, error_message),
                auth_token = CASE WHEN $3 THEN NULL ELSE auth_token END,
                updated_at = NOW()
            WHERE task_id = $4 AND state = $5
            "#,
        )
        .bind(new.id())
        .bind(error)
        .bind(new.is_terminal())
        .bind(task_id)
        .bind(expected.id())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn increment_retry(&self, task_id: &str) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE settlement_tasks_tb
            SET retry_count = retry_count + 1, updated_at = NOW()
            WHERE task_id = $1
            "#,
        )
        .bind(task_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_stale(
        &self,
        stale_after: Duration,
        limit: usize,
    ) -> StoreResult<Vec<SettlementTask>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {TASK_COLUMNS} FROM settlement_tasks_tb
            WHERE state = ANY($1)
              AND updated_at <= NOW() - make_interval(secs => $2)
            ORDER BY updated_at
            LIMIT $3
            "#
        ))
        .bind(SettlementState::pending_ids().to_vec())
        .bind(stale_after.as_secs_f64())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_task).collect()
    }
}
