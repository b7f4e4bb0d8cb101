//! PostgreSQL schema
//!
//! Every statement is idempotent and runs at startup.

use sqlx::PgPool;

pub const CREATE_ORDERS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS orders_tb (
    id              BIGSERIAL PRIMARY KEY,
    user_id         BIGINT NOT NULL,
    trading_pair    VARCHAR(32) NOT NULL,
    side            VARCHAR(8) NOT NULL,
    is_maker        BOOLEAN NOT NULL DEFAULT FALSE,
    price           NUMERIC(36, 18) NOT NULL,
    amount          NUMERIC(36, 18) NOT NULL,
    filled_amount   NUMERIC(36, 18) NOT NULL DEFAULT 0,
    currency        VARCHAR(16) NOT NULL DEFAULT '',
    status          VARCHAR(32) NOT NULL,
    bank_id         BIGINT,
    expiration_time TIMESTAMPTZ,
    created_at      TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at      TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

pub const CREATE_ORDERS_BOOK_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_orders_book
    ON orders_tb (trading_pair, side, status, price)
"#;

pub const CREATE_ESCROWS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS escrows_tb (
    id          BIGSERIAL PRIMARY KEY,
    order_id    BIGINT NOT NULL UNIQUE REFERENCES orders_tb (id),
    amount      NUMERIC(36, 18) NOT NULL,
    status      VARCHAR(32) NOT NULL,
    created_at  TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at  TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

pub const CREATE_PAYMENT_SETTINGS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS payment_settings_tb (
    id              BIGSERIAL PRIMARY KEY,
    order_id        BIGINT NOT NULL REFERENCES orders_tb (id),
    seller_id       BIGINT NOT NULL,
    remark          TEXT NOT NULL,
    signature       TEXT NOT NULL,
    payment_method  VARCHAR(32) NOT NULL,
    UNIQUE (order_id, seller_id)
)
"#;

pub const CREATE_BOOKINGS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS bookings_tb (
    id          BIGSERIAL PRIMARY KEY,
    order_id    BIGINT NOT NULL REFERENCES orders_tb (id),
    buyer_id    BIGINT NOT NULL,
    seller_id   BIGINT NOT NULL,
    created_at  TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

pub const CREATE_HISTORY_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS history_tb (
    id              BIGSERIAL PRIMARY KEY,
    kind            VARCHAR(16) NOT NULL,
    quantity        NUMERIC(36, 18) NOT NULL,
    price           NUMERIC(36, 18) NOT NULL,
    fee             NUMERIC(36, 18) NOT NULL,
    asset_id        VARCHAR(32) NOT NULL,
    user_id         BIGINT NOT NULL,
    payment_method  VARCHAR(32) NOT NULL,
    reference       VARCHAR(96) UNIQUE,
    created_at      TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at      TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

pub const CREATE_WALLETS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS wallets_tb (
    id          BIGSERIAL PRIMARY KEY,
    user_id     BIGINT NOT NULL,
    asset       VARCHAR(32) NOT NULL,
    balance     NUMERIC(36, 18) NOT NULL DEFAULT 0,
    fill_amount NUMERIC(36, 18) NOT NULL DEFAULT 0,
    address     VARCHAR(128) NOT NULL UNIQUE,
    version     BIGINT NOT NULL DEFAULT 0,
    created_at  TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at  TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    UNIQUE (user_id, asset)
)
"#;

pub const CREATE_WALLET_OPS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS wallet_ops_tb (
    op_key      VARCHAR(96) PRIMARY KEY,
    wallet_id   BIGINT NOT NULL REFERENCES wallets_tb (id),
    applied_at  TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

pub const CREATE_SETTLEMENT_TASKS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS settlement_tasks_tb (
    task_id         VARCHAR(26) PRIMARY KEY,
    seller_id       BIGINT NOT NULL,
    buyer_id        BIGINT NOT NULL,
    asset           VARCHAR(32) NOT NULL,
    amount          NUMERIC(36, 18) NOT NULL,
    price           NUMERIC(36, 18) NOT NULL,
    platform_fee    NUMERIC(36, 18) NOT NULL,
    currency        VARCHAR(16) NOT NULL,
    payment_method  VARCHAR(32) NOT NULL,
    buyer_address   VARCHAR(128) NOT NULL,
    auth_token      TEXT,
    state           SMALLINT NOT NULL,
    error_message   TEXT,
    retry_count     INT NOT NULL DEFAULT 0,
    created_at      TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at      TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

pub const CREATE_SETTLEMENT_STALE_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_settlement_tasks_stale
    ON settlement_tasks_tb (state, updated_at)
"#;

const STATEMENTS: [(&str, &str); 10] = [
    ("orders_tb", CREATE_ORDERS_TABLE),
    ("idx_orders_book", CREATE_ORDERS_BOOK_INDEX),
    ("escrows_tb", CREATE_ESCROWS_TABLE),
    ("payment_settings_tb", CREATE_PAYMENT_SETTINGS_TABLE),
    ("bookings_tb", CREATE_BOOKINGS_TABLE),
    ("history_tb", CREATE_HISTORY_TABLE),
    ("wallets_tb", CREATE_WALLETS_TABLE),
    ("wallet_ops_tb", CREATE_WALLET_OPS_TABLE),
    ("settlement_tasks_tb", CREATE_SETTLEMENT_TASKS_TABLE),
    ("idx_settlement_tasks_stale", CREATE_SETTLEMENT_STALE_INDEX),
];

/// Create all tables and indexes if missing
pub async fn init_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    tracing::info!("Initializing PostgreSQL schema...");
    for (name, statement) in STATEMENTS {
        sqlx::query(statement).execute(pool).await.map_err(|e| {
            tracing::error!(object = name, error = %e, "Failed to create schema object");
            e
        })?;
    }
    tracing::info!("PostgreSQL schema ready");
    Ok(())
}
