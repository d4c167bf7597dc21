//! PostgreSQL schema bootstrap
//!
//! Issues idempotent DDL at startup. Settlement records are append-only in
//! spirit: no DELETE path exists anywhere in the engine, and the fee
//! invariant is double-checked by the database itself.

use sqlx::PgPool;

const CREATE_SETTLEMENTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS settlements_tb (
    settlement_id        TEXT PRIMARY KEY,
    order_id             BIGINT NOT NULL,
    seller_id            BIGINT NOT NULL,
    buyer_id             BIGINT NOT NULL,
    gross_minor          BIGINT NOT NULL,
    platform_fee_minor   BIGINT NOT NULL,
    gateway_fee_minor    BIGINT NOT NULL,
    net_minor            BIGINT NOT NULL,
    currency             TEXT NOT NULL,
    status               SMALLINT NOT NULL,
    hold_reason          TEXT,
    hold_start_at        TIMESTAMPTZ,
    planned_release_at   TIMESTAMPTZ,
    actual_release_at    TIMESTAMPTZ,
    transfer_ref         TEXT,
    payment_intent_ref   TEXT,
    checkout_session_ref TEXT,
    payed_out            BOOLEAN NOT NULL DEFAULT FALSE,
    needs_review         BOOLEAN NOT NULL DEFAULT FALSE,
    notes                TEXT NOT NULL DEFAULT '',
    metadata             JSONB,
    created_at           TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at           TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    UNIQUE (order_id, seller_id),
    CHECK (net_minor >= 0),
    CHECK (net_minor = gross_minor - platform_fee_minor - gateway_fee_minor),
    CHECK ((hold_start_at IS NULL) = (planned_release_at IS NULL))
)
"#;

const CREATE_SETTLEMENTS_INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_settlements_payment_intent
     ON settlements_tb (payment_intent_ref)",
    "CREATE INDEX IF NOT EXISTS idx_settlements_checkout_session
     ON settlements_tb (checkout_session_ref)",
    "CREATE INDEX IF NOT EXISTS idx_settlements_transfer_ref
     ON settlements_tb (transfer_ref)",
    "CREATE INDEX IF NOT EXISTS idx_settlements_status_release
     ON settlements_tb (status, planned_release_at)",
    "CREATE INDEX IF NOT EXISTS idx_settlements_seller
     ON settlements_tb (seller_id, status, payed_out)",
];

const CREATE_PAYOUTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS payouts_tb (
    payout_id       TEXT PRIMARY KEY,
    seller_id       BIGINT NOT NULL,
    payout_ref      TEXT UNIQUE,
    currency        TEXT NOT NULL,
    total_minor     BIGINT NOT NULL,
    status          SMALLINT NOT NULL,
    arrival_date    TIMESTAMPTZ,
    failure_code    TEXT,
    failure_message TEXT,
    created_at      TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at      TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

const CREATE_PAYOUT_ITEMS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS payout_items_tb (
    item_id       BIGSERIAL PRIMARY KEY,
    payout_id     TEXT NOT NULL REFERENCES payouts_tb (payout_id),
    settlement_id TEXT NOT NULL,
    order_id      BIGINT NOT NULL,
    amount_minor  BIGINT NOT NULL,
    currency      TEXT NOT NULL,
    description   TEXT NOT NULL,
    transfer_date TIMESTAMPTZ
)
"#;

const CREATE_EXCHANGE_RATES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS exchange_rates_tb (
    rate_id     BIGSERIAL PRIMARY KEY,
    base        TEXT NOT NULL,
    target      TEXT NOT NULL,
    rate        NUMERIC(20, 10) NOT NULL,
    captured_at TIMESTAMPTZ NOT NULL,
    batch_id    BIGINT NOT NULL,
    source      TEXT NOT NULL
)
"#;

const CREATE_EXCHANGE_RATES_INDEX: &str = "CREATE INDEX IF NOT EXISTS idx_rates_batch
     ON exchange_rates_tb (batch_id, base, target)";

const CREATE_SELLERS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS sellers_tb (
    seller_id         BIGINT PRIMARY KEY,
    account_ref       TEXT UNIQUE,
    details_submitted BOOLEAN NOT NULL DEFAULT FALSE,
    charges_enabled   BOOLEAN NOT NULL DEFAULT FALSE,
    default_currency  TEXT NOT NULL DEFAULT 'USD',
    updated_at        TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

const CREATE_ORDER_LINES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS order_lines_tb (
    order_id    BIGINT NOT NULL,
    seller_id   BIGINT NOT NULL,
    buyer_id    BIGINT NOT NULL,
    gross_minor BIGINT NOT NULL,
    currency    TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    PRIMARY KEY (order_id, seller_id)
)
"#;

/// Create all settlement tables and indexes if they do not exist
pub async fn init_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    tracing::info!("Initializing settlement schema...");

    sqlx::query(CREATE_SETTLEMENTS_TABLE).execute(pool).await?;
    for ddl in CREATE_SETTLEMENTS_INDEXES {
        sqlx::query(ddl).execute(pool).await?;
    }
    sqlx::query(CREATE_PAYOUTS_TABLE).execute(pool).await?;
    sqlx::query(CREATE_PAYOUT_ITEMS_TABLE).execute(pool).await?;
    sqlx::query(CREATE_EXCHANGE_RATES_TABLE).execute(pool).await?;
    sqlx::query(CREATE_EXCHANGE_RATES_INDEX).execute(pool).await?;
    sqlx::query(CREATE_SELLERS_TABLE).execute(pool).await?;
    sqlx::query(CREATE_ORDER_LINES_TABLE).execute(pool).await?;

    tracing::info!("Settlement schema ready");
    Ok(())
}
