//! Payout Store
//!
//! Persistence for payout batches and their denormalized items. Items are
//! never deleted; a failed batch keeps its lines for audit while the included
//! settlements are released back into the eligible pool.

use chrono::{DateTime, Utc};
use sqlx::{PgConnection, Row, postgres::PgRow};

use super::types::{Payout, PayoutId, PayoutItem, PayoutStatus};
use crate::settlement::SettlementRecord;

/// Payout database operations
pub struct PayoutDb;

const PAYOUT_COLUMNS: &str = r#"
    payout_id, seller_id, payout_ref, currency, total_minor, status,
    arrival_date, failure_code, failure_message, created_at, updated_at
"#;

impl PayoutDb {
    /// Insert a payout batch with denormalized items copied from the given
    /// settlements. Totals are computed here so they always equal the item sum.
    pub async fn insert_batch(
        conn: &mut PgConnection,
        payout_id: PayoutId,
        seller_id: i64,
        currency: &str,
        payout_ref: Option<&str>,
        status: PayoutStatus,
        settlements: &[SettlementRecord],
    ) -> Result<Payout, sqlx::Error> {
        let total_minor: i64 = settlements.iter().map(|s| s.net_minor).sum();

        let row = sqlx::query(&format!(
            r#"
            INSERT INTO payouts_tb
                (payout_id, seller_id, payout_ref, currency, total_minor, status,
                 created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, NOW(), NOW())
            RETURNING {PAYOUT_COLUMNS}
            "#
        ))
        .bind(payout_id.to_string())
        .bind(seller_id)
        .bind(payout_ref)
        .bind(currency)
        .bind(total_minor)
        .bind(status.id())
        .fetch_one(&mut *conn)
        .await?;

        for settlement in settlements {
            sqlx::query(
                r#"
                INSERT INTO payout_items_tb
                    (payout_id, settlement_id, order_id, amount_minor, currency,
                     description, transfer_date)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(payout_id.to_string())
            .bind(settlement.settlement_id.to_string())
            .bind(settlement.order_id)
            .bind(settlement.net_minor)
            .bind(&settlement.currency)
            .bind(format!("Order {} settlement", settlement.order_id))
            .bind(settlement.actual_release_at)
            .execute(&mut *conn)
            .await?;
        }

        row_to_payout(&row)
    }

    /// Lock a payout by its external reference
    pub async fn lock_by_ref(
        conn: &mut PgConnection,
        payout_ref: &str,
    ) -> Result<Option<Payout>, sqlx::Error> {
        let row = sqlx::query(&format!(
            "SELECT {PAYOUT_COLUMNS} FROM payouts_tb WHERE payout_ref = $1 FOR UPDATE"
        ))
        .bind(payout_ref)
        .fetch_optional(&mut *conn)
        .await?;

        row.map(|r| row_to_payout(&r)).transpose()
    }

    /// Lock the oldest pending payout of a seller lacking an external ref.
    /// Used to adopt a gateway-announced payout into a locally grouped batch.
    pub async fn lock_unreferenced_pending(
        conn: &mut PgConnection,
        seller_id: i64,
        currency: &str,
    ) -> Result<Option<Payout>, sqlx::Error> {
        let row = sqlx::query(&format!(
            "SELECT {PAYOUT_COLUMNS} FROM payouts_tb
             WHERE seller_id = $1 AND currency = $2 AND payout_ref IS NULL AND status = $3
             ORDER BY created_at ASC LIMIT 1 FOR UPDATE"
        ))
        .bind(seller_id)
        .bind(currency)
        .bind(PayoutStatus::Pending.id())
        .fetch_optional(&mut *conn)
        .await?;

        row.map(|r| row_to_payout(&r)).transpose()
    }

    /// Attach the gateway's payout reference to a locally grouped batch
    pub async fn attach_ref(
        conn: &mut PgConnection,
        payout_id: PayoutId,
        payout_ref: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE payouts_tb
            SET payout_ref = $1, updated_at = NOW()
            WHERE payout_id = $2 AND payout_ref IS NULL
            "#,
        )
        .bind(payout_ref)
        .bind(payout_id.to_string())
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Status update from a payout webhook; CAS on the previous status
    pub async fn update_status(
        conn: &mut PgConnection,
        payout_id: PayoutId,
        new: PayoutStatus,
        arrival_date: Option<DateTime<Utc>>,
        failure_code: Option<&str>,
        failure_message: Option<&str>,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE payouts_tb
            SET status = $1, arrival_date = COALESCE($2, arrival_date),
                failure_code = COALESCE($3, failure_code),
                failure_message = COALESCE($4, failure_message),
                updated_at = NOW()
            WHERE payout_id = $5 AND status <> $1
            "#,
        )
        .bind(new.id())
        .bind(arrival_date)
        .bind(failure_code)
        .bind(failure_message)
        .bind(payout_id.to_string())
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Settlement ids included in a payout (via its audit items)
    pub async fn settlement_ids(
        conn: &mut PgConnection,
        payout_id: PayoutId,
    ) -> Result<Vec<String>, sqlx::Error> {
        let rows = sqlx::query(
            "SELECT settlement_id FROM payout_items_tb WHERE payout_id = $1 ORDER BY item_id",
        )
        .bind(payout_id.to_string())
        .fetch_all(&mut *conn)
        .await?;

        rows.iter().map(|r| r.try_get("settlement_id")).collect()
    }

    /// Items of a payout (reporting; reads only the denormalized copies)
    pub async fn items(
        conn: &mut PgConnection,
        payout_id: PayoutId,
    ) -> Result<Vec<PayoutItem>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT item_id, payout_id, settlement_id, order_id, amount_minor, currency,
                   description, transfer_date
            FROM payout_items_tb WHERE payout_id = $1 ORDER BY item_id
            "#,
        )
        .bind(payout_id.to_string())
        .fetch_all(&mut *conn)
        .await?;

        rows.iter().map(row_to_item).collect()
    }

    /// Payouts of one seller, newest first
    pub async fn list_for_seller(
        conn: &mut PgConnection,
        seller_id: i64,
        limit: i64,
    ) -> Result<Vec<Payout>, sqlx::Error> {
        let rows = sqlx::query(&format!(
            "SELECT {PAYOUT_COLUMNS} FROM payouts_tb
             WHERE seller_id = $1 ORDER BY created_at DESC LIMIT $2"
        ))
        .bind(seller_id)
        .bind(limit)
        .fetch_all(&mut *conn)
        .await?;

        rows.iter().map(row_to_payout).collect()
    }
}

fn parse_payout_id(s: &str) -> Result<PayoutId, sqlx::Error> {
    s.parse()
        .map_err(|e| sqlx::Error::Decode(format!("invalid payout id {s:?}: {e}").into()))
}

fn row_to_payout(row: &PgRow) -> Result<Payout, sqlx::Error> {
    let payout_id = parse_payout_id(row.try_get::<String, _>("payout_id")?.as_str())?;
    let status_id: i16 = row.try_get("status")?;
    let status = PayoutStatus::from_id(status_id)
        .ok_or_else(|| sqlx::Error::Decode(format!("invalid payout status {status_id}").into()))?;

    Ok(Payout {
        payout_id,
        seller_id: row.try_get("seller_id")?,
        payout_ref: row.try_get("payout_ref")?,
        currency: row.try_get("currency")?,
        total_minor: row.try_get("total_minor")?,
        status,
        arrival_date: row.try_get("arrival_date")?,
        failure_code: row.try_get("failure_code")?,
        failure_message: row.try_get("failure_message")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_item(row: &PgRow) -> Result<PayoutItem, sqlx::Error> {
    let payout_id = parse_payout_id(row.try_get::<String, _>("payout_id")?.as_str())?;
    Ok(PayoutItem {
        item_id: row.try_get("item_id")?,
        payout_id,
        settlement_id: row.try_get("settlement_id")?,
        order_id: row.try_get("order_id")?,
        amount_minor: row.try_get("amount_minor")?,
        currency: row.try_get("currency")?,
        description: row.try_get("description")?,
        transfer_date: row.try_get("transfer_date")?,
    })
}
