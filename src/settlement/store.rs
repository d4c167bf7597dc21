//! Settlement Store
//!
//! PostgreSQL persistence for settlement transactions. Mutating queries are
//! CAS-guarded on the expected status and must run on a connection handed out
//! by the retry layer; locking readers use `SELECT ... FOR UPDATE` so
//! concurrent mutators of one record serialize at the row.

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{PgConnection, Row, postgres::PgRow};

use super::status::SettlementStatus;
use super::types::{HoldReason, OrderLine, SellerAccount, SettlementId, SettlementRecord};

/// Settlement database operations
pub struct SettlementDb;

/// One timestamped line for the append-only notes column
pub fn note_line(message: &str) -> String {
    format!(
        "[{}] {}\n",
        Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        message
    )
}

const RECORD_COLUMNS: &str = r#"
    settlement_id, order_id, seller_id, buyer_id,
    gross_minor, platform_fee_minor, gateway_fee_minor, net_minor, currency,
    status, hold_reason, hold_start_at, planned_release_at, actual_release_at,
    transfer_ref, payment_intent_ref, checkout_session_ref,
    payed_out, needs_review, notes, metadata, created_at, updated_at
"#;

impl SettlementDb {
    /// Insert a new record. Idempotent on the (order, seller) pair: returns
    /// false if a record for that pair already exists.
    pub async fn insert(
        conn: &mut PgConnection,
        record: &SettlementRecord,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO settlements_tb
                (settlement_id, order_id, seller_id, buyer_id,
                 gross_minor, platform_fee_minor, gateway_fee_minor, net_minor, currency,
                 status, hold_reason, hold_start_at, planned_release_at, actual_release_at,
                 transfer_ref, payment_intent_ref, checkout_session_ref,
                 payed_out, needs_review, notes, metadata, created_at, updated_at)
            VALUES
                ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14,
                 $15, $16, $17, $18, $19, $20, $21, NOW(), NOW())
            ON CONFLICT (order_id, seller_id) DO NOTHING
            "#,
        )
        .bind(record.settlement_id.to_string())
        .bind(record.order_id)
        .bind(record.seller_id)
        .bind(record.buyer_id)
        .bind(record.gross_minor)
        .bind(record.platform_fee_minor)
        .bind(record.gateway_fee_minor)
        .bind(record.net_minor)
        .bind(&record.currency)
        .bind(record.status.id())
        .bind(record.hold_reason.map(|r| r.as_str()))
        .bind(record.hold_start_at)
        .bind(record.planned_release_at)
        .bind(record.actual_release_at)
        .bind(&record.transfer_ref)
        .bind(&record.payment_intent_ref)
        .bind(&record.checkout_session_ref)
        .bind(record.payed_out)
        .bind(record.needs_review)
        .bind(&record.notes)
        .bind(&record.metadata)
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Get a record without locking (reads/reporting)
    pub async fn get(
        conn: &mut PgConnection,
        settlement_id: SettlementId,
    ) -> Result<Option<SettlementRecord>, sqlx::Error> {
        let row = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM settlements_tb WHERE settlement_id = $1"
        ))
        .bind(settlement_id.to_string())
        .fetch_optional(&mut *conn)
        .await?;

        row.map(|r| row_to_record(&r)).transpose()
    }

    /// Lock a record for update; the current status must be re-read through
    /// this before any transition
    pub async fn lock(
        conn: &mut PgConnection,
        settlement_id: SettlementId,
    ) -> Result<Option<SettlementRecord>, sqlx::Error> {
        let row = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM settlements_tb WHERE settlement_id = $1 FOR UPDATE"
        ))
        .bind(settlement_id.to_string())
        .fetch_optional(&mut *conn)
        .await?;

        row.map(|r| row_to_record(&r)).transpose()
    }

    /// Lock every record of an order (cancellation, refunds by order)
    pub async fn lock_by_order(
        conn: &mut PgConnection,
        order_id: i64,
    ) -> Result<Vec<SettlementRecord>, sqlx::Error> {
        let rows = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM settlements_tb
             WHERE order_id = $1 ORDER BY settlement_id FOR UPDATE"
        ))
        .bind(order_id)
        .fetch_all(&mut *conn)
        .await?;

        rows.iter().map(row_to_record).collect()
    }

    /// Lock records by the payment-intent idempotency anchor
    pub async fn lock_by_payment_intent(
        conn: &mut PgConnection,
        payment_intent_ref: &str,
    ) -> Result<Vec<SettlementRecord>, sqlx::Error> {
        let rows = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM settlements_tb
             WHERE payment_intent_ref = $1 ORDER BY settlement_id FOR UPDATE"
        ))
        .bind(payment_intent_ref)
        .fetch_all(&mut *conn)
        .await?;

        rows.iter().map(row_to_record).collect()
    }

    /// Lock the record carrying an external transfer reference
    pub async fn lock_by_transfer_ref(
        conn: &mut PgConnection,
        transfer_ref: &str,
    ) -> Result<Option<SettlementRecord>, sqlx::Error> {
        let row = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM settlements_tb WHERE transfer_ref = $1 FOR UPDATE"
        ))
        .bind(transfer_ref)
        .fetch_optional(&mut *conn)
        .await?;

        row.map(|r| row_to_record(&r)).transpose()
    }

    /// Generic CAS transition appending a note. Returns false if the record
    /// was not in `expected` (another mutator won the race).
    pub async fn update_status_if(
        conn: &mut PgConnection,
        settlement_id: SettlementId,
        expected: SettlementStatus,
        new: SettlementStatus,
        note: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE settlements_tb
            SET status = $1, notes = notes || $2, updated_at = NOW()
            WHERE settlement_id = $3 AND status = $4
            "#,
        )
        .bind(new.id())
        .bind(note_line(note))
        .bind(settlement_id.to_string())
        .bind(expected.id())
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// PENDING -> HELD: start the hold clock and record the idempotency
    /// anchors from the confirming payment event
    #[allow(clippy::too_many_arguments)]
    pub async fn mark_held(
        conn: &mut PgConnection,
        settlement_id: SettlementId,
        payment_intent_ref: &str,
        checkout_session_ref: Option<&str>,
        hold_start_at: DateTime<Utc>,
        planned_release_at: DateTime<Utc>,
        reason: HoldReason,
        note: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE settlements_tb
            SET status = $1, hold_reason = $2, hold_start_at = $3, planned_release_at = $4,
                payment_intent_ref = $5,
                checkout_session_ref = COALESCE($6, checkout_session_ref),
                notes = notes || $7, updated_at = NOW()
            WHERE settlement_id = $8 AND status = $9
            "#,
        )
        .bind(SettlementStatus::Held.id())
        .bind(reason.as_str())
        .bind(hold_start_at)
        .bind(planned_release_at)
        .bind(payment_intent_ref)
        .bind(checkout_session_ref)
        .bind(note_line(note))
        .bind(settlement_id.to_string())
        .bind(SettlementStatus::Pending.id())
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// HELD -> DISPUTED: record the dispute hold reason with the transition
    pub async fn mark_disputed(
        conn: &mut PgConnection,
        settlement_id: SettlementId,
        note: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE settlements_tb
            SET status = $1, hold_reason = $2, notes = notes || $3, updated_at = NOW()
            WHERE settlement_id = $4 AND status = $5
            "#,
        )
        .bind(SettlementStatus::Disputed.id())
        .bind(HoldReason::Dispute.as_str())
        .bind(note_line(note))
        .bind(settlement_id.to_string())
        .bind(SettlementStatus::Held.id())
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// DISPUTED -> HELD: dispute resolved in the seller's favor
    pub async fn resolve_dispute(
        conn: &mut PgConnection,
        settlement_id: SettlementId,
        note: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE settlements_tb
            SET status = $1, hold_reason = $2, notes = notes || $3, updated_at = NOW()
            WHERE settlement_id = $4 AND status = $5
            "#,
        )
        .bind(SettlementStatus::Held.id())
        .bind(HoldReason::StandardHold.as_str())
        .bind(note_line(note))
        .bind(settlement_id.to_string())
        .bind(SettlementStatus::Disputed.id())
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// HELD -> PROCESSING: persist the transfer reference atomically with the
    /// status change (single write, never split across two commits)
    pub async fn mark_processing(
        conn: &mut PgConnection,
        settlement_id: SettlementId,
        transfer_ref: &str,
        note: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE settlements_tb
            SET status = $1, transfer_ref = $2, notes = notes || $3, updated_at = NOW()
            WHERE settlement_id = $4 AND status = $5
            "#,
        )
        .bind(SettlementStatus::Processing.id())
        .bind(transfer_ref)
        .bind(note_line(note))
        .bind(settlement_id.to_string())
        .bind(SettlementStatus::Held.id())
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// PROCESSING -> RELEASED/COMPLETED: transfer confirmed
    pub async fn mark_released(
        conn: &mut PgConnection,
        settlement_id: SettlementId,
        target: SettlementStatus,
        released_at: DateTime<Utc>,
        note: &str,
    ) -> Result<bool, sqlx::Error> {
        debug_assert!(target.is_released());
        let result = sqlx::query(
            r#"
            UPDATE settlements_tb
            SET status = $1, actual_release_at = $2, notes = notes || $3, updated_at = NOW()
            WHERE settlement_id = $4 AND status = $5
            "#,
        )
        .bind(target.id())
        .bind(released_at)
        .bind(note_line(note))
        .bind(settlement_id.to_string())
        .bind(SettlementStatus::Processing.id())
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// PROCESSING -> HELD: transfer failed recoverably. Clears the transfer
    /// reference; hold timers are left untouched so the record stays eligible
    /// for retry.
    pub async fn return_to_held(
        conn: &mut PgConnection,
        settlement_id: SettlementId,
        note: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE settlements_tb
            SET status = $1, transfer_ref = NULL, notes = notes || $2, updated_at = NOW()
            WHERE settlement_id = $3 AND status = $4
            "#,
        )
        .bind(SettlementStatus::Held.id())
        .bind(note_line(note))
        .bind(settlement_id.to_string())
        .bind(SettlementStatus::Processing.id())
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Flag a record for manual reconciliation (stuck in PROCESSING)
    pub async fn set_needs_review(
        conn: &mut PgConnection,
        settlement_id: SettlementId,
        note: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE settlements_tb
            SET needs_review = TRUE, notes = notes || $1, updated_at = NOW()
            WHERE settlement_id = $2 AND needs_review = FALSE
            "#,
        )
        .bind(note_line(note))
        .bind(settlement_id.to_string())
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Set or clear the payed_out marker on a batch of records
    pub async fn set_payed_out(
        conn: &mut PgConnection,
        settlement_ids: &[SettlementId],
        payed_out: bool,
    ) -> Result<u64, sqlx::Error> {
        let ids: Vec<String> = settlement_ids.iter().map(|id| id.to_string()).collect();
        let result = sqlx::query(
            r#"
            UPDATE settlements_tb
            SET payed_out = $1, updated_at = NOW()
            WHERE settlement_id = ANY($2)
            "#,
        )
        .bind(payed_out)
        .bind(&ids)
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected())
    }

    /// Held records whose hold period has elapsed (release sweep)
    pub async fn release_due(
        conn: &mut PgConnection,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<SettlementId>, sqlx::Error> {
        Self::ids_where(
            conn,
            "status = $1 AND planned_release_at IS NOT NULL AND planned_release_at <= $2
             ORDER BY planned_release_at ASC LIMIT $3",
            SettlementStatus::Held,
            now,
            limit,
        )
        .await
    }

    /// Processing records with no confirmation since before `cutoff`
    /// (manual-reconciliation sweep)
    pub async fn stuck_processing(
        conn: &mut PgConnection,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<SettlementId>, sqlx::Error> {
        Self::ids_where(
            conn,
            "status = $1 AND needs_review = FALSE AND updated_at < $2
             ORDER BY updated_at ASC LIMIT $3",
            SettlementStatus::Processing,
            cutoff,
            limit,
        )
        .await
    }

    /// Pending records older than `cutoff` (payment-timeout sweep)
    pub async fn expired_pending(
        conn: &mut PgConnection,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<SettlementId>, sqlx::Error> {
        Self::ids_where(
            conn,
            "status = $1 AND created_at < $2 ORDER BY created_at ASC LIMIT $3",
            SettlementStatus::Pending,
            cutoff,
            limit,
        )
        .await
    }

    async fn ids_where(
        conn: &mut PgConnection,
        predicate: &str,
        status: SettlementStatus,
        at: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<SettlementId>, sqlx::Error> {
        let rows = sqlx::query(&format!(
            "SELECT settlement_id FROM settlements_tb WHERE {predicate}"
        ))
        .bind(status.id())
        .bind(at)
        .bind(limit)
        .fetch_all(&mut *conn)
        .await?;

        rows.iter()
            .map(|row| parse_id(row.try_get::<String, _>("settlement_id")?.as_str()))
            .collect()
    }

    /// Lock released-but-unpaid records of one seller in one currency
    /// (payout grouping)
    pub async fn lock_released_unpaid(
        conn: &mut PgConnection,
        seller_id: i64,
        currency: &str,
    ) -> Result<Vec<SettlementRecord>, sqlx::Error> {
        let rows = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM settlements_tb
             WHERE seller_id = $1 AND currency = $2 AND status IN ($3, $4)
               AND payed_out = FALSE
             ORDER BY settlement_id FOR UPDATE"
        ))
        .bind(seller_id)
        .bind(currency)
        .bind(SettlementStatus::Released.id())
        .bind(SettlementStatus::Completed.id())
        .fetch_all(&mut *conn)
        .await?;

        rows.iter().map(row_to_record).collect()
    }
}

/// Seller boundary-table operations
pub struct SellerDb;

impl SellerDb {
    pub async fn get(
        conn: &mut PgConnection,
        seller_id: i64,
    ) -> Result<Option<SellerAccount>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT seller_id, account_ref, details_submitted, charges_enabled, default_currency
            FROM sellers_tb WHERE seller_id = $1
            "#,
        )
        .bind(seller_id)
        .fetch_optional(&mut *conn)
        .await?;

        row.map(|r| row_to_seller(&r)).transpose()
    }

    pub async fn find_by_account_ref(
        conn: &mut PgConnection,
        account_ref: &str,
    ) -> Result<Option<SellerAccount>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT seller_id, account_ref, details_submitted, charges_enabled, default_currency
            FROM sellers_tb WHERE account_ref = $1
            "#,
        )
        .bind(account_ref)
        .fetch_optional(&mut *conn)
        .await?;

        row.map(|r| row_to_seller(&r)).transpose()
    }

    /// Mirror the gateway's connected-account status (account-updated webhook)
    pub async fn update_account_status(
        conn: &mut PgConnection,
        account_ref: &str,
        details_submitted: bool,
        charges_enabled: bool,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE sellers_tb
            SET details_submitted = $1, charges_enabled = $2, updated_at = NOW()
            WHERE account_ref = $3
            "#,
        )
        .bind(details_submitted)
        .bind(charges_enabled)
        .bind(account_ref)
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

/// Order boundary-table operations (read-only)
pub struct OrderDb;

impl OrderDb {
    /// Per-seller lines of an order, the fan-out input for payment confirmation
    pub async fn lines(
        conn: &mut PgConnection,
        order_id: i64,
    ) -> Result<Vec<OrderLine>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT order_id, seller_id, buyer_id, gross_minor, currency, description
            FROM order_lines_tb WHERE order_id = $1 ORDER BY seller_id
            "#,
        )
        .bind(order_id)
        .fetch_all(&mut *conn)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(OrderLine {
                    order_id: row.try_get("order_id")?,
                    seller_id: row.try_get("seller_id")?,
                    buyer_id: row.try_get("buyer_id")?,
                    gross_minor: row.try_get("gross_minor")?,
                    currency: row.try_get("currency")?,
                    description: row.try_get("description")?,
                })
            })
            .collect()
    }
}

fn parse_id(s: &str) -> Result<SettlementId, sqlx::Error> {
    s.parse()
        .map_err(|e| sqlx::Error::Decode(format!("invalid settlement id {s:?}: {e}").into()))
}

fn row_to_record(row: &PgRow) -> Result<SettlementRecord, sqlx::Error> {
    let settlement_id = parse_id(row.try_get::<String, _>("settlement_id")?.as_str())?;

    let status_id: i16 = row.try_get("status")?;
    let status = SettlementStatus::from_id(status_id)
        .ok_or_else(|| sqlx::Error::Decode(format!("invalid status id {status_id}").into()))?;

    let hold_reason = row
        .try_get::<Option<String>, _>("hold_reason")?
        .and_then(|s| HoldReason::from_name(&s));

    Ok(SettlementRecord {
        settlement_id,
        order_id: row.try_get("order_id")?,
        seller_id: row.try_get("seller_id")?,
        buyer_id: row.try_get("buyer_id")?,
        gross_minor: row.try_get("gross_minor")?,
        platform_fee_minor: row.try_get("platform_fee_minor")?,
        gateway_fee_minor: row.try_get("gateway_fee_minor")?,
        net_minor: row.try_get("net_minor")?,
        currency: row.try_get("currency")?,
        status,
        hold_reason,
        hold_start_at: row.try_get("hold_start_at")?,
        planned_release_at: row.try_get("planned_release_at")?,
        actual_release_at: row.try_get("actual_release_at")?,
        transfer_ref: row.try_get("transfer_ref")?,
        payment_intent_ref: row.try_get("payment_intent_ref")?,
        checkout_session_ref: row.try_get("checkout_session_ref")?,
        payed_out: row.try_get("payed_out")?,
        needs_review: row.try_get("needs_review")?,
        notes: row.try_get("notes")?,
        metadata: row.try_get("metadata")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_seller(row: &PgRow) -> Result<SellerAccount, sqlx::Error> {
    Ok(SellerAccount {
        seller_id: row.try_get("seller_id")?,
        account_ref: row.try_get("account_ref")?,
        details_submitted: row.try_get("details_submitted")?,
        charges_enabled: row.try_get("charges_enabled")?,
        default_currency: row.try_get("default_currency")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_note_line_format() {
        let line = note_line("transfer requested");
        assert!(line.starts_with('['));
        assert!(line.ends_with("transfer requested\n"));
    }

    #[test]
    fn test_parse_id_rejects_garbage() {
        assert!(parse_id("not-a-ulid").is_err());
        let id = SettlementId::new();
        assert_eq!(parse_id(&id.to_string()).unwrap(), id);
    }
}
