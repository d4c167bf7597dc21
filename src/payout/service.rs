//! Payout Service
//!
//! Grouping of released settlements into payout batches and reconciliation of
//! payout webhooks, all under the transactional retry layer.

use std::str::FromStr;
use tracing::{info, warn};

use super::store::PayoutDb;
use super::types::{Payout, PayoutId, PayoutItem, PayoutStatus};
use crate::config::RetryConfig;
use crate::db::{Database, IsolationLevel};
use crate::settlement::{ApplyOutcome, SettlementDb, SettlementError, SettlementId, SellerDb};

/// Inbound payout notification, already parsed at the webhook boundary
#[derive(Debug, Clone)]
pub struct PayoutNotice {
    /// External payout reference
    pub payout_ref: String,
    /// Gateway status string (`pending`, `in_transit`, `paid`, `failed`, `canceled`)
    pub status: String,
    pub currency: Option<String>,
    /// Destination connected-account reference, when the gateway includes it
    pub destination: Option<String>,
    pub arrival_date: Option<chrono::DateTime<chrono::Utc>>,
    pub failure_code: Option<String>,
    pub failure_message: Option<String>,
}

pub struct PayoutService {
    db: Database,
    retry: RetryConfig,
}

impl PayoutService {
    pub fn new(db: Database, retry: RetryConfig) -> Self {
        Self { db, retry }
    }

    /// Group a seller's released-but-unpaid settlements into a payout batch.
    ///
    /// Returns None when there is nothing to group. Included settlements are
    /// marked `payed_out` in the same transaction that copies their audit
    /// items, so a concurrent grouping cannot double-include them.
    pub async fn create_payout(
        &self,
        seller_id: i64,
        currency: &str,
    ) -> Result<Option<(Payout, Vec<PayoutItem>)>, SettlementError> {
        let currency = currency.to_string();
        self.db
            .run_in_transaction(IsolationLevel::Serializable, self.retry, move |conn| {
                let currency = currency.clone();
                Box::pin(async move {
                    let settlements =
                        SettlementDb::lock_released_unpaid(conn, seller_id, &currency).await?;
                    if settlements.is_empty() {
                        return Ok(None);
                    }

                    let payout_id = PayoutId::new();
                    let payout = PayoutDb::insert_batch(
                        conn,
                        payout_id,
                        seller_id,
                        &currency,
                        None,
                        PayoutStatus::Pending,
                        &settlements,
                    )
                    .await?;

                    let ids: Vec<SettlementId> =
                        settlements.iter().map(|s| s.settlement_id).collect();
                    SettlementDb::set_payed_out(conn, &ids, true).await?;

                    let items = PayoutDb::items(conn, payout_id).await?;
                    info!(
                        payout_id = %payout_id,
                        seller_id,
                        total_minor = payout.total_minor,
                        items = items.len(),
                        "Payout batch grouped"
                    );
                    Ok(Some((payout, items)))
                })
            })
            .await
    }

    /// Apply a payout webhook. Idempotent: a redelivered status is a no-op.
    ///
    /// A failed batch resets `payed_out` on every included settlement so they
    /// become eligible for a future payout; the audit items stay untouched.
    pub async fn apply_payout_notice(
        &self,
        notice: &PayoutNotice,
    ) -> Result<ApplyOutcome, SettlementError> {
        let Some(new_status) = PayoutStatus::from_gateway(&notice.status) else {
            warn!(payout_ref = %notice.payout_ref, status = %notice.status, "Unknown payout status");
            return Ok(ApplyOutcome::Unmatched);
        };

        let notice = notice.clone();
        self.db
            .run_in_transaction(IsolationLevel::Serializable, self.retry, move |conn| {
                let notice = notice.clone();
                Box::pin(async move {
                    let payout = match PayoutDb::lock_by_ref(conn, &notice.payout_ref).await? {
                        Some(p) => p,
                        None => match Self::adopt(conn, &notice, new_status).await? {
                            Some(p) => p,
                            None => {
                                info!(
                                    payout_ref = %notice.payout_ref,
                                    "Payout event matched no local batch, acknowledged"
                                );
                                return Ok(ApplyOutcome::Unmatched);
                            }
                        },
                    };

                    if payout.status == new_status {
                        return Ok(ApplyOutcome::Duplicate);
                    }

                    PayoutDb::update_status(
                        conn,
                        payout.payout_id,
                        new_status,
                        notice.arrival_date,
                        notice.failure_code.as_deref(),
                        notice.failure_message.as_deref(),
                    )
                    .await?;

                    if new_status == PayoutStatus::Failed {
                        let raw_ids = PayoutDb::settlement_ids(conn, payout.payout_id).await?;
                        let ids: Vec<SettlementId> = raw_ids
                            .iter()
                            .filter_map(|s| SettlementId::from_str(s).ok())
                            .collect();
                        let reset = SettlementDb::set_payed_out(conn, &ids, false).await?;
                        warn!(
                            payout_id = %payout.payout_id,
                            payout_ref = %notice.payout_ref,
                            reset,
                            failure_code = ?notice.failure_code,
                            "Payout failed; settlements returned to eligible pool"
                        );
                    } else {
                        info!(
                            payout_id = %payout.payout_id,
                            status = %new_status,
                            "Payout status updated"
                        );
                    }

                    Ok(ApplyOutcome::Applied)
                })
            })
            .await
    }

    /// Adopt a gateway-announced payout with no local batch yet: attach its
    /// ref to an unreferenced pending batch, or group one on the fly. Failure
    /// events are never adopted; there is nothing local to reset.
    async fn adopt(
        conn: &mut sqlx::PgConnection,
        notice: &PayoutNotice,
        new_status: PayoutStatus,
    ) -> Result<Option<Payout>, SettlementError> {
        if matches!(new_status, PayoutStatus::Failed | PayoutStatus::Canceled) {
            return Ok(None);
        }
        let (Some(destination), Some(currency)) = (&notice.destination, &notice.currency) else {
            return Ok(None);
        };
        let Some(seller) = SellerDb::find_by_account_ref(conn, destination).await? else {
            return Ok(None);
        };

        if let Some(pending) =
            PayoutDb::lock_unreferenced_pending(conn, seller.seller_id, currency).await?
        {
            PayoutDb::attach_ref(conn, pending.payout_id, &notice.payout_ref).await?;
            return Ok(Some(pending));
        }

        let settlements =
            SettlementDb::lock_released_unpaid(conn, seller.seller_id, currency).await?;
        if settlements.is_empty() {
            return Ok(None);
        }

        let payout_id = PayoutId::new();
        let payout = PayoutDb::insert_batch(
            conn,
            payout_id,
            seller.seller_id,
            currency,
            Some(&notice.payout_ref),
            PayoutStatus::Pending,
            &settlements,
        )
        .await?;
        let ids: Vec<SettlementId> = settlements.iter().map(|s| s.settlement_id).collect();
        SettlementDb::set_payed_out(conn, &ids, true).await?;

        info!(
            payout_id = %payout_id,
            payout_ref = %notice.payout_ref,
            seller_id = seller.seller_id,
            "Adopted gateway payout into a new local batch"
        );
        Ok(Some(payout))
    }

    /// Payouts with items for one seller (reporting)
    pub async fn list_for_seller(
        &self,
        seller_id: i64,
        limit: i64,
    ) -> Result<Vec<(Payout, Vec<PayoutItem>)>, SettlementError> {
        self.db
            .run_in_transaction(IsolationLevel::ReadCommitted, self.retry, move |conn| {
                Box::pin(async move {
                    let payouts = PayoutDb::list_for_seller(conn, seller_id, limit).await?;
                    let mut out = Vec::with_capacity(payouts.len());
                    for payout in payouts {
                        let items = PayoutDb::items(conn, payout.payout_id).await?;
                        out.push((payout, items));
                    }
                    Ok(out)
                })
            })
            .await
    }
}
