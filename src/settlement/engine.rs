//! Settlement Engine
//!
//! Drives the per-(order, seller) settlement lifecycle. Every mutation runs
//! inside the transactional retry layer with the target rows locked, and the
//! current status is re-read under that lock immediately before any
//! transition; callers' earlier reads are never trusted.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use super::error::SettlementError;
use super::status::SettlementStatus;
use super::store::{OrderDb, SellerDb, SettlementDb};
use super::types::{ApplyOutcome, HoldReason, SettlementId, SettlementRecord};
use crate::config::{RetryConfig, SettlementConfig};
use crate::db::{Database, IsolationLevel};
use crate::money::{self, FeeSchedule};
use crate::psp::{CreateRefund, CreateTransfer, PaymentGateway};
use crate::rates::{CurrencyBalance, RateDb, select_transfer_currency};

/// Payment confirmation extracted from the gateway event
#[derive(Debug, Clone)]
pub struct PaymentConfirmation {
    pub order_id: i64,
    pub payment_intent_ref: String,
    pub checkout_session_ref: Option<String>,
}

/// Transfer outcome notification extracted from the gateway event
#[derive(Debug, Clone)]
pub struct TransferNotice {
    pub transfer_ref: String,
    /// Settlement id echoed back through transfer metadata, when present
    pub settlement_id: Option<SettlementId>,
    pub succeeded: bool,
    /// Transfer was reversed by the gateway; the failure is unrecoverable
    pub reversed: bool,
    pub failure_message: Option<String>,
}

/// Refund outcome notification extracted from the gateway event
#[derive(Debug, Clone)]
pub struct RefundNotice {
    pub order_id: i64,
    pub refund_ref: String,
    pub succeeded: bool,
    pub failure_reason: Option<String>,
}

/// Successful release response: transfer id, final currency/amount, status
#[derive(Debug, Clone)]
pub struct ReleaseOutcome {
    pub settlement_id: SettlementId,
    pub transfer_ref: String,
    pub currency: String,
    pub amount_minor: i64,
    pub status: SettlementStatus,
}

/// Refund request response
#[derive(Debug, Clone)]
pub struct RefundOutcome {
    pub settlement_id: SettlementId,
    pub refund_ref: String,
    pub status: SettlementStatus,
}

pub struct SettlementEngine {
    db: Database,
    gateway: Arc<dyn PaymentGateway>,
    config: SettlementConfig,
    retry: RetryConfig,
}

impl SettlementEngine {
    pub fn new(
        db: Database,
        gateway: Arc<dyn PaymentGateway>,
        config: SettlementConfig,
        retry: RetryConfig,
    ) -> Self {
        Self {
            db,
            gateway,
            config,
            retry,
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    fn fee_schedule(&self) -> FeeSchedule {
        FeeSchedule {
            platform_pct: self.config.platform_fee_pct,
            gateway_pct: self.config.gateway_fee_pct,
            gateway_fixed_minor: self.config.gateway_fee_fixed_minor,
        }
    }

    /// Create PENDING records for an order ahead of payment confirmation.
    /// Idempotent on the (order, seller) pairs.
    pub async fn register_order(
        &self,
        order_id: i64,
    ) -> Result<Vec<SettlementId>, SettlementError> {
        let schedule = self.fee_schedule();
        self.db
            .run_in_transaction(IsolationLevel::Serializable, self.retry, move |conn| {
                let schedule = schedule.clone();
                Box::pin(async move {
                    let existing = SettlementDb::lock_by_order(conn, order_id).await?;
                    if !existing.is_empty() {
                        return Ok(existing.iter().map(|r| r.settlement_id).collect());
                    }

                    let lines = OrderDb::lines(conn, order_id).await?;
                    if lines.is_empty() {
                        return Err(SettlementError::OrderNotFound(order_id));
                    }

                    let mut ids = Vec::with_capacity(lines.len());
                    for line in &lines {
                        let fees = schedule.split(line.gross_minor)?;
                        let record = SettlementRecord::new_pending(
                            line.order_id,
                            line.seller_id,
                            line.buyer_id,
                            fees,
                            &line.currency,
                            None,
                            None,
                        );
                        SettlementDb::insert(conn, &record).await?;
                        ids.push(record.settlement_id);
                    }
                    info!(order_id, sellers = ids.len(), "Settlements registered for order");
                    Ok(ids)
                })
            })
            .await
    }

    /// Apply a confirmed buyer payment: fan out one HELD settlement per
    /// seller in the order, starting the hold clock.
    ///
    /// Idempotent on the payment-intent anchor; a redelivered confirmation
    /// returns `Duplicate` without touching state.
    pub async fn confirm_payment(
        &self,
        confirmation: &PaymentConfirmation,
    ) -> Result<(ApplyOutcome, Vec<SettlementId>), SettlementError> {
        let confirmation = confirmation.clone();
        let schedule = self.fee_schedule();
        let hold = self.config.hold_duration();

        self.db
            .run_in_transaction(IsolationLevel::Serializable, self.retry, move |conn| {
                let confirmation = confirmation.clone();
                let schedule = schedule.clone();
                Box::pin(async move {
                    // Anchor check first: the same intent must never fan out twice
                    let matched =
                        SettlementDb::lock_by_payment_intent(conn, &confirmation.payment_intent_ref)
                            .await?;
                    if !matched.is_empty() {
                        debug!(
                            payment_intent = %confirmation.payment_intent_ref,
                            "Payment confirmation already applied"
                        );
                        return Ok((
                            ApplyOutcome::Duplicate,
                            matched.iter().map(|r| r.settlement_id).collect(),
                        ));
                    }

                    let mut records =
                        SettlementDb::lock_by_order(conn, confirmation.order_id).await?;
                    if records.is_empty() {
                        let lines = OrderDb::lines(conn, confirmation.order_id).await?;
                        if lines.is_empty() {
                            return Err(SettlementError::OrderNotFound(confirmation.order_id));
                        }
                        for line in &lines {
                            let fees = schedule.split(line.gross_minor)?;
                            let record = SettlementRecord::new_pending(
                                line.order_id,
                                line.seller_id,
                                line.buyer_id,
                                fees,
                                &line.currency,
                                None,
                                None,
                            );
                            SettlementDb::insert(conn, &record).await?;
                            records.push(record);
                        }
                    }

                    let now = Utc::now();
                    let planned = now + hold;
                    let mut ids = Vec::with_capacity(records.len());
                    let mut transitioned = 0usize;

                    for record in &records {
                        ids.push(record.settlement_id);
                        match record.status {
                            SettlementStatus::Pending => {
                                let ok = SettlementDb::mark_held(
                                    conn,
                                    record.settlement_id,
                                    &confirmation.payment_intent_ref,
                                    confirmation.checkout_session_ref.as_deref(),
                                    now,
                                    planned,
                                    HoldReason::StandardHold,
                                    &format!(
                                        "payment {} confirmed, funds held until {}",
                                        confirmation.payment_intent_ref,
                                        planned.to_rfc3339()
                                    ),
                                )
                                .await?;
                                if ok {
                                    transitioned += 1;
                                }
                            }
                            other => {
                                // Terminal or already-held records stay as they are
                                debug!(
                                    settlement_id = %record.settlement_id,
                                    status = %other,
                                    "Skipping payment confirmation for non-pending settlement"
                                );
                            }
                        }
                    }

                    let outcome = if transitioned > 0 {
                        info!(
                            order_id = confirmation.order_id,
                            payment_intent = %confirmation.payment_intent_ref,
                            held = transitioned,
                            "Payment confirmed, settlements held"
                        );
                        ApplyOutcome::Applied
                    } else {
                        ApplyOutcome::Duplicate
                    };
                    Ok((outcome, ids))
                })
            })
            .await
    }

    /// Release held funds to the seller.
    ///
    /// Validates state, hold expiry and payout destination under the row
    /// lock, asks the currency selector for the transfer plan, requests the
    /// gateway transfer, and persists the transfer reference atomically with
    /// the HELD -> PROCESSING status change.
    pub async fn request_release(
        &self,
        settlement_id: SettlementId,
        actor: &str,
    ) -> Result<ReleaseOutcome, SettlementError> {
        let gateway = self.gateway.clone();
        let actor = actor.to_string();
        let freshness = self.config.rate_freshness();

        self.db
            .run_in_transaction(IsolationLevel::Serializable, self.retry, move |conn| {
                let gateway = gateway.clone();
                let actor = actor.clone();
                Box::pin(async move {
                    let record = SettlementDb::lock(conn, settlement_id)
                        .await?
                        .ok_or_else(|| {
                            SettlementError::SettlementNotFound(settlement_id.to_string())
                        })?;

                    if record.status != SettlementStatus::Held {
                        return Err(SettlementError::NotTransferable {
                            settlement_id: settlement_id.to_string(),
                            status: record.status,
                        });
                    }

                    let now = Utc::now();
                    let planned_release_at = record.planned_release_at.ok_or_else(|| {
                        warn!(
                            settlement_id = %settlement_id,
                            "Held settlement has no planned release date"
                        );
                        SettlementError::NotTransferable {
                            settlement_id: settlement_id.to_string(),
                            status: record.status,
                        }
                    })?;
                    if now < planned_release_at {
                        return Err(SettlementError::TransferNotReady { planned_release_at });
                    }

                    let seller = SellerDb::get(conn, record.seller_id)
                        .await?
                        .ok_or(SettlementError::SellerNotFound(record.seller_id))?;
                    let destination = match (
                        seller.has_payout_destination(),
                        seller.account_ref.clone(),
                    ) {
                        (true, Some(account_ref)) => account_ref,
                        _ => {
                            return Err(SettlementError::NoPayoutDestination {
                                seller_id: record.seller_id,
                            });
                        }
                    };

                    // Transfer currency decision: preferred currency first,
                    // conversion only at a fresh rate
                    let balances: Vec<CurrencyBalance> = gateway
                        .available_balances()
                        .await?
                        .into_iter()
                        .map(|b| CurrencyBalance {
                            currency: b.currency,
                            available_minor: b.amount,
                        })
                        .collect();
                    let rates = RateDb::latest_batch(conn).await?;
                    let plan = select_transfer_currency(
                        &record.currency,
                        record.net_minor,
                        &balances,
                        &rates,
                        now,
                        freshness,
                    )?;

                    let currency = plan.currency(&record.currency).to_string();
                    let amount_minor = plan.amount_minor();

                    let mut metadata = HashMap::new();
                    metadata.insert("settlement_id".to_string(), settlement_id.to_string());
                    metadata.insert("order_id".to_string(), record.order_id.to_string());
                    metadata.insert("actor".to_string(), actor.clone());

                    let transfer = gateway
                        .create_transfer(&CreateTransfer {
                            amount: amount_minor,
                            currency: currency.clone(),
                            destination,
                            transfer_group: format!("order-{}", record.order_id),
                            metadata,
                        })
                        .await?;

                    let note = format!(
                        "transfer {} of {} requested by {}",
                        transfer.id,
                        money::format_minor(amount_minor, &currency),
                        actor
                    );
                    let ok =
                        SettlementDb::mark_processing(conn, settlement_id, &transfer.id, &note)
                            .await?;
                    if !ok {
                        // The row is locked, so this means the record changed
                        // between our read and write inside this transaction
                        warn!(
                            settlement_id = %settlement_id,
                            "Status changed under lock during release"
                        );
                        return Err(SettlementError::NotTransferable {
                            settlement_id: settlement_id.to_string(),
                            status: record.status,
                        });
                    }

                    info!(
                        settlement_id = %settlement_id,
                        transfer_ref = %transfer.id,
                        amount = %money::format_minor(amount_minor, &currency),
                        actor = %actor,
                        "Settlement released to processing"
                    );
                    Ok(ReleaseOutcome {
                        settlement_id,
                        transfer_ref: transfer.id,
                        currency,
                        amount_minor,
                        status: SettlementStatus::Processing,
                    })
                })
            })
            .await
    }

    /// Apply an asynchronous transfer confirmation from the gateway.
    ///
    /// Success moves PROCESSING -> RELEASED and stamps the actual release
    /// date. A recoverable failure returns the record to HELD with its hold
    /// timers intact; a reversed transfer is terminal FAILED with the reason
    /// persisted. Duplicate and out-of-order deliveries are no-ops.
    pub async fn apply_transfer_result(
        &self,
        notice: &TransferNotice,
    ) -> Result<ApplyOutcome, SettlementError> {
        let notice = notice.clone();
        self.db
            .run_in_transaction(IsolationLevel::Serializable, self.retry, move |conn| {
                let notice = notice.clone();
                Box::pin(async move {
                    // Correlate by echoed settlement id first, then by ref
                    let record = match notice.settlement_id {
                        Some(id) => SettlementDb::lock(conn, id).await?,
                        None => None,
                    };
                    let record = match record {
                        Some(r) => Some(r),
                        None => {
                            SettlementDb::lock_by_transfer_ref(conn, &notice.transfer_ref).await?
                        }
                    };

                    let Some(record) = record else {
                        info!(
                            transfer_ref = %notice.transfer_ref,
                            "Transfer event matched no settlement, acknowledged"
                        );
                        return Ok(ApplyOutcome::Unmatched);
                    };

                    if notice.succeeded {
                        Self::apply_transfer_success(conn, &record, &notice).await
                    } else {
                        Self::apply_transfer_failure(conn, &record, &notice).await
                    }
                })
            })
            .await
    }

    async fn apply_transfer_success(
        conn: &mut sqlx::PgConnection,
        record: &SettlementRecord,
        notice: &TransferNotice,
    ) -> Result<ApplyOutcome, SettlementError> {
        match record.status {
            status if status.is_released() => Ok(ApplyOutcome::Duplicate),
            SettlementStatus::Processing => {
                if record.transfer_ref.as_deref() != Some(notice.transfer_ref.as_str()) {
                    // Confirmation for a transfer this record no longer carries
                    warn!(
                        settlement_id = %record.settlement_id,
                        event_ref = %notice.transfer_ref,
                        current_ref = ?record.transfer_ref,
                        "Transfer confirmation does not match current transfer"
                    );
                    return Ok(ApplyOutcome::Unmatched);
                }
                let now = Utc::now();
                SettlementDb::mark_released(
                    conn,
                    record.settlement_id,
                    SettlementStatus::Released,
                    now,
                    &format!("transfer {} confirmed", notice.transfer_ref),
                )
                .await?;
                info!(
                    settlement_id = %record.settlement_id,
                    transfer_ref = %notice.transfer_ref,
                    "Settlement released"
                );
                Ok(ApplyOutcome::Applied)
            }
            other => {
                // Terminal or rolled-back record: duplicate delivery, no-op
                debug!(
                    settlement_id = %record.settlement_id,
                    status = %other,
                    "Ignoring transfer success for settlement not in processing"
                );
                Ok(ApplyOutcome::Duplicate)
            }
        }
    }

    async fn apply_transfer_failure(
        conn: &mut sqlx::PgConnection,
        record: &SettlementRecord,
        notice: &TransferNotice,
    ) -> Result<ApplyOutcome, SettlementError> {
        match record.status {
            SettlementStatus::Processing => {
                let reason = notice
                    .failure_message
                    .clone()
                    .unwrap_or_else(|| "transfer failed".to_string());
                if notice.reversed {
                    SettlementDb::update_status_if(
                        conn,
                        record.settlement_id,
                        SettlementStatus::Processing,
                        SettlementStatus::Failed,
                        &format!("transfer {} reversed: {}", notice.transfer_ref, reason),
                    )
                    .await?;
                    warn!(
                        settlement_id = %record.settlement_id,
                        transfer_ref = %notice.transfer_ref,
                        reason = %reason,
                        "Transfer reversed, settlement failed"
                    );
                } else {
                    // Hold timers preserved; the record stays retry-eligible
                    SettlementDb::return_to_held(
                        conn,
                        record.settlement_id,
                        &format!("transfer {} failed: {}", notice.transfer_ref, reason),
                    )
                    .await?;
                    warn!(
                        settlement_id = %record.settlement_id,
                        transfer_ref = %notice.transfer_ref,
                        reason = %reason,
                        "Transfer failed, settlement returned to held"
                    );
                }
                Ok(ApplyOutcome::Applied)
            }
            SettlementStatus::Held => {
                // Failure already reconciled; the ref was cleared then
                Ok(ApplyOutcome::Duplicate)
            }
            other => {
                debug!(
                    settlement_id = %record.settlement_id,
                    status = %other,
                    "Ignoring transfer failure for settlement not in processing"
                );
                Ok(ApplyOutcome::Duplicate)
            }
        }
    }

    /// Cancel an order's settlements. Safe for PENDING/HELD records; records
    /// with a transfer in flight are skipped and logged, never corrupted.
    pub async fn cancel_order(
        &self,
        order_id: i64,
    ) -> Result<(ApplyOutcome, usize), SettlementError> {
        self.db
            .run_in_transaction(IsolationLevel::Serializable, self.retry, move |conn| {
                Box::pin(async move {
                    let records = SettlementDb::lock_by_order(conn, order_id).await?;
                    if records.is_empty() {
                        return Ok((ApplyOutcome::Unmatched, 0));
                    }

                    let mut cancelled = 0usize;
                    for record in &records {
                        match record.status {
                            SettlementStatus::Pending | SettlementStatus::Held => {
                                let ok = SettlementDb::update_status_if(
                                    conn,
                                    record.settlement_id,
                                    record.status,
                                    SettlementStatus::Cancelled,
                                    "order cancelled upstream",
                                )
                                .await?;
                                if ok {
                                    cancelled += 1;
                                }
                            }
                            other => {
                                warn!(
                                    settlement_id = %record.settlement_id,
                                    status = %other,
                                    "Order cancelled but settlement not cancellable, skipping"
                                );
                            }
                        }
                    }

                    let outcome = if cancelled > 0 {
                        info!(order_id, cancelled, "Order settlements cancelled");
                        ApplyOutcome::Applied
                    } else {
                        ApplyOutcome::Duplicate
                    };
                    Ok((outcome, cancelled))
                })
            })
            .await
    }

    /// Request a refund of a held settlement back to the buyer
    pub async fn request_refund(
        &self,
        settlement_id: SettlementId,
        reason: &str,
    ) -> Result<RefundOutcome, SettlementError> {
        let gateway = self.gateway.clone();
        let reason = reason.to_string();

        self.db
            .run_in_transaction(IsolationLevel::Serializable, self.retry, move |conn| {
                let gateway = gateway.clone();
                let reason = reason.clone();
                Box::pin(async move {
                    let record = SettlementDb::lock(conn, settlement_id)
                        .await?
                        .ok_or_else(|| {
                            SettlementError::SettlementNotFound(settlement_id.to_string())
                        })?;

                    let refundable = matches!(
                        record.status,
                        SettlementStatus::Held
                            | SettlementStatus::Disputed
                            | SettlementStatus::FailedRefund
                    );
                    if !refundable {
                        return Err(SettlementError::NotRefundable {
                            status: record.status,
                        });
                    }

                    let Some(payment_intent) = record.payment_intent_ref.clone() else {
                        return Err(SettlementError::NotRefundable {
                            status: record.status,
                        });
                    };

                    let mut metadata = HashMap::new();
                    metadata.insert("settlement_id".to_string(), settlement_id.to_string());
                    metadata.insert("order_id".to_string(), record.order_id.to_string());

                    let refund = gateway
                        .create_refund(&CreateRefund {
                            payment_intent,
                            amount: Some(record.gross_minor),
                            reason: reason.clone(),
                            metadata,
                        })
                        .await?;

                    SettlementDb::update_status_if(
                        conn,
                        settlement_id,
                        record.status,
                        SettlementStatus::WaitingRefund,
                        &format!("refund {} requested: {}", refund.id, reason),
                    )
                    .await?;

                    info!(
                        settlement_id = %settlement_id,
                        refund_ref = %refund.id,
                        "Refund requested"
                    );
                    Ok(RefundOutcome {
                        settlement_id,
                        refund_ref: refund.id,
                        status: SettlementStatus::WaitingRefund,
                    })
                })
            })
            .await
    }

    /// Apply an asynchronous refund confirmation for an order
    pub async fn apply_refund_result(
        &self,
        notice: &RefundNotice,
    ) -> Result<ApplyOutcome, SettlementError> {
        let notice = notice.clone();
        self.db
            .run_in_transaction(IsolationLevel::Serializable, self.retry, move |conn| {
                let notice = notice.clone();
                Box::pin(async move {
                    let records = SettlementDb::lock_by_order(conn, notice.order_id).await?;
                    if records.is_empty() {
                        info!(
                            order_id = notice.order_id,
                            refund_ref = %notice.refund_ref,
                            "Refund event matched no settlements, acknowledged"
                        );
                        return Ok(ApplyOutcome::Unmatched);
                    }

                    let target = if notice.succeeded {
                        SettlementStatus::Refunded
                    } else {
                        SettlementStatus::FailedRefund
                    };

                    let mut transitioned = 0usize;
                    let mut already = 0usize;
                    for record in &records {
                        match record.status {
                            SettlementStatus::WaitingRefund => {
                                let note = if notice.succeeded {
                                    format!("refund {} confirmed", notice.refund_ref)
                                } else {
                                    format!(
                                        "refund {} failed: {}",
                                        notice.refund_ref,
                                        notice
                                            .failure_reason
                                            .as_deref()
                                            .unwrap_or("unknown failure")
                                    )
                                };
                                let ok = SettlementDb::update_status_if(
                                    conn,
                                    record.settlement_id,
                                    SettlementStatus::WaitingRefund,
                                    target,
                                    &note,
                                )
                                .await?;
                                if ok {
                                    transitioned += 1;
                                }
                            }
                            status if status == target => already += 1,
                            other => {
                                debug!(
                                    settlement_id = %record.settlement_id,
                                    status = %other,
                                    "Refund event skipped settlement not awaiting refund"
                                );
                            }
                        }
                    }

                    if transitioned > 0 {
                        info!(
                            order_id = notice.order_id,
                            refund_ref = %notice.refund_ref,
                            transitioned,
                            succeeded = notice.succeeded,
                            "Refund result applied"
                        );
                        Ok(ApplyOutcome::Applied)
                    } else if already > 0 {
                        Ok(ApplyOutcome::Duplicate)
                    } else {
                        Ok(ApplyOutcome::Unmatched)
                    }
                })
            })
            .await
    }

    /// Operator action: block release while a dispute is open
    pub async fn mark_disputed(
        &self,
        settlement_id: SettlementId,
        note: &str,
    ) -> Result<bool, SettlementError> {
        let note = note.to_string();
        self.db
            .run_in_transaction(IsolationLevel::Serializable, self.retry, move |conn| {
                let note = note.clone();
                Box::pin(
                    async move { Ok(SettlementDb::mark_disputed(conn, settlement_id, &note).await?) },
                )
            })
            .await
    }

    /// Operator action: dispute resolved, hold resumes
    pub async fn resolve_dispute(
        &self,
        settlement_id: SettlementId,
        note: &str,
    ) -> Result<bool, SettlementError> {
        let note = note.to_string();
        self.db
            .run_in_transaction(IsolationLevel::Serializable, self.retry, move |conn| {
                let note = note.clone();
                Box::pin(async move {
                    Ok(SettlementDb::resolve_dispute(conn, settlement_id, &note).await?)
                })
            })
            .await
    }

    /// Read one settlement without locking
    pub async fn get(
        &self,
        settlement_id: SettlementId,
    ) -> Result<Option<SettlementRecord>, SettlementError> {
        self.db
            .with_conn(move |conn| {
                Box::pin(async move { Ok(SettlementDb::get(conn, settlement_id).await?) })
            })
            .await
    }

    // === Sweeps (same lock-and-retry discipline as interactive requests) ===

    /// Release every held settlement whose hold period has elapsed.
    /// Individual failures are logged and skipped, never fatal to the sweep.
    pub async fn sweep_release_due(&self, limit: i64) -> Result<usize, SettlementError> {
        let now = Utc::now();
        let ids: Vec<SettlementId> = self
            .db
            .with_conn::<_, SettlementError, _>(move |conn| {
                Box::pin(async move { Ok(SettlementDb::release_due(conn, now, limit).await?) })
            })
            .await?;

        let mut released = 0usize;
        for id in ids {
            match self.request_release(id, "release-sweep").await {
                Ok(_) => released += 1,
                Err(e) => {
                    // A candidate may have raced a webhook or manual release
                    warn!(settlement_id = %id, error = %e, "Sweep release skipped");
                }
            }
        }
        Ok(released)
    }

    /// Flag settlements stuck in PROCESSING beyond the grace window for
    /// manual reconciliation. The confirmation may have been lost, not
    /// necessarily failed, so nothing is transitioned here.
    pub async fn sweep_stuck_processing(&self, limit: i64) -> Result<usize, SettlementError> {
        let cutoff = Utc::now() - chrono::Duration::hours(self.config.processing_grace_hours);
        let ids: Vec<SettlementId> = self
            .db
            .with_conn::<_, SettlementError, _>(move |conn| {
                Box::pin(
                    async move { Ok(SettlementDb::stuck_processing(conn, cutoff, limit).await?) },
                )
            })
            .await?;

        let mut flagged = 0usize;
        for id in ids {
            let ok = self
                .db
                .run_in_transaction::<bool, SettlementError, _>(IsolationLevel::Serializable, self.retry, move |conn| {
                    Box::pin(async move {
                        let record = SettlementDb::lock(conn, id).await?;
                        match record {
                            Some(r)
                                if r.status == SettlementStatus::Processing
                                    && r.updated_at < cutoff =>
                            {
                                Ok(SettlementDb::set_needs_review(
                                    conn,
                                    id,
                                    "no transfer confirmation within grace window",
                                )
                                .await?)
                            }
                            _ => Ok(false),
                        }
                    })
                })
                .await?;
            if ok {
                warn!(settlement_id = %id, "Settlement flagged for manual reconciliation");
                flagged += 1;
            }
        }
        Ok(flagged)
    }

    /// Cancel PENDING settlements whose payment never confirmed in time
    pub async fn sweep_expired_pending(&self, limit: i64) -> Result<usize, SettlementError> {
        let cutoff = Utc::now() - chrono::Duration::hours(self.config.pending_timeout_hours);
        let ids: Vec<SettlementId> = self
            .db
            .with_conn::<_, SettlementError, _>(move |conn| {
                Box::pin(async move { Ok(SettlementDb::expired_pending(conn, cutoff, limit).await?) })
            })
            .await?;

        let mut cancelled = 0usize;
        for id in ids {
            let ok = self
                .db
                .run_in_transaction::<bool, SettlementError, _>(IsolationLevel::Serializable, self.retry, move |conn| {
                    Box::pin(async move {
                        let record = SettlementDb::lock(conn, id).await?;
                        match record {
                            Some(r)
                                if r.status == SettlementStatus::Pending
                                    && r.created_at < cutoff =>
                            {
                                Ok(SettlementDb::update_status_if(
                                    conn,
                                    id,
                                    SettlementStatus::Pending,
                                    SettlementStatus::Cancelled,
                                    "payment confirmation timed out",
                                )
                                .await?)
                            }
                            _ => Ok(false),
                        }
                    })
                })
                .await?;
            if ok {
                cancelled += 1;
            }
        }
        if cancelled > 0 {
            info!(cancelled, "Expired pending settlements cancelled");
        }
        Ok(cancelled)
    }
}
