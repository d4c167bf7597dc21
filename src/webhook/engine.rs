//! Webhook Reconciliation Engine
//!
//! Maps inbound gateway notifications, delivered unordered and at least
//! once, to exactly one idempotent state-machine call each. Signature
//! verification happens before anything else; unmatched events are
//! acknowledged so the gateway stops redelivering them.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use super::event::{GatewayEvent, PaymentConfirmedEvent, WebhookEnvelope};
use super::signature::{SignatureError, verify_signature};
use crate::config::RetryConfig;
use crate::db::{Database, IsolationLevel};
use crate::payout::service::{PayoutNotice, PayoutService};
use crate::psp::PaymentGateway;
use crate::settlement::{
    ApplyOutcome, PaymentConfirmation, RefundNotice, SellerDb, SettlementEngine, SettlementError,
    TransferNotice,
};

/// How a delivery was disposed of. `Rejected` maps to a 4xx response with no
/// side effects; everything else is acknowledged with 200.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookDisposition {
    /// Event verified and routed; `outcome` says what it did
    Accepted {
        kind: &'static str,
        outcome: &'static str,
    },
    /// Unverifiable or malformed; nothing was touched
    Rejected { reason: String },
}

pub struct ReconciliationEngine {
    db: Database,
    settlements: Arc<SettlementEngine>,
    payouts: Arc<PayoutService>,
    gateway: Arc<dyn PaymentGateway>,
    retry: RetryConfig,
    webhook_secret: String,
    signature_tolerance_secs: i64,
}

impl ReconciliationEngine {
    pub fn new(
        db: Database,
        settlements: Arc<SettlementEngine>,
        payouts: Arc<PayoutService>,
        gateway: Arc<dyn PaymentGateway>,
        retry: RetryConfig,
        webhook_secret: &str,
        signature_tolerance_secs: i64,
    ) -> Self {
        Self {
            db,
            settlements,
            payouts,
            gateway,
            retry,
            webhook_secret: webhook_secret.to_string(),
            signature_tolerance_secs,
        }
    }

    /// Handle one raw webhook delivery.
    ///
    /// Returns `Err` only on infrastructure failure, which the HTTP layer
    /// maps to 5xx so the gateway redelivers later.
    pub async fn handle(
        &self,
        payload: &[u8],
        signature_header: Option<&str>,
    ) -> Result<WebhookDisposition, SettlementError> {
        let Some(header) = signature_header else {
            warn!("Webhook rejected: signature header missing");
            return Ok(WebhookDisposition::Rejected {
                reason: SignatureError::MissingHeader.to_string(),
            });
        };

        if let Err(e) = verify_signature(
            payload,
            header,
            &self.webhook_secret,
            self.signature_tolerance_secs,
            Utc::now().timestamp(),
        ) {
            // Security event: possible forgery or replay
            warn!(error = %e, "Webhook rejected: signature verification failed");
            return Ok(WebhookDisposition::Rejected {
                reason: e.to_string(),
            });
        }

        let (envelope, event) = match GatewayEvent::from_body(payload) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(error = %e, "Webhook rejected: unparseable payload");
                return Ok(WebhookDisposition::Rejected {
                    reason: e.to_string(),
                });
            }
        };

        let kind = event.kind();
        let outcome = self.dispatch(&envelope, event).await?;
        info!(
            event_id = %envelope.id,
            kind,
            outcome,
            "Webhook processed"
        );
        Ok(WebhookDisposition::Accepted { kind, outcome })
    }

    async fn dispatch(
        &self,
        envelope: &WebhookEnvelope,
        event: GatewayEvent,
    ) -> Result<&'static str, SettlementError> {
        match event {
            GatewayEvent::PaymentConfirmed(ev) => self.on_payment_confirmed(ev).await,
            GatewayEvent::TransferSucceeded(ev) => {
                let notice = TransferNotice {
                    transfer_ref: ev.id.clone(),
                    settlement_id: ev
                        .metadata
                        .transaction_id
                        .as_deref()
                        .and_then(|s| s.parse().ok()),
                    succeeded: !ev.reversed,
                    reversed: ev.reversed,
                    failure_message: ev.failure_message.clone(),
                };
                Ok(self
                    .settlements
                    .apply_transfer_result(&notice)
                    .await?
                    .as_str())
            }
            GatewayEvent::TransferFailed(ev) => {
                let notice = TransferNotice {
                    transfer_ref: ev.id.clone(),
                    settlement_id: ev
                        .metadata
                        .transaction_id
                        .as_deref()
                        .and_then(|s| s.parse().ok()),
                    succeeded: false,
                    reversed: ev.reversed,
                    failure_message: ev.failure_message.clone(),
                };
                Ok(self
                    .settlements
                    .apply_transfer_result(&notice)
                    .await?
                    .as_str())
            }
            GatewayEvent::RefundUpdated(ev) => self.on_refund(ev, None).await,
            GatewayEvent::RefundFailed(ev) => self.on_refund(ev, Some(false)).await,
            GatewayEvent::PayoutUpdated(ev) => {
                let Some(status) = ev.status.clone() else {
                    warn!(payout_ref = %ev.id, "Payout event without status");
                    return Ok(ApplyOutcome::Unmatched.as_str());
                };
                let notice = PayoutNotice {
                    payout_ref: ev.id.clone(),
                    status,
                    currency: ev.currency.clone().map(|c| c.to_uppercase()),
                    destination: ev.destination.clone(),
                    arrival_date: ev.arrival_at(),
                    failure_code: ev.failure_code.clone(),
                    failure_message: ev.failure_message.clone(),
                };
                Ok(self.payouts.apply_payout_notice(&notice).await?.as_str())
            }
            GatewayEvent::AccountUpdated(ev) => {
                let account_ref = ev.id.clone();
                let updated = self
                    .db
                    .run_in_transaction::<_, SettlementError, _>(
                        IsolationLevel::Serializable,
                        self.retry,
                        move |conn| {
                            let account_ref = account_ref.clone();
                            Box::pin(async move {
                                Ok(SellerDb::update_account_status(
                                    conn,
                                    &account_ref,
                                    ev.details_submitted,
                                    ev.charges_enabled,
                                )
                                .await?)
                            })
                        },
                    )
                    .await?;
                if updated {
                    Ok(ApplyOutcome::Applied.as_str())
                } else {
                    info!(account_ref = %ev.id, "Account event matched no seller, acknowledged");
                    Ok(ApplyOutcome::Unmatched.as_str())
                }
            }
            GatewayEvent::Unknown { event_type } => {
                info!(event_id = %envelope.id, event_type = %event_type, "Unhandled event type");
                Ok("ignored")
            }
        }
    }

    /// Refund events correlate by order id. `forced_success` overrides the
    /// payload status for event kinds that already imply the outcome.
    async fn on_refund(
        &self,
        ev: super::event::RefundEvent,
        forced_success: Option<bool>,
    ) -> Result<&'static str, SettlementError> {
        let Some(order_id) = ev.metadata.order_id_i64() else {
            warn!(refund_ref = %ev.id, "Refund event without order correlation key");
            return Ok(ApplyOutcome::Unmatched.as_str());
        };
        let notice = RefundNotice {
            order_id,
            refund_ref: ev.id.clone(),
            succeeded: forced_success.unwrap_or_else(|| ev.succeeded()),
            failure_reason: ev.failure_reason.clone(),
        };
        Ok(self
            .settlements
            .apply_refund_result(&notice)
            .await?
            .as_str())
    }

    /// Payment confirmations may arrive with their metadata stripped; the
    /// checkout session lookup recovers the correlation keys before the
    /// fan-out runs.
    async fn on_payment_confirmed(
        &self,
        ev: PaymentConfirmedEvent,
    ) -> Result<&'static str, SettlementError> {
        let mut order_id = ev.metadata.order_id_i64();
        let mut payment_intent = ev.payment_intent.clone();
        let session_ref = ev.id.clone();

        if order_id.is_none() {
            if let Some(session_id) = &session_ref {
                match self.gateway.retrieve_checkout_session(session_id).await {
                    Ok(session) => {
                        order_id = session
                            .metadata
                            .get("order_id")
                            .and_then(|s| s.parse().ok());
                        if payment_intent.is_none() {
                            payment_intent = session.payment_intent;
                        }
                    }
                    Err(e) => {
                        warn!(
                            session = %session_id,
                            error = %e,
                            "Checkout session lookup failed during metadata recovery"
                        );
                    }
                }
            }
        }

        let (Some(order_id), Some(payment_intent)) = (order_id, payment_intent) else {
            warn!("Payment confirmation without order/intent correlation, acknowledged");
            return Ok(ApplyOutcome::Unmatched.as_str());
        };

        let confirmation = PaymentConfirmation {
            order_id,
            payment_intent_ref: payment_intent,
            checkout_session_ref: session_ref,
        };

        match self.settlements.confirm_payment(&confirmation).await {
            Ok((outcome, _)) => Ok(outcome.as_str()),
            // The order may not exist locally yet (race with order creation):
            // safely ignorable, the gateway will not need to redeliver once
            // the pending sweep or a manual replay reconciles it
            Err(SettlementError::OrderNotFound(id)) => {
                warn!(order_id = id, "Payment confirmed for unknown order, acknowledged");
                Ok(ApplyOutcome::Unmatched.as_str())
            }
            Err(e) => Err(e),
        }
    }
}
