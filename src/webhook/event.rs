//! Gateway Event Types
//!
//! The inbound envelope is parsed once, at the boundary, into a tagged union
//! per event kind. Unknown fields are preserved in each event's `extra` bag
//! instead of being re-read from raw JSON downstream.

use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;

/// Generic webhook envelope: `{ id, event_type, data: { object: {...} } }`
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEnvelope {
    /// Gateway-assigned event id
    pub id: String,
    pub event_type: String,
    pub data: EnvelopeData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EnvelopeData {
    pub object: Value,
}

/// Metadata bag the platform attached when creating the upstream object,
/// echoed back verbatim by the gateway
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventMetadata {
    /// Order correlation key (payment and refund events)
    pub order_id: Option<String>,
    /// Buyer reference (payment events)
    pub user_id: Option<String>,
    /// Settlement correlation key (transfer events)
    pub transaction_id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl EventMetadata {
    pub fn order_id_i64(&self) -> Option<i64> {
        self.order_id.as_deref().and_then(|s| s.parse().ok())
    }
}

/// Payment confirmed: the checkout session completed and was paid
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentConfirmedEvent {
    /// Checkout session reference
    pub id: Option<String>,
    pub payment_intent: Option<String>,
    pub amount_total: Option<i64>,
    pub currency: Option<String>,
    #[serde(default)]
    pub metadata: EventMetadata,
    /// Shipping/customer address block, passed through for the order side
    pub customer_details: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Transfer created/succeeded/failed
#[derive(Debug, Clone, Deserialize)]
pub struct TransferEvent {
    /// External transfer reference
    pub id: String,
    pub amount: Option<i64>,
    pub currency: Option<String>,
    pub destination: Option<String>,
    #[serde(default)]
    pub reversed: bool,
    pub failure_message: Option<String>,
    #[serde(default)]
    pub metadata: EventMetadata,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Refund updated/failed
#[derive(Debug, Clone, Deserialize)]
pub struct RefundEvent {
    /// External refund reference
    pub id: String,
    pub amount: Option<i64>,
    pub status: Option<String>,
    pub failure_reason: Option<String>,
    #[serde(default)]
    pub metadata: EventMetadata,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RefundEvent {
    /// A refund event counts as a success unless its status or the event
    /// kind says otherwise
    pub fn succeeded(&self) -> bool {
        !matches!(self.status.as_deref(), Some("failed") | Some("canceled"))
    }
}

/// Payout batch updated/paid/failed/canceled
#[derive(Debug, Clone, Deserialize)]
pub struct PayoutEvent {
    /// External payout reference
    pub id: String,
    pub status: Option<String>,
    /// Unix timestamp of expected/actual bank arrival
    pub arrival_date: Option<i64>,
    pub failure_code: Option<String>,
    pub failure_message: Option<String>,
    /// Destination connected-account or bank reference
    pub destination: Option<String>,
    pub currency: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PayoutEvent {
    pub fn arrival_at(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        self.arrival_date
            .and_then(|secs| chrono::DateTime::from_timestamp(secs, 0))
    }
}

/// Connected account status changed
#[derive(Debug, Clone, Deserialize)]
pub struct AccountEvent {
    /// External account reference
    pub id: String,
    #[serde(default)]
    pub details_submitted: bool,
    #[serde(default)]
    pub charges_enabled: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Every notification kind the reconciliation engine understands
#[derive(Debug, Clone)]
pub enum GatewayEvent {
    PaymentConfirmed(PaymentConfirmedEvent),
    TransferSucceeded(TransferEvent),
    TransferFailed(TransferEvent),
    RefundUpdated(RefundEvent),
    RefundFailed(RefundEvent),
    PayoutUpdated(PayoutEvent),
    AccountUpdated(AccountEvent),
    /// Recognized envelope, unrecognized kind; acknowledged without action
    Unknown { event_type: String },
}

#[derive(Debug, Error)]
pub enum EventParseError {
    #[error("Envelope is not valid JSON: {0}")]
    Envelope(String),

    #[error("Payload of {event_type} malformed: {message}")]
    Payload { event_type: String, message: String },
}

impl GatewayEvent {
    /// Parse a raw body into an envelope plus typed event
    pub fn from_body(body: &[u8]) -> Result<(WebhookEnvelope, GatewayEvent), EventParseError> {
        let envelope: WebhookEnvelope = serde_json::from_slice(body)
            .map_err(|e| EventParseError::Envelope(e.to_string()))?;
        let event = Self::from_envelope(&envelope)?;
        Ok((envelope, event))
    }

    /// Map `event_type` to a typed payload
    pub fn from_envelope(envelope: &WebhookEnvelope) -> Result<GatewayEvent, EventParseError> {
        let object = envelope.data.object.clone();
        let typed = |e: serde_json::Error| EventParseError::Payload {
            event_type: envelope.event_type.clone(),
            message: e.to_string(),
        };

        Ok(match envelope.event_type.as_str() {
            "payment.confirmed" | "checkout.session.completed" => {
                GatewayEvent::PaymentConfirmed(serde_json::from_value(object).map_err(typed)?)
            }
            "transfer.created" | "transfer.succeeded" => {
                GatewayEvent::TransferSucceeded(serde_json::from_value(object).map_err(typed)?)
            }
            "transfer.failed" => {
                GatewayEvent::TransferFailed(serde_json::from_value(object).map_err(typed)?)
            }
            "refund.updated" => {
                GatewayEvent::RefundUpdated(serde_json::from_value(object).map_err(typed)?)
            }
            "refund.failed" => {
                GatewayEvent::RefundFailed(serde_json::from_value(object).map_err(typed)?)
            }
            "payout.updated" | "payout.paid" | "payout.failed" | "payout.canceled" => {
                let mut event: PayoutEvent = serde_json::from_value(object).map_err(typed)?;
                // Some gateways omit status on the terminal notifications
                if event.status.is_none() {
                    event.status = envelope
                        .event_type
                        .strip_prefix("payout.")
                        .map(str::to_string);
                }
                GatewayEvent::PayoutUpdated(event)
            }
            "account.updated" => {
                GatewayEvent::AccountUpdated(serde_json::from_value(object).map_err(typed)?)
            }
            other => GatewayEvent::Unknown {
                event_type: other.to_string(),
            },
        })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            GatewayEvent::PaymentConfirmed(_) => "payment.confirmed",
            GatewayEvent::TransferSucceeded(_) => "transfer.succeeded",
            GatewayEvent::TransferFailed(_) => "transfer.failed",
            GatewayEvent::RefundUpdated(_) => "refund.updated",
            GatewayEvent::RefundFailed(_) => "refund.failed",
            GatewayEvent::PayoutUpdated(_) => "payout.updated",
            GatewayEvent::AccountUpdated(_) => "account.updated",
            GatewayEvent::Unknown { .. } => "unknown",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_payment_confirmed() {
        let body = serde_json::json!({
            "id": "evt_1",
            "event_type": "payment.confirmed",
            "data": { "object": {
                "id": "cs_55",
                "payment_intent": "pi_9",
                "amount_total": 12_000,
                "currency": "usd",
                "metadata": { "order_id": "42", "user_id": "1001" },
                "customer_details": { "address": { "country": "DE" } },
                "mode": "payment"
            }}
        });

        let (envelope, event) = GatewayEvent::from_body(body.to_string().as_bytes()).unwrap();
        assert_eq!(envelope.id, "evt_1");
        match event {
            GatewayEvent::PaymentConfirmed(ev) => {
                assert_eq!(ev.payment_intent.as_deref(), Some("pi_9"));
                assert_eq!(ev.metadata.order_id_i64(), Some(42));
                // Unknown fields survive in the extension bag
                assert_eq!(ev.extra.get("mode").and_then(|v| v.as_str()), Some("payment"));
            }
            other => panic!("wrong event: {other:?}"),
        }
    }

    #[test]
    fn test_parse_transfer_failed_with_reversal() {
        let body = serde_json::json!({
            "id": "evt_2",
            "event_type": "transfer.failed",
            "data": { "object": {
                "id": "tr_7",
                "amount": 9_380,
                "currency": "usd",
                "destination": "acct_3",
                "reversed": true,
                "failure_message": "account closed",
                "metadata": { "transaction_id": "01HZX5" }
            }}
        });

        let (_, event) = GatewayEvent::from_body(body.to_string().as_bytes()).unwrap();
        match event {
            GatewayEvent::TransferFailed(ev) => {
                assert!(ev.reversed);
                assert_eq!(ev.metadata.transaction_id.as_deref(), Some("01HZX5"));
            }
            other => panic!("wrong event: {other:?}"),
        }
    }

    #[test]
    fn test_payout_status_derived_from_event_type() {
        let body = serde_json::json!({
            "id": "evt_3",
            "event_type": "payout.failed",
            "data": { "object": {
                "id": "po_4",
                "arrival_date": 1_700_000_000,
                "failure_code": "account_closed",
                "failure_message": "Bank account closed"
            }}
        });

        let (_, event) = GatewayEvent::from_body(body.to_string().as_bytes()).unwrap();
        match event {
            GatewayEvent::PayoutUpdated(ev) => {
                assert_eq!(ev.status.as_deref(), Some("failed"));
                assert!(ev.arrival_at().is_some());
            }
            other => panic!("wrong event: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_event_type() {
        let body = serde_json::json!({
            "id": "evt_4",
            "event_type": "invoice.finalized",
            "data": { "object": {} }
        });

        let (_, event) = GatewayEvent::from_body(body.to_string().as_bytes()).unwrap();
        assert!(matches!(event, GatewayEvent::Unknown { .. }));
    }

    #[test]
    fn test_garbage_body_rejected() {
        assert!(GatewayEvent::from_body(b"not json").is_err());
        assert!(GatewayEvent::from_body(b"{\"id\": \"evt\"}").is_err());
    }

    #[test]
    fn test_refund_success_flag() {
        let refund: RefundEvent = serde_json::from_value(serde_json::json!({
            "id": "re_1", "status": "succeeded"
        }))
        .unwrap();
        assert!(refund.succeeded());

        let refund: RefundEvent = serde_json::from_value(serde_json::json!({
            "id": "re_2", "status": "failed"
        }))
        .unwrap();
        assert!(!refund.succeeded());
    }
}
