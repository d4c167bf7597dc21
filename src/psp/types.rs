//! Gateway request/response types

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Outbound transfer request
#[derive(Debug, Clone, Serialize)]
pub struct CreateTransfer {
    /// Amount in minor units of `currency`
    pub amount: i64,
    pub currency: String,
    /// Destination connected-account reference
    pub destination: String,
    /// Grouping key tying transfers of one order together
    pub transfer_group: String,
    /// Echoed back on transfer webhooks; carries the settlement id and is
    /// used by the gateway to de-duplicate re-sent requests
    pub metadata: HashMap<String, String>,
}

/// Gateway acknowledgement of a transfer request
#[derive(Debug, Clone, Deserialize)]
pub struct TransferCreated {
    /// External transfer reference
    pub id: String,
    pub amount: i64,
    pub currency: String,
    pub destination: String,
}

/// Outbound refund request
#[derive(Debug, Clone, Serialize)]
pub struct CreateRefund {
    pub payment_intent: String,
    /// Amount in minor units; None refunds the full charge
    pub amount: Option<i64>,
    pub reason: String,
    pub metadata: HashMap<String, String>,
}

/// Gateway acknowledgement of a refund request
#[derive(Debug, Clone, Deserialize)]
pub struct RefundCreated {
    /// External refund reference
    pub id: String,
    pub status: String,
}

/// Checkout session looked up as a fallback when webhook metadata is missing
#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    pub payment_intent: Option<String>,
    pub amount_total: Option<i64>,
    pub currency: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// Platform balance available in one currency
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayBalance {
    pub currency: String,
    /// Minor units
    pub amount: i64,
}

/// Gateway client error types
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Gateway request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Gateway rejected request ({status}): {code} {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },

    #[error("Gateway response could not be decoded: {0}")]
    Decode(String),

    #[error("Checkout session not found: {0}")]
    SessionNotFound(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_request_serializes_metadata() {
        let mut metadata = HashMap::new();
        metadata.insert("settlement_id".to_string(), "01H".to_string());
        let req = CreateTransfer {
            amount: 9_380,
            currency: "USD".into(),
            destination: "acct_7".into(),
            transfer_group: "order-42".into(),
            metadata,
        };

        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["amount"], 9_380);
        assert_eq!(json["metadata"]["settlement_id"], "01H");
    }

    #[test]
    fn test_checkout_session_tolerates_missing_fields() {
        let session: CheckoutSession =
            serde_json::from_str(r#"{"id": "cs_1", "payment_intent": null}"#).unwrap();
        assert_eq!(session.id, "cs_1");
        assert!(session.payment_intent.is_none());
        assert!(session.metadata.is_empty());
    }
}
