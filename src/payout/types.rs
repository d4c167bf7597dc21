//! Payout Types

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};

/// Payout ID type - ULID-based unique identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PayoutId(ulid::Ulid);

impl PayoutId {
    pub fn new() -> Self {
        Self(ulid::Ulid::new())
    }

    pub fn inner(&self) -> ulid::Ulid {
        self.0
    }
}

impl Default for PayoutId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PayoutId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for PayoutId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(ulid::Ulid::from_string(s)?))
    }
}

/// Payout batch lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i16)]
pub enum PayoutStatus {
    /// Grouped locally, not yet acknowledged by the gateway
    Pending = 0,
    /// Gateway reported the payout on its way to the bank
    InTransit = 10,
    /// Terminal: funds arrived
    Paid = 20,
    /// Bank rejected the payout; included settlements become re-eligible
    Failed = -10,
    /// Payout cancelled before submission
    Canceled = -30,
}

impl PayoutStatus {
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(PayoutStatus::Pending),
            10 => Some(PayoutStatus::InTransit),
            20 => Some(PayoutStatus::Paid),
            -10 => Some(PayoutStatus::Failed),
            -30 => Some(PayoutStatus::Canceled),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PayoutStatus::Pending => "PENDING",
            PayoutStatus::InTransit => "IN_TRANSIT",
            PayoutStatus::Paid => "PAID",
            PayoutStatus::Failed => "FAILED",
            PayoutStatus::Canceled => "CANCELED",
        }
    }

    /// Map the gateway's payout status string
    pub fn from_gateway(status: &str) -> Option<Self> {
        match status {
            "pending" => Some(PayoutStatus::Pending),
            "in_transit" => Some(PayoutStatus::InTransit),
            "paid" => Some(PayoutStatus::Paid),
            "failed" => Some(PayoutStatus::Failed),
            "canceled" => Some(PayoutStatus::Canceled),
            _ => None,
        }
    }
}

impl fmt::Display for PayoutStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Payout batch for one seller's bank account
#[derive(Debug, Clone)]
pub struct Payout {
    pub payout_id: PayoutId,
    pub seller_id: i64,
    /// External payout reference; set once the gateway reports the batch
    pub payout_ref: Option<String>,
    pub currency: String,
    /// Sum of item transfer amounts, minor units
    pub total_minor: i64,
    pub status: PayoutStatus,
    pub arrival_date: Option<DateTime<Utc>>,
    pub failure_code: Option<String>,
    pub failure_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Denormalized payout line, copied from the settlement at grouping time.
/// Audit record: preserved even when the payout fails.
#[derive(Debug, Clone)]
pub struct PayoutItem {
    pub item_id: i64,
    pub payout_id: PayoutId,
    pub settlement_id: String,
    pub order_id: i64,
    pub amount_minor: i64,
    pub currency: String,
    pub description: String,
    pub transfer_date: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_id_roundtrip() {
        for status in [
            PayoutStatus::Pending,
            PayoutStatus::InTransit,
            PayoutStatus::Paid,
            PayoutStatus::Failed,
            PayoutStatus::Canceled,
        ] {
            assert_eq!(PayoutStatus::from_id(status.id()), Some(status));
        }
        assert_eq!(PayoutStatus::from_id(99), None);
    }

    #[test]
    fn test_gateway_status_mapping() {
        assert_eq!(
            PayoutStatus::from_gateway("in_transit"),
            Some(PayoutStatus::InTransit)
        );
        assert_eq!(PayoutStatus::from_gateway("paid"), Some(PayoutStatus::Paid));
        assert_eq!(PayoutStatus::from_gateway("mystery"), None);
    }

    #[test]
    fn test_payout_id_roundtrip() {
        let id = PayoutId::new();
        let parsed: PayoutId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }
}
