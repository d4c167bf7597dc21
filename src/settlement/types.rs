//! Settlement Core Types
//!
//! Type definitions for the per-(order, seller) settlement transaction.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::status::SettlementStatus;
use crate::money::FeeBreakdown;

/// Settlement ID type - ULID-based unique identifier
///
/// Monotonic, sortable, and needs no coordination between nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SettlementId(ulid::Ulid);

impl SettlementId {
    /// Generate a new unique SettlementId
    pub fn new() -> Self {
        Self(ulid::Ulid::new())
    }

    /// Get the inner ULID value
    pub fn inner(&self) -> ulid::Ulid {
        self.0
    }
}

impl Default for SettlementId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SettlementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SettlementId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(ulid::Ulid::from_string(s)?))
    }
}

/// Why funds are currently held
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HoldReason {
    /// Standard post-payment hold period
    StandardHold,
    /// Buyer opened a dispute
    Dispute,
    /// Operator placed the transaction under manual review
    ManualReview,
}

impl HoldReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            HoldReason::StandardHold => "STANDARD_HOLD",
            HoldReason::Dispute => "DISPUTE",
            HoldReason::ManualReview => "MANUAL_REVIEW",
        }
    }

    pub fn from_name(s: &str) -> Option<Self> {
        match s {
            "STANDARD_HOLD" => Some(HoldReason::StandardHold),
            "DISPUTE" => Some(HoldReason::Dispute),
            "MANUAL_REVIEW" => Some(HoldReason::ManualReview),
            _ => None,
        }
    }
}

impl fmt::Display for HoldReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Settlement transaction record, one per (order, seller) pair.
///
/// Never physically deleted; cancellation and failure are terminal states.
#[derive(Debug, Clone)]
pub struct SettlementRecord {
    /// Unique settlement ID (ULID, also the DB primary key)
    pub settlement_id: SettlementId,
    pub order_id: i64,
    pub seller_id: i64,
    pub buyer_id: i64,
    /// Buyer-paid amount attributable to this seller, in minor units
    pub gross_minor: i64,
    pub platform_fee_minor: i64,
    pub gateway_fee_minor: i64,
    /// Amount owed to the seller: gross - platform_fee - gateway_fee
    pub net_minor: i64,
    /// ISO 4217 currency code of all amounts on this record
    pub currency: String,
    /// Current lifecycle status
    pub status: SettlementStatus,
    pub hold_reason: Option<HoldReason>,
    pub hold_start_at: Option<DateTime<Utc>>,
    /// hold_start_at + hold duration; set iff hold_start_at is set
    pub planned_release_at: Option<DateTime<Utc>>,
    /// Set only when status is RELEASED or COMPLETED
    pub actual_release_at: Option<DateTime<Utc>>,
    /// External transfer reference, present from PROCESSING onward
    pub transfer_ref: Option<String>,
    /// Idempotency anchor: external payment-intent reference.
    /// None until the buyer's payment is confirmed.
    pub payment_intent_ref: Option<String>,
    /// Idempotency anchor: external checkout-session reference
    pub checkout_session_ref: Option<String>,
    /// Included in a payout batch that has not failed
    pub payed_out: bool,
    /// Flagged by the sweep for manual reconciliation
    pub needs_review: bool,
    /// Append-only transition log; never overwritten
    pub notes: String,
    /// Opaque extension bag echoing external references
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SettlementRecord {
    /// Create a new record in PENDING state for one seller line of an order
    pub fn new_pending(
        order_id: i64,
        seller_id: i64,
        buyer_id: i64,
        fees: FeeBreakdown,
        currency: &str,
        payment_intent_ref: Option<&str>,
        checkout_session_ref: Option<&str>,
    ) -> Self {
        let now = Utc::now();
        Self {
            settlement_id: SettlementId::new(),
            order_id,
            seller_id,
            buyer_id,
            gross_minor: fees.gross_minor,
            platform_fee_minor: fees.platform_fee_minor,
            gateway_fee_minor: fees.gateway_fee_minor,
            net_minor: fees.net_minor,
            currency: currency.to_string(),
            status: SettlementStatus::Pending,
            hold_reason: None,
            hold_start_at: None,
            planned_release_at: None,
            actual_release_at: None,
            transfer_ref: None,
            payment_intent_ref: payment_intent_ref.map(str::to_string),
            checkout_session_ref: checkout_session_ref.map(str::to_string),
            payed_out: false,
            needs_review: false,
            notes: String::new(),
            metadata: serde_json::Value::Null,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the hold period has elapsed
    pub fn release_due(&self, now: DateTime<Utc>) -> bool {
        match self.planned_release_at {
            Some(at) => now >= at,
            None => false,
        }
    }
}

impl fmt::Display for SettlementRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Settlement[{}] order={} seller={} net={} {} status={}",
            self.settlement_id,
            self.order_id,
            self.seller_id,
            self.net_minor,
            self.currency,
            self.status
        )
    }
}

/// Result of applying an external confirmation to local state.
///
/// Duplicate and unmatched deliveries are successful outcomes: they are
/// acknowledged to the sender so it stops redelivering, without mutating
/// state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The event transitioned at least one record
    Applied,
    /// The event was already applied; state untouched
    Duplicate,
    /// No local record matched the event's correlation key
    Unmatched,
}

impl ApplyOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApplyOutcome::Applied => "applied",
            ApplyOutcome::Duplicate => "duplicate",
            ApplyOutcome::Unmatched => "unmatched",
        }
    }
}

/// One seller's share of an order, read from the order CRUD boundary
#[derive(Debug, Clone)]
pub struct OrderLine {
    pub order_id: i64,
    pub seller_id: i64,
    pub buyer_id: i64,
    pub gross_minor: i64,
    pub currency: String,
    pub description: String,
}

/// Seller payout destination as mirrored from the gateway
#[derive(Debug, Clone)]
pub struct SellerAccount {
    pub seller_id: i64,
    /// External connected-account reference; None until onboarding completes
    pub account_ref: Option<String>,
    pub details_submitted: bool,
    pub charges_enabled: bool,
    pub default_currency: String,
}

impl SellerAccount {
    /// A transfer can only be addressed to a fully onboarded account
    pub fn has_payout_destination(&self) -> bool {
        self.account_ref.is_some() && self.charges_enabled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::money::FeeSchedule;
    use rust_decimal::Decimal;

    fn breakdown() -> FeeBreakdown {
        FeeSchedule {
            platform_pct: Decimal::new(30, 1),
            gateway_pct: Decimal::new(29, 1),
            gateway_fixed_minor: 30,
        }
        .split(10_000)
        .unwrap()
    }

    #[test]
    fn test_settlement_id_roundtrip() {
        let id = SettlementId::new();
        let parsed: SettlementId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_new_pending_record() {
        let record = SettlementRecord::new_pending(
            42,
            7,
            1001,
            breakdown(),
            "USD",
            Some("pi_123"),
            Some("cs_456"),
        );

        assert_eq!(record.status, SettlementStatus::Pending);
        assert_eq!(record.net_minor, 9_380);
        assert_eq!(
            record.gross_minor - record.platform_fee_minor - record.gateway_fee_minor,
            record.net_minor
        );
        assert!(record.hold_start_at.is_none());
        assert!(record.planned_release_at.is_none());
        assert!(record.transfer_ref.is_none());
        assert!(!record.payed_out);
    }

    #[test]
    fn test_release_due() {
        let mut record =
            SettlementRecord::new_pending(1, 1, 1, breakdown(), "USD", Some("pi_1"), None);
        let now = Utc::now();
        assert!(!record.release_due(now));

        record.planned_release_at = Some(now - chrono::Duration::seconds(1));
        assert!(record.release_due(now));

        record.planned_release_at = Some(now + chrono::Duration::seconds(1));
        assert!(!record.release_due(now));
    }

    #[test]
    fn test_hold_reason_roundtrip() {
        for reason in [
            HoldReason::StandardHold,
            HoldReason::Dispute,
            HoldReason::ManualReview,
        ] {
            assert_eq!(HoldReason::from_name(reason.as_str()), Some(reason));
        }
        assert_eq!(HoldReason::from_name("bogus"), None);
    }

    #[test]
    fn test_payout_destination() {
        let mut seller = SellerAccount {
            seller_id: 7,
            account_ref: None,
            details_submitted: false,
            charges_enabled: false,
            default_currency: "USD".to_string(),
        };
        assert!(!seller.has_payout_destination());

        seller.account_ref = Some("acct_1".to_string());
        assert!(!seller.has_payout_destination());

        seller.charges_enabled = true;
        assert!(seller.has_payout_destination());
    }
}
