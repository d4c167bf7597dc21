//! Settlement Lifecycle States
//!
//! State IDs are stored in PostgreSQL as SMALLINT; failure-side states use
//! negative IDs so `status < 0` selects everything that went wrong.

use std::fmt;

/// Settlement transaction lifecycle status
///
/// Terminal states: RELEASED (30), COMPLETED (40), REFUNDED (70),
/// FAILED (-10), CANCELLED (-30). No transition leaves a terminal state;
/// such attempts are logged no-ops, never errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i16)]
pub enum SettlementStatus {
    /// Created for an order, payment not yet confirmed
    Pending = 0,

    /// Buyer payment confirmed; funds held until the planned release date
    Held = 10,

    /// Transfer requested from the gateway, awaiting asynchronous confirmation
    Processing = 20,

    /// Terminal: transfer confirmed, funds moved to the seller account
    Released = 30,

    /// Terminal: transfer confirmed synchronously by the gateway response
    Completed = 40,

    /// Buyer dispute opened; release blocked until resolved
    Disputed = 50,

    /// Refund requested, awaiting asynchronous confirmation
    WaitingRefund = 60,

    /// Terminal: refund confirmed
    Refunded = 70,

    /// Terminal: transfer failed unrecoverably
    Failed = -10,

    /// Refund attempt failed; refund may be retried
    FailedRefund = -20,

    /// Terminal: order cancelled before any transfer was attempted
    Cancelled = -30,
}

impl SettlementStatus {
    /// Check if this is a terminal state (no more transitions possible)
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SettlementStatus::Released
                | SettlementStatus::Completed
                | SettlementStatus::Refunded
                | SettlementStatus::Failed
                | SettlementStatus::Cancelled
        )
    }

    /// Check if the transfer succeeded (either confirmation path)
    #[inline]
    pub fn is_released(&self) -> bool {
        matches!(
            self,
            SettlementStatus::Released | SettlementStatus::Completed
        )
    }

    /// Whether the state machine defines a transition from `self` to `to`
    pub fn can_transition_to(&self, to: SettlementStatus) -> bool {
        use SettlementStatus::*;
        matches!(
            (*self, to),
            (Pending, Held)
                | (Pending, Cancelled)
                | (Held, Processing)
                | (Held, Cancelled)
                | (Held, WaitingRefund)
                | (Held, Disputed)
                | (Processing, Released)
                | (Processing, Completed)
                | (Processing, Held)
                | (Processing, Failed)
                | (Disputed, Held)
                | (Disputed, WaitingRefund)
                | (WaitingRefund, Refunded)
                | (WaitingRefund, FailedRefund)
                | (FailedRefund, WaitingRefund)
        )
    }

    /// Get the numeric state ID for PostgreSQL storage
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    /// Convert from PostgreSQL state ID
    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(SettlementStatus::Pending),
            10 => Some(SettlementStatus::Held),
            20 => Some(SettlementStatus::Processing),
            30 => Some(SettlementStatus::Released),
            40 => Some(SettlementStatus::Completed),
            50 => Some(SettlementStatus::Disputed),
            60 => Some(SettlementStatus::WaitingRefund),
            70 => Some(SettlementStatus::Refunded),
            -10 => Some(SettlementStatus::Failed),
            -20 => Some(SettlementStatus::FailedRefund),
            -30 => Some(SettlementStatus::Cancelled),
            _ => None,
        }
    }

    /// Get human-readable state name
    pub fn as_str(&self) -> &'static str {
        match self {
            SettlementStatus::Pending => "PENDING",
            SettlementStatus::Held => "HELD",
            SettlementStatus::Processing => "PROCESSING",
            SettlementStatus::Released => "RELEASED",
            SettlementStatus::Completed => "COMPLETED",
            SettlementStatus::Disputed => "DISPUTED",
            SettlementStatus::WaitingRefund => "WAITING_REFUND",
            SettlementStatus::Refunded => "REFUNDED",
            SettlementStatus::Failed => "FAILED",
            SettlementStatus::FailedRefund => "FAILED_REFUND",
            SettlementStatus::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for SettlementStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<i16> for SettlementStatus {
    type Error = ();

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        SettlementStatus::from_id(value).ok_or(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use SettlementStatus::*;

    const ALL: [SettlementStatus; 11] = [
        Pending,
        Held,
        Processing,
        Released,
        Completed,
        Disputed,
        WaitingRefund,
        Refunded,
        Failed,
        FailedRefund,
        Cancelled,
    ];

    #[test]
    fn test_terminal_states() {
        assert!(Released.is_terminal());
        assert!(Completed.is_terminal());
        assert!(Refunded.is_terminal());
        assert!(Failed.is_terminal());
        assert!(Cancelled.is_terminal());

        assert!(!Pending.is_terminal());
        assert!(!Held.is_terminal());
        assert!(!Processing.is_terminal());
        assert!(!Disputed.is_terminal());
        assert!(!WaitingRefund.is_terminal());
        assert!(!FailedRefund.is_terminal());
    }

    #[test]
    fn test_no_transition_out_of_terminal() {
        for from in ALL.iter().filter(|s| s.is_terminal()) {
            for to in ALL {
                assert!(
                    !from.can_transition_to(to),
                    "{} -> {} should not be allowed",
                    from,
                    to
                );
            }
        }
    }

    #[test]
    fn test_release_path() {
        assert!(Pending.can_transition_to(Held));
        assert!(Held.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Released));
        assert!(Processing.can_transition_to(Completed));
    }

    #[test]
    fn test_transfer_failure_returns_to_held() {
        assert!(Processing.can_transition_to(Held));
        assert!(Processing.can_transition_to(Failed));
        assert!(!Processing.can_transition_to(Cancelled));
    }

    #[test]
    fn test_cancellation_only_before_transfer() {
        assert!(Pending.can_transition_to(Cancelled));
        assert!(Held.can_transition_to(Cancelled));
        assert!(!Processing.can_transition_to(Cancelled));
        assert!(!WaitingRefund.can_transition_to(Cancelled));
    }

    #[test]
    fn test_refund_path() {
        assert!(Held.can_transition_to(WaitingRefund));
        assert!(WaitingRefund.can_transition_to(Refunded));
        assert!(WaitingRefund.can_transition_to(FailedRefund));
        // A failed refund may be retried
        assert!(FailedRefund.can_transition_to(WaitingRefund));
    }

    #[test]
    fn test_state_id_roundtrip() {
        for status in ALL {
            let id = status.id();
            let recovered = SettlementStatus::from_id(id).unwrap();
            assert_eq!(status, recovered);
        }
    }

    #[test]
    fn test_invalid_state_id() {
        assert!(SettlementStatus::from_id(999).is_none());
        assert!(SettlementStatus::from_id(-999).is_none());
    }

    #[test]
    fn test_display() {
        assert_eq!(Held.to_string(), "HELD");
        assert_eq!(WaitingRefund.to_string(), "WAITING_REFUND");
        assert_eq!(Cancelled.to_string(), "CANCELLED");
    }
}
