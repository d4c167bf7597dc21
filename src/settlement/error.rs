//! Settlement Error Types
//!
//! Business-rule violations are returned to callers as typed variants and are
//! never retried; infrastructure conflicts are absorbed by the retry layer
//! and only surface as `RetriesExhausted`.

use chrono::{DateTime, Utc};
use thiserror::Error;

use super::status::SettlementStatus;
use crate::db::{RetryClass, is_serialization_conflict};
use crate::money::MoneyError;
use crate::psp::GatewayError;
use crate::rates::SelectorError;

/// Settlement engine error types
#[derive(Error, Debug)]
pub enum SettlementError {
    // === Business-rule violations (never retried) ===
    #[error("Settlement {settlement_id} is not transferable from status {status}")]
    NotTransferable {
        settlement_id: String,
        status: SettlementStatus,
    },

    #[error("Transfer not ready: funds are held until {planned_release_at}")]
    TransferNotReady {
        planned_release_at: DateTime<Utc>,
    },

    #[error("Seller {seller_id} has no payout destination")]
    NoPayoutDestination { seller_id: i64 },

    #[error("Refund not possible from status {status}")]
    NotRefundable { status: SettlementStatus },

    // === External-data staleness ===
    #[error(transparent)]
    Selector(#[from] SelectorError),

    // === Lookup failures ===
    #[error("Settlement not found: {0}")]
    SettlementNotFound(String),

    #[error("No order lines found for order {0}")]
    OrderNotFound(i64),

    #[error("Seller not found: {0}")]
    SellerNotFound(i64),

    // === Infrastructure ===
    #[error("Transaction retries exhausted after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Money(#[from] MoneyError),
}

impl SettlementError {
    /// Get the error code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            SettlementError::NotTransferable { .. } => "NOT_TRANSFERABLE",
            SettlementError::TransferNotReady { .. } => "TRANSFER_NOT_READY",
            SettlementError::NoPayoutDestination { .. } => "NO_PAYOUT_DESTINATION",
            SettlementError::NotRefundable { .. } => "NOT_REFUNDABLE",
            SettlementError::Selector(SelectorError::ExchangeRateUnavailable { .. }) => {
                "EXCHANGE_RATE_UNAVAILABLE"
            }
            SettlementError::Selector(SelectorError::InsufficientBalance { .. }) => {
                "INSUFFICIENT_BALANCE"
            }
            SettlementError::Selector(SelectorError::Money(_)) => "MONEY_ERROR",
            SettlementError::SettlementNotFound(_) => "SETTLEMENT_NOT_FOUND",
            SettlementError::OrderNotFound(_) => "ORDER_NOT_FOUND",
            SettlementError::SellerNotFound(_) => "SELLER_NOT_FOUND",
            SettlementError::RetriesExhausted { .. } => "RETRIES_EXHAUSTED",
            SettlementError::Database(_) => "DATABASE_ERROR",
            SettlementError::Gateway(_) => "GATEWAY_ERROR",
            SettlementError::Money(_) => "MONEY_ERROR",
        }
    }

    /// Get HTTP status code suggestion
    pub fn http_status(&self) -> u16 {
        match self {
            SettlementError::NotTransferable { .. }
            | SettlementError::TransferNotReady { .. }
            | SettlementError::NotRefundable { .. } => 409,
            SettlementError::NoPayoutDestination { .. }
            | SettlementError::Selector(_)
            | SettlementError::Money(_) => 422,
            SettlementError::SettlementNotFound(_)
            | SettlementError::OrderNotFound(_)
            | SettlementError::SellerNotFound(_) => 404,
            SettlementError::RetriesExhausted { .. } => 503,
            SettlementError::Database(_) | SettlementError::Gateway(_) => 500,
        }
    }
}

impl RetryClass for SettlementError {
    fn is_conflict(&self) -> bool {
        match self {
            SettlementError::Database(e) => is_serialization_conflict(e),
            _ => false,
        }
    }

    fn retries_exhausted(attempts: u32, last_error: String) -> Self {
        SettlementError::RetriesExhausted {
            attempts,
            last_error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err = SettlementError::NoPayoutDestination { seller_id: 7 };
        assert_eq!(err.code(), "NO_PAYOUT_DESTINATION");
        assert_eq!(err.http_status(), 422);

        let err = SettlementError::NotTransferable {
            settlement_id: "x".into(),
            status: SettlementStatus::Processing,
        };
        assert_eq!(err.code(), "NOT_TRANSFERABLE");
        assert_eq!(err.http_status(), 409);
    }

    #[test]
    fn test_retries_exhausted_surface() {
        let err = SettlementError::retries_exhausted(4, "deadlock detected".into());
        assert_eq!(err.code(), "RETRIES_EXHAUSTED");
        assert_eq!(err.http_status(), 503);
        assert!(!err.is_conflict());
    }

    #[test]
    fn test_business_errors_are_not_conflicts() {
        let err = SettlementError::TransferNotReady {
            planned_release_at: Utc::now(),
        };
        assert!(!err.is_conflict());
    }
}
