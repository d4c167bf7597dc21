//! Settlement State Machine
//!
//! Per-(order, seller) settlement transactions: creation fan-out on payment
//! confirmation, the hold period, release to processing, and reconciliation
//! of asynchronous transfer/refund outcomes.

pub mod engine;
pub mod error;
pub mod status;
pub mod store;
pub mod types;

pub use engine::{
    PaymentConfirmation, RefundNotice, RefundOutcome, ReleaseOutcome, SettlementEngine,
    TransferNotice,
};
pub use error::SettlementError;
pub use status::SettlementStatus;
pub use store::{OrderDb, SellerDb, SettlementDb, note_line};
pub use types::{ApplyOutcome, HoldReason, OrderLine, SellerAccount, SettlementId, SettlementRecord};
