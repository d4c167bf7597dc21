//! marketpay - Marketplace Settlement Engine
//!
//! Tracks money owed to sellers after a buyer pays, holds it for a fixed
//! period, transfers it out later, and reconciles its own records against
//! asynchronous, possibly-duplicated, possibly-out-of-order gateway
//! notifications.
//!
//! # Modules
//!
//! - [`settlement`] - Per-(order, seller) settlement state machine
//! - [`webhook`] - Signature verification and event reconciliation
//! - [`payout`] - Payout batching and failure reconciliation
//! - [`rates`] - Exchange-rate snapshots and the transfer-currency selector
//! - [`psp`] - Payment gateway client (HTTP + mock)
//! - [`db`] - Connection pool and the isolation/retry transaction layer
//! - [`money`] - Minor-unit fee and conversion arithmetic
//! - [`http`] - Axum surface: webhooks, release endpoint, reads
//! - [`sweeper`] - Periodic release/timeout sweeps

pub mod config;
pub mod db;
pub mod http;
pub mod logging;
pub mod money;
pub mod payout;
pub mod psp;
pub mod rates;
pub mod schema;
pub mod settlement;
pub mod sweeper;
pub mod webhook;

// Convenient re-exports at crate root
pub use config::AppConfig;
pub use db::{Database, IsolationLevel};
pub use money::{FeeBreakdown, FeeSchedule, MoneyError};
pub use payout::{Payout, PayoutItem, PayoutService, PayoutStatus};
pub use psp::{HttpGateway, MockGateway, PaymentGateway};
pub use rates::{RateSnapshot, TransferPlan, select_transfer_currency};
pub use settlement::{
    ApplyOutcome, SettlementEngine, SettlementError, SettlementId, SettlementRecord,
    SettlementStatus,
};
pub use sweeper::Sweeper;
pub use webhook::{ReconciliationEngine, WebhookDisposition};
