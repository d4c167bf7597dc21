//! Payout Batching
//!
//! Groups released settlement transactions into per-seller payout batches and
//! reconciles them against payout webhooks. Items are denormalized audit
//! lines copied at grouping time; payout reporting never re-reads settlement
//! state.

pub mod service;
pub mod store;
pub mod types;

pub use service::PayoutService;
pub use store::PayoutDb;
pub use types::{Payout, PayoutId, PayoutItem, PayoutStatus};
