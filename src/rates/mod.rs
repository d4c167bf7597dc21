//! Exchange Rates
//!
//! Append-only rate snapshots and the transfer-currency selector used when a
//! release cannot be funded in the transaction's own currency.

pub mod selector;
pub mod store;
pub mod types;

pub use selector::{CurrencyBalance, SelectorError, TransferPlan, select_transfer_currency};
pub use store::RateDb;
pub use types::RateSnapshot;
