//! Shared handler state
//!
//! All engine dependencies are constructed by the process entry point and
//! injected here; handlers never reach for globals.

use std::sync::Arc;

use crate::db::Database;
use crate::payout::PayoutService;
use crate::settlement::SettlementEngine;
use crate::webhook::ReconciliationEngine;

pub struct AppState {
    pub db: Database,
    pub settlements: Arc<SettlementEngine>,
    pub payouts: Arc<PayoutService>,
    pub webhooks: Arc<ReconciliationEngine>,
}
