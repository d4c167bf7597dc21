//! Background settlement sweeper
//!
//! Periodic reconciliation pass: auto-release settlements past their hold
//! date, flag stuck transfers for manual review, and cancel pending records
//! whose payment never confirmed. Runs under the same lock-and-retry
//! discipline as interactive requests, so it can race webhooks safely.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

use crate::config::SettlementConfig;
use crate::settlement::SettlementEngine;

const SWEEP_BATCH_LIMIT: i64 = 100;

pub struct Sweeper {
    engine: Arc<SettlementEngine>,
    interval: Duration,
    auto_release: bool,
}

impl Sweeper {
    pub fn new(engine: Arc<SettlementEngine>, config: &SettlementConfig) -> Self {
        Self {
            engine,
            interval: Duration::from_secs(config.sweep_interval_secs),
            auto_release: config.auto_release,
        }
    }

    /// Run forever; spawned by the process entry point
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!(interval_secs = self.interval.as_secs(), "Settlement sweeper started");

        loop {
            ticker.tick().await;
            self.sweep_once().await;
        }
    }

    /// One full pass; each sub-sweep failure is logged and does not stop the
    /// others
    pub async fn sweep_once(&self) {
        if self.auto_release {
            match self.engine.sweep_release_due(SWEEP_BATCH_LIMIT).await {
                Ok(released) if released > 0 => {
                    info!(released, "Sweep released settlements past hold date");
                }
                Ok(_) => {}
                Err(e) => error!(error = %e, "Release sweep failed"),
            }
        }

        match self.engine.sweep_stuck_processing(SWEEP_BATCH_LIMIT).await {
            Ok(flagged) if flagged > 0 => {
                info!(flagged, "Sweep flagged stuck transfers for review");
            }
            Ok(_) => {}
            Err(e) => error!(error = %e, "Stuck-processing sweep failed"),
        }

        match self.engine.sweep_expired_pending(SWEEP_BATCH_LIMIT).await {
            Ok(cancelled) if cancelled > 0 => {
                info!(cancelled, "Sweep cancelled expired pending settlements");
            }
            Ok(_) => {}
            Err(e) => error!(error = %e, "Expired-pending sweep failed"),
        }
    }
}
