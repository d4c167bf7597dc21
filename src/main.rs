//! marketpay - Marketplace Settlement Engine
//!
//! Process entry point. Owns every lifecycle: config, logging, the database
//! pool, the gateway client, the engines, the background sweeper, and the
//! HTTP server. Nothing connects or listens at module-import time.

use std::sync::Arc;

use anyhow::Context;

use marketpay::config::AppConfig;
use marketpay::db::Database;
use marketpay::http::{self, AppState};
use marketpay::logging::init_logging;
use marketpay::payout::PayoutService;
use marketpay::psp::HttpGateway;
use marketpay::settlement::SettlementEngine;
use marketpay::sweeper::Sweeper;
use marketpay::webhook::ReconciliationEngine;

fn get_env() -> String {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if (args[i] == "--env" || args[i] == "-e") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    "dev".to_string()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = get_env();
    let config = AppConfig::load(&env);
    let _log_guard = init_logging(&config);

    tracing::info!(env = %env, "marketpay starting");

    let db = Database::connect(&config.postgres_url)
        .await
        .context("Failed to connect to PostgreSQL")?;
    marketpay::schema::init_schema(db.pool())
        .await
        .context("Failed to initialize schema")?;

    let gateway = Arc::new(HttpGateway::new(&config.psp.base_url, &config.psp.secret_key));

    let settlements = Arc::new(SettlementEngine::new(
        db.clone(),
        gateway.clone(),
        config.settlement.clone(),
        config.retry,
    ));
    let payouts = Arc::new(PayoutService::new(db.clone(), config.retry));
    let webhooks = Arc::new(ReconciliationEngine::new(
        db.clone(),
        settlements.clone(),
        payouts.clone(),
        gateway,
        config.retry,
        &config.psp.webhook_secret,
        config.psp.signature_tolerance_secs as i64,
    ));

    let sweeper = Sweeper::new(settlements.clone(), &config.settlement);
    tokio::spawn(sweeper.run());

    let state = Arc::new(AppState {
        db,
        settlements,
        payouts,
        webhooks,
    });
    let app = http::create_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    tracing::info!(addr = %addr, "HTTP server listening");

    axum::serve(listener, app)
        .await
        .context("HTTP server failed")?;

    Ok(())
}
