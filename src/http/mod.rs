//! HTTP Surface
//!
//! Axum router for webhook intake, the release endpoint, and settlement/
//! payout reads. Business logic lives in the engines; handlers only
//! translate between HTTP and typed calls.

pub mod handlers;
pub mod openapi;
pub mod state;
pub mod types;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;

pub use state::AppState;
pub use types::{ApiError, ApiResponse, ApiResult, ok};

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(handlers::healthz))
        .route("/api/v1/webhooks/gateway", post(handlers::gateway_webhook))
        .route(
            "/api/v1/orders/{id}/settlements",
            post(handlers::register_order_settlements),
        )
        .route(
            "/api/v1/settlements/{id}/release",
            post(handlers::release_settlement),
        )
        .route("/api/v1/settlements/{id}", get(handlers::get_settlement))
        .route(
            "/api/v1/sellers/{id}/payouts",
            post(handlers::create_payout).get(handlers::list_payouts),
        )
        .route(
            "/api-docs/openapi.json",
            get(|| async { Json(openapi::ApiDoc::openapi()) }),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
