//! HTTP handlers: webhook intake, release endpoint, settlement/payout reads

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::state::AppState;
use super::types::{ApiError, ApiResult, ok};
use crate::settlement::{SettlementId, SettlementRecord};
use crate::webhook::WebhookDisposition;

/// Header carrying the gateway's HMAC signature
pub const SIGNATURE_HEADER: &str = "gateway-signature";

#[derive(Debug, Serialize, ToSchema)]
pub struct WebhookAck {
    pub received: bool,
    #[schema(example = "transfer.succeeded")]
    pub kind: String,
    #[schema(example = "applied")]
    pub outcome: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ReleaseRequest {
    /// Who asked for the release (operator id or subsystem name)
    #[schema(example = "ops-dashboard")]
    pub actor: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ReleaseResponse {
    pub settlement_id: String,
    pub transfer_ref: String,
    pub currency: String,
    pub amount_minor: i64,
    pub status: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SettlementView {
    pub settlement_id: String,
    pub order_id: i64,
    pub seller_id: i64,
    pub gross_minor: i64,
    pub platform_fee_minor: i64,
    pub gateway_fee_minor: i64,
    pub net_minor: i64,
    pub currency: String,
    pub status: String,
    pub hold_start_at: Option<String>,
    pub planned_release_at: Option<String>,
    pub actual_release_at: Option<String>,
    pub transfer_ref: Option<String>,
    pub payed_out: bool,
    pub needs_review: bool,
}

impl From<SettlementRecord> for SettlementView {
    fn from(r: SettlementRecord) -> Self {
        Self {
            settlement_id: r.settlement_id.to_string(),
            order_id: r.order_id,
            seller_id: r.seller_id,
            gross_minor: r.gross_minor,
            platform_fee_minor: r.platform_fee_minor,
            gateway_fee_minor: r.gateway_fee_minor,
            net_minor: r.net_minor,
            currency: r.currency,
            status: r.status.as_str().to_string(),
            hold_start_at: r.hold_start_at.map(|t| t.to_rfc3339()),
            planned_release_at: r.planned_release_at.map(|t| t.to_rfc3339()),
            actual_release_at: r.actual_release_at.map(|t| t.to_rfc3339()),
            transfer_ref: r.transfer_ref,
            payed_out: r.payed_out,
            needs_review: r.needs_review,
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreatePayoutRequest {
    #[schema(example = "USD")]
    pub currency: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PayoutItemView {
    pub settlement_id: String,
    pub order_id: i64,
    pub amount_minor: i64,
    pub currency: String,
    pub description: String,
    pub transfer_date: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PayoutView {
    pub payout_id: String,
    pub seller_id: i64,
    pub payout_ref: Option<String>,
    pub currency: String,
    pub total_minor: i64,
    pub status: String,
    pub arrival_date: Option<String>,
    pub failure_code: Option<String>,
    pub failure_message: Option<String>,
    pub items: Vec<PayoutItemView>,
}

fn payout_view(payout: crate::payout::Payout, items: Vec<crate::payout::PayoutItem>) -> PayoutView {
    PayoutView {
        payout_id: payout.payout_id.to_string(),
        seller_id: payout.seller_id,
        payout_ref: payout.payout_ref,
        currency: payout.currency,
        total_minor: payout.total_minor,
        status: payout.status.as_str().to_string(),
        arrival_date: payout.arrival_date.map(|t| t.to_rfc3339()),
        failure_code: payout.failure_code,
        failure_message: payout.failure_message,
        items: items
            .into_iter()
            .map(|i| PayoutItemView {
                settlement_id: i.settlement_id,
                order_id: i.order_id,
                amount_minor: i.amount_minor,
                currency: i.currency,
                description: i.description,
                transfer_date: i.transfer_date.map(|t| t.to_rfc3339()),
            })
            .collect(),
    }
}

/// Gateway webhook intake
///
/// POST /api/v1/webhooks/gateway
///
/// Body must be the raw event envelope; the signature is verified against
/// the shared secret before anything is parsed.
#[utoipa::path(
    post,
    path = "/api/v1/webhooks/gateway",
    request_body(content = String, description = "Signed event envelope", content_type = "application/json"),
    responses(
        (status = 200, description = "Event acknowledged", body = WebhookAck),
        (status = 400, description = "Signature invalid or payload malformed"),
        (status = 500, description = "Transient failure; gateway should redeliver")
    ),
    tag = "Webhooks"
)]
pub async fn gateway_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, ApiError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());

    match state.webhooks.handle(&body, signature).await {
        Ok(WebhookDisposition::Accepted { kind, outcome }) => Ok(Json(WebhookAck {
            received: true,
            kind: kind.to_string(),
            outcome: outcome.to_string(),
        })),
        Ok(WebhookDisposition::Rejected { reason }) => {
            Err(ApiError::new(StatusCode::BAD_REQUEST, "WEBHOOK_REJECTED", reason))
        }
        Err(e) => Err(e.into()),
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RegisteredSettlements {
    pub order_id: i64,
    pub settlement_ids: Vec<String>,
}

/// Register pending settlements for an order ahead of payment confirmation
///
/// POST /api/v1/orders/{id}/settlements
///
/// Called by the order service once an order is placed. Idempotent; the
/// payment-confirmed webhook will fan out on its own if this was never
/// called.
#[utoipa::path(
    post,
    path = "/api/v1/orders/{id}/settlements",
    params(("id" = i64, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Pending settlements registered", body = RegisteredSettlements),
        (status = 404, description = "Order has no seller lines")
    ),
    tag = "Settlements"
)]
pub async fn register_order_settlements(
    State(state): State<Arc<AppState>>,
    Path(order_id): Path<i64>,
) -> ApiResult<RegisteredSettlements> {
    let ids = state.settlements.register_order(order_id).await?;
    ok(RegisteredSettlements {
        order_id,
        settlement_ids: ids.iter().map(|id| id.to_string()).collect(),
    })
}

/// Release held funds to the seller
///
/// POST /api/v1/settlements/{id}/release
#[utoipa::path(
    post,
    path = "/api/v1/settlements/{id}/release",
    params(("id" = String, Path, description = "Settlement ID (ULID)")),
    request_body = ReleaseRequest,
    responses(
        (status = 200, description = "Transfer requested", body = ReleaseResponse),
        (status = 404, description = "Settlement not found"),
        (status = 409, description = "Not in a releasable state or hold not elapsed"),
        (status = 422, description = "No payout destination, stale rates, or insufficient balance")
    ),
    tag = "Settlements"
)]
pub async fn release_settlement(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<ReleaseRequest>,
) -> ApiResult<ReleaseResponse> {
    let settlement_id: SettlementId = id
        .parse()
        .map_err(|_| ApiError::bad_request("Invalid settlement ID format"))?;
    let actor = req.actor.as_deref().unwrap_or("api");

    let outcome = state.settlements.request_release(settlement_id, actor).await?;
    ok(ReleaseResponse {
        settlement_id: outcome.settlement_id.to_string(),
        transfer_ref: outcome.transfer_ref,
        currency: outcome.currency,
        amount_minor: outcome.amount_minor,
        status: outcome.status.as_str().to_string(),
    })
}

/// Settlement status lookup
///
/// GET /api/v1/settlements/{id}
#[utoipa::path(
    get,
    path = "/api/v1/settlements/{id}",
    params(("id" = String, Path, description = "Settlement ID (ULID)")),
    responses(
        (status = 200, description = "Settlement state", body = SettlementView),
        (status = 404, description = "Settlement not found")
    ),
    tag = "Settlements"
)]
pub async fn get_settlement(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<SettlementView> {
    let settlement_id: SettlementId = id
        .parse()
        .map_err(|_| ApiError::bad_request("Invalid settlement ID format"))?;

    match state.settlements.get(settlement_id).await? {
        Some(record) => ok(record.into()),
        None => ApiError::not_found(format!("settlement {id}")).into_err(),
    }
}

/// Group a seller's released settlements into a payout batch
///
/// POST /api/v1/sellers/{id}/payouts
#[utoipa::path(
    post,
    path = "/api/v1/sellers/{id}/payouts",
    params(("id" = i64, Path, description = "Seller ID")),
    request_body = CreatePayoutRequest,
    responses(
        (status = 200, description = "Payout batch grouped", body = PayoutView),
        (status = 404, description = "Nothing eligible to group")
    ),
    tag = "Payouts"
)]
pub async fn create_payout(
    State(state): State<Arc<AppState>>,
    Path(seller_id): Path<i64>,
    Json(req): Json<CreatePayoutRequest>,
) -> ApiResult<PayoutView> {
    match state.payouts.create_payout(seller_id, &req.currency).await? {
        Some((payout, items)) => ok(payout_view(payout, items)),
        None => ApiError::not_found("no released settlements awaiting payout").into_err(),
    }
}

/// Payout history for a seller
///
/// GET /api/v1/sellers/{id}/payouts
#[utoipa::path(
    get,
    path = "/api/v1/sellers/{id}/payouts",
    params(("id" = i64, Path, description = "Seller ID")),
    responses((status = 200, description = "Payout batches with items", body = [PayoutView])),
    tag = "Payouts"
)]
pub async fn list_payouts(
    State(state): State<Arc<AppState>>,
    Path(seller_id): Path<i64>,
) -> ApiResult<Vec<PayoutView>> {
    let payouts = state.payouts.list_for_seller(seller_id, 50).await?;
    ok(payouts
        .into_iter()
        .map(|(payout, items)| payout_view(payout, items))
        .collect())
}

/// Liveness/readiness check
pub async fn healthz(State(state): State<Arc<AppState>>) -> Result<&'static str, ApiError> {
    state
        .db
        .health_check()
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?;
    Ok("ok")
}
