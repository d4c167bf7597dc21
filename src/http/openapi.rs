//! OpenAPI document for the settlement API

use utoipa::OpenApi;

use super::handlers;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "marketpay settlement API",
        description = "Marketplace settlement engine: webhook reconciliation, release, payouts",
        version = "0.1.0"
    ),
    paths(
        handlers::gateway_webhook,
        handlers::register_order_settlements,
        handlers::release_settlement,
        handlers::get_settlement,
        handlers::create_payout,
        handlers::list_payouts,
    ),
    components(schemas(
        handlers::WebhookAck,
        handlers::RegisteredSettlements,
        handlers::ReleaseRequest,
        handlers::ReleaseResponse,
        handlers::SettlementView,
        handlers::CreatePayoutRequest,
        handlers::PayoutView,
        handlers::PayoutItemView,
    )),
    tags(
        (name = "Webhooks", description = "Gateway notification intake"),
        (name = "Settlements", description = "Settlement lifecycle"),
        (name = "Payouts", description = "Payout batches")
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_document_builds() {
        let doc = ApiDoc::openapi();
        let json = serde_json::to_string(&doc).unwrap();
        assert!(json.contains("/api/v1/webhooks/gateway"));
        assert!(json.contains("/api/v1/settlements/{id}/release"));
    }
}
