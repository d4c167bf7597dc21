//! HTTP gateway client
//!
//! REST client for the payment service provider. Authentication is a bearer
//! secret; error bodies are decoded into typed API errors so callers never
//! see raw HTTP plumbing.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::client::PaymentGateway;
use super::types::{
    CheckoutSession, CreateRefund, CreateTransfer, GatewayBalance, GatewayError, RefundCreated,
    TransferCreated,
};

pub struct HttpGateway {
    client: reqwest::Client,
    base_url: String,
    secret_key: String,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct BalanceBody {
    available: Vec<GatewayBalance>,
}

impl HttpGateway {
    pub fn new(base_url: &str, secret_key: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            secret_key: secret_key.to_string(),
        }
    }

    async fn post_json<B: serde::Serialize, T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, GatewayError> {
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, "Gateway POST");
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.secret_key)
            .json(body)
            .send()
            .await?;
        Self::decode(response).await
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, GatewayError> {
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, "Gateway GET");
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.secret_key)
            .send()
            .await?;
        Self::decode(response).await
    }

    async fn decode<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, GatewayError> {
        let status = response.status();
        if status.is_success() {
            let body = response.text().await?;
            return serde_json::from_str(&body).map_err(|e| GatewayError::Decode(e.to_string()));
        }

        let body = response.text().await.unwrap_or_default();
        match serde_json::from_str::<ApiErrorBody>(&body) {
            Ok(api) => Err(GatewayError::Api {
                status: status.as_u16(),
                code: api.error.code,
                message: api.error.message,
            }),
            Err(_) => Err(GatewayError::Api {
                status: status.as_u16(),
                code: "unknown".to_string(),
                message: body,
            }),
        }
    }
}

#[async_trait]
impl PaymentGateway for HttpGateway {
    async fn create_transfer(&self, req: &CreateTransfer) -> Result<TransferCreated, GatewayError> {
        self.post_json("/v1/transfers", req).await
    }

    async fn create_refund(&self, req: &CreateRefund) -> Result<RefundCreated, GatewayError> {
        self.post_json("/v1/refunds", req).await
    }

    async fn retrieve_checkout_session(&self, id: &str) -> Result<CheckoutSession, GatewayError> {
        match self
            .get_json::<CheckoutSession>(&format!("/v1/checkout/sessions/{}", id))
            .await
        {
            Err(GatewayError::Api { status: 404, .. }) => {
                Err(GatewayError::SessionNotFound(id.to_string()))
            }
            other => other,
        }
    }

    async fn available_balances(&self) -> Result<Vec<GatewayBalance>, GatewayError> {
        let body: BalanceBody = self.get_json("/v1/balance").await?;
        Ok(body.available)
    }
}
