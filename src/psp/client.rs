//! Gateway client trait

use async_trait::async_trait;

use super::types::{
    CheckoutSession, CreateRefund, CreateTransfer, GatewayBalance, GatewayError, RefundCreated,
    TransferCreated,
};

/// Outbound operations against the payment gateway.
///
/// Implementations must be safe to call concurrently; the engine may issue
/// transfers for different settlements in parallel.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Request a transfer to a seller's connected account
    async fn create_transfer(&self, req: &CreateTransfer) -> Result<TransferCreated, GatewayError>;

    /// Request a refund of a buyer charge
    async fn create_refund(&self, req: &CreateRefund) -> Result<RefundCreated, GatewayError>;

    /// Fallback lookup when a webhook payload is missing metadata
    async fn retrieve_checkout_session(&self, id: &str) -> Result<CheckoutSession, GatewayError>;

    /// Platform balances available for transfers, per currency
    async fn available_balances(&self) -> Result<Vec<GatewayBalance>, GatewayError>;
}
