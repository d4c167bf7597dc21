//! Mock gateway for tests and local runs
//!
//! Records every outbound call and returns scripted results so the
//! webhook/state-machine paths can be exercised without a live gateway.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use super::client::PaymentGateway;
use super::types::{
    CheckoutSession, CreateRefund, CreateTransfer, GatewayBalance, GatewayError, RefundCreated,
    TransferCreated,
};

#[derive(Default)]
pub struct MockGateway {
    seq: AtomicU64,
    balances: Mutex<Vec<GatewayBalance>>,
    sessions: Mutex<HashMap<String, CheckoutSession>>,
    transfers: Mutex<Vec<CreateTransfer>>,
    refunds: Mutex<Vec<CreateRefund>>,
    fail_transfers: Mutex<Option<String>>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_balances(&self, balances: Vec<(&str, i64)>) {
        *self.balances.lock().unwrap() = balances
            .into_iter()
            .map(|(currency, amount)| GatewayBalance {
                currency: currency.to_string(),
                amount,
            })
            .collect();
    }

    pub fn add_session(&self, session: CheckoutSession) {
        self.sessions
            .lock()
            .unwrap()
            .insert(session.id.clone(), session);
    }

    /// Make subsequent create_transfer calls fail with an API error
    pub fn fail_transfers_with(&self, message: &str) {
        *self.fail_transfers.lock().unwrap() = Some(message.to_string());
    }

    pub fn clear_transfer_failure(&self) {
        *self.fail_transfers.lock().unwrap() = None;
    }

    /// Transfer requests recorded so far
    pub fn transfers(&self) -> Vec<CreateTransfer> {
        self.transfers.lock().unwrap().clone()
    }

    pub fn refunds(&self) -> Vec<CreateRefund> {
        self.refunds.lock().unwrap().clone()
    }

    fn next_ref(&self, prefix: &str) -> String {
        let n = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        format!("{}_{:06}", prefix, n)
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    async fn create_transfer(&self, req: &CreateTransfer) -> Result<TransferCreated, GatewayError> {
        if let Some(message) = self.fail_transfers.lock().unwrap().clone() {
            return Err(GatewayError::Api {
                status: 400,
                code: "balance_insufficient".to_string(),
                message,
            });
        }

        self.transfers.lock().unwrap().push(req.clone());
        Ok(TransferCreated {
            id: self.next_ref("tr"),
            amount: req.amount,
            currency: req.currency.clone(),
            destination: req.destination.clone(),
        })
    }

    async fn create_refund(&self, req: &CreateRefund) -> Result<RefundCreated, GatewayError> {
        self.refunds.lock().unwrap().push(req.clone());
        Ok(RefundCreated {
            id: self.next_ref("re"),
            status: "pending".to_string(),
        })
    }

    async fn retrieve_checkout_session(&self, id: &str) -> Result<CheckoutSession, GatewayError> {
        self.sessions
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| GatewayError::SessionNotFound(id.to_string()))
    }

    async fn available_balances(&self) -> Result<Vec<GatewayBalance>, GatewayError> {
        Ok(self.balances.lock().unwrap().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_records_transfers() {
        let mock = MockGateway::new();
        let req = CreateTransfer {
            amount: 100,
            currency: "USD".into(),
            destination: "acct_1".into(),
            transfer_group: "order-1".into(),
            metadata: HashMap::new(),
        };

        let created = mock.create_transfer(&req).await.unwrap();
        assert!(created.id.starts_with("tr_"));
        assert_eq!(mock.transfers().len(), 1);
    }

    #[tokio::test]
    async fn test_mock_scripted_failure() {
        let mock = MockGateway::new();
        mock.fail_transfers_with("no funds");

        let req = CreateTransfer {
            amount: 100,
            currency: "USD".into(),
            destination: "acct_1".into(),
            transfer_group: "order-1".into(),
            metadata: HashMap::new(),
        };
        assert!(mock.create_transfer(&req).await.is_err());
        assert!(mock.transfers().is_empty());

        mock.clear_transfer_failure();
        assert!(mock.create_transfer(&req).await.is_ok());
    }
}
