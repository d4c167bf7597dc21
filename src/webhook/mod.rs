//! Webhook Reconciliation
//!
//! Signature verification, typed event parsing, and the engine that maps
//! each gateway notification to one idempotent state-machine call.

pub mod engine;
pub mod event;
pub mod signature;

pub use engine::{ReconciliationEngine, WebhookDisposition};
pub use event::{GatewayEvent, WebhookEnvelope};
pub use signature::{SignatureError, sign_payload, verify_signature};
