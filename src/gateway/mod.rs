mod mercadopago;

pub use mercadopago::MercadoPagoGateway;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::TransactionStatus;

/// Failures talking to the payment provider.
///
/// Creation surfaces these to the caller; the reconciliation paths absorb
/// them and fall back to the last known local status instead.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("missing credentials: {0}")]
    MissingCredentials(String),

    /// Network failure, timeout, or 5xx.
    #[error("provider unreachable: {0}")]
    Unavailable(String),

    /// Provider answered with a 4xx (bad credentials, malformed request).
    #[error("provider rejected request ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("unexpected provider response: {0}")]
    InvalidResponse(String),
}

impl From<reqwest::Error> for GatewayError {
    fn from(e: reqwest::Error) -> Self {
        GatewayError::Unavailable(e.to_string())
    }
}

/// Result of creating a payment intent at the provider.
#[derive(Debug, Clone)]
pub struct CreatedPayment {
    /// Provider-assigned reference for the intent (order/preference id).
    /// Distinct ID space from the eventual payment id.
    pub provider_reference: String,
    /// Opaque QR payload for the register to render.
    pub qr_payload: String,
    pub raw: serde_json::Value,
}

/// A payment as reported by the provider's search or point lookup.
#[derive(Debug, Clone)]
pub struct CandidatePayment {
    /// The provider's payment id (not the order/preference reference).
    pub payment_id: String,
    /// The order/preference reference this payment was created from.
    /// Older payment shapes omit it.
    pub preference_reference: Option<String>,
    pub external_reference: Option<String>,
    /// Provider status string, e.g. "approved", "pending", "in_process".
    pub status: String,
    /// RFC 3339 creation timestamp as reported; may carry any UTC offset.
    pub date_created: Option<String>,
    pub raw: serde_json::Value,
}

impl CandidatePayment {
    /// Map the provider's status vocabulary onto ours. Anything unknown is
    /// treated as still pending rather than guessed at.
    pub fn local_status(&self) -> TransactionStatus {
        match self.status.as_str() {
            "approved" => TransactionStatus::Approved,
            "rejected" => TransactionStatus::Rejected,
            "cancelled" | "refunded" | "charged_back" => TransactionStatus::Cancelled,
            _ => TransactionStatus::Pending,
        }
    }

    /// Creation timestamp normalized to UTC seconds. `None` when the field
    /// is absent or unparseable; callers must skip such candidates rather
    /// than guess.
    pub fn created_at_utc(&self) -> Option<i64> {
        let raw = self.date_created.as_deref()?;
        DateTime::parse_from_rfc3339(raw)
            .ok()
            .map(|dt| dt.with_timezone(&Utc).timestamp())
    }
}

/// Parameters for creating a payment intent.
#[derive(Debug, Clone)]
pub struct CreatePaymentRequest {
    pub amount_cents: i64,
    pub description: String,
    pub external_reference: Option<String>,
}

/// The three provider operations reconciliation needs. The provider's
/// endpoints are eventually consistent with each other; callers must not
/// assume a payment visible through one is visible through another yet.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Create a payment intent / QR order.
    async fn create_payment(
        &self,
        request: &CreatePaymentRequest,
    ) -> Result<CreatedPayment, GatewayError>;

    /// Search payments by external reference, newest first.
    async fn search_by_external_reference(
        &self,
        external_reference: &str,
    ) -> Result<Vec<CandidatePayment>, GatewayError>;

    /// Point lookup of a single payment by its payment id.
    async fn get_payment_by_id(
        &self,
        payment_id: &str,
    ) -> Result<Option<CandidatePayment>, GatewayError>;
}
