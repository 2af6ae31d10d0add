use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use super::{
    CandidatePayment, CreatePaymentRequest, CreatedPayment, GatewayError, PaymentGateway,
};

const DEFAULT_API_BASE: &str = "https://api.mercadopago.com";

/// Creating the in-store QR order is the user-blocking call at the register,
/// so it gets a longer budget than the background status lookups.
const CREATE_TIMEOUT: Duration = Duration::from_secs(30);
const LOOKUP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct QrOrderResponse {
    id: serde_json::Value,
    qr_data: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PaymentSearchResponse {
    results: Vec<serde_json::Value>,
}

/// MercadoPago in-store QR gateway.
///
/// One adapter for all three provider operations; the QR order endpoint vs.
/// payments endpoints distinction stays inside this type.
#[derive(Debug, Clone)]
pub struct MercadoPagoGateway {
    client: Client,
    api_base: String,
    access_token: String,
    /// Sent as notification_url so the provider can push status changes.
    webhook_url: Option<String>,
}

impl MercadoPagoGateway {
    pub fn new(access_token: &str, webhook_url: Option<String>) -> Self {
        Self::with_api_base(access_token, webhook_url, DEFAULT_API_BASE)
    }

    /// Point the adapter at a different API host.
    pub fn with_api_base(
        access_token: &str,
        webhook_url: Option<String>,
        api_base: &str,
    ) -> Self {
        Self {
            client: Client::new(),
            api_base: api_base.trim_end_matches('/').to_string(),
            access_token: access_token.to_string(),
            webhook_url,
        }
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, GatewayError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        if status.is_client_error() {
            Err(GatewayError::Rejected {
                status: status.as_u16(),
                body,
            })
        } else {
            Err(GatewayError::Unavailable(format!("HTTP {}: {}", status, body)))
        }
    }

    /// Parse one entry of a payments search/lookup response. Field names
    /// follow the provider's payment shape; `order.id` carries the QR order
    /// reference when present (older payments omit the whole object).
    fn parse_candidate(value: serde_json::Value) -> Option<CandidatePayment> {
        let payment_id = match value.get("id") {
            Some(serde_json::Value::Number(n)) => n.to_string(),
            Some(serde_json::Value::String(s)) => s.clone(),
            _ => return None,
        };
        let status = value.get("status")?.as_str()?.to_string();
        let preference_reference = value
            .get("order")
            .and_then(|o| o.get("id"))
            .map(|id| match id {
                serde_json::Value::Number(n) => n.to_string(),
                other => other.as_str().unwrap_or_default().to_string(),
            })
            .filter(|s| !s.is_empty());
        let external_reference = value
            .get("external_reference")
            .and_then(|v| v.as_str())
            .map(String::from);
        let date_created = value
            .get("date_created")
            .and_then(|v| v.as_str())
            .map(String::from);

        Some(CandidatePayment {
            payment_id,
            preference_reference,
            external_reference,
            status,
            date_created,
            raw: value,
        })
    }
}

#[async_trait]
impl PaymentGateway for MercadoPagoGateway {
    async fn create_payment(
        &self,
        request: &CreatePaymentRequest,
    ) -> Result<CreatedPayment, GatewayError> {
        if self.access_token.is_empty() {
            return Err(GatewayError::MissingCredentials(
                "access token is empty".to_string(),
            ));
        }

        // The QR endpoint takes decimal currency units.
        let mut payload = serde_json::json!({
            "amount": request.amount_cents as f64 / 100.0,
            "description": request.description,
        });
        if let Some(ref external_reference) = request.external_reference {
            payload["external_reference"] = serde_json::json!(external_reference);
        }
        if let Some(ref url) = self.webhook_url {
            payload["notification_url"] = serde_json::json!(url);
        }

        tracing::info!(
            external_reference = request.external_reference.as_deref().unwrap_or(""),
            amount_cents = request.amount_cents,
            "Creating QR order"
        );

        let response = self
            .client
            .post(format!(
                "{}/instore/orders/qr/seller/collectors",
                self.api_base
            ))
            .bearer_auth(&self.access_token)
            .timeout(CREATE_TIMEOUT)
            .json(&payload)
            .send()
            .await?;
        let response = Self::check_status(response).await?;

        let raw: serde_json::Value = response
            .json()
            .await
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;
        let order: QrOrderResponse = serde_json::from_value(raw.clone())
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;

        let provider_reference = match &order.id {
            serde_json::Value::Number(n) => n.to_string(),
            serde_json::Value::String(s) if !s.is_empty() => s.clone(),
            _ => {
                return Err(GatewayError::InvalidResponse(
                    "QR order response has no id".to_string(),
                ))
            }
        };
        let qr_payload = order.qr_data.ok_or_else(|| {
            GatewayError::InvalidResponse("QR order response has no qr_data".to_string())
        })?;

        Ok(CreatedPayment {
            provider_reference,
            qr_payload,
            raw,
        })
    }

    async fn search_by_external_reference(
        &self,
        external_reference: &str,
    ) -> Result<Vec<CandidatePayment>, GatewayError> {
        let response = self
            .client
            .get(format!("{}/v1/payments/search", self.api_base))
            .bearer_auth(&self.access_token)
            .timeout(LOOKUP_TIMEOUT)
            .query(&[
                ("external_reference", external_reference),
                ("sort", "date_created"),
                ("criteria", "desc"),
            ])
            .send()
            .await?;
        let response = Self::check_status(response).await?;

        let search: PaymentSearchResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;

        Ok(search
            .results
            .into_iter()
            .filter_map(Self::parse_candidate)
            .collect())
    }

    async fn get_payment_by_id(
        &self,
        payment_id: &str,
    ) -> Result<Option<CandidatePayment>, GatewayError> {
        let response = self
            .client
            .get(format!("{}/v1/payments/{}", self.api_base, payment_id))
            .bearer_auth(&self.access_token)
            .timeout(LOOKUP_TIMEOUT)
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = Self::check_status(response).await?;

        let raw: serde_json::Value = response
            .json()
            .await
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;

        Ok(Self::parse_candidate(raw))
    }
}
