use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::db::AppState;
use crate::reconcile::NotificationOutcome;

type HmacSha256 = Hmac<Sha256>;

/// Maximum age of a signed notification before it is rejected as a replay.
const SIGNATURE_TIMESTAMP_TOLERANCE_SECS: i64 = 300;

#[derive(Debug, Serialize)]
struct WebhookResponse {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    applied: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<&'static str>,
}

impl WebhookResponse {
    fn received() -> Self {
        Self {
            status: "received",
            applied: None,
            reason: None,
        }
    }
}

/// Pull the provider payment id out of a notification payload.
///
/// The provider has shipped several payload shapes over time: the current one
/// nests the id under `data.id`, older ones carry a top-level `id` or
/// `payment_id`. Ids arrive as numbers or strings depending on shape.
fn extract_payment_id(payload: &serde_json::Value) -> Option<String> {
    let id = payload
        .get("data")
        .and_then(|d| d.get("id"))
        .or_else(|| payload.get("id"))
        .or_else(|| payload.get("payment_id"))?;

    match id {
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}

/// Verify the provider's `x-signature` header (`ts=...,v1=...`) against the
/// shared webhook secret.
///
/// The signed template is `id:{data.id};request-id:{request_id};ts:{ts};`
/// with the id lowercased, HMAC-SHA256 over it, hex-encoded.
fn verify_signature(
    secret: &str,
    signature: &str,
    request_id: Option<&str>,
    payment_id: &str,
) -> bool {
    let mut ts = None;
    let mut v1 = None;
    for part in signature.split(',') {
        let part = part.trim();
        if let Some(t) = part.strip_prefix("ts=") {
            ts = Some(t);
        } else if let Some(s) = part.strip_prefix("v1=") {
            v1 = Some(s);
        }
    }
    let (Some(ts), Some(v1)) = (ts, v1) else {
        return false;
    };

    // Reject replayed notifications by timestamp age. The provider sends
    // epoch milliseconds.
    let Ok(ts_num) = ts.parse::<i64>() else {
        return false;
    };
    let ts_secs = if ts_num > 10_000_000_000 {
        ts_num / 1000
    } else {
        ts_num
    };
    let age = chrono::Utc::now().timestamp() - ts_secs;
    if age > SIGNATURE_TIMESTAMP_TOLERANCE_SECS || age < -60 {
        tracing::warn!(age_secs = age, "Webhook signature timestamp out of tolerance");
        return false;
    }

    let mut template = format!("id:{};", payment_id.to_lowercase());
    if let Some(request_id) = request_id {
        template.push_str(&format!("request-id:{};", request_id));
    }
    template.push_str(&format!("ts:{};", ts));

    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(template.as_bytes());
    let expected = hex::encode(mac.finalize().into_bytes());

    // Constant-time comparison; the length of a SHA-256 hex digest is not
    // secret.
    if expected.len() != v1.len() {
        return false;
    }
    expected.as_bytes().ct_eq(v1.as_bytes()).into()
}

/// Inbound provider notification endpoint.
///
/// Responds 200 for everything that is not a signature failure: the provider
/// retries non-2xx responses, and an unresolvable notification will not
/// become resolvable by being delivered again.
pub async fn handle_provider_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    // A payload we cannot parse is treated as a ping, not an error.
    let Ok(payload) = serde_json::from_slice::<serde_json::Value>(&body) else {
        tracing::debug!("Unparseable webhook payload, treating as ping");
        return (StatusCode::OK, axum::Json(WebhookResponse::received()));
    };

    let Some(payment_id) = extract_payment_id(&payload) else {
        tracing::debug!("Webhook payload carries no payment id, treating as ping");
        return (StatusCode::OK, axum::Json(WebhookResponse::received()));
    };

    if let Some(ref secret) = state.webhook_secret {
        let signature = headers
            .get("x-signature")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        let request_id = headers.get("x-request-id").and_then(|v| v.to_str().ok());

        if !verify_signature(secret, signature, request_id, &payment_id) {
            tracing::warn!(payment_id, "Webhook signature verification failed");
            return (
                StatusCode::BAD_REQUEST,
                axum::Json(WebhookResponse {
                    status: "invalid_signature",
                    applied: None,
                    reason: None,
                }),
            );
        }
    }

    match state.reconciler.handle_notification(&payment_id).await {
        Ok(NotificationOutcome::Applied { status }) => {
            tracing::info!(payment_id, status = %status, "Webhook applied");
            (
                StatusCode::OK,
                axum::Json(WebhookResponse {
                    status: "received",
                    applied: Some(true),
                    reason: None,
                }),
            )
        }
        Ok(NotificationOutcome::Ignored { reason }) => (
            StatusCode::OK,
            axum::Json(WebhookResponse {
                status: "received",
                applied: Some(false),
                reason: Some(reason.as_str()),
            }),
        ),
        Err(e) => {
            // Local store failure: let the provider retry later.
            tracing::error!(payment_id, error = %e, "Webhook processing failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                axum::Json(WebhookResponse {
                    status: "error",
                    applied: None,
                    reason: None,
                }),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_payment_id_shapes() {
        let nested = serde_json::json!({"action": "payment.updated", "data": {"id": "123"}});
        assert_eq!(extract_payment_id(&nested).as_deref(), Some("123"));

        let nested_num = serde_json::json!({"data": {"id": 456}});
        assert_eq!(extract_payment_id(&nested_num).as_deref(), Some("456"));

        let top_level = serde_json::json!({"id": 789, "topic": "payment"});
        assert_eq!(extract_payment_id(&top_level).as_deref(), Some("789"));

        let legacy = serde_json::json!({"payment_id": "42"});
        assert_eq!(extract_payment_id(&legacy).as_deref(), Some("42"));

        let ping = serde_json::json!({"topic": "test"});
        assert!(extract_payment_id(&ping).is_none());

        let empty = serde_json::json!({"id": ""});
        assert!(extract_payment_id(&empty).is_none());
    }

    fn sign(secret: &str, payment_id: &str, request_id: &str, ts: i64) -> String {
        let template = format!("id:{};request-id:{};ts:{};", payment_id, request_id, ts);
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(template.as_bytes());
        format!("ts={},v1={}", ts, hex::encode(mac.finalize().into_bytes()))
    }

    #[test]
    fn test_verify_signature_accepts_valid() {
        let ts = chrono::Utc::now().timestamp();
        let sig = sign("secret", "123", "req-1", ts);
        assert!(verify_signature("secret", &sig, Some("req-1"), "123"));
    }

    #[test]
    fn test_verify_signature_rejects_wrong_secret() {
        let ts = chrono::Utc::now().timestamp();
        let sig = sign("other", "123", "req-1", ts);
        assert!(!verify_signature("secret", &sig, Some("req-1"), "123"));
    }

    #[test]
    fn test_verify_signature_rejects_old_timestamp() {
        let ts = chrono::Utc::now().timestamp() - 3600;
        let sig = sign("secret", "123", "req-1", ts);
        assert!(!verify_signature("secret", &sig, Some("req-1"), "123"));
    }

    #[test]
    fn test_verify_signature_rejects_garbage() {
        assert!(!verify_signature("secret", "", None, "123"));
        assert!(!verify_signature("secret", "ts=abc,v1=def", None, "123"));
    }
}
