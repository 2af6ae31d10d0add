pub mod pos;
pub mod webhook;

pub use pos::{cancel_payment, create_payment, payment_status};
pub use webhook::handle_provider_webhook;

use axum::{
    routing::{get, post},
    Router,
};
use serde::Serialize;

use crate::db::AppState;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> axum::Json<HealthResponse> {
    axum::Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Register-facing endpoints.
pub fn pos_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/pos/payments", post(create_payment))
        .route("/pos/payments/status", get(payment_status))
        .route("/pos/payments/cancel", post(cancel_payment))
}

/// Provider-facing endpoints.
pub fn webhook_router() -> Router<AppState> {
    Router::new().route("/webhook/mercadopago", post(handle_provider_webhook))
}
