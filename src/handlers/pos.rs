use axum::extract::State;
use serde::{Deserialize, Serialize};

use crate::db::{queries, AppState};
use crate::error::{msg, AppError, Result};
use crate::extractors::{Json, Query};
use crate::gateway::{CreatePaymentRequest, GatewayError};
use crate::models::CreateTransaction;
use crate::reconcile::PollOutcome;

#[derive(Debug, Deserialize)]
pub struct CreatePaymentBody {
    pub amount_cents: i64,
    pub description: Option<String>,
    /// POS order reference; flows to the provider for later correlation.
    #[serde(default)]
    pub external_reference: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreatePaymentResponse {
    pub status: &'static str,
    /// The provider-assigned reference for this payment attempt. The client
    /// polls with this value.
    pub payment_id: String,
    /// Opaque QR payload for the register to render.
    pub qr_data: String,
}

/// Create a QR payment at the provider and record the attempt locally.
///
/// Creation is the only flow that surfaces provider errors to the caller:
/// the operator must see bad credentials or rejected requests to fix them.
pub async fn create_payment(
    State(state): State<AppState>,
    Json(body): Json<CreatePaymentBody>,
) -> Result<Json<CreatePaymentResponse>> {
    if body.amount_cents <= 0 {
        return Err(AppError::BadRequest(msg::INVALID_AMOUNT.into()));
    }

    let request = CreatePaymentRequest {
        amount_cents: body.amount_cents,
        description: body.description.clone().unwrap_or_default(),
        external_reference: body.external_reference.clone(),
    };

    let created = state.gateway.create_payment(&request).await.map_err(|e| match e {
        GatewayError::MissingCredentials(_) => {
            AppError::Configuration(msg::MISSING_ACCESS_TOKEN.into())
        }
        GatewayError::Rejected { status, body } => {
            AppError::GatewayRejected(format!("HTTP {}: {}", status, body))
        }
        GatewayError::Unavailable(detail) => AppError::GatewayUnavailable(detail),
        GatewayError::InvalidResponse(detail) => AppError::GatewayUnavailable(detail),
    })?;

    let conn = state.db.get()?;
    let tx = queries::create_transaction(
        &conn,
        &CreateTransaction {
            provider_reference: created.provider_reference.clone(),
            external_reference: body.external_reference,
            amount_cents: body.amount_cents,
            description: body.description,
            raw_payload: Some(created.raw.to_string()),
        },
    )?;

    tracing::info!(
        transaction_id = %tx.id,
        provider_reference = %created.provider_reference,
        "QR payment created"
    );

    Ok(Json(CreatePaymentResponse {
        status: "success",
        payment_id: created.provider_reference,
        qr_data: created.qr_payload,
    }))
}

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    pub provider_reference: String,
    #[serde(default)]
    pub external_reference: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_detail: Option<String>,
}

/// Poll the current status of a payment attempt.
///
/// Provider failures never surface here; the response falls back to the last
/// known local status so the register keeps working through an outage.
pub async fn payment_status(
    State(state): State<AppState>,
    Query(query): Query<StatusQuery>,
) -> Result<Json<StatusResponse>> {
    let outcome = state
        .reconciler
        .poll(
            &query.provider_reference,
            query.external_reference.as_deref(),
        )
        .await?;

    let response = match outcome {
        PollOutcome::Resolved { status, detail } => StatusResponse {
            status: status.public_str(),
            status_detail: detail,
        },
        PollOutcome::NotFound => StatusResponse {
            status: "not_found",
            status_detail: None,
        },
    };

    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
pub struct CancelBody {
    pub provider_reference: String,
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub status: &'static str,
}

/// Cancel a payment that has not resolved yet (customer walked away).
/// Already-final transactions are left untouched and report `not_found`,
/// matching the status vocabulary the register already handles.
pub async fn cancel_payment(
    State(state): State<AppState>,
    Json(body): Json<CancelBody>,
) -> Result<Json<CancelResponse>> {
    let cancelled = state.reconciler.cancel(&body.provider_reference)?;

    Ok(Json(CancelResponse {
        status: if cancelled.is_some() {
            "cancelled"
        } else {
            "not_found"
        },
    }))
}
