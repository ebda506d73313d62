use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::post,
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use storefront_core::payment::{verify_webhook_signature, SIGNATURE_HEADER};
use storefront_order::ReconcileOutcome;

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct PaymentEvent {
    pub event: String,
    #[serde(default)]
    pub data: EventData,
}

#[derive(Debug, Default, Deserialize)]
pub struct EventData {
    pub reference: Option<String>,
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/v1/webhooks/payments", post(handle_payment_webhook))
}

/// POST /v1/webhooks/payments
///
/// The signature is checked over the raw body before anything is parsed.
/// Verification with the gateway, not the event body, decides payment.
pub async fn handle_payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    let Some(secret) = state.webhook_secret.as_deref() else {
        tracing::error!("Webhook received but no webhook secret is configured");
        return Err(AppError::Unauthorized);
    };
    if !verify_webhook_signature(&body, signature, secret) {
        tracing::warn!(
            security_event = "webhook_signature_rejected",
            has_signature = !signature.is_empty(),
            body_len = body.len(),
            "Rejected payment webhook with invalid signature"
        );
        return Err(AppError::Unauthorized);
    }

    let event: PaymentEvent = serde_json::from_slice(&body).map_err(|e| {
        let mut errors = storefront_core::ValidationError::new();
        errors.push("body", format!("unreadable event: {}", e));
        AppError::Validation(errors)
    })?;

    tracing::info!(event = %event.event, "Received payment webhook");

    if event.event != "charge.success" {
        return Ok((StatusCode::OK, Json(json!({ "received": true, "handled": false }))));
    }
    let Some(reference) = event.data.reference.filter(|r| !r.is_empty()) else {
        let mut errors = storefront_core::ValidationError::new();
        errors.push("data.reference", "is required");
        return Err(AppError::Validation(errors));
    };

    let outcome = state.orders.reconcile_payment(&reference).await?;
    let handled = match &outcome {
        ReconcileOutcome::Paid { .. } | ReconcileOutcome::AlreadyProcessed { .. } => true,
        ReconcileOutcome::NotVerified { reason } => {
            tracing::warn!(reference = %reference, reason = %reason, "Webhook payment not verified");
            false
        }
    };

    Ok((StatusCode::OK, Json(json!({ "received": true, "handled": handled }))))
}
