use axum::{
    extract::{Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use storefront_core::payment::{Refund, TransactionPage, TransactionQuery};
use storefront_core::ValidationError;

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct RefundRequest {
    pub reference: String,
    /// Minor units; omitted refunds the full amount.
    pub amount: Option<i64>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/admin/payments/transactions", get(list_transactions))
        .route("/v1/admin/payments/refunds", post(create_refund))
}

/// GET /v1/admin/payments/transactions
pub async fn list_transactions(
    State(state): State<AppState>,
    Query(query): Query<TransactionQuery>,
) -> Result<Json<TransactionPage>, AppError> {
    Ok(Json(state.payments.list_transactions(&query).await?))
}

/// POST /v1/admin/payments/refunds
pub async fn create_refund(
    State(state): State<AppState>,
    Json(req): Json<RefundRequest>,
) -> Result<Json<Refund>, AppError> {
    let mut errors = ValidationError::new();
    if req.reference.trim().is_empty() {
        errors.push("reference", "is required");
    }
    if req.amount.is_some_and(|a| a <= 0) {
        errors.push("amount", "must be greater than zero");
    }
    errors.into_result()?;

    let refund = state.payments.create_refund(req.reference.trim(), req.amount).await?;
    tracing::info!(reference = %refund.transaction_reference, amount = refund.amount, "Refund requested");
    Ok(Json(refund))
}
