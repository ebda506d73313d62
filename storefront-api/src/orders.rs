use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use storefront_core::ValidationError;
use storefront_order::{
    CustomerInfo, FulfillmentSummary, NewOrderItem, Order, OrderFilter, OrderStatus, PaymentSession,
    ReconcileOutcome,
};
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

// ============================================================================
// Request Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    pub customer: CustomerInfo,
    #[serde(default)]
    pub items: Vec<NewOrderItem>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct InitializePaymentRequest {
    /// Overrides the email captured on the order.
    pub email: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TrackingRequest {
    #[serde(default)]
    pub tracking_number: String,
    #[serde(default)]
    pub carrier: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListOrdersQuery {
    pub status: Option<String>,
    pub email: Option<String>,
}

impl ListOrdersQuery {
    fn into_filter(self) -> Result<OrderFilter, ValidationError> {
        let status = match self.status.as_deref().map(str::parse::<OrderStatus>) {
            None => None,
            Some(Ok(status)) => Some(status),
            Some(Err(e)) => {
                let mut errors = ValidationError::new();
                errors.push("status", e);
                return Err(errors);
            }
        };
        Ok(OrderFilter {
            status,
            email: self.email.filter(|e| !e.trim().is_empty()),
        })
    }
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/orders", post(create_order).get(list_orders))
        .route("/v1/orders/number/{order_number}", get(get_order_by_number))
        .route("/v1/orders/{id}", get(get_order))
        .route("/v1/orders/{id}/payment", post(initialize_payment))
        .route("/v1/orders/{id}/fulfillment", post(run_fulfillment))
        .route("/v1/orders/{id}/fulfillment/retry", post(retry_fulfillment))
        .route("/v1/orders/{id}/tracking", post(attach_tracking))
        .route("/v1/orders/{id}/delivered", post(mark_delivered))
        .route("/v1/orders/{id}/cancel", post(cancel_order))
        .route("/v1/payments/verify/{reference}", post(verify_payment))
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /v1/orders
pub async fn create_order(
    State(state): State<AppState>,
    Json(req): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<Order>), AppError> {
    let order = state.orders.create_order(req.customer, req.items).await?;
    Ok((StatusCode::CREATED, Json(order)))
}

/// GET /v1/orders?status=&email=
pub async fn list_orders(
    State(state): State<AppState>,
    Query(query): Query<ListOrdersQuery>,
) -> Result<Json<Vec<Order>>, AppError> {
    let filter = query.into_filter()?;
    Ok(Json(state.orders.list_orders(&filter).await?))
}

/// GET /v1/orders/:id
pub async fn get_order(State(state): State<AppState>, Path(order_id): Path<Uuid>) -> Result<Json<Order>, AppError> {
    Ok(Json(state.orders.get_order(order_id).await?))
}

/// GET /v1/orders/number/:order_number
pub async fn get_order_by_number(
    State(state): State<AppState>,
    Path(order_number): Path<String>,
) -> Result<Json<Order>, AppError> {
    Ok(Json(state.orders.get_by_number(&order_number).await?))
}

/// POST /v1/orders/:id/payment
/// Start checkout with the payment gateway. Repeated calls return the same session.
pub async fn initialize_payment(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
    Json(req): Json<InitializePaymentRequest>,
) -> Result<Json<PaymentSession>, AppError> {
    let session = state
        .orders
        .initialize_payment(order_id, req.email.as_deref())
        .await?;
    Ok(Json(session))
}

/// POST /v1/payments/verify/:reference
/// Callback-page verification; same path the webhook takes.
pub async fn verify_payment(
    State(state): State<AppState>,
    Path(reference): Path<String>,
) -> Result<Json<ReconcileOutcome>, AppError> {
    Ok(Json(state.orders.reconcile_payment(&reference).await?))
}

/// POST /v1/orders/:id/fulfillment
pub async fn run_fulfillment(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> Result<Json<FulfillmentSummary>, AppError> {
    Ok(Json(state.orders.run_fulfillment(order_id).await?))
}

/// POST /v1/orders/:id/fulfillment/retry
pub async fn retry_fulfillment(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> Result<Json<FulfillmentSummary>, AppError> {
    Ok(Json(state.orders.retry_fulfillment(order_id).await?))
}

/// POST /v1/orders/:id/tracking
pub async fn attach_tracking(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
    Json(req): Json<TrackingRequest>,
) -> Result<Json<Order>, AppError> {
    let order = state
        .orders
        .attach_tracking(order_id, &req.tracking_number, &req.carrier)
        .await?;
    Ok(Json(order))
}

/// POST /v1/orders/:id/delivered
pub async fn mark_delivered(State(state): State<AppState>, Path(order_id): Path<Uuid>) -> Result<Json<Order>, AppError> {
    Ok(Json(state.orders.mark_delivered(order_id).await?))
}

/// POST /v1/orders/:id/cancel
pub async fn cancel_order(State(state): State<AppState>, Path(order_id): Path<Uuid>) -> Result<Json<Order>, AppError> {
    Ok(Json(state.orders.cancel_order(order_id).await?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_query_rejects_unknown_status() {
        let query = ListOrdersQuery {
            status: Some("refunded".into()),
            email: None,
        };
        let errors = query.into_filter().unwrap_err();
        assert!(errors.has_field("status"));
    }

    #[test]
    fn test_list_query_parses_status() {
        let query = ListOrdersQuery {
            status: Some("partially_ordered".into()),
            email: Some(" ".into()),
        };
        let filter = query.into_filter().unwrap();
        assert_eq!(filter.status, Some(OrderStatus::PartiallyOrdered));
        assert!(filter.email.is_none());
    }
}
