use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use storefront_core::inventory::InventorySnapshot;

use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct InventoryQuery {
    #[serde(default)]
    pub refresh: bool,
}

#[derive(Debug, Deserialize)]
pub struct StockCheckQuery {
    pub variant: Option<String>,
    #[serde(default = "one")]
    pub quantity: u32,
}

fn one() -> u32 {
    1
}

#[derive(Debug, Serialize)]
pub struct StockCheckResponse {
    pub product_id: String,
    pub variant: Option<String>,
    pub quantity: u32,
    pub available: bool,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/inventory", get(get_inventory))
        .route("/v1/inventory/{product_id}/check", get(check_stock))
}

/// GET /v1/inventory?refresh=true
/// Never fails: stale or synthetic data is flagged per product instead.
pub async fn get_inventory(
    State(state): State<AppState>,
    Query(query): Query<InventoryQuery>,
) -> Json<InventorySnapshot> {
    let snapshot = state.inventory.get_inventory(query.refresh).await;
    Json(snapshot.as_ref().clone())
}

/// GET /v1/inventory/:product_id/check?variant=M&quantity=2
pub async fn check_stock(
    State(state): State<AppState>,
    Path(product_id): Path<String>,
    Query(query): Query<StockCheckQuery>,
) -> Json<StockCheckResponse> {
    let available = state
        .inventory
        .check_stock(&product_id, query.variant.as_deref(), query.quantity)
        .await;
    Json(StockCheckResponse {
        product_id,
        variant: query.variant,
        quantity: query.quantity,
        available,
    })
}
