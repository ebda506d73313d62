use std::sync::Arc;
use storefront_catalog::InventoryCache;
use storefront_core::payment::PaymentGateway;
use storefront_order::OrderManager;

use crate::middleware::resiliency::ResiliencyState;

#[derive(Clone)]
pub struct AppState {
    pub orders: Arc<OrderManager>,
    pub inventory: Arc<InventoryCache>,
    pub payments: Arc<dyn PaymentGateway>,
    /// HMAC key for inbound payment webhooks. Unset rejects every webhook.
    pub webhook_secret: Option<Arc<str>>,
    pub resiliency: Arc<ResiliencyState>,
}

impl AppState {
    pub fn new(orders: Arc<OrderManager>, webhook_secret: Option<String>) -> Self {
        Self {
            inventory: orders.inventory().clone(),
            payments: orders.payments().clone(),
            orders,
            webhook_secret: webhook_secret.map(Arc::from),
            resiliency: Arc::new(ResiliencyState::default()),
        }
    }

    pub fn with_resiliency(mut self, resiliency: ResiliencyState) -> Self {
        self.resiliency = Arc::new(resiliency);
        self
    }
}
