use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use storefront_catalog::InventoryCache;
use storefront_core::payment::PaymentGateway;
use storefront_core::repository::RepositoryError;
use storefront_core::supplier::FulfillmentPartner;
use storefront_core::ValidationError;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::OrderError;
use crate::models::{CustomerInfo, CustomerSnapshot, NewOrderItem, Order, OrderItem, OrderStatus, Totals, Tracking};
use crate::repository::{OrderFilter, OrderRepository};
use crate::validation;

const ORDER_NUMBER_ATTEMPTS: usize = 5;

#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub tax_rate: f64,
    /// Single currency every order is priced and charged in.
    pub currency: String,
    /// Upper bound on any one gateway or partner call.
    pub call_timeout: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            tax_rate: 0.07,
            currency: "NGN".to_string(),
            call_timeout: Duration::from_secs(30),
        }
    }
}

/// Owns every order state transition.
///
/// Transitions on one order are serialized through that order's lock; orders
/// never wait on each other. External calls made during payment and
/// fulfillment go through the injected collaborators below.
pub struct OrderManager {
    pub(crate) repo: Arc<dyn OrderRepository>,
    pub(crate) payments: Arc<dyn PaymentGateway>,
    pub(crate) partner: Arc<dyn FulfillmentPartner>,
    pub(crate) inventory: Arc<InventoryCache>,
    pub(crate) config: ManagerConfig,
    locks: StdMutex<HashMap<Uuid, Arc<Mutex<()>>>>,
    /// Orders with a fulfillment run in progress in this process.
    pub(crate) fulfilling: StdMutex<HashSet<Uuid>>,
}

impl OrderManager {
    pub fn new(
        repo: Arc<dyn OrderRepository>,
        payments: Arc<dyn PaymentGateway>,
        partner: Arc<dyn FulfillmentPartner>,
        inventory: Arc<InventoryCache>,
        config: ManagerConfig,
    ) -> Self {
        Self {
            repo,
            payments,
            partner,
            inventory,
            config,
            locks: StdMutex::new(HashMap::new()),
            fulfilling: StdMutex::new(HashSet::new()),
        }
    }

    pub fn inventory(&self) -> &Arc<InventoryCache> {
        &self.inventory
    }

    pub fn payments(&self) -> &Arc<dyn PaymentGateway> {
        &self.payments
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Validate, price and persist a new order as `pending`.
    pub async fn create_order(&self, customer: CustomerInfo, items: Vec<NewOrderItem>) -> Result<Order, OrderError> {
        let mut errors = ValidationError::new();
        validation::validate_customer(&customer, &mut errors);
        validation::validate_items(&items, &mut errors);
        errors.into_result()?;

        let snapshot = CustomerSnapshot::capture(&customer);
        let items: Vec<OrderItem> = items.into_iter().map(OrderItem::from_new).collect();
        let totals = Totals::compute(&items, self.config.tax_rate);

        for attempt in 1..=ORDER_NUMBER_ATTEMPTS {
            let order_number = validation::generate_order_number(Utc::now());
            if self.repo.get_by_number(&order_number).await?.is_some() {
                continue;
            }

            let order = Order::new(order_number, snapshot.clone(), items.clone(), totals, &self.config.currency);
            match self.repo.insert(&order).await {
                Ok(()) => {
                    info!(
                        order_id = %order.id,
                        order_number = %order.order_number,
                        email = %order.customer.email,
                        total = order.total_amount,
                        items = order.items.len(),
                        "Order created"
                    );
                    return Ok(order);
                }
                Err(RepositoryError::Conflict(reason)) => {
                    warn!(attempt, reason = %reason, "Order number collision, regenerating");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(RepositoryError::Conflict("could not allocate a unique order number".to_string()).into())
    }

    pub async fn get_order(&self, order_id: Uuid) -> Result<Order, OrderError> {
        self.repo
            .get(order_id)
            .await?
            .ok_or_else(|| OrderError::NotFound(order_id.to_string()))
    }

    pub async fn get_by_number(&self, order_number: &str) -> Result<Order, OrderError> {
        self.repo
            .get_by_number(order_number)
            .await?
            .ok_or_else(|| OrderError::NotFound(order_number.to_string()))
    }

    pub async fn list_orders(&self, filter: &OrderFilter) -> Result<Vec<Order>, OrderError> {
        Ok(self.repo.list(filter).await?)
    }

    /// Transition: {Ordered, PartiallyOrdered, Shipped} → Shipped
    pub async fn attach_tracking(&self, order_id: Uuid, tracking_number: &str, carrier: &str) -> Result<Order, OrderError> {
        let mut errors = ValidationError::new();
        if tracking_number.trim().is_empty() {
            errors.push("tracking_number", "is required");
        }
        if carrier.trim().is_empty() {
            errors.push("carrier", "is required");
        }
        errors.into_result()?;

        let lock = self.order_lock(order_id);
        let _guard = lock.lock().await;
        let mut order = self.get_order(order_id).await?;

        self.transition(&mut order, OrderStatus::Shipped)?;
        order.tracking = Some(Tracking {
            tracking_number: tracking_number.trim().to_string(),
            carrier: carrier.trim().to_string(),
            attached_at: Utc::now(),
        });
        self.repo.update(&order).await?;

        info!(order_id = %order_id, carrier = %carrier, "Tracking attached");
        Ok(order)
    }

    /// Transition: Shipped → Delivered
    pub async fn mark_delivered(&self, order_id: Uuid) -> Result<Order, OrderError> {
        let lock = self.order_lock(order_id);
        let _guard = lock.lock().await;
        let mut order = self.get_order(order_id).await?;

        self.transition(&mut order, OrderStatus::Delivered)?;
        order.delivered_at = Some(order.updated_at);
        self.repo.update(&order).await?;

        info!(order_id = %order_id, "Order delivered");
        Ok(order)
    }

    /// Operator cancellation. Any state before shipping; stops an in-flight
    /// fulfillment batch before its next item.
    pub async fn cancel_order(&self, order_id: Uuid) -> Result<Order, OrderError> {
        let lock = self.order_lock(order_id);
        let _guard = lock.lock().await;
        let mut order = self.get_order(order_id).await?;

        let from = order.status;
        self.transition(&mut order, OrderStatus::Cancelled)?;
        self.repo.update(&order).await?;

        info!(order_id = %order_id, from = %from, "Order cancelled");
        Ok(order)
    }

    /// Apply `to` if the transition table allows it. Leaves the order
    /// untouched otherwise.
    pub(crate) fn transition(&self, order: &mut Order, to: OrderStatus) -> Result<(), OrderError> {
        if !order.status.can_transition_to(to) {
            warn!(order_id = %order.id, from = %order.status, to = %to, "Rejected illegal transition");
            return Err(OrderError::invalid(order.status, to));
        }
        order.status = to;
        order.touch();
        Ok(())
    }

    /// The lock serializing transitions on one order.
    ///
    /// Entries nobody holds a handle to are dropped here, so the table only
    /// grows with the number of orders being worked on at once.
    pub(crate) fn order_lock(&self, order_id: Uuid) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        locks.entry(order_id).or_default().clone()
    }

    #[cfg(test)]
    pub(crate) fn tracked_locks(&self) -> usize {
        self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).len()
    }
}
