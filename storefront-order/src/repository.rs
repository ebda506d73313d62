use async_trait::async_trait;
use std::collections::HashMap;
use storefront_core::repository::RepositoryError;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::{Order, OrderStatus};

#[derive(Debug, Clone, Default)]
pub struct OrderFilter {
    pub status: Option<OrderStatus>,
    pub email: Option<String>,
}

impl OrderFilter {
    pub fn matches(&self, order: &Order) -> bool {
        self.status.map_or(true, |s| order.status == s)
            && self
                .email
                .as_deref()
                .map_or(true, |e| order.customer.email.expose().eq_ignore_ascii_case(e))
    }
}

/// Durable order records. Orders are never deleted.
#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Fails with `Conflict` when the id or order number is taken
    async fn insert(&self, order: &Order) -> Result<(), RepositoryError>;

    async fn get(&self, id: Uuid) -> Result<Option<Order>, RepositoryError>;

    async fn get_by_number(&self, order_number: &str) -> Result<Option<Order>, RepositoryError>;

    async fn find_by_payment_reference(&self, reference: &str) -> Result<Option<Order>, RepositoryError>;

    /// Replace the stored record
    async fn update(&self, order: &Order) -> Result<(), RepositoryError>;

    /// Newest first
    async fn list(&self, filter: &OrderFilter) -> Result<Vec<Order>, RepositoryError>;
}

/// Process-local repository for tests and single-node development runs.
#[derive(Default)]
pub struct InMemoryOrderRepository {
    orders: RwLock<HashMap<Uuid, Order>>,
}

impl InMemoryOrderRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OrderRepository for InMemoryOrderRepository {
    async fn insert(&self, order: &Order) -> Result<(), RepositoryError> {
        let mut orders = self.orders.write().await;
        if orders.contains_key(&order.id) {
            return Err(RepositoryError::Conflict(format!("order id {}", order.id)));
        }
        if orders.values().any(|o| o.order_number == order.order_number) {
            return Err(RepositoryError::Conflict(format!("order number {}", order.order_number)));
        }
        orders.insert(order.id, order.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Order>, RepositoryError> {
        Ok(self.orders.read().await.get(&id).cloned())
    }

    async fn get_by_number(&self, order_number: &str) -> Result<Option<Order>, RepositoryError> {
        Ok(self
            .orders
            .read()
            .await
            .values()
            .find(|o| o.order_number == order_number)
            .cloned())
    }

    async fn find_by_payment_reference(&self, reference: &str) -> Result<Option<Order>, RepositoryError> {
        Ok(self
            .orders
            .read()
            .await
            .values()
            .find(|o| o.payment_reference.as_deref() == Some(reference))
            .cloned())
    }

    async fn update(&self, order: &Order) -> Result<(), RepositoryError> {
        let mut orders = self.orders.write().await;
        match orders.get_mut(&order.id) {
            Some(existing) => {
                *existing = order.clone();
                Ok(())
            }
            None => Err(RepositoryError::NotFound(order.id.to_string())),
        }
    }

    async fn list(&self, filter: &OrderFilter) -> Result<Vec<Order>, RepositoryError> {
        let mut orders: Vec<Order> = self
            .orders
            .read()
            .await
            .values()
            .filter(|o| filter.matches(o))
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(orders)
    }
}
