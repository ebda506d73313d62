pub mod error;
pub mod fulfillment;
pub mod manager;
pub mod models;
pub mod orchestrator;
pub mod repository;
pub mod validation;

#[cfg(test)]
mod testing;

pub use error::OrderError;
pub use fulfillment::FulfillmentSummary;
pub use manager::{ManagerConfig, OrderManager};
pub use models::{CustomerInfo, NewOrderItem, Order, OrderItem, OrderStatus, PaymentStatus};
pub use orchestrator::{PaymentSession, ReconcileOutcome};
pub use repository::{InMemoryOrderRepository, OrderFilter, OrderRepository};
