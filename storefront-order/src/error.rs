use storefront_core::payment::PaymentError;
use storefront_core::repository::RepositoryError;
use storefront_core::ValidationError;

use crate::models::OrderStatus;

#[derive(Debug, thiserror::Error)]
pub enum OrderError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Order not found: {0}")]
    NotFound(String),

    #[error("Invalid state transition from {from} to {to}")]
    InvalidState { from: OrderStatus, to: OrderStatus },

    #[error(transparent)]
    Payment(#[from] PaymentError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl OrderError {
    pub fn invalid(from: OrderStatus, to: OrderStatus) -> Self {
        OrderError::InvalidState { from, to }
    }
}
