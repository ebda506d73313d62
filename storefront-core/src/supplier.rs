use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use storefront_shared::Masked;

/// Where the drop-ship partner sends the parcel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShippingAddress {
    pub name: String,
    pub phone: Masked<String>,
    pub address: Masked<String>,
    pub city: String,
    pub state: String,
    pub zip: String,
    pub country: String,
}

/// One line item handed to the partner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlacementRequest {
    pub product_ref: String,
    pub variant_ref: Option<String>,
    pub quantity: u32,
    pub shipping_address: ShippingAddress,
    pub memo: String,
}

/// Partner-side outcome of a placement that did not succeed.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PlacementError {
    /// The partner looked at the request and said no. Needs a human.
    #[error("Partner rejected placement: {0}")]
    Rejected(String),

    /// The partner never took the request in (connection refused,
    /// throttled). Sending it again cannot place the item twice.
    #[error("Partner did not take the request: {0}")]
    NotDelivered(String),

    /// The request may have reached the partner.
    #[error("Partner unreachable: {0}")]
    Transport(String),

    #[error("Partner timed out after {0}ms")]
    Timeout(u64),
}

impl PlacementError {
    pub fn is_transient(&self) -> bool {
        !matches!(self, PlacementError::Rejected(_))
    }

    /// Whether an automatic resend is safe. Anything that may have been
    /// delivered is left to an explicit fulfillment retry instead.
    pub fn is_safe_to_resend(&self) -> bool {
        matches!(self, PlacementError::NotDelivered(_))
    }
}

#[async_trait]
pub trait FulfillmentPartner: Send + Sync {
    /// Place a single line item; returns the partner's order reference
    async fn place_item(&self, request: &PlacementRequest) -> Result<String, PlacementError>;
}
