use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Stock for one variant of a product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantStock {
    pub variant: String,
    pub stock: u32,
}

/// Consolidated stock view for a single product.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductStock {
    pub product_id: String,
    pub variants: Vec<VariantStock>,
    /// Raw reading per source name; a failed source reads 0.
    pub source_stock: BTreeMap<String, u32>,
    pub consolidated_stock: u32,
    pub fetched_at: DateTime<Utc>,
    /// Every source failed or read zero and the number is synthetic.
    pub is_fallback: bool,
}

impl ProductStock {
    pub fn variant_stock(&self, variant: &str) -> Option<u32> {
        self.variants
            .iter()
            .find(|v| v.variant == variant)
            .map(|v| v.stock)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventorySnapshot {
    pub products: HashMap<String, ProductStock>,
    pub fetched_at: DateTime<Utc>,
}

impl InventorySnapshot {
    pub fn product(&self, product_id: &str) -> Option<&ProductStock> {
        self.products.get(product_id)
    }

    /// True when every product in the snapshot is synthetic.
    pub fn is_fallback(&self) -> bool {
        !self.products.is_empty() && self.products.values().all(|p| p.is_fallback)
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum SourceFetchError {
    #[error("Source {source_name} request failed: {message}")]
    Request { source_name: String, message: String },

    #[error("Source {source_name} returned HTTP {status}")]
    Status { source_name: String, status: u16 },

    #[error("Source {source_name} page could not be parsed: {message}")]
    Parse { source_name: String, message: String },

    #[error("Source {source_name} timed out after {timeout_ms}ms")]
    Timeout { source_name: String, timeout_ms: u64 },
}

/// One upstream retailer we read stock levels from.
#[async_trait]
pub trait InventorySource: Send + Sync {
    fn name(&self) -> &str;

    /// Current stock for the retailer's product reference
    async fn fetch_stock(&self, product_ref: &str) -> Result<u32, SourceFetchError>;
}
