use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A catalog product whose stock is tracked across the upstream retailers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackedProduct {
    pub product_id: String,
    /// Known variants, in display order. Stock is split across them.
    #[serde(default)]
    pub variants: Vec<String>,
    /// Retailer-specific product reference, keyed by source name.
    #[serde(default)]
    pub source_refs: HashMap<String, String>,
}

impl TrackedProduct {
    pub fn new(product_id: &str, variants: &[&str]) -> Self {
        Self {
            product_id: product_id.to_string(),
            variants: variants.iter().map(|v| v.to_string()).collect(),
            source_refs: HashMap::new(),
        }
    }

    pub fn with_source_ref(mut self, source: &str, product_ref: &str) -> Self {
        self.source_refs.insert(source.to_string(), product_ref.to_string());
        self
    }

    /// Reference to use with `source`; falls back to our own product id.
    pub fn source_ref(&self, source: &str) -> &str {
        self.source_refs
            .get(source)
            .map(String::as_str)
            .unwrap_or(&self.product_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_ref_falls_back_to_product_id() {
        let product = TrackedProduct::new("tee-classic", &["S", "M"]).with_source_ref("jumia", "JM-881");
        assert_eq!(product.source_ref("jumia"), "JM-881");
        assert_eq!(product.source_ref("konga"), "tee-classic");
    }
}
