use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use storefront_core::inventory::{InventorySource, SourceFetchError};

pub const DEFAULT_STOCK_PATTERN: &str = r"(?i)(\d+)\s+(?:items?\s+)?(?:in stock|left|available)";
pub const DEFAULT_OUT_OF_STOCK_PATTERN: &str = r"(?i)(out of stock|sold out)";

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    pub base_url: String,
    /// Regex whose first capture group is the stock count.
    pub stock_pattern: Option<String>,
    pub out_of_stock_pattern: Option<String>,
}

/// Reads stock levels off a retailer's product page.
pub struct ScrapedSource {
    name: String,
    base_url: String,
    client: Client,
    stock_pattern: Regex,
    out_of_stock_pattern: Regex,
}

impl ScrapedSource {
    pub fn new(config: &SourceConfig, timeout: Duration) -> Result<Self, String> {
        let stock_pattern = Regex::new(config.stock_pattern.as_deref().unwrap_or(DEFAULT_STOCK_PATTERN))
            .map_err(|e| format!("source {}: bad stock pattern: {}", config.name, e))?;
        let out_of_stock_pattern = Regex::new(
            config
                .out_of_stock_pattern
                .as_deref()
                .unwrap_or(DEFAULT_OUT_OF_STOCK_PATTERN),
        )
        .map_err(|e| format!("source {}: bad out-of-stock pattern: {}", config.name, e))?;
        let client = Client::builder()
            .timeout(timeout)
            .user_agent("Mozilla/5.0 (compatible; storefront-stock/0.1)")
            .build()
            .map_err(|e| format!("source {}: {}", config.name, e))?;

        Ok(Self {
            name: config.name.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client,
            stock_pattern,
            out_of_stock_pattern,
        })
    }

    /// Stock count on the page; `None` when the page says nothing we recognise.
    pub fn extract_stock(&self, page: &str) -> Option<u32> {
        if let Some(count) = self
            .stock_pattern
            .captures(page)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse::<u32>().ok())
        {
            return Some(count);
        }
        self.out_of_stock_pattern.is_match(page).then_some(0)
    }
}

#[async_trait]
impl InventorySource for ScrapedSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_stock(&self, product_ref: &str) -> Result<u32, SourceFetchError> {
        let url = format!("{}/{}", self.base_url, product_ref);
        let response = self.client.get(&url).send().await.map_err(|e| SourceFetchError::Request {
            source_name: self.name.clone(),
            message: e.to_string(),
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceFetchError::Status {
                source_name: self.name.clone(),
                status: status.as_u16(),
            });
        }

        let page = response.text().await.map_err(|e| SourceFetchError::Request {
            source_name: self.name.clone(),
            message: e.to_string(),
        })?;

        self.extract_stock(&page).ok_or_else(|| SourceFetchError::Parse {
            source_name: self.name.clone(),
            message: format!("no stock marker on {}", url),
        })
    }
}
