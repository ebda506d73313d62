use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use storefront_core::retry::RetryPolicy;
use storefront_core::supplier::{FulfillmentPartner, PlacementError, PlacementRequest};
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct PartnerConfig {
    pub base_url: String,
    pub api_key: String,
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

/// HTTP client for the drop-ship partner's order placement endpoint.
pub struct PartnerClient {
    client: Client,
    config: PartnerConfig,
}

#[derive(Debug, Deserialize)]
struct PlacementResponse {
    result: bool,
    #[serde(default)]
    message: String,
    data: Option<PlacementData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlacementData {
    order_id: String,
}

impl PartnerClient {
    pub fn new(config: PartnerConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { client, config })
    }

    async fn place_once(&self, request: &PlacementRequest) -> Result<String, PlacementError> {
        let url = format!("{}/orders", self.config.base_url.trim_end_matches('/'));
        let timeout_ms = self.config.timeout.as_millis() as u64;

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.config.api_key)
            .header("idempotency-key", idempotency_key(request))
            .json(request)
            .send()
            .await
            .map_err(|e| transport_error(e, timeout_ms))?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| transport_error(e, timeout_ms))?;

        classify_response(status, &body)
    }
}

/// Stable per order line, so a partner that honours the header can drop a
/// repeated placement.
fn idempotency_key(request: &PlacementRequest) -> String {
    format!(
        "{}:{}:{}",
        request.memo,
        request.product_ref,
        request.variant_ref.as_deref().unwrap_or("-")
    )
}

fn transport_error(err: reqwest::Error, timeout_ms: u64) -> PlacementError {
    if err.is_timeout() {
        PlacementError::Timeout(timeout_ms)
    } else if err.is_connect() {
        PlacementError::NotDelivered(err.to_string())
    } else {
        PlacementError::Transport(err.to_string())
    }
}

/// Decide between accepted, rejected (permanent) and transient.
///
/// A 2xx body we cannot read is a rejection: the partner may have accepted the
/// order, and retrying could place it twice. Only 429 is known to be unsent.
fn classify_response(status: u16, body: &str) -> Result<String, PlacementError> {
    match status {
        200..=299 => {
            let parsed: PlacementResponse = serde_json::from_str(body).map_err(|e| {
                PlacementError::Rejected(format!("unreadable partner response ({}): {}", e, body))
            })?;
            match (parsed.result, parsed.data) {
                (true, Some(data)) => Ok(data.order_id),
                (true, None) => Err(PlacementError::Rejected(
                    "partner accepted without an order id".to_string(),
                )),
                (false, _) => Err(PlacementError::Rejected(parsed.message)),
            }
        }
        429 => Err(PlacementError::NotDelivered("partner throttled the request".to_string())),
        500..=599 => Err(PlacementError::Transport(format!("partner returned HTTP {}", status))),
        _ => Err(PlacementError::Rejected(format!("partner returned HTTP {}: {}", status, body))),
    }
}

#[async_trait]
impl FulfillmentPartner for PartnerClient {
    async fn place_item(&self, request: &PlacementRequest) -> Result<String, PlacementError> {
        let result = self
            .config
            .retry
            .run("partner.place_item", || self.place_once(request), PlacementError::is_safe_to_resend)
            .await;

        match &result {
            Ok(partner_ref) => info!(product_ref = %request.product_ref, partner_ref = %partner_ref, "Partner accepted item"),
            Err(e) => warn!(product_ref = %request.product_ref, error = %e, "Partner placement failed"),
        }
        result
    }
}
