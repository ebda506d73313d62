use serde::Deserialize;
use std::env;
use std::time::Duration;
use storefront_catalog::TrackedProduct;
use storefront_core::retry::RetryPolicy;
use storefront_gateway::SourceConfig;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub payment: PaymentConfig,
    pub fulfillment: FulfillmentConfig,
    pub inventory: InventorySettings,
    pub business_rules: BusinessRules,
    #[serde(default)]
    pub resiliency: ResiliencyConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OrderBackend {
    Memory,
    Postgres,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotBackend {
    Memory,
    Redis,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    pub orders: OrderBackend,
    pub snapshots: SnapshotBackend,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Mock,
    Live,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PaymentConfig {
    pub provider: Provider,
    pub base_url: String,
    pub secret_key: Option<String>,
    /// Key the gateway signs webhooks with. Paystack uses the secret key.
    pub webhook_secret: Option<String>,
    pub callback_url: Option<String>,
    pub currency: String,
    pub timeout_ms: u64,
    #[serde(default)]
    pub retry: RetryPolicy,
}

impl PaymentConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn webhook_secret(&self) -> Option<&str> {
        self.webhook_secret
            .as_deref()
            .or(self.secret_key.as_deref())
            .filter(|s| !s.is_empty())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct FulfillmentConfig {
    pub provider: Provider,
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    pub timeout_ms: u64,
    #[serde(default)]
    pub retry: RetryPolicy,
}

impl FulfillmentConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct InventorySettings {
    pub ttl_seconds: u64,
    pub source_timeout_ms: u64,
    /// Background refresh period; 0 disables the warmer.
    #[serde(default)]
    pub refresh_interval_seconds: u64,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
    #[serde(default)]
    pub products: Vec<TrackedProduct>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BusinessRules {
    pub tax_rate: f64,
    /// Upper bound on any single gateway or partner call made by the order manager.
    pub call_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ResiliencyConfig {
    #[serde(default)]
    pub payment_gateway: BreakerConfig,
}

/// Trip after `failure_threshold` consecutive upstream failures; let one
/// request through again after `reset_after_ms`.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub reset_after_ms: u64,
}

impl BreakerConfig {
    pub fn reset_after(&self) -> Duration {
        Duration::from_millis(self.reset_after_ms)
    }
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_after_ms: 30_000,
        }
    }
}

/// Run modes in which the in-process payment and fulfillment fakes may be used.
const MOCK_RUN_MODES: &[&str] = &["development", "test"];

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            // Optional per-environment overrides
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // Not checked in
            .add_source(config::File::with_name("config/local").required(false))
            // e.g. `STOREFRONT__PAYMENT__SECRET_KEY=sk_live_...`
            .add_source(config::Environment::with_prefix("STOREFRONT").separator("__"))
            .build()?;

        let config: Config = s.try_deserialize()?;
        config.check_providers(&run_mode)?;
        Ok(config)
    }

    /// The mock gateway verifies every payment, so it must never serve a
    /// real deployment.
    pub fn check_providers(&self, run_mode: &str) -> Result<(), config::ConfigError> {
        if MOCK_RUN_MODES.contains(&run_mode) {
            return Ok(());
        }
        if self.payment.provider == Provider::Mock {
            return Err(config::ConfigError::Message(format!(
                "payment.provider = \"mock\" is not allowed in run mode {run_mode:?}"
            )));
        }
        if self.fulfillment.provider == Provider::Mock {
            return Err(config::ConfigError::Message(format!(
                "fulfillment.provider = \"mock\" is not allowed in run mode {run_mode:?}"
            )));
        }
        Ok(())
    }
}
