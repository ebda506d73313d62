use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use storefront_api::middleware::ResiliencyState;
use storefront_api::{app, worker, AppState};
use storefront_catalog::{InventoryCache, InventoryConfig};
use storefront_core::inventory::InventorySource;
use storefront_core::mock::{MockFulfillmentPartner, MockPaymentGateway};
use storefront_core::payment::PaymentGateway;
use storefront_core::repository::SnapshotStore;
use storefront_core::supplier::FulfillmentPartner;
use storefront_gateway::{PartnerClient, PartnerConfig, PaystackConfig, PaystackGateway, ScrapedSource};
use storefront_order::{InMemoryOrderRepository, ManagerConfig, OrderManager, OrderRepository};
use storefront_store::app_config::{Config, OrderBackend, Provider, SnapshotBackend};
use storefront_store::{DbClient, InMemorySnapshotStore, PgOrderRepository, RedisClient};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "storefront_api=debug,tower_http=debug,axum::rejection=trace".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().context("Failed to load config")?;
    tracing::info!("Starting Storefront API on port {}", config.server.port);

    // Orders
    let repo: Arc<dyn OrderRepository> = match config.storage.orders {
        OrderBackend::Memory => {
            tracing::warn!("Orders are kept in memory and will not survive a restart");
            Arc::new(InMemoryOrderRepository::new())
        }
        OrderBackend::Postgres => {
            let db = DbClient::new(&config.database)
                .await
                .context("Failed to connect to Postgres")?;
            db.migrate().await.context("Failed to run migrations")?;
            Arc::new(PgOrderRepository::new(db.pool.clone()))
        }
    };

    // Inventory snapshots
    let snapshots: Arc<dyn SnapshotStore> = match config.storage.snapshots {
        SnapshotBackend::Memory => Arc::new(InMemorySnapshotStore::new()),
        SnapshotBackend::Redis => {
            let redis = RedisClient::new(&config.redis.url)
                .await
                .context("Failed to connect to Redis")?;
            if let Err(e) = redis.ping().await {
                tracing::warn!("Redis not reachable yet: {}", e);
            }
            Arc::new(redis)
        }
    };

    // Payment gateway
    let payments: Arc<dyn PaymentGateway> = match config.payment.provider {
        Provider::Mock => {
            tracing::warn!("Using mock payment gateway");
            Arc::new(MockPaymentGateway::new(&config.payment.currency))
        }
        Provider::Live => Arc::new(
            PaystackGateway::new(PaystackConfig {
                base_url: config.payment.base_url.clone(),
                secret_key: config.payment.secret_key.clone(),
                currency: config.payment.currency.clone(),
                callback_url: config.payment.callback_url.clone(),
                timeout: config.payment.timeout(),
                retry: config.payment.retry,
            })
            .context("Payment gateway misconfigured")?,
        ),
    };

    // Fulfillment partner
    let partner: Arc<dyn FulfillmentPartner> = match config.fulfillment.provider {
        Provider::Mock => {
            tracing::warn!("Using mock fulfillment partner");
            Arc::new(MockFulfillmentPartner::new())
        }
        Provider::Live => Arc::new(
            PartnerClient::new(PartnerConfig {
                base_url: config.fulfillment.base_url.clone(),
                api_key: config.fulfillment.api_key.clone(),
                timeout: config.fulfillment.timeout(),
                retry: config.fulfillment.retry,
            })
            .context("Failed to build fulfillment client")?,
        ),
    };

    // Inventory sources
    let source_timeout = Duration::from_millis(config.inventory.source_timeout_ms);
    let sources = config
        .inventory
        .sources
        .iter()
        .map(|s| ScrapedSource::new(s, source_timeout).map(|s| Arc::new(s) as Arc<dyn InventorySource>))
        .collect::<Result<Vec<_>, String>>()
        .map_err(anyhow::Error::msg)?;

    let inventory = Arc::new(InventoryCache::new(
        config.inventory.products.clone(),
        sources,
        snapshots,
        InventoryConfig {
            ttl: Duration::from_secs(config.inventory.ttl_seconds),
            source_timeout,
        },
    ));
    inventory.restore().await;

    let orders = Arc::new(OrderManager::new(
        repo,
        payments,
        partner,
        inventory.clone(),
        ManagerConfig {
            tax_rate: config.business_rules.tax_rate,
            currency: config.payment.currency.clone(),
            call_timeout: Duration::from_millis(config.business_rules.call_timeout_ms),
        },
    ));

    if config.inventory.refresh_interval_seconds > 0 {
        tokio::spawn(worker::start_inventory_worker(
            inventory,
            Duration::from_secs(config.inventory.refresh_interval_seconds),
        ));
    }

    let app_state = AppState::new(orders, config.payment.webhook_secret().map(str::to_string))
        .with_resiliency(ResiliencyState::new(config.resiliency.payment_gateway));
    let app = app(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
