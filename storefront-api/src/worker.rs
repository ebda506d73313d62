use std::sync::Arc;
use storefront_catalog::InventoryCache;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::info;

/// Keep the inventory cache warm so request paths rarely pay for a refresh.
pub async fn start_inventory_worker(inventory: Arc<InventoryCache>, every: Duration) {
    info!(interval_secs = every.as_secs(), "Inventory worker started");

    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let snapshot = inventory.get_inventory(true).await;
        info!(
            products = snapshot.products.len(),
            fallback = snapshot.is_fallback(),
            fetched_at = %snapshot.fetched_at,
            "Inventory refreshed"
        );
    }
}
