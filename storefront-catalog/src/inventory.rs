use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use rand::Rng;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use storefront_core::inventory::{
    InventorySnapshot, InventorySource, ProductStock, SourceFetchError, VariantStock,
};
use storefront_core::repository::SnapshotStore;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::product::TrackedProduct;

/// Bounds of the synthetic stock used when no source has a reading.
pub const FALLBACK_STOCK_MIN: u32 = 5;
pub const FALLBACK_STOCK_MAX: u32 = 25;

#[derive(Debug, Clone, Copy)]
pub struct InventoryConfig {
    pub ttl: Duration,
    pub source_timeout: Duration,
}

impl Default for InventoryConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(300),
            source_timeout: Duration::from_secs(10),
        }
    }
}

struct CachedSnapshot {
    snapshot: Arc<InventorySnapshot>,
    /// Built from at least one real source reading.
    good: bool,
}

/// Best-effort, time-bounded stock view consolidated from every source.
///
/// Reads never fail: a broken source degrades to a fallback value for the
/// affected products, and a refresh where nothing answered keeps serving the
/// last good snapshot.
pub struct InventoryCache {
    products: Vec<TrackedProduct>,
    sources: Vec<Arc<dyn InventorySource>>,
    store: Arc<dyn SnapshotStore>,
    config: InventoryConfig,
    cached: RwLock<Option<CachedSnapshot>>,
    refresh_lock: Mutex<()>,
}

struct Reading {
    product_id: String,
    source_name: String,
    stock: Result<u32, SourceFetchError>,
}

impl InventoryCache {
    pub fn new(
        products: Vec<TrackedProduct>,
        sources: Vec<Arc<dyn InventorySource>>,
        store: Arc<dyn SnapshotStore>,
        config: InventoryConfig,
    ) -> Self {
        Self {
            products,
            sources,
            store,
            config,
            cached: RwLock::new(None),
            refresh_lock: Mutex::new(()),
        }
    }

    /// Load the persisted snapshot, if any. Used once at startup.
    pub async fn restore(&self) -> bool {
        match self.store.load_snapshot().await {
            Ok(Some(snapshot)) => {
                info!(
                    products = snapshot.products.len(),
                    fetched_at = %snapshot.fetched_at,
                    "Restored inventory snapshot"
                );
                let good = !snapshot.is_fallback();
                *self.cached.write().await = Some(CachedSnapshot {
                    snapshot: Arc::new(snapshot),
                    good,
                });
                true
            }
            Ok(None) => false,
            Err(e) => {
                warn!(error = %e, "Could not load persisted inventory snapshot");
                false
            }
        }
    }

    /// Latest snapshot, refreshing first when stale or forced.
    pub async fn get_inventory(&self, force_refresh: bool) -> Arc<InventorySnapshot> {
        if !force_refresh {
            if let Some(snapshot) = self.fresh_snapshot().await {
                return snapshot;
            }
        }

        let _guard = self.refresh_lock.lock().await;
        // Another caller may have refreshed while we waited.
        if !force_refresh {
            if let Some(snapshot) = self.fresh_snapshot().await {
                return snapshot;
            }
        }
        self.refresh().await
    }

    /// Advisory check against the cached snapshot only. Never refreshes.
    pub async fn check_stock(&self, product_id: &str, variant: Option<&str>, quantity: u32) -> bool {
        let cached = self.cached.read().await;
        let Some(product) = cached.as_ref().and_then(|c| c.snapshot.product(product_id)) else {
            return false;
        };

        match variant {
            Some(variant) if !product.variants.is_empty() => product
                .variant_stock(variant)
                .map_or(false, |stock| stock >= quantity),
            _ => product.consolidated_stock >= quantity,
        }
    }

    /// Cached snapshot without any refresh.
    pub async fn current(&self) -> Option<Arc<InventorySnapshot>> {
        self.cached.read().await.as_ref().map(|c| c.snapshot.clone())
    }

    pub fn ttl(&self) -> Duration {
        self.config.ttl
    }

    async fn fresh_snapshot(&self) -> Option<Arc<InventorySnapshot>> {
        let cached = self.cached.read().await;
        let cached = cached.as_ref()?;
        is_fresh(cached.snapshot.fetched_at, self.config.ttl).then(|| cached.snapshot.clone())
    }

    async fn refresh(&self) -> Arc<InventorySnapshot> {
        let started = std::time::Instant::now();
        let fetches = self.products.iter().flat_map(|product| {
            self.sources
                .iter()
                .map(move |source| self.fetch_one(product, source.clone()))
        });
        let readings = join_all(fetches).await;

        let any_reading = readings.iter().any(|r| r.stock.is_ok());
        if !any_reading && !readings.is_empty() {
            let cached = self.cached.read().await;
            if let Some(previous) = cached.as_ref().filter(|c| c.good) {
                warn!(
                    last_fetched_at = %previous.snapshot.fetched_at,
                    "Every inventory source failed, serving last good snapshot"
                );
                return previous.snapshot.clone();
            }
        }

        let fetched_at = Utc::now();
        let snapshot = Arc::new(self.build_snapshot(readings, fetched_at));
        let fallback_products = snapshot.products.values().filter(|p| p.is_fallback).count();

        *self.cached.write().await = Some(CachedSnapshot {
            snapshot: snapshot.clone(),
            good: any_reading,
        });

        if any_reading {
            if let Err(e) = self.store.save_snapshot(&snapshot).await {
                warn!(error = %e, "Failed to persist inventory snapshot");
            }
        }

        info!(
            products = snapshot.products.len(),
            fallback_products,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Inventory refreshed"
        );
        snapshot
    }

    async fn fetch_one(&self, product: &TrackedProduct, source: Arc<dyn InventorySource>) -> Reading {
        let source_name = source.name().to_string();
        let product_ref = product.source_ref(&source_name);
        let timeout = self.config.source_timeout;

        let stock = match tokio::time::timeout(timeout, source.fetch_stock(product_ref)).await {
            Ok(result) => result,
            Err(_) => Err(SourceFetchError::Timeout {
                source_name: source_name.clone(),
                timeout_ms: timeout.as_millis() as u64,
            }),
        };

        match &stock {
            Ok(value) => debug!(product_id = %product.product_id, source = %source_name, stock = *value, "Source reading"),
            Err(e) => warn!(product_id = %product.product_id, source = %source_name, error = %e, "Source fetch failed"),
        }

        Reading {
            product_id: product.product_id.clone(),
            source_name,
            stock,
        }
    }

    fn build_snapshot(&self, readings: Vec<Reading>, fetched_at: DateTime<Utc>) -> InventorySnapshot {
        let mut per_product: HashMap<String, BTreeMap<String, u32>> = HashMap::new();
        for reading in readings {
            per_product
                .entry(reading.product_id)
                .or_default()
                .insert(reading.source_name, reading.stock.unwrap_or(0));
        }

        let products = self
            .products
            .iter()
            .map(|product| {
                let source_stock = per_product.remove(&product.product_id).unwrap_or_default();
                let values: Vec<u32> = source_stock.values().copied().collect();
                let (consolidated_stock, is_fallback) = match consolidate(&values) {
                    Some(stock) => (stock, false),
                    None => (synthetic_stock(), true),
                };

                let stock = ProductStock {
                    product_id: product.product_id.clone(),
                    variants: split_across_variants(consolidated_stock, &product.variants),
                    source_stock,
                    consolidated_stock,
                    fetched_at,
                    is_fallback,
                };
                (product.product_id.clone(), stock)
            })
            .collect();

        InventorySnapshot { products, fetched_at }
    }
}

fn is_fresh(fetched_at: DateTime<Utc>, ttl: Duration) -> bool {
    // A timestamp in the future (clock skew) counts as fresh.
    (Utc::now() - fetched_at).to_std().map_or(true, |age| age < ttl)
}

/// Combine per-source readings into one number.
///
/// All sources non-zero: the minimum, so we never promise more than the
/// scarcest retailer has. Some non-zero: the largest reading. None: `None`,
/// and the caller substitutes synthetic stock.
pub fn consolidate(readings: &[u32]) -> Option<u32> {
    let non_zero: Vec<u32> = readings.iter().copied().filter(|&v| v > 0).collect();
    if non_zero.is_empty() {
        None
    } else if non_zero.len() == readings.len() {
        non_zero.into_iter().min()
    } else {
        non_zero.into_iter().max()
    }
}

/// Even split; the remainder goes one unit each to the first variants.
pub fn split_across_variants(total: u32, variants: &[String]) -> Vec<VariantStock> {
    if variants.is_empty() {
        return Vec::new();
    }
    let count = variants.len() as u32;
    let base = total / count;
    let remainder = (total % count) as usize;

    variants
        .iter()
        .enumerate()
        .map(|(i, variant)| VariantStock {
            variant: variant.clone(),
            stock: base + u32::from(i < remainder),
        })
        .collect()
}

fn synthetic_stock() -> u32 {
    rand::thread_rng().gen_range(FALLBACK_STOCK_MIN..=FALLBACK_STOCK_MAX)
}
