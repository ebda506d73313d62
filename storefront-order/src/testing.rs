//! Shared fixtures for the order tests.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;
use storefront_catalog::{InventoryCache, InventoryConfig, TrackedProduct};
use storefront_core::inventory::InventorySource;
use storefront_core::mock::{MockFulfillmentPartner, MockPaymentGateway, RecordingSnapshotStore, StaticInventorySource};
use storefront_core::repository::RepositoryError;
use storefront_core::supplier::{FulfillmentPartner, PlacementError, PlacementRequest};
use uuid::Uuid;

use crate::manager::{ManagerConfig, OrderManager};
use crate::models::{CustomerInfo, CustomerSnapshot, NewOrderItem, Order, OrderStatus, PaymentStatus, Totals};
use crate::orchestrator::ReconcileOutcome;
use crate::repository::{InMemoryOrderRepository, OrderFilter, OrderRepository};

pub(crate) struct Harness<P = MockFulfillmentPartner> {
    pub manager: Arc<OrderManager>,
    pub gateway: Arc<MockPaymentGateway>,
    pub partner: Arc<P>,
}

pub(crate) fn harness() -> Harness {
    harness_with(Arc::new(MockFulfillmentPartner::new()), Duration::from_secs(5))
}

pub(crate) fn harness_with<P: FulfillmentPartner + 'static>(partner: Arc<P>, call_timeout: Duration) -> Harness<P> {
    build(partner, call_timeout, Arc::new(InMemoryOrderRepository::new()))
}

pub(crate) fn harness_with_repo(repo: Arc<dyn OrderRepository>) -> Harness {
    build(Arc::new(MockFulfillmentPartner::new()), Duration::from_secs(5), repo)
}

fn build<P: FulfillmentPartner + 'static>(
    partner: Arc<P>,
    call_timeout: Duration,
    repo: Arc<dyn OrderRepository>,
) -> Harness<P> {
    let gateway = Arc::new(MockPaymentGateway::new("NGN"));
    let source = StaticInventorySource::new("jumia")
        .with_stock("tee", 10)
        .with_stock("cap", 10)
        .with_stock("mug", 10);
    let sources: Vec<Arc<dyn InventorySource>> = vec![Arc::new(source)];
    let inventory = Arc::new(InventoryCache::new(
        vec![
            TrackedProduct::new("tee", &["S", "M"]),
            TrackedProduct::new("cap", &[]),
            TrackedProduct::new("mug", &[]),
        ],
        sources,
        Arc::new(RecordingSnapshotStore::new()),
        InventoryConfig::default(),
    ));

    let manager = Arc::new(OrderManager::new(
        repo,
        gateway.clone(),
        partner.clone(),
        inventory,
        ManagerConfig {
            call_timeout,
            ..ManagerConfig::default()
        },
    ));

    Harness { manager, gateway, partner }
}

impl<P> Harness<P> {
    /// Created, paid through the gateway, and fulfilled.
    pub async fn paid_and_fulfilled(&self, lines: &[(&str, i64, i64)]) -> Order {
        let order = self.manager.create_order(customer(), items(lines)).await.unwrap();
        let session = self.manager.initialize_payment(order.id, None).await.unwrap();
        match self.manager.reconcile_payment(&session.reference).await.unwrap() {
            ReconcileOutcome::Paid { order, .. } => order,
            other => panic!("expected paid, got {other:?}"),
        }
    }
}

/// An order sitting in `paid`, before any fulfillment ran.
pub(crate) async fn paid_order(manager: &OrderManager, lines: &[(&str, i64, i64)]) -> Order {
    let order = manager.create_order(customer(), items(lines)).await.unwrap();
    manager.initialize_payment(order.id, None).await.unwrap();

    let mut order = manager.get_order(order.id).await.unwrap();
    order.status = OrderStatus::Paid;
    order.payment_status = PaymentStatus::Completed;
    manager.repo.update(&order).await.unwrap();
    order
}

pub(crate) fn customer() -> CustomerInfo {
    CustomerInfo {
        first_name: "Ada".into(),
        last_name: "Obi".into(),
        email: "ada@example.com".into(),
        phone: "+2348012345678".into(),
        address: "12 Marina Road".into(),
        city: "Lagos".into(),
        state: "Lagos".into(),
        zip: "100001".into(),
        country: Some("NG".into()),
    }
}

/// `(product_id, unit_price, quantity)` lines.
pub(crate) fn items(lines: &[(&str, i64, i64)]) -> Vec<NewOrderItem> {
    lines
        .iter()
        .map(|(product_id, unit_price, quantity)| NewOrderItem {
            product_id: product_id.to_string(),
            variant: None,
            name: product_id.to_uppercase(),
            unit_price: *unit_price,
            quantity: *quantity,
            partner_product_ref: None,
            partner_variant_ref: None,
        })
        .collect()
}

pub(crate) fn bare_order(total: i64) -> Order {
    Order::new(
        "ORD-20260101-TEST01".into(),
        CustomerSnapshot::capture(&customer()),
        Vec::new(),
        Totals {
            subtotal: total,
            tax: 0,
            shipping: 0,
            total,
        },
        "NGN",
    )
}

/// Accepts every item, and cancels the bound order during its first call.
#[derive(Default)]
pub(crate) struct CancellingPartner {
    manager: OnceLock<Arc<OrderManager>>,
    target: OnceLock<Uuid>,
    calls: AtomicUsize,
}

impl CancellingPartner {
    pub fn bind(&self, manager: Arc<OrderManager>) {
        let _ = self.manager.set(manager);
    }

    pub fn cancel_on_first_call(&self, order_id: Uuid) {
        let _ = self.target.set(order_id);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FulfillmentPartner for CancellingPartner {
    async fn place_item(&self, request: &PlacementRequest) -> Result<String, PlacementError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n == 0 {
            if let (Some(manager), Some(order_id)) = (self.manager.get(), self.target.get()) {
                manager.cancel_order(*order_id).await.unwrap();
            }
        }
        Ok(format!("{}-{}", request.product_ref, n))
    }
}

/// In-memory repository whose updates can be made to fail on demand.
#[derive(Default)]
pub(crate) struct FlakyRepository {
    inner: InMemoryOrderRepository,
    /// (updates to let through, updates to fail after that)
    plan: Mutex<(usize, usize)>,
}

impl FlakyRepository {
    pub fn fail_updates(&self, skip: usize, count: usize) {
        *self.plan.lock().unwrap() = (skip, count);
    }
}

#[async_trait]
impl OrderRepository for FlakyRepository {
    async fn insert(&self, order: &Order) -> Result<(), RepositoryError> {
        self.inner.insert(order).await
    }

    async fn get(&self, id: Uuid) -> Result<Option<Order>, RepositoryError> {
        self.inner.get(id).await
    }

    async fn get_by_number(&self, order_number: &str) -> Result<Option<Order>, RepositoryError> {
        self.inner.get_by_number(order_number).await
    }

    async fn find_by_payment_reference(&self, reference: &str) -> Result<Option<Order>, RepositoryError> {
        self.inner.find_by_payment_reference(reference).await
    }

    async fn update(&self, order: &Order) -> Result<(), RepositoryError> {
        let fail = {
            let mut plan = self.plan.lock().unwrap();
            if plan.0 > 0 {
                plan.0 -= 1;
                false
            } else if plan.1 > 0 {
                plan.1 -= 1;
                true
            } else {
                false
            }
        };
        if fail {
            return Err(RepositoryError::Backend("connection reset".to_string()));
        }
        self.inner.update(order).await
    }

    async fn list(&self, filter: &OrderFilter) -> Result<Vec<Order>, RepositoryError> {
        self.inner.list(filter).await
    }
}
