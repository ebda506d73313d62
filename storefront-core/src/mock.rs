//! In-process stand-ins for the external collaborators.
//!
//! Used by the test suites of every crate and by the API binary when
//! `payment.provider` / `fulfillment.provider` are set to `mock` for local runs.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::inventory::{InventorySnapshot, InventorySource, SourceFetchError};
use crate::payment::{
    PaymentError, PaymentGateway, Refund, TransactionInit, TransactionPage, TransactionQuery,
    TransactionStatus, TransactionSummary, TransactionVerification,
};
use crate::repository::{RepositoryError, SnapshotStore};
use crate::supplier::{FulfillmentPartner, PlacementError, PlacementRequest};

#[derive(Debug, Clone)]
struct MockTransaction {
    email: String,
    amount: i64,
    metadata: Value,
}

/// Gateway that accepts every initialization and verifies with a scripted status.
pub struct MockPaymentGateway {
    currency: String,
    transactions: Mutex<HashMap<String, MockTransaction>>,
    verify_status: Mutex<TransactionStatus>,
    initialize_failures: Mutex<VecDeque<PaymentError>>,
    verify_failures: Mutex<VecDeque<PaymentError>>,
    initialize_calls: AtomicUsize,
    verify_calls: AtomicUsize,
}

impl MockPaymentGateway {
    pub fn new(currency: &str) -> Self {
        Self {
            currency: currency.to_string(),
            transactions: Mutex::new(HashMap::new()),
            verify_status: Mutex::new(TransactionStatus::Success),
            initialize_failures: Mutex::new(VecDeque::new()),
            verify_failures: Mutex::new(VecDeque::new()),
            initialize_calls: AtomicUsize::new(0),
            verify_calls: AtomicUsize::new(0),
        }
    }

    /// Status every subsequent verify call reports.
    pub fn set_verify_status(&self, status: TransactionStatus) {
        *lock(&self.verify_status) = status;
    }

    /// Fail the next initialize call with `error`.
    pub fn fail_next_initialize(&self, error: PaymentError) {
        lock(&self.initialize_failures).push_back(error);
    }

    pub fn fail_next_verify(&self, error: PaymentError) {
        lock(&self.verify_failures).push_back(error);
    }

    pub fn initialize_calls(&self) -> usize {
        self.initialize_calls.load(Ordering::SeqCst)
    }

    pub fn verify_calls(&self) -> usize {
        self.verify_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentGateway for MockPaymentGateway {
    async fn initialize_transaction(
        &self,
        email: &str,
        amount_minor: i64,
        reference: &str,
        metadata: Value,
    ) -> Result<TransactionInit, PaymentError> {
        self.initialize_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = lock(&self.initialize_failures).pop_front() {
            return Err(err);
        }

        lock(&self.transactions).insert(
            reference.to_string(),
            MockTransaction {
                email: email.to_string(),
                amount: amount_minor,
                metadata,
            },
        );

        Ok(TransactionInit {
            authorization_url: format!("https://checkout.mock/{}", reference),
            access_code: Some(format!("ac_{}", reference)),
            reference: reference.to_string(),
        })
    }

    async fn verify_transaction(&self, reference: &str) -> Result<TransactionVerification, PaymentError> {
        self.verify_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = lock(&self.verify_failures).pop_front() {
            return Err(err);
        }

        let transaction = lock(&self.transactions).get(reference).cloned().ok_or_else(|| {
            PaymentError::Gateway {
                status: 404,
                body: format!("Transaction reference not found: {}", reference),
            }
        })?;
        let status = *lock(&self.verify_status);

        Ok(TransactionVerification {
            reference: reference.to_string(),
            status,
            amount: transaction.amount,
            currency: self.currency.clone(),
            metadata: transaction.metadata,
            paid_at: (status == TransactionStatus::Success).then(chrono::Utc::now),
        })
    }

    async fn list_transactions(&self, query: &TransactionQuery) -> Result<TransactionPage, PaymentError> {
        let status = *lock(&self.verify_status);
        let transactions: Vec<TransactionSummary> = lock(&self.transactions)
            .iter()
            .filter(|(_, t)| query.customer.as_deref().map_or(true, |c| c == t.email))
            .filter(|_| query.status.map_or(true, |s| s == status))
            .map(|(reference, t)| TransactionSummary {
                reference: reference.clone(),
                status,
                amount: t.amount,
                currency: self.currency.clone(),
                customer_email: Some(t.email.clone()),
                created_at: None,
            })
            .collect();

        Ok(TransactionPage {
            total: transactions.len() as u64,
            page: query.page.unwrap_or(1),
            per_page: query.per_page.unwrap_or(50),
            transactions,
        })
    }

    async fn create_refund(&self, reference: &str, amount_minor: Option<i64>) -> Result<Refund, PaymentError> {
        let transaction = lock(&self.transactions).get(reference).cloned().ok_or_else(|| {
            PaymentError::Gateway {
                status: 404,
                body: format!("Transaction reference not found: {}", reference),
            }
        })?;

        Ok(Refund {
            transaction_reference: reference.to_string(),
            amount: amount_minor.unwrap_or(transaction.amount),
            status: "pending".to_string(),
        })
    }
}

/// Partner that accepts everything except product refs it was told to fail.
pub struct MockFulfillmentPartner {
    rejected: Mutex<HashSet<String>>,
    transient: Mutex<HashSet<String>>,
    placed: Mutex<Vec<PlacementRequest>>,
    delay: Duration,
    calls: AtomicUsize,
}

impl MockFulfillmentPartner {
    pub fn new() -> Self {
        Self {
            rejected: Mutex::new(HashSet::new()),
            transient: Mutex::new(HashSet::new()),
            placed: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Partner rejects this product ref (permanent).
    pub fn reject(&self, product_ref: &str) {
        lock(&self.rejected).insert(product_ref.to_string());
    }

    /// Partner is unreachable for this product ref (transient).
    pub fn fail_transport(&self, product_ref: &str) {
        lock(&self.transient).insert(product_ref.to_string());
    }

    /// Clear scripted failures for a product ref.
    pub fn heal(&self, product_ref: &str) {
        lock(&self.rejected).remove(product_ref);
        lock(&self.transient).remove(product_ref);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Product refs of every accepted placement, in call order.
    pub fn placed_refs(&self) -> Vec<String> {
        lock(&self.placed).iter().map(|r| r.product_ref.clone()).collect()
    }
}

impl Default for MockFulfillmentPartner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FulfillmentPartner for MockFulfillmentPartner {
    async fn place_item(&self, request: &PlacementRequest) -> Result<String, PlacementError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        if lock(&self.rejected).contains(&request.product_ref) {
            return Err(PlacementError::Rejected(format!(
                "product {} is not available for drop-ship",
                request.product_ref
            )));
        }
        if lock(&self.transient).contains(&request.product_ref) {
            return Err(PlacementError::Transport("connection reset by partner".to_string()));
        }

        lock(&self.placed).push(request.clone());
        Ok(format!("PARTNER-{:05}", n))
    }
}

/// Source with fixed readings per product ref.
pub struct StaticInventorySource {
    name: String,
    stock: Mutex<HashMap<String, u32>>,
    failing: Mutex<bool>,
    calls: AtomicUsize,
}

impl StaticInventorySource {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            stock: Mutex::new(HashMap::new()),
            failing: Mutex::new(false),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_stock(self, product_ref: &str, stock: u32) -> Self {
        self.set_stock(product_ref, stock);
        self
    }

    pub fn set_stock(&self, product_ref: &str, stock: u32) {
        lock(&self.stock).insert(product_ref.to_string(), stock);
    }

    /// Every fetch errors while set.
    pub fn set_failing(&self, failing: bool) {
        *lock(&self.failing) = failing;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InventorySource for StaticInventorySource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_stock(&self, product_ref: &str) -> Result<u32, SourceFetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if *lock(&self.failing) {
            return Err(SourceFetchError::Status {
                source_name: self.name.clone(),
                status: 503,
            });
        }
        lock(&self.stock)
            .get(product_ref)
            .copied()
            .ok_or_else(|| SourceFetchError::Parse {
                source_name: self.name.clone(),
                message: format!("no listing for {}", product_ref),
            })
    }
}

/// Snapshot store that keeps the last saved document and counts writes.
pub struct RecordingSnapshotStore {
    saved: Mutex<Option<InventorySnapshot>>,
    saves: AtomicUsize,
    failing: Mutex<bool>,
}

impl RecordingSnapshotStore {
    pub fn new() -> Self {
        Self {
            saved: Mutex::new(None),
            saves: AtomicUsize::new(0),
            failing: Mutex::new(false),
        }
    }

    pub fn with_snapshot(snapshot: InventorySnapshot) -> Self {
        let store = Self::new();
        *lock(&store.saved) = Some(snapshot);
        store
    }

    pub fn set_failing(&self, failing: bool) {
        *lock(&self.failing) = failing;
    }

    pub fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn saved(&self) -> Option<InventorySnapshot> {
        lock(&self.saved).clone()
    }
}

impl Default for RecordingSnapshotStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SnapshotStore for RecordingSnapshotStore {
    async fn save_snapshot(&self, snapshot: &InventorySnapshot) -> Result<(), RepositoryError> {
        if *lock(&self.failing) {
            return Err(RepositoryError::Backend("snapshot store offline".to_string()));
        }
        self.saves.fetch_add(1, Ordering::SeqCst);
        *lock(&self.saved) = Some(snapshot.clone());
        Ok(())
    }

    async fn load_snapshot(&self) -> Result<Option<InventorySnapshot>, RepositoryError> {
        Ok(lock(&self.saved).clone())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
