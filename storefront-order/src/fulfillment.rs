use serde::Serialize;
use std::collections::HashSet;
use std::sync::Mutex as StdMutex;
use storefront_core::supplier::{PlacementError, PlacementRequest};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::OrderError;
use crate::manager::OrderManager;
use crate::models::{FulfillmentAttempt, Order, OrderItem, OrderStatus};

/// Result of one fulfillment run over an order's items.
#[derive(Debug, Clone, Serialize)]
pub struct FulfillmentSummary {
    pub order_id: Uuid,
    pub status: OrderStatus,
    /// Items that already had a succeeded attempt and were not sent again
    pub skipped: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Set when the order left `processing` before every item was tried
    pub interrupted: bool,
    pub attempts: Vec<FulfillmentAttempt>,
}

impl OrderManager {
    /// Place every item of a freshly paid order with the partner.
    pub async fn run_fulfillment(&self, order_id: Uuid) -> Result<FulfillmentSummary, OrderError> {
        self.fulfill(order_id, &[OrderStatus::Paid]).await
    }

    /// Re-run placement for items that have not succeeded yet.
    ///
    /// Also resumes an order left in `processing` by a run that stopped on a
    /// storage error before it could record its final status.
    pub async fn retry_fulfillment(&self, order_id: Uuid) -> Result<FulfillmentSummary, OrderError> {
        self.fulfill(
            order_id,
            &[OrderStatus::PartiallyOrdered, OrderStatus::Error, OrderStatus::Processing],
        )
        .await
    }

    async fn fulfill(&self, order_id: Uuid, allowed_from: &[OrderStatus]) -> Result<FulfillmentSummary, OrderError> {
        let (pending, _run) = self.claim(order_id, allowed_from).await?;
        let skipped = pending.items.len() - pending.items_awaiting_fulfillment().len();
        let mut attempts = Vec::new();
        let mut unrecorded = Vec::new();
        let mut interrupted = false;
        let mut failure = None;

        for item in pending.items_awaiting_fulfillment() {
            // An operator may cancel while we are between items.
            let current = match self.get_order(order_id).await {
                Ok(order) => order,
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            };
            if current.status != OrderStatus::Processing {
                info!(order_id = %order_id, status = %current.status, "Fulfillment interrupted");
                interrupted = true;
                break;
            }

            let attempt = self.place(&current, &item).await;
            attempts.push(attempt.clone());
            if let Err(e) = self.record_attempt(order_id, attempt.clone()).await {
                warn!(order_id = %order_id, item_id = %item.id, error = %e, "Could not record attempt, stopping batch");
                unrecorded.push(attempt);
                failure = Some(e);
                break;
            }
        }

        let finished = self.finish(order_id, unrecorded).await;
        if let Some(e) = failure {
            match &finished {
                Ok(status) => warn!(order_id = %order_id, status = %status, "Fulfillment stopped early"),
                Err(finish_err) => error!(
                    order_id = %order_id,
                    error = %finish_err,
                    partner_refs = ?attempts.iter().filter_map(|a| a.partner_reference.as_deref()).collect::<Vec<_>>(),
                    "Order left in processing; retry_fulfillment resumes it"
                ),
            }
            return Err(e);
        }

        let status = finished?;
        let succeeded = attempts.iter().filter(|a| a.succeeded()).count();
        let summary = FulfillmentSummary {
            order_id,
            status,
            skipped,
            succeeded,
            failed: attempts.len() - succeeded,
            interrupted,
            attempts,
        };

        info!(
            order_id = %order_id,
            status = %summary.status,
            succeeded = summary.succeeded,
            failed = summary.failed,
            skipped = summary.skipped,
            "Fulfillment finished"
        );
        Ok(summary)
    }

    /// Move the order into `processing` and mark the run as ours. A second
    /// claim while a run is active fails.
    async fn claim(&self, order_id: Uuid, allowed_from: &[OrderStatus]) -> Result<(Order, RunMarker<'_>), OrderError> {
        let lock = self.order_lock(order_id);
        let _guard = lock.lock().await;
        let mut order = self.get_order(order_id).await?;

        if !allowed_from.contains(&order.status) {
            return Err(OrderError::invalid(order.status, OrderStatus::Processing));
        }
        let Some(marker) = RunMarker::acquire(&self.fulfilling, order_id) else {
            return Err(OrderError::invalid(order.status, OrderStatus::Processing));
        };

        if order.status == OrderStatus::Processing {
            warn!(order_id = %order_id, "Resuming fulfillment left in processing");
        } else {
            self.transition(&mut order, OrderStatus::Processing)?;
            self.repo.update(&order).await?;
        }

        info!(order_id = %order_id, items = order.items_awaiting_fulfillment().len(), "Fulfillment claimed");
        Ok((order, marker))
    }

    /// One partner call, bounded by the configured timeout. Never fails.
    async fn place(&self, order: &Order, item: &OrderItem) -> FulfillmentAttempt {
        if !self
            .inventory
            .check_stock(&item.product_id, item.variant.as_deref(), item.quantity)
            .await
        {
            warn!(
                order_id = %order.id,
                product_id = %item.product_id,
                variant = ?item.variant,
                quantity = item.quantity,
                "Cached stock looks short, placing anyway"
            );
        }

        let request = PlacementRequest {
            product_ref: item.partner_product_ref.clone(),
            variant_ref: item.partner_variant_ref.clone(),
            quantity: item.quantity,
            shipping_address: order.customer.shipping_address(),
            memo: order.order_number.clone(),
        };

        let timeout = self.config.call_timeout;
        let result = match tokio::time::timeout(timeout, self.partner.place_item(&request)).await {
            Ok(result) => result,
            Err(_) => Err(PlacementError::Timeout(timeout.as_millis() as u64)),
        };
        if let Err(e) = &result {
            warn!(order_id = %order.id, item_id = %item.id, error = %e, "Item placement failed");
        }

        FulfillmentAttempt::from_result(order.id, item.id, result)
    }

    async fn record_attempt(&self, order_id: Uuid, attempt: FulfillmentAttempt) -> Result<(), OrderError> {
        let lock = self.order_lock(order_id);
        let _guard = lock.lock().await;
        let mut order = self.get_order(order_id).await?;
        order.fulfillment_attempts.push(attempt);
        order.touch();
        self.repo.update(&order).await?;
        Ok(())
    }

    /// Aggregate recorded attempts into the final status, first saving any
    /// attempts that could not be recorded earlier. An order that left
    /// `processing` meanwhile keeps whatever status it has now.
    async fn finish(&self, order_id: Uuid, unrecorded: Vec<FulfillmentAttempt>) -> Result<OrderStatus, OrderError> {
        let lock = self.order_lock(order_id);
        let _guard = lock.lock().await;
        let mut order = self.get_order(order_id).await?;

        let late = !unrecorded.is_empty();
        if late {
            order.fulfillment_attempts.extend(unrecorded);
            order.touch();
        }
        if order.status != OrderStatus::Processing {
            if late {
                self.repo.update(&order).await?;
            }
            return Ok(order.status);
        }
        let status = order.fulfillment_status();
        self.transition(&mut order, status)?;
        self.repo.update(&order).await?;
        Ok(status)
    }
}

/// Registration of an in-progress run; removed again on drop.
struct RunMarker<'a> {
    runs: &'a StdMutex<HashSet<Uuid>>,
    order_id: Uuid,
}

impl<'a> RunMarker<'a> {
    fn acquire(runs: &'a StdMutex<HashSet<Uuid>>, order_id: Uuid) -> Option<Self> {
        let mut active = runs.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        active.insert(order_id).then(|| Self { runs, order_id })
    }
}

impl Drop for RunMarker<'_> {
    fn drop(&mut self) {
        let mut active = self.runs.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        active.remove(&self.order_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        customer, harness, harness_with, harness_with_repo, items, paid_order, CancellingPartner, FlakyRepository,
    };
    use std::sync::Arc;
    use std::time::Duration;
    use storefront_core::mock::MockFulfillmentPartner;

    #[tokio::test]
    async fn test_middle_item_failure_yields_partially_ordered() {
        let h = harness();
        h.partner.reject("cap");
        let order = paid_order(&h.manager, &[("tee", 5_000, 1), ("cap", 2_000, 1), ("mug", 1_500, 2)]).await;

        let summary = h.manager.run_fulfillment(order.id).await.unwrap();
        assert_eq!(summary.status, OrderStatus::PartiallyOrdered);
        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.failed, 1);

        let stored = h.manager.get_order(order.id).await.unwrap();
        assert_eq!(stored.status, OrderStatus::PartiallyOrdered);
        assert_eq!(stored.fulfillment_attempts.len(), 3);
        assert_eq!(stored.fulfillment_attempts.iter().filter(|a| a.succeeded()).count(), 2);
        assert_eq!(h.partner.placed_refs(), vec!["tee".to_string(), "mug".to_string()]);
    }

    #[tokio::test]
    async fn test_all_items_fail_yields_error() {
        let h = harness();
        h.partner.fail_transport("tee");
        let order = paid_order(&h.manager, &[("tee", 5_000, 1)]).await;

        let summary = h.manager.run_fulfillment(order.id).await.unwrap();
        assert_eq!(summary.status, OrderStatus::Error);
        assert_eq!(
            summary.attempts[0].failure_kind,
            Some(crate::models::FailureKind::Transient)
        );
    }

    #[tokio::test]
    async fn test_retry_skips_succeeded_items() {
        let h = harness();
        h.partner.reject("cap");
        let order = paid_order(&h.manager, &[("tee", 5_000, 1), ("cap", 2_000, 1)]).await;
        h.manager.run_fulfillment(order.id).await.unwrap();

        h.partner.heal("cap");
        let summary = h.manager.retry_fulfillment(order.id).await.unwrap();
        assert_eq!(summary.status, OrderStatus::Ordered);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(h.partner.placed_refs(), vec!["tee".to_string(), "cap".to_string()]);

        let stored = h.manager.get_order(order.id).await.unwrap();
        assert_eq!(stored.fulfillment_attempts.len(), 3);
    }

    #[tokio::test]
    async fn test_retry_from_error_state() {
        let h = harness();
        h.partner.fail_transport("tee");
        let order = paid_order(&h.manager, &[("tee", 5_000, 1)]).await;
        h.manager.run_fulfillment(order.id).await.unwrap();

        h.partner.heal("tee");
        let summary = h.manager.retry_fulfillment(order.id).await.unwrap();
        assert_eq!(summary.status, OrderStatus::Ordered);
    }

    #[tokio::test]
    async fn test_run_requires_paid() {
        let h = harness();
        let order = h.manager.create_order(customer(), items(&[("tee", 5_000, 1)])).await.unwrap();
        assert!(matches!(
            h.manager.run_fulfillment(order.id).await,
            Err(OrderError::InvalidState { from: OrderStatus::Pending, .. })
        ));

        let paid = paid_order(&h.manager, &[("tee", 5_000, 1)]).await;
        h.manager.run_fulfillment(paid.id).await.unwrap();
        assert!(matches!(
            h.manager.run_fulfillment(paid.id).await,
            Err(OrderError::InvalidState { from: OrderStatus::Ordered, .. })
        ));
        assert!(matches!(
            h.manager.retry_fulfillment(paid.id).await,
            Err(OrderError::InvalidState { .. })
        ));
    }

    #[tokio::test]
    async fn test_slow_partner_times_out_as_transient() {
        let partner = Arc::new(MockFulfillmentPartner::new().with_delay(Duration::from_millis(200)));
        let h = harness_with(partner, Duration::from_millis(20));
        let order = paid_order(&h.manager, &[("tee", 5_000, 1)]).await;

        let summary = h.manager.run_fulfillment(order.id).await.unwrap();
        assert_eq!(summary.status, OrderStatus::Error);
        assert!(summary.attempts[0].error.as_deref().unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_cancel_mid_batch_stops_remaining_items() {
        let partner = Arc::new(CancellingPartner::default());
        let h = harness_with(partner.clone(), Duration::from_secs(5));
        partner.bind(h.manager.clone());
        let order = paid_order(&h.manager, &[("tee", 5_000, 1), ("cap", 2_000, 1), ("mug", 1_500, 1)]).await;
        partner.cancel_on_first_call(order.id);

        let summary = h.manager.run_fulfillment(order.id).await.unwrap();
        assert!(summary.interrupted);
        assert_eq!(summary.status, OrderStatus::Cancelled);
        assert_eq!(partner.calls(), 1);

        let stored = h.manager.get_order(order.id).await.unwrap();
        assert_eq!(stored.status, OrderStatus::Cancelled);
        assert_eq!(stored.fulfillment_attempts.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_attempt_write_still_settles_order() {
        let repo = Arc::new(FlakyRepository::default());
        let h = harness_with_repo(repo.clone());
        let order = paid_order(&h.manager, &[("tee", 5_000, 1), ("cap", 2_000, 1)]).await;

        // The claim goes through, recording the first attempt does not.
        repo.fail_updates(1, 1);
        let result = h.manager.run_fulfillment(order.id).await;
        assert!(matches!(result, Err(OrderError::Repository(_))));

        let stored = h.manager.get_order(order.id).await.unwrap();
        assert_eq!(stored.status, OrderStatus::PartiallyOrdered);
        assert_eq!(stored.fulfillment_attempts.len(), 1);
        assert!(stored.fulfillment_attempts[0].succeeded());

        let summary = h.manager.retry_fulfillment(order.id).await.unwrap();
        assert_eq!(summary.status, OrderStatus::Ordered);
        assert_eq!(summary.skipped, 1);
        assert_eq!(h.partner.placed_refs(), vec!["tee".to_string(), "cap".to_string()]);
    }

    #[tokio::test]
    async fn test_retry_resumes_order_left_in_processing() {
        let repo = Arc::new(FlakyRepository::default());
        let h = harness_with_repo(repo.clone());
        let order = paid_order(&h.manager, &[("tee", 5_000, 1)]).await;

        // Claim and attempt are saved, the final status is not.
        repo.fail_updates(2, 1);
        assert!(h.manager.run_fulfillment(order.id).await.is_err());
        let stored = h.manager.get_order(order.id).await.unwrap();
        assert_eq!(stored.status, OrderStatus::Processing);

        assert!(matches!(
            h.manager.run_fulfillment(order.id).await,
            Err(OrderError::InvalidState { from: OrderStatus::Processing, .. })
        ));
        let summary = h.manager.retry_fulfillment(order.id).await.unwrap();
        assert_eq!(summary.status, OrderStatus::Ordered);
        assert_eq!(summary.skipped, 1);
        assert_eq!(h.partner.placed_refs(), vec!["tee".to_string()]);
    }
}
