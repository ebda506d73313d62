use chrono::Utc;
use serde::Serialize;
use storefront_core::payment::{PaymentError, TransactionStatus, TransactionVerification};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::OrderError;
use crate::fulfillment::FulfillmentSummary;
use crate::manager::OrderManager;
use crate::models::{Order, OrderStatus, PaymentStatus};
use crate::validation;

/// Where the customer is sent to pay.
#[derive(Debug, Clone, Serialize)]
pub struct PaymentSession {
    pub order_id: Uuid,
    pub reference: String,
    pub authorization_url: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReconcileOutcome {
    /// Payment verified just now; fulfillment ran if this call won the claim.
    Paid {
        order: Order,
        fulfillment: Option<FulfillmentSummary>,
    },
    /// An earlier call already took this order past payment.
    AlreadyProcessed { order_id: Uuid, status: OrderStatus },
    NotVerified { reason: String },
}

impl OrderManager {
    /// Open a gateway transaction for the order total.
    ///
    /// Returns the stored session without calling the gateway when one
    /// already exists. On failure the order stays `pending`.
    pub async fn initialize_payment(&self, order_id: Uuid, email: Option<&str>) -> Result<PaymentSession, OrderError> {
        let lock = self.order_lock(order_id);
        let _guard = lock.lock().await;
        let mut order = self.get_order(order_id).await?;

        if let (Some(reference), Some(url)) = (&order.payment_reference, &order.authorization_url) {
            // Only an order still waiting for payment gets its checkout link back.
            if order.status != OrderStatus::Initialized {
                return Err(OrderError::invalid(order.status, OrderStatus::Initialized));
            }
            info!(order_id = %order_id, reference = %reference, "Payment already initialized");
            return Ok(PaymentSession {
                order_id,
                reference: reference.clone(),
                authorization_url: url.clone(),
            });
        }
        if !order.status.can_transition_to(OrderStatus::Initialized) {
            return Err(OrderError::invalid(order.status, OrderStatus::Initialized));
        }

        let email = match email.map(str::trim).filter(|e| !e.is_empty()) {
            Some(email) if validation::is_valid_email(email) => email.to_lowercase(),
            Some(_) => {
                let mut errors = storefront_core::ValidationError::new();
                errors.push("email", "must be a valid email address");
                return Err(errors.into());
            }
            None => order.customer.email.expose().clone(),
        };

        let reference = payment_reference(&order);
        let metadata = serde_json::json!({
            "order_id": order.id,
            "order_number": order.order_number,
        });

        let timeout = self.config.call_timeout;
        let init = match tokio::time::timeout(
            timeout,
            self.payments
                .initialize_transaction(&email, order.total_amount, &reference, metadata),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(PaymentError::Timeout(timeout.as_millis() as u64)),
        }
        .map_err(|e| {
            warn!(order_id = %order_id, error = %e, "Payment initialization failed");
            e
        })?;

        self.transition(&mut order, OrderStatus::Initialized)?;
        order.payment_status = PaymentStatus::Initialized;
        order.payment_reference = Some(init.reference.clone());
        order.authorization_url = Some(init.authorization_url.clone());
        self.repo.update(&order).await?;

        info!(order_id = %order_id, reference = %init.reference, amount = order.total_amount, "Payment initialized");
        Ok(PaymentSession {
            order_id,
            reference: init.reference,
            authorization_url: init.authorization_url,
        })
    }

    /// Settle a payment reference against the gateway's verdict.
    ///
    /// Safe to call any number of times, concurrently included: only the
    /// first verified call marks the order paid and runs fulfillment.
    pub async fn reconcile_payment(&self, reference: &str) -> Result<ReconcileOutcome, OrderError> {
        let Some(found) = self.repo.find_by_payment_reference(reference).await? else {
            warn!(reference = %reference, "Reconcile for unknown payment reference");
            return Ok(ReconcileOutcome::NotVerified {
                reason: "unknown payment reference".to_string(),
            });
        };

        let lock = self.order_lock(found.id);
        let guard = lock.lock().await;
        let mut order = self.get_order(found.id).await?;

        if order.status.is_paid_or_later() || order.payment_status == PaymentStatus::Completed {
            info!(order_id = %order.id, status = %order.status, "Payment already processed");
            return Ok(ReconcileOutcome::AlreadyProcessed {
                order_id: order.id,
                status: order.status,
            });
        }
        if order.status != OrderStatus::Initialized {
            return Ok(ReconcileOutcome::NotVerified {
                reason: format!("order is {}", order.status),
            });
        }

        let timeout = self.config.call_timeout;
        let verification = match tokio::time::timeout(timeout, self.payments.verify_transaction(reference)).await {
            Ok(Ok(v)) => v,
            Ok(Err(e)) => {
                warn!(order_id = %order.id, error = %e, "Payment verification failed");
                return Ok(ReconcileOutcome::NotVerified { reason: e.to_string() });
            }
            Err(_) => {
                warn!(order_id = %order.id, timeout_ms = timeout.as_millis() as u64, "Payment verification timed out");
                return Ok(ReconcileOutcome::NotVerified {
                    reason: PaymentError::Timeout(timeout.as_millis() as u64).to_string(),
                });
            }
        };

        if let Err(reason) = check_verification(&order, &verification) {
            if verification.status == TransactionStatus::Failed {
                order.payment_status = PaymentStatus::Failed;
                order.touch();
                self.repo.update(&order).await?;
            }
            warn!(order_id = %order.id, reason = %reason, "Payment not verified");
            return Ok(ReconcileOutcome::NotVerified { reason });
        }

        self.transition(&mut order, OrderStatus::Paid)?;
        order.payment_status = PaymentStatus::Completed;
        order.payment_verified_at = Some(verification.paid_at.unwrap_or_else(Utc::now));
        self.repo.update(&order).await?;
        drop(guard);

        info!(order_id = %order.id, reference = %reference, amount = verification.amount, "Payment verified");

        let fulfillment = match self.run_fulfillment(order.id).await {
            Ok(summary) => Some(summary),
            // Someone else claimed or cancelled the order in between.
            Err(OrderError::InvalidState { from, .. }) => {
                info!(order_id = %order.id, status = %from, "Fulfillment not started");
                None
            }
            Err(e) => return Err(e),
        };
        let order = self.get_order(order.id).await?;

        Ok(ReconcileOutcome::Paid { order, fulfillment })
    }
}

fn payment_reference(order: &Order) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}-{}", order.order_number, &suffix[..8].to_uppercase())
}

/// The gateway must report success for at least the order total, in the
/// order's currency.
fn check_verification(order: &Order, verification: &TransactionVerification) -> Result<(), String> {
    if verification.status != TransactionStatus::Success {
        return Err(format!("transaction status is {}", verification.status.as_str()));
    }
    if !verification.currency.eq_ignore_ascii_case(&order.currency) {
        return Err(format!(
            "currency mismatch: expected {}, got {}",
            order.currency, verification.currency
        ));
    }
    if verification.amount < order.total_amount {
        return Err(format!(
            "amount {} is less than order total {}",
            verification.amount, order.total_amount
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{customer, harness, items};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let h = harness();
        let order = h.manager.create_order(customer(), items(&[("tee", 5_000, 1)])).await.unwrap();

        let first = h.manager.initialize_payment(order.id, None).await.unwrap();
        let second = h.manager.initialize_payment(order.id, None).await.unwrap();

        assert_eq!(first.reference, second.reference);
        assert_eq!(h.gateway.initialize_calls(), 1);

        let stored = h.manager.get_order(order.id).await.unwrap();
        assert_eq!(stored.status, OrderStatus::Initialized);
        assert_eq!(stored.payment_status, PaymentStatus::Initialized);
        assert_eq!(stored.payment_reference.as_deref(), Some(first.reference.as_str()));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_initialize_yields_one_reference() {
        let h = harness();
        let order = h.manager.create_order(customer(), items(&[("tee", 5_000, 1)])).await.unwrap();
        let order_id = order.id;

        let tasks: Vec<_> = (0..4)
            .map(|_| {
                let manager = Arc::clone(&h.manager);
                tokio::spawn(async move { manager.initialize_payment(order_id, None).await })
            })
            .collect();
        let mut references = Vec::new();
        for task in tasks {
            references.push(task.await.unwrap().unwrap().reference);
        }

        references.dedup();
        assert_eq!(references.len(), 1);
        assert_eq!(h.gateway.initialize_calls(), 1);
    }

    #[tokio::test]
    async fn test_initialize_failure_leaves_order_pending() {
        let h = harness();
        let order = h.manager.create_order(customer(), items(&[("tee", 5_000, 1)])).await.unwrap();
        h.gateway.fail_next_initialize(PaymentError::Gateway {
            status: 503,
            body: "maintenance".into(),
        });

        assert!(matches!(
            h.manager.initialize_payment(order.id, None).await,
            Err(OrderError::Payment(_))
        ));
        let stored = h.manager.get_order(order.id).await.unwrap();
        assert_eq!(stored.status, OrderStatus::Pending);
        assert!(stored.payment_reference.is_none());

        // Retryable
        h.manager.initialize_payment(order.id, None).await.unwrap();
    }

    #[tokio::test]
    async fn test_cancelled_order_gets_no_checkout_link() {
        let h = harness();
        let order = h.manager.create_order(customer(), items(&[("tee", 5_000, 1)])).await.unwrap();
        h.manager.initialize_payment(order.id, None).await.unwrap();
        h.manager.cancel_order(order.id).await.unwrap();

        assert!(matches!(
            h.manager.initialize_payment(order.id, None).await,
            Err(OrderError::InvalidState { from: OrderStatus::Cancelled, .. })
        ));
        assert_eq!(h.gateway.initialize_calls(), 1);
    }

    #[tokio::test]
    async fn test_initialize_rejects_bad_email() {
        let h = harness();
        let order = h.manager.create_order(customer(), items(&[("tee", 5_000, 1)])).await.unwrap();
        assert!(matches!(
            h.manager.initialize_payment(order.id, Some("not-an-email")).await,
            Err(OrderError::Validation(_))
        ));
        assert_eq!(h.gateway.initialize_calls(), 0);
    }

    #[tokio::test]
    async fn test_reconcile_twice_runs_fulfillment_once() {
        let h = harness();
        let order = h.manager.create_order(customer(), items(&[("tee", 5_000, 1), ("cap", 2_000, 1)])).await.unwrap();
        let session = h.manager.initialize_payment(order.id, None).await.unwrap();

        let first = h.manager.reconcile_payment(&session.reference).await.unwrap();
        match first {
            ReconcileOutcome::Paid { order, fulfillment } => {
                assert_eq!(order.status, OrderStatus::Ordered);
                assert_eq!(order.payment_status, PaymentStatus::Completed);
                assert!(order.payment_verified_at.is_some());
                assert_eq!(fulfillment.unwrap().succeeded, 2);
            }
            other => panic!("expected paid, got {other:?}"),
        }

        let second = h.manager.reconcile_payment(&session.reference).await.unwrap();
        assert!(matches!(second, ReconcileOutcome::AlreadyProcessed { .. }));
        assert_eq!(h.partner.calls(), 2);
        assert_eq!(h.gateway.verify_calls(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_reconcile_runs_fulfillment_once() {
        let h = harness();
        let order = h.manager.create_order(customer(), items(&[("tee", 5_000, 1), ("cap", 2_000, 1)])).await.unwrap();
        let session = h.manager.initialize_payment(order.id, None).await.unwrap();

        let tasks: Vec<_> = (0..5)
            .map(|_| {
                let manager = Arc::clone(&h.manager);
                let reference = session.reference.clone();
                tokio::spawn(async move { manager.reconcile_payment(&reference).await })
            })
            .collect();

        let mut paid = 0;
        for task in tasks {
            match task.await.unwrap().unwrap() {
                ReconcileOutcome::Paid { .. } => paid += 1,
                ReconcileOutcome::AlreadyProcessed { .. } => {}
                other => panic!("unexpected outcome {other:?}"),
            }
        }
        assert_eq!(paid, 1);
        assert_eq!(h.partner.calls(), 2);
    }

    #[tokio::test]
    async fn test_failed_transaction_marks_payment_failed_only() {
        let h = harness();
        let order = h.manager.create_order(customer(), items(&[("tee", 5_000, 1)])).await.unwrap();
        let session = h.manager.initialize_payment(order.id, None).await.unwrap();
        h.gateway.set_verify_status(TransactionStatus::Failed);

        let outcome = h.manager.reconcile_payment(&session.reference).await.unwrap();
        assert!(matches!(outcome, ReconcileOutcome::NotVerified { .. }));

        let stored = h.manager.get_order(order.id).await.unwrap();
        assert_eq!(stored.status, OrderStatus::Initialized);
        assert_eq!(stored.payment_status, PaymentStatus::Failed);
        assert_eq!(h.partner.calls(), 0);
    }

    #[tokio::test]
    async fn test_transport_error_changes_nothing() {
        let h = harness();
        let order = h.manager.create_order(customer(), items(&[("tee", 5_000, 1)])).await.unwrap();
        let session = h.manager.initialize_payment(order.id, None).await.unwrap();
        h.gateway.fail_next_verify(PaymentError::Transport("connection refused".into()));

        let outcome = h.manager.reconcile_payment(&session.reference).await.unwrap();
        assert!(matches!(outcome, ReconcileOutcome::NotVerified { .. }));
        let stored = h.manager.get_order(order.id).await.unwrap();
        assert_eq!(stored.status, OrderStatus::Initialized);
        assert_eq!(stored.payment_status, PaymentStatus::Initialized);

        // The next delivery of the same event succeeds.
        let outcome = h.manager.reconcile_payment(&session.reference).await.unwrap();
        assert!(matches!(outcome, ReconcileOutcome::Paid { .. }));
    }

    #[tokio::test]
    async fn test_unknown_reference_not_verified() {
        let h = harness();
        let outcome = h.manager.reconcile_payment("ORD-00000000-NOPE").await.unwrap();
        assert!(matches!(outcome, ReconcileOutcome::NotVerified { .. }));
    }

    #[test]
    fn test_underpayment_rejected() {
        let order = crate::testing::bare_order(10_700);
        let mut verification = TransactionVerification {
            reference: "r".into(),
            status: TransactionStatus::Success,
            amount: 10_000,
            currency: "NGN".into(),
            metadata: serde_json::Value::Null,
            paid_at: None,
        };
        assert!(check_verification(&order, &verification).is_err());

        verification.amount = 10_700;
        assert!(check_verification(&order, &verification).is_ok());

        verification.currency = "USD".into();
        assert!(check_verification(&order, &verification).is_err());
    }
}
