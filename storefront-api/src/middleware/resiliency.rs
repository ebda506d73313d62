use axum::{
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::sync::Mutex;
use std::time::Instant;
use storefront_store::app_config::BreakerConfig;
use tracing::{error, info};

use crate::state::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    /// Failing fast until the reset period has passed.
    Open { since: Instant },
    /// One trial request is in flight.
    Probing,
}

/// Consecutive-failure breaker in front of one upstream dependency.
pub struct CircuitBreaker {
    name: &'static str,
    settings: BreakerConfig,
    inner: Mutex<BreakerInner>,
}

struct BreakerInner {
    state: BreakerState,
    failures: u32,
}

impl CircuitBreaker {
    pub fn new(name: &'static str, settings: BreakerConfig) -> Self {
        Self {
            name,
            settings,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                failures: 0,
            }),
        }
    }

    pub fn name(&self) -> &str {
        self.name
    }

    pub fn state(&self) -> BreakerState {
        self.lock().state
    }

    /// Whether a request may go upstream now. Past the reset period exactly
    /// one caller is let through as a trial.
    pub fn allow(&self) -> bool {
        let mut inner = self.lock();
        match inner.state {
            BreakerState::Closed => true,
            BreakerState::Probing => false,
            BreakerState::Open { since } if since.elapsed() >= self.settings.reset_after() => {
                inner.state = BreakerState::Probing;
                info!(breaker = self.name, "Circuit half-open, sending trial request");
                true
            }
            BreakerState::Open { .. } => false,
        }
    }

    pub fn on_success(&self) {
        let mut inner = self.lock();
        if inner.state == BreakerState::Probing {
            info!(breaker = self.name, "Circuit closed again");
        }
        inner.state = BreakerState::Closed;
        inner.failures = 0;
    }

    pub fn on_failure(&self) {
        let mut inner = self.lock();
        inner.failures = inner.failures.saturating_add(1);
        let trip = inner.state == BreakerState::Probing || inner.failures >= self.settings.failure_threshold;
        if trip && !matches!(inner.state, BreakerState::Open { .. }) {
            inner.state = BreakerState::Open { since: Instant::now() };
            error!(breaker = self.name, failures = inner.failures, "Circuit opened");
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Breakers for upstream dependencies reached from request handlers.
pub struct ResiliencyState {
    pub payment_gateway: CircuitBreaker,
}

impl ResiliencyState {
    pub fn new(payment_gateway: BreakerConfig) -> Self {
        Self {
            payment_gateway: CircuitBreaker::new("payment-gateway", payment_gateway),
        }
    }
}

impl Default for ResiliencyState {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}

/// Routes that call the payment gateway synchronously. Webhooks are excluded:
/// the gateway redelivers them and they must never be short-circuited.
fn uses_payment_gateway(path: &str) -> bool {
    if path.starts_with("/v1/webhooks") {
        return false;
    }
    path.starts_with("/v1/payments")
        || path.starts_with("/v1/admin/payments")
        || (path.starts_with("/v1/orders/") && path.ends_with("/payment"))
}

pub async fn circuit_breaker_middleware(
    State(state): State<AppState>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    if !uses_payment_gateway(req.uri().path()) {
        return next.run(req).await;
    }

    let breaker = &state.resiliency.payment_gateway;
    if !breaker.allow() {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": format!("{} is unavailable, try again shortly", breaker.name()) })),
        )
            .into_response();
    }

    let response = next.run(req).await;

    // Only upstream failures count against the gateway.
    if matches!(response.status(), StatusCode::BAD_GATEWAY | StatusCode::GATEWAY_TIMEOUT) {
        breaker.on_failure();
    } else {
        breaker.on_success();
    }

    response
}
