use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use std::sync::Arc;
use storefront_api::{app, AppState};
use storefront_catalog::{InventoryCache, InventoryConfig, TrackedProduct};
use storefront_core::inventory::InventorySource;
use storefront_core::mock::{MockFulfillmentPartner, MockPaymentGateway, RecordingSnapshotStore, StaticInventorySource};
use storefront_core::payment::{sign_webhook_body, SIGNATURE_HEADER};
use storefront_order::{InMemoryOrderRepository, ManagerConfig, OrderManager};
use tower::ServiceExt;

const WEBHOOK_SECRET: &str = "sk_test_webhook";

struct TestApp {
    router: Router,
    partner: Arc<MockFulfillmentPartner>,
}

fn test_app() -> TestApp {
    let partner = Arc::new(MockFulfillmentPartner::new());
    let sources: Vec<Arc<dyn InventorySource>> = vec![
        Arc::new(StaticInventorySource::new("jumia").with_stock("classic-tee", 10)),
        Arc::new(StaticInventorySource::new("konga").with_stock("classic-tee", 14)),
    ];
    let inventory = Arc::new(InventoryCache::new(
        vec![TrackedProduct::new("classic-tee", &["S", "M"])],
        sources,
        Arc::new(RecordingSnapshotStore::new()),
        InventoryConfig::default(),
    ));
    let orders = Arc::new(OrderManager::new(
        Arc::new(InMemoryOrderRepository::new()),
        Arc::new(MockPaymentGateway::new("NGN")),
        partner.clone(),
        inventory,
        ManagerConfig::default(),
    ));

    TestApp {
        router: app(AppState::new(orders, Some(WEBHOOK_SECRET.to_string()))),
        partner,
    }
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, body)
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn order_payload() -> Value {
    json!({
        "customer": {
            "first_name": "Ada",
            "last_name": "Obi",
            "email": "ada@example.com",
            "phone": "+2348012345678",
            "address": "12 Marina Road",
            "city": "Lagos",
            "state": "Lagos",
            "zip": "100001",
            "country": "NG"
        },
        "items": [
            { "product_id": "classic-tee", "variant": "M", "name": "Classic Tee", "unit_price": 5000, "quantity": 2 },
            { "product_id": "canvas-tote", "name": "Canvas Tote", "unit_price": 10000, "quantity": 1 }
        ]
    })
}

async fn create_order(router: &Router) -> Value {
    let (status, body) = send(router, post_json("/v1/orders", order_payload())).await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    body
}

async fn initialize(router: &Router, order_id: &str) -> String {
    let (status, body) = send(router, post_json(&format!("/v1/orders/{}/payment", order_id), json!({}))).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    body["reference"].as_str().unwrap().to_string()
}

fn webhook(body: &str, signature: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/v1/webhooks/payments")
        .header("content-type", "application/json")
        .header(SIGNATURE_HEADER, signature)
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_health() {
    let t = test_app();
    let (status, body) = send(&t.router, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_create_and_read_order() {
    let t = test_app();
    let order = create_order(&t.router).await;
    assert_eq!(order["status"], "pending");
    assert_eq!(order["payment_status"], "pending");
    assert_eq!(order["subtotal"], 20_000);
    assert_eq!(order["total_amount"], 21_400);

    let id = order["id"].as_str().unwrap();
    let (status, by_id) = send(&t.router, get(&format!("/v1/orders/{}", id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(by_id["order_number"], order["order_number"]);

    let number = order["order_number"].as_str().unwrap();
    let (status, by_number) = send(&t.router, get(&format!("/v1/orders/number/{}", number))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(by_number["id"], order["id"]);

    let (status, list) = send(&t.router, get("/v1/orders?status=pending&email=ada@example.com")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_invalid_order_lists_every_violation() {
    let t = test_app();
    let mut payload = order_payload();
    payload["customer"]["email"] = json!("not-an-email");
    payload["customer"]["zip"] = json!("");
    payload["items"] = json!([]);

    let (status, body) = send(&t.router, post_json("/v1/orders", payload)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let fields: Vec<&str> = body["violations"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v["field"].as_str().unwrap())
        .collect();
    assert!(fields.contains(&"email"));
    assert!(fields.contains(&"zip"));
    assert!(fields.contains(&"items"));
}

#[tokio::test]
async fn test_signed_webhook_pays_and_fulfills() {
    let t = test_app();
    let order = create_order(&t.router).await;
    let id = order["id"].as_str().unwrap();
    let reference = initialize(&t.router, id).await;
    assert_eq!(initialize(&t.router, id).await, reference);

    let event = json!({ "event": "charge.success", "data": { "reference": reference } }).to_string();
    let signature = sign_webhook_body(event.as_bytes(), WEBHOOK_SECRET);
    let (status, body) = send(&t.router, webhook(&event, &signature)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["handled"], true);

    let (_, stored) = send(&t.router, get(&format!("/v1/orders/{}", id))).await;
    assert_eq!(stored["status"], "ordered");
    assert_eq!(stored["payment_status"], "completed");
    assert_eq!(stored["fulfillment_attempts"].as_array().unwrap().len(), 2);

    // Redelivery is a no-op.
    let (status, _) = send(&t.router, webhook(&event, &signature)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(t.partner.calls(), 2);

    let (status, shipped) = send(
        &t.router,
        post_json(
            &format!("/v1/orders/{}/tracking", id),
            json!({ "tracking_number": "1Z999AA10123456784", "carrier": "UPS" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(shipped["status"], "shipped");

    let (status, delivered) = send(&t.router, post_json(&format!("/v1/orders/{}/delivered", id), json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(delivered["status"], "delivered");
}

#[tokio::test]
async fn test_tampered_webhook_rejected() {
    let t = test_app();
    let order = create_order(&t.router).await;
    let id = order["id"].as_str().unwrap();
    let reference = initialize(&t.router, id).await;

    let signed = json!({ "event": "charge.success", "data": { "reference": reference, "amount": 100 } }).to_string();
    let signature = sign_webhook_body(signed.as_bytes(), WEBHOOK_SECRET);
    let tampered = signed.replace("100", "999999");

    let (status, body) = send(&t.router, webhook(&tampered, &signature)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Unauthorized");

    let (status, _) = send(&t.router, webhook(&signed, "deadbeef")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (_, stored) = send(&t.router, get(&format!("/v1/orders/{}", id))).await;
    assert_eq!(stored["status"], "initialized");
    assert_eq!(t.partner.calls(), 0);
}

#[tokio::test]
async fn test_verify_endpoint_is_idempotent() {
    let t = test_app();
    let order = create_order(&t.router).await;
    let reference = initialize(&t.router, order["id"].as_str().unwrap()).await;

    let uri = format!("/v1/payments/verify/{}", reference);
    let (status, first) = send(&t.router, post_json(&uri, json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["outcome"], "paid");

    let (_, second) = send(&t.router, post_json(&uri, json!({}))).await;
    assert_eq!(second["outcome"], "already_processed");
    assert_eq!(t.partner.calls(), 2);
}

#[tokio::test]
async fn test_illegal_transition_is_conflict() {
    let t = test_app();
    let order = create_order(&t.router).await;
    let id = order["id"].as_str().unwrap();

    let (status, _) = send(&t.router, post_json(&format!("/v1/orders/{}/delivered", id), json!({}))).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (_, stored) = send(&t.router, get(&format!("/v1/orders/{}", id))).await;
    assert_eq!(stored["status"], "pending");
}

#[tokio::test]
async fn test_partial_fulfillment_then_retry() {
    let t = test_app();
    t.partner.reject("canvas-tote");
    let order = create_order(&t.router).await;
    let id = order["id"].as_str().unwrap();
    let reference = initialize(&t.router, id).await;

    let (_, outcome) = send(&t.router, post_json(&format!("/v1/payments/verify/{}", reference), json!({}))).await;
    assert_eq!(outcome["order"]["status"], "partially_ordered");

    t.partner.heal("canvas-tote");
    let (status, summary) = send(&t.router, post_json(&format!("/v1/orders/{}/fulfillment/retry", id), json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(summary["status"], "ordered");
    assert_eq!(summary["skipped"], 1);
}

#[tokio::test]
async fn test_unknown_order_is_not_found() {
    let t = test_app();
    let (status, _) = send(&t.router, get("/v1/orders/7f1d0c5e-2b0a-4d4e-9a3c-1f6f4f0b9a11")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_inventory_endpoints() {
    let t = test_app();
    let (status, snapshot) = send(&t.router, get("/v1/inventory?refresh=true")).await;
    assert_eq!(status, StatusCode::OK);
    let tee = &snapshot["products"]["classic-tee"];
    assert_eq!(tee["consolidated_stock"], 10);
    assert_eq!(tee["is_fallback"], false);

    let (status, check) = send(&t.router, get("/v1/inventory/classic-tee/check?variant=M&quantity=5")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(check["available"], true);

    let (_, check) = send(&t.router, get("/v1/inventory/classic-tee/check?variant=M&quantity=6")).await;
    assert_eq!(check["available"], false);
}

#[tokio::test]
async fn test_refund_requires_reference() {
    let t = test_app();
    let (status, body) = send(&t.router, post_json("/v1/admin/payments/refunds", json!({ "reference": "" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["violations"][0]["field"], "reference");
}
