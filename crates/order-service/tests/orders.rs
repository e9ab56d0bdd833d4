//! Integration tests for the order endpoints.

mod common;

use axum::http::StatusCode;
use common::{body_json, build_test_app, get, post_json, USER};
use shop_core::OrderCreated;
use shop_events::{Envelope, Topic};

const ORDER_BODY: &str = r#"{"email":"b@x.com","amount":2599,"status":"success"}"#;

// ---------------------------------------------------------------------------
// Test: creating an order saves it and publishes order.created
// ---------------------------------------------------------------------------

#[tokio::test]
async fn create_order_saves_and_publishes() {
    let t = build_test_app().await;

    let response = post_json(t.app.clone(), "/api/v1/orders", Some(USER), ORDER_BODY).await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let json = body_json(response).await;
    let order = &json["data"]["order"];
    assert_eq!(order["user_id"], USER);
    assert_eq!(order["amount"], 2599);
    assert_eq!(order["status"], "success");
    assert!(order["id"].is_string());

    let notification = &json["data"]["notification"];
    assert_eq!(notification["status"], "published");
    assert_eq!(notification["topic"], "order.created");
    assert_eq!(notification["offset"], 0);

    let topic = Topic::new("order.created").unwrap();
    let records = t.broker.records(&topic).await;
    assert_eq!(records.len(), 1);

    let envelope = Envelope::from_bytes(&records[0].payload).unwrap();
    assert_eq!(envelope.metadata.producer, "order-service");
    let event: OrderCreated = envelope.decode_value().unwrap();
    assert_eq!(event.amount, 2599);
    assert_eq!(event.email, "b@x.com");
    assert_eq!(event.order_id.as_deref(), order["id"].as_str());
}

// ---------------------------------------------------------------------------
// Test: missing principal is rejected with 401 and nothing is saved
// ---------------------------------------------------------------------------

#[tokio::test]
async fn create_order_without_principal_returns_401() {
    let t = build_test_app().await;

    let response = post_json(t.app.clone(), "/api/v1/orders", None, ORDER_BODY).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let json = body_json(response).await;
    assert_eq!(json["code"], "UNAUTHORIZED");
    assert!(t.store.is_empty().await);
}

// ---------------------------------------------------------------------------
// Test: invalid input returns 400 and publishes nothing
// ---------------------------------------------------------------------------

#[tokio::test]
async fn invalid_order_returns_400() {
    let t = build_test_app().await;

    let response = post_json(
        t.app.clone(),
        "/api/v1/orders",
        Some(USER),
        r#"{"email":"nobody","amount":2599,"status":"success"}"#,
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "VALIDATION_ERROR");

    let response = post_json(
        t.app.clone(),
        "/api/v1/orders",
        Some(USER),
        r#"{"email":"b@x.com","amount":"lots"}"#,
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "BAD_REQUEST");

    let topic = Topic::new("order.created").unwrap();
    assert_eq!(t.broker.topic_len(&topic).await, 0);
    assert!(t.store.is_empty().await);
}

// ---------------------------------------------------------------------------
// Test: publish failure is reported but the order stays saved
// ---------------------------------------------------------------------------

#[tokio::test]
async fn publish_failure_is_surfaced_in_body() {
    let t = build_test_app().await;
    t.connection.disconnect().await;

    let response = post_json(t.app.clone(), "/api/v1/orders", Some(USER), ORDER_BODY).await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let json = body_json(response).await;
    let notification = &json["data"]["notification"];
    assert_eq!(notification["status"], "failed");
    assert_eq!(notification["kind"], "not_connected");
    assert!(notification["error"].is_string());

    assert_eq!(t.store.len().await, 1);
}

// ---------------------------------------------------------------------------
// Test: listing returns only the principal's orders
// ---------------------------------------------------------------------------

#[tokio::test]
async fn list_orders_is_scoped_to_principal() {
    let t = build_test_app().await;

    post_json(t.app.clone(), "/api/v1/orders", Some(USER), ORDER_BODY).await;
    post_json(t.app.clone(), "/api/v1/orders", Some("user_other"), ORDER_BODY).await;

    let response = get(t.app.clone(), "/api/v1/orders", Some(USER)).await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    let orders = json["data"].as_array().unwrap();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0]["user_id"], USER);

    let response = get(t.app.clone(), "/api/v1/orders", None).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

// ---------------------------------------------------------------------------
// Test: /me echoes the forwarded principal
// ---------------------------------------------------------------------------

#[tokio::test]
async fn me_returns_principal() {
    let t = build_test_app().await;
    let response = get(t.app.clone(), "/api/v1/me", Some(USER)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["data"]["user_id"], USER);
}
