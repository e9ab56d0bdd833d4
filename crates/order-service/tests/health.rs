//! Integration tests for the health check endpoint.

mod common;

use axum::http::StatusCode;
use common::{body_json, build_test_app, get};

// ---------------------------------------------------------------------------
// Test: GET /health reports the broker connection
// ---------------------------------------------------------------------------

#[tokio::test]
async fn health_check_reports_broker_connection() {
    let t = build_test_app().await;

    let response = get(t.app.clone(), "/health", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["broker_connected"], true);
    assert!(json["uptime_secs"].is_number());

    t.connection.disconnect().await;
    let json = body_json(get(t.app.clone(), "/health", None).await).await;
    assert_eq!(json["status"], "degraded");
    assert_eq!(json["broker_connected"], false);
}

// ---------------------------------------------------------------------------
// Test: x-request-id header is present in response
// ---------------------------------------------------------------------------

#[tokio::test]
async fn response_contains_x_request_id_header() {
    let t = build_test_app().await;
    let response = get(t.app.clone(), "/health", None).await;
    assert!(response.headers().get("x-request-id").is_some());
}
