//! Shared helpers for the order service integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Method, Request};
use axum::response::Response;
use axum::Router;
use chrono::Utc;
use http_body_util::BodyExt;
use serde_json::Value;
use shop_events::{ClientIdentity, ConnectionManager, InMemoryBroker, Producer, ProducerConfig};
use shop_order_service::auth::USER_ID_HEADER;
use shop_order_service::config::ServerConfig;
use shop_order_service::store::InMemoryOrderStore;
use shop_order_service::{build_app, AppState};
use tower::ServiceExt;

pub const USER: &str = "user_2abc";

pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        request_timeout_secs: 30,
    }
}

/// The app plus handles on its collaborators.
pub struct TestApp {
    pub app: Router,
    pub broker: Arc<InMemoryBroker>,
    pub store: Arc<InMemoryOrderStore>,
    pub connection: Arc<ConnectionManager>,
}

/// Build the full router over an in-memory broker and store, with the
/// producer already connected.
pub async fn build_test_app() -> TestApp {
    let broker = Arc::new(InMemoryBroker::new());
    let connection = Arc::new(ConnectionManager::new(
        ClientIdentity::new("order-service"),
        broker.clone(),
    ));
    connection.connect().await.unwrap();
    let producer = Arc::new(Producer::new(
        Arc::clone(&connection),
        ProducerConfig::default(),
    ));
    let store = Arc::new(InMemoryOrderStore::new());

    let state = AppState {
        store: store.clone(),
        producer,
        connection: Arc::clone(&connection),
        config: Arc::new(test_config()),
        started_at: Utc::now(),
    };

    TestApp {
        app: build_app(state),
        broker,
        store,
        connection,
    }
}

pub async fn get(app: Router, uri: &str, user: Option<&str>) -> Response {
    let mut builder = Request::builder().method(Method::GET).uri(uri);
    if let Some(user) = user {
        builder = builder.header(USER_ID_HEADER, user);
    }
    app.oneshot(builder.body(Body::empty()).unwrap())
        .await
        .unwrap()
}

pub async fn post_json(app: Router, uri: &str, user: Option<&str>, body: &str) -> Response {
    let mut builder = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(user) = user {
        builder = builder.header(USER_ID_HEADER, user);
    }
    app.oneshot(builder.body(Body::from(body.to_string())).unwrap())
        .await
        .unwrap()
}

pub async fn body_json(response: Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
