//! Order endpoints.
//!
//! Creating an order has two independently observable outcomes: the order is
//! saved (or the request fails), then `order.created` is published (or the
//! failure is reported in the response body). A publish failure never undoes
//! a saved order.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use shop_core::order::{validate_new_order, NewOrder, OrderRecord};
use shop_events::{Ack, PublishError, PublishErrorKind};

use crate::auth::Principal;
use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

/// Outcome of announcing a saved order on the bus.
#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Notification {
    Published {
        topic: String,
        offset: u64,
        message_id: String,
    },
    Failed {
        kind: PublishErrorKind,
        error: String,
    },
}

impl Notification {
    fn from_outcome(outcome: Result<Ack, PublishError>) -> Self {
        match outcome {
            Ok(ack) => Notification::Published {
                topic: ack.topic.to_string(),
                offset: ack.offset,
                message_id: ack.message_id.to_string(),
            },
            Err(e) => Notification::Failed {
                kind: e.kind(),
                error: e.to_string(),
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CreatedOrder {
    pub order: OrderRecord,
    pub notification: Notification,
}

/// POST /api/v1/orders
pub async fn create_order(
    State(state): State<AppState>,
    principal: Principal,
    payload: Result<Json<NewOrder>, JsonRejection>,
) -> AppResult<(StatusCode, Json<DataResponse<CreatedOrder>>)> {
    let Json(input) = payload.map_err(|e| AppError::BadRequest(e.body_text()))?;
    validate_new_order(&input)?;

    let order = state.store.save(&principal.user_id, input).await?;
    tracing::info!(
        order_id = %order.id,
        user_id = %order.user_id,
        amount = order.amount,
        "Order saved"
    );

    let outcome = state.producer.publish_event(&order.created_event()).await;
    match &outcome {
        Ok(ack) => tracing::info!(
            order_id = %order.id,
            offset = ack.offset,
            "order.created published"
        ),
        Err(e) => tracing::error!(
            order_id = %order.id,
            error = %e,
            "Failed to publish order.created; order remains saved"
        ),
    }

    Ok((
        StatusCode::CREATED,
        Json(DataResponse {
            data: CreatedOrder {
                order,
                notification: Notification::from_outcome(outcome),
            },
        }),
    ))
}

/// GET /api/v1/orders
pub async fn list_orders(
    State(state): State<AppState>,
    principal: Principal,
) -> AppResult<Json<DataResponse<Vec<OrderRecord>>>> {
    let orders = state.store.list_for_user(&principal.user_id).await?;
    Ok(Json(DataResponse { data: orders }))
}

#[derive(Debug, Serialize)]
pub struct Me {
    pub user_id: String,
}

/// GET /api/v1/me -- echo the principal the gateway forwarded.
pub async fn me(principal: Principal) -> Json<DataResponse<Me>> {
    Json(DataResponse {
        data: Me {
            user_id: principal.user_id,
        },
    })
}
