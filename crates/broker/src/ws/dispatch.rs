//! Execute protocol requests against the in-memory broker.

use std::time::Duration;

use shop_events::broker::protocol::{ErrorKind, Request, Response, WireRecord};
use shop_events::{Broker, ClientIdentity, InMemoryBroker};

use crate::ws::manager::SessionManager;

/// Upper bound on a client-requested fetch wait.
pub const MAX_FETCH_WAIT: Duration = Duration::from_secs(30);

/// Upper bound on a client-requested batch size.
pub const MAX_FETCH_RECORDS: usize = 1000;

/// Run one request for the socket `conn_id` and build its response.
///
/// Every operation except `hello` requires the socket to have announced its
/// client first.
pub async fn execute(
    broker: &InMemoryBroker,
    sessions: &SessionManager,
    conn_id: &str,
    request: Request,
) -> Response {
    if let Request::Hello { client } = request {
        return hello(broker, sessions, conn_id, client).await;
    }

    if sessions.client(conn_id).await.is_none() {
        return Response::Error {
            kind: ErrorKind::Rejected,
            message: format!("'{}' before 'hello'", request.op()),
        };
    }

    let result = match request {
        Request::Hello { .. } => return Response::Ok,
        Request::Publish { topic, payload } => broker
            .publish(&topic, payload.into_bytes())
            .await
            .map(|offset| Response::Published { offset }),
        Request::Join { group, topics } => broker.join(&group, &topics).await.map(|()| Response::Ok),
        Request::Fetch {
            group,
            topics,
            max,
            wait_ms,
        } => {
            let wait = Duration::from_millis(wait_ms).min(MAX_FETCH_WAIT);
            let max = max.clamp(1, MAX_FETCH_RECORDS);
            broker
                .fetch(&group, &topics, max, wait)
                .await
                .map(|records| Response::Records {
                    records: records.into_iter().map(WireRecord::from).collect(),
                })
        }
        Request::Commit {
            group,
            topic,
            offset,
        } => broker
            .commit(&group, &topic, offset)
            .await
            .map(|()| Response::Ok),
    };

    result.unwrap_or_else(|e| Response::from_error(&e))
}

async fn hello(
    broker: &InMemoryBroker,
    sessions: &SessionManager,
    conn_id: &str,
    client: String,
) -> Response {
    if client.trim().is_empty() {
        return Response::Error {
            kind: ErrorKind::Rejected,
            message: "client name must not be empty".into(),
        };
    }

    if let Err(e) = broker.connect(&ClientIdentity::new(client.clone())).await {
        return Response::from_error(&e);
    }
    sessions.set_client(conn_id, client.clone()).await;
    tracing::info!(conn_id = %conn_id, client = %client, "Client said hello");
    Response::Ok
}
