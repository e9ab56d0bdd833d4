use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use shop_events::broker::protocol::{ErrorKind, Request, RequestFrame, Response, ResponseFrame};
use shop_events::{Broker, ClientIdentity};
use tokio::task::JoinSet;

use crate::state::AppState;
use crate::ws::dispatch::execute;
use crate::ws::manager::SessionSender;

/// HTTP handler that upgrades the connection to a broker client socket.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Serve one client socket.
///
/// A sender task forwards response frames from the session channel to the
/// sink. Quick operations run inline so a client's publishes and commits are
/// applied in the order it sent them; fetches long-poll on their own tasks so
/// they do not hold up the socket. On disconnect, pending fetches are
/// aborted and the client's broker session is closed.
async fn handle_socket(socket: WebSocket, state: AppState) {
    let conn_id = uuid::Uuid::new_v4().to_string();
    tracing::info!(conn_id = %conn_id, "Client socket connected");

    let mut rx = state.sessions.add(conn_id.clone()).await;
    let Some(tx) = state.sessions.sender(&conn_id).await else {
        return;
    };

    let (mut sink, mut stream) = socket.split();

    let sender_conn_id = conn_id.clone();
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sink.send(msg).await.is_err() {
                tracing::debug!(conn_id = %sender_conn_id, "Client sink closed");
                break;
            }
        }
    });

    let mut fetches = JoinSet::new();

    while let Some(result) = stream.next().await {
        match result {
            Ok(Message::Text(text)) => {
                let frame = match serde_json::from_str::<RequestFrame>(text.as_str()) {
                    Ok(frame) => frame,
                    Err(e) => {
                        tracing::debug!(conn_id = %conn_id, error = %e, "Malformed request frame");
                        reply(&tx, request_id(text.as_str()), protocol_error(e.to_string()));
                        continue;
                    }
                };

                if matches!(frame.request, Request::Fetch { .. }) {
                    let state = state.clone();
                    let tx = tx.clone();
                    let conn_id = conn_id.clone();
                    fetches.spawn(async move {
                        let response =
                            execute(&state.broker, &state.sessions, &conn_id, frame.request).await;
                        reply(&tx, frame.id, response);
                    });
                } else {
                    let response =
                        execute(&state.broker, &state.sessions, &conn_id, frame.request).await;
                    reply(&tx, frame.id, response);
                }

                // Reap finished fetches so the set does not grow unbounded.
                while fetches.try_join_next().is_some() {}
            }
            Ok(Message::Close(_)) => break,
            Ok(Message::Pong(_)) => {
                tracing::trace!(conn_id = %conn_id, "Pong received");
            }
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(conn_id = %conn_id, error = %e, "Client receive error");
                break;
            }
        }
    }

    fetches.abort_all();
    if let Some(client) = state.sessions.remove(&conn_id).await {
        state.broker.disconnect(&ClientIdentity::new(client)).await;
    }
    send_task.abort();
    tracing::info!(conn_id = %conn_id, "Client socket disconnected");
}

fn reply(tx: &SessionSender, id: u64, result: Response) {
    match serde_json::to_string(&ResponseFrame { id, result }) {
        Ok(text) => {
            let _ = tx.send(Message::Text(text.into()));
        }
        Err(e) => tracing::error!(id, error = %e, "Failed to encode response frame"),
    }
}

/// Best-effort id of a frame that failed to parse, so the client can match
/// the error to its request.
fn request_id(text: &str) -> u64 {
    serde_json::from_str::<serde_json::Value>(text)
        .ok()
        .and_then(|v| v.get("id").and_then(serde_json::Value::as_u64))
        .unwrap_or(0)
}

fn protocol_error(message: String) -> Response {
    Response::Error {
        kind: ErrorKind::Protocol,
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_id_is_recovered_from_bad_frames() {
        assert_eq!(request_id(r#"{"id":42,"op":"dance"}"#), 42);
        assert_eq!(request_id("not json"), 0);
    }
}
