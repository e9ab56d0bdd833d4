//! WebSocket client for a stand-alone broker server.
//!
//! [`RemoteBroker`] opens one WebSocket per client session. A writer task
//! drains an outbound channel into the socket sink, and a reader task routes
//! each [`ResponseFrame`] to the caller waiting on its request id. When the
//! socket closes, every pending call fails with
//! [`BrokerError::ConnectionLost`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use super::protocol::{Request, RequestFrame, Response, ResponseFrame, WireRecord};
use super::{Broker, BrokerError, Record};
use crate::connection::ClientIdentity;
use crate::topic::Topic;

/// Default time to wait for a broker reply (fetch adds its wait on top).
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Response>>>>;
type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Broker client speaking the JSON-over-WebSocket protocol.
pub struct RemoteBroker {
    url: String,
    request_timeout: Duration,
    session: RwLock<Option<Arc<Session>>>,
}

/// One live socket.
struct Session {
    outbound: mpsc::UnboundedSender<Message>,
    pending: Pending,
    next_id: AtomicU64,
    closed: CancellationToken,
    reader: JoinHandle<()>,
}

impl Drop for Session {
    fn drop(&mut self) {
        self.closed.cancel();
        self.reader.abort();
    }
}

impl RemoteBroker {
    /// Create a client for the broker at `url` (e.g. `ws://127.0.0.1:9093/ws`).
    /// No connection is made until [`Broker::connect`].
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            session: RwLock::new(None),
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn open_session(&self) -> Result<Arc<Session>, BrokerError> {
        let (ws_stream, _response) = connect_async(self.url.as_str())
            .await
            .map_err(|e| BrokerError::Unreachable(format!("{}: {e}", self.url)))?;

        let (mut sink, stream) = ws_stream.split();
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Message>();
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let closed = CancellationToken::new();

        // Writer: exits once every sender is gone or the socket errors.
        tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                if sink.send(message).await.is_err() {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let reader = tokio::spawn(read_loop(
            stream,
            Arc::clone(&pending),
            closed.clone(),
            self.url.clone(),
        ));

        Ok(Arc::new(Session {
            outbound,
            pending,
            next_id: AtomicU64::new(1),
            closed,
            reader,
        }))
    }

    async fn current_session(&self) -> Result<Arc<Session>, BrokerError> {
        let session = self
            .session
            .read()
            .await
            .clone()
            .ok_or_else(|| BrokerError::ConnectionLost("no open session".into()))?;

        if session.closed.is_cancelled() {
            return Err(BrokerError::ConnectionLost("socket closed".into()));
        }
        Ok(session)
    }

    async fn call(&self, request: Request, timeout: Duration) -> Result<Response, BrokerError> {
        let session = self.current_session().await?;
        call_on(&session, request, timeout).await
    }
}

async fn call_on(
    session: &Session,
    request: Request,
    timeout: Duration,
) -> Result<Response, BrokerError> {
    let id = session.next_id.fetch_add(1, Ordering::Relaxed);
    let op = request.op();
    let text = serde_json::to_string(&RequestFrame { id, request })
        .map_err(|e| BrokerError::Protocol(format!("Failed to encode {op} request: {e}")))?;

    let (reply_tx, reply_rx) = oneshot::channel();
    session.pending.lock().await.insert(id, reply_tx);

    if session.outbound.send(Message::Text(text.into())).is_err() {
        session.pending.lock().await.remove(&id);
        return Err(BrokerError::ConnectionLost("socket writer stopped".into()));
    }

    match tokio::time::timeout(timeout, reply_rx).await {
        Ok(Ok(response)) => response.into_error(),
        Ok(Err(_)) => Err(BrokerError::ConnectionLost(format!(
            "socket closed while waiting for {op} reply"
        ))),
        Err(_) => {
            session.pending.lock().await.remove(&id);
            Err(BrokerError::Timeout(timeout))
        }
    }
}

async fn read_loop(
    mut stream: futures::stream::SplitStream<WsStream>,
    pending: Pending,
    closed: CancellationToken,
    url: String,
) {
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                let response: ResponseFrame = match serde_json::from_str(text.as_str()) {
                    Ok(r) => r,
                    Err(e) => {
                        tracing::warn!(url = %url, error = %e, "Ignoring unparseable broker frame");
                        continue;
                    }
                };
                match pending.lock().await.remove(&response.id) {
                    Some(reply) => {
                        let _ = reply.send(response.result);
                    }
                    None => {
                        tracing::debug!(url = %url, id = response.id, "Reply for abandoned request");
                    }
                }
            }
            Ok(Message::Close(_)) => {
                tracing::info!(url = %url, "Broker closed the connection");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "Broker connection error");
                break;
            }
        }
    }

    closed.cancel();
    // Dropping the senders wakes every waiting caller with ConnectionLost.
    pending.lock().await.clear();
}

#[async_trait]
impl Broker for RemoteBroker {
    fn target(&self) -> String {
        self.url.clone()
    }

    async fn connect(&self, client: &ClientIdentity) -> Result<(), BrokerError> {
        let session = self.open_session().await?;

        let hello = Request::Hello {
            client: client.service_name.clone(),
        };
        match call_on(&session, hello, self.request_timeout).await {
            Ok(Response::Ok) => {}
            Ok(other) => {
                return Err(BrokerError::Protocol(format!(
                    "Unexpected reply to hello: {other:?}"
                )))
            }
            Err(BrokerError::ConnectionLost(reason)) => {
                return Err(BrokerError::Unreachable(reason))
            }
            Err(e) => return Err(e),
        }

        *self.session.write().await = Some(session);
        tracing::debug!(url = %self.url, client = %client, "Broker session opened");
        Ok(())
    }

    async fn disconnect(&self, client: &ClientIdentity) {
        if let Some(session) = self.session.write().await.take() {
            let _ = session.outbound.send(Message::Close(None));
            tracing::debug!(url = %self.url, client = %client, "Broker session closed");
        }
    }

    async fn publish(&self, topic: &Topic, payload: Vec<u8>) -> Result<u64, BrokerError> {
        let payload = String::from_utf8(payload)
            .map_err(|_| BrokerError::Protocol("payload is not UTF-8 JSON".into()))?;
        let request = Request::Publish {
            topic: topic.clone(),
            payload,
        };

        match self.call(request, self.request_timeout).await? {
            Response::Published { offset } => Ok(offset),
            other => Err(BrokerError::Protocol(format!(
                "Unexpected reply to publish: {other:?}"
            ))),
        }
    }

    async fn join(&self, group: &str, topics: &[Topic]) -> Result<(), BrokerError> {
        let request = Request::Join {
            group: group.to_string(),
            topics: topics.to_vec(),
        };
        match self.call(request, self.request_timeout).await? {
            Response::Ok => Ok(()),
            other => Err(BrokerError::Protocol(format!(
                "Unexpected reply to join: {other:?}"
            ))),
        }
    }

    async fn fetch(
        &self,
        group: &str,
        topics: &[Topic],
        max: usize,
        wait: Duration,
    ) -> Result<Vec<Record>, BrokerError> {
        let request = Request::Fetch {
            group: group.to_string(),
            topics: topics.to_vec(),
            max,
            wait_ms: wait.as_millis() as u64,
        };
        match self.call(request, wait + self.request_timeout).await? {
            Response::Records { records } => {
                Ok(records.into_iter().map(WireRecord::into).collect())
            }
            other => Err(BrokerError::Protocol(format!(
                "Unexpected reply to fetch: {other:?}"
            ))),
        }
    }

    async fn commit(&self, group: &str, topic: &Topic, offset: u64) -> Result<(), BrokerError> {
        let request = Request::Commit {
            group: group.to_string(),
            topic: topic.clone(),
            offset,
        };
        match self.call(request, self.request_timeout).await? {
            Response::Ok => Ok(()),
            other => Err(BrokerError::Protocol(format!(
                "Unexpected reply to commit: {other:?}"
            ))),
        }
    }
}
