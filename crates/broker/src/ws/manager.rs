use std::collections::HashMap;

use axum::body::Bytes;
use axum::extract::ws::Message;
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, RwLock};

/// Channel sender half for pushing frames to a client socket.
pub type SessionSender = mpsc::UnboundedSender<Message>;

/// One open client socket.
pub struct Session {
    /// Service name announced in `hello`; `None` until then.
    pub client: Option<String>,
    pub sender: SessionSender,
    pub connected_at: DateTime<Utc>,
}

/// Tracks every open client socket.
///
/// Thread-safe via interior `RwLock`; shared behind an `Arc`.
pub struct SessionManager {
    sessions: RwLock<HashMap<String, Session>>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Register a socket and return the receiver its sender task drains.
    pub async fn add(&self, conn_id: String) -> mpsc::UnboundedReceiver<Message> {
        let (tx, rx) = mpsc::unbounded_channel();
        let session = Session {
            client: None,
            sender: tx,
            connected_at: Utc::now(),
        };
        self.sessions.write().await.insert(conn_id, session);
        rx
    }

    /// Remove a socket, returning the client it announced, if any.
    pub async fn remove(&self, conn_id: &str) -> Option<String> {
        self.sessions
            .write()
            .await
            .remove(conn_id)
            .and_then(|s| s.client)
    }

    /// Bind a socket to the client named in its `hello`.
    pub async fn set_client(&self, conn_id: &str, client: String) -> bool {
        match self.sessions.write().await.get_mut(conn_id) {
            Some(session) => {
                session.client = Some(client);
                true
            }
            None => false,
        }
    }

    pub async fn sender(&self, conn_id: &str) -> Option<SessionSender> {
        self.sessions
            .read()
            .await
            .get(conn_id)
            .map(|s| s.sender.clone())
    }

    pub async fn client(&self, conn_id: &str) -> Option<String> {
        self.sessions
            .read()
            .await
            .get(conn_id)
            .and_then(|s| s.client.clone())
    }

    /// Names of clients that completed `hello`, sorted.
    pub async fn clients(&self) -> Vec<String> {
        let mut clients: Vec<String> = self
            .sessions
            .read()
            .await
            .values()
            .filter_map(|s| s.client.clone())
            .collect();
        clients.sort();
        clients
    }

    pub async fn connection_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Send a Close frame to every socket, then clear the map.
    pub async fn shutdown_all(&self) {
        let mut sessions = self.sessions.write().await;
        let count = sessions.len();
        for session in sessions.values() {
            let _ = session.sender.send(Message::Close(None));
        }
        sessions.clear();
        tracing::info!(count, "Closed all client sessions");
    }

    /// Ping every socket and forget those whose sender task has exited.
    ///
    /// Returns the clients of the forgotten sockets; their broker sessions
    /// are still open and must be released by the caller.
    pub async fn ping_all(&self) -> Vec<String> {
        let mut released = Vec::new();
        self.sessions.write().await.retain(|conn_id, session| {
            if session.sender.send(Message::Ping(Bytes::new())).is_ok() {
                return true;
            }
            tracing::debug!(conn_id = %conn_id, "Forgetting session with closed socket");
            released.extend(session.client.take());
            false
        });
        released
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}
