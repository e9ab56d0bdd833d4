//! Liveness sweep over client sockets.
//!
//! Every `heartbeat_interval` each socket gets a Ping. Sockets whose sender
//! task has already exited are forgotten and their broker sessions released,
//! so a client that vanished without a Close frame does not stay listed.

use shop_events::{Broker, ClientIdentity};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::state::AppState;

/// Run the sweep until `cancel` fires. The first sweep is one interval in.
pub fn start_heartbeat(state: AppState, cancel: CancellationToken) -> JoinHandle<()> {
    let period = state.config.heartbeat_interval;

    tokio::spawn(async move {
        let mut ticks = tokio::time::interval_at(Instant::now() + period, period);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticks.tick() => sweep(&state).await,
            }
        }
        tracing::debug!("Heartbeat stopped");
    })
}

async fn sweep(state: &AppState) {
    let released = state.sessions.ping_all().await;
    for client in &released {
        state.broker.disconnect(&ClientIdentity::new(client.as_str())).await;
    }

    let open = state.sessions.connection_count().await;
    tracing::debug!(
        open,
        released = ?released,
        "Heartbeat sweep",
    );
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::extract::ws::Message;
    use shop_events::Broker;

    use super::*;
    use crate::config::BrokerConfig;

    fn state(interval_secs: u64) -> AppState {
        let mut config = BrokerConfig::from_lookup(|_| None).unwrap();
        config.heartbeat_interval = Duration::from_secs(interval_secs);
        AppState::new(config)
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_pings_live_sockets_and_releases_dead_ones() {
        let state = state(10);
        let mut live = state.sessions.add("conn-1".into()).await;
        drop(state.sessions.add("conn-2".into()).await);
        state.sessions.set_client("conn-2", "email-service".into()).await;
        state.broker.connect(&ClientIdentity::new("email-service")).await.unwrap();

        let cancel = CancellationToken::new();
        let handle = start_heartbeat(state.clone(), cancel.clone());

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert!(matches!(live.recv().await, Some(Message::Ping(_))));
        assert_eq!(state.sessions.connection_count().await, 1);
        assert!(state.broker.connected_clients().await.is_empty());

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn nothing_is_sent_before_the_first_interval() {
        let state = state(30);
        let mut live = state.sessions.add("conn-1".into()).await;

        let cancel = CancellationToken::new();
        let handle = start_heartbeat(state.clone(), cancel.clone());

        tokio::time::sleep(Duration::from_secs(29)).await;
        assert!(live.try_recv().is_err());

        cancel.cancel();
        handle.await.unwrap();
    }
}
