pub mod health;

use axum::routing::get;
use axum::Router;

use crate::state::AppState;
use crate::ws::ws_handler;

/// Client socket endpoint. Producers and consumer groups connect here.
pub fn ws_router() -> Router<AppState> {
    Router::new().route("/ws", get(ws_handler))
}
