mod dispatch;
mod handler;
mod heartbeat;
pub mod manager;

pub use dispatch::{execute, MAX_FETCH_RECORDS, MAX_FETCH_WAIT};
pub use handler::ws_handler;
pub use heartbeat::start_heartbeat;
pub use manager::SessionManager;
