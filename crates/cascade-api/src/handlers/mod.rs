//! HTTP handlers — the client WebSocket, chain config distribution and
//! coordinator status.

pub mod config;
pub mod status;
pub mod ws;

use std::sync::Arc;

use axum::http::StatusCode;

use cascade_services::{ConfigSource, Coordinator};

#[derive(Clone)]
pub struct ApiState {
    pub coordinator: Arc<Coordinator>,
    /// Same source the coordinator reads each round.
    pub config: Arc<dyn ConfigSource>,
}

pub async fn handle_not_found() -> (StatusCode, &'static str) {
    (StatusCode::NOT_FOUND, "not found")
}

// Re-export handler functions for use in router setup.
pub use config::handle_config_current;
pub use status::handle_status;
pub use ws::handle_ws;
